//! Pronunciation scoring client: trait port plus the HTTP implementation.

use std::env;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

use parrot_core::model::{ScoreReport, WordScore};

use crate::error::ScoringError;

/// Upper bound on a single scoring request. The session runner enforces
/// this with its own timer as well, so a misbehaving client cannot stall
/// the session.
pub const SCORING_TIMEOUT: Duration = Duration::from_secs(10);

/// Language passed to the scoring service when the host app sets none.
pub const DEFAULT_LANGUAGE: &str = "en-US";

/// Opaque scoring oracle: transcribes a captured utterance and grades it
/// against the reference text.
#[async_trait]
pub trait ScoringClient: Send + Sync {
    /// Scores `audio` (16 kHz mono s16le PCM) against `reference_text`.
    ///
    /// # Errors
    ///
    /// Returns `ScoringError`; the caller converts any failure into a
    /// scoreless result rather than propagating it.
    async fn score(
        &self,
        audio: &[u8],
        reference_text: &str,
        language: &str,
    ) -> Result<ScoreReport, ScoringError>;
}

#[derive(Clone, Debug)]
pub struct ScoringConfig {
    pub base_url: String,
    pub api_key: String,
}

impl ScoringConfig {
    #[must_use]
    pub fn from_env() -> Option<Self> {
        let api_key = env::var("PARROT_SCORING_KEY").ok()?;
        if api_key.trim().is_empty() {
            return None;
        }
        let base_url = env::var("PARROT_SCORING_URL")
            .unwrap_or_else(|_| "https://speech.parrot.app".into());
        Some(Self { base_url, api_key })
    }
}

/// HTTP scoring client. Disabled (every call fails fast) when no config is
/// present, which keeps offline listen-only sessions fully functional.
#[derive(Clone)]
pub struct HttpScoringClient {
    client: Client,
    config: Option<ScoringConfig>,
}

impl HttpScoringClient {
    #[must_use]
    pub fn from_env() -> Self {
        Self::new(ScoringConfig::from_env())
    }

    #[must_use]
    pub fn new(config: Option<ScoringConfig>) -> Self {
        let client = Client::builder()
            .timeout(SCORING_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self { client, config }
    }

    #[must_use]
    pub fn enabled(&self) -> bool {
        self.config.is_some()
    }
}

#[async_trait]
impl ScoringClient for HttpScoringClient {
    async fn score(
        &self,
        audio: &[u8],
        reference_text: &str,
        language: &str,
    ) -> Result<ScoreReport, ScoringError> {
        let config = self.config.as_ref().ok_or(ScoringError::Disabled)?;

        let url = format!("{}/v1/assess", config.base_url.trim_end_matches('/'));
        let response = self
            .client
            .post(url)
            .bearer_auth(&config.api_key)
            .query(&[("reference_text", reference_text), ("language", language)])
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(audio.to_vec())
            .send()
            .await
            .map_err(|err| {
                if err.is_timeout() {
                    ScoringError::Timeout
                } else {
                    ScoringError::Http(err)
                }
            })?;

        let status = response.status();
        if status == reqwest::StatusCode::UNPROCESSABLE_ENTITY {
            return Err(ScoringError::AudioQuality);
        }
        if status.is_server_error() {
            return Err(ScoringError::ServiceUnavailable);
        }
        if !status.is_success() {
            return Err(ScoringError::HttpStatus(status));
        }

        let body: AssessResponse = response.json().await?;
        body.into_report()
    }
}

#[derive(Debug, Deserialize)]
struct AssessResponse {
    recognized_text: String,
    pronunciation_score: f64,
    accuracy_score: Option<f64>,
    fluency_score: Option<f64>,
    completeness_score: Option<f64>,
    #[serde(default)]
    word_scores: Vec<AssessWord>,
}

#[derive(Debug, Deserialize)]
struct AssessWord {
    word: String,
    score: f64,
    error_type: Option<String>,
}

impl AssessResponse {
    fn into_report(self) -> Result<ScoreReport, ScoringError> {
        let words = self
            .word_scores
            .into_iter()
            .map(|w| WordScore {
                word: w.word,
                score: w.score,
                error_kind: w.error_type,
            })
            .collect();
        // An out-of-range score from the service is indistinguishable from
        // garbage audio on our side of the contract.
        ScoreReport::new(
            self.recognized_text,
            self.pronunciation_score,
            self.accuracy_score,
            self.fluency_score,
            self.completeness_score,
            words,
        )
        .map_err(|_| ScoringError::AudioQuality)
    }
}
