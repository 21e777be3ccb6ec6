use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
#[non_exhaustive]
pub enum ScoreError {
    #[error("score out of range 0-100: {0}")]
    OutOfRange(f64),
}

fn check_range(value: f64) -> Result<f64, ScoreError> {
    if (0.0..=100.0).contains(&value) {
        Ok(value)
    } else {
        Err(ScoreError::OutOfRange(value))
    }
}

/// Word-level pronunciation score from the scoring service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WordScore {
    pub word: String,
    pub score: f64,
    /// e.g. "Mispronunciation", "Omission". Absent when the word was fine.
    pub error_kind: Option<String>,
}

/// Pronunciation assessment for one captured utterance.
///
/// `pronunciation` is the overall 0-100 grade; the sub-scores break it down
/// per dimension when the scoring service provides them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreReport {
    recognized_text: String,
    pronunciation: f64,
    accuracy: Option<f64>,
    fluency: Option<f64>,
    completeness: Option<f64>,
    words: Vec<WordScore>,
}

impl ScoreReport {
    /// Builds a validated score report.
    ///
    /// # Errors
    ///
    /// Returns `ScoreError::OutOfRange` if any score falls outside 0-100.
    pub fn new(
        recognized_text: impl Into<String>,
        pronunciation: f64,
        accuracy: Option<f64>,
        fluency: Option<f64>,
        completeness: Option<f64>,
        words: Vec<WordScore>,
    ) -> Result<Self, ScoreError> {
        let pronunciation = check_range(pronunciation)?;
        let accuracy = accuracy.map(check_range).transpose()?;
        let fluency = fluency.map(check_range).transpose()?;
        let completeness = completeness.map(check_range).transpose()?;
        for word in &words {
            check_range(word.score)?;
        }
        Ok(Self {
            recognized_text: recognized_text.into(),
            pronunciation,
            accuracy,
            fluency,
            completeness,
            words,
        })
    }

    #[must_use]
    pub fn recognized_text(&self) -> &str {
        &self.recognized_text
    }

    #[must_use]
    pub fn pronunciation(&self) -> f64 {
        self.pronunciation
    }

    #[must_use]
    pub fn accuracy(&self) -> Option<f64> {
        self.accuracy
    }

    #[must_use]
    pub fn fluency(&self) -> Option<f64> {
        self.fluency
    }

    #[must_use]
    pub fn completeness(&self) -> Option<f64> {
        self.completeness
    }

    #[must_use]
    pub fn words(&self) -> &[WordScore] {
        &self.words
    }
}
