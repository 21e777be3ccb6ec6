use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::model::ids::ItemId;
use crate::model::score::ScoreReport;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ResultError {
    #[error("sequence numbers are 1-based: got 0")]
    ZeroSequence,

    #[error("unknown user response: {0}")]
    UnknownResponse(String),
}

/// The user's evaluation of a single practice item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserResponse {
    Correct,
    Incorrect,
    Skipped,
}

impl UserResponse {
    /// Storage/wire representation.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            UserResponse::Correct => "correct",
            UserResponse::Incorrect => "incorrect",
            UserResponse::Skipped => "skipped",
        }
    }
}

impl fmt::Display for UserResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UserResponse {
    type Err = ResultError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "correct" => Ok(UserResponse::Correct),
            "incorrect" => Ok(UserResponse::Incorrect),
            "skipped" => Ok(UserResponse::Skipped),
            other => Err(ResultError::UnknownResponse(other.to_string())),
        }
    }
}

/// Outcome of one item within a session.
///
/// References the content item by id only; the item itself lives in the
/// content cache and is resolved at display time. Entries are append-only
/// within a session and carry a contiguous 1-based sequence number.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultEntry {
    item_id: ItemId,
    sequence_number: u32,
    response: UserResponse,
    /// Present only in listen-and-repeat mode, and absent there too when
    /// capture or scoring degraded.
    score: Option<ScoreReport>,
    response_time_ms: u64,
}

impl ResultEntry {
    /// Builds a result entry.
    ///
    /// # Errors
    ///
    /// Returns `ResultError::ZeroSequence` if `sequence_number` is 0.
    pub fn new(
        item_id: ItemId,
        sequence_number: u32,
        response: UserResponse,
        score: Option<ScoreReport>,
        response_time_ms: u64,
    ) -> Result<Self, ResultError> {
        if sequence_number == 0 {
            return Err(ResultError::ZeroSequence);
        }
        Ok(Self {
            item_id,
            sequence_number,
            response,
            score,
            response_time_ms,
        })
    }

    #[must_use]
    pub fn item_id(&self) -> ItemId {
        self.item_id
    }

    #[must_use]
    pub fn sequence_number(&self) -> u32 {
        self.sequence_number
    }

    #[must_use]
    pub fn response(&self) -> UserResponse {
        self.response
    }

    #[must_use]
    pub fn score(&self) -> Option<&ScoreReport> {
        self.score.as_ref()
    }

    #[must_use]
    pub fn recognized_text(&self) -> Option<&str> {
        self.score.as_ref().map(ScoreReport::recognized_text)
    }

    #[must_use]
    pub fn response_time_ms(&self) -> u64 {
        self.response_time_ms
    }
}
