//! Pure summary statistics over a finished results log.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{ResultEntry, ScoreReport, UserResponse};
use crate::streak;

/// Aggregate statistics for a completed session.
///
/// Computed from the raw result sequence alone. `max_streak` is recomputed
/// here rather than trusted from the live counter, so the two act as a
/// cross-check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionTotals {
    pub correct: u32,
    pub incorrect: u32,
    pub skipped: u32,
    pub max_streak: u32,
    /// `None` when the mode produced no scores at all.
    pub avg_pronunciation: Option<f64>,
    pub avg_accuracy: Option<f64>,
    pub avg_fluency: Option<f64>,
    pub avg_completeness: Option<f64>,
    pub duration_seconds: i64,
}

fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        #[allow(clippy::cast_precision_loss)]
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

impl SessionTotals {
    /// Computes totals from the final result list and session timestamps.
    #[must_use]
    pub fn from_results(
        results: &[ResultEntry],
        started_at: DateTime<Utc>,
        completed_at: DateTime<Utc>,
    ) -> Self {
        let mut correct = 0_u32;
        let mut incorrect = 0_u32;
        let mut skipped = 0_u32;
        let mut pronunciation = Vec::new();
        let mut accuracy = Vec::new();
        let mut fluency = Vec::new();
        let mut completeness = Vec::new();

        for entry in results {
            match entry.response() {
                UserResponse::Correct => correct += 1,
                UserResponse::Incorrect => incorrect += 1,
                UserResponse::Skipped => skipped += 1,
            }
            if let Some(score) = entry.score() {
                pronunciation.push(score.pronunciation());
                accuracy.extend(score.accuracy());
                fluency.extend(score.fluency());
                completeness.extend(score.completeness());
            }
        }

        let max_streak = streak::max_over(results.iter().map(ResultEntry::response));

        Self {
            correct,
            incorrect,
            skipped,
            max_streak,
            avg_pronunciation: mean(&pronunciation),
            avg_accuracy: mean(&accuracy),
            avg_fluency: mean(&fluency),
            avg_completeness: mean(&completeness),
            duration_seconds: (completed_at - started_at).num_seconds().max(0),
        }
    }

    #[must_use]
    pub fn answered(&self) -> u32 {
        self.correct + self.incorrect + self.skipped
    }
}

/// Convenience for building a degraded/zero report in tests and callers.
#[must_use]
pub fn score_of(pronunciation: f64, recognized: &str) -> Option<ScoreReport> {
    ScoreReport::new(recognized, pronunciation, None, None, None, Vec::new()).ok()
}
