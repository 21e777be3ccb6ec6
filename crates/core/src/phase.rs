//! Data-driven per-item phase tables.
//!
//! Each session mode maps to an ordered list of phases that one generic
//! state machine walks for every item. Adding a mode means adding a table,
//! not a new machine.

use serde::{Deserialize, Serialize};

use crate::model::SessionMode;

/// Fixed silence between the two plays in listen-only mode.
pub const GAP_MS: u64 = 2_000;

/// How long the reference text stays revealed before evaluation opens.
pub const REVEAL_MS: u64 = 2_000;

/// One step of the per-item interaction sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseKind {
    /// First playback of the item audio (listen-only).
    PlayFirst,
    /// Fixed silent gap between the two plays.
    Gap,
    /// Second playback of the item audio (listen-only).
    PlaySecond,
    /// Reference text shown for a fixed interval.
    RevealText,
    /// Waiting for the user's correct/incorrect/skipped evaluation.
    AwaitEvaluation,
    /// Single playback of the item audio (listen-and-repeat).
    PlayOnce,
    /// Microphone capture of the user's repetition.
    Capture,
    /// Scoring request in flight.
    Submit,
    /// Pronunciation result on display.
    ShowResult,
    /// Waiting for the user to acknowledge the result.
    AwaitAck,
}

impl PhaseKind {
    /// True for phases that drive the audio output.
    #[must_use]
    pub fn is_playback(self) -> bool {
        matches!(
            self,
            PhaseKind::PlayFirst | PhaseKind::PlaySecond | PhaseKind::PlayOnce
        )
    }

    /// True for phases that block on user input.
    #[must_use]
    pub fn awaits_input(self) -> bool {
        matches!(self, PhaseKind::AwaitEvaluation | PhaseKind::AwaitAck)
    }

    /// Fixed timer duration for pure-wait phases.
    #[must_use]
    pub fn timer_ms(self) -> Option<u64> {
        match self {
            PhaseKind::Gap => Some(GAP_MS),
            PhaseKind::RevealText => Some(REVEAL_MS),
            _ => None,
        }
    }
}

const LISTEN_ONLY: &[PhaseKind] = &[
    PhaseKind::PlayFirst,
    PhaseKind::Gap,
    PhaseKind::PlaySecond,
    PhaseKind::RevealText,
    PhaseKind::AwaitEvaluation,
];

const LISTEN_AND_REPEAT: &[PhaseKind] = &[
    PhaseKind::PlayOnce,
    PhaseKind::Capture,
    PhaseKind::Submit,
    PhaseKind::ShowResult,
    PhaseKind::AwaitAck,
];

/// The ordered phase list for a mode, selected once at session start.
#[must_use]
pub fn phase_plan(mode: SessionMode) -> &'static [PhaseKind] {
    match mode {
        SessionMode::ListenOnly => LISTEN_ONLY,
        SessionMode::ListenAndRepeat => LISTEN_AND_REPEAT,
    }
}
