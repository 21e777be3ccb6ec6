use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::model::ids::TagId;
use crate::model::item::{ItemKind, Level};

/// Largest number of items a single session may request.
pub const MAX_ITEMS_PER_SESSION: u32 = 100;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ConfigError {
    #[error("a session needs at least one tag filter")]
    EmptyTags,

    #[error("item count must be between 1 and {max}: {got}")]
    InvalidItemCount { got: u32, max: u32 },

    #[error("unknown session mode: {0}")]
    UnknownMode(String),
}

/// Interaction mode of a practice session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionMode {
    /// Hear each sentence twice, self-evaluate comprehension.
    ListenOnly,
    /// Hear once, repeat aloud, receive a pronunciation score.
    ListenAndRepeat,
}

impl SessionMode {
    /// Storage/wire representation.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            SessionMode::ListenOnly => "listen_only",
            SessionMode::ListenAndRepeat => "listen_and_repeat",
        }
    }

    /// True if this mode records microphone audio and scores pronunciation.
    #[must_use]
    pub fn scores_pronunciation(self) -> bool {
        matches!(self, SessionMode::ListenAndRepeat)
    }
}

impl fmt::Display for SessionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SessionMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "listen_only" => Ok(SessionMode::ListenOnly),
            "listen_and_repeat" => Ok(SessionMode::ListenAndRepeat),
            other => Err(ConfigError::UnknownMode(other.to_string())),
        }
    }
}

/// Immutable configuration a session is started with.
///
/// The config is snapshotted into the session at start; changing filters
/// afterwards never affects a running session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionConfig {
    mode: SessionMode,
    level: Level,
    kind: ItemKind,
    tag_ids: Vec<TagId>,
    item_count: u32,
}

impl SessionConfig {
    /// Builds a validated session configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::EmptyTags` when no tag filter is given, or
    /// `ConfigError::InvalidItemCount` when the count is zero or above
    /// [`MAX_ITEMS_PER_SESSION`].
    pub fn new(
        mode: SessionMode,
        level: Level,
        kind: ItemKind,
        tag_ids: Vec<TagId>,
        item_count: u32,
    ) -> Result<Self, ConfigError> {
        if tag_ids.is_empty() {
            return Err(ConfigError::EmptyTags);
        }
        if item_count == 0 || item_count > MAX_ITEMS_PER_SESSION {
            return Err(ConfigError::InvalidItemCount {
                got: item_count,
                max: MAX_ITEMS_PER_SESSION,
            });
        }
        Ok(Self {
            mode,
            level,
            kind,
            tag_ids,
            item_count,
        })
    }

    #[must_use]
    pub fn mode(&self) -> SessionMode {
        self.mode
    }

    #[must_use]
    pub fn level(&self) -> Level {
        self.level
    }

    #[must_use]
    pub fn kind(&self) -> ItemKind {
        self.kind
    }

    #[must_use]
    pub fn tag_ids(&self) -> &[TagId] {
        &self.tag_ids
    }

    #[must_use]
    pub fn item_count(&self) -> u32 {
        self.item_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn tag() -> TagId {
        TagId::new(Uuid::new_v4())
    }

    #[test]
    fn config_requires_tags() {
        let err = SessionConfig::new(
            SessionMode::ListenOnly,
            Level::A1,
            ItemKind::Question,
            Vec::new(),
            10,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::EmptyTags));
    }

    #[test]
    fn config_bounds_item_count() {
        let err = SessionConfig::new(
            SessionMode::ListenOnly,
            Level::A1,
            ItemKind::Question,
            vec![tag()],
            0,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidItemCount { got: 0, .. }));

        let err = SessionConfig::new(
            SessionMode::ListenOnly,
            Level::A1,
            ItemKind::Question,
            vec![tag()],
            101,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidItemCount { got: 101, .. }));
    }

    #[test]
    fn mode_parse_roundtrip() {
        for mode in [SessionMode::ListenOnly, SessionMode::ListenAndRepeat] {
            assert_eq!(mode.as_str().parse::<SessionMode>().unwrap(), mode);
        }
        assert!("shout_only".parse::<SessionMode>().is_err());
    }
}
