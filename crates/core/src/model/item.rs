use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use url::Url;

use crate::model::ids::{ItemId, TagId};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ItemError {
    #[error("item text cannot be empty")]
    EmptyText,

    #[error("invalid audio url: {0}")]
    InvalidAudioUrl(String),

    #[error("unknown level: {0}")]
    UnknownLevel(String),

    #[error("unknown item kind: {0}")]
    UnknownKind(String),
}

/// CEFR proficiency level used to classify practice content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Level {
    A1,
    A2,
    B1,
    B2,
    C1,
}

impl Level {
    /// Storage/wire representation.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Level::A1 => "A1",
            Level::A2 => "A2",
            Level::B1 => "B1",
            Level::B2 => "B2",
            Level::C1 => "C1",
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Level {
    type Err = ItemError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "A1" => Ok(Level::A1),
            "A2" => Ok(Level::A2),
            "B1" => Ok(Level::B1),
            "B2" => Ok(Level::B2),
            "C1" => Ok(Level::C1),
            other => Err(ItemError::UnknownLevel(other.to_string())),
        }
    }
}

/// Whether an item is phrased as a question or an answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemKind {
    Question,
    Answer,
}

impl ItemKind {
    /// Storage/wire representation.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ItemKind::Question => "question",
            ItemKind::Answer => "answer",
        }
    }
}

impl FromStr for ItemKind {
    type Err = ItemError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "question" => Ok(ItemKind::Question),
            "answer" => Ok(ItemKind::Answer),
            other => Err(ItemError::UnknownKind(other.to_string())),
        }
    }
}

/// A single piece of practice content: reference text plus its audio.
///
/// Items are immutable and sourced externally (remote catalogue or local
/// cache). Sessions reference items by id only; the full item is resolved at
/// display time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentItem {
    id: ItemId,
    text: String,
    audio_url: Url,
    level: Level,
    kind: ItemKind,
    tag_ids: Vec<TagId>,
}

impl ContentItem {
    /// Builds a validated content item.
    ///
    /// # Errors
    ///
    /// Returns `ItemError::EmptyText` if the text is blank after trimming and
    /// `ItemError::InvalidAudioUrl` if the audio reference does not parse.
    pub fn new(
        id: ItemId,
        text: impl Into<String>,
        audio_url: impl AsRef<str>,
        level: Level,
        kind: ItemKind,
        tag_ids: Vec<TagId>,
    ) -> Result<Self, ItemError> {
        let text = text.into();
        if text.trim().is_empty() {
            return Err(ItemError::EmptyText);
        }
        let raw = audio_url.as_ref().trim();
        let audio_url =
            Url::parse(raw).map_err(|_| ItemError::InvalidAudioUrl(raw.to_string()))?;
        Ok(Self {
            id,
            text,
            audio_url,
            level,
            kind,
            tag_ids,
        })
    }

    #[must_use]
    pub fn id(&self) -> ItemId {
        self.id
    }

    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }

    #[must_use]
    pub fn audio_url(&self) -> &Url {
        &self.audio_url
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

    /// True if the item carries every tag in `wanted` (AND semantics).
    #[must_use]
    pub fn has_all_tags(&self, wanted: &[TagId]) -> bool {
        wanted.iter().all(|tag| self.tag_ids.contains(tag))
    }
}
