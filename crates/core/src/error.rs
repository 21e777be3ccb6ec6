use thiserror::Error;

use crate::model::{ConfigError, ItemError, ResultError, ScoreError, SessionError};

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Item(#[from] ItemError),
    #[error(transparent)]
    Result(#[from] ResultError),
    #[error(transparent)]
    Score(#[from] ScoreError),
    #[error(transparent)]
    Session(#[from] SessionError),
}
