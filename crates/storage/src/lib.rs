#![forbid(unsafe_code)]

pub mod repository;
pub mod sqlite;

pub use repository::{
    ContentCache, HistoryFilter, InMemoryRepository, SessionStore, Storage, StorageError,
};
