//! Storage abstraction for the single persisted state snapshot.

/// Observer turning notifications into storage writes.
pub mod bridge;
/// In-process store with an inspectable write log.
pub mod memory;
/// SQLite-backed single-row store.
pub mod sqlite;

use crate::codec::CodecError;

/// Storage failure.
#[derive(Debug, thiserror::Error)]
pub enum PersistError {
    /// SQLite rejected the statement or connection.
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    /// Envelope (de)serialization failed.
    #[error("serde: {0}")]
    Serde(#[from] serde_json::Error),
    /// The stored snapshot does not fit the declared state.
    #[error(transparent)]
    Codec(#[from] CodecError),
    /// Any other storage failure.
    #[error("{0}")]
    Message(String),
}

/// Result alias for storage operations.
pub type PersistResult<T> = Result<T, PersistError>;

/// Durable home of the serialized state.
///
/// Holds exactly one snapshot; every `update` overwrites it.
pub trait StateStore: Send {
    /// Prepares storage. Idempotent.
    fn init(&mut self) -> PersistResult<()>;

    /// Overwrites the stored snapshot with `data`.
    fn update(&mut self, data: &str) -> PersistResult<()>;

    /// Last stored snapshot, if any.
    fn load(&mut self) -> PersistResult<Option<String>> {
        Ok(None)
    }
}

impl StateStore for Box<dyn StateStore> {
    fn init(&mut self) -> PersistResult<()> {
        (**self).init()
    }

    fn update(&mut self, data: &str) -> PersistResult<()> {
        (**self).update(data)
    }

    fn load(&mut self) -> PersistResult<Option<String>> {
        (**self).load()
    }
}
