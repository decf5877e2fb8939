//! Errors from the pool state store.

use thiserror::Error;

pub type StateResult<T> = Result<T, StateError>;

/// A failed snapshot or activity operation. Every variant carries the
/// underlying redb or serde_json message.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("cannot open state database: {0}")]
    Open(String),

    #[error("state transaction failed: {0}")]
    Transaction(String),

    #[error("cannot open state table: {0}")]
    Table(String),

    #[error("reading pool state failed: {0}")]
    Read(String),

    #[error("writing pool state failed: {0}")]
    Write(String),

    #[error("cannot encode pool record: {0}")]
    Serialize(String),

    #[error("stored pool record is corrupt: {0}")]
    Deserialize(String),
}
