//! Collaborator error types.

use thiserror::Error;

/// Failures reported by the blockchain data source.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SourceError {
    /// The remote endpoint could not be reached or answered abnormally.
    #[error("blockchain source unavailable: {0}")]
    Unavailable(String),

    /// The network refused a broadcast transaction.
    #[error("broadcast rejected: {0}")]
    BroadcastRejected(String),
}

/// Failures reported by the state repository.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// A read failed.
    #[error("storage read: {0}")]
    Read(String),

    /// A write failed. Previously committed state must remain intact.
    #[error("storage write: {0}")]
    Write(String),

    /// Stored state failed to decode.
    #[error("corrupted state: {0}")]
    Corrupted(String),
}
