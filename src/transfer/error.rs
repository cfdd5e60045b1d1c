//! Transfer errors

use crate::storage::StorageError;
use thiserror::Error;

/// Everything that can end a transfer before it is published
#[derive(Error, Debug)]
pub enum TransferError {
    /// The messaging gateway could not produce a download URL
    #[error("cannot resolve download URL: {0}")]
    Resolve(String),
    /// Network failure while streaming the payload
    #[error("transport error: {0}")]
    Transport(String),
    /// Local staging file could not be written or read
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// Object store rejected the upload
    #[error("storage error: {0}")]
    Store(StorageError),
    /// Operator requested cancellation
    #[error("transfer cancelled")]
    Cancelled,
}

impl From<StorageError> for TransferError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::Cancelled => Self::Cancelled,
            other => Self::Store(other),
        }
    }
}

impl TransferError {
    /// Returns `true` for operator-initiated aborts
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}
