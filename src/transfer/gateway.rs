//! Messaging gateway as seen by a transfer worker.
//!
//! One gateway instance is bound to the status message of a single transfer.

use super::error::TransferError;
use super::types::StatusView;
use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::BoxStream;

/// Stream of payload bytes as delivered by the network
pub type PayloadStream = BoxStream<'static, Result<Bytes, TransferError>>;

/// Platform side of a transfer: source resolution, payload streaming, status rendering
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TransferGateway: Send + Sync {
    /// Resolve an opaque file handle to a direct download URL
    async fn resolve_download_url(&self, file_id: &str) -> Result<String, TransferError>;

    /// Start streaming the payload at `url`
    async fn open_download(&self, url: &str) -> Result<PayloadStream, TransferError>;

    /// Replace the status message content with `view`.
    ///
    /// Implementations swallow delivery problems they can recover from; an error
    /// here never changes the outcome of the transfer.
    async fn show_status(&self, view: &StatusView) -> Result<(), TransferError>;
}
