//! Transfer pipeline
//!
//! Download from the messaging gateway, stage locally, publish to the object
//! store. Each transfer runs in its own task and can be cancelled at chunk
//! boundaries through the [`TransferRegistry`].

/// Transfer errors
pub mod error;
/// Messaging gateway abstraction
pub mod gateway;
/// Progress arithmetic
pub mod progress;
/// Published-view cache
pub mod published;
/// Cancellation registry
pub mod registry;
/// Task supervision and graceful shutdown
pub mod supervisor;
/// Data model
pub mod types;
/// Per-transfer state machine
pub mod worker;

pub use error::TransferError;
pub use gateway::{PayloadStream, TransferGateway};
pub use progress::{format_size, TransferProgress};
pub use published::PublishedViews;
pub use registry::TransferRegistry;
pub use supervisor::TransferSupervisor;
pub use types::{
    IncomingMedia, MediaKind, PublishedArtifact, StatusView, Transfer, TransferId, TransferPhase,
};
pub use worker::{TransferContext, TransferOutcome, TransferWorker};
