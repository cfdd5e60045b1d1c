//! Transfer registry
//!
//! Maps every in-flight transfer to its cancellation flag. The registry is owned by
//! the service instance and shared by reference with the dispatcher and the workers.

use super::types::TransferId;
use std::collections::HashMap;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Registry of active transfers and their cancellation flags
#[derive(Default)]
pub struct TransferRegistry {
    flags: RwLock<HashMap<TransferId, CancellationToken>>,
}

impl TransferRegistry {
    /// Create a new empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `id` with a fresh, un-cancelled flag, replacing any previous entry.
    ///
    /// Returns a handle observing the same flag, for collaborators that need to
    /// poll it without going through the registry.
    pub async fn register(&self, id: TransferId) -> CancellationToken {
        let token = CancellationToken::new();
        let mut flags = self.flags.write().await;
        if flags.insert(id, token.clone()).is_some() {
            debug!(transfer_id = %id, "Transfer re-registered");
        }
        token
    }

    /// Request cancellation of `id`.
    ///
    /// Returns `true` if the transfer was active; unknown ids are a no-op.
    pub async fn cancel(&self, id: &TransferId) -> bool {
        let flags = self.flags.read().await;
        if let Some(token) = flags.get(id) {
            token.cancel();
            info!(transfer_id = %id, "Cancellation requested");
            true
        } else {
            debug!(transfer_id = %id, "Cancel for unknown transfer ignored");
            false
        }
    }

    /// Current flag for `id`; absent ids read as not cancelled.
    pub async fn is_cancelled(&self, id: &TransferId) -> bool {
        let flags = self.flags.read().await;
        flags.get(id).is_some_and(CancellationToken::is_cancelled)
    }

    /// Remove `id`. Idempotent.
    pub async fn remove(&self, id: &TransferId) {
        let mut flags = self.flags.write().await;
        flags.remove(id);
    }

    /// Request cancellation of every active transfer, returning how many were signalled
    pub async fn cancel_all(&self) -> usize {
        let flags = self.flags.read().await;
        let mut signalled = 0;
        for token in flags.values().filter(|token| !token.is_cancelled()) {
            token.cancel();
            signalled += 1;
        }
        if signalled > 0 {
            info!(count = signalled, "Cancellation requested for all transfers");
        }
        signalled
    }

    /// Check whether `id` is registered
    pub async fn contains(&self, id: &TransferId) -> bool {
        self.flags.read().await.contains_key(id)
    }

    /// Number of registered transfers
    pub async fn active_count(&self) -> usize {
        self.flags.read().await.len()
    }
}
