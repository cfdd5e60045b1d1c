//! Transfer supervisor
//!
//! Owns the task set of running workers. A transfer is registered before its
//! worker is spawned, so a cancel that races the spawn is never lost.

use super::gateway::TransferGateway;
use super::published::PublishedViews;
use super::registry::TransferRegistry;
use super::types::Transfer;
use super::worker::{TransferContext, TransferOutcome, TransferWorker};
use crate::storage::ObjectStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::task::TaskTracker;
use tracing::{info, warn};

/// Spawns and tracks transfer workers
pub struct TransferSupervisor {
    context: TransferContext,
    tracker: TaskTracker,
}

impl TransferSupervisor {
    /// Create a supervisor sharing `context` with every worker
    #[must_use]
    pub fn new(context: TransferContext) -> Self {
        Self {
            context,
            tracker: TaskTracker::new(),
        }
    }

    /// Register `transfer` and start its worker in the background.
    ///
    /// Returns `None` once [`TransferSupervisor::shutdown`] has started; the
    /// transfer is then neither registered nor run.
    pub async fn spawn(
        &self,
        transfer: Transfer,
        gateway: Arc<dyn TransferGateway>,
    ) -> Option<JoinHandle<TransferOutcome>> {
        if self.tracker.is_closed() {
            warn!(transfer_id = %transfer.id, "Transfer rejected, shutting down");
            return None;
        }
        let token = self.context.registry.register(transfer.id).await;
        info!(transfer_id = %transfer.id, name = %transfer.name, "Transfer queued");

        let worker = TransferWorker::new(transfer, self.context.clone(), gateway, token);
        Some(self.tracker.spawn(worker.run()))
    }

    /// Shared cancellation registry
    #[must_use]
    pub fn registry(&self) -> &Arc<TransferRegistry> {
        &self.context.registry
    }

    /// Cache of published views
    #[must_use]
    pub fn published(&self) -> &PublishedViews {
        &self.context.published
    }

    /// Bucket holding published artifacts
    #[must_use]
    pub fn store(&self) -> &Arc<dyn ObjectStore> {
        &self.context.store
    }

    /// Base of public artifact URLs
    #[must_use]
    pub fn public_base(&self) -> &str {
        &self.context.public_base
    }

    /// Number of workers still running
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.tracker.len()
    }

    /// Cancel everything and wait up to `grace` for workers to clean up.
    ///
    /// Returns `true` if every worker finished in time. Later calls to
    /// [`TransferSupervisor::spawn`] are refused.
    pub async fn shutdown(&self, grace: Duration) -> bool {
        let signalled = self.context.registry.cancel_all().await;
        self.tracker.close();
        info!(
            signalled,
            running = self.tracker.len(),
            "Waiting for transfers to stop"
        );

        if tokio::time::timeout(grace, self.tracker.wait()).await.is_ok() {
            info!("All transfers stopped");
            true
        } else {
            warn!(
                running = self.tracker.len(),
                "Transfers still running after shutdown grace period"
            );
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{media, FakeGateway, MemoryStore};
    use crate::transfer::types::TransferId;

    fn supervisor(store: Arc<MemoryStore>) -> TransferSupervisor {
        TransferSupervisor::new(TransferContext::new(
            store,
            Arc::new(TransferRegistry::new()),
            PublishedViews::new(60, 100),
            "https://cdn.example.com",
        ))
    }

    #[tokio::test]
    async fn transfer_is_registered_before_worker_runs() {
        let dir = tempfile::tempdir().expect("tempdir");
        let supervisor = supervisor(Arc::new(MemoryStore::default()));
        let gateway = Arc::new(FakeGateway::with_chunks(vec![vec![0u8; 8]]).paused());
        let transfer = Transfer::new(TransferId(1), media("a.bin", 8), dir.path(), 0);

        let handle = supervisor
            .spawn(transfer, gateway.clone())
            .await
            .expect("accepting transfers");
        assert!(supervisor.registry().contains(&TransferId(1)).await);

        // Cancel lands while the worker is parked inside resolution.
        assert!(supervisor.registry().cancel(&TransferId(1)).await);
        gateway.resume();

        let outcome = handle.await.ok();
        assert_eq!(outcome, Some(TransferOutcome::Cancelled));
        assert!(!supervisor.registry().contains(&TransferId(1)).await);
    }

    #[tokio::test]
    async fn shutdown_cancels_and_drains_workers() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = Arc::new(MemoryStore::default());
        let supervisor = supervisor(store.clone());

        let mut gateways = Vec::new();
        for id in 1..=3 {
            let gateway = Arc::new(FakeGateway::with_chunks(vec![vec![0u8; 8]]).paused());
            let transfer = Transfer::new(TransferId(id), media("a.bin", 8), dir.path(), 0);
            assert!(supervisor.spawn(transfer, gateway.clone()).await.is_some());
            gateways.push(gateway);
        }
        assert_eq!(supervisor.registry().active_count().await, 3);

        let shutdown = supervisor.shutdown(Duration::from_secs(5));
        for gateway in &gateways {
            gateway.resume();
        }
        assert!(shutdown.await);

        assert_eq!(supervisor.active_count(), 0);
        assert_eq!(supervisor.registry().active_count().await, 0);
        assert!(store.keys().is_empty());
    }

    #[tokio::test]
    async fn spawn_is_refused_after_shutdown() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = Arc::new(MemoryStore::default());
        let supervisor = supervisor(store.clone());
        assert!(supervisor.shutdown(Duration::from_secs(1)).await);

        let gateway = Arc::new(FakeGateway::with_chunks(vec![vec![0u8; 8]]));
        let transfer = Transfer::new(TransferId(9), media("late.bin", 8), dir.path(), 0);

        assert!(supervisor.spawn(transfer, gateway.clone()).await.is_none());
        assert!(!supervisor.registry().contains(&TransferId(9)).await);
        assert_eq!(supervisor.active_count(), 0);
        assert!(gateway.views().is_empty());
        assert_eq!(store.put_calls(), 0);
    }
}
