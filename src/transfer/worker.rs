//! Transfer worker
//!
//! Drives one file through `Downloading -> Uploading -> Published`, or into
//! `Cancelled` / `Failed`. Every exit path removes the staging file and the
//! registry entry, and leaves the status message in a terminal rendering.

use super::error::TransferError;
use super::gateway::TransferGateway;
use super::progress::TransferProgress;
use super::published::PublishedViews;
use super::registry::TransferRegistry;
use super::types::{PublishedArtifact, StatusView, Transfer, TransferPhase};
use crate::config::TRANSFER_CHUNK_SIZE;
use crate::storage::{public_url, ObjectStore};
use crate::utils::short_reason;
use bytes::BytesMut;
use futures_util::StreamExt;
use std::sync::Arc;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Longest failure reason shown in the status message
const FAILURE_REASON_MAX_CHARS: usize = 200;

/// Services shared by every worker of one relay instance
#[derive(Clone)]
pub struct TransferContext {
    /// Bucket receiving published artifacts
    pub store: Arc<dyn ObjectStore>,
    /// Cancellation flags of active transfers
    pub registry: Arc<TransferRegistry>,
    /// Published views for the delete flow
    pub published: PublishedViews,
    /// Base of public artifact URLs
    pub public_base: String,
    /// Download chunk size in bytes
    pub chunk_size: usize,
}

impl TransferContext {
    /// Context with the default 1 MiB chunk size
    #[must_use]
    pub fn new(
        store: Arc<dyn ObjectStore>,
        registry: Arc<TransferRegistry>,
        published: PublishedViews,
        public_base: impl Into<String>,
    ) -> Self {
        Self {
            store,
            registry,
            published,
            public_base: public_base.into(),
            chunk_size: TRANSFER_CHUNK_SIZE,
        }
    }

    /// Override the download chunk size
    #[must_use]
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }
}

/// Terminal result of a transfer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferOutcome {
    /// Artifact is public
    Published(PublishedArtifact),
    /// Operator cancelled
    Cancelled,
    /// Transfer failed; carries a short reason
    Failed(String),
}

impl TransferOutcome {
    const fn phase(&self) -> TransferPhase {
        match self {
            Self::Published(_) => TransferPhase::Published,
            Self::Cancelled => TransferPhase::Cancelled,
            Self::Failed(_) => TransferPhase::Failed,
        }
    }
}

/// State machine for a single transfer
pub struct TransferWorker {
    transfer: Transfer,
    context: TransferContext,
    gateway: Arc<dyn TransferGateway>,
    cancel: CancellationToken,
    phase: TransferPhase,
}

impl TransferWorker {
    /// Create a worker. `cancel` must be the token the registry handed out for
    /// `transfer.id`.
    #[must_use]
    pub fn new(
        transfer: Transfer,
        context: TransferContext,
        gateway: Arc<dyn TransferGateway>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            transfer,
            context,
            gateway,
            cancel,
            phase: TransferPhase::Downloading,
        }
    }

    /// Current phase
    #[must_use]
    pub const fn phase(&self) -> TransferPhase {
        self.phase
    }

    /// Run the transfer to a terminal state.
    pub async fn run(mut self) -> TransferOutcome {
        info!(
            transfer_id = %self.transfer.id,
            name = %self.transfer.name,
            declared_size = self.transfer.declared_size,
            "Transfer started"
        );

        let outcome = match self.execute().await {
            Ok(artifact) => TransferOutcome::Published(artifact),
            Err(e) if e.is_cancelled() => TransferOutcome::Cancelled,
            Err(e) => {
                warn!(transfer_id = %self.transfer.id, error = %e, "Transfer failed");
                TransferOutcome::Failed(short_reason(&e.to_string(), FAILURE_REASON_MAX_CHARS))
            }
        };
        self.enter(outcome.phase());

        self.finish(&outcome).await;
        outcome
    }

    async fn execute(&mut self) -> Result<PublishedArtifact, TransferError> {
        let url = self
            .gateway
            .resolve_download_url(&self.transfer.file_id)
            .await?;

        let downloaded = self.download(&url).await?;
        debug!(transfer_id = %self.transfer.id, bytes = downloaded, "Download complete");

        self.enter(TransferPhase::Uploading);
        let stored = self.upload().await?;

        Ok(PublishedArtifact {
            name: self.transfer.name.clone(),
            size: stored,
            url: public_url(&self.context.public_base, &self.transfer.name),
        })
    }

    async fn download(&self, url: &str) -> Result<u64, TransferError> {
        let chunk_size = self.context.chunk_size;
        let mut stream = self.gateway.open_download(url).await?;
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.transfer.staging_path)
            .await?;

        let mut pending = BytesMut::new();
        let mut written: u64 = 0;

        loop {
            let next = stream.next().await;
            let exhausted = next.is_none();
            if let Some(item) = next {
                let bytes = item?;
                if bytes.is_empty() {
                    continue;
                }
                pending.extend_from_slice(&bytes);
            }

            while pending.len() >= chunk_size || (exhausted && !pending.is_empty()) {
                let chunk = pending.split_to(pending.len().min(chunk_size));

                if self.is_cancelled().await {
                    info!(
                        transfer_id = %self.transfer.id,
                        bytes = written,
                        "Download cancelled"
                    );
                    return Err(TransferError::Cancelled);
                }

                file.write_all(&chunk).await?;
                written += chunk.len() as u64;

                let progress = TransferProgress::compute(
                    written,
                    self.transfer.declared_size,
                    self.transfer.started_at.elapsed(),
                );
                self.report(&StatusView::Downloading {
                    kind: self.transfer.kind,
                    progress: Some(progress),
                })
                .await;
            }

            if exhausted {
                break;
            }
        }

        file.flush().await?;
        Ok(written)
    }

    async fn upload(&self) -> Result<u64, TransferError> {
        if self.is_cancelled().await {
            return Err(TransferError::Cancelled);
        }
        self.report(&StatusView::Uploading).await;

        let stored = self
            .context
            .store
            .put_file(
                &self.transfer.name,
                &self.transfer.staging_path,
                self.transfer.mime_type.clone(),
                &self.cancel,
            )
            .await?;

        // The whole-object call cannot be interrupted; honor a cancel that
        // arrived while it was running.
        if self.is_cancelled().await {
            info!(transfer_id = %self.transfer.id, "Cancelled during upload");
            return Err(TransferError::Cancelled);
        }
        Ok(stored)
    }

    async fn finish(&self, outcome: &TransferOutcome) {
        match outcome {
            TransferOutcome::Published(artifact) => {
                self.context
                    .published
                    .insert(self.transfer.id, artifact.clone())
                    .await;
                self.report(&StatusView::Published(artifact.clone())).await;
                info!(
                    transfer_id = %self.transfer.id,
                    name = %artifact.name,
                    size = artifact.size,
                    elapsed_ms = self.transfer.started_at.elapsed().as_millis(),
                    "Transfer published"
                );
            }
            TransferOutcome::Cancelled => {
                self.discard_remote().await;
                self.report(&StatusView::Cancelled).await;
                info!(transfer_id = %self.transfer.id, "Transfer cancelled");
            }
            TransferOutcome::Failed(reason) => {
                self.discard_remote().await;
                self.report(&StatusView::Failed(reason.clone())).await;
            }
        }

        self.release().await;
    }

    /// Remove the staging file and the registry entry. Safe to call repeatedly.
    pub async fn release(&self) {
        match tokio::fs::remove_file(&self.transfer.staging_path).await {
            Ok(()) => debug!(transfer_id = %self.transfer.id, "Staging file removed"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(
                transfer_id = %self.transfer.id,
                path = %self.transfer.staging_path.display(),
                error = %e,
                "Failed to remove staging file"
            ),
        }
        self.context.registry.remove(&self.transfer.id).await;
    }

    /// Best-effort delete of an artifact that may have been partially created.
    async fn discard_remote(&self) {
        if let Err(e) = self.context.store.delete_object(&self.transfer.name).await {
            warn!(
                transfer_id = %self.transfer.id,
                key = %self.transfer.name,
                error = %e,
                "Failed to delete remote artifact"
            );
        }
    }

    async fn is_cancelled(&self) -> bool {
        self.context.registry.is_cancelled(&self.transfer.id).await
    }

    async fn report(&self, view: &StatusView) {
        if let Err(e) = self.gateway.show_status(view).await {
            debug!(transfer_id = %self.transfer.id, error = %e, "Status update dropped");
        }
    }

    fn enter(&mut self, next: TransferPhase) {
        if self.phase.can_transition_to(next) {
            debug!(
                transfer_id = %self.transfer.id,
                from = ?self.phase,
                to = ?next,
                "Transfer phase changed"
            );
        } else {
            warn!(
                transfer_id = %self.transfer.id,
                from = ?self.phase,
                to = ?next,
                "Unexpected transfer phase change"
            );
        }
        self.phase = next;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{MockObjectStore, StorageError};
    use crate::testing::{media, FakeGateway, MemoryStore};
    use crate::transfer::gateway::MockTransferGateway;
    use crate::transfer::types::TransferId;
    use std::path::Path;

    const MIB: usize = 1024 * 1024;

    async fn run_with(
        store: Arc<dyn ObjectStore>,
        gateway: Arc<dyn TransferGateway>,
        dir: &Path,
        size: u64,
    ) -> (TransferOutcome, Arc<TransferRegistry>, Transfer) {
        let registry = Arc::new(TransferRegistry::new());
        let context = TransferContext::new(
            store,
            registry.clone(),
            PublishedViews::new(60, 100),
            "https://cdn.example.com",
        );
        let transfer = Transfer::new(TransferId(10), media("clip.mp4", size), dir, 0);
        let token = registry.register(transfer.id).await;
        let worker = TransferWorker::new(transfer.clone(), context, gateway, token);
        (worker.run().await, registry, transfer)
    }

    #[tokio::test]
    async fn failed_upload_deletes_remote_exactly_once() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut store = MockObjectStore::new();
        store
            .expect_put_file()
            .returning(|_, _, _, _| Err(StorageError::S3Put("denied".to_string())));
        store
            .expect_delete_object()
            .withf(|key| key == "clip.mp4")
            .times(1)
            .returning(|_| Err(StorageError::S3Delete("gone".to_string())));

        let gateway = Arc::new(FakeGateway::with_chunks(vec![vec![1u8; 10]]));
        let (outcome, registry, transfer) =
            run_with(Arc::new(store), gateway.clone(), dir.path(), 10).await;

        let TransferOutcome::Failed(reason) = outcome else {
            panic!("expected failure, got {outcome:?}");
        };
        assert!(reason.contains("denied"));
        assert!(!registry.contains(&transfer.id).await);
        assert!(!transfer.staging_path.exists());
        assert!(matches!(gateway.last_view(), Some(StatusView::Failed(_))));
    }

    #[tokio::test]
    async fn resolution_failure_never_touches_disk() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut gateway = MockTransferGateway::new();
        gateway
            .expect_resolve_download_url()
            .returning(|_| Err(TransferError::Resolve("file is too big".to_string())));
        gateway.expect_open_download().never();
        gateway
            .expect_show_status()
            .withf(|view| matches!(view, StatusView::Failed(_)))
            .times(1)
            .returning(|_| Ok(()));

        let store = Arc::new(MemoryStore::default());
        let (outcome, registry, transfer) =
            run_with(store.clone(), Arc::new(gateway), dir.path(), 10).await;

        assert!(matches!(outcome, TransferOutcome::Failed(_)));
        assert!(!transfer.staging_path.exists());
        assert!(!registry.is_cancelled(&transfer.id).await);
        assert_eq!(store.delete_calls(), 1);
    }

    #[tokio::test]
    async fn chunks_are_regrouped_to_chunk_size() {
        let dir = tempfile::tempdir().expect("tempdir");
        // Uneven network frames, including an empty one.
        let frames = vec![
            vec![1u8; 700 * 1024],
            Vec::new(),
            vec![2u8; 900 * 1024],
            vec![3u8; MIB],
            vec![4u8; 424 * 1024],
        ];
        let total: usize = frames.iter().map(Vec::len).sum();
        let gateway = Arc::new(FakeGateway::with_chunks(frames));
        let store = Arc::new(MemoryStore::default());

        let (outcome, _, _) = run_with(
            store.clone(),
            gateway.clone(),
            dir.path(),
            total as u64,
        )
        .await;

        let TransferOutcome::Published(artifact) = outcome else {
            panic!("expected publish, got {outcome:?}");
        };
        assert_eq!(artifact.size, total as u64);
        assert_eq!(store.object_size("clip.mp4"), Some(total as u64));

        let samples: Vec<u64> = gateway
            .views()
            .into_iter()
            .filter_map(|view| match view {
                StatusView::Downloading {
                    progress: Some(p), ..
                } => Some(p.bytes),
                _ => None,
            })
            .collect();
        assert_eq!(
            samples,
            vec![MIB as u64, 2 * MIB as u64, total as u64],
            "one update per full chunk plus the remainder"
        );
    }

    #[tokio::test]
    async fn cancel_observed_after_upload_deletes_artifact() {
        let dir = tempfile::tempdir().expect("tempdir");
        let registry = Arc::new(TransferRegistry::new());
        let store = Arc::new(MemoryStore::default().cancel_on_put(registry.clone(), TransferId(10)));
        let context = TransferContext::new(
            store.clone(),
            registry.clone(),
            PublishedViews::new(60, 100),
            "https://cdn.example.com",
        );
        let transfer = Transfer::new(TransferId(10), media("clip.mp4", 4), dir.path(), 0);
        let token = registry.register(transfer.id).await;
        let gateway = Arc::new(FakeGateway::with_chunks(vec![vec![9u8; 4]]));

        let outcome = TransferWorker::new(transfer, context.clone(), gateway.clone(), token)
            .run()
            .await;

        assert_eq!(outcome, TransferOutcome::Cancelled);
        assert_eq!(store.object_size("clip.mp4"), None);
        assert_eq!(gateway.last_view(), Some(StatusView::Cancelled));
        assert!(context.published.get(&TransferId(10)).await.is_none());
    }

    #[tokio::test]
    async fn release_twice_is_harmless() {
        let dir = tempfile::tempdir().expect("tempdir");
        let registry = Arc::new(TransferRegistry::new());
        let context = TransferContext::new(
            Arc::new(MemoryStore::default()),
            registry.clone(),
            PublishedViews::new(60, 100),
            "https://cdn.example.com",
        );
        let transfer = Transfer::new(TransferId(3), media("a.bin", 1), dir.path(), 0);
        tokio::fs::write(&transfer.staging_path, b"x").await.ok();
        let token = registry.register(transfer.id).await;
        let worker = TransferWorker::new(
            transfer.clone(),
            context,
            Arc::new(FakeGateway::with_chunks(Vec::new())),
            token,
        );

        worker.release().await;
        worker.release().await;

        assert!(!transfer.staging_path.exists());
        assert!(!registry.contains(&transfer.id).await);
        assert_eq!(worker.phase(), TransferPhase::Downloading);
    }
}
