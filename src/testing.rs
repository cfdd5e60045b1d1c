//! Testing helpers and in-memory fakes.
//!
//! Provides an object store and a messaging gateway that run without network
//! access, for unit tests and the integration suite.

use crate::storage::{put_multipart, MultipartApi, ObjectStore, StorageError, UploadedPart};
use crate::transfer::{
    IncomingMedia, MediaKind, PayloadStream, StatusView, TransferError, TransferGateway, TransferId,
    TransferRegistry,
};
use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::{self, StreamExt};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio_util::sync::CancellationToken;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A document with the given name and declared size.
#[must_use]
pub fn media(file_name: &str, size: u64) -> IncomingMedia {
    IncomingMedia {
        kind: MediaKind::Document,
        file_id: format!("file-{file_name}"),
        size,
        file_name: Some(file_name.to_string()),
        mime_type: Some("application/octet-stream".to_string()),
    }
}

/// Object store keeping objects in memory.
#[derive(Default)]
pub struct MemoryStore {
    objects: Mutex<BTreeMap<String, Vec<u8>>>,
    pending: Mutex<BTreeMap<String, (String, Vec<u8>)>>,
    part_size: Option<usize>,
    put_calls: AtomicUsize,
    part_calls: AtomicUsize,
    abort_calls: AtomicUsize,
    delete_calls: AtomicUsize,
    fail_puts: Option<String>,
    cancel_on_put: Option<(Arc<TransferRegistry>, TransferId)>,
}

impl MemoryStore {
    /// Every upload fails with `reason`.
    #[must_use]
    pub fn failing_puts(mut self, reason: &str) -> Self {
        self.fail_puts = Some(reason.to_string());
        self
    }

    /// Upload in parts of `part_size` bytes.
    #[must_use]
    pub fn multipart(mut self, part_size: usize) -> Self {
        self.part_size = Some(part_size);
        self
    }

    /// Cancel `id` while the upload is in flight, once the first bytes (the
    /// whole object, or the first part) are stored.
    #[must_use]
    pub fn cancel_on_put(mut self, registry: Arc<TransferRegistry>, id: TransferId) -> Self {
        self.cancel_on_put = Some((registry, id));
        self
    }

    /// Stored keys, sorted
    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        lock(&self.objects).keys().cloned().collect()
    }

    /// Size of `key`, if stored
    #[must_use]
    pub fn object_size(&self, key: &str) -> Option<u64> {
        lock(&self.objects).get(key).map(|data| data.len() as u64)
    }

    /// Number of `put_file` calls
    #[must_use]
    pub fn put_calls(&self) -> usize {
        self.put_calls.load(Ordering::SeqCst)
    }

    /// Number of parts received by multipart uploads
    #[must_use]
    pub fn part_calls(&self) -> usize {
        self.part_calls.load(Ordering::SeqCst)
    }

    /// Number of aborted multipart uploads
    #[must_use]
    pub fn abort_calls(&self) -> usize {
        self.abort_calls.load(Ordering::SeqCst)
    }

    /// Number of `delete_object` calls
    #[must_use]
    pub fn delete_calls(&self) -> usize {
        self.delete_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn put_file(
        &self,
        key: &str,
        path: &Path,
        content_type: Option<String>,
        cancel: &CancellationToken,
    ) -> Result<u64, StorageError> {
        self.put_calls.fetch_add(1, Ordering::SeqCst);
        if cancel.is_cancelled() {
            return Err(StorageError::Cancelled);
        }
        if let Some(reason) = &self.fail_puts {
            return Err(StorageError::S3Put(reason.clone()));
        }
        if let Some(part_size) = self.part_size {
            return put_multipart(self, key, path, content_type, part_size, cancel).await;
        }

        let data = tokio::fs::read(path).await?;
        let size = data.len() as u64;
        lock(&self.objects).insert(key.to_string(), data);

        if let Some((registry, id)) = &self.cancel_on_put {
            registry.cancel(id).await;
        }
        Ok(size)
    }

    async fn delete_object(&self, key: &str) -> Result<(), StorageError> {
        self.delete_calls.fetch_add(1, Ordering::SeqCst);
        lock(&self.objects).remove(key);
        Ok(())
    }

    async fn head_object(&self, key: &str) -> Result<Option<u64>, StorageError> {
        Ok(self.object_size(key))
    }

    async fn list_objects(&self) -> Result<Vec<String>, StorageError> {
        Ok(self.keys())
    }

    async fn check_connection(&self) -> Result<(), String> {
        Ok(())
    }
}

#[async_trait]
impl MultipartApi for MemoryStore {
    async fn create_multipart(
        &self,
        key: &str,
        _content_type: Option<String>,
    ) -> Result<String, StorageError> {
        let mut pending = lock(&self.pending);
        let upload_id = format!("upload-{}", pending.len() + 1);
        pending.insert(upload_id.clone(), (key.to_string(), Vec::new()));
        Ok(upload_id)
    }

    async fn upload_part(
        &self,
        _key: &str,
        upload_id: &str,
        number: i32,
        body: Vec<u8>,
    ) -> Result<UploadedPart, StorageError> {
        let first = self.part_calls.fetch_add(1, Ordering::SeqCst) == 0;
        lock(&self.pending)
            .get_mut(upload_id)
            .ok_or_else(|| StorageError::S3Put(format!("unknown upload {upload_id}")))?
            .1
            .extend_from_slice(&body);

        if first {
            if let Some((registry, id)) = &self.cancel_on_put {
                registry.cancel(id).await;
            }
        }
        Ok(UploadedPart {
            number,
            e_tag: Some(format!("etag-{number}")),
        })
    }

    async fn complete_multipart(
        &self,
        _key: &str,
        upload_id: &str,
        _parts: Vec<UploadedPart>,
    ) -> Result<(), StorageError> {
        let (key, data) = lock(&self.pending)
            .remove(upload_id)
            .ok_or_else(|| StorageError::S3Put(format!("unknown upload {upload_id}")))?;
        lock(&self.objects).insert(key, data);
        Ok(())
    }

    async fn abort_multipart(&self, _key: &str, upload_id: &str) -> Result<(), StorageError> {
        self.abort_calls.fetch_add(1, Ordering::SeqCst);
        lock(&self.pending).remove(upload_id);
        Ok(())
    }
}

/// Gateway serving a scripted payload and recording every status view.
pub struct FakeGateway {
    frames: Vec<Vec<u8>>,
    resolve_error: Option<String>,
    fail_after: Option<(usize, String)>,
    gate: Option<CancellationToken>,
    cancel_at: Option<(Arc<TransferRegistry>, TransferId, u64)>,
    delivered: Arc<AtomicUsize>,
    views: Mutex<Vec<StatusView>>,
}

impl FakeGateway {
    /// Serve `frames` as the payload, one network frame each.
    #[must_use]
    pub fn with_chunks(frames: Vec<Vec<u8>>) -> Self {
        Self {
            frames,
            resolve_error: None,
            fail_after: None,
            gate: None,
            cancel_at: None,
            delivered: Arc::new(AtomicUsize::new(0)),
            views: Mutex::new(Vec::new()),
        }
    }

    /// Fail source resolution with `reason`.
    #[must_use]
    pub fn failing_resolve(mut self, reason: &str) -> Self {
        self.resolve_error = Some(reason.to_string());
        self
    }

    /// Break the connection with `reason` after `frames` frames.
    #[must_use]
    pub fn failing_after(mut self, frames: usize, reason: &str) -> Self {
        self.fail_after = Some((frames, reason.to_string()));
        self
    }

    /// Park resolution until [`FakeGateway::resume`] is called.
    #[must_use]
    pub fn paused(mut self) -> Self {
        self.gate = Some(CancellationToken::new());
        self
    }

    /// Release a paused gateway.
    pub fn resume(&self) {
        if let Some(gate) = &self.gate {
            gate.cancel();
        }
    }

    /// Cancel `id` once a progress update reports at least `bytes` written,
    /// as an operator watching the status message would.
    #[must_use]
    pub fn cancel_after(mut self, registry: Arc<TransferRegistry>, id: TransferId, bytes: u64) -> Self {
        self.cancel_at = Some((registry, id, bytes));
        self
    }

    /// Frames handed to the worker so far
    #[must_use]
    pub fn delivered(&self) -> usize {
        self.delivered.load(Ordering::SeqCst)
    }

    /// Every view shown so far, oldest first
    #[must_use]
    pub fn views(&self) -> Vec<StatusView> {
        lock(&self.views).clone()
    }

    /// The view currently on screen
    #[must_use]
    pub fn last_view(&self) -> Option<StatusView> {
        lock(&self.views).last().cloned()
    }

    /// Byte counts reported by download progress updates
    #[must_use]
    pub fn progress_samples(&self) -> Vec<u64> {
        lock(&self.views)
            .iter()
            .filter_map(|view| match view {
                StatusView::Downloading {
                    progress: Some(p), ..
                } => Some(p.bytes),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl TransferGateway for FakeGateway {
    async fn resolve_download_url(&self, file_id: &str) -> Result<String, TransferError> {
        if let Some(gate) = &self.gate {
            gate.cancelled().await;
        }
        match &self.resolve_error {
            Some(reason) => Err(TransferError::Resolve(reason.clone())),
            None => Ok(format!("https://files.example.com/{file_id}")),
        }
    }

    async fn open_download(&self, _url: &str) -> Result<PayloadStream, TransferError> {
        let delivered = self.delivered.clone();
        let mut frames: Vec<Result<Bytes, TransferError>> = self
            .frames
            .iter()
            .map(|frame| Ok(Bytes::from(frame.clone())))
            .collect();
        if let Some((after, reason)) = &self.fail_after {
            frames.truncate(*after);
            frames.push(Err(TransferError::Transport(reason.clone())));
        }

        Ok(stream::iter(frames)
            .inspect(move |_| {
                delivered.fetch_add(1, Ordering::SeqCst);
            })
            .boxed())
    }

    async fn show_status(&self, view: &StatusView) -> Result<(), TransferError> {
        lock(&self.views).push(view.clone());

        if let (
            Some((registry, id, threshold)),
            StatusView::Downloading {
                progress: Some(p), ..
            },
        ) = (&self.cancel_at, view)
        {
            if p.bytes >= *threshold {
                registry.cancel(id).await;
            }
        }
        Ok(())
    }
}
