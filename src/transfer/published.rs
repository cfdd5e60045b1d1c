//! Cache of published views, keyed by status message.
//!
//! Lets the delete flow restore the exact published rendering after the operator
//! backs out of a delete confirmation.

use super::types::{PublishedArtifact, TransferId};
use moka::future::Cache;
use std::time::Duration;

/// Published artifacts indexed by the status message that shows them
#[derive(Clone)]
pub struct PublishedViews {
    cache: Cache<TransferId, PublishedArtifact>,
}

impl PublishedViews {
    /// Creates a cache keeping entries for `ttl_secs`, bounded by `max_capacity`
    #[must_use]
    pub fn new(ttl_secs: u64, max_capacity: u64) -> Self {
        let cache = Cache::builder()
            .max_capacity(max_capacity)
            .time_to_live(Duration::from_secs(ttl_secs))
            .build();
        Self { cache }
    }

    /// Remember the artifact shown by `id`
    pub async fn insert(&self, id: TransferId, artifact: PublishedArtifact) {
        self.cache.insert(id, artifact).await;
    }

    /// Artifact shown by `id`, if still cached
    pub async fn get(&self, id: &TransferId) -> Option<PublishedArtifact> {
        self.cache.get(id).await
    }

    /// Forget `id`, e.g. after the object was deleted
    pub async fn invalidate(&self, id: &TransferId) {
        self.cache.invalidate(id).await;
    }
}
