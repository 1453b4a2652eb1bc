use anyhow::Result;
use noties_core::StorePath;
use std::path::Path;
use std::sync::Arc;

use crate::cache::LocalCache;
use crate::database::LocalDb;
use crate::queue::{ChangeTarget, PendingQueue, QueuedOp};
use crate::remote::RemoteStore;

/// The remote channel plus the local storage every domain shares.
#[derive(Clone)]
pub struct SyncContext {
    pub remote: Arc<dyn RemoteStore>,
    pub cache: LocalCache,
    pub queue: PendingQueue,
}

impl SyncContext {
    pub fn new(remote: Arc<dyn RemoteStore>, db: LocalDb) -> Self {
        Self {
            remote,
            cache: LocalCache::new(db.clone()),
            queue: PendingQueue::new(db),
        }
    }

    pub fn open(remote: Arc<dyn RemoteStore>, db_path: &Path) -> Result<Self> {
        Ok(Self::new(remote, LocalDb::open(db_path)?))
    }

    /// Queue a change for replay. Storage failures are logged, not returned.
    pub(crate) fn enqueue(&self, target: ChangeTarget, op: QueuedOp) -> Option<i64> {
        match self.queue.enqueue(target, op) {
            Ok(change) => Some(change.id),
            Err(e) => {
                tracing::error!("failed to queue change, it will not be replayed: {e}");
                None
            }
        }
    }
}

/// A usable scope token, or `None`. Tokens that cannot form a store path
/// count as no scope.
pub(crate) fn scope_token(scope: Option<String>) -> Option<String> {
    let scope = scope.filter(|s| !s.trim().is_empty())?;
    if StorePath::is_segment(&scope) {
        Some(scope)
    } else {
        tracing::warn!(%scope, "ignoring scope token that is not a valid path segment");
        None
    }
}
