//! Remote Sync Channel: the seam between the sync layer and the document store.

pub mod memory;
pub mod ws;

use async_trait::async_trait;
use noties_core::StorePath;
use serde_json::{Map, Value};
use tokio::sync::mpsc::UnboundedReceiver;

use crate::error::TransportError;

pub use memory::MemoryRemote;
pub use noties_proto::{Document as RemoteDocument, WriteMode};
pub use ws::WsRemote;

/// Which document a write addresses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DocKey {
    /// Let the store generate an id (create only)
    Auto,
    Id(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct WriteRequest {
    /// Collection path; the document is selected by `key`
    pub collection: StorePath,
    pub key: DocKey,
    pub payload: Map<String, Value>,
    pub mode: WriteMode,
}

impl WriteRequest {
    pub fn create(collection: StorePath, key: DocKey, payload: Map<String, Value>) -> Self {
        Self {
            collection: collection.parent(),
            key,
            payload,
            mode: WriteMode::Create,
        }
    }

    pub fn merge_update(doc: &StorePath, payload: Map<String, Value>) -> Self {
        Self::for_document(doc, payload, WriteMode::MergeUpdate)
    }

    pub fn delete(doc: &StorePath) -> Self {
        Self::for_document(doc, Map::new(), WriteMode::Delete)
    }

    fn for_document(doc: &StorePath, payload: Map<String, Value>, mode: WriteMode) -> Self {
        let key = match doc.doc_id() {
            Some(id) => DocKey::Id(id.to_string()),
            None => DocKey::Auto,
        };
        Self {
            collection: doc.parent(),
            key,
            payload,
            mode,
        }
    }
}

/// Successful write: the id of the document that was written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteAck {
    pub doc_id: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FeedEvent {
    /// Full current set of documents under the subscribed path, unordered
    Snapshot(Vec<RemoteDocument>),
    /// The feed failed and will not deliver anything else
    Error(TransportError),
}

type CancelFn = Box<dyn FnOnce() + Send>;

/// Live feed handle returned by [`RemoteStore::subscribe`].
///
/// Cancelling is idempotent; dropping the handle cancels it too.
pub struct Subscription {
    path: StorePath,
    events: UnboundedReceiver<FeedEvent>,
    cancel: Option<CancelFn>,
}

impl Subscription {
    pub fn new(
        path: StorePath,
        events: UnboundedReceiver<FeedEvent>,
        cancel: impl FnOnce() + Send + 'static,
    ) -> Self {
        Self {
            path,
            events,
            cancel: Some(Box::new(cancel)),
        }
    }

    pub fn path(&self) -> &StorePath {
        &self.path
    }

    /// Next feed event; `None` once the feed is cancelled or closed.
    pub async fn next_event(&mut self) -> Option<FeedEvent> {
        if self.cancel.is_none() {
            return None;
        }
        self.events.recv().await
    }

    pub fn cancel(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
            self.events.close();
        }
    }

    pub fn is_active(&self) -> bool {
        self.cancel.is_some()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("path", &self.path)
            .field("active", &self.is_active())
            .finish()
    }
}

#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Start a live feed of every document under `path`.
    async fn subscribe(&self, path: &StorePath) -> Result<Subscription, TransportError>;

    /// One-shot read of a single document.
    async fn fetch(&self, doc: &StorePath) -> Result<Option<RemoteDocument>, TransportError>;

    async fn write(&self, request: WriteRequest) -> Result<WriteAck, TransportError>;
}
