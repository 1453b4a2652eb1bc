use async_trait::async_trait;
use chrono::Utc;
use noties_core::StorePath;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tokio::sync::mpsc::{unbounded_channel, UnboundedSender};

use super::{
    DocKey, FeedEvent, RemoteDocument, RemoteStore, Subscription, WriteAck, WriteMode, WriteRequest,
};
use crate::error::TransportError;

struct Subscriber {
    path: StorePath,
    tx: UnboundedSender<FeedEvent>,
}

#[derive(Default)]
struct Inner {
    /// collection path -> doc id -> fields
    collections: BTreeMap<StorePath, BTreeMap<String, Map<String, Value>>>,
    subscribers: HashMap<u64, Subscriber>,
    next_subscriber: u64,
    next_auto_id: u64,
    unreachable: bool,
    writes: Vec<WriteRequest>,
}

impl Inner {
    fn documents_under(&self, path: &StorePath) -> Vec<RemoteDocument> {
        let Some(docs) = self.collections.get(&path.parent()) else {
            return Vec::new();
        };
        docs.iter()
            .filter(|(id, _)| path.doc_id().map_or(true, |wanted| wanted == id.as_str()))
            .map(|(id, data)| RemoteDocument {
                id: id.clone(),
                data: data.clone(),
            })
            .collect()
    }

    /// Push a fresh snapshot to every feed that can see `changed`.
    fn notify(&mut self, changed: &StorePath) {
        let targets: Vec<(u64, StorePath)> = self
            .subscribers
            .iter()
            .filter(|(_, sub)| sub.path.contains(changed))
            .map(|(id, sub)| (*id, sub.path.clone()))
            .collect();
        for (id, path) in targets {
            let snapshot = FeedEvent::Snapshot(self.documents_under(&path));
            let closed = self
                .subscribers
                .get(&id)
                .map_or(true, |sub| sub.tx.send(snapshot).is_err());
            if closed {
                self.subscribers.remove(&id);
            }
        }
    }

    fn fail_feeds(&mut self, error: TransportError) {
        for (_, sub) in self.subscribers.drain() {
            let _ = sub.tx.send(FeedEvent::Error(error.clone()));
        }
    }
}

/// In-process document store.
///
/// Behaves like the remote store the sync layer talks to, with switches to
/// simulate losing the connection. Clones share the same state.
#[derive(Clone, Default)]
pub struct MemoryRemote {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryRemote {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Going unreachable fails every live feed; calls fail until restored.
    pub fn set_reachable(&self, reachable: bool) {
        let mut inner = self.lock();
        inner.unreachable = !reachable;
        if !reachable {
            inner.fail_feeds(TransportError::Unreachable("connection lost".into()));
        }
    }

    pub fn is_reachable(&self) -> bool {
        !self.lock().unreachable
    }

    /// Fail every live feed with `error` without touching reachability.
    pub fn fail_feeds(&self, error: TransportError) {
        self.lock().fail_feeds(error);
    }

    /// Write a document as another client would, bypassing reachability.
    pub fn put_document(&self, doc: &StorePath, data: Map<String, Value>) {
        let Some(id) = doc.doc_id() else {
            return;
        };
        let mut inner = self.lock();
        let mut data = data;
        data.insert("updatedAt".into(), server_timestamp());
        inner
            .collections
            .entry(doc.parent())
            .or_default()
            .insert(id.to_string(), data);
        inner.notify(doc);
    }

    pub fn document(&self, doc: &StorePath) -> Option<Map<String, Value>> {
        let inner = self.lock();
        let id = doc.doc_id()?;
        inner.collections.get(&doc.parent())?.get(id).cloned()
    }

    pub fn documents(&self, path: &StorePath) -> Vec<RemoteDocument> {
        self.lock().documents_under(path)
    }

    /// Every write that reached the store, in arrival order.
    pub fn write_log(&self) -> Vec<WriteRequest> {
        self.lock().writes.clone()
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock().subscribers.len()
    }

    fn check_reachable(inner: &Inner) -> Result<(), TransportError> {
        if inner.unreachable {
            Err(TransportError::Unreachable("remote store offline".into()))
        } else {
            Ok(())
        }
    }
}

fn server_timestamp() -> Value {
    Value::String(Utc::now().to_rfc3339())
}

fn unsubscribe(inner: &Weak<Mutex<Inner>>, id: u64) {
    if let Some(inner) = inner.upgrade() {
        let mut inner = inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        inner.subscribers.remove(&id);
    }
}

#[async_trait]
impl RemoteStore for MemoryRemote {
    async fn subscribe(&self, path: &StorePath) -> Result<Subscription, TransportError> {
        let mut inner = self.lock();
        Self::check_reachable(&inner)?;

        let (tx, rx) = unbounded_channel();
        let _ = tx.send(FeedEvent::Snapshot(inner.documents_under(path)));

        let id = inner.next_subscriber;
        inner.next_subscriber += 1;
        inner.subscribers.insert(
            id,
            Subscriber {
                path: path.clone(),
                tx,
            },
        );

        let weak = Arc::downgrade(&self.inner);
        Ok(Subscription::new(path.clone(), rx, move || {
            unsubscribe(&weak, id)
        }))
    }

    async fn fetch(&self, doc: &StorePath) -> Result<Option<RemoteDocument>, TransportError> {
        let inner = self.lock();
        Self::check_reachable(&inner)?;
        if !doc.is_document() {
            return Err(TransportError::Protocol(format!(
                "fetch needs a document path, got {doc}"
            )));
        }
        Ok(inner.documents_under(doc).into_iter().next())
    }

    async fn write(&self, request: WriteRequest) -> Result<WriteAck, TransportError> {
        let mut inner = self.lock();
        Self::check_reachable(&inner)?;
        inner.writes.push(request.clone());

        let doc_id = match (&request.key, request.mode) {
            (DocKey::Id(id), _) => id.clone(),
            (DocKey::Auto, WriteMode::Create) => {
                inner.next_auto_id += 1;
                format!("doc-{}", inner.next_auto_id)
            }
            (DocKey::Auto, mode) => {
                return Err(TransportError::Protocol(format!(
                    "{mode:?} needs a document id"
                )))
            }
        };

        let collection = inner
            .collections
            .entry(request.collection.clone())
            .or_default();
        match request.mode {
            WriteMode::Create => {
                let mut data = request.payload;
                data.insert("createdAt".into(), server_timestamp());
                data.insert("updatedAt".into(), server_timestamp());
                collection.insert(doc_id.clone(), data);
            }
            WriteMode::MergeUpdate => {
                let existing = collection.entry(doc_id.clone()).or_default();
                for (key, value) in request.payload {
                    existing.insert(key, value);
                }
                existing.insert("updatedAt".into(), server_timestamp());
            }
            WriteMode::Delete => {
                collection.remove(&doc_id);
            }
        }

        inner.notify(&request.collection.with_doc(&doc_id));
        Ok(WriteAck { doc_id })
    }
}
