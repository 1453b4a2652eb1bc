use chrono::Utc;
use noties_core::{ids, sorted_notes, Block, Note, NotePatch, StorePath};
use serde_json::{Map, Value};
use tokio::sync::watch;

use crate::cache::CacheNamespace;
use crate::context::{scope_token, SyncContext};
use crate::error::TransportError;
use crate::outcome::WriteOutcome;
use crate::queue::{ChangeTarget, PendingChange, QueuedOp};
use crate::remote::{DocKey, FeedEvent, RemoteDocument, Subscription, WriteRequest};
use crate::status::{StatusEvent, StatusTracker, SyncStatus};

/// State manager for the notes collection of the current scope.
///
/// Holds the in-memory view of the notes feed. The local cache keeps the
/// durable copy; this view is rebuilt from the feed (or the cache, when the
/// feed fails) on every subscribe.
pub struct NotesStore {
    ctx: SyncContext,
    scope: Option<String>,
    notes: Vec<Note>,
    loading: bool,
    status: StatusTracker,
    subscription: Option<Subscription>,
    feed_failed: bool,
}

impl NotesStore {
    pub fn new(ctx: SyncContext) -> Self {
        Self {
            ctx,
            scope: None,
            notes: Vec::new(),
            loading: false,
            status: StatusTracker::new("notes"),
            subscription: None,
            feed_failed: false,
        }
    }

    pub fn scope(&self) -> Option<&str> {
        self.scope.as_deref()
    }

    pub fn collection(&self) -> Option<StorePath> {
        self.scope.as_deref().map(StorePath::notes)
    }

    /// Switch the session scope. The old feed is torn down and the view
    /// reset before subscribing under the new scope.
    pub async fn set_scope(&mut self, scope: Option<String>) {
        let scope = scope_token(scope);
        if scope == self.scope {
            return;
        }
        tracing::info!(from = ?self.scope, to = ?scope, "notes scope changed");
        self.unsubscribe();
        self.scope = scope;
        self.notes.clear();
        self.feed_failed = false;
        self.status.reset(SyncStatus::Synced);
        if self.scope.is_some() {
            self.subscribe().await;
        }
    }

    /// Start the notes feed for the current scope. Returns whether the feed
    /// is live; without a scope nothing happens.
    pub async fn subscribe(&mut self) -> bool {
        let Some(scope) = self.scope.clone() else {
            return false;
        };
        self.unsubscribe();
        self.loading = true;
        self.feed_failed = false;
        match self.ctx.remote.subscribe(&StorePath::notes(&scope)).await {
            Ok(subscription) => {
                self.subscription = Some(subscription);
                true
            }
            Err(e) => {
                self.feed_error(&scope, e);
                false
            }
        }
    }

    /// Cancel the feed. Safe to call repeatedly or before any subscribe.
    pub fn unsubscribe(&mut self) {
        if let Some(mut subscription) = self.subscription.take() {
            subscription.cancel();
        }
    }

    pub fn is_subscribed(&self) -> bool {
        self.subscription.is_some()
    }

    /// Wait for the next feed event. Pends forever while no feed is live.
    pub async fn next_event(&mut self) -> FeedEvent {
        let event = match self.subscription.as_mut() {
            Some(subscription) => subscription.next_event().await,
            None => None,
        };
        match event {
            Some(event) => event,
            None if self.subscription.take().is_some() => {
                FeedEvent::Error(TransportError::Disconnected)
            }
            None => std::future::pending().await,
        }
    }

    pub fn apply_feed_event(&mut self, event: FeedEvent) {
        let Some(scope) = self.scope.clone() else {
            return;
        };
        match event {
            FeedEvent::Snapshot(documents) => self.apply_snapshot(&scope, documents),
            FeedEvent::Error(e) => self.feed_error(&scope, e),
        }
    }

    fn apply_snapshot(&mut self, scope: &str, documents: Vec<RemoteDocument>) {
        let mut notes = Vec::with_capacity(documents.len());
        for doc in documents {
            match Note::from_document(&doc.id, doc.data) {
                Ok(note) => notes.push(note),
                Err(e) => {
                    // keep the last readable copy so the cache refresh does not purge it
                    tracing::warn!(id = %doc.id, "unreadable note, keeping cached copy: {e}");
                    match self.ctx.cache.get::<Note>(CacheNamespace::Notes, scope, &doc.id) {
                        Ok(Some(cached)) => notes.push(cached),
                        Ok(None) => {}
                        Err(e) => tracing::warn!(id = %doc.id, "note cache unavailable: {e}"),
                    }
                }
            }
        }

        let pending = self.pending(scope);
        for change in &pending {
            overlay(&mut notes, change);
        }

        if let Err(e) = self
            .ctx
            .cache
            .replace_all(CacheNamespace::Notes, scope, &notes)
        {
            tracing::warn!(scope, "failed to refresh note cache: {e}");
        }

        tracing::debug!(scope, count = notes.len(), pending = pending.len(), "notes snapshot");
        self.notes = notes;
        self.loading = false;
        if pending.is_empty() {
            self.status.apply(StatusEvent::SnapshotReceived);
        }
    }

    fn feed_error(&mut self, scope: &str, error: TransportError) {
        tracing::warn!(scope, "notes feed failed, serving cached notes: {error}");
        self.unsubscribe();
        self.feed_failed = true;
        self.loading = false;
        self.notes = match self.ctx.cache.get_all(CacheNamespace::Notes, scope) {
            Ok(notes) => notes,
            Err(e) => {
                tracing::warn!(scope, "note cache unavailable: {e}");
                Vec::new()
            }
        };
        self.status.apply(StatusEvent::FeedFailed);
    }

    fn pending(&self, scope: &str) -> Vec<PendingChange> {
        match self.ctx.queue.pending_for(&StorePath::notes(scope)) {
            Ok(pending) => pending,
            Err(e) => {
                tracing::warn!(scope, "failed to read pending note changes: {e}");
                Vec::new()
            }
        }
    }

    /// Notes in display order: newest first, ties by id.
    pub fn sorted_notes(&self) -> Vec<Note> {
        sorted_notes(&self.notes)
    }

    pub fn notes(&self) -> &[Note] {
        &self.notes
    }

    pub fn get_note(&self, id: &str) -> Option<&Note> {
        self.notes.iter().find(|note| note.id == id)
    }

    pub fn is_loading(&self) -> bool {
        self.loading
    }

    pub fn feed_failed(&self) -> bool {
        self.feed_failed
    }

    pub fn status(&self) -> SyncStatus {
        self.status.get()
    }

    pub fn watch_status(&self) -> watch::Receiver<SyncStatus> {
        self.status.watch()
    }

    pub(crate) fn record(&self, event: StatusEvent) -> SyncStatus {
        self.status.apply(event)
    }

    pub async fn create_note(&mut self, title: &str, blocks: Vec<Block>) -> WriteOutcome {
        let Some(scope) = self.scope.clone() else {
            return WriteOutcome::NoScope;
        };
        let mut note = Note::new("", title, blocks);
        if let Err(e) = note.validate() {
            return WriteOutcome::Rejected(e);
        }

        self.status.apply(StatusEvent::MutationIssued);
        let fields = note.create_fields();
        let now = Utc::now();
        note.created_at = Some(now);
        note.updated_at = Some(now);

        let request = WriteRequest::create(StorePath::notes(&scope), DocKey::Auto, fields.clone());
        match self.ctx.remote.write(request).await {
            Ok(ack) => {
                note.id = ack.doc_id;
                self.store_local(&scope, note.clone());
                self.status.apply(StatusEvent::RemoteAck);
                WriteOutcome::Applied { id: note.id }
            }
            Err(e) => {
                note.id = ids::provisional_note_id();
                tracing::info!(id = %note.id, "note create failed, queued: {e}");
                let change_id = self.ctx.enqueue(
                    ChangeTarget::document(StorePath::note(&scope, &note.id)),
                    QueuedOp::NoteCreate { fields },
                );
                self.store_local(&scope, note.clone());
                self.status.apply(StatusEvent::RemoteError);
                WriteOutcome::Queued {
                    id: note.id,
                    change_id,
                }
            }
        }
    }

    pub async fn update_note(&mut self, id: &str, patch: NotePatch) -> WriteOutcome {
        let Some(scope) = self.scope.clone() else {
            return WriteOutcome::NoScope;
        };
        if let Err(e) = patch.validate() {
            return WriteOutcome::Rejected(e);
        }
        if let Err(e) = StorePath::check_segment(id) {
            return WriteOutcome::Rejected(e.into());
        }

        self.status.apply(StatusEvent::MutationIssued);
        let fields = patch.to_fields();
        let path = StorePath::note(&scope, id);

        let updated = self.get_note(id).cloned().map(|mut note| {
            note.apply_patch(&patch);
            note.updated_at = Some(Utc::now());
            note
        });

        match self
            .ctx
            .remote
            .write(WriteRequest::merge_update(&path, fields.clone()))
            .await
        {
            Ok(_) => {
                if let Some(note) = updated {
                    self.store_local(&scope, note);
                }
                self.status.apply(StatusEvent::RemoteAck);
                WriteOutcome::Applied { id: id.to_string() }
            }
            Err(e) => {
                tracing::info!(id, "note update failed, queued: {e}");
                let change_id = self.ctx.enqueue(
                    ChangeTarget::document(path),
                    QueuedOp::NoteUpdate { fields },
                );
                if let Some(note) = updated {
                    self.store_local(&scope, note);
                }
                self.status.apply(StatusEvent::RemoteError);
                WriteOutcome::Queued {
                    id: id.to_string(),
                    change_id,
                }
            }
        }
    }

    pub async fn delete_note(&mut self, id: &str) -> WriteOutcome {
        let Some(scope) = self.scope.clone() else {
            return WriteOutcome::NoScope;
        };
        if let Err(e) = StorePath::check_segment(id) {
            return WriteOutcome::Rejected(e.into());
        }

        self.status.apply(StatusEvent::MutationIssued);
        let path = StorePath::note(&scope, id);
        let result = self.ctx.remote.write(WriteRequest::delete(&path)).await;

        self.notes.retain(|note| note.id != id);
        if let Err(e) = self.ctx.cache.delete(CacheNamespace::Notes, &scope, id) {
            tracing::warn!(id, "failed to drop cached note: {e}");
        }

        match result {
            Ok(_) => {
                self.status.apply(StatusEvent::RemoteAck);
                WriteOutcome::Applied { id: id.to_string() }
            }
            Err(e) => {
                tracing::info!(id, "note delete failed, queued: {e}");
                let change_id = self
                    .ctx
                    .enqueue(ChangeTarget::document(path), QueuedOp::NoteDelete);
                self.status.apply(StatusEvent::RemoteError);
                WriteOutcome::Queued {
                    id: id.to_string(),
                    change_id,
                }
            }
        }
    }

    /// Upsert into the in-memory view and the cache.
    fn store_local(&mut self, scope: &str, note: Note) {
        if let Err(e) = self.ctx.cache.put(CacheNamespace::Notes, scope, &note) {
            tracing::warn!(id = %note.id, "failed to cache note: {e}");
        }
        match self.notes.iter_mut().find(|n| n.id == note.id) {
            Some(existing) => *existing = note,
            None => self.notes.push(note),
        }
    }

    pub fn shutdown(&mut self) {
        self.unsubscribe();
        self.loading = false;
    }
}

/// Apply one queued change on top of a remote snapshot.
fn overlay(notes: &mut Vec<Note>, change: &PendingChange) {
    let Some(id) = change.target.path.doc_id() else {
        return;
    };
    match &change.op {
        QueuedOp::NoteCreate { fields } => {
            if let Ok(note) = Note::from_document(id, fields.clone()) {
                notes.retain(|n| n.id != id);
                notes.push(note);
            }
        }
        QueuedOp::NoteUpdate { fields } => {
            let position = notes.iter().position(|n| n.id == id);
            let mut body = match position.and_then(|i| serde_json::to_value(&notes[i]).ok()) {
                Some(Value::Object(body)) => body,
                _ => Map::new(),
            };
            for (key, value) in fields {
                body.insert(key.clone(), value.clone());
            }
            if let Ok(note) = Note::from_document(id, body) {
                match position {
                    Some(i) => notes[i] = note,
                    None => notes.push(note),
                }
            }
        }
        QueuedOp::NoteDelete => notes.retain(|n| n.id != id),
        QueuedOp::SlotSet { .. } => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::LocalDb;
    use crate::remote::MemoryRemote;
    use std::sync::Arc;

    fn store(remote: &MemoryRemote) -> NotesStore {
        let db = LocalDb::open_in_memory().unwrap();
        NotesStore::new(SyncContext::new(Arc::new(remote.clone()), db))
    }

    async fn pump(store: &mut NotesStore) {
        let event = store.next_event().await;
        store.apply_feed_event(event);
    }

    #[tokio::test]
    async fn test_no_scope_is_a_no_op() {
        let remote = MemoryRemote::new();
        let mut notes = store(&remote);
        assert_eq!(notes.create_note("t", vec![]).await, WriteOutcome::NoScope);
        assert_eq!(notes.delete_note("x").await, WriteOutcome::NoScope);
        assert!(!notes.subscribe().await);
        assert!(remote.write_log().is_empty());
    }

    #[tokio::test]
    async fn test_unsubscribe_is_idempotent() {
        let remote = MemoryRemote::new();
        let mut notes = store(&remote);
        notes.unsubscribe();
        notes.set_scope(Some("1234".into())).await;
        notes.unsubscribe();
        notes.unsubscribe();
        assert!(!notes.is_subscribed());
        assert_eq!(remote.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_duplicate_block_ids_are_rejected() {
        let remote = MemoryRemote::new();
        let mut notes = store(&remote);
        notes.set_scope(Some("1234".into())).await;
        let block = Block::text("a");
        let outcome = notes.create_note("t", vec![block.clone(), block]).await;
        assert!(matches!(outcome, WriteOutcome::Rejected(_)));
        assert!(remote.write_log().is_empty());
        assert!(notes.ctx.queue.is_empty().unwrap());
    }

    #[tokio::test]
    async fn test_online_create_round_trips_through_feed() {
        let remote = MemoryRemote::new();
        let mut notes = store(&remote);
        notes.set_scope(Some("1234".into())).await;
        pump(&mut notes).await;

        let outcome = notes.create_note("groceries", vec![Block::text("milk")]).await;
        let id = outcome.id().unwrap().to_string();
        assert!(matches!(outcome, WriteOutcome::Applied { .. }));
        assert_eq!(notes.status(), SyncStatus::Synced);

        pump(&mut notes).await;
        let note = notes.get_note(&id).unwrap();
        assert_eq!(note.title, "groceries");
        assert!(note.created_at.is_some());
    }

    #[tokio::test]
    async fn test_pending_update_overlays_snapshot() {
        let remote = MemoryRemote::new();
        let mut notes = store(&remote);
        notes.set_scope(Some("1234".into())).await;
        pump(&mut notes).await;
        let id = notes.create_note("old", vec![]).await.id().unwrap().to_string();
        pump(&mut notes).await;

        remote.set_reachable(false);
        pump(&mut notes).await;
        let outcome = notes.update_note(&id, NotePatch::title("new")).await;
        assert!(outcome.is_queued());
        assert_eq!(notes.status(), SyncStatus::Offline);

        // feed comes back before the drain ran
        remote.set_reachable(true);
        notes.subscribe().await;
        pump(&mut notes).await;
        assert_eq!(notes.get_note(&id).unwrap().title, "new");
        assert_eq!(notes.status(), SyncStatus::Offline);
    }

    #[tokio::test]
    async fn test_feed_error_serves_cache() {
        let remote = MemoryRemote::new();
        let mut notes = store(&remote);
        notes.set_scope(Some("1234".into())).await;
        pump(&mut notes).await;
        notes.create_note("kept", vec![]).await;
        pump(&mut notes).await;

        remote.fail_feeds(TransportError::QuotaExceeded("too many reads".into()));
        pump(&mut notes).await;
        assert!(notes.feed_failed());
        assert_eq!(notes.status(), SyncStatus::Offline);
        assert_eq!(notes.sorted_notes()[0].title, "kept");
    }

    #[tokio::test]
    async fn test_unreadable_note_keeps_cached_copy() {
        let remote = MemoryRemote::new();
        let mut notes = store(&remote);
        notes.set_scope(Some("1234".into())).await;
        pump(&mut notes).await;
        let id = notes.create_note("kept", vec![]).await.id().unwrap().to_string();
        pump(&mut notes).await;

        let Value::Object(data) = serde_json::json!({
            "title": "kept",
            "blocks": [{"type": "video", "id": "b1"}]
        }) else {
            unreachable!()
        };
        remote.put_document(&StorePath::note("1234", &id), data);
        pump(&mut notes).await;

        assert_eq!(notes.get_note(&id).unwrap().title, "kept");
        let cached: Option<Note> = notes
            .ctx
            .cache
            .get(CacheNamespace::Notes, "1234", &id)
            .unwrap();
        assert!(cached.is_some());
    }

    #[tokio::test]
    async fn test_id_with_separator_is_rejected() {
        let remote = MemoryRemote::new();
        let mut notes = store(&remote);
        notes.set_scope(Some("1234".into())).await;
        remote.set_reachable(false);

        assert!(matches!(
            notes.delete_note("a/b").await,
            WriteOutcome::Rejected(_)
        ));
        assert!(matches!(
            notes.update_note("", NotePatch::title("x")).await,
            WriteOutcome::Rejected(_)
        ));
        assert!(notes.ctx.queue.is_empty().unwrap());

        notes.set_scope(Some("12/34".into())).await;
        assert_eq!(notes.scope(), None);
    }
}
