use noties_core::{Block, StorePath};
use noties_syncd::{
    connectivity, ConnectivityHandle, EngineEvent, LocalDb, MemoryRemote, SyncContext, SyncEngine,
    SyncStatus, WriteOutcome,
};
use serde_json::{json, Map, Value};
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

const SCOPE: &str = "1234";
const DAY: &str = "2024-05-01";

struct Harness {
    _dir: TempDir,
    remote: MemoryRemote,
    handle: ConnectivityHandle,
    engine: SyncEngine,
}

fn engine_at(db_path: &Path, remote: &MemoryRemote) -> (ConnectivityHandle, SyncEngine) {
    let db = LocalDb::open(db_path).expect("open db");
    let (handle, monitor) = connectivity(true);
    let engine = SyncEngine::new(SyncContext::new(Arc::new(remote.clone()), db), monitor);
    (handle, engine)
}

async fn setup() -> Harness {
    let dir = tempfile::tempdir().expect("create temp dir");
    let remote = MemoryRemote::new();
    let (handle, mut engine) = engine_at(&dir.path().join("noties.db"), &remote);
    engine
        .handle(EngineEvent::ScopeChanged(Some(SCOPE.to_string())))
        .await;
    // initial notes snapshot
    engine.pump().await;
    Harness {
        _dir: dir,
        remote,
        handle,
        engine,
    }
}

impl Harness {
    async fn go_offline(&mut self) {
        self.remote.set_reachable(false);
        self.handle.set_online(false);
        self.engine.handle(EngineEvent::Offline).await;

        // consume everything up to each feed's error
        while self.engine.notes().is_subscribed() {
            let event = self.engine.notes_mut().next_event().await;
            self.engine.notes_mut().apply_feed_event(event);
        }
        while self.engine.planner().is_subscribed() {
            let event = self.engine.planner_mut().next_event().await;
            self.engine.planner_mut().apply_feed_event(event);
        }
    }

    async fn go_online(&mut self) -> noties_syncd::ReconcileReport {
        self.remote.set_reachable(true);
        self.handle.set_online(true);
        self.engine
            .handle(EngineEvent::Online)
            .await
            .expect("online triggers a drain")
    }
}

fn object(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => panic!("expected object"),
    }
}

#[tokio::test]
async fn test_offline_create_is_queued_once_and_drained() {
    let mut h = setup().await;
    let mut status = h.engine.notes().watch_status();
    h.go_offline().await;
    assert_eq!(*status.borrow_and_update(), SyncStatus::Offline);

    let outcome = h
        .engine
        .notes_mut()
        .create_note("written offline", vec![Block::text("body")])
        .await;
    let WriteOutcome::Queued { id, change_id } = outcome else {
        panic!("expected queued outcome, got {outcome:?}");
    };
    assert!(change_id.is_some());
    assert_eq!(h.engine.notes().status(), SyncStatus::Offline);
    assert_eq!(h.engine.notes().get_note(&id).unwrap().title, "written offline");

    let report = h.go_online().await;
    assert_eq!(report.replayed, 1);
    assert_eq!(report.remaining, 0);
    assert_eq!(h.engine.notes().status(), SyncStatus::Synced);

    // replay keeps the provisional id, and nothing was written twice
    let doc = h.remote.document(&StorePath::note(SCOPE, &id)).unwrap();
    assert_eq!(doc["title"], json!("written offline"));
    assert_eq!(h.remote.write_log().len(), 1);

    // the failed feed came back
    assert!(h.engine.notes().is_subscribed());
    let event = h.engine.notes_mut().next_event().await;
    h.engine.notes_mut().apply_feed_event(event);
    assert_eq!(h.engine.notes().notes().len(), 1);
}

#[tokio::test]
async fn test_day_plan_replay_keeps_remote_slots() {
    let mut h = setup().await;
    let plan = StorePath::dayplan(SCOPE, DAY);
    h.remote
        .put_document(&plan, object(json!({"slots": {"9am": "gym"}})));
    h.engine.planner_mut().load_day_plan(DAY).await;
    let event = h.engine.planner_mut().next_event().await;
    h.engine.planner_mut().apply_feed_event(event);
    assert_eq!(h.engine.planner().slot("9am"), Some("gym"));

    h.go_offline().await;
    let outcome = h
        .engine
        .planner_mut()
        .update_slot(DAY, "10am", Some("call"))
        .await;
    assert!(outcome.is_queued());
    assert_eq!(h.engine.planner().status(), SyncStatus::Offline);

    // another device adds a slot while we are offline
    h.remote.put_document(
        &plan,
        object(json!({"slots": {"9am": "gym", "11am": "lunch"}})),
    );

    let report = h.go_online().await;
    assert_eq!(report.replayed, 1);
    assert_eq!(
        h.remote.document(&plan).unwrap()["slots"],
        json!({"9am": "gym", "10am": "call", "11am": "lunch"})
    );
    assert_eq!(h.engine.planner().status(), SyncStatus::Synced);

    let event = h.engine.planner_mut().next_event().await;
    h.engine.planner_mut().apply_feed_event(event);
    assert_eq!(h.engine.planner().slot("11am"), Some("lunch"));
    assert_eq!(h.engine.planner().slot("10am"), Some("call"));
}

#[tokio::test]
async fn test_failed_replay_keeps_domain_offline() {
    let mut h = setup().await;
    let plan = StorePath::dayplan(SCOPE, DAY);
    h.engine.planner_mut().load_day_plan(DAY).await;
    h.go_offline().await;
    h.engine
        .planner_mut()
        .update_slot(DAY, "10am", Some("call"))
        .await;

    // remote document the merge cannot read
    h.remote
        .put_document(&plan, object(json!({"slots": {"9am": 7}})));

    let report = h.go_online().await;
    assert_eq!(report.failed, 1);
    assert_eq!(report.remaining, 1);
    assert_eq!(h.engine.planner().status(), SyncStatus::Offline);
    assert_eq!(h.engine.notes().status(), SyncStatus::Synced);
}

#[tokio::test]
async fn test_queue_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("noties.db");
    let remote = MemoryRemote::new();

    {
        let (_handle, mut engine) = engine_at(&db_path, &remote);
        engine
            .handle(EngineEvent::ScopeChanged(Some(SCOPE.into())))
            .await;
        remote.set_reachable(false);
        let outcome = engine.notes_mut().delete_note("n1").await;
        assert!(outcome.is_queued());
        engine.shutdown();
    }

    remote.set_reachable(true);
    let (_handle, mut engine) = engine_at(&db_path, &remote);
    engine
        .handle(EngineEvent::ScopeChanged(Some(SCOPE.into())))
        .await;
    let report = engine.handle(EngineEvent::Online).await.unwrap();
    assert_eq!(report.replayed, 1);
    assert_eq!(report.remaining, 0);
}

#[tokio::test]
async fn test_scope_change_tears_down_old_feed() {
    let mut h = setup().await;
    assert_eq!(h.remote.subscriber_count(), 1);

    h.engine
        .handle(EngineEvent::ScopeChanged(Some("5678".into())))
        .await;
    assert_eq!(h.remote.subscriber_count(), 1);
    assert_eq!(h.engine.notes().scope(), Some("5678"));

    h.engine.handle(EngineEvent::ScopeChanged(None)).await;
    assert_eq!(h.remote.subscriber_count(), 0);
    assert_eq!(
        h.engine.notes_mut().create_note("t", vec![]).await,
        WriteOutcome::NoScope
    );
    assert_eq!(
        h.engine.planner_mut().update_slot(DAY, "9am", Some("x")).await,
        WriteOutcome::NoScope
    );
}

#[tokio::test]
async fn test_unsubscribe_twice_and_before_subscribe() {
    let dir = tempfile::tempdir().unwrap();
    let remote = MemoryRemote::new();
    let (_handle, mut engine) = engine_at(&dir.path().join("noties.db"), &remote);

    engine.notes_mut().unsubscribe();
    engine.planner_mut().unsubscribe();
    engine
        .handle(EngineEvent::ScopeChanged(Some(SCOPE.into())))
        .await;
    engine.notes_mut().unsubscribe();
    engine.notes_mut().unsubscribe();
    engine.shutdown();
    engine.shutdown();
    assert_eq!(remote.subscriber_count(), 0);
}

#[tokio::test]
async fn test_cached_notes_served_when_feed_fails_at_start() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("noties.db");
    let remote = MemoryRemote::new();

    {
        let (_handle, mut engine) = engine_at(&db_path, &remote);
        engine
            .handle(EngineEvent::ScopeChanged(Some(SCOPE.into())))
            .await;
        engine.notes_mut().create_note("cached", vec![]).await;
    }

    remote.set_reachable(false);
    let (_handle, mut engine) = engine_at(&db_path, &remote);
    engine
        .handle(EngineEvent::ScopeChanged(Some(SCOPE.into())))
        .await;
    assert!(engine.notes().feed_failed());
    assert_eq!(engine.notes().sorted_notes()[0].title, "cached");
    assert_eq!(engine.notes().status(), SyncStatus::Offline);
}

#[tokio::test]
async fn test_scope_token_with_separator_is_no_scope() {
    let dir = tempfile::tempdir().unwrap();
    let remote = MemoryRemote::new();
    let db_path = dir.path().join("noties.db");
    let (_handle, mut engine) = engine_at(&db_path, &remote);

    engine
        .handle(EngineEvent::ScopeChanged(Some("12/34".into())))
        .await;
    assert_eq!(engine.notes().scope(), None);
    assert_eq!(engine.planner().scope(), None);
    assert_eq!(remote.subscriber_count(), 0);

    remote.set_reachable(false);
    assert_eq!(
        engine.notes_mut().delete_note("n1").await,
        WriteOutcome::NoScope
    );
    let db = LocalDb::open(&db_path).unwrap();
    assert_eq!(db_queue_len(&db), 0);
}

#[tokio::test]
async fn test_unaddressable_ids_are_rejected_not_queued() {
    let mut h = setup().await;
    h.go_offline().await;

    let outcome = h.engine.notes_mut().delete_note("a/b").await;
    assert!(matches!(outcome, WriteOutcome::Rejected(_)));
    let outcome = h
        .engine
        .planner_mut()
        .update_slot("2024/05/01", "9am", Some("gym"))
        .await;
    assert!(matches!(outcome, WriteOutcome::Rejected(_)));
    assert!(!h.engine.planner_mut().load_day_plan("2024/05/01").await);
    assert_eq!(h.engine.planner().date_id(), None);

    let report = h.go_online().await;
    assert_eq!(report, noties_syncd::ReconcileReport::default());
}

fn db_queue_len(db: &LocalDb) -> usize {
    noties_syncd::PendingQueue::new(db.clone()).len().unwrap()
}
