use crate::connectivity::ConnectivityMonitor;
use crate::context::SyncContext;
use crate::notes::NotesStore;
use crate::planner::PlannerStore;
use crate::reconcile::{ReconcileReport, Reconciler};
use crate::status::StatusEvent;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    Online,
    Offline,
    ScopeChanged(Option<String>),
}

/// Owns both domains and routes connectivity and scope events to them.
pub struct SyncEngine {
    ctx: SyncContext,
    notes: NotesStore,
    planner: PlannerStore,
    reconciler: Reconciler,
}

impl SyncEngine {
    pub fn new(ctx: SyncContext, connectivity: ConnectivityMonitor) -> Self {
        Self {
            notes: NotesStore::new(ctx.clone()),
            planner: PlannerStore::new(ctx.clone()),
            reconciler: Reconciler::new(ctx.clone()).with_connectivity(connectivity),
            ctx,
        }
    }

    pub fn notes(&self) -> &NotesStore {
        &self.notes
    }

    pub fn notes_mut(&mut self) -> &mut NotesStore {
        &mut self.notes
    }

    pub fn planner(&self) -> &PlannerStore {
        &self.planner
    }

    pub fn planner_mut(&mut self) -> &mut PlannerStore {
        &mut self.planner
    }

    /// Returns the drain report when the event triggered a drain.
    pub async fn handle(&mut self, event: EngineEvent) -> Option<ReconcileReport> {
        match event {
            EngineEvent::Online => Some(self.reconcile().await),
            EngineEvent::Offline => {
                self.notes.record(StatusEvent::ConnectivityLost);
                self.planner.record(StatusEvent::ConnectivityLost);
                None
            }
            EngineEvent::ScopeChanged(scope) => {
                self.notes.set_scope(scope.clone()).await;
                self.planner.set_scope(scope).await;
                None
            }
        }
    }

    /// Drain the queue, settle each domain's status, then bring failed
    /// feeds back.
    pub async fn reconcile(&mut self) -> ReconcileReport {
        let report = self.reconciler.drain().await;

        if let Some(path) = self.notes.collection() {
            if self.drained(&path) {
                self.notes.record(StatusEvent::Reconciled);
            }
        }
        if let Some(path) = self.planner.document() {
            if self.drained(&path) {
                self.planner.record(StatusEvent::Reconciled);
            }
        }

        if self.notes.feed_failed() {
            self.notes.subscribe().await;
        }
        if self.planner.feed_failed() {
            self.planner.resubscribe().await;
        }
        report
    }

    fn drained(&self, path: &noties_core::StorePath) -> bool {
        match self.ctx.queue.pending_for(path) {
            Ok(pending) => pending.is_empty(),
            Err(e) => {
                tracing::warn!(%path, "failed to read pending changes: {e}");
                false
            }
        }
    }

    /// Wait for the next feed event from either domain and apply it.
    pub async fn pump(&mut self) {
        tokio::select! {
            event = self.notes.next_event() => self.notes.apply_feed_event(event),
            event = self.planner.next_event() => self.planner.apply_feed_event(event),
        }
    }

    pub fn shutdown(&mut self) {
        self.notes.shutdown();
        self.planner.shutdown();
    }
}
