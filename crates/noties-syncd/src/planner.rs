use noties_core::{DayPlan, StorePath};
use tokio::sync::watch;

use crate::cache::CacheNamespace;
use crate::context::{scope_token, SyncContext};
use crate::error::TransportError;
use crate::outcome::WriteOutcome;
use crate::queue::{ChangeTarget, QueuedOp};
use crate::remote::{FeedEvent, RemoteDocument, Subscription, WriteRequest};
use crate::status::{StatusEvent, StatusTracker, SyncStatus};

/// State manager for the day plan currently open in the planner.
///
/// Only one date is live at a time; loading another date tears down the
/// previous feed first.
pub struct PlannerStore {
    ctx: SyncContext,
    scope: Option<String>,
    date_id: Option<String>,
    plan: Option<DayPlan>,
    loading: bool,
    status: StatusTracker,
    subscription: Option<Subscription>,
    feed_failed: bool,
    /// The remote copy of the open plan could not be read. Whole-map writes
    /// are held back until a readable snapshot arrives.
    remote_unreadable: bool,
}

impl PlannerStore {
    pub fn new(ctx: SyncContext) -> Self {
        Self {
            ctx,
            scope: None,
            date_id: None,
            plan: None,
            loading: false,
            status: StatusTracker::new("planner"),
            subscription: None,
            feed_failed: false,
            remote_unreadable: false,
        }
    }

    pub fn scope(&self) -> Option<&str> {
        self.scope.as_deref()
    }

    pub fn date_id(&self) -> Option<&str> {
        self.date_id.as_deref()
    }

    /// Path of the open day plan, if any.
    pub fn document(&self) -> Option<StorePath> {
        match (&self.scope, &self.date_id) {
            (Some(scope), Some(date_id)) => Some(StorePath::dayplan(scope, date_id)),
            _ => None,
        }
    }

    /// Switch the session scope; the open date (if any) is reloaded under it.
    pub async fn set_scope(&mut self, scope: Option<String>) {
        let scope = scope_token(scope);
        if scope == self.scope {
            return;
        }
        self.unsubscribe();
        self.scope = scope;
        self.plan = None;
        self.feed_failed = false;
        self.remote_unreadable = false;
        self.status.reset(SyncStatus::Synced);
        if let Some(date_id) = self.date_id.clone() {
            self.load_day_plan(&date_id).await;
        }
    }

    /// Open the plan for `date_id` (`YYYY-MM-DD`) and start its feed.
    ///
    /// The cached plan is shown until the first snapshot arrives. Returns
    /// whether the feed is live.
    pub async fn load_day_plan(&mut self, date_id: &str) -> bool {
        self.unsubscribe();
        if let Err(e) = StorePath::check_segment(date_id) {
            tracing::warn!("not loading day plan: {e}");
            self.date_id = None;
            self.plan = None;
            return false;
        }
        self.date_id = Some(date_id.to_string());
        let Some(scope) = self.scope.clone() else {
            self.plan = None;
            return false;
        };

        self.loading = true;
        self.feed_failed = false;
        self.remote_unreadable = false;
        self.plan = self.cached(&scope, date_id);

        let path = StorePath::dayplan(&scope, date_id);
        match self.ctx.remote.subscribe(&path).await {
            Ok(subscription) => {
                tracing::debug!(%path, "day plan feed started");
                self.subscription = Some(subscription);
                true
            }
            Err(e) => {
                self.feed_error(&scope, date_id, e);
                false
            }
        }
    }

    pub async fn resubscribe(&mut self) -> bool {
        match self.date_id.clone() {
            Some(date_id) => self.load_day_plan(&date_id).await,
            None => false,
        }
    }

    pub fn unsubscribe(&mut self) {
        if let Some(mut subscription) = self.subscription.take() {
            subscription.cancel();
        }
    }

    pub fn is_subscribed(&self) -> bool {
        self.subscription.is_some()
    }

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
        let (Some(scope), Some(date_id)) = (self.scope.clone(), self.date_id.clone()) else {
            return;
        };
        match event {
            FeedEvent::Snapshot(documents) => self.apply_snapshot(&scope, &date_id, documents),
            FeedEvent::Error(e) => self.feed_error(&scope, &date_id, e),
        }
    }

    fn apply_snapshot(&mut self, scope: &str, date_id: &str, documents: Vec<RemoteDocument>) {
        let mut plan = match documents.into_iter().find(|doc| doc.id == date_id) {
            None => DayPlan::empty(date_id),
            Some(doc) => match DayPlan::from_document(&doc.id, doc.data) {
                Ok(plan) => plan,
                Err(e) => {
                    // keep the local copy; never cache or write back a plan we could not read
                    tracing::warn!(date_id, "unreadable day plan, keeping local copy: {e}");
                    self.remote_unreadable = true;
                    self.loading = false;
                    if self.plan.is_none() {
                        self.plan = Some(
                            self.cached(scope, date_id)
                                .unwrap_or_else(|| DayPlan::empty(date_id)),
                        );
                    }
                    return;
                }
            },
        };
        self.remote_unreadable = false;

        let path = StorePath::dayplan(scope, date_id);
        let pending = match self.ctx.queue.pending_for(&path) {
            Ok(pending) => pending,
            Err(e) => {
                tracing::warn!(%path, "failed to read pending slot changes: {e}");
                Vec::new()
            }
        };
        for change in &pending {
            if let (Some(time), QueuedOp::SlotSet { value }) = (&change.target.time_key, &change.op)
            {
                plan.set_slot(time, value.as_deref());
            }
        }

        self.cache(scope, &plan);
        self.plan = Some(plan);
        self.loading = false;
        if pending.is_empty() {
            self.status.apply(StatusEvent::SnapshotReceived);
        }
    }

    fn feed_error(&mut self, scope: &str, date_id: &str, error: TransportError) {
        tracing::warn!(date_id, "day plan feed failed, serving cached plan: {error}");
        self.unsubscribe();
        self.feed_failed = true;
        self.loading = false;
        self.plan = Some(
            self.cached(scope, date_id)
                .unwrap_or_else(|| DayPlan::empty(date_id)),
        );
        self.status.apply(StatusEvent::FeedFailed);
    }

    fn cached(&self, scope: &str, date_id: &str) -> Option<DayPlan> {
        match self.ctx.cache.get(CacheNamespace::DayPlans, scope, date_id) {
            Ok(plan) => plan,
            Err(e) => {
                tracing::warn!(date_id, "day plan cache unavailable: {e}");
                None
            }
        }
    }

    fn cache(&self, scope: &str, plan: &DayPlan) {
        if let Err(e) = self.ctx.cache.put(CacheNamespace::DayPlans, scope, plan) {
            tracing::warn!(date_id = %plan.id, "failed to cache day plan: {e}");
        }
    }

    pub fn plan(&self) -> Option<&DayPlan> {
        self.plan.as_ref()
    }

    pub fn slot(&self, time: &str) -> Option<&str> {
        self.plan.as_ref().and_then(|plan| plan.slot(time))
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

    /// Set (or clear, with `None` or `""`) one slot of a day plan.
    ///
    /// The local plan changes first. The whole slot map is then written with a
    /// merge-update; if that fails only the single slot edit is queued, so the
    /// replay can merge it into whatever the remote holds by then. While the
    /// open plan's remote copy is unreadable the edit is queued straight away.
    pub async fn update_slot(
        &mut self,
        date_id: &str,
        time: &str,
        value: Option<&str>,
    ) -> WriteOutcome {
        let Some(scope) = self.scope.clone() else {
            return WriteOutcome::NoScope;
        };
        if let Err(e) = StorePath::check_segment(date_id) {
            return WriteOutcome::Rejected(e.into());
        }
        let value = value.filter(|v| !v.is_empty());

        let mut plan = match &self.plan {
            Some(plan) if plan.id == date_id => plan.clone(),
            _ => self
                .cached(&scope, date_id)
                .unwrap_or_else(|| DayPlan::empty(date_id)),
        };
        plan.set_slot(time, value);
        plan.updated_at = Some(chrono::Utc::now());
        self.cache(&scope, &plan);
        if self.date_id.as_deref() == Some(date_id) {
            self.plan = Some(plan.clone());
        }

        self.status.apply(StatusEvent::MutationIssued);
        let path = StorePath::dayplan(&scope, date_id);
        if self.remote_unreadable && self.date_id.as_deref() == Some(date_id) {
            tracing::warn!(date_id, time, "remote day plan unreadable, slot update queued");
            return self.queue_slot(path, time, value);
        }
        match self
            .ctx
            .remote
            .write(WriteRequest::merge_update(&path, plan.slots_fields()))
            .await
        {
            Ok(_) => {
                self.status.apply(StatusEvent::RemoteAck);
                WriteOutcome::Applied {
                    id: date_id.to_string(),
                }
            }
            Err(e) => {
                tracing::info!(date_id, time, "slot update failed, queued: {e}");
                self.queue_slot(path, time, value)
            }
        }
    }

    fn queue_slot(&self, path: StorePath, time: &str, value: Option<&str>) -> WriteOutcome {
        let id = path.doc_id().unwrap_or_default().to_string();
        let change_id = self.ctx.enqueue(
            ChangeTarget::slot(path, time),
            QueuedOp::SlotSet {
                value: value.map(str::to_string),
            },
        );
        self.status.apply(StatusEvent::RemoteError);
        WriteOutcome::Queued { id, change_id }
    }

    pub fn shutdown(&mut self) {
        self.unsubscribe();
        self.loading = false;
    }
}
