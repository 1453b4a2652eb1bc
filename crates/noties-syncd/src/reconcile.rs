use noties_core::models::day_plan::{apply_slot, parse_slots};
use noties_core::DayPlan;
use std::collections::BTreeMap;

use crate::cache::CacheNamespace;
use crate::connectivity::ConnectivityMonitor;
use crate::context::SyncContext;
use crate::error::{SyncError, TransportError};
use crate::queue::{PendingChange, QueuedOp};
use crate::remote::{DocKey, WriteRequest};

/// What one drain did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub replayed: usize,
    pub failed: usize,
    /// Queue length once the drain finished, including entries added meanwhile
    pub remaining: usize,
}

impl ReconcileReport {
    pub fn is_clean(&self) -> bool {
        self.failed == 0 && self.remaining == 0
    }
}

/// Replays the pending-change queue against the remote store.
pub struct Reconciler {
    ctx: SyncContext,
    connectivity: Option<ConnectivityMonitor>,
}

impl Reconciler {
    pub fn new(ctx: SyncContext) -> Self {
        Self {
            ctx,
            connectivity: None,
        }
    }

    /// Skip drains while `monitor` reports offline.
    pub fn with_connectivity(mut self, monitor: ConnectivityMonitor) -> Self {
        self.connectivity = Some(monitor);
        self
    }

    /// Replay every queued change, oldest first.
    ///
    /// The queue is snapshotted up front. Each entry is removed right after
    /// its own replay succeeds; a failed entry stays queued and the drain
    /// moves on to the next one.
    pub async fn drain(&self) -> ReconcileReport {
        if let Some(monitor) = &self.connectivity {
            if !monitor.is_online() {
                tracing::debug!("offline, skipping drain");
                return ReconcileReport::default();
            }
        }

        let changes = match self.ctx.queue.snapshot() {
            Ok(changes) => changes,
            Err(e) => {
                tracing::error!("failed to read pending changes: {e}");
                return ReconcileReport::default();
            }
        };
        if !changes.is_empty() {
            tracing::info!(count = changes.len(), "draining pending changes");
        }

        let mut report = ReconcileReport::default();
        for change in changes {
            match self.replay(&change).await {
                Ok(()) => {
                    report.replayed += 1;
                    if let Err(e) = self.ctx.queue.remove(change.id) {
                        tracing::error!(
                            id = change.id,
                            "replayed change could not be removed: {e}"
                        );
                    }
                }
                Err(e) => {
                    report.failed += 1;
                    tracing::warn!(
                        id = change.id,
                        path = %change.target.path,
                        kind = ?e.kind(),
                        "replay failed, keeping change queued: {e}"
                    );
                }
            }
        }

        report.remaining = self.ctx.queue.len().unwrap_or(report.failed);
        tracing::info!(
            replayed = report.replayed,
            failed = report.failed,
            remaining = report.remaining,
            "drain finished"
        );
        report
    }

    async fn replay(&self, change: &PendingChange) -> Result<(), SyncError> {
        let path = &change.target.path;
        match &change.op {
            QueuedOp::NoteCreate { fields } => {
                let id = path.doc_id().ok_or_else(|| missing_id(change))?;
                let request =
                    WriteRequest::create(path.parent(), DocKey::Id(id.to_string()), fields.clone());
                self.ctx.remote.write(request).await?;
            }
            QueuedOp::NoteUpdate { fields } => {
                self.ctx
                    .remote
                    .write(WriteRequest::merge_update(path, fields.clone()))
                    .await?;
            }
            QueuedOp::NoteDelete => {
                self.ctx.remote.write(WriteRequest::delete(path)).await?;
            }
            QueuedOp::SlotSet { value } => {
                let time = change
                    .target
                    .time_key
                    .as_deref()
                    .ok_or_else(|| missing_id(change))?;
                let date_id = path.doc_id().ok_or_else(|| missing_id(change))?;

                // merge onto what the remote holds now, not what we saw last
                let current = self.ctx.remote.fetch(path).await?;
                let mut slots = match current {
                    Some(doc) => parse_slots(doc.data.get("slots"))?,
                    None => BTreeMap::new(),
                };
                apply_slot(&mut slots, time, value.as_deref());

                let mut plan = DayPlan::empty(date_id);
                plan.slots = slots;
                self.ctx
                    .remote
                    .write(WriteRequest::merge_update(path, plan.slots_fields()))
                    .await?;

                if let Err(e) = self
                    .ctx
                    .cache
                    .put(CacheNamespace::DayPlans, path.scope(), &plan)
                {
                    tracing::warn!(date_id, "failed to cache merged day plan: {e}");
                }
            }
        }
        Ok(())
    }
}

fn missing_id(change: &PendingChange) -> SyncError {
    TransportError::Protocol(format!(
        "queued change {} has an incomplete target {}",
        change.id, change.target.path
    ))
    .into()
}
