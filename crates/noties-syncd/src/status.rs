use std::fmt;
use tokio::sync::watch;

/// Sync state of one domain (the notes collection, or an open day plan).
///
/// `Synced` and `Offline` are rest states; `Syncing` always leaves again on
/// the next ack or error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncStatus {
    #[default]
    Synced,
    Syncing,
    Offline,
}

/// Everything that can move a domain's status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusEvent {
    MutationIssued,
    RemoteAck,
    RemoteError,
    SnapshotReceived,
    FeedFailed,
    ConnectivityLost,
    /// Connectivity came back and the domain's queued changes all replayed
    Reconciled,
}

impl SyncStatus {
    pub fn on(self, event: StatusEvent) -> SyncStatus {
        match event {
            StatusEvent::MutationIssued => SyncStatus::Syncing,
            StatusEvent::RemoteAck | StatusEvent::SnapshotReceived => SyncStatus::Synced,
            StatusEvent::RemoteError | StatusEvent::FeedFailed | StatusEvent::ConnectivityLost => {
                SyncStatus::Offline
            }
            StatusEvent::Reconciled => match self {
                SyncStatus::Offline => SyncStatus::Synced,
                other => other,
            },
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            SyncStatus::Synced => "Synced",
            SyncStatus::Syncing => "Syncing...",
            SyncStatus::Offline => "Offline",
        }
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Holds a domain's status and publishes every change to watchers.
pub struct StatusTracker {
    domain: &'static str,
    tx: watch::Sender<SyncStatus>,
}

impl StatusTracker {
    pub fn new(domain: &'static str) -> Self {
        let (tx, _rx) = watch::channel(SyncStatus::Synced);
        Self { domain, tx }
    }

    pub fn get(&self) -> SyncStatus {
        *self.tx.borrow()
    }

    pub fn watch(&self) -> watch::Receiver<SyncStatus> {
        self.tx.subscribe()
    }

    /// Apply an event; returns the resulting status.
    pub fn apply(&self, event: StatusEvent) -> SyncStatus {
        let before = self.get();
        let after = before.on(event);
        if after != before {
            tracing::debug!(domain = self.domain, ?event, "{before} -> {after}");
            self.tx.send_replace(after);
        }
        after
    }

    /// Force a status, used when a domain is reset.
    pub fn reset(&self, status: SyncStatus) {
        self.tx.send_replace(status);
    }
}

impl fmt::Debug for StatusTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StatusTracker")
            .field("domain", &self.domain)
            .field("status", &self.get())
            .finish()
    }
}
