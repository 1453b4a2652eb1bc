//! Offline-first sync layer for noties.
//!
//! Keeps the local cache, the pending-change queue and the remote document
//! store consistent while connectivity comes and goes.

pub mod cache;
pub mod config;
pub mod connectivity;
pub mod context;
pub mod database;
pub mod engine;
pub mod error;
pub mod notes;
pub mod outcome;
pub mod planner;
pub mod queue;
pub mod reconcile;
pub mod remote;
pub mod status;

pub use cache::{CacheNamespace, CacheRecord, LocalCache};
pub use connectivity::{connectivity, ConnectivityHandle, ConnectivityMonitor};
pub use context::SyncContext;
pub use database::LocalDb;
pub use engine::{EngineEvent, SyncEngine};
pub use error::{ErrorKind, StorageError, SyncError, TransportError};
pub use notes::NotesStore;
pub use outcome::WriteOutcome;
pub use planner::PlannerStore;
pub use queue::{ChangeTarget, PendingChange, PendingQueue, QueuedOp};
pub use reconcile::{ReconcileReport, Reconciler};
pub use remote::{MemoryRemote, RemoteStore, Subscription, WsRemote};
pub use status::{StatusEvent, SyncStatus};
