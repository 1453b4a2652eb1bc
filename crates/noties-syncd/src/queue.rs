use chrono::{DateTime, Utc};
use noties_core::StorePath;
use rusqlite::{params, Row};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::database::LocalDb;
use crate::error::StorageError;

/// The mutation to reissue when a change is replayed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum QueuedOp {
    /// Create the note at the target path, keeping its provisional id
    NoteCreate { fields: Map<String, Value> },
    /// Shallow-merge fields into the note
    NoteUpdate { fields: Map<String, Value> },
    NoteDelete,
    /// Set (or clear, when `None`) the target's time key in a day plan
    SlotSet { value: Option<String> },
}

/// Where a change applies: a document path, plus the time key for slot edits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeTarget {
    pub path: StorePath,
    pub time_key: Option<String>,
}

impl ChangeTarget {
    pub fn document(path: StorePath) -> Self {
        Self {
            path,
            time_key: None,
        }
    }

    pub fn slot(path: StorePath, time: &str) -> Self {
        Self {
            path,
            time_key: Some(time.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PendingChange {
    /// Queue-local id, strictly increasing in enqueue order
    pub id: i64,
    pub target: ChangeTarget,
    pub op: QueuedOp,
    pub timestamp: DateTime<Utc>,
}

/// Durable append-only log of writes that still have to reach the remote store.
///
/// Entries leave the log only through [`PendingQueue::remove`], which the
/// reconciler calls right after an individual replay succeeds.
#[derive(Clone)]
pub struct PendingQueue {
    db: LocalDb,
}

impl PendingQueue {
    pub fn new(db: LocalDb) -> Self {
        Self { db }
    }

    /// Append a change. Targets whose path would not read back are refused.
    pub fn enqueue(
        &self,
        target: ChangeTarget,
        op: QueuedOp,
    ) -> Result<PendingChange, StorageError> {
        target.path.validate()?;
        let payload = serde_json::to_string(&op)?;
        let timestamp = Utc::now();
        let id = self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO pending_changes (path, time_key, payload, timestamp)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    target.path.to_string(),
                    target.time_key,
                    payload,
                    timestamp.to_rfc3339()
                ],
            )?;
            Ok(conn.last_insert_rowid())
        })?;
        tracing::debug!(id, path = %target.path, "queued pending change");
        Ok(PendingChange {
            id,
            target,
            op,
            timestamp,
        })
    }

    /// Every queued change in insertion order.
    ///
    /// This is the drain snapshot: changes enqueued after the call are not
    /// part of it. Rows that cannot be decoded are skipped and left in place.
    pub fn snapshot(&self) -> Result<Vec<PendingChange>, StorageError> {
        let rows: Vec<RawChange> = self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, path, time_key, payload, timestamp FROM pending_changes ORDER BY id",
            )?;
            let rows = stmt.query_map([], RawChange::from_row)?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })?;

        let mut changes = Vec::with_capacity(rows.len());
        for raw in rows {
            let id = raw.id;
            match raw.decode() {
                Ok(change) => changes.push(change),
                Err(e) => tracing::warn!(id, "skipping undecodable pending change: {e}"),
            }
        }
        Ok(changes)
    }

    /// Queued changes whose target lies under `path`, in insertion order.
    pub fn pending_for(&self, path: &StorePath) -> Result<Vec<PendingChange>, StorageError> {
        Ok(self
            .snapshot()?
            .into_iter()
            .filter(|change| path.contains(&change.target.path))
            .collect())
    }

    /// Returns whether an entry was removed
    pub fn remove(&self, id: i64) -> Result<bool, StorageError> {
        self.db.with_conn(|conn| {
            Ok(conn.execute("DELETE FROM pending_changes WHERE id = ?1", params![id])? > 0)
        })
    }

    pub fn len(&self) -> Result<usize, StorageError> {
        self.db.with_conn(|conn| {
            let count: i64 =
                conn.query_row("SELECT COUNT(*) FROM pending_changes", [], |row| row.get(0))?;
            Ok(count as usize)
        })
    }

    pub fn is_empty(&self) -> Result<bool, StorageError> {
        Ok(self.len()? == 0)
    }
}

struct RawChange {
    id: i64,
    path: String,
    time_key: Option<String>,
    payload: String,
    timestamp: String,
}

impl RawChange {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            path: row.get(1)?,
            time_key: row.get(2)?,
            payload: row.get(3)?,
            timestamp: row.get(4)?,
        })
    }

    fn decode(self) -> Result<PendingChange, StorageError> {
        let path: StorePath = self.path.parse()?;
        let op: QueuedOp = serde_json::from_str(&self.payload)?;
        let timestamp = DateTime::parse_from_rfc3339(&self.timestamp)
            .map(|ts| ts.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now());
        Ok(PendingChange {
            id: self.id,
            target: ChangeTarget {
                path,
                time_key: self.time_key,
            },
            op,
            timestamp,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn queue() -> PendingQueue {
        PendingQueue::new(LocalDb::open_in_memory().unwrap())
    }

    fn slot(queue: &PendingQueue, time: &str, value: &str) -> PendingChange {
        queue
            .enqueue(
                ChangeTarget::slot(StorePath::dayplan("s", "2024-05-01"), time),
                QueuedOp::SlotSet {
                    value: Some(value.to_string()),
                },
            )
            .unwrap()
    }

    #[test]
    fn test_snapshot_keeps_insertion_order() {
        let queue = queue();
        let times = ["11:00", "09:00", "10:00", "08:00"];
        for (i, time) in times.iter().enumerate() {
            slot(&queue, time, &format!("v{i}"));
        }
        let drained: Vec<String> = queue
            .snapshot()
            .unwrap()
            .into_iter()
            .map(|c| c.target.time_key.unwrap())
            .collect();
        assert_eq!(drained, times);
    }

    #[test]
    fn test_remove_one_leaves_others_in_order() {
        let queue = queue();
        let a = slot(&queue, "a", "1");
        let b = slot(&queue, "b", "2");
        let c = slot(&queue, "c", "3");
        assert!(a.id < b.id && b.id < c.id);

        assert!(queue.remove(b.id).unwrap());
        let ids: Vec<i64> = queue.snapshot().unwrap().iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![a.id, c.id]);

        // ids are never reused after removal
        let d = slot(&queue, "d", "4");
        assert!(d.id > c.id);
        assert_eq!(queue.len().unwrap(), 3);
    }

    #[test]
    fn test_round_trips_note_ops() {
        let queue = queue();
        let mut fields = Map::new();
        fields.insert("title".into(), Value::String("t".into()));
        let created = queue
            .enqueue(
                ChangeTarget::document(StorePath::note("s", "n1")),
                QueuedOp::NoteCreate { fields },
            )
            .unwrap();
        let stored = queue.snapshot().unwrap();
        assert_eq!(stored, vec![created]);
    }

    #[test]
    fn test_refuses_path_that_would_not_read_back() {
        let queue = queue();
        let err = queue
            .enqueue(
                ChangeTarget::document(StorePath::note("12/34", "n1")),
                QueuedOp::NoteDelete,
            )
            .unwrap_err();
        assert!(matches!(err, StorageError::Path(_)));
        assert_eq!(queue.len().unwrap(), 0);
    }

    #[test]
    fn test_pending_for_filters_by_path() {
        let queue = queue();
        slot(&queue, "09:00", "gym");
        queue
            .enqueue(
                ChangeTarget::document(StorePath::note("s", "n1")),
                QueuedOp::NoteDelete,
            )
            .unwrap();
        queue
            .enqueue(
                ChangeTarget::document(StorePath::note("other", "n2")),
                QueuedOp::NoteDelete,
            )
            .unwrap();

        assert_eq!(queue.pending_for(&StorePath::notes("s")).unwrap().len(), 1);
        assert_eq!(
            queue
                .pending_for(&StorePath::dayplan("s", "2024-05-01"))
                .unwrap()
                .len(),
            1
        );
    }
}
