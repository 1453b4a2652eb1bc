use chrono::Utc;
use noties_core::{DayPlan, Note};
use rusqlite::{params, OptionalExtension};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::database::LocalDb;
use crate::error::StorageError;

/// Record caches kept in the local database.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheNamespace {
    Notes,
    DayPlans,
}

impl CacheNamespace {
    fn table(self) -> &'static str {
        match self {
            CacheNamespace::Notes => "note_cache",
            CacheNamespace::DayPlans => "dayplan_cache",
        }
    }
}

/// A record that can be cached; upserts are keyed by `cache_key`.
pub trait CacheRecord: Serialize + DeserializeOwned {
    fn cache_key(&self) -> &str;
}

impl CacheRecord for Note {
    fn cache_key(&self) -> &str {
        &self.id
    }
}

impl CacheRecord for DayPlan {
    fn cache_key(&self) -> &str {
        &self.id
    }
}

/// Durable read cache, partitioned by namespace and scope.
#[derive(Clone)]
pub struct LocalCache {
    db: LocalDb,
}

impl LocalCache {
    pub fn new(db: LocalDb) -> Self {
        Self { db }
    }

    pub fn get<T: CacheRecord>(
        &self,
        namespace: CacheNamespace,
        scope: &str,
        key: &str,
    ) -> Result<Option<T>, StorageError> {
        let body: Option<String> = self.db.with_conn(|conn| {
            let sql = format!(
                "SELECT body FROM {} WHERE scope = ?1 AND key = ?2",
                namespace.table()
            );
            Ok(conn
                .query_row(&sql, params![scope, key], |row| row.get(0))
                .optional()?)
        })?;
        match body {
            Some(body) => Ok(Some(serde_json::from_str(&body)?)),
            None => Ok(None),
        }
    }

    /// Insert or update a record by its key
    pub fn put<T: CacheRecord>(
        &self,
        namespace: CacheNamespace,
        scope: &str,
        record: &T,
    ) -> Result<(), StorageError> {
        let body = serde_json::to_string(record)?;
        self.db.with_conn(|conn| {
            let sql = format!(
                "INSERT INTO {} (scope, key, body, cached_at) VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(scope, key) DO UPDATE SET
                    body = excluded.body,
                    cached_at = excluded.cached_at",
                namespace.table()
            );
            conn.execute(
                &sql,
                params![scope, record.cache_key(), body, Utc::now().to_rfc3339()],
            )?;
            Ok(())
        })
    }

    /// All records of a scope, ordered by key
    pub fn get_all<T: CacheRecord>(
        &self,
        namespace: CacheNamespace,
        scope: &str,
    ) -> Result<Vec<T>, StorageError> {
        let bodies: Vec<String> = self.db.with_conn(|conn| {
            let sql = format!(
                "SELECT body FROM {} WHERE scope = ?1 ORDER BY key",
                namespace.table()
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params![scope], |row| row.get(0))?;
            Ok(rows.collect::<rusqlite::Result<Vec<String>>>()?)
        })?;
        let mut records = Vec::with_capacity(bodies.len());
        for body in bodies {
            match serde_json::from_str(&body) {
                Ok(record) => records.push(record),
                Err(e) => tracing::warn!(
                    namespace = ?namespace,
                    scope,
                    "skipping unreadable cached record: {e}"
                ),
            }
        }
        Ok(records)
    }

    /// Returns whether a record was removed
    pub fn delete(
        &self,
        namespace: CacheNamespace,
        scope: &str,
        key: &str,
    ) -> Result<bool, StorageError> {
        self.db.with_conn(|conn| {
            let sql = format!(
                "DELETE FROM {} WHERE scope = ?1 AND key = ?2",
                namespace.table()
            );
            Ok(conn.execute(&sql, params![scope, key])? > 0)
        })
    }

    /// Replace every record of a scope in one transaction
    pub fn replace_all<T: CacheRecord>(
        &self,
        namespace: CacheNamespace,
        scope: &str,
        records: &[T],
    ) -> Result<(), StorageError> {
        let encoded = records
            .iter()
            .map(|r| -> Result<(String, String), StorageError> {
                Ok((r.cache_key().to_string(), serde_json::to_string(r)?))
            })
            .collect::<Result<Vec<_>, _>>()?;
        let now = Utc::now().to_rfc3339();
        self.db.with_conn(|conn| {
            let tx = conn.unchecked_transaction()?;
            tx.execute(
                &format!("DELETE FROM {} WHERE scope = ?1", namespace.table()),
                params![scope],
            )?;
            {
                let mut stmt = tx.prepare(&format!(
                    "INSERT INTO {} (scope, key, body, cached_at) VALUES (?1, ?2, ?3, ?4)",
                    namespace.table()
                ))?;
                for (key, body) in &encoded {
                    stmt.execute(params![scope, key, body, now])?;
                }
            }
            tx.commit()?;
            Ok(())
        })
    }

    pub fn count(&self, namespace: CacheNamespace, scope: &str) -> Result<usize, StorageError> {
        self.db.with_conn(|conn| {
            let sql = format!("SELECT COUNT(*) FROM {} WHERE scope = ?1", namespace.table());
            let count: i64 = conn.query_row(&sql, params![scope], |row| row.get(0))?;
            Ok(count as usize)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use noties_core::Block;

    fn cache() -> LocalCache {
        LocalCache::new(LocalDb::open_in_memory().unwrap())
    }

    #[test]
    fn test_put_is_upsert() {
        let cache = cache();
        let mut note = Note::new("n1", "first", vec![Block::text("a")]);
        cache.put(CacheNamespace::Notes, "1234", &note).unwrap();
        note.title = "second".into();
        cache.put(CacheNamespace::Notes, "1234", &note).unwrap();

        let loaded: Note = cache.get(CacheNamespace::Notes, "1234", "n1").unwrap().unwrap();
        assert_eq!(loaded, note);
        assert_eq!(cache.count(CacheNamespace::Notes, "1234").unwrap(), 1);
    }

    #[test]
    fn test_scopes_and_namespaces_are_isolated() {
        let cache = cache();
        cache
            .put(CacheNamespace::Notes, "a", &Note::new("n1", "t", vec![]))
            .unwrap();
        cache
            .put(CacheNamespace::DayPlans, "a", &DayPlan::empty("2024-05-01"))
            .unwrap();

        assert!(cache
            .get::<Note>(CacheNamespace::Notes, "b", "n1")
            .unwrap()
            .is_none());
        assert_eq!(cache.get_all::<Note>(CacheNamespace::Notes, "a").unwrap().len(), 1);
        assert_eq!(
            cache.get_all::<DayPlan>(CacheNamespace::DayPlans, "a").unwrap()[0].id,
            "2024-05-01"
        );
    }

    #[test]
    fn test_delete_and_replace_all() {
        let cache = cache();
        for id in ["a", "b", "c"] {
            cache
                .put(CacheNamespace::Notes, "s", &Note::new(id, id, vec![]))
                .unwrap();
        }
        assert!(cache.delete(CacheNamespace::Notes, "s", "b").unwrap());
        assert!(!cache.delete(CacheNamespace::Notes, "s", "b").unwrap());

        cache
            .replace_all(CacheNamespace::Notes, "s", &[Note::new("z", "z", vec![])])
            .unwrap();
        let ids: Vec<String> = cache
            .get_all::<Note>(CacheNamespace::Notes, "s")
            .unwrap()
            .into_iter()
            .map(|n| n.id)
            .collect();
        assert_eq!(ids, vec!["z"]);
    }
}
