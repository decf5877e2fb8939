//! StateStore — redb-backed persistence for autopool.
//!
//! Provides typed operations over pool snapshots and the scaling activity
//! history. The store supports both on-disk and in-memory backends (the
//! latter for testing).

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable};
use tracing::debug;

use autopool_core::{PoolSnapshot, ScalingActivity};

use crate::error::{StateError, StateResult};
use crate::tables::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

/// Thread-safe state store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

/// Key range covering every activity of one pool.
fn activity_bounds(pool: &str) -> (String, String) {
    // ';' sorts immediately after ':'.
    (format!("{pool}:"), format!("{pool};"))
}

impl StateStore {
    /// Open (or create) a persistent state store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory state store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        txn.open_table(POOLS).map_err(map_err!(Table))?;
        txn.open_table(ACTIVITIES).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    // ── Pool snapshots ─────────────────────────────────────────────

    /// Store the latest snapshot of a pool, replacing the previous one.
    pub fn put_snapshot(&self, snapshot: &PoolSnapshot) -> StateResult<()> {
        let value = serde_json::to_vec(snapshot).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(POOLS).map_err(map_err!(Table))?;
            table
                .insert(snapshot.name.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(pool = %snapshot.name, version = snapshot.version, "pool snapshot stored");
        Ok(())
    }

    pub fn get_snapshot(&self, pool: &str) -> StateResult<Option<PoolSnapshot>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(POOLS).map_err(map_err!(Table))?;
        match table.get(pool).map_err(map_err!(Read))? {
            Some(guard) => {
                let snapshot: PoolSnapshot =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(snapshot))
            }
            None => Ok(None),
        }
    }

    pub fn list_snapshots(&self) -> StateResult<Vec<PoolSnapshot>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(POOLS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let snapshot: PoolSnapshot =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            results.push(snapshot);
        }
        Ok(results)
    }

    // ── Activities ─────────────────────────────────────────────────

    /// Append an activity, assigning the next sequence number for its pool.
    /// Returns the stored record.
    pub fn append_activity(&self, activity: &ScalingActivity) -> StateResult<ScalingActivity> {
        let (start, end) = activity_bounds(&activity.pool);
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let stored;
        {
            let mut table = txn.open_table(ACTIVITIES).map_err(map_err!(Table))?;
            let last_seq = {
                let mut range = table
                    .range::<&str>(start.as_str()..end.as_str())
                    .map_err(map_err!(Read))?;
                match range.next_back() {
                    Some(entry) => {
                        let (_, value) = entry.map_err(map_err!(Read))?;
                        let last: ScalingActivity = serde_json::from_slice(value.value())
                            .map_err(map_err!(Deserialize))?;
                        Some(last.seq)
                    }
                    None => None,
                }
            };

            let mut next = activity.clone();
            next.seq = last_seq.map_or(1, |s| s + 1);
            let value = serde_json::to_vec(&next).map_err(map_err!(Serialize))?;
            table
                .insert(next.table_key().as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
            stored = next;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(pool = %stored.pool, seq = stored.seq, cause = %stored.cause, "activity appended");
        Ok(stored)
    }

    /// The most recent `limit` activities of a pool, oldest first.
    pub fn list_activities(&self, pool: &str, limit: usize) -> StateResult<Vec<ScalingActivity>> {
        let (start, end) = activity_bounds(pool);
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(ACTIVITIES).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table
            .range::<&str>(start.as_str()..end.as_str())
            .map_err(map_err!(Read))?
            .rev()
        {
            if results.len() >= limit {
                break;
            }
            let (_, value) = entry.map_err(map_err!(Read))?;
            let activity: ScalingActivity =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            results.push(activity);
        }
        results.reverse();
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use autopool_core::{ActivityStatus, Instance, LifecycleState};

    fn test_snapshot(name: &str, version: u64) -> PoolSnapshot {
        let mut snap = PoolSnapshot::new(name, 1, 2, 1, 1000);
        snap.version = version;
        let mut inst = Instance::new("i-00000001".to_string(), "10.0.0.1".to_string(), 1000);
        inst.state = LifecycleState::InService;
        snap.instances.push(inst);
        snap
    }

    fn test_activity(pool: &str, cause: &str) -> ScalingActivity {
        ScalingActivity::new(
            pool,
            1000,
            cause,
            ActivityStatus::Successful,
            "launched 1 instance".to_string(),
        )
    }

    #[test]
    fn snapshot_put_and_get() {
        let store = StateStore::open_in_memory().unwrap();
        let snap = test_snapshot("web", 3);

        store.put_snapshot(&snap).unwrap();
        assert_eq!(store.get_snapshot("web").unwrap(), Some(snap));
    }

    #[test]
    fn snapshot_get_nonexistent_returns_none() {
        let store = StateStore::open_in_memory().unwrap();
        assert_eq!(store.get_snapshot("missing").unwrap(), None);
    }

    #[test]
    fn snapshot_put_replaces_older_version() {
        let store = StateStore::open_in_memory().unwrap();
        store.put_snapshot(&test_snapshot("web", 1)).unwrap();
        store.put_snapshot(&test_snapshot("web", 2)).unwrap();

        let snaps = store.list_snapshots().unwrap();
        assert_eq!(snaps.len(), 1);
        assert_eq!(snaps[0].version, 2);
    }

    #[test]
    fn activities_get_sequential_numbers() {
        let store = StateStore::open_in_memory().unwrap();
        let a = store.append_activity(&test_activity("web", "web-policy-up")).unwrap();
        let b = store.append_activity(&test_activity("web", "manual")).unwrap();

        assert_eq!(a.seq, 1);
        assert_eq!(b.seq, 2);
    }

    #[test]
    fn activities_are_scoped_per_pool() {
        let store = StateStore::open_in_memory().unwrap();
        store.append_activity(&test_activity("web", "a")).unwrap();
        store.append_activity(&test_activity("api", "b")).unwrap();
        store.append_activity(&test_activity("web", "c")).unwrap();

        let web = store.list_activities("web", 10).unwrap();
        assert_eq!(web.len(), 2);
        assert_eq!(web[0].cause, "a");
        assert_eq!(web[1].cause, "c");
        assert_eq!(web[1].seq, 2);

        let api = store.list_activities("api", 10).unwrap();
        assert_eq!(api.len(), 1);
        assert_eq!(api[0].seq, 1);
    }

    #[test]
    fn list_activities_returns_latest_in_order() {
        let store = StateStore::open_in_memory().unwrap();
        for i in 0..5 {
            store
                .append_activity(&test_activity("web", &format!("cause-{i}")))
                .unwrap();
        }

        let recent = store.list_activities("web", 2).unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].cause, "cause-3");
        assert_eq!(recent[1].cause, "cause-4");
    }

    #[test]
    fn persistent_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("autopool.redb");
        {
            let store = StateStore::open(&path).unwrap();
            store.put_snapshot(&test_snapshot("web", 7)).unwrap();
            store.append_activity(&test_activity("web", "manual")).unwrap();
        }

        let store = StateStore::open(&path).unwrap();
        assert_eq!(store.get_snapshot("web").unwrap().unwrap().version, 7);
        assert_eq!(store.list_activities("web", 10).unwrap().len(), 1);
    }
}
