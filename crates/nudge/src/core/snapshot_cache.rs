//! Last-known records per logical database key
//!
//! Tasks and habits are kept in separate maps, each behind its own lock.
//! Reads and writes copy the record lists, so nothing handed out can be
//! mutated through the cache and nothing cached can be mutated by a caller.
//!
//! Each map carries a generation that `remove` and `clear` bump. A fetch
//! takes the generation before it starts and hands it back to `set`; if the
//! map was invalidated in between, the write is dropped so a slow fetch
//! cannot put back records from before a config change or a mutation.

use nudge_api::{DatabaseKind, Record};
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Cache state a fetch started from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Generation(u64);

#[derive(Default)]
struct Entries {
    records: HashMap<String, Vec<Record>>,
    generation: u64,
}

impl Entries {
    fn invalidate(&mut self) {
        self.generation += 1;
    }
}

#[derive(Default)]
pub struct SnapshotCache {
    tasks: RwLock<Entries>,
    habits: RwLock<Entries>,
}

impl SnapshotCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self, kind: DatabaseKind) -> &RwLock<Entries> {
        match kind {
            DatabaseKind::Task => &self.tasks,
            DatabaseKind::Habit => &self.habits,
        }
    }

    pub async fn generation(&self, kind: DatabaseKind) -> Generation {
        Generation(self.entries(kind).read().await.generation)
    }

    /// `None` when the key was never populated; an empty list is a valid
    /// cached value.
    pub async fn get(&self, kind: DatabaseKind, key: &str) -> Option<Vec<Record>> {
        self.entries(kind).read().await.records.get(key).cloned()
    }

    /// Stores `records` unless the map was invalidated after `since` was
    /// taken. Returns whether the write happened.
    pub async fn set(
        &self,
        kind: DatabaseKind,
        key: &str,
        records: &[Record],
        since: Generation,
    ) -> bool {
        let mut entries = self.entries(kind).write().await;
        if entries.generation != since.0 {
            return false;
        }
        entries.records.insert(key.to_string(), records.to_vec());
        true
    }

    pub async fn remove(&self, kind: DatabaseKind, key: &str) {
        let mut entries = self.entries(kind).write().await;
        entries.records.remove(key);
        entries.invalidate();
    }

    pub async fn clear(&self) {
        for kind in [DatabaseKind::Task, DatabaseKind::Habit] {
            let mut entries = self.entries(kind).write().await;
            entries.records.clear();
            entries.invalidate();
        }
    }
}
