//! In-memory record store for tests

use super::{NameEntry, RecordStore, StoreError, StoreResult};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<Vec<NameEntry>>,
    /// Number of upcoming `mark_printed` calls that fail
    failing_marks: AtomicUsize,
    pub fetches: AtomicUsize,
    pub marks: AtomicUsize,
}

impl MemoryStore {
    pub fn with_entries(entries: Vec<NameEntry>) -> Self {
        Self {
            entries: Mutex::new(entries),
            ..Default::default()
        }
    }

    pub fn fail_next_marks(&self, n: usize) {
        self.failing_marks.store(n, Ordering::SeqCst);
    }

    pub fn is_printed(&self, id: &str) -> bool {
        self.entries.lock().iter().any(|e| e.id == id && e.printed)
    }
}

pub fn entry(id: &str, first: &str, last: &str) -> NameEntry {
    NameEntry {
        id: id.to_string(),
        first_name: first.to_string(),
        last_name: last.to_string(),
        printed: false,
        created_at: None,
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn fetch_unprinted(&self) -> StoreResult<Vec<NameEntry>> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let mut unprinted: Vec<NameEntry> = self
            .entries
            .lock()
            .iter()
            .filter(|e| !e.printed)
            .cloned()
            .collect();
        unprinted.sort_by_key(|e| e.created_at);
        Ok(unprinted)
    }

    async fn mark_printed(&self, id: &str) -> StoreResult<()> {
        self.marks.fetch_add(1, Ordering::SeqCst);

        let failing = self
            .failing_marks
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if failing.is_ok() {
            return Err(StoreError::Status {
                status: 503,
                body: "unavailable".into(),
            });
        }

        let mut entries = self.entries.lock();
        match entries.iter_mut().find(|e| e.id == id) {
            Some(e) => {
                e.printed = true;
                Ok(())
            }
            None => Err(StoreError::NotFound(id.to_string())),
        }
    }
}
