//! Delivery tracker: the at-most-once authority
//!
//! Three tiers answer "was this entry printed?":
//!
//! 1. the entry's own `printed` flag (authoritative, from the store)
//! 2. the in-process state map (fast path, also the atomic claim)
//! 3. the redb ledger (survives restarts between print and store write)

use super::ledger::DeliveryLedger;
use crate::store::{NameEntry, RecordStore, StoreError};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::sync::Arc;
use thiserror::Error;
use tracing::instrument;

/// Synced ledger entries are kept for a week
pub const LEDGER_RETENTION_SECS: i64 = 7 * 24 * 3600;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryState {
    /// Claimed by a running dispatch
    InFlight,
    /// Label is out; `synced` once the store flag is confirmed
    Printed { synced: bool },
}

#[derive(Debug, Error)]
pub enum TrackError {
    /// Label printed, store flag not written
    #[error("Store update failed for printed entry {id}: {source}")]
    Store {
        id: String,
        #[source]
        source: StoreError,
    },
}

/// Exclusive right to dispatch one entry id
///
/// Dropping an uncommitted claim releases the id for a later cycle.
pub struct Claim<'a> {
    tracker: &'a DeliveryTracker,
    id: String,
}

impl Claim<'_> {
    pub fn id(&self) -> &str {
        &self.id
    }
}

impl Drop for Claim<'_> {
    fn drop(&mut self) {
        self.tracker
            .state
            .remove_if(&self.id, |_, state| *state == DeliveryState::InFlight);
    }
}

pub struct DeliveryTracker {
    state: DashMap<String, DeliveryState>,
    ledger: DeliveryLedger,
    store: Arc<dyn RecordStore>,
}

impl DeliveryTracker {
    pub fn new(ledger: DeliveryLedger, store: Arc<dyn RecordStore>) -> Self {
        Self {
            state: DashMap::new(),
            ledger,
            store,
        }
    }

    pub fn state(&self, id: &str) -> Option<DeliveryState> {
        self.state.get(id).map(|s| *s)
    }

    /// Whether `entry` must not be dispatched again
    pub fn already_handled(&self, entry: &NameEntry) -> bool {
        if entry.printed {
            return true;
        }
        if self.state.contains_key(&entry.id) {
            return true;
        }
        match self.ledger.contains(&entry.id) {
            Ok(found) => found,
            Err(e) => {
                tracing::error!(entry_id = %entry.id, error = %e, "Ledger lookup failed");
                false
            }
        }
    }

    /// Atomically move `id` from absent to in-flight
    pub fn try_claim(&self, id: &str) -> Option<Claim<'_>> {
        match self.state.entry(id.to_string()) {
            Entry::Occupied(_) => None,
            Entry::Vacant(slot) => {
                slot.insert(DeliveryState::InFlight);
                Some(Claim {
                    tracker: self,
                    id: id.to_string(),
                })
            }
        }
    }

    /// Commit a successful print.
    ///
    /// The ledger is written before the store. The store write is attempted
    /// exactly once here; a failure leaves the entry printed-but-unsynced
    /// for [`reconcile`](Self::reconcile) and is never a reason to reprint.
    #[instrument(skip(self, claim, entry), fields(entry_id = %entry.id))]
    pub async fn mark_done(&self, claim: Claim<'_>, entry: &NameEntry) -> Result<(), TrackError> {
        if let Err(e) = self.ledger.record_printed(entry) {
            tracing::error!(
                entry_id = %entry.id,
                error = %e,
                "Failed to journal printed entry, relying on store flag"
            );
        }
        self.state
            .insert(claim.id.clone(), DeliveryState::Printed { synced: false });
        drop(claim);

        match self.store.mark_printed(&entry.id).await {
            Ok(()) => {
                self.synced(&entry.id);
                tracing::debug!(entry_id = %entry.id, "Store flag written");
                Ok(())
            }
            Err(StoreError::NotFound(_)) => {
                tracing::warn!(
                    entry_id = %entry.id,
                    "Printed entry no longer exists in the store"
                );
                self.synced(&entry.id);
                Ok(())
            }
            Err(source) => {
                tracing::error!(
                    entry_id = %entry.id,
                    first_name = %entry.first_name,
                    last_name = %entry.last_name,
                    error = %source,
                    "Label printed but store update failed; manual reconciliation may be needed"
                );
                Err(TrackError::Store {
                    id: entry.id.clone(),
                    source,
                })
            }
        }
    }

    fn synced(&self, id: &str) {
        self.state
            .insert(id.to_string(), DeliveryState::Printed { synced: true });
        if let Err(e) = self.ledger.mark_synced(id) {
            tracing::warn!(entry_id = %id, error = %e, "Failed to mark ledger entry synced");
        }
    }

    /// Retry pending store writes from the ledger. Never reprints.
    ///
    /// Returns the number of entries now synced.
    pub async fn reconcile(&self) -> usize {
        let pending = match self.ledger.pending_sync() {
            Ok(pending) => pending,
            Err(e) => {
                tracing::error!(error = %e, "Failed to read pending ledger entries");
                return 0;
            }
        };

        let mut synced = 0;
        for record in pending {
            self.state
                .entry(record.id.clone())
                .or_insert(DeliveryState::Printed { synced: false });

            match self.store.mark_printed(&record.id).await {
                Ok(()) | Err(StoreError::NotFound(_)) => {
                    self.synced(&record.id);
                    synced += 1;
                }
                Err(e) => {
                    tracing::warn!(
                        entry_id = %record.id,
                        first_name = %record.first_name,
                        last_name = %record.last_name,
                        error = %e,
                        "Store update still failing; manual reconciliation may be needed"
                    );
                }
            }
        }

        if synced > 0 {
            tracing::info!(count = synced, "Reconciled printed entries with the store");
        }
        self.forget_synced();
        synced
    }

    /// Drop confirmed entries from the state map. The store flag and the
    /// ledger still answer for them.
    fn forget_synced(&self) {
        self.state
            .retain(|_, state| *state != DeliveryState::Printed { synced: true });
    }

    /// Drop synced ledger entries older than `max_age_secs` and confirmed
    /// entries from the state map
    pub fn prune(&self, max_age_secs: i64) {
        self.forget_synced();
        match self.ledger.cleanup_synced(max_age_secs) {
            Ok(0) => {}
            Ok(n) => tracing::info!(count = n, "Pruned delivery ledger"),
            Err(e) => tracing::warn!(error = %e, "Failed to prune delivery ledger"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::{MemoryStore, entry};
    use std::sync::atomic::Ordering;

    fn tracker(store: Arc<MemoryStore>) -> DeliveryTracker {
        DeliveryTracker::new(DeliveryLedger::open_in_memory().unwrap(), store)
    }

    #[test]
    fn test_printed_flag_is_authoritative() {
        let tracker = tracker(Arc::new(MemoryStore::default()));
        let mut e = entry("1", "John", "Doe");
        assert!(!tracker.already_handled(&e));
        e.printed = true;
        assert!(tracker.already_handled(&e));
    }

    #[test]
    fn test_claim_is_exclusive_and_released_on_drop() {
        let tracker = tracker(Arc::new(MemoryStore::default()));

        let claim = tracker.try_claim("1").unwrap();
        assert!(tracker.try_claim("1").is_none());
        assert!(tracker.already_handled(&entry("1", "John", "Doe")));
        assert!(tracker.try_claim("2").is_some());

        drop(claim);
        assert_eq!(tracker.state("1"), None);
    }

    #[tokio::test]
    async fn test_mark_done_then_already_handled() {
        let store = Arc::new(MemoryStore::with_entries(vec![entry("1", "John", "Doe")]));
        let tracker = tracker(store.clone());
        let e = entry("1", "John", "Doe");

        let claim = tracker.try_claim("1").unwrap();
        tracker.mark_done(claim, &e).await.unwrap();

        assert!(store.is_printed("1"));
        assert!(tracker.already_handled(&e));
        assert_eq!(tracker.state("1"), Some(DeliveryState::Printed { synced: true }));
        assert!(tracker.try_claim("1").is_none());
    }

    #[tokio::test]
    async fn test_failed_store_write_keeps_entry_handled() {
        let store = Arc::new(MemoryStore::with_entries(vec![entry("1", "John", "Doe")]));
        store.fail_next_marks(1);
        let tracker = tracker(store.clone());
        let e = entry("1", "John", "Doe");

        let claim = tracker.try_claim("1").unwrap();
        let err = tracker.mark_done(claim, &e).await.unwrap_err();
        assert!(matches!(err, TrackError::Store { .. }));

        assert!(!store.is_printed("1"));
        assert!(tracker.already_handled(&e));
        assert_eq!(store.marks.load(Ordering::SeqCst), 1);

        assert_eq!(tracker.reconcile().await, 1);
        assert!(store.is_printed("1"));
        assert!(tracker.already_handled(&e));
        assert_eq!(tracker.reconcile().await, 0);
    }

    #[tokio::test]
    async fn test_synced_entries_leave_state_map() {
        let store = Arc::new(MemoryStore::with_entries(vec![
            entry("1", "John", "Doe"),
            entry("2", "Jane", "Roe"),
        ]));
        store.fail_next_marks(1);
        let tracker = tracker(store.clone());

        let pending = entry("2", "Jane", "Roe");
        let claim = tracker.try_claim("2").unwrap();
        assert!(tracker.mark_done(claim, &pending).await.is_err());
        let done = entry("1", "John", "Doe");
        let claim = tracker.try_claim("1").unwrap();
        tracker.mark_done(claim, &done).await.unwrap();
        let in_flight = tracker.try_claim("3").unwrap();

        tracker.prune(LEDGER_RETENTION_SECS);

        assert_eq!(tracker.state("1"), None);
        assert_eq!(tracker.state("2"), Some(DeliveryState::Printed { synced: false }));
        assert_eq!(tracker.state("3"), Some(DeliveryState::InFlight));
        // Ledger still answers for the forgotten entry
        assert!(tracker.already_handled(&done));
        drop(in_flight);
    }

    #[tokio::test]
    async fn test_ledger_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("delivery.redb");
        let store = Arc::new(MemoryStore::with_entries(vec![entry("1", "John", "Doe")]));
        store.fail_next_marks(1);
        let e = entry("1", "John", "Doe");

        {
            let tracker = DeliveryTracker::new(DeliveryLedger::open(&path).unwrap(), store.clone());
            let claim = tracker.try_claim("1").unwrap();
            assert!(tracker.mark_done(claim, &e).await.is_err());
        }

        // Fresh process: empty map, store still says unprinted
        let tracker = DeliveryTracker::new(DeliveryLedger::open(&path).unwrap(), store.clone());
        assert!(tracker.already_handled(&e));
        assert_eq!(tracker.reconcile().await, 1);
        assert!(store.is_printed("1"));
    }

    #[tokio::test]
    async fn test_vanished_entry_counts_as_synced() {
        let store = Arc::new(MemoryStore::default());
        let tracker = tracker(store.clone());
        let e = entry("gone", "Jane", "Roe");

        let claim = tracker.try_claim("gone").unwrap();
        tracker.mark_done(claim, &e).await.unwrap();
        assert_eq!(
            tracker.state("gone"),
            Some(DeliveryState::Printed { synced: true })
        );
    }
}
