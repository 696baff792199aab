//! redb-based journal of printed entries
//!
//! Every successful dispatch is written here before the store flag is
//! flipped, so a crash between "label printed" and "store updated" can never
//! lead to a second print.

use crate::store::NameEntry;
use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

/// Delivered entries: key = entry id, value = JSON
const DELIVERED_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("delivered");

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("Database error: {0}")]
    Database(#[from] redb::DatabaseError),

    #[error("Transaction error: {0}")]
    Transaction(#[from] redb::TransactionError),

    #[error("Table error: {0}")]
    Table(#[from] redb::TableError),

    #[error("Storage error: {0}")]
    Storage(#[from] redb::StorageError),

    #[error("Commit error: {0}")]
    Commit(#[from] redb::CommitError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type LedgerResult<T> = Result<T, LedgerError>;

/// One printed entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: String,
    pub first_name: String,
    pub last_name: String,
    /// Unix seconds
    pub printed_at: i64,
    /// `printed = true` confirmed by the record store
    pub store_synced: bool,
}

/// Local delivery journal
#[derive(Clone)]
pub struct DeliveryLedger {
    db: Arc<Database>,
}

impl DeliveryLedger {
    /// Open or create database
    pub fn open(path: impl AsRef<Path>) -> LedgerResult<Self> {
        let db = Database::create(path)?;
        Self::init(db)
    }

    /// Open in-memory database (for testing)
    #[cfg(test)]
    pub fn open_in_memory() -> LedgerResult<Self> {
        let db =
            Database::builder().create_with_backend(redb::backends::InMemoryBackend::new())?;
        Self::init(db)
    }

    fn init(db: Database) -> LedgerResult<Self> {
        let write_txn = db.begin_write()?;
        {
            let _ = write_txn.open_table(DELIVERED_TABLE)?;
        }
        write_txn.commit()?;
        Ok(Self { db: Arc::new(db) })
    }

    /// Journal a successful print, not yet confirmed by the store
    pub fn record_printed(&self, entry: &NameEntry) -> LedgerResult<()> {
        let record = LedgerEntry {
            id: entry.id.clone(),
            first_name: entry.first_name.clone(),
            last_name: entry.last_name.clone(),
            printed_at: chrono::Utc::now().timestamp(),
            store_synced: false,
        };
        self.put(&record)
    }

    /// Store write confirmed
    pub fn mark_synced(&self, id: &str) -> LedgerResult<()> {
        let Some(mut record) = self.get(id)? else {
            return Ok(());
        };
        if !record.store_synced {
            record.store_synced = true;
            self.put(&record)?;
        }
        Ok(())
    }

    fn put(&self, record: &LedgerEntry) -> LedgerResult<()> {
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(DELIVERED_TABLE)?;
            let value = serde_json::to_vec(record)?;
            table.insert(record.id.as_str(), value.as_slice())?;
        }
        txn.commit()?;
        Ok(())
    }

    pub fn get(&self, id: &str) -> LedgerResult<Option<LedgerEntry>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(DELIVERED_TABLE)?;

        match table.get(id)? {
            Some(guard) => Ok(Some(serde_json::from_slice(guard.value())?)),
            None => Ok(None),
        }
    }

    pub fn contains(&self, id: &str) -> LedgerResult<bool> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(DELIVERED_TABLE)?;
        Ok(table.get(id)?.is_some())
    }

    /// Printed entries whose store flag was never confirmed, oldest first
    pub fn pending_sync(&self) -> LedgerResult<Vec<LedgerEntry>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(DELIVERED_TABLE)?;

        let mut pending = Vec::new();
        for result in table.iter()? {
            let (_, guard) = result?;
            let record: LedgerEntry = serde_json::from_slice(guard.value())?;
            if !record.store_synced {
                pending.push(record);
            }
        }
        pending.sort_by_key(|r| r.printed_at);
        Ok(pending)
    }

    /// Drop synced entries older than `max_age_secs`. Unsynced entries are
    /// kept regardless of age.
    pub fn cleanup_synced(&self, max_age_secs: i64) -> LedgerResult<usize> {
        let cutoff = chrono::Utc::now().timestamp() - max_age_secs;

        let txn = self.db.begin_write()?;
        let deleted = {
            let mut table = txn.open_table(DELIVERED_TABLE)?;

            let mut to_delete = Vec::new();
            for result in table.iter()? {
                let (key, guard) = result?;
                let record: LedgerEntry = serde_json::from_slice(guard.value())?;
                if record.store_synced && record.printed_at < cutoff {
                    to_delete.push(key.value().to_string());
                }
            }

            for id in &to_delete {
                table.remove(id.as_str())?;
            }
            to_delete.len()
        };
        txn.commit()?;
        Ok(deleted)
    }

    #[cfg(test)]
    fn backdate(&self, id: &str, secs: i64) -> LedgerResult<()> {
        if let Some(mut record) = self.get(id)? {
            record.printed_at -= secs;
            self.put(&record)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::entry;

    #[test]
    fn test_record_then_sync() {
        let ledger = DeliveryLedger::open_in_memory().unwrap();
        ledger.record_printed(&entry("7", "John", "Doe")).unwrap();

        assert!(ledger.contains("7").unwrap());
        assert!(!ledger.contains("8").unwrap());
        assert_eq!(ledger.pending_sync().unwrap().len(), 1);

        ledger.mark_synced("7").unwrap();
        assert!(ledger.pending_sync().unwrap().is_empty());
        assert!(ledger.get("7").unwrap().unwrap().store_synced);
    }

    #[test]
    fn test_cleanup_keeps_unsynced() {
        let ledger = DeliveryLedger::open_in_memory().unwrap();
        ledger.record_printed(&entry("old-synced", "A", "B")).unwrap();
        ledger.record_printed(&entry("old-pending", "C", "D")).unwrap();
        ledger.record_printed(&entry("new-synced", "E", "F")).unwrap();
        ledger.mark_synced("old-synced").unwrap();
        ledger.mark_synced("new-synced").unwrap();

        let week = 7 * 24 * 3600;
        ledger.backdate("old-synced", week + 60).unwrap();
        ledger.backdate("old-pending", week + 60).unwrap();

        assert_eq!(ledger.cleanup_synced(week).unwrap(), 1);
        assert!(!ledger.contains("old-synced").unwrap());
        assert!(ledger.contains("old-pending").unwrap());
        assert!(ledger.contains("new-synced").unwrap());
    }

    #[test]
    fn test_reopen_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("delivery.redb");
        {
            let ledger = DeliveryLedger::open(&path).unwrap();
            ledger.record_printed(&entry("1", "John", "Doe")).unwrap();
        }
        let ledger = DeliveryLedger::open(&path).unwrap();
        assert!(ledger.contains("1").unwrap());
    }
}
