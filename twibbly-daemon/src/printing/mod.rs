//! Label delivery
//!
//! - [`DeliveryLedger`] - redb journal of printed entries
//! - [`DeliveryTracker`] - dedup authority and store flag writes
//! - [`PrintCoordinator`] - render, dispatch and commit per entry

pub mod coordinator;
pub mod ledger;
pub mod tracker;

pub use coordinator::{DEFAULT_RETRY_PAUSE, Outcome, PrintCoordinator};
pub use ledger::{DeliveryLedger, LedgerEntry, LedgerError, LedgerResult};
pub use tracker::{Claim, DeliveryState, DeliveryTracker, LEDGER_RETENTION_SECS, TrackError};
