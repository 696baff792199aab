//! Twibbly print daemon
//!
//! Watches the record store for new name entries and prints each one as a
//! label, at most once.
//!
//! # Module structure
//!
//! ```text
//! twibbly-daemon/src/
//! ├── core/       # configuration, daemon wiring
//! ├── store/      # record store client
//! ├── source/     # poll and realtime change sources
//! ├── printing/   # ledger, tracker, coordinator
//! └── utils/      # errors, logging
//! ```

pub mod core;
pub mod printing;
pub mod source;
pub mod store;
pub mod utils;

pub use core::{Config, Daemon, LogConfig};
pub use printing::{DeliveryTracker, Outcome, PrintCoordinator};
pub use store::{NameEntry, RecordStore, RestStore};
pub use utils::{AppError, AppResult};
