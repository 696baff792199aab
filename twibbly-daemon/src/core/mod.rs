//! Core module - configuration and daemon wiring
//!
//! - [`Config`] - daemon configuration from the environment
//! - [`Daemon`] - builds the pipeline and runs it until shutdown

pub mod config;
pub mod daemon;

pub use config::{ChangeSourceKind, Config, ConfigError, LabelConfig, LogConfig, StoreConfig};
pub use daemon::Daemon;
