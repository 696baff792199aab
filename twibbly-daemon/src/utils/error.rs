//! Application-level error

use crate::core::ConfigError;
use crate::printing::LedgerError;
use crate::store::StoreError;
use thiserror::Error;
use twibbly_printer::PrintError;

/// Anything that stops the daemon from starting
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Print backend error: {0}")]
    Print(#[from] PrintError),

    #[error("Delivery ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Record store error: {0}")]
    Store(#[from] StoreError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Incompatible(String),
}

pub type AppResult<T> = Result<T, AppError>;
