//! Print backends
//!
//! One implementation per spooler family, chosen once at startup:
//! - [`GdiBackend`]: Windows GDI device context, pixels blitted per page
//! - [`CupsBackend`]: IPP over HTTP to a CUPS server
//! - [`ExternalBackend`]: an external print program run as a subprocess

mod cups;
mod external;
#[cfg(windows)]
mod gdi;
pub(crate) mod ipp;

pub use cups::CupsBackend;
pub use external::ExternalBackend;
#[cfg(windows)]
pub use gdi::GdiBackend;

use crate::artifact::{ArtifactFormat, PrintArtifact};
use crate::error::{PrintError, PrintResult};
use crate::registry::PrinterIdentity;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

/// Spooler family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Gdi,
    Cups,
    External,
}

impl BackendKind {
    /// Backend a host uses when nothing is configured
    pub fn native() -> Self {
        if cfg!(windows) {
            BackendKind::Gdi
        } else {
            BackendKind::Cups
        }
    }
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendKind::Gdi => write!(f, "gdi"),
            BackendKind::Cups => write!(f, "cups"),
            BackendKind::External => write!(f, "external"),
        }
    }
}

impl std::str::FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "gdi" | "windows" => Ok(BackendKind::Gdi),
            "cups" | "ipp" => Ok(BackendKind::Cups),
            "external" | "subprocess" => Ok(BackendKind::External),
            other => Err(format!("unknown print backend '{other}'")),
        }
    }
}

/// Spooler acknowledgement for a submitted job
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrintAck {
    pub backend: BackendKind,
    pub printer: String,
    /// Spooler job id, when the backend reports one
    pub job_id: Option<String>,
}

/// Submits rendered labels to an OS spooler
#[async_trait]
pub trait PrintBackend: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// Formats this backend can spool
    fn supports(&self, format: ArtifactFormat) -> bool;

    /// Format used when configuration leaves it open
    fn preferred_format(&self) -> ArtifactFormat;

    /// Installed printer queues
    async fn list_printers(&self) -> PrintResult<Vec<String>>;

    /// The spooler's default queue, if any
    async fn default_printer(&self) -> PrintResult<Option<String>>;

    /// Spool one artifact to `printer`
    async fn submit(
        &self,
        artifact: &PrintArtifact,
        printer: &PrinterIdentity,
    ) -> PrintResult<PrintAck>;
}

/// Settings for constructing a backend
#[derive(Debug, Clone)]
pub struct BackendOptions {
    /// `host:port` of the CUPS server
    pub cups_server: String,
    /// External print program (name on PATH or absolute path)
    pub external_program: String,
    /// Argument template; `{printer}`, `{file}`, `{title}` are substituted
    pub external_args: Vec<String>,
}

impl Default for BackendOptions {
    fn default() -> Self {
        Self {
            cups_server: cups::DEFAULT_SERVER.to_string(),
            external_program: external::default_program().to_string(),
            external_args: external::default_args(),
        }
    }
}

/// Build the backend for `kind`, or the host's native one when `None`.
///
/// Fails with [`PrintError::BackendUnavailable`] when the backend cannot
/// run on this host.
pub fn select_backend(
    kind: Option<BackendKind>,
    options: &BackendOptions,
) -> PrintResult<Arc<dyn PrintBackend>> {
    let kind = kind.unwrap_or_else(BackendKind::native);

    let backend: Arc<dyn PrintBackend> = match kind {
        BackendKind::Gdi => native_gdi()?,
        BackendKind::Cups => Arc::new(CupsBackend::new(&options.cups_server)),
        BackendKind::External => Arc::new(ExternalBackend::new(
            &options.external_program,
            options.external_args.clone(),
            platform_enumerator(options)?,
        )?),
    };

    info!(backend = %kind, os = std::env::consts::OS, "Print backend selected");
    Ok(backend)
}

#[cfg(windows)]
fn native_gdi() -> PrintResult<Arc<dyn PrintBackend>> {
    Ok(Arc::new(GdiBackend::new()))
}

#[cfg(not(windows))]
fn native_gdi() -> PrintResult<Arc<dyn PrintBackend>> {
    Err(PrintError::BackendUnavailable(format!(
        "GDI printing is only available on Windows (running on {})",
        std::env::consts::OS
    )))
}

/// Printer enumeration for backends that cannot list queues themselves
fn platform_enumerator(options: &BackendOptions) -> PrintResult<Arc<dyn PrintBackend>> {
    if cfg!(windows) {
        native_gdi()
    } else {
        Ok(Arc::new(CupsBackend::new(&options.cups_server)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_kind_parse() {
        assert_eq!("GDI".parse::<BackendKind>(), Ok(BackendKind::Gdi));
        assert_eq!("cups".parse::<BackendKind>(), Ok(BackendKind::Cups));
        assert_eq!(" external ".parse::<BackendKind>(), Ok(BackendKind::External));
        assert!("lpr".parse::<BackendKind>().is_err());
    }

    #[cfg(not(windows))]
    #[test]
    fn test_gdi_unavailable_off_windows() {
        let err = select_backend(Some(BackendKind::Gdi), &BackendOptions::default())
            .err()
            .unwrap();
        assert!(matches!(err, PrintError::BackendUnavailable(_)));
        assert!(!err.is_retryable());
    }

    #[cfg(not(windows))]
    #[test]
    fn test_native_is_cups_off_windows() {
        let backend = select_backend(None, &BackendOptions::default()).unwrap();
        assert_eq!(backend.kind(), BackendKind::Cups);
    }
}
