//! Printer discovery and resolution

use crate::backend::PrintBackend;
use crate::error::{PrintError, PrintResult};
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// Where a resolved printer name came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrinterSource {
    /// Explicitly configured and present in the enumerated list
    Configured,
    /// The spooler's default queue
    SystemDefault,
    /// First enumerated printer (no default set)
    FirstAvailable,
}

/// A resolved destination queue
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrinterIdentity {
    pub name: String,
    pub source: PrinterSource,
    /// Preferred name that could not be used, if any
    pub requested: Option<String>,
}

impl std::fmt::Display for PrinterIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.name)
    }
}

/// Resolves printer names against the active backend
#[derive(Clone)]
pub struct PrinterRegistry {
    backend: Arc<dyn PrintBackend>,
}

impl PrinterRegistry {
    pub fn new(backend: Arc<dyn PrintBackend>) -> Self {
        Self { backend }
    }

    pub fn backend(&self) -> &Arc<dyn PrintBackend> {
        &self.backend
    }

    /// Installed printers for the active backend
    pub async fn list(&self) -> PrintResult<Vec<String>> {
        self.backend.list_printers().await
    }

    /// Pick the destination queue.
    ///
    /// Order: `preferred` if enumerated, then the OS default, then the first
    /// enumerated printer. Enumeration failure is returned unchanged.
    #[instrument(skip(self), fields(backend = %self.backend.kind()))]
    pub async fn resolve(&self, preferred: Option<&str>) -> PrintResult<PrinterIdentity> {
        let available = self.list().await?;
        let preferred = preferred.map(str::trim).filter(|p| !p.is_empty());

        if let Some(name) = preferred {
            if available.iter().any(|p| p == name) {
                info!(printer = name, "Using configured printer");
                return Ok(PrinterIdentity {
                    name: name.to_string(),
                    source: PrinterSource::Configured,
                    requested: None,
                });
            }
            warn!(
                requested = name,
                available = ?available,
                "Configured printer not found, falling back to default"
            );
        }
        let requested = preferred.map(str::to_string);

        let default = match self.backend.default_printer().await {
            Ok(d) => d.filter(|d| !d.is_empty()),
            Err(e) => {
                warn!(error = %e, "Default printer lookup failed");
                None
            }
        };

        if let Some(name) = default {
            info!(printer = %name, "Using system default printer");
            return Ok(PrinterIdentity {
                name,
                source: PrinterSource::SystemDefault,
                requested,
            });
        }

        match available.into_iter().next() {
            Some(name) => {
                info!(printer = %name, "No default printer, using first available");
                Ok(PrinterIdentity {
                    name,
                    source: PrinterSource::FirstAvailable,
                    requested,
                })
            }
            None => Err(PrintError::NoPrinters),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::{ArtifactFormat, PrintArtifact};
    use crate::backend::{BackendKind, PrintAck};
    use async_trait::async_trait;

    struct FakeSpooler {
        printers: Vec<&'static str>,
        default: Option<&'static str>,
        available: bool,
    }

    #[async_trait]
    impl PrintBackend for FakeSpooler {
        fn kind(&self) -> BackendKind {
            BackendKind::Gdi
        }
        fn supports(&self, _format: ArtifactFormat) -> bool {
            true
        }
        fn preferred_format(&self) -> ArtifactFormat {
            ArtifactFormat::Bitmap
        }
        async fn list_printers(&self) -> PrintResult<Vec<String>> {
            if !self.available {
                return Err(PrintError::BackendUnavailable("no spooler".into()));
            }
            Ok(self.printers.iter().map(|s| s.to_string()).collect())
        }
        async fn default_printer(&self) -> PrintResult<Option<String>> {
            Ok(self.default.map(str::to_string))
        }
        async fn submit(&self, _: &PrintArtifact, p: &PrinterIdentity) -> PrintResult<PrintAck> {
            Ok(PrintAck {
                backend: BackendKind::Gdi,
                printer: p.name.clone(),
                job_id: None,
            })
        }
    }

    fn registry(printers: Vec<&'static str>, default: Option<&'static str>) -> PrinterRegistry {
        PrinterRegistry::new(Arc::new(FakeSpooler {
            printers,
            default,
            available: true,
        }))
    }

    #[tokio::test]
    async fn test_missing_preferred_falls_back_to_default() {
        let registry = registry(vec!["HP LaserJet", "OneNote"], Some("HP LaserJet"));
        let identity = registry
            .resolve(Some("DYMO LabelWriter 450"))
            .await
            .unwrap();

        assert_eq!(identity.name, "HP LaserJet");
        assert_eq!(identity.source, PrinterSource::SystemDefault);
        assert_eq!(identity.requested.as_deref(), Some("DYMO LabelWriter 450"));
    }

    #[tokio::test]
    async fn test_preferred_present() {
        let registry = registry(vec!["HP LaserJet", "DYMO LabelWriter 450"], Some("HP LaserJet"));
        let identity = registry
            .resolve(Some("DYMO LabelWriter 450"))
            .await
            .unwrap();
        assert_eq!(identity.name, "DYMO LabelWriter 450");
        assert_eq!(identity.source, PrinterSource::Configured);
    }

    #[tokio::test]
    async fn test_first_available_then_none() {
        let identity = registry(vec!["Zebra"], None).resolve(None).await.unwrap();
        assert_eq!(identity.name, "Zebra");
        assert_eq!(identity.source, PrinterSource::FirstAvailable);

        let err = registry(vec![], None).resolve(Some("")).await.unwrap_err();
        assert!(matches!(err, PrintError::NoPrinters));
    }

    #[tokio::test]
    async fn test_enumeration_failure_is_permanent() {
        let registry = PrinterRegistry::new(Arc::new(FakeSpooler {
            printers: vec![],
            default: None,
            available: false,
        }));
        let err = registry.resolve(Some("DYMO")).await.unwrap_err();
        assert!(!err.is_retryable());
    }
}
