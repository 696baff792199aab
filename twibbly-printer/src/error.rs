//! Error types for the printer library

use thiserror::Error;

/// Printer error types
#[derive(Debug, Error)]
pub enum PrintError {
    /// The backend cannot run on this host (library, spooler or program missing)
    #[error("Backend unavailable: {0}")]
    BackendUnavailable(String),

    /// Destination queue is not known to the spooler
    #[error("Printer not found: {0}")]
    PrinterNotFound(String),

    /// No printer could be enumerated at all
    #[error("No printers available")]
    NoPrinters,

    /// Spooler accepted the connection but refused the job
    #[error("Spooler rejected job: {0}")]
    Rejected(String),

    /// External print program exited unsuccessfully
    #[error("Print program exited with {code:?}: {stderr}")]
    Subprocess { code: Option<i32>, stderr: String },

    /// Artifact file is missing or cannot be read
    #[error("Artifact unreadable: {0}")]
    ArtifactUnreadable(String),

    /// Backend cannot print this kind of artifact
    #[error("Unsupported artifact: {0}")]
    UnsupportedArtifact(String),

    /// HTTP transport error talking to the print service
    #[error("Connection failed: {0}")]
    Connection(String),

    /// IO error during printing
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Windows-specific printing error
    #[cfg(windows)]
    #[error("Windows printer error: {0}")]
    WindowsPrinter(String),
}

impl PrintError {
    /// Whether a later attempt for the same record can succeed.
    ///
    /// Permanent failures stay permanent until the operator changes the
    /// host or configuration.
    pub fn is_retryable(&self) -> bool {
        match self {
            PrintError::BackendUnavailable(_)
            | PrintError::NoPrinters
            | PrintError::ArtifactUnreadable(_)
            | PrintError::UnsupportedArtifact(_) => false,
            PrintError::PrinterNotFound(_)
            | PrintError::Rejected(_)
            | PrintError::Subprocess { .. }
            | PrintError::Connection(_)
            | PrintError::Io(_) => true,
            #[cfg(windows)]
            PrintError::WindowsPrinter(_) => true,
        }
    }
}

impl From<reqwest::Error> for PrintError {
    fn from(err: reqwest::Error) -> Self {
        PrintError::Connection(err.to_string())
    }
}

/// Result type for printer operations
pub type PrintResult<T> = Result<T, PrintError>;

/// Label geometry is physically impossible
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GeometryError {
    #[error("Label dimensions must be positive, got {width_mm}mm x {height_mm}mm")]
    NonPositiveSize { width_mm: f32, height_mm: f32 },

    #[error("Safe margin {margin_mm}mm must be >= 0 and smaller than half of {min_side_mm}mm")]
    MarginTooLarge { margin_mm: f32, min_side_mm: f32 },

    #[error("DPI must be positive, got {0}")]
    InvalidDpi(f32),
}

/// Rendering failed for one label
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("Image encoding failed: {0}")]
    Encode(#[from] image::ImageError),

    #[error("Drawing panicked: {0}")]
    Panicked(String),

    #[error("Failed to write artifact: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_classification() {
        assert!(!PrintError::BackendUnavailable("cups".into()).is_retryable());
        assert!(!PrintError::ArtifactUnreadable("gone".into()).is_retryable());
        assert!(PrintError::PrinterNotFound("DYMO".into()).is_retryable());
        assert!(PrintError::Rejected("busy".into()).is_retryable());
        assert!(
            PrintError::Subprocess {
                code: Some(1),
                stderr: String::new()
            }
            .is_retryable()
        );
    }
}
