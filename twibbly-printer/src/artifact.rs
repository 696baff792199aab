//! Transient print artifacts

use crate::error::{PrintError, PrintResult};
use image::GrayImage;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tempfile::TempPath;
use tracing::warn;

/// File kind handed to a backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactFormat {
    /// Grayscale PNG
    Bitmap,
    /// Single-page PDF
    Document,
}

impl ArtifactFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ArtifactFormat::Bitmap => ".png",
            ArtifactFormat::Document => ".pdf",
        }
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            ArtifactFormat::Bitmap => "image/png",
            ArtifactFormat::Document => "application/pdf",
        }
    }
}

impl std::fmt::Display for ArtifactFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ArtifactFormat::Bitmap => write!(f, "bitmap"),
            ArtifactFormat::Document => write!(f, "pdf"),
        }
    }
}

/// A rendered label on local storage, ready to spool.
///
/// Owns its file: [`discard`](Self::discard) or dropping the artifact
/// deletes it.
#[derive(Debug)]
pub struct PrintArtifact {
    path: TempPath,
    format: ArtifactFormat,
    /// Raster kept in memory for backends that blit pixels directly
    pixels: Option<GrayImage>,
    title: String,
    size_mm: (f32, f32),
}

impl PrintArtifact {
    pub(crate) fn new(
        path: TempPath,
        format: ArtifactFormat,
        pixels: Option<GrayImage>,
        title: String,
        size_mm: (f32, f32),
    ) -> Self {
        Self {
            path,
            format,
            pixels,
            title,
            size_mm,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn format(&self) -> ArtifactFormat {
        self.format
    }

    pub fn pixels(&self) -> Option<&GrayImage> {
        self.pixels.as_ref()
    }

    /// Human-readable job title
    pub fn title(&self) -> &str {
        &self.title
    }

    /// Physical label size (width, height)
    pub fn size_mm(&self) -> (f32, f32) {
        self.size_mm
    }

    /// Read the file back for backends that upload it
    pub async fn read(&self) -> PrintResult<Vec<u8>> {
        tokio::fs::read(&self.path).await.map_err(|e| {
            PrintError::ArtifactUnreadable(format!("{}: {}", self.path.display(), e))
        })
    }

    /// Fail early when the file vanished after rendering
    pub fn ensure_readable(&self) -> PrintResult<()> {
        match std::fs::metadata(&self.path) {
            Ok(meta) if meta.is_file() && meta.len() > 0 => Ok(()),
            Ok(_) => Err(PrintError::ArtifactUnreadable(format!(
                "{}: empty or not a file",
                self.path.display()
            ))),
            Err(e) => Err(PrintError::ArtifactUnreadable(format!(
                "{}: {}",
                self.path.display(),
                e
            ))),
        }
    }

    /// Delete the file now
    pub fn discard(self) {
        let path = self.path.display().to_string();
        if let Err(e) = self.path.close() {
            warn!(path = %path, error = %e, "Failed to delete print artifact");
        }
    }
}
