//! Label rendering
//!
//! [`LabelRenderer`] turns a first/last name pair into a [`RenderedLabel`]
//! with fixed physical geometry. Two strategies share one layout:
//!
//! - `Bitmap`: grayscale raster at the configured DPI (PNG on disk)
//! - `Document`: single-page PDF using the standard Helvetica faces
//!
//! Rendering touches no files; [`RenderedLabel::write_to`] hands the bytes to
//! a caller-chosen directory as a transient [`PrintArtifact`].

mod font;
mod pdf;
mod raster;

pub use font::{FontFace, FontSet};

use crate::artifact::{ArtifactFormat, PrintArtifact};
use crate::error::RenderError;
use crate::geometry::{LabelGeometry, LabelLayout};
use image::{GrayImage, ImageFormat};
use std::io::{Cursor, Write};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::Path;
use tracing::{debug, instrument};

/// Renders name labels for one label stock
#[derive(Debug, Clone)]
pub struct LabelRenderer {
    geometry: LabelGeometry,
    fonts: FontSet,
    format: ArtifactFormat,
    debug: bool,
}

impl LabelRenderer {
    /// Bitmap renderer with the built-in font
    pub fn new(geometry: LabelGeometry) -> Self {
        Self {
            geometry,
            fonts: FontSet::builtin(),
            format: ArtifactFormat::Bitmap,
            debug: false,
        }
    }

    pub fn with_fonts(mut self, fonts: FontSet) -> Self {
        self.fonts = fonts;
        self
    }

    pub fn with_format(mut self, format: ArtifactFormat) -> Self {
        self.format = format;
        self
    }

    /// Draw full-label and safe-margin outlines
    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn geometry(&self) -> &LabelGeometry {
        &self.geometry
    }

    pub fn format(&self) -> ArtifactFormat {
        self.format
    }

    /// Text placement without drawing anything
    pub fn layout(&self, first_name: &str, last_name: &str) -> LabelLayout {
        self.geometry.layout(first_name, last_name)
    }

    /// Render one label.
    ///
    /// A panic inside the drawing code is reported as
    /// [`RenderError::Panicked`] instead of unwinding into the caller.
    #[instrument(skip(self), fields(format = ?self.format))]
    pub fn render(&self, first_name: &str, last_name: &str) -> Result<RenderedLabel, RenderError> {
        let layout = self.layout(first_name, last_name);

        let drawn = catch_unwind(AssertUnwindSafe(|| match self.format {
            ArtifactFormat::Bitmap => LabelContent::Bitmap(raster::render_bitmap(
                &self.geometry,
                &layout,
                &self.fonts,
                self.debug,
            )),
            ArtifactFormat::Document => {
                LabelContent::Document(pdf::render_document(&self.geometry, &layout, self.debug))
            }
        }));

        let content = drawn.map_err(|panic_info| {
            let msg = if let Some(s) = panic_info.downcast_ref::<&str>() {
                (*s).to_string()
            } else if let Some(s) = panic_info.downcast_ref::<String>() {
                s.clone()
            } else {
                "Unknown panic".to_string()
            };
            RenderError::Panicked(msg)
        })?;

        debug!(
            first_anchor = ?layout.first.anchor,
            last_anchor = ?layout.last.anchor,
            "Label rendered"
        );

        Ok(RenderedLabel {
            geometry: self.geometry,
            layout,
            content,
        })
    }
}

/// Drawn label content, still in memory
#[derive(Debug, Clone, PartialEq)]
pub enum LabelContent {
    Bitmap(GrayImage),
    /// Complete PDF file bytes
    Document(Vec<u8>),
}

/// Output of [`LabelRenderer::render`]
#[derive(Debug, Clone)]
pub struct RenderedLabel {
    geometry: LabelGeometry,
    layout: LabelLayout,
    content: LabelContent,
}

impl RenderedLabel {
    /// Where each line was placed
    pub fn layout(&self) -> &LabelLayout {
        &self.layout
    }

    pub fn content(&self) -> &LabelContent {
        &self.content
    }

    pub fn format(&self) -> ArtifactFormat {
        match self.content {
            LabelContent::Bitmap(_) => ArtifactFormat::Bitmap,
            LabelContent::Document(_) => ArtifactFormat::Document,
        }
    }

    /// Encoded file bytes (PNG or PDF)
    pub fn encode(&self) -> Result<Vec<u8>, RenderError> {
        match &self.content {
            LabelContent::Bitmap(img) => {
                let mut buf = Cursor::new(Vec::new());
                img.write_to(&mut buf, ImageFormat::Png)?;
                Ok(buf.into_inner())
            }
            LabelContent::Document(bytes) => Ok(bytes.clone()),
        }
    }

    /// Write the label to a fresh file in `dir`.
    ///
    /// The returned artifact owns the file and removes it when discarded or
    /// dropped.
    pub fn write_to(self, dir: &Path, title: &str) -> Result<PrintArtifact, RenderError> {
        let format = self.format();
        let bytes = self.encode()?;

        let mut file = tempfile::Builder::new()
            .prefix("label-")
            .suffix(format.extension())
            .tempfile_in(dir)?;
        file.write_all(&bytes)?;
        file.as_file().sync_all()?;
        let path = file.into_temp_path();

        let pixels = match self.content {
            LabelContent::Bitmap(img) => Some(img),
            LabelContent::Document(_) => None,
        };

        Ok(PrintArtifact::new(
            path,
            format,
            pixels,
            title.to_string(),
            (self.geometry.width_mm(), self.geometry.height_mm()),
        ))
    }
}
