//! # twibbly-printer
//!
//! Name label rendering and OS print spooling - low-level printing only.
//!
//! ## Scope
//!
//! This crate handles HOW to print:
//! - Label geometry (physical size, safe margin, rotation)
//! - Rendering to a grayscale bitmap or a one-page PDF
//! - Spooling through Windows GDI, CUPS (IPP) or an external program
//! - Printer enumeration and name resolution
//!
//! WHAT to print and when (record polling, dedup, retries) lives in
//! `twibbly-daemon`.
//!
//! ## Example
//!
//! ```ignore
//! use twibbly_printer::{BackendOptions, LabelGeometry, LabelRenderer, PrinterRegistry};
//!
//! let geometry = LabelGeometry::new(52.0, 60.0, 3.0)?;
//! let renderer = LabelRenderer::new(geometry);
//!
//! let backend = twibbly_printer::select_backend(None, &BackendOptions::default())?;
//! let registry = PrinterRegistry::new(backend.clone());
//! let printer = registry.resolve(Some("DYMO LabelWriter 450")).await?;
//!
//! let artifact = renderer.render("John", "Doe")?.write_to(&work_dir, "John Doe")?;
//! let result = backend.submit(&artifact, &printer).await;
//! artifact.discard();
//! result?;
//! ```

mod artifact;
mod backend;
mod encoding;
mod error;
mod geometry;
mod registry;
mod render;

// Re-exports
pub use artifact::{ArtifactFormat, PrintArtifact};
pub use backend::{
    BackendKind, BackendOptions, CupsBackend, ExternalBackend, PrintAck, PrintBackend,
    select_backend,
};
pub use error::{GeometryError, PrintError, PrintResult, RenderError};
pub use geometry::{
    FontWeight, LabelGeometry, LabelLayout, Orientation, Point, Rect, TextLine, mm_to_pt,
    mm_to_px,
};
pub use registry::{PrinterIdentity, PrinterRegistry, PrinterSource};
pub use render::{FontFace, FontSet, LabelContent, LabelRenderer, RenderedLabel};

#[cfg(windows)]
pub use backend::GdiBackend;
