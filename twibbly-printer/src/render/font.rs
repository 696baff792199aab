//! Font loading and line rasterization
//!
//! Scalable fonts are rendered through ab_glyph into anti-aliased coverage
//! buffers. When no scalable font can be loaded the built-in Spleen 12x24
//! bitmap font is scaled to the requested height, so a label always gets
//! some text.

use crate::geometry::FontWeight;
use ab_glyph::{Font, FontArc, ScaleFont};
use spleen_font::{FONT_12X24, PSF2Font};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

const SPLEEN_WIDTH: usize = 12;
const SPLEEN_HEIGHT: usize = 24;

#[cfg(windows)]
const SYSTEM_REGULAR: &[&str] = &[
    r"C:\Windows\Fonts\arial.ttf",
    r"C:\Windows\Fonts\segoeui.ttf",
];
#[cfg(windows)]
const SYSTEM_BOLD: &[&str] = &[
    r"C:\Windows\Fonts\arialbd.ttf",
    r"C:\Windows\Fonts\segoeuib.ttf",
];

#[cfg(target_os = "macos")]
const SYSTEM_REGULAR: &[&str] = &[
    "/System/Library/Fonts/Supplemental/Arial.ttf",
    "/Library/Fonts/Arial.ttf",
];
#[cfg(target_os = "macos")]
const SYSTEM_BOLD: &[&str] = &[
    "/System/Library/Fonts/Supplemental/Arial Bold.ttf",
    "/Library/Fonts/Arial Bold.ttf",
];

#[cfg(not(any(windows, target_os = "macos")))]
const SYSTEM_REGULAR: &[&str] = &[
    "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/TTF/DejaVuSans.ttf",
    "/usr/share/fonts/truetype/liberation/LiberationSans-Regular.ttf",
];
#[cfg(not(any(windows, target_os = "macos")))]
const SYSTEM_BOLD: &[&str] = &[
    "/usr/share/fonts/truetype/dejavu/DejaVuSans-Bold.ttf",
    "/usr/share/fonts/TTF/DejaVuSans-Bold.ttf",
    "/usr/share/fonts/truetype/liberation/LiberationSans-Bold.ttf",
];

/// A single typeface
#[derive(Clone)]
pub enum FontFace {
    Scalable(FontArc),
    /// Spleen bitmap font compiled into the binary
    Builtin,
}

impl std::fmt::Debug for FontFace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FontFace::Scalable(_) => f.write_str("Scalable"),
            FontFace::Builtin => f.write_str("Builtin"),
        }
    }
}

/// Regular + bold faces used for a label
#[derive(Debug, Clone)]
pub struct FontSet {
    regular: FontFace,
    bold: FontFace,
}

impl Default for FontSet {
    fn default() -> Self {
        Self::builtin()
    }
}

impl FontSet {
    /// Only the built-in bitmap font
    pub fn builtin() -> Self {
        Self {
            regular: FontFace::Builtin,
            bold: FontFace::Builtin,
        }
    }

    /// Load explicit font files, falling back to system fonts, then to the
    /// built-in font. Never fails.
    pub fn load(regular: Option<&Path>, bold: Option<&Path>) -> Self {
        let regular_face = load_face(regular, SYSTEM_REGULAR);
        // A missing bold face borrows the regular one before going bitmap
        let bold_face = match load_face(bold, SYSTEM_BOLD) {
            FontFace::Builtin => regular_face.clone(),
            face => face,
        };

        let set = Self {
            regular: regular_face,
            bold: bold_face,
        };
        if set.is_builtin() {
            warn!("No scalable font found, labels will use the built-in bitmap font");
        }
        set
    }

    pub fn face(&self, weight: FontWeight) -> &FontFace {
        match weight {
            FontWeight::Regular => &self.regular,
            FontWeight::Bold => &self.bold,
        }
    }

    pub fn is_builtin(&self) -> bool {
        matches!(self.regular, FontFace::Builtin) && matches!(self.bold, FontFace::Builtin)
    }
}

fn load_face(explicit: Option<&Path>, candidates: &[&str]) -> FontFace {
    let paths = explicit
        .map(Path::to_path_buf)
        .into_iter()
        .chain(candidates.iter().map(PathBuf::from));

    for path in paths {
        let bytes = match std::fs::read(&path) {
            Ok(b) => b,
            Err(_) => continue,
        };
        match FontArc::try_from_vec(bytes) {
            Ok(font) => {
                debug!(path = %path.display(), "Loaded scalable font");
                return FontFace::Scalable(font);
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Invalid font file, skipping");
            }
        }
    }

    FontFace::Builtin
}

/// Rasterized line of text as an ink coverage buffer.
pub struct Coverage {
    pub width: usize,
    pub height: usize,
    /// 0.0 = paper, 1.0 = full ink
    pub data: Vec<f32>,
}

impl Coverage {
    fn blank(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            data: vec![0.0; width * height],
        }
    }

    fn add(&mut self, x: i32, y: i32, value: f32) {
        if x >= 0 && y >= 0 && (x as usize) < self.width && (y as usize) < self.height {
            let idx = y as usize * self.width + x as usize;
            self.data[idx] = (self.data[idx] + value).min(1.0);
        }
    }
}

/// Rasterize one line at the given pixel height.
///
/// The coverage box spans the full line height (ascent to descent), so
/// centring the box centres the line.
pub fn rasterize_line(face: &FontFace, text: &str, pixel_height: f32) -> Coverage {
    let pixel_height = pixel_height.max(1.0);
    match face {
        FontFace::Scalable(font) => rasterize_scalable(font, text, pixel_height),
        FontFace::Builtin => rasterize_builtin(text, pixel_height),
    }
}

fn rasterize_scalable(font: &FontArc, text: &str, pixel_height: f32) -> Coverage {
    let scaled = font.as_scaled(pixel_height);

    let mut glyphs = Vec::new();
    let mut caret_x = 0.0f32;
    let mut previous = None;

    for ch in text.chars() {
        let glyph_id = font.glyph_id(ch);
        if let Some(prev) = previous {
            caret_x += scaled.kern(prev, glyph_id);
        }
        glyphs.push((glyph_id, caret_x));
        caret_x += scaled.h_advance(glyph_id);
        previous = Some(glyph_id);
    }

    let ascent = scaled.ascent();
    let descent = scaled.descent();
    let width = (caret_x.ceil() as usize).max(1);
    let height = ((ascent - descent).ceil() as usize).max(1);
    let mut coverage = Coverage::blank(width, height);

    for &(glyph_id, glyph_x) in &glyphs {
        let glyph =
            glyph_id.with_scale_and_position(pixel_height, ab_glyph::point(glyph_x, ascent));

        if let Some(outlined) = font.outline_glyph(glyph) {
            let bounds = outlined.px_bounds();
            outlined.draw(|px, py, value| {
                let x = px as i32 + bounds.min.x as i32;
                let y = py as i32 + bounds.min.y as i32;
                coverage.add(x, y, value);
            });
        }
    }

    coverage
}

fn rasterize_builtin(text: &str, pixel_height: f32) -> Coverage {
    let cell_h = (pixel_height.round() as usize).max(1);
    let cell_w = ((pixel_height * SPLEEN_WIDTH as f32 / SPLEEN_HEIGHT as f32).round() as usize)
        .max(1);
    let chars: Vec<char> = text.chars().collect();
    let mut coverage = Coverage::blank((cell_w * chars.len()).max(1), cell_h);

    let mut font = PSF2Font::new(FONT_12X24).ok();

    for (i, ch) in chars.iter().enumerate() {
        let bitmap = match font.as_mut() {
            Some(f) => spleen_bitmap(f, *ch),
            None => None,
        }
        .unwrap_or_else(box_glyph);

        let origin_x = i * cell_w;
        for dy in 0..cell_h {
            let sy = dy * SPLEEN_HEIGHT / cell_h;
            for dx in 0..cell_w {
                let sx = dx * SPLEEN_WIDTH / cell_w;
                if bitmap[sy * SPLEEN_WIDTH + sx] {
                    coverage.add((origin_x + dx) as i32, dy as i32, 1.0);
                }
            }
        }
    }

    coverage
}

fn spleen_bitmap(font: &mut PSF2Font, ch: char) -> Option<Vec<bool>> {
    let utf8 = ch.to_string();
    let glyph = font.glyph_for_utf8(utf8.as_bytes())?;

    let mut bitmap = vec![false; SPLEEN_WIDTH * SPLEEN_HEIGHT];
    for (row_y, row) in glyph.enumerate() {
        for (col_x, on) in row.enumerate() {
            if row_y < SPLEEN_HEIGHT && col_x < SPLEEN_WIDTH {
                bitmap[row_y * SPLEEN_WIDTH + col_x] = on;
            }
        }
    }
    Some(bitmap)
}

/// Hollow box for characters the bitmap font lacks
fn box_glyph() -> Vec<bool> {
    let mut bitmap = vec![false; SPLEEN_WIDTH * SPLEEN_HEIGHT];
    for y in 4..SPLEEN_HEIGHT - 4 {
        for x in 1..SPLEEN_WIDTH - 1 {
            let edge = y == 4 || y == SPLEEN_HEIGHT - 5 || x == 1 || x == SPLEEN_WIDTH - 2;
            bitmap[y * SPLEEN_WIDTH + x] = edge;
        }
    }
    bitmap
}
