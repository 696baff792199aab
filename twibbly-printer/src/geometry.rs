//! Physical label geometry and text layout
//!
//! All layout coordinates are millimetres in a y-up frame whose origin is
//! the bottom-left corner of the *logical* layout box. For a rotated label
//! the logical box is the physical label turned 90°, so its width is the
//! physical height.

use crate::error::GeometryError;
use serde::{Deserialize, Serialize};

/// Vertical anchor of the first name, as a fraction of the safe height
pub const FIRST_LINE_RATIO: f32 = 0.65;
/// Vertical anchor of the last name, as a fraction of the safe height
pub const LAST_LINE_RATIO: f32 = 0.35;
/// First-name font size, as a fraction of the layout height
pub const LARGE_FONT_RATIO: f32 = 0.25;
/// Last-name font size, as a fraction of the layout height
pub const SMALL_FONT_RATIO: f32 = 0.15;

pub const DEFAULT_DPI: f32 = 300.0;

const MM_PER_INCH: f32 = 25.4;
const PT_PER_INCH: f32 = 72.0;

/// How text sits on the physical label
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Orientation {
    /// Text runs along the physical width
    #[default]
    Upright,
    /// Text runs along the physical height (frame rotated 90° clockwise)
    Rotated,
}

/// Axis-aligned rectangle in millimetres
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl Rect {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn right(&self) -> f32 {
        self.x + self.width
    }

    pub fn top(&self) -> f32 {
        self.y + self.height
    }

    pub fn center_x(&self) -> f32 {
        self.x + self.width / 2.0
    }

    /// `other` lies inside `self` without touching any edge
    pub fn strictly_contains(&self, other: &Rect) -> bool {
        other.x > self.x
            && other.y > self.y
            && other.right() < self.right()
            && other.top() < self.top()
    }

    /// Inset on all four sides
    pub fn inset(&self, by: f32) -> Rect {
        Rect::new(
            self.x + by,
            self.y + by,
            self.width - 2.0 * by,
            self.height - 2.0 * by,
        )
    }
}

/// A point in millimetres (y-up)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

/// Typeface weight for a text line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FontWeight {
    Regular,
    Bold,
}

/// One centred line of text
#[derive(Debug, Clone, PartialEq)]
pub struct TextLine {
    pub text: String,
    /// Centre of the line: horizontal midpoint and vertical middle
    pub anchor: Point,
    /// Proportional size; renderers shrink a line that would overflow the
    /// safe width
    pub font_size_mm: f32,
    pub weight: FontWeight,
}

impl TextLine {
    pub fn font_size_pt(&self) -> f32 {
        mm_to_pt(self.font_size_mm)
    }
}

/// Resolved layout for one label, in the logical frame
#[derive(Debug, Clone, PartialEq)]
pub struct LabelLayout {
    pub full: Rect,
    pub safe: Rect,
    pub first: TextLine,
    pub last: TextLine,
}

/// Validated physical geometry of a label
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LabelGeometry {
    width_mm: f32,
    height_mm: f32,
    margin_mm: f32,
    dpi: f32,
    orientation: Orientation,
}

impl LabelGeometry {
    /// Create an upright geometry at the default DPI
    pub fn new(width_mm: f32, height_mm: f32, margin_mm: f32) -> Result<Self, GeometryError> {
        if !(width_mm.is_finite() && height_mm.is_finite()) || width_mm <= 0.0 || height_mm <= 0.0
        {
            return Err(GeometryError::NonPositiveSize {
                width_mm,
                height_mm,
            });
        }

        let min_side_mm = width_mm.min(height_mm);
        if !margin_mm.is_finite() || margin_mm < 0.0 || margin_mm * 2.0 >= min_side_mm {
            return Err(GeometryError::MarginTooLarge {
                margin_mm,
                min_side_mm,
            });
        }

        Ok(Self {
            width_mm,
            height_mm,
            margin_mm,
            dpi: DEFAULT_DPI,
            orientation: Orientation::Upright,
        })
    }

    /// Set raster resolution
    pub fn with_dpi(mut self, dpi: f32) -> Result<Self, GeometryError> {
        if !dpi.is_finite() || dpi <= 0.0 {
            return Err(GeometryError::InvalidDpi(dpi));
        }
        self.dpi = dpi;
        Ok(self)
    }

    /// Set orientation
    pub fn with_orientation(mut self, orientation: Orientation) -> Self {
        self.orientation = orientation;
        self
    }

    pub fn width_mm(&self) -> f32 {
        self.width_mm
    }

    pub fn height_mm(&self) -> f32 {
        self.height_mm
    }

    pub fn margin_mm(&self) -> f32 {
        self.margin_mm
    }

    pub fn dpi(&self) -> f32 {
        self.dpi
    }

    pub fn orientation(&self) -> Orientation {
        self.orientation
    }

    /// Size of the logical layout box (width, height)
    pub fn layout_size_mm(&self) -> (f32, f32) {
        match self.orientation {
            Orientation::Upright => (self.width_mm, self.height_mm),
            Orientation::Rotated => (self.height_mm, self.width_mm),
        }
    }

    /// Physical label size in device pixels at the configured DPI
    pub fn physical_size_px(&self) -> (u32, u32) {
        (
            mm_to_px(self.width_mm, self.dpi),
            mm_to_px(self.height_mm, self.dpi),
        )
    }

    /// Full label region in the logical frame
    pub fn full_rect(&self) -> Rect {
        let (w, h) = self.layout_size_mm();
        Rect::new(0.0, 0.0, w, h)
    }

    /// Region where content is guaranteed not to be clipped
    pub fn safe_rect(&self) -> Rect {
        self.full_rect().inset(self.margin_mm)
    }

    /// Place both names inside the safe region.
    ///
    /// Anchors are measured from the safe box; font sizes from the full
    /// layout height.
    pub fn layout(&self, first_name: &str, last_name: &str) -> LabelLayout {
        let full = self.full_rect();
        let safe = self.safe_rect();
        let center_x = safe.center_x();

        let first = TextLine {
            text: first_name.trim().to_string(),
            anchor: Point {
                x: center_x,
                y: safe.y + FIRST_LINE_RATIO * safe.height,
            },
            font_size_mm: LARGE_FONT_RATIO * full.height,
            weight: FontWeight::Bold,
        };
        let last = TextLine {
            text: last_name.trim().to_string(),
            anchor: Point {
                x: center_x,
                y: safe.y + LAST_LINE_RATIO * safe.height,
            },
            font_size_mm: SMALL_FONT_RATIO * full.height,
            weight: FontWeight::Regular,
        };

        LabelLayout {
            full,
            safe,
            first,
            last,
        }
    }
}

pub fn mm_to_px(mm: f32, dpi: f32) -> u32 {
    if !mm.is_finite() || mm <= 0.0 {
        return 0;
    }
    let px = mm * dpi / MM_PER_INCH;
    px.round().max(1.0) as u32
}

pub fn mm_to_pt(mm: f32) -> f32 {
    mm * PT_PER_INCH / MM_PER_INCH
}
