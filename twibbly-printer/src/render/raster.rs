//! Bitmap label rendering
//!
//! Draws the layout into a grayscale canvas the size of the logical frame,
//! then turns it 90° clockwise for rotated labels so the returned image
//! always has the physical label's pixel dimensions.

use super::font::{Coverage, FontFace, FontSet, rasterize_line};
use crate::geometry::{LabelGeometry, LabelLayout, Orientation, Rect, TextLine, mm_to_px};
use image::{GrayImage, Luma, imageops};

const PAPER: u8 = 255;
const OUTLINE: u8 = 0;

pub(crate) fn render_bitmap(
    geometry: &LabelGeometry,
    layout: &LabelLayout,
    fonts: &FontSet,
    debug: bool,
) -> GrayImage {
    let dpi = geometry.dpi();
    let px_per_mm = dpi / 25.4;
    let canvas_w = mm_to_px(layout.full.width, dpi).max(1);
    let canvas_h = mm_to_px(layout.full.height, dpi).max(1);

    let mut canvas = GrayImage::from_pixel(canvas_w, canvas_h, Luma([PAPER]));

    if debug {
        outline(&mut canvas, &layout.full, px_per_mm);
        outline(&mut canvas, &layout.safe, px_per_mm);
    }

    // One pixel of slack on each side against rounding of the left edge
    let max_width = (layout.safe.width * px_per_mm).floor() - 2.0;
    for line in [&layout.first, &layout.last] {
        draw_line(&mut canvas, line, fonts, px_per_mm, max_width);
    }

    match geometry.orientation() {
        Orientation::Upright => canvas,
        Orientation::Rotated => imageops::rotate90(&canvas),
    }
}

fn draw_line(
    canvas: &mut GrayImage,
    line: &TextLine,
    fonts: &FontSet,
    px_per_mm: f32,
    max_width: f32,
) {
    if line.text.is_empty() {
        return;
    }

    let pixel_height = line.font_size_mm * px_per_mm;
    let coverage = fit_line(fonts.face(line.weight), &line.text, pixel_height, max_width);

    // Canvas rows grow downwards, layout y grows upwards
    let center_x = line.anchor.x * px_per_mm;
    let center_y = canvas.height() as f32 - line.anchor.y * px_per_mm;
    let left = (center_x - coverage.width as f32 / 2.0).round() as i64;
    let top = (center_y - coverage.height as f32 / 2.0).round() as i64;

    for cy in 0..coverage.height {
        for cx in 0..coverage.width {
            let ink = coverage.data[cy * coverage.width + cx];
            if ink <= 0.0 {
                continue;
            }
            let x = left + cx as i64;
            let y = top + cy as i64;
            if x < 0 || y < 0 || x >= canvas.width() as i64 || y >= canvas.height() as i64 {
                continue;
            }
            let shade = (PAPER as f32 * (1.0 - ink)).round() as u8;
            let pixel = canvas.get_pixel_mut(x as u32, y as u32);
            pixel.0[0] = pixel.0[0].min(shade);
        }
    }
}

/// Rasterize at `pixel_height`, shrinking until the line is at most
/// `max_width` pixels wide
fn fit_line(face: &FontFace, text: &str, pixel_height: f32, max_width: f32) -> Coverage {
    let mut height = pixel_height;
    let mut coverage = rasterize_line(face, text, height);
    for _ in 0..8 {
        let width = coverage.width as f32;
        if width <= max_width || height <= 1.0 {
            break;
        }
        height = (height * max_width / width * 0.98).max(1.0);
        coverage = rasterize_line(face, text, height);
    }
    coverage
}

/// One-pixel rectangle outline (debug only)
fn outline(canvas: &mut GrayImage, rect: &Rect, px_per_mm: f32) {
    let (w, h) = (canvas.width(), canvas.height());
    let clamp_x = |mm: f32| ((mm * px_per_mm).round() as i64).clamp(0, w as i64 - 1) as u32;
    let clamp_y =
        |mm: f32| ((h as f32 - mm * px_per_mm).round() as i64).clamp(0, h as i64 - 1) as u32;

    let (x0, x1) = (clamp_x(rect.x), clamp_x(rect.right()));
    let (y0, y1) = (clamp_y(rect.top()), clamp_y(rect.y));

    for x in x0..=x1 {
        canvas.put_pixel(x, y0, Luma([OUTLINE]));
        canvas.put_pixel(x, y1, Luma([OUTLINE]));
    }
    for y in y0..=y1 {
        canvas.put_pixel(x0, y, Luma([OUTLINE]));
        canvas.put_pixel(x1, y, Luma([OUTLINE]));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ink_bounds(img: &GrayImage) -> Option<(u32, u32, u32, u32)> {
        let mut bounds: Option<(u32, u32, u32, u32)> = None;
        for (x, y, p) in img.enumerate_pixels() {
            if p.0[0] < PAPER {
                bounds = Some(match bounds {
                    None => (x, y, x, y),
                    Some((a, b, c, d)) => (a.min(x), b.min(y), c.max(x), d.max(y)),
                });
            }
        }
        bounds
    }

    #[test]
    fn test_upright_has_physical_size() {
        let geometry = LabelGeometry::new(52.0, 60.0, 3.0).unwrap();
        let layout = geometry.layout("John", "Doe");
        let img = render_bitmap(&geometry, &layout, &FontSet::builtin(), false);
        assert_eq!((img.width(), img.height()), geometry.physical_size_px());
    }

    #[test]
    fn test_rotated_has_physical_size() {
        let geometry = LabelGeometry::new(36.0, 89.0, 2.0)
            .unwrap()
            .with_dpi(200.0)
            .unwrap()
            .with_orientation(Orientation::Rotated);
        let layout = geometry.layout("Mee", "Youu");
        let img = render_bitmap(&geometry, &layout, &FontSet::builtin(), false);
        assert_eq!((img.width(), img.height()), geometry.physical_size_px());
    }

    #[test]
    fn test_text_stays_inside_safe_region() {
        let geometry = LabelGeometry::new(52.0, 60.0, 3.0).unwrap();
        let layout = geometry.layout("Ann", "Lee");
        let img = render_bitmap(&geometry, &layout, &FontSet::builtin(), false);

        let margin_px = mm_to_px(3.0, geometry.dpi());
        let (x0, y0, x1, y1) = ink_bounds(&img).unwrap();
        assert!(x0 >= margin_px && y0 >= margin_px);
        assert!(x1 < img.width() - margin_px && y1 < img.height() - margin_px);
    }

    #[test]
    fn test_long_names_stay_inside_safe_region() {
        for orientation in [Orientation::Upright, Orientation::Rotated] {
            let geometry = LabelGeometry::new(52.0, 60.0, 3.0)
                .unwrap()
                .with_orientation(orientation);
            let layout = geometry.layout("Christopher", "Higgs-Montgomery");
            let img = render_bitmap(&geometry, &layout, &FontSet::builtin(), false);

            let margin_px = mm_to_px(3.0, geometry.dpi());
            let (x0, y0, x1, y1) = ink_bounds(&img).unwrap();
            assert!(x0 >= margin_px && y0 >= margin_px, "{orientation:?}");
            assert!(
                x1 < img.width() - margin_px && y1 < img.height() - margin_px,
                "{orientation:?}"
            );
        }
    }

    #[test]
    fn test_short_name_keeps_proportional_size() {
        let face = FontFace::Builtin;
        let fitted = fit_line(&face, "Ann", 177.0, 500.0);
        assert_eq!(fitted.height, 177);

        let shrunk = fit_line(&face, "Christopher", 177.0, 500.0);
        assert!(shrunk.width <= 500);
        assert!(shrunk.height < 177);
    }

    #[test]
    fn test_debug_outline_does_not_move_text() {
        let geometry = LabelGeometry::new(52.0, 60.0, 3.0).unwrap();
        let layout = geometry.layout("John", "Doe");
        let plain = render_bitmap(&geometry, &layout, &FontSet::builtin(), false);
        let debug = render_bitmap(&geometry, &layout, &FontSet::builtin(), true);

        // Every inked pixel of the plain render is identical in the debug render
        for (x, y, p) in plain.enumerate_pixels() {
            if p.0[0] < PAPER {
                assert_eq!(debug.get_pixel(x, y).0[0], p.0[0]);
            }
        }
        assert_eq!(debug.get_pixel(0, 0).0[0], OUTLINE);
    }
}
