//! Single-page PDF label
//!
//! The page is the physical label. Rotated labels draw into a frame moved
//! to the top edge and turned 90° clockwise, which makes the logical box
//! `height x width`.

use crate::encoding::{helvetica_width, to_win_ansi};
use crate::geometry::{FontWeight, LabelGeometry, LabelLayout, Orientation, Rect, mm_to_pt};
use std::io::Write;

/// Helvetica cap height and descender, 1/1000 em
const ASCENT: f32 = 718.0;
const DESCENT: f32 = -207.0;

const BOLD_FONT: &str = "F1";
const REGULAR_FONT: &str = "F2";

pub(crate) fn render_document(
    geometry: &LabelGeometry,
    layout: &LabelLayout,
    debug: bool,
) -> Vec<u8> {
    let page_w = mm_to_pt(geometry.width_mm());
    let page_h = mm_to_pt(geometry.height_mm());
    let content = content_stream(geometry.orientation(), page_h, layout, debug);

    let objects: Vec<Vec<u8>> = vec![
        b"<< /Type /Catalog /Pages 2 0 R >>".to_vec(),
        b"<< /Type /Pages /Kids [3 0 R] /Count 1 >>".to_vec(),
        format!(
            "<< /Type /Page /Parent 2 0 R /MediaBox [0 0 {page_w:.2} {page_h:.2}] \
             /Resources << /Font << /{BOLD_FONT} 5 0 R /{REGULAR_FONT} 6 0 R >> >> \
             /Contents 4 0 R >>"
        )
        .into_bytes(),
        stream_object(&content),
        font_object("Helvetica-Bold"),
        font_object("Helvetica"),
    ];

    assemble(&objects)
}

fn content_stream(
    orientation: Orientation,
    page_h: f32,
    layout: &LabelLayout,
    debug: bool,
) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(b"q\n");

    if orientation == Orientation::Rotated {
        // translate(0, H) then rotate(-90)
        out.extend_from_slice(format!("1 0 0 1 0 {page_h:.2} cm\n").as_bytes());
        out.extend_from_slice(b"0 -1 1 0 0 0 cm\n");
    }

    if debug {
        out.extend_from_slice(b"0.3 w 0 G\n");
        outline(&mut out, &layout.full);
        outline(&mut out, &layout.safe);
    }

    for line in [&layout.first, &layout.last] {
        if line.text.is_empty() {
            continue;
        }
        let bytes = to_win_ansi(&line.text);
        let bold = line.weight == FontWeight::Bold;
        let (size, width) = fit_to_width(
            line.font_size_pt(),
            helvetica_width(&bytes, bold),
            mm_to_pt(layout.safe.width),
        );

        let x = mm_to_pt(line.anchor.x) - width / 2.0;
        let baseline = mm_to_pt(line.anchor.y) - size * (ASCENT + DESCENT) / 2000.0;
        let font = if bold { BOLD_FONT } else { REGULAR_FONT };

        let _ = write!(out, "BT /{font} {size:.2} Tf {x:.2} {baseline:.2} Td (");
        escape_into(&mut out, &bytes);
        out.extend_from_slice(b") Tj ET\n");
    }

    out.extend_from_slice(b"Q\n");
    out
}

/// Font size and line width, shrunk so the line fits `max_width`
fn fit_to_width(size: f32, em_width: u32, max_width: f32) -> (f32, f32) {
    let width = em_width as f32 * size / 1000.0;
    if width <= max_width || width <= 0.0 {
        return (size, width);
    }
    let scale = max_width / width;
    (size * scale, max_width)
}

fn outline(out: &mut Vec<u8>, rect: &Rect) {
    let _ = writeln!(
        out,
        "{:.2} {:.2} {:.2} {:.2} re S",
        mm_to_pt(rect.x),
        mm_to_pt(rect.y),
        mm_to_pt(rect.width),
        mm_to_pt(rect.height)
    );
}

fn escape_into(out: &mut Vec<u8>, bytes: &[u8]) {
    for &b in bytes {
        if matches!(b, b'(' | b')' | b'\\') {
            out.push(b'\\');
        }
        out.push(b);
    }
}

fn font_object(base: &str) -> Vec<u8> {
    format!("<< /Type /Font /Subtype /Type1 /BaseFont /{base} /Encoding /WinAnsiEncoding >>")
        .into_bytes()
}

fn stream_object(content: &[u8]) -> Vec<u8> {
    let mut obj = format!("<< /Length {} >>\nstream\n", content.len()).into_bytes();
    obj.extend_from_slice(content);
    obj.extend_from_slice(b"endstream");
    obj
}

/// Number objects from 1, then write the xref table and trailer
fn assemble(objects: &[Vec<u8>]) -> Vec<u8> {
    let mut pdf = b"%PDF-1.4\n%\xE2\xE3\xCF\xD3\n".to_vec();
    let mut offsets = Vec::with_capacity(objects.len());

    for (i, body) in objects.iter().enumerate() {
        offsets.push(pdf.len());
        let _ = writeln!(pdf, "{} 0 obj", i + 1);
        pdf.extend_from_slice(body);
        pdf.extend_from_slice(b"\nendobj\n");
    }

    let xref_at = pdf.len();
    let _ = write!(pdf, "xref\n0 {}\n0000000000 65535 f \n", objects.len() + 1);
    for offset in offsets {
        let _ = write!(pdf, "{offset:010} 00000 n \n");
    }
    let _ = write!(
        pdf,
        "trailer\n<< /Size {} /Root 1 0 R >>\nstartxref\n{xref_at}\n%%EOF\n",
        objects.len() + 1
    );
    pdf
}
