//! WinAnsi encoding utilities for PDF standard fonts
//!
//! The PDF label uses the built-in Helvetica faces with WinAnsiEncoding.
//! This module provides utilities for:
//! - Converting UTF-8 names to WinAnsi bytes (unmappable chars become `?`)
//! - Measuring Helvetica string widths so lines can be centred

/// Helvetica advance widths for 0x20..=0x7E, in 1/1000 em
const HELVETICA: [u16; 95] = [
    278, 278, 355, 556, 556, 889, 667, 191, 333, 333, 389, 584, 278, 333, 278, 278, // ' '../
    556, 556, 556, 556, 556, 556, 556, 556, 556, 556, // 0-9
    278, 278, 584, 584, 584, 556, 1015, // :..@
    667, 667, 722, 722, 667, 611, 778, 722, 278, 500, 667, 556, 833, // A-M
    722, 778, 667, 778, 722, 667, 611, 722, 667, 944, 667, 667, 611, // N-Z
    278, 278, 278, 469, 556, 333, // [..`
    556, 556, 500, 556, 556, 278, 556, 556, 222, 222, 500, 222, 833, // a-m
    556, 556, 556, 556, 333, 500, 278, 556, 500, 722, 500, 500, 500, // n-z
    334, 260, 334, 584, // {..~
];

/// Helvetica-Bold advance widths for 0x20..=0x7E, in 1/1000 em
const HELVETICA_BOLD: [u16; 95] = [
    278, 333, 474, 556, 556, 889, 722, 238, 333, 333, 389, 584, 278, 333, 278, 278, // ' '../
    556, 556, 556, 556, 556, 556, 556, 556, 556, 556, // 0-9
    333, 333, 584, 584, 584, 611, 975, // :..@
    722, 722, 722, 722, 667, 611, 778, 722, 278, 556, 722, 611, 833, // A-M
    722, 778, 667, 778, 722, 667, 611, 722, 667, 944, 667, 667, 611, // N-Z
    333, 278, 333, 584, 556, 333, // [..`
    556, 611, 556, 611, 556, 333, 611, 611, 278, 278, 556, 278, 889, // a-m
    611, 611, 611, 611, 389, 556, 333, 611, 556, 778, 556, 556, 500, // n-z
    389, 280, 389, 584, // {..~
];

/// Width used for accented Latin-1 letters and other upper-half bytes
const UPPER_HALF_WIDTH: u16 = 556;

/// Encode text as WinAnsi (Windows-1252) bytes
pub fn to_win_ansi(s: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(s.len());
    let mut buf = [0u8; 4];
    for c in s.chars() {
        let (bytes, _, unmappable) = encoding_rs::WINDOWS_1252.encode(c.encode_utf8(&mut buf));
        if unmappable || bytes.len() != 1 {
            out.push(b'?');
        } else {
            out.push(bytes[0]);
        }
    }
    out
}

/// Width of WinAnsi bytes in 1/1000 em
pub fn helvetica_width(bytes: &[u8], bold: bool) -> u32 {
    let table = if bold { &HELVETICA_BOLD } else { &HELVETICA };
    bytes
        .iter()
        .map(|&b| match b {
            0x20..=0x7E => table[(b - 0x20) as usize] as u32,
            0x80..=0xFF => UPPER_HALF_WIDTH as u32,
            _ => 0,
        })
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_win_ansi() {
        assert_eq!(to_win_ansi("Doe"), b"Doe".to_vec());
        assert_eq!(to_win_ansi("Zoë"), vec![b'Z', b'o', 0xEB]);
        assert_eq!(to_win_ansi("€"), vec![0x80]);
        assert_eq!(to_win_ansi("李"), vec![b'?']);
    }

    #[test]
    fn test_helvetica_width() {
        assert_eq!(helvetica_width(b"John", false), 500 + 556 + 556 + 556);
        assert_eq!(helvetica_width(b"John", true), 556 + 611 + 611 + 611);
        assert_eq!(helvetica_width(b"", true), 0);
    }
}
