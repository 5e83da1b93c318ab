//! Content stream construction.
//!
//! PDF Spec: Section 8 - Graphics, Section 9.4 - Text Objects

use super::format_real;

/// Helvetica advance widths for ASCII 32..=126, in 1/1000 em.
const HELVETICA_WIDTHS: [u16; 95] = [
    278, 278, 355, 556, 556, 889, 667, 191, 333, 333, 389, 584, 278, 333, 278, 278, // ' '..'/'
    556, 556, 556, 556, 556, 556, 556, 556, 556, 556, 278, 278, 584, 584, 584, 556, // '0'..'?'
    1015, 667, 667, 722, 722, 667, 611, 778, 722, 278, 500, 667, 556, 833, 722, 778, // '@'..'O'
    667, 778, 722, 667, 611, 722, 667, 944, 667, 667, 611, 278, 278, 278, 469, 556, // 'P'..'_'
    333, 556, 556, 500, 556, 556, 278, 556, 556, 222, 222, 500, 222, 833, 556, 556, // '`'..'o'
    556, 556, 333, 500, 278, 556, 500, 722, 500, 500, 500, 334, 260, 334, 584, // 'p'..'~'
];

/// Approximate rendered width of `text` in Helvetica (bold is ~8% wider).
pub fn text_width(text: &str, size: f64, bold: bool) -> f64 {
    let units: u32 = text
        .chars()
        .map(|c| match u32::from(c) {
            code @ 32..=126 => u32::from(HELVETICA_WIDTHS[(code - 32) as usize]),
            _ => 556,
        })
        .sum();
    let scale = if bold { 1.08 } else { 1.0 };
    f64::from(units) * size / 1000.0 * scale
}

/// Encode text for a simple font with `/WinAnsiEncoding`.
/// Characters outside the encoding become `?`.
pub fn winansi_encode(text: &str) -> Vec<u8> {
    text.chars()
        .map(|c| match c {
            ' '..='~' => c as u8,
            '\u{A0}'..='\u{FF}' => c as u8,
            '\u{20AC}' => 0x80,
            '\u{2026}' => 0x85,
            '\u{2018}' => 0x91,
            '\u{2019}' => 0x92,
            '\u{201C}' => 0x93,
            '\u{201D}' => 0x94,
            '\u{2022}' => 0x95,
            '\u{2013}' => 0x96,
            '\u{2014}' => 0x97,
            _ => b'?',
        })
        .collect()
}

fn escape_text(bytes: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(bytes.len() + 2);
    out.push(b'(');
    for &b in bytes {
        if matches!(b, b'(' | b')' | b'\\') {
            out.push(b'\\');
        }
        out.push(b);
    }
    out.push(b')');
    out
}

/// Fluent builder for page content operators.
#[derive(Debug, Default, Clone)]
pub struct ContentBuilder {
    ops: Vec<u8>,
}

impl ContentBuilder {
    /// Create an empty content stream.
    pub fn new() -> Self {
        Self::default()
    }

    fn op(&mut self, operands: &[f64], operator: &str) -> &mut Self {
        for v in operands {
            self.ops.extend_from_slice(format_real(*v).as_bytes());
            self.ops.push(b' ');
        }
        self.ops.extend_from_slice(operator.as_bytes());
        self.ops.push(b'\n');
        self
    }

    /// `q`
    pub fn save_state(&mut self) -> &mut Self {
        self.op(&[], "q")
    }

    /// `Q`
    pub fn restore_state(&mut self) -> &mut Self {
        self.op(&[], "Q")
    }

    /// `rg`: non-stroking RGB colour.
    pub fn fill_rgb(&mut self, r: f64, g: f64, b: f64) -> &mut Self {
        self.op(&[r, g, b], "rg")
    }

    /// `RG`: stroking RGB colour.
    pub fn stroke_rgb(&mut self, r: f64, g: f64, b: f64) -> &mut Self {
        self.op(&[r, g, b], "RG")
    }

    /// `w`
    pub fn line_width(&mut self, width: f64) -> &mut Self {
        self.op(&[width], "w")
    }

    /// `re`
    pub fn rect(&mut self, x: f64, y: f64, width: f64, height: f64) -> &mut Self {
        self.op(&[x, y, width, height], "re")
    }

    /// `f`
    pub fn fill(&mut self) -> &mut Self {
        self.op(&[], "f")
    }

    /// `B`: fill and stroke.
    pub fn fill_stroke(&mut self) -> &mut Self {
        self.op(&[], "B")
    }

    /// One line of text at (`x`, `y`) in font resource `font`.
    pub fn text(&mut self, font: &str, size: f64, x: f64, y: f64, text: &str) -> &mut Self {
        self.ops.extend_from_slice(b"BT\n/");
        self.ops.extend_from_slice(font.as_bytes());
        self.ops.push(b' ');
        self.op(&[size], "Tf");
        self.op(&[x, y], "Td");
        self.ops.extend_from_slice(&escape_text(&winansi_encode(text)));
        self.ops.extend_from_slice(b" Tj\nET\n");
        self
    }

    /// Raw bytes of the content stream.
    pub fn build(&self) -> Vec<u8> {
        self.ops.clone()
    }
}
