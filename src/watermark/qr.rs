//! QR code rendering as vector rectangles.

use crate::error::{Error, Result};
use crate::pdf::writer::ContentBuilder;
use qrcode::{Color, EcLevel, QrCode};

/// Module grid of an encoded QR code.
#[derive(Debug, Clone)]
pub struct QrMatrix {
    width: usize,
    dark: Vec<bool>,
}

impl QrMatrix {
    /// Encode `data`, preferring medium error correction and falling back
    /// to low when the payload is too large.
    pub fn encode(data: &str) -> Result<Self> {
        let code = QrCode::with_error_correction_level(data, EcLevel::M)
            .or_else(|_| QrCode::with_error_correction_level(data, EcLevel::L))
            .map_err(|e| {
                Error::InvalidRequest(format!("QR payload of {} bytes cannot be encoded: {}", data.len(), e))
            })?;
        let dark = code.to_colors().into_iter().map(|c| c == Color::Dark).collect();
        Ok(Self {
            width: code.width(),
            dark,
        })
    }

    /// Modules per side.
    pub fn width(&self) -> usize {
        self.width
    }

    /// Whether the module at column `x`, row `y` (row 0 on top) is dark.
    pub fn is_dark(&self, x: usize, y: usize) -> bool {
        if x >= self.width || y >= self.width {
            return false;
        }
        self.dark.get(y * self.width + x).copied().unwrap_or(false)
    }

    /// Draw the code into the square with lower-left corner (`x`, `y`) and
    /// side `size`, including a one-module quiet zone.
    pub fn draw(&self, content: &mut ContentBuilder, x: f64, y: f64, size: f64) {
        let module = size / (self.width + 2) as f64;
        content
            .save_state()
            .fill_rgb(1.0, 1.0, 1.0)
            .rect(x, y, size, size)
            .fill()
            .fill_rgb(0.0, 0.0, 0.0);
        let top = y + size - module;
        for row in 0..self.width {
            let row_y = top - (row + 1) as f64 * module;
            // Merge horizontal runs of dark modules into one rectangle.
            let mut col = 0;
            while col < self.width {
                if !self.is_dark(col, row) {
                    col += 1;
                    continue;
                }
                let start = col;
                while col < self.width && self.is_dark(col, row) {
                    col += 1;
                }
                content.rect(
                    x + (start + 1) as f64 * module,
                    row_y,
                    (col - start) as f64 * module,
                    module,
                );
            }
        }
        content.fill().restore_state();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_small_payload() {
        let qr = QrMatrix::encode("{\"a\":1}").unwrap();
        assert!(qr.width() >= 21);
        // Finder pattern corner is dark.
        assert!(qr.is_dark(0, 0));
        assert!(!qr.is_dark(qr.width() + 5, 0));
    }

    #[test]
    fn test_out_of_grid_is_light() {
        let qr = QrMatrix::encode("{\"a\":1}").unwrap();
        let w = qr.width();
        // Row 1 starts with the left finder pattern, so a wrapped read of
        // (w, 0) would land on a dark module.
        assert!(qr.is_dark(0, 1));
        assert!(!qr.is_dark(w, 0));
        assert!(!qr.is_dark(0, w));
    }

    #[test]
    fn test_draw_emits_rectangles() {
        let qr = QrMatrix::encode("hello").unwrap();
        let mut content = ContentBuilder::new();
        qr.draw(&mut content, 10.0, 10.0, 50.0);
        let ops = String::from_utf8(content.build()).unwrap();
        assert!(ops.matches(" re\n").count() > 10);
        assert!(ops.starts_with("q\n"));
        assert!(ops.trim_end().ends_with('Q'));
    }

    #[test]
    fn test_oversized_payload_fails() {
        let data = "x".repeat(5000);
        assert!(QrMatrix::encode(&data).is_err());
    }
}
