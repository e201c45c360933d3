//! QR code rendering
//!
//! Turns a session code payload into a PNG that a phone camera can scan off
//! a classroom screen. The renderer sits behind [`QrRenderer`] so the code
//! service never depends on a particular image backend.

use image::{ImageBuffer, ImageFormat, Rgb};
use qrcodegen::{QrCode, QrCodeEcc};
use serde::{Deserialize, Serialize};
use std::io::Cursor;

use crate::models::RenderedImage;

/// Rendering failures
#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    /// Payload does not fit in any QR version at the configured level
    #[error("Payload too long for a QR code: {0}")]
    DataTooLong(String),

    /// PNG encoder failed
    #[error("Failed to encode PNG: {0}")]
    Encode(String),
}

/// Renders a text payload as a scannable image
pub trait QrRenderer: Send + Sync {
    fn render(&self, payload: &str) -> Result<RenderedImage, RenderError>;
}

/// QR error-correction level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ErrorCorrection {
    /// ~7% recovery
    #[serde(alias = "L")]
    Low,
    /// ~15% recovery
    #[default]
    #[serde(alias = "M")]
    Medium,
    /// ~25% recovery
    #[serde(alias = "Q")]
    Quartile,
    /// ~30% recovery
    #[serde(alias = "H")]
    High,
}

impl ErrorCorrection {
    /// Parse a level name or its single-letter form
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_lowercase().as_str() {
            "l" | "low" => Some(Self::Low),
            "m" | "medium" => Some(Self::Medium),
            "q" | "quartile" => Some(Self::Quartile),
            "h" | "high" => Some(Self::High),
            _ => None,
        }
    }

    fn ecc(self) -> QrCodeEcc {
        match self {
            Self::Low => QrCodeEcc::Low,
            Self::Medium => QrCodeEcc::Medium,
            Self::Quartile => QrCodeEcc::Quartile,
            Self::High => QrCodeEcc::High,
        }
    }
}

/// PNG renderer backed by qrcodegen
#[derive(Debug, Clone)]
pub struct PngQrRenderer {
    size: u32,
    border: u32,
    error_correction: ErrorCorrection,
    dark: [u8; 3],
    light: [u8; 3],
}

impl Default for PngQrRenderer {
    fn default() -> Self {
        Self {
            size: 256,
            border: 1,
            error_correction: ErrorCorrection::Medium,
            dark: [0x00, 0x00, 0x00],
            light: [0xFF, 0xFF, 0xFF],
        }
    }
}

impl PngQrRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Requested width and height in pixels
    pub fn with_size(mut self, size: u32) -> Self {
        self.size = size.max(1);
        self
    }

    /// Quiet zone width in modules (at least one)
    pub fn with_border(mut self, border: u32) -> Self {
        self.border = border.max(1);
        self
    }

    pub fn with_error_correction(mut self, level: ErrorCorrection) -> Self {
        self.error_correction = level;
        self
    }

    /// Module colors as RGB triples
    pub fn with_colors(mut self, dark: [u8; 3], light: [u8; 3]) -> Self {
        self.dark = dark;
        self.light = light;
        self
    }

    /// Lay out the symbol: pixels per module, image side and symbol offset
    fn layout(&self, qr_size: u32) -> (u32, u32, u32) {
        let modules = qr_size + 2 * self.border;
        let scale = (self.size / modules).max(1);
        let side = self.size.max(modules * scale);
        let offset = (side - modules * scale) / 2;
        (scale, side, offset)
    }
}

impl QrRenderer for PngQrRenderer {
    fn render(&self, payload: &str) -> Result<RenderedImage, RenderError> {
        let qr = QrCode::encode_text(payload, self.error_correction.ecc())
            .map_err(|e| RenderError::DataTooLong(e.to_string()))?;

        let qr_size = qr.size() as u32;
        let (scale, side, offset) = self.layout(qr_size);
        let border = self.border;

        let canvas = ImageBuffer::from_fn(side, side, |x, y| {
            let inside = |p: u32| p >= offset && p < offset + (qr_size + 2 * border) * scale;
            if !inside(x) || !inside(y) {
                return Rgb(self.light);
            }
            let mx = ((x - offset) / scale) as i32 - border as i32;
            let my = ((y - offset) / scale) as i32 - border as i32;
            // get_module is false outside the symbol, which covers the quiet zone
            if qr.get_module(mx, my) {
                Rgb(self.dark)
            } else {
                Rgb(self.light)
            }
        });

        let mut png = Vec::new();
        canvas
            .write_to(&mut Cursor::new(&mut png), ImageFormat::Png)
            .map_err(|e| RenderError::Encode(e.to_string()))?;

        Ok(RenderedImage {
            png,
            width: side,
            height: side,
        })
    }
}

/// Parse `#RRGGBB` (or `RRGGBB`) into an RGB triple
pub fn parse_hex_color(value: &str) -> Option<[u8; 3]> {
    let hex = value.strip_prefix('#').unwrap_or(value);
    if hex.len() != 6 || !hex.is_ascii() {
        return None;
    }
    let channel = |i: usize| u8::from_str_radix(&hex[i..i + 2], 16).ok();
    Some([channel(0)?, channel(2)?, channel(4)?])
}
