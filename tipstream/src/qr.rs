//! QR image encoding for payment URLs.
//!
//! Encoding is a pure function from text to PNG bytes behind the
//! [`QrEncoder`] trait, so the facade can cache results without caring how
//! they are produced.

use image::{ExtendedColorType, ImageEncoder, Luma};
use qrcode::QrCode;

/// Errors produced while encoding a QR image.
#[derive(Debug, thiserror::Error)]
pub enum QrError {
    /// The payload does not fit in a QR symbol.
    #[error("QR generation failed: {0}")]
    Encode(#[from] qrcode::types::QrError),
    /// The rendered image could not be written as PNG.
    #[error("PNG encoding failed: {0}")]
    Png(#[from] image::ImageError),
}

/// Turns text into an image.
pub trait QrEncoder: Send + Sync {
    /// Encodes `data` and returns the image bytes.
    ///
    /// # Errors
    ///
    /// Returns [`QrError`] when the data cannot be encoded.
    fn encode(&self, data: &str) -> Result<Vec<u8>, QrError>;
}

/// Grayscale PNG encoder.
#[derive(Debug, Clone, Copy)]
pub struct PngQrEncoder {
    size: u32,
    quiet_zone: bool,
}

impl Default for PngQrEncoder {
    fn default() -> Self {
        Self {
            size: 256,
            quiet_zone: true,
        }
    }
}

impl PngQrEncoder {
    /// Encoder producing images at least `size` pixels wide.
    #[must_use]
    pub const fn with_size(size: u32) -> Self {
        Self {
            size,
            quiet_zone: true,
        }
    }
}

impl QrEncoder for PngQrEncoder {
    fn encode(&self, data: &str) -> Result<Vec<u8>, QrError> {
        let code = QrCode::new(data.as_bytes())?;
        let image = code
            .render::<Luma<u8>>()
            .quiet_zone(self.quiet_zone)
            .min_dimensions(self.size, self.size)
            .build();

        let mut bytes = Vec::new();
        image::codecs::png::PngEncoder::new(&mut bytes).write_image(
            image.as_raw(),
            image.width(),
            image.height(),
            ExtendedColorType::L8,
        )?;
        Ok(bytes)
    }
}
