//! QR code rendering for download links.
//!
//! URLs are encoded with the default error-correction level (M), rendered
//! black-on-white at 10 px per module with the standard 4-module quiet zone,
//! and returned as a PNG data URI that a browser can show directly.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use image::{DynamicImage, ImageFormat, Luma};
use qrcode::{EcLevel, QrCode};
use std::io::Cursor;
use thiserror::Error;

const DATA_URI_PREFIX: &str = "data:image/png;base64,";

#[derive(Error, Debug)]
pub enum QrCodeError {
    #[error("Payload cannot be encoded as a QR code: {0}")]
    Encode(#[from] qrcode::types::QrError),

    #[error("Failed to write QR code PNG: {0}")]
    Png(#[from] image::ImageError),
}

/// Renders URLs as QR code PNGs
#[derive(Debug, Clone, Copy)]
pub struct QrEncoder {
    module_size: u32,
    ec_level: EcLevel,
}

impl Default for QrEncoder {
    fn default() -> Self {
        Self {
            module_size: 10,
            ec_level: EcLevel::M,
        }
    }
}

impl QrEncoder {
    pub fn new(module_size: u32, ec_level: EcLevel) -> Self {
        Self {
            module_size: module_size.max(1),
            ec_level,
        }
    }

    /// Encode `text` as PNG bytes. The smallest symbol version that fits is
    /// selected automatically.
    pub fn encode_png(&self, text: &str) -> Result<Vec<u8>, QrCodeError> {
        let code = QrCode::with_error_correction_level(text.as_bytes(), self.ec_level)?;

        let image = code
            .render::<Luma<u8>>()
            .module_dimensions(self.module_size, self.module_size)
            .dark_color(Luma([0u8]))
            .light_color(Luma([255u8]))
            .quiet_zone(true)
            .build();

        let mut png = Vec::new();
        DynamicImage::ImageLuma8(image).write_to(&mut Cursor::new(&mut png), ImageFormat::Png)?;

        Ok(png)
    }

    /// Encode `text` as a `data:image/png;base64,...` URI
    pub fn encode_data_uri(&self, text: &str) -> Result<String, QrCodeError> {
        let png = self.encode_png(text)?;
        Ok(format!("{}{}", DATA_URI_PREFIX, STANDARD.encode(png)))
    }
}

/// Extract the PNG bytes from a data URI produced by [`QrEncoder::encode_data_uri`]
pub fn decode_data_uri(data_uri: &str) -> Option<Vec<u8>> {
    let payload = data_uri.strip_prefix(DATA_URI_PREFIX)?;
    STANDARD.decode(payload).ok()
}
