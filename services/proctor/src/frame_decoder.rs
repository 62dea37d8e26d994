//! Decoding of inbound frame payloads.
//!
//! Candidates stream still images over the websocket; this module turns an
//! encoded payload into an RGB pixel buffer the vision clients can use. A
//! payload that fails to decode is dropped by the caller; the next frame is
//! independent.

use base64::{engine::general_purpose::STANDARD, Engine};
use bytes::Bytes;
use image::{DynamicImage, ImageFormat, RgbImage};
use std::io::Cursor;
use thiserror::Error;

/// Errors that can occur while decoding or re-encoding a frame.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("Empty frame payload")]
    Empty,

    #[error("Invalid image data: {0}")]
    Image(#[from] image::ImageError),

    #[error("Pixel buffer does not match its dimensions")]
    BufferMismatch,
}

/// A decoded frame in RGB24 channel order.
#[derive(Debug, Clone)]
pub struct PixelBuffer {
    /// Frame width in pixels
    pub width: u32,
    /// Frame height in pixels
    pub height: u32,
    /// Raw pixel data, 3 bytes per pixel (R, G, B)
    pub data: Bytes,
}

impl PixelBuffer {
    /// Re-encode the buffer as JPEG for transmission to a remote model.
    pub fn encode_jpeg(&self) -> Result<Vec<u8>, DecodeError> {
        let img = RgbImage::from_raw(self.width, self.height, self.data.to_vec())
            .ok_or(DecodeError::BufferMismatch)?;

        let mut out = Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(img).write_to(&mut out, ImageFormat::Jpeg)?;

        Ok(out.into_inner())
    }

    /// Base64 data URL for JSON model APIs.
    pub fn to_data_url(&self) -> Result<String, DecodeError> {
        Ok(format!(
            "data:image/jpeg;base64,{}",
            STANDARD.encode(self.encode_jpeg()?)
        ))
    }
}

/// Decode an encoded still image into an RGB pixel buffer.
///
/// Accepts any container format the `image` crate recognizes (JPEG, PNG,
/// WebP, ...). Returns an error for empty or corrupt payloads instead of
/// panicking.
pub fn decode(encoded: &[u8]) -> Result<PixelBuffer, DecodeError> {
    if encoded.is_empty() {
        return Err(DecodeError::Empty);
    }

    let rgb = image::load_from_memory(encoded)?.to_rgb8();
    let (width, height) = rgb.dimensions();

    Ok(PixelBuffer {
        width,
        height,
        data: Bytes::from(rgb.into_raw()),
    })
}
