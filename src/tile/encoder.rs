//! JPEG tile encoder.
//!
//! This module handles decoding source JPEG tiles and re-encoding them
//! at a specified quality level.
//!
//! # Design Decisions
//!
//! - **Always decode/encode**: For simplicity and correctness, tiles are always
//!   decoded from source format and re-encoded as JPEG. No passthrough optimization.
//!
//! - **No resizing**: Tiles are served at their native size. The tile coordinates
//!   specify tile indices, not pixel coordinates.
//!
//! - **Quality control**: JPEG quality is configurable per request, allowing
//!   clients to trade off file size vs image quality.

use bytes::Bytes;
use image::codecs::jpeg::JpegEncoder;
use image::ImageReader;
use std::io::Cursor;

use crate::error::TileError;

/// Default JPEG quality (1-100).
pub const DEFAULT_JPEG_QUALITY: u8 = 80;

/// Minimum allowed JPEG quality.
pub const MIN_JPEG_QUALITY: u8 = 1;

/// Maximum allowed JPEG quality.
pub const MAX_JPEG_QUALITY: u8 = 100;

// =============================================================================
// JPEG Encoder
// =============================================================================

/// JPEG tile encoder for decoding and re-encoding tiles.
///
/// This encoder takes raw JPEG data from slide tiles, decodes it to pixels,
/// and re-encodes it at the requested quality level.
///
/// # Example
///
/// ```ignore
/// use wsi_pyramid::tile::JpegTileEncoder;
/// use bytes::Bytes;
///
/// let encoder = JpegTileEncoder::new();
///
/// // Source JPEG data from slide
/// let source_jpeg: Bytes = /* ... */;
///
/// // Re-encode at quality 85
/// let output = encoder.encode(&source_jpeg, 85)?;
/// ```
#[derive(Debug, Clone, Default)]
pub struct JpegTileEncoder {
    // Currently stateless, but struct allows future extension
    // (e.g., shared thread pool, encoder settings)
}

impl JpegTileEncoder {
    /// Create a new JPEG tile encoder.
    pub fn new() -> Self {
        Self {}
    }

    /// Decode source JPEG and re-encode at the specified quality.
    ///
    /// # Arguments
    ///
    /// * `source` - Raw JPEG data from the slide tile
    /// * `quality` - Output JPEG quality (1-100)
    ///
    /// # Returns
    ///
    /// Encoded JPEG data at the requested quality.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The source data is not valid JPEG
    /// - Decoding fails
    /// - Encoding fails
    pub fn encode(&self, source: &[u8], quality: u8) -> Result<Bytes, TileError> {
        // Clamp quality to valid range
        let quality = quality.clamp(MIN_JPEG_QUALITY, MAX_JPEG_QUALITY);

        // Decode source JPEG
        let cursor = Cursor::new(source);
        let reader = ImageReader::with_format(cursor, image::ImageFormat::Jpeg);

        let img = reader.decode().map_err(|e| TileError::DecodeError {
            message: e.to_string(),
        })?;

        // Encode to JPEG at requested quality
        let mut output = Vec::new();
        let mut encoder = JpegEncoder::new_with_quality(&mut output, quality);

        encoder
            .encode_image(&img)
            .map_err(|e| TileError::EncodeError {
                message: e.to_string(),
            })?;

        Ok(Bytes::from(output))
    }

    /// Decode source JPEG and re-encode at the default quality.
    ///
    /// This is a convenience method equivalent to `encode(source, DEFAULT_JPEG_QUALITY)`.
    pub fn encode_default(&self, source: &[u8]) -> Result<Bytes, TileError> {
        self.encode(source, DEFAULT_JPEG_QUALITY)
    }

    /// Get image dimensions without fully decoding.
    ///
    /// This is useful for validation or metadata queries.
    ///
    /// # Returns
    ///
    /// `(width, height)` in pixels.
    pub fn dimensions(&self, source: &[u8]) -> Result<(u32, u32), TileError> {
        let cursor = Cursor::new(source);
        let reader = ImageReader::with_format(cursor, image::ImageFormat::Jpeg);

        let (width, height) = reader.into_dimensions().map_err(|e| TileError::DecodeError {
            message: e.to_string(),
        })?;

        Ok((width, height))
    }
}

// =============================================================================
// Utility Functions
// =============================================================================

/// Validate JPEG quality parameter.
///
/// Returns `true` if quality is in the valid range (1-100).
#[inline]
pub fn is_valid_quality(quality: u8) -> bool {
    quality >= MIN_JPEG_QUALITY && quality <= MAX_JPEG_QUALITY
}

/// Clamp quality to valid range.
///
/// Values below 1 become 1, values above 100 become 100.
#[inline]
pub fn clamp_quality(quality: u8) -> u8 {
    quality.clamp(MIN_JPEG_QUALITY, MAX_JPEG_QUALITY)
}

// =============================================================================
// Tests
// =============================================================================
