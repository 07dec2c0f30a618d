//! Decode and encode tile bytes through the handful of codecs a whole-slide
//! pipeline needs: JPEG, JPEG-2000, JPEG-LS, PNG and raw passthrough.
//!
//! Grounded on the tile re-encoding path in `tile::JpegTileEncoder`: decode
//! through `image::ImageReader`, encode through the matching `image` codec
//! encoder. JPEG-2000 and JPEG-LS go through their own dedicated crates since
//! `image` does not support either.

use bytes::Bytes;
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::{ColorType, ImageEncoder, ImageReader};
use std::io::Cursor;

use crate::error::PyramidError;
use crate::pixel::image::{Image, PixelFormat};

use super::image::Compression;

/// Decode a compressed tile into an owned pixel buffer.
///
/// `width`/`height` are the caller's expected dimensions, used only to
/// validate the decoded image against the pyramid level's declared tile
/// size; a mismatch is a `SizeMismatch` error rather than a silent resize.
pub fn decode_tile(
    bytes: &[u8],
    compression: Compression,
    width: u32,
    height: u32,
) -> Result<Image, PyramidError> {
    match compression {
        Compression::None => decode_raw_tile(bytes, PixelFormat::Rgb24, width, height),
        Compression::Jpeg => decode_with_image_crate(bytes, image::ImageFormat::Jpeg, width, height),
        Compression::Png => decode_with_image_crate(bytes, image::ImageFormat::Png, width, height),
        Compression::Jpeg2000 => decode_jpeg2000(bytes, width, height),
        Compression::JpegLs => decode_jpegls(bytes, width, height),
        Compression::Tiff | Compression::Dicom | Compression::ExternalPreview => {
            Err(PyramidError::NotImplemented(format!(
                "decode_tile does not handle {:?} directly; use the owning source's own decode path",
                compression
            )))
        }
    }
}

/// Decode already-uncompressed row-major bytes (a `Compression::None` tile).
pub fn decode_raw_tile(
    bytes: &[u8],
    format: PixelFormat,
    width: u32,
    height: u32,
) -> Result<Image, PyramidError> {
    Image::from_raw(bytes, format, width, height)
}

fn decode_with_image_crate(
    bytes: &[u8],
    format: image::ImageFormat,
    expected_width: u32,
    expected_height: u32,
) -> Result<Image, PyramidError> {
    let cursor = Cursor::new(bytes);
    let reader = ImageReader::with_format(cursor, format);
    let decoded = reader
        .decode()
        .map_err(|e| PyramidError::CorruptedFile(format!("{:?} decode failed: {}", format, e)))?;

    validate_dimensions(decoded.width(), decoded.height(), expected_width, expected_height)?;

    let pixel_format = if decoded.color().has_color() {
        PixelFormat::Rgb24
    } else {
        PixelFormat::Gray8
    };

    let raw = match pixel_format {
        PixelFormat::Rgb24 => decoded.into_rgb8().into_raw(),
        PixelFormat::Gray8 => decoded.into_luma8().into_raw(),
    };

    Image::from_raw(&raw, pixel_format, expected_width, expected_height)
}

fn decode_jpeg2000(bytes: &[u8], expected_width: u32, expected_height: u32) -> Result<Image, PyramidError> {
    let decoded = jpeg2k::Image::from_bytes(bytes)
        .map_err(|e| PyramidError::CorruptedFile(format!("JPEG-2000 decode failed: {}", e)))?;

    let components = decoded.components();
    let num_components = components.len();
    let format = match num_components {
        1 => PixelFormat::Gray8,
        3 | 4 => PixelFormat::Rgb24,
        n => {
            return Err(PyramidError::IncompatibleImageFormat(format!(
                "unsupported JPEG-2000 component count: {}",
                n
            )))
        }
    };

    validate_dimensions(decoded.width(), decoded.height(), expected_width, expected_height)?;

    let rgb = decoded
        .get_pixels(None)
        .map_err(|e| PyramidError::CorruptedFile(format!("JPEG-2000 pixel extraction failed: {}", e)))?;

    Image::from_raw(&rgb.data, format, expected_width, expected_height)
}

fn decode_jpegls(bytes: &[u8], expected_width: u32, expected_height: u32) -> Result<Image, PyramidError> {
    let decoded = jpegls::decode(bytes)
        .map_err(|e| PyramidError::CorruptedFile(format!("JPEG-LS decode failed: {:?}", e)))?;

    validate_dimensions(
        decoded.width as u32,
        decoded.height as u32,
        expected_width,
        expected_height,
    )?;

    let format = match decoded.components {
        1 => PixelFormat::Gray8,
        3 => PixelFormat::Rgb24,
        n => {
            return Err(PyramidError::IncompatibleImageFormat(format!(
                "unsupported JPEG-LS component count: {}",
                n
            )))
        }
    };

    Image::from_raw(&decoded.data, format, expected_width, expected_height)
}

fn validate_dimensions(actual_w: u32, actual_h: u32, expected_w: u32, expected_h: u32) -> Result<(), PyramidError> {
    if actual_w != expected_w || actual_h != expected_h {
        return Err(PyramidError::SizeMismatch(format!(
            "decoded tile is {}x{}, expected {}x{}",
            actual_w, actual_h, expected_w, expected_h
        )));
    }
    Ok(())
}

/// Encode a decoded pixel buffer into the requested compression.
///
/// `quality` only affects `Compression::Jpeg` (clamped to `[1, 100]`); other
/// codecs ignore it.
pub fn encode_tile(image: &Image, compression: Compression, quality: u8) -> Result<Bytes, PyramidError> {
    match compression {
        Compression::None => Ok(Bytes::copy_from_slice(image.as_bytes())),
        Compression::Jpeg => encode_jpeg(image, quality),
        Compression::Png => encode_png(image),
        Compression::Jpeg2000 => Err(PyramidError::NotImplemented(
            "JPEG-2000 encoding is not supported; JPEG-2000 is a read-only codec here".to_string(),
        )),
        Compression::JpegLs => encode_jpegls(image),
        Compression::Tiff | Compression::Dicom | Compression::ExternalPreview => Err(
            PyramidError::NotImplemented(format!("encode_tile does not handle {:?}", compression)),
        ),
    }
}

fn encode_jpeg(image: &Image, quality: u8) -> Result<Bytes, PyramidError> {
    let quality = quality.clamp(1, 100);
    let mut output = Vec::new();
    let mut encoder = JpegEncoder::new_with_quality(&mut output, quality);

    let color_type = match image.format() {
        PixelFormat::Gray8 => ColorType::L8,
        PixelFormat::Rgb24 => ColorType::Rgb8,
    };

    encoder
        .encode(image.as_bytes(), image.width(), image.height(), color_type.into())
        .map_err(|e| PyramidError::InternalError(format!("JPEG encode failed: {}", e)))?;

    Ok(Bytes::from(output))
}

fn encode_png(image: &Image) -> Result<Bytes, PyramidError> {
    let mut output = Vec::new();
    let encoder = PngEncoder::new(&mut output);

    let color_type = match image.format() {
        PixelFormat::Gray8 => ColorType::L8,
        PixelFormat::Rgb24 => ColorType::Rgb8,
    };

    encoder
        .write_image(image.as_bytes(), image.width(), image.height(), color_type.into())
        .map_err(|e| PyramidError::InternalError(format!("PNG encode failed: {}", e)))?;

    Ok(Bytes::from(output))
}

fn encode_jpegls(image: &Image) -> Result<Bytes, PyramidError> {
    let components = match image.format() {
        PixelFormat::Gray8 => 1,
        PixelFormat::Rgb24 => 3,
    };

    let encoded = jpegls::encode(
        image.as_bytes(),
        image.width() as usize,
        image.height() as usize,
        components,
    )
    .map_err(|e| PyramidError::InternalError(format!("JPEG-LS encode failed: {:?}", e)))?;

    Ok(Bytes::from(encoded))
}

/// Decode an abbreviated JPEG/JFIF stream that used `YCbCr` sampling into an
/// RGB buffer. The `image` crate already performs this conversion internally
/// during decode, so this is a thin, explicitly-named entry point for callers
/// (DICOM YBR_FULL_422 reads) that need to state the conversion is happening.
pub fn convert_jpeg_ycbcr_to_rgb(jpeg_bytes: &[u8], width: u32, height: u32) -> Result<Image, PyramidError> {
    decode_with_image_crate(jpeg_bytes, image::ImageFormat::Jpeg, width, height)
}

/// Re-encode a tile's bytes from one compression to another without the
/// caller needing to know the intermediate pixel format.
pub fn change_tile_compression(
    bytes: &[u8],
    from: Compression,
    to: Compression,
    width: u32,
    height: u32,
    quality: u8,
) -> Result<Bytes, PyramidError> {
    if from == to {
        return Ok(Bytes::copy_from_slice(bytes));
    }
    let decoded = decode_tile(bytes, from, width, height)?;
    encode_tile(&decoded, to, quality)
}
