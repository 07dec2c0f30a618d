//! Pixel buffers and codec operations shared by every tiled-source and
//! writer implementation.
//!
//! This module is the lowest layer of the conversion pipeline: it knows
//! nothing about pyramids, DICOM, or TIFF structure. It only allocates pixel
//! buffers, fills and copies rectangles within them, and moves bytes in and
//! out of the handful of codecs a whole-slide pipeline needs.

mod codec;
mod detect;
mod image;

pub use codec::{
    change_tile_compression, convert_jpeg_ycbcr_to_rgb, decode_raw_tile, decode_tile, encode_tile,
};
pub use detect::{detect_format_from_file, detect_format_from_memory, DetectedFormat};
pub use image::{bytes_per_pixel, Compression, Image, PhotometricInterpretation, PixelFormat};
