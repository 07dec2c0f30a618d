//! Format detection from raw bytes, generalizing the teacher's
//! TIFF-only `format::detect::detect_format` to every container this crate
//! can read a pyramid out of: DICOM, TIFF (Aperio SVS and generic), PNG,
//! and plain JPEG. Vendor-specific container formats it cannot parse
//! (`.mrxs`, `.ndpi`, `.scn`) are still *recognized* by extension so callers
//! can route them to the external-slide-library source instead of failing
//! silently.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use crate::error::PyramidError;

/// Number of leading bytes read when detecting format from an open file.
const SNIFF_LEN: usize = 1024;

/// DICOM Part 10 files start with a 128-byte preamble followed by the magic
/// string `DICM` at offset 128.
const DICOM_PREAMBLE_LEN: usize = 128;
const DICOM_MAGIC: &[u8; 4] = b"DICM";

const PNG_SIGNATURE: &[u8; 8] = &[0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A];
const JPEG_SOI: &[u8; 2] = &[0xFF, 0xD8];
const APERIO_MARKER: &[u8] = b"Aperio";

/// Result of sniffing a byte buffer or file for its container format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectedFormat {
    /// DICOM Part 10 file (single instance or concatenation part).
    Dicom,
    /// Aperio SVS (TIFF container, "Aperio" marker in ImageDescription).
    AperioSvs,
    /// Generic tiled/pyramidal TIFF.
    GenericTiff,
    /// Plain PNG, no pyramid structure.
    Png,
    /// Plain JPEG, no pyramid structure.
    Jpeg,
    /// A vendor format recognized only by file extension, requiring an
    /// external slide library (OpenSlide-style) to actually decode.
    ExternalVendorFormat { extension: &'static str },
}

/// Detect a format from an in-memory byte buffer.
///
/// Only the first `SNIFF_LEN` bytes (or fewer, if `bytes` is shorter) are
/// inspected; for TIFF-based formats this is enough to read the header and,
/// when present, a short embedded ImageDescription, but is not a substitute
/// for full IFD parsing when precise SVS/generic-TIFF discrimination on
/// tile-bearing IFDs is required (see `format::detect::detect_format` for
/// that deeper, reader-driven path).
pub fn detect_format_from_memory(bytes: &[u8]) -> Result<DetectedFormat, PyramidError> {
    if bytes.len() >= DICOM_PREAMBLE_LEN + 4
        && &bytes[DICOM_PREAMBLE_LEN..DICOM_PREAMBLE_LEN + 4] == DICOM_MAGIC
    {
        return Ok(DetectedFormat::Dicom);
    }

    if bytes.len() >= PNG_SIGNATURE.len() && &bytes[..PNG_SIGNATURE.len()] == PNG_SIGNATURE {
        return Ok(DetectedFormat::Png);
    }

    if bytes.len() >= JPEG_SOI.len() && &bytes[..JPEG_SOI.len()] == JPEG_SOI {
        return Ok(DetectedFormat::Jpeg);
    }

    if is_tiff_header(bytes) {
        if contains_aperio_marker(bytes) {
            return Ok(DetectedFormat::AperioSvs);
        }
        return Ok(DetectedFormat::GenericTiff);
    }

    Err(PyramidError::BadFileFormat(
        "unrecognized container: no DICOM, TIFF, PNG or JPEG signature found".to_string(),
    ))
}

/// Detect a format from a file path, consulting both its leading bytes and,
/// for formats this crate cannot parse directly, its extension.
pub fn detect_format_from_file(path: &Path) -> Result<DetectedFormat, PyramidError> {
    if let Some(vendor) = detect_external_vendor_extension(path) {
        return Ok(vendor);
    }

    let mut file = File::open(path)
        .map_err(|e| PyramidError::UnknownResource(format!("cannot open {}: {}", path.display(), e)))?;
    let mut buf = vec![0u8; SNIFF_LEN];
    let read = file
        .read(&mut buf)
        .map_err(|e| PyramidError::UnknownResource(format!("cannot read {}: {}", path.display(), e)))?;
    buf.truncate(read);

    detect_format_from_memory(&buf)
}

fn detect_external_vendor_extension(path: &Path) -> Option<DetectedFormat> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    match ext.as_str() {
        "mrxs" => Some(DetectedFormat::ExternalVendorFormat { extension: "mrxs" }),
        "ndpi" => Some(DetectedFormat::ExternalVendorFormat { extension: "ndpi" }),
        "scn" => Some(DetectedFormat::ExternalVendorFormat { extension: "scn" }),
        _ => None,
    }
}

fn is_tiff_header(bytes: &[u8]) -> bool {
    if bytes.len() < 4 {
        return false;
    }
    let magic = u16::from_le_bytes([bytes[0], bytes[1]]);
    if magic != 0x4949 && magic != 0x4D4D {
        return false;
    }
    let big_endian = magic == 0x4D4D;
    let version = if big_endian {
        u16::from_be_bytes([bytes[2], bytes[3]])
    } else {
        u16::from_le_bytes([bytes[2], bytes[3]])
    };
    version == 42 || version == 43
}

fn contains_aperio_marker(data: &[u8]) -> bool {
    data.windows(APERIO_MARKER.len()).any(|w| w == APERIO_MARKER)
}
