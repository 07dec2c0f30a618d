use thiserror::Error;

/// I/O errors that can occur when reading from remote storage
#[derive(Debug, Clone, Error)]
pub enum IoError {
    /// Error from S3 or S3-compatible storage
    #[error("S3 error: {0}")]
    S3(String),

    /// Requested range exceeds resource bounds
    #[error("Range out of bounds: requested {requested} bytes at offset {offset}, size is {size}")]
    RangeOutOfBounds {
        offset: u64,
        requested: u64,
        size: u64,
    },

    /// Network or connection error
    #[error("Connection error: {0}")]
    Connection(String),

    /// Object not found
    #[error("Object not found: {0}")]
    NotFound(String),
}

/// Errors related to format detection and validation
#[derive(Debug, Clone, Error)]
pub enum FormatError {
    /// I/O error while reading the file
    #[error("I/O error: {0}")]
    Io(#[from] IoError),

    /// TIFF parsing error
    #[error("TIFF error: {0}")]
    Tiff(#[from] TiffError),

    /// File format is not supported (should map to HTTP 415)
    #[error("Unsupported format: {reason}")]
    UnsupportedFormat { reason: String },
}

/// Errors that can occur when parsing TIFF files
#[derive(Debug, Clone, Error)]
pub enum TiffError {
    /// I/O error while reading the file
    #[error("I/O error: {0}")]
    Io(#[from] IoError),

    /// Invalid TIFF magic bytes (not II or MM)
    #[error("Invalid TIFF magic bytes: expected 0x4949 (II) or 0x4D4D (MM), got 0x{0:04X}")]
    InvalidMagic(u16),

    /// Invalid TIFF version number
    #[error("Invalid TIFF version: expected 42 (TIFF) or 43 (BigTIFF), got {0}")]
    InvalidVersion(u16),

    /// Invalid BigTIFF offset byte size (must be 8)
    #[error("Invalid BigTIFF offset byte size: expected 8, got {0}")]
    InvalidBigTiffOffsetSize(u16),

    /// File is too small to contain a valid TIFF header
    #[error("File too small: need at least {required} bytes, got {actual}")]
    FileTooSmall { required: u64, actual: u64 },

    /// Invalid IFD offset (points outside file or to invalid location)
    #[error("Invalid IFD offset: {0}")]
    InvalidIfdOffset(u64),

    /// Required tag is missing from IFD
    #[error("Missing required tag: {0}")]
    MissingTag(&'static str),

    /// Tag has unexpected type or count
    #[error("Invalid tag value for {tag}: {message}")]
    InvalidTagValue { tag: &'static str, message: String },

    /// Unsupported compression scheme
    #[error("Unsupported compression: {0} (only JPEG is supported)")]
    UnsupportedCompression(String),

    /// File uses strips instead of tiles
    #[error("Unsupported organization: file uses strips instead of tiles")]
    StripOrganization,

    /// Unknown field type in IFD entry
    #[error("Unknown field type: {0}")]
    UnknownFieldType(u16),
}

/// Errors that can occur while serving a tile over HTTP.
#[derive(Debug, Clone, Error)]
pub enum TileError {
    /// I/O error while reading the slide
    #[error("I/O error: {0}")]
    Io(#[from] IoError),

    /// Error surfaced by the underlying slide/pyramid reader
    #[error("Slide error: {0}")]
    Slide(#[from] TiffError),

    /// Requested slide does not exist or is not registered
    #[error("Slide not found: {slide_id}")]
    SlideNotFound { slide_id: String },

    /// Requested pyramid level does not exist
    #[error("Invalid level {level}: slide has {max_levels} levels")]
    InvalidLevel { level: u32, max_levels: u32 },

    /// Requested tile coordinates fall outside the level's tile grid
    #[error("Tile ({x}, {y}) out of bounds for level {level} (grid is {max_x}x{max_y})")]
    TileOutOfBounds {
        level: u32,
        x: u32,
        y: u32,
        max_x: u32,
        max_y: u32,
    },

    /// Requested JPEG quality is outside [1, 100]
    #[error("Invalid quality {quality}: must be between 1 and 100")]
    InvalidQuality { quality: u8 },

    /// A path segment that should have been a bare number, optionally
    /// followed by a file extension (e.g. the tile `y` coordinate), did not
    /// parse as one.
    #[error("Invalid path segment {segment:?}: expected a number, optionally with a file extension")]
    InvalidPathSegment { segment: String },

    /// Tile bytes failed to decode
    #[error("Failed to decode tile: {message}")]
    DecodeError { message: String },

    /// Decoded pixels failed to re-encode
    #[error("Failed to encode tile: {message}")]
    EncodeError { message: String },
}

/// Errors surfaced by the generic `TiledSource` abstraction that spans
/// DICOM pyramids, hierarchical/plain TIFF, external slide libraries, and
/// remote tile sources. Each variant corresponds to one of the error kinds
/// enumerated in the core specification's error-handling design.
#[derive(Debug, Clone, Error)]
pub enum PyramidError {
    /// A numeric parameter (quality, level, coordinate) fell outside its
    /// accepted range.
    #[error("parameter out of range: {0}")]
    ParameterOutOfRange(String),

    /// The input does not match the expected container format.
    #[error("bad file format: {0}")]
    BadFileFormat(String),

    /// The input matched the expected format but its contents are invalid.
    #[error("corrupted file: {0}")]
    CorruptedFile(String),

    /// Two images/tiles that should share a pixel format or layout do not.
    #[error("incompatible image format: {0}")]
    IncompatibleImageFormat(String),

    /// Declared and actual dimensions disagree.
    #[error("size mismatch: {0}")]
    SizeMismatch(String),

    /// A referenced resource (file, DICOM tag, series, instance) is missing.
    #[error("unknown resource: {0}")]
    UnknownResource(String),

    /// The requested codec or transfer syntax has no implementation here.
    #[error("not implemented: {0}")]
    NotImplemented(String),

    /// A remote call returned malformed or unexpected data.
    #[error("network protocol error: {0}")]
    NetworkProtocol(String),

    /// A size budget (e.g. the 1 GiB per-DICOM-instance pixel buffer cap)
    /// was exceeded.
    #[error("not enough memory: {0}")]
    NotEnoughMemory(String),

    /// Calls were made to a component in an order its state machine forbids
    /// (e.g. adding a pyramid level after the first tile write).
    #[error("bad sequence of calls: {0}")]
    BadSequenceOfCalls(String),

    /// An invariant that should be impossible to violate was violated.
    #[error("internal error: {0}")]
    InternalError(String),

    #[error("I/O error: {0}")]
    Io(#[from] IoError),

    #[error(transparent)]
    Format(#[from] FormatError),

    #[error(transparent)]
    Tiff(#[from] TiffError),
}

/// Errors surfaced by `Writer` implementations (DICOM, hierarchical TIFF,
/// in-memory, truncated-pyramid wrapper).
pub type WriterError = PyramidError;

/// Errors surfaced while constructing or serializing DICOM datasets.
#[derive(Debug, Error)]
pub enum DicomError {
    #[error("DICOM object error: {0}")]
    Object(String),

    #[error("missing required DICOM tag: {0}")]
    MissingTag(&'static str),

    #[error(transparent)]
    Pyramid(#[from] PyramidError),
}

impl Clone for DicomError {
    fn clone(&self) -> Self {
        match self {
            DicomError::Object(s) => DicomError::Object(s.clone()),
            DicomError::MissingTag(s) => DicomError::MissingTag(s),
            DicomError::Pyramid(e) => DicomError::Pyramid(e.clone()),
        }
    }
}

/// Top-level error returned by the conversion pipelines (`convert_to_dicom`,
/// `convert_to_tiff`). All fatal errors from sources, writers, tasks and the
/// DICOM layer are folded into this type before reaching the CLI driver.
#[derive(Debug, Clone, Error)]
pub enum ConversionError {
    #[error(transparent)]
    Pyramid(#[from] PyramidError),

    #[error("DICOM error: {0}")]
    Dicom(String),

    #[error("{count} of {total} worker tasks failed")]
    TasksFailed { count: usize, total: usize },
}

impl From<DicomError> for ConversionError {
    fn from(err: DicomError) -> Self {
        match err {
            DicomError::Pyramid(e) => ConversionError::Pyramid(e),
            other => ConversionError::Dicom(other.to_string()),
        }
    }
}
