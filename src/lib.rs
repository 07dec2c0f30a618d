//! # wsi-pyramid
//!
//! Converts whole-slide pathology images between tiled pyramid representations
//! (DICOM VL Whole Slide Microscopy Image, hierarchical TIFF, plain images) and
//! serves tiles / IIIF metadata over HTTP.
//!
//! This library also keeps the original S3-backed Aperio SVS / pyramidal TIFF
//! tile-serving path: [`slide`] and [`tile`] stream tiles directly from
//! range-addressable storage without downloading entire files, for large
//! medical imaging files (1-10GB+). The [`pyramid`] and [`writer`] modules
//! add DICOM-native pyramid reconstruction and conversion on top.
//!
//! ## Features
//!
//! - **Range-based streaming**: Fetches only the bytes needed for each tile via HTTP range requests
//! - **Format support**: Native parsers for Aperio SVS and pyramidal TIFF formats, plus
//!   DICOM VL Whole Slide Microscopy Image pyramids and conversion between the two
//! - **Multi-level caching**: Caches slides, blocks, and encoded tiles for performance
//! - **Authentication**: Optional HMAC-SHA256 signed URL authentication
//!
//! ## Architecture
//!
//! The library is organized into several modules:
//!
//! - [`io`] - I/O layer with S3 range reader, local file reader, and block caching
//! - [`mod@format`] - TIFF/SVS parsers and JPEG handling
//! - [`slide`] - Slide abstraction and registry (S3/TIFF serving path)
//! - [`pyramid`] - Pyramid sources: DICOM, hierarchical TIFF, plain image, remote tile, external
//! - [`writer`] - Pyramid writers: DICOM concatenation, hierarchical TIFF, truncated/preview
//! - [`pixel`] - Pixel buffers and codec dispatch (JPEG, JPEG2000, JPEG-LS)
//! - [`color`] - sRGB/CIE Lab color science for DICOM optical path metadata
//! - [`cache`] - Process-wide pyramid/tile caches with singleflight
//! - [`task`] - Worker pool for conversion commands
//! - [`pipeline`] - Conversion drivers (`convert_to_dicom`, `convert_to_tiff`)
//! - [`tile`] - Tile service and encoding
//! - [`server`] - Axum-based HTTP server and routes
//! - [`config`] - CLI and configuration types
//!
//! ## Example
//!
//! ```rust,no_run
//! use wsi_pyramid::Cli;
//! use clap::Parser;
//!
//! #[tokio::main]
//! async fn main() {
//!     // Parse CLI arguments (e.g., `wsi-streamer s3://my-bucket`)
//!     let cli = Cli::parse();
//!
//!     match cli.into_command() {
//!         wsi_pyramid::Command::Serve(config) => {
//!             // Validate and start the server
//!             config.validate().expect("Invalid configuration");
//!             println!("Starting server on {}", config.bind_address());
//!         }
//!         wsi_pyramid::Command::Sign(config) => {
//!             // Generate signed URL
//!         }
//!         wsi_pyramid::Command::Check(config) => {
//!             // Validate S3 connectivity
//!         }
//!     }
//! }
//! ```

pub mod cache;
pub mod color;
pub mod config;
pub mod error;
pub mod format;
pub mod io;
pub mod pipeline;
pub mod pixel;
pub mod pyramid;
pub mod server;
pub mod slide;
pub mod task;
pub mod tile;
pub mod writer;

// Re-export commonly used types
pub use config::{
    CheckConfig, Cli, Command, ConvertConfig, OpticalPathTemplate, OutputFormat, ServeConfig,
    SignConfig, SignOutputFormat,
};
pub use error::{FormatError, IoError, TiffError, TileError};
pub use format::tiff::{
    check_compression, check_tile_tags, check_tiled, parse_u32_array, parse_u64_array,
    validate_ifd, validate_ifd_strict, validate_level, validate_pyramid, ByteOrder, Compression,
    FieldType, Ifd, IfdEntry, PyramidLevel, TiffHeader, TiffPyramid, TiffTag, TileData,
    ValidationError, ValidationResult, ValueReader, BIGTIFF_HEADER_SIZE, TIFF_HEADER_SIZE,
};
pub use format::{detect_format, is_tiff_header, SlideFormat};
pub use format::{
    is_abbreviated_stream, is_complete_stream, merge_jpeg_tables, prepare_tile_jpeg,
    GenericTiffLevelData, GenericTiffReader, SvsLevelData, SvsMetadata, SvsReader,
};
pub use io::{create_s3_client, BlockCache, LocalFileRangeReader, RangeReader, S3RangeReader};
pub use server::{
    auth_middleware, create_dev_router, create_production_router, create_router, health_handler,
    slides_handler, tile_handler, AppState, AuthError, AuthQueryParams, ErrorResponse,
    HealthResponse, OptionalAuth, RouterConfig, SignedUrlAuth, SlidesQueryParams, SlidesResponse,
    TilePathParams, TileQueryParams,
};
pub use slide::{
    CachedSlide, LevelInfo, S3SlideSource, SlideListResult, SlideReader, SlideRegistry, SlideSource,
};
pub use tile::{
    clamp_quality, is_valid_quality, JpegTileEncoder, TileCache, TileCacheKey, TileRequest,
    TileResponse, TileService, DEFAULT_JPEG_QUALITY, DEFAULT_TILE_CACHE_CAPACITY, MAX_JPEG_QUALITY,
    MIN_JPEG_QUALITY,
};
