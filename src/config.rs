//! Configuration management for the WSI pyramid tool.
//!
//! Three pathways share one binary: the HTTP tile/IIIF server (`serve`), the
//! pyramid conversion driver (`convert`), plus the teacher's original
//! `sign`/`check` utility commands for the S3-backed serving path. All
//! configuration supports CLI flags via `clap` and environment variables
//! (`WSI_*` for serving, `DICOMIZER_*` for conversion), matching the
//! teacher's `Config` derive-and-validate style.
//!
//! # Environment Variables
//!
//! - `WSI_HOST`, `WSI_PORT` - server bind address
//! - `WSI_S3_BUCKET`, `WSI_S3_ENDPOINT`, `WSI_S3_REGION` - S3 source
//! - `WSI_DICOM_ROOT` - DICOM series directory backing the `/pyramids` and
//!   `/iiif` routes; independent of the S3 source above
//! - `WSI_AUTH_SECRET`, `WSI_AUTH_ENABLED` - signed-URL authentication
//! - `WSI_CACHE_SLIDES`, `WSI_CACHE_BLOCKS`, `WSI_CACHE_TILES` - cache sizes
//! - `DICOMIZER_THREADS`, `DICOMIZER_COMPRESSION`, ... - conversion options,
//!   one per row of the configuration table in the core specification

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

use crate::io::DEFAULT_BLOCK_SIZE;
use crate::pixel::{Compression, PixelFormat};
use crate::tile::{DEFAULT_JPEG_QUALITY, DEFAULT_TILE_CACHE_CAPACITY};

// =============================================================================
// Defaults
// =============================================================================

pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 3000;
pub const DEFAULT_REGION: &str = "us-east-1";
pub const DEFAULT_SLIDE_CACHE_CAPACITY: usize = 100;
pub const DEFAULT_BLOCK_CACHE_CAPACITY: usize = 100;
pub const DEFAULT_CACHE_MAX_AGE: u32 = 3600;
pub const DEFAULT_SIGN_TTL_SECS: u64 = 3600;

/// Default DICOM per-instance soft size cap (0 disables concatenation).
pub const DEFAULT_MAX_DICOM_FILE_SIZE: u64 = 0;

/// Default alignment used when padding a plain PNG/JPEG single-level source
/// up to a multiple of the target tile size (1 == no padding).
pub const DEFAULT_PADDING_ALIGNMENT: u32 = 1;

// =============================================================================
// Top-level CLI
// =============================================================================

#[derive(Parser, Debug, Clone)]
#[command(name = "wsi-pyramid")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    pub fn into_command(self) -> Command {
        self.command
    }
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Serve tiles and IIIF metadata over HTTP from an S3-backed pyramid.
    Serve(ServeConfig),
    /// Sign a tile URL for the HMAC-authenticated serving path.
    Sign(SignConfig),
    /// Validate S3 connectivity and configuration without starting a server.
    Check(CheckConfig),
    /// Convert a source pyramid into DICOM (VL-WSI) or hierarchical TIFF.
    Convert(ConvertConfig),
}

// =============================================================================
// Serve
// =============================================================================

/// Configuration for the `serve` subcommand (formerly the teacher's flat
/// `Config`). Renamed to make room for the sibling `sign`/`check`/`convert`
/// configurations under one `Command` enum.
#[derive(Parser, Debug, Clone)]
pub struct ServeConfig {
    #[arg(long, default_value = DEFAULT_HOST, env = "WSI_HOST")]
    pub host: String,

    #[arg(short, long, default_value_t = DEFAULT_PORT, env = "WSI_PORT")]
    pub port: u16,

    #[arg(long, env = "WSI_S3_BUCKET", default_value = "")]
    pub s3_bucket: String,

    /// Directory holding one subdirectory per DICOM series, each containing
    /// that series' instance files. When set, the server additionally
    /// mounts the `/pyramids` and `/iiif` routes (core specification §6)
    /// alongside the S3-backed SVS tile surface.
    #[arg(long, env = "WSI_DICOM_ROOT")]
    pub dicom_root: Option<PathBuf>,

    #[arg(long, env = "WSI_S3_ENDPOINT")]
    pub s3_endpoint: Option<String>,

    #[arg(long, default_value = DEFAULT_REGION, env = "WSI_S3_REGION")]
    pub s3_region: String,

    #[arg(long, env = "WSI_AUTH_SECRET")]
    pub auth_secret: Option<String>,

    #[arg(long, default_value_t = true, env = "WSI_AUTH_ENABLED")]
    pub auth_enabled: bool,

    #[arg(long, default_value_t = DEFAULT_SLIDE_CACHE_CAPACITY, env = "WSI_CACHE_SLIDES")]
    pub cache_slides: usize,

    #[arg(long, default_value_t = DEFAULT_BLOCK_CACHE_CAPACITY, env = "WSI_CACHE_BLOCKS")]
    pub cache_blocks: usize,

    #[arg(long, default_value_t = DEFAULT_TILE_CACHE_CAPACITY, env = "WSI_CACHE_TILES")]
    pub cache_tiles: usize,

    #[arg(long, default_value_t = DEFAULT_BLOCK_SIZE, env = "WSI_BLOCK_SIZE")]
    pub block_size: usize,

    #[arg(long, default_value_t = DEFAULT_JPEG_QUALITY, env = "WSI_JPEG_QUALITY")]
    pub jpeg_quality: u8,

    #[arg(long, default_value_t = DEFAULT_CACHE_MAX_AGE, env = "WSI_CACHE_MAX_AGE")]
    pub cache_max_age: u32,

    #[arg(long, env = "WSI_CORS_ORIGINS", value_delimiter = ',')]
    pub cors_origins: Option<Vec<String>>,

    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,

    #[arg(long, default_value_t = false)]
    pub no_tracing: bool,
}

impl ServeConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.auth_enabled && self.auth_secret.is_none() {
            return Err(
                "Authentication is enabled but no secret provided. \
                 Set --auth-secret or WSI_AUTH_SECRET, or disable auth with --auth-enabled=false"
                    .to_string(),
            );
        }
        if self.s3_bucket.is_empty() && self.dicom_root.is_none() {
            return Err(
                "at least one source is required: set --s3-bucket/WSI_S3_BUCKET for the \
                 SVS tile surface, --dicom-root/WSI_DICOM_ROOT for the DICOM/IIIF surface, \
                 or both"
                    .to_string(),
            );
        }
        if self.cache_slides == 0 {
            return Err("cache_slides must be greater than 0".to_string());
        }
        if self.cache_blocks == 0 {
            return Err("cache_blocks must be greater than 0".to_string());
        }
        if self.cache_tiles == 0 {
            return Err("cache_tiles must be greater than 0".to_string());
        }
        if self.jpeg_quality == 0 || self.jpeg_quality > 100 {
            return Err("jpeg_quality must be between 1 and 100".to_string());
        }
        if self.block_size < 1024 || self.block_size > 16 * 1024 * 1024 {
            return Err("block_size must be between 1KB and 16MB".to_string());
        }
        Ok(())
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn bucket(&self) -> String {
        self.s3_bucket.clone()
    }

    pub fn auth_secret_or_empty(&self) -> &str {
        self.auth_secret.as_deref().unwrap_or("")
    }
}

// =============================================================================
// Sign
// =============================================================================

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignOutputFormat {
    /// Just the raw signature.
    Signature,
    /// A JSON object with signature, expiry, path and (if `--base-url`) url.
    Json,
    /// A complete URL (requires `--base-url`) or a path + query string.
    Url,
}

/// Generates a signed URL/signature for the `serve` path's HMAC auth scheme.
#[derive(Parser, Debug, Clone)]
pub struct SignConfig {
    /// Secret key matching the server's `--auth-secret`.
    #[arg(long, env = "WSI_AUTH_SECRET")]
    pub secret: String,

    /// Request path to sign, e.g. `/tiles/slides/sample.svs/0/1/2.jpg`.
    #[arg(long)]
    pub path: String,

    /// Extra query parameters to bind into the signature, `key=value` pairs.
    #[arg(long = "param", value_delimiter = ',')]
    pub params: Vec<String>,

    /// Signature time-to-live in seconds.
    #[arg(long, default_value_t = DEFAULT_SIGN_TTL_SECS)]
    pub ttl: u64,

    /// Base URL to prepend when emitting a complete signed URL.
    #[arg(long)]
    pub base_url: Option<String>,

    #[arg(long, value_enum, default_value_t = SignOutputFormat::Signature)]
    pub format: SignOutputFormat,
}

impl SignConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.secret.is_empty() {
            return Err("--secret must not be empty".to_string());
        }
        if !self.path.starts_with('/') {
            return Err("--path must start with '/'".to_string());
        }
        Ok(())
    }

    /// Parse `--param key=value` entries into (key, value) pairs.
    pub fn parse_params(&self) -> Result<Vec<(String, String)>, String> {
        self.params
            .iter()
            .map(|p| {
                p.split_once('=')
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .ok_or_else(|| format!("invalid --param '{}', expected key=value", p))
            })
            .collect()
    }
}

// =============================================================================
// Check
// =============================================================================

/// Validates S3 connectivity/configuration without starting the server.
#[derive(Parser, Debug, Clone)]
pub struct CheckConfig {
    #[arg(long, env = "WSI_S3_BUCKET")]
    pub s3_bucket: Option<String>,

    #[arg(long, env = "WSI_S3_ENDPOINT")]
    pub s3_endpoint: Option<String>,

    #[arg(long, default_value = DEFAULT_REGION, env = "WSI_S3_REGION")]
    pub s3_region: String,

    /// List every slide found in the bucket.
    #[arg(long, default_value_t = false)]
    pub list_slides: bool,

    /// Additionally verify a specific slide key exists.
    #[arg(long)]
    pub test_slide: Option<String>,

    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,
}

impl CheckConfig {
    pub fn resolve_bucket(&self) -> Result<String, String> {
        self.s3_bucket
            .clone()
            .ok_or_else(|| "no bucket configured: set --s3-bucket or WSI_S3_BUCKET".to_string())
    }
}

// =============================================================================
// Convert
// =============================================================================

/// Output container for the `convert` subcommand.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Dicom,
    Tiff,
}

/// Optical path template applied to DICOM output's OpticalPathSequence.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpticalPathTemplate {
    None,
    Brightfield,
}

/// Every option in the core specification's configuration table (§6),
/// covering both the DICOM and TIFF output drivers plus the Orthanc REST
/// sink. Mirrors the teacher's `ServeConfig` in style: one `clap` derive
/// struct, validated once up front.
#[derive(Parser, Debug, Clone)]
pub struct ConvertConfig {
    /// Source file or directory (a DICOM series directory, a TIFF/SVS file,
    /// or a plain PNG/JPEG). Remote tile sources are addressed via `--url`.
    pub input: Option<PathBuf>,

    /// Remote tile server base URL, used instead of `input` for the HTTP
    /// tile-source pathway.
    #[arg(long)]
    pub url: Option<String>,

    /// Remote tile source image-instance identifier (the `<id>` in
    /// `api/imageinstance/<id>/window-...`). Required with `--url`.
    #[arg(long, env = "DICOMIZER_REMOTE_IMAGE_ID")]
    pub remote_image_id: Option<String>,

    /// Remote tile source HMAC public key. Required with `--url`.
    #[arg(long, env = "DICOMIZER_REMOTE_PUBLIC_KEY")]
    pub remote_public_key: Option<String>,

    /// Remote tile source HMAC private key. Required with `--url`.
    #[arg(long, env = "DICOMIZER_REMOTE_PRIVATE_KEY")]
    pub remote_private_key: Option<String>,

    #[arg(long, value_enum, default_value_t = OutputFormat::Dicom)]
    pub output_format: OutputFormat,

    /// Worker thread count. Defaults to half the hardware threads, rounded up.
    #[arg(long, env = "DICOMIZER_THREADS")]
    pub threads: Option<usize>,

    /// Force decode+encode even when source and target compression match.
    #[arg(long, default_value_t = false, env = "DICOMIZER_REENCODE")]
    pub reencode: bool,

    /// Repaint background-colored pixels into boundary tiles that overflow
    /// the declared level dimensions.
    #[arg(long, default_value_t = false, env = "DICOMIZER_REPAINT")]
    pub repaint: bool,

    /// Background color as "R,G,B" (each 0..=255).
    #[arg(long, default_value = "255,255,255", env = "DICOMIZER_COLOR")]
    pub color: String,

    /// Alignment for plain PNG/JPEG sources; 1 means no padding.
    #[arg(long, default_value_t = DEFAULT_PADDING_ALIGNMENT, env = "DICOMIZER_PADDING")]
    pub padding: u32,

    /// Reconstruct missing upper pyramid levels.
    #[arg(long, default_value_t = false, env = "DICOMIZER_PYRAMID")]
    pub pyramid: bool,

    /// Apply a 5x5 Gaussian blur before halving during reconstruction.
    #[arg(long, default_value_t = false, env = "DICOMIZER_SMOOTH")]
    pub smooth: bool,

    /// Target level count; 0 means choose automatically.
    #[arg(long, default_value_t = 0, env = "DICOMIZER_LEVELS")]
    pub levels: u32,

    /// Split level for the two-pass reconstruction; 0 means choose
    /// automatically.
    #[arg(long, default_value_t = 0, env = "DICOMIZER_LOWER_LEVELS")]
    pub lower_levels: u32,

    /// Target tile width; 0 inherits the source's tile width.
    #[arg(long, default_value_t = 0, env = "DICOMIZER_TILE_WIDTH")]
    pub tile_width: u32,

    /// Target tile height; 0 inherits the source's tile height.
    #[arg(long, default_value_t = 0, env = "DICOMIZER_TILE_HEIGHT")]
    pub tile_height: u32,

    /// Output tile compression.
    #[arg(long, default_value = "jpeg", env = "DICOMIZER_COMPRESSION")]
    pub compression: String,

    /// JPEG quality, 1..=100.
    #[arg(long, default_value_t = 90, env = "DICOMIZER_JPEG_QUALITY")]
    pub jpeg_quality: u8,

    /// DICOM per-instance soft size cap in bytes; 0 disables concatenation.
    #[arg(long, default_value_t = DEFAULT_MAX_DICOM_FILE_SIZE, env = "DICOMIZER_MAX_SIZE")]
    pub max_size: u64,

    #[arg(long, value_enum, default_value_t = OpticalPathTemplate::Brightfield, env = "DICOMIZER_OPTICAL_PATH")]
    pub optical_path: OpticalPathTemplate,

    /// Imaged volume width in millimetres; unset applies the writer's own
    /// default at tagging time.
    #[arg(long, env = "DICOMIZER_IMAGED_VOLUME_WIDTH_MM")]
    pub imaged_volume_width_mm: Option<f64>,

    /// Imaged volume height in millimetres; unset applies the writer's own
    /// default at tagging time.
    #[arg(long, env = "DICOMIZER_IMAGED_VOLUME_HEIGHT_MM")]
    pub imaged_volume_height_mm: Option<f64>,

    /// Imaged volume depth in millimetres.
    #[arg(long, default_value_t = 0.0, env = "DICOMIZER_IMAGED_VOLUME_DEPTH_MM")]
    pub imaged_volume_depth_mm: f64,

    /// Imaged volume X offset in the slide coordinate system, millimetres.
    #[arg(long, default_value_t = 0.0, env = "DICOMIZER_IMAGED_VOLUME_OFFSET_X_MM")]
    pub imaged_volume_offset_x_mm: f64,

    /// Imaged volume Y offset in the slide coordinate system, millimetres.
    #[arg(long, default_value_t = 0.0, env = "DICOMIZER_IMAGED_VOLUME_OFFSET_Y_MM")]
    pub imaged_volume_offset_y_mm: f64,

    /// Path to an ICC profile to embed; empty uses the built-in sRGB default.
    #[arg(long, env = "DICOMIZER_ICC_PROFILE")]
    pub icc_profile: Option<PathBuf>,

    /// Output folder for the disk sink.
    #[arg(long, env = "DICOMIZER_FOLDER")]
    pub folder: Option<PathBuf>,

    /// printf-style numeric slot for the disk sink's file names, e.g.
    /// "instance-%03d.dcm".
    #[arg(long, default_value = "instance-%04d.dcm", env = "DICOMIZER_FOLDER_PATTERN")]
    pub folder_pattern: String,

    /// Orthanc-style REST base URL, used instead of `--folder`.
    #[arg(long, env = "DICOMIZER_ORTHANC")]
    pub orthanc: Option<String>,

    #[arg(long, env = "DICOMIZER_USERNAME")]
    pub username: Option<String>,

    #[arg(long, env = "DICOMIZER_PASSWORD")]
    pub password: Option<String>,

    #[arg(long, env = "DICOMIZER_PROXY")]
    pub proxy: Option<String>,

    /// REST request timeout in seconds.
    #[arg(long, default_value_t = 60, env = "DICOMIZER_TIMEOUT")]
    pub timeout: u64,

    #[arg(long, default_value_t = true, env = "DICOMIZER_VERIFY_PEERS")]
    pub verify_peers: bool,

    #[arg(long, env = "DICOMIZER_CA_CERTIFICATES")]
    pub ca_certificates: Option<PathBuf>,

    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,
}

impl ConvertConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.input.is_none() && self.url.is_none() {
            return Err("either a source path or --url must be given".to_string());
        }
        if self.url.is_some()
            && (self.remote_image_id.is_none() || self.remote_public_key.is_none() || self.remote_private_key.is_none())
        {
            return Err("--url requires --remote-image-id, --remote-public-key and --remote-private-key".to_string());
        }
        if self.jpeg_quality == 0 || self.jpeg_quality > 100 {
            return Err("jpeg_quality must be between 1 and 100".to_string());
        }
        if self.tile_width % 2 != 0 && self.tile_width != 0 {
            return Err("tile_width must be 0 or even".to_string());
        }
        if self.tile_height % 2 != 0 && self.tile_height != 0 {
            return Err("tile_height must be 0 or even".to_string());
        }
        if self.folder.is_some() && self.orthanc.is_some() {
            return Err("--folder and --orthanc are mutually exclusive sinks".to_string());
        }
        if matches!(self.output_format, OutputFormat::Dicom)
            && self.folder.is_none()
            && self.orthanc.is_none()
        {
            return Err("DICOM output requires --folder or --orthanc".to_string());
        }
        if self.imaged_volume_width_mm.is_some_and(|w| w <= 0.0) {
            return Err("--imaged-volume-width-mm must be positive when given".to_string());
        }
        if self.imaged_volume_height_mm.is_some_and(|h| h <= 0.0) {
            return Err("--imaged-volume-height-mm must be positive when given".to_string());
        }
        self.parse_color().map(|_| ())?;
        self.parse_compression().map(|_| ())?;
        Ok(())
    }

    /// Resolved worker count: the configured value, or half the available
    /// hardware threads rounded up, matching the core specification's
    /// default for `threads`.
    pub fn resolved_threads(&self) -> usize {
        self.threads
            .unwrap_or_else(|| num_cpus::get().div_ceil(2).max(1))
    }

    pub fn parse_color(&self) -> Result<(u8, u8, u8), String> {
        let parts: Vec<&str> = self.color.split(',').collect();
        if parts.len() != 3 {
            return Err(format!("invalid --color '{}', expected R,G,B", self.color));
        }
        let mut values = [0u8; 3];
        for (i, p) in parts.iter().enumerate() {
            values[i] = p
                .trim()
                .parse::<u8>()
                .map_err(|_| format!("invalid --color component '{}'", p))?;
        }
        Ok((values[0], values[1], values[2]))
    }

    pub fn parse_compression(&self) -> Result<Compression, String> {
        match self.compression.to_ascii_lowercase().as_str() {
            "none" => Ok(Compression::None),
            "jpeg" => Ok(Compression::Jpeg),
            "jpeg2000" => Ok(Compression::Jpeg2000),
            "jpeg-ls" | "jpegls" => Ok(Compression::JpegLs),
            other => Err(format!("unknown --compression '{}'", other)),
        }
    }

    /// Output pixel format is always RGB24 or Gray8; the pipeline derives it
    /// from the source rather than taking it as a CLI option (spec §1
    /// non-goals exclude other pixel formats entirely).
    pub fn default_pixel_format(&self) -> PixelFormat {
        PixelFormat::Rgb24
    }
}

// =============================================================================
// Tests
// =============================================================================
