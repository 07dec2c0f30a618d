//! HTTP tile & IIIF surface (core specification §2/§4.7/§6) serving tiles
//! directly out of DICOM pyramids opened through [`PyramidRegistry`],
//! independent of the teacher's S3-backed SVS path in
//! [`super::handlers`]/[`super::routes`].
//!
//! Three endpoint families, grounded on the specification's §6 table:
//!
//! - `GET /pyramids/{series_id}` - pyramid metadata JSON.
//! - `GET /pyramids/{series_id}/tiles/{level}/{x}/{y}` - a native tile,
//!   content negotiated between PNG/JPEG via `Accept`.
//! - `GET /iiif/tiles/{series_id}/info.json` and
//!   `GET /iiif/tiles/{series_id}/{region}/{size}/{rotation}/{quality}.{format}`
//!   - IIIF Image API 3.0; only `rotation=0`, `quality=default`,
//!   `format=jpg` and `region` of `full` or `x,y,w,h` are supported, per the
//!   specification's explicit restriction.
//! - `GET /iiif/series/{series_id}/manifest.json` - a minimal IIIF
//!   Presentation API 3.0 manifest referencing the Image API service above.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use tokio::sync::Semaphore;
use tracing::warn;

use crate::error::PyramidError;
use crate::pixel::{encode_tile, Compression, Image, PixelFormat};
use crate::pyramid::{PyramidSourceInner, TiledSource, TiledSourceLevel};

use super::pyramid_registry::PyramidRegistry;

const DEFAULT_IIIF_JPEG_QUALITY: u8 = 85;

/// Shared state for every handler in this module.
#[derive(Clone)]
pub struct IiifState {
    pub registry: Arc<PyramidRegistry>,
    /// Process-wide decode+encode throttle (core specification §5:
    /// "a process-wide counting semaphore limits concurrent decode+encode
    /// operations to the number of hardware threads").
    pub transcode_semaphore: Arc<Semaphore>,
    pub jpeg_quality: u8,
}

impl IiifState {
    pub fn new(registry: PyramidRegistry) -> Self {
        let threads = std::thread::available_parallelism().map(|n| n.get()).unwrap_or(4);
        IiifState {
            registry: Arc::new(registry),
            transcode_semaphore: Arc::new(Semaphore::new(threads)),
            jpeg_quality: DEFAULT_IIIF_JPEG_QUALITY,
        }
    }
}

/// Newtype so `PyramidError` can implement `IntoResponse` without this crate
/// needing to depend on `axum` in `error.rs`, matching the kind -> status
/// mapping in the specification's §7 error handling design.
pub struct IiifError(pub PyramidError);

impl From<PyramidError> for IiifError {
    fn from(err: PyramidError) -> Self {
        IiifError(err)
    }
}

impl IntoResponse for IiifError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            PyramidError::UnknownResource(_) => StatusCode::NOT_FOUND,
            PyramidError::ParameterOutOfRange(_) | PyramidError::SizeMismatch(_) => {
                StatusCode::BAD_REQUEST
            }
            PyramidError::NotImplemented(_) => StatusCode::NOT_ACCEPTABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = serde_json::json!({ "error": self.0.to_string() });
        (status, Json(body)).into_response()
    }
}

// =============================================================================
// Pyramid metadata
// =============================================================================

#[derive(Debug, Serialize)]
struct PyramidLevelJson {
    level: u32,
    width: u32,
    height: u32,
    tile_width: u32,
    tile_height: u32,
    downsample: f64,
}

impl From<TiledSourceLevel> for PyramidLevelJson {
    fn from(l: TiledSourceLevel) -> Self {
        PyramidLevelJson {
            level: l.level,
            width: l.width,
            height: l.height,
            tile_width: l.tile_width,
            tile_height: l.tile_height,
            downsample: l.downsample,
        }
    }
}

#[derive(Debug, Serialize)]
struct PyramidMetadata {
    series_id: String,
    level_count: u32,
    pixel_format: &'static str,
    photometric_interpretation: &'static str,
    levels: Vec<PyramidLevelJson>,
}

/// `GET /pyramids/{series_id}`
pub async fn pyramid_metadata_handler(
    State(state): State<IiifState>,
    Path(series_id): Path<String>,
) -> Result<Json<PyramidMetadata>, IiifError> {
    let source = state.registry.get(&series_id).await?;
    let levels = (0..source.level_count())
        .filter_map(|l| source.level(l))
        .map(PyramidLevelJson::from)
        .collect();

    Ok(Json(PyramidMetadata {
        series_id,
        level_count: source.level_count(),
        pixel_format: match source.pixel_format() {
            PixelFormat::Gray8 => "gray8",
            PixelFormat::Rgb24 => "rgb24",
        },
        photometric_interpretation: source.photometric_interpretation().dicom_code(),
        levels,
    }))
}

// =============================================================================
// Native tile serving, content-negotiated
// =============================================================================

/// Parses an `Accept` header into the first of PNG/JPEG it mentions, in the
/// order the header lists them. Falls back to JPEG when the header is
/// absent or only contains a wildcard; returns `None` when it names media
/// types this server cannot produce (the caller maps that to HTTP 406).
fn negotiate_tile_format(headers: &HeaderMap) -> Option<Compression> {
    let Some(accept) = headers.get(header::ACCEPT).and_then(|v| v.to_str().ok()) else {
        return Some(Compression::Jpeg);
    };

    let mut wildcard = false;
    for entry in accept.split(',') {
        let media_type = entry.split(';').next().unwrap_or("").trim().to_ascii_lowercase();
        match media_type.as_str() {
            "image/jpeg" | "image/jpg" => return Some(Compression::Jpeg),
            "image/png" => return Some(Compression::Png),
            "*/*" | "image/*" => wildcard = true,
            // JPEG-2000 negotiation is accepted per the wire contract but this
            // server has no JPEG-2000 encoder (§4.1: decode-only), so treat it
            // the same as an unsupported media type rather than silently
            // substituting JPEG.
            _ => {}
        }
    }
    if wildcard {
        Some(Compression::Jpeg)
    } else {
        None
    }
}

#[derive(Debug, serde::Deserialize)]
pub struct TilePathParams {
    pub series_id: String,
    pub level: u32,
    pub x: u32,
    pub y: u32,
}

/// `GET /pyramids/{series_id}/tiles/{level}/{x}/{y}`
pub async fn pyramid_tile_handler(
    State(state): State<IiifState>,
    Path(params): Path<TilePathParams>,
    headers: HeaderMap,
) -> Result<Response, IiifError> {
    let Some(compression) = negotiate_tile_format(&headers) else {
        return Err(IiifError(PyramidError::NotImplemented(
            "no supported media type in Accept header (supported: image/jpeg, image/png)".to_string(),
        )));
    };

    let source = state.registry.get(&params.series_id).await?;
    let _permit = state.transcode_semaphore.acquire().await;
    let tile = source.decode_tile(params.level, params.x, params.y).await?;
    let bytes = encode_tile(&tile.image, compression, state.jpeg_quality)?;

    let content_type = match compression {
        Compression::Jpeg => "image/jpeg",
        Compression::Png => "image/png",
        _ => "application/octet-stream",
    };

    Ok(Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, content_type)
        .header("X-Tile-Empty", tile.is_empty.to_string())
        .body(axum::body::Body::from(bytes))
        .unwrap())
}

// =============================================================================
// IIIF Image API 3.0
// =============================================================================

#[derive(Debug, Serialize)]
struct IiifTileSize {
    width: u32,
    height: u32,
    #[serde(rename = "scaleFactors")]
    scale_factors: Vec<u32>,
}

#[derive(Debug, Serialize)]
struct IiifImageInfo {
    #[serde(rename = "@context")]
    context: &'static str,
    id: String,
    #[serde(rename = "type")]
    type_: &'static str,
    protocol: &'static str,
    profile: &'static str,
    width: u32,
    height: u32,
    tiles: Vec<IiifTileSize>,
}

/// Downsample factors that are exact powers of two, level 0 first. A level
/// whose downsample isn't a power of two is dropped with a warning rather
/// than included, matching the specification's §7 note on IIIF
/// power-of-two compatibility.
fn power_of_two_scale_factors(source: &PyramidSourceInner) -> Vec<u32> {
    let mut factors = Vec::new();
    for l in 0..source.level_count() {
        let Some(level) = source.level(l) else { continue };
        let rounded = level.downsample.round().max(1.0) as u32;
        if rounded.is_power_of_two() {
            factors.push(rounded);
        } else {
            warn!(
                "pyramid level {} has a non-power-of-two downsample {:.3}; dropping it from IIIF scaleFactors",
                l, level.downsample
            );
        }
    }
    factors
}

/// `GET /iiif/tiles/{series_id}/info.json`
pub async fn iiif_info_handler(
    State(state): State<IiifState>,
    Path(series_id): Path<String>,
) -> Result<Response, IiifError> {
    let source = state.registry.get(&series_id).await?;
    let level0 = source
        .level(0)
        .ok_or_else(|| PyramidError::InternalError("pyramid has no level 0".to_string()))?;

    let info = IiifImageInfo {
        context: "http://iiif.io/api/image/3/context.json",
        id: format!("/iiif/tiles/{}", series_id),
        type_: "ImageService3",
        protocol: "http://iiif.io/api/image",
        profile: "level0",
        width: level0.width,
        height: level0.height,
        tiles: vec![IiifTileSize {
            width: level0.tile_width,
            height: level0.tile_height,
            scale_factors: power_of_two_scale_factors(&source),
        }],
    };

    Ok(Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/ld+json")
        .body(axum::body::Body::from(serde_json::to_vec(&info).unwrap()))
        .unwrap())
}

/// `region,size,rotation,quality.format` path parameters for the IIIF tile
/// endpoint. Kept as raw strings (rather than a richer deserialized shape)
/// since IIIF's own grammar for each segment needs hand parsing anyway.
#[derive(Debug, serde::Deserialize)]
pub struct IiifTilePathParams {
    pub series_id: String,
    pub region: String,
    pub size: String,
    pub rotation: String,
    /// `{quality}.{format}`, e.g. `default.jpg`.
    pub quality_format: String,
}

struct ParsedRegion {
    x: u32,
    y: u32,
    w: u32,
    h: u32,
}

fn parse_region(region: &str, full_width: u32, full_height: u32) -> Result<ParsedRegion, PyramidError> {
    if region == "full" || region == "max" {
        return Ok(ParsedRegion { x: 0, y: 0, w: full_width, h: full_height });
    }
    let parts: Vec<&str> = region.split(',').collect();
    if parts.len() != 4 {
        return Err(PyramidError::ParameterOutOfRange(format!(
            "unsupported IIIF region {:?}; only \"full\" or \"x,y,w,h\" are supported",
            region
        )));
    }
    let nums: Result<Vec<u32>, _> = parts.iter().map(|p| p.parse::<u32>()).collect();
    let nums = nums.map_err(|_| {
        PyramidError::ParameterOutOfRange(format!("non-numeric IIIF region {:?}", region))
    })?;
    let (x, y, w, h) = (nums[0], nums[1], nums[2], nums[3]);
    if w == 0 || h == 0 || x >= full_width || y >= full_height {
        return Err(PyramidError::ParameterOutOfRange(format!(
            "IIIF region {:?} out of bounds for a {}x{} image",
            region, full_width, full_height
        )));
    }
    Ok(ParsedRegion { x, y, w: w.min(full_width - x), h: h.min(full_height - y) })
}

/// Returns the requested output `(width, height)` given the region's own
/// size, supporting the `w,`, `,h`, `w,h`, `full` and `max` forms.
fn parse_size(size: &str, region_w: u32, region_h: u32) -> Result<(u32, u32), PyramidError> {
    if size == "full" || size == "max" {
        return Ok((region_w, region_h));
    }
    let Some((w_str, h_str)) = size.split_once(',') else {
        return Err(PyramidError::ParameterOutOfRange(format!(
            "unsupported IIIF size {:?}",
            size
        )));
    };
    match (w_str.is_empty(), h_str.is_empty()) {
        (false, false) => {
            let w = w_str
                .parse::<u32>()
                .map_err(|_| PyramidError::ParameterOutOfRange(format!("bad IIIF size {:?}", size)))?;
            let h = h_str
                .parse::<u32>()
                .map_err(|_| PyramidError::ParameterOutOfRange(format!("bad IIIF size {:?}", size)))?;
            Ok((w, h))
        }
        (false, true) => {
            let w = w_str
                .parse::<u32>()
                .map_err(|_| PyramidError::ParameterOutOfRange(format!("bad IIIF size {:?}", size)))?;
            let h = ((w as u64 * region_h as u64) / region_w.max(1) as u64).max(1) as u32;
            Ok((w, h))
        }
        (true, false) => {
            let h = h_str
                .parse::<u32>()
                .map_err(|_| PyramidError::ParameterOutOfRange(format!("bad IIIF size {:?}", size)))?;
            let w = ((h as u64 * region_w as u64) / region_h.max(1) as u64).max(1) as u32;
            Ok((w, h))
        }
        (true, true) => Err(PyramidError::ParameterOutOfRange(format!(
            "IIIF size {:?} supplies neither width nor height",
            size
        ))),
    }
}

/// Composites the pixels of `[x, x+w) x [y, y+h)` at level 0 out of
/// however many native tiles that rectangle spans.
async fn extract_region(
    source: &PyramidSourceInner,
    region: &ParsedRegion,
) -> Result<Image, PyramidError> {
    let level0 = source
        .level(0)
        .ok_or_else(|| PyramidError::InternalError("pyramid has no level 0".to_string()))?;
    let tw = level0.tile_width;
    let th = level0.tile_height;

    let mut dest = Image::allocate(source.pixel_format(), region.w, region.h);

    let first_tile_x = region.x / tw;
    let last_tile_x = (region.x + region.w - 1) / tw;
    let first_tile_y = region.y / th;
    let last_tile_y = (region.y + region.h - 1) / th;

    for tile_y in first_tile_y..=last_tile_y {
        for tile_x in first_tile_x..=last_tile_x {
            if !source.tile_exists(0, tile_x, tile_y) {
                continue;
            }
            let tile = source.decode_tile(0, tile_x, tile_y).await?;
            if tile.is_empty {
                continue;
            }
            let dst_x = tile_x as i64 * tw as i64 - region.x as i64;
            let dst_y = tile_y as i64 * th as i64 - region.y as i64;
            dest.embed_cropped(&tile.image, dst_x, dst_y);
        }
    }

    Ok(dest)
}

/// `GET /iiif/tiles/{series_id}/{region}/{size}/{rotation}/{quality}.{format}`
pub async fn iiif_tile_handler(
    State(state): State<IiifState>,
    Path(params): Path<IiifTilePathParams>,
) -> Result<Response, IiifError> {
    if params.rotation != "0" {
        return Err(IiifError(PyramidError::ParameterOutOfRange(format!(
            "unsupported IIIF rotation {:?}; only \"0\" is supported",
            params.rotation
        ))));
    }
    let Some((quality, format)) = params.quality_format.split_once('.') else {
        return Err(IiifError(PyramidError::ParameterOutOfRange(format!(
            "malformed IIIF quality.format segment {:?}",
            params.quality_format
        ))));
    };
    if quality != "default" {
        return Err(IiifError(PyramidError::ParameterOutOfRange(format!(
            "unsupported IIIF quality {:?}; only \"default\" is supported",
            quality
        ))));
    }
    if format != "jpg" {
        return Err(IiifError(PyramidError::NotImplemented(format!(
            "unsupported IIIF format {:?}; only \"jpg\" is supported",
            format
        ))));
    }

    let source = state.registry.get(&params.series_id).await?;
    let level0 = source
        .level(0)
        .ok_or_else(|| PyramidError::InternalError("pyramid has no level 0".to_string()))?;
    let region = parse_region(&params.region, level0.width, level0.height)?;
    let (out_w, out_h) = parse_size(&params.size, region.w, region.h)?;

    let _permit = state.transcode_semaphore.acquire().await;
    let cropped = extract_region(&source, &region).await?;
    let resized = if (out_w, out_h) == (cropped.width(), cropped.height()) {
        cropped
    } else {
        cropped.resize_nearest(out_w, out_h)
    };
    let bytes = encode_tile(&resized, Compression::Jpeg, state.jpeg_quality)?;

    Ok(Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "image/jpeg")
        .body(axum::body::Body::from(bytes))
        .unwrap())
}

// =============================================================================
// IIIF Presentation API 3.0
// =============================================================================

#[derive(Debug, Serialize)]
struct PresentationManifest {
    #[serde(rename = "@context")]
    context: &'static str,
    id: String,
    #[serde(rename = "type")]
    type_: &'static str,
    label: serde_json::Value,
    items: Vec<PresentationCanvas>,
}

#[derive(Debug, Serialize)]
struct PresentationCanvas {
    id: String,
    #[serde(rename = "type")]
    type_: &'static str,
    width: u32,
    height: u32,
    items: Vec<serde_json::Value>,
}

/// `GET /iiif/series/{series_id}/manifest.json`
pub async fn iiif_manifest_handler(
    State(state): State<IiifState>,
    Path(series_id): Path<String>,
) -> Result<Response, IiifError> {
    let source = state.registry.get(&series_id).await?;
    let level0 = source
        .level(0)
        .ok_or_else(|| PyramidError::InternalError("pyramid has no level 0".to_string()))?;

    let image_service_id = format!("/iiif/tiles/{}", series_id);
    let canvas_id = format!("/iiif/series/{}/canvas/1", series_id);
    let annotation_page = serde_json::json!({
        "id": format!("{}/page/1", canvas_id),
        "type": "AnnotationPage",
        "items": [{
            "id": format!("{}/annotation/1", canvas_id),
            "type": "Annotation",
            "motivation": "painting",
            "body": {
                "id": format!("{}/full/max/0/default.jpg", image_service_id),
                "type": "Image",
                "format": "image/jpeg",
                "width": level0.width,
                "height": level0.height,
                "service": [{
                    "id": image_service_id,
                    "type": "ImageService3",
                    "profile": "level0",
                }],
            },
            "target": canvas_id,
        }],
    });

    let manifest = PresentationManifest {
        context: "http://iiif.io/api/presentation/3/context.json",
        id: format!("/iiif/series/{}/manifest.json", series_id),
        type_: "Manifest",
        label: serde_json::json!({ "none": [series_id.clone()] }),
        items: vec![PresentationCanvas {
            id: canvas_id,
            type_: "Canvas",
            width: level0.width,
            height: level0.height,
            items: vec![annotation_page],
        }],
    };

    Ok(Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/ld+json")
        .body(axum::body::Body::from(serde_json::to_vec(&manifest).unwrap()))
        .unwrap())
}
