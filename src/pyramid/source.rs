//! The `TiledSource` trait and its enum-dispatch wrapper.

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::PyramidError;
use crate::pixel::{Compression, Image, PhotometricInterpretation, PixelFormat};

use super::{
    DicomPyramidSource, ExternalSlideSource, HierarchicalTiffSource, PlainImageSource,
    RemoteTileSource,
};

/// Snapshot of one pyramid level's geometry, independent of the backing
/// format. Mirrors `slide::reader::LevelInfo`, generalized with an explicit
/// `level` index field since sources here are not always indexed
/// contiguously from storage (a DICOM pyramid's concatenation parts, for
/// instance, are reassembled before this struct is built).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TiledSourceLevel {
    pub level: u32,
    pub width: u32,
    pub height: u32,
    pub tile_width: u32,
    pub tile_height: u32,
    pub tiles_x: u32,
    pub tiles_y: u32,
    pub downsample: f64,
}

/// Physical extent of the specimen on the slide, in millimetres, plus the
/// slide-coordinate-system offset of the pixel matrix's (0, 0) corner.
///
/// Width/height are `None` when the source pyramid carries no volume
/// information at all; a writer tagging such a pyramid omits the
/// imaged-volume and per-frame slide-coordinate tags rather than invent
/// zeros. When both are set they imply a pixel spacing (`width_mm /
/// total_width`, `height_mm / total_height`) that should agree between the
/// two axes; callers that compute both are expected to warn, not fail, on a
/// mismatch, since a handful of real acquisitions are anisotropic.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ImagedVolumeParameters {
    pub width_mm: Option<f64>,
    pub height_mm: Option<f64>,
    pub depth_mm: f64,
    pub offset_x_mm: f64,
    pub offset_y_mm: f64,
}

impl Default for ImagedVolumeParameters {
    fn default() -> Self {
        ImagedVolumeParameters {
            width_mm: None,
            height_mm: None,
            depth_mm: 0.0,
            offset_x_mm: 0.0,
            offset_y_mm: 0.0,
        }
    }
}

impl ImagedVolumeParameters {
    /// Per-axis pixel spacing in millimetres, when both dimensions are known.
    pub fn pixel_spacing_mm(&self, total_width: u32, total_height: u32) -> Option<(f64, f64)> {
        let width_mm = self.width_mm?;
        let height_mm = self.height_mm?;
        if total_width == 0 || total_height == 0 {
            return None;
        }
        Some((width_mm / total_width as f64, height_mm / total_height as f64))
    }
}

/// A decoded tile plus whether it carried real data or was synthesized
/// (out-of-grid or a sparse hole filled with the background color). Mirrors
/// the core specification's `decodeTile(l, x, y) -> (image, isEmpty)`.
pub struct DecodedTile {
    pub image: Image,
    pub is_empty: bool,
}

/// Format-agnostic interface over a pyramid of tiles.
///
/// Implementations own whatever I/O handle they need (an HTTP range reader,
/// an open DICOM dataset, an in-memory image, a vendor SDK handle) rather
/// than taking one as a trait parameter, which is what makes boxing this
/// trait's object safety moot and the enum-dispatch in `PyramidSourceInner`
/// necessary instead.
#[async_trait]
pub trait TiledSource: Send + Sync {
    /// Number of pyramid levels, including level 0 (full resolution).
    fn level_count(&self) -> u32;

    /// Geometry of a single level, or `None` if `level` is out of range.
    fn level(&self, level: u32) -> Option<TiledSourceLevel>;

    /// Pixel format every level shares (spec §3: a pyramid carries one pixel
    /// format throughout).
    fn pixel_format(&self) -> PixelFormat;

    /// Photometric interpretation tiles decode from. Distinct from
    /// `pixel_format` because RGB, YBR_FULL_422 and YBR_ICT all decode into
    /// `Rgb24`.
    fn photometric_interpretation(&self) -> PhotometricInterpretation;

    /// Full-resolution (level 0) dimensions.
    fn dimensions(&self) -> Option<(u32, u32)> {
        self.level(0).map(|l| (l.width, l.height))
    }

    /// Index of the level whose downsample is the smallest value that is
    /// still `>=` the requested downsample, i.e. the lowest-resolution
    /// level that does not lose more detail than asked for.
    fn best_level_for_downsample(&self, downsample: f64) -> Option<u32> {
        let mut best: Option<(u32, f64)> = None;
        for lvl in 0..self.level_count() {
            let info = self.level(lvl)?;
            if info.downsample >= downsample {
                match best {
                    Some((_, best_ds)) if info.downsample >= best_ds => {}
                    _ => best = Some((lvl, info.downsample)),
                }
            }
        }
        best.map(|(lvl, _)| lvl)
            .or_else(|| Some(self.level_count().saturating_sub(1)))
    }

    /// Fetch a tile's raw compressed bytes without decoding, when the source
    /// can hand them back verbatim. Returns `None` for sources that have no
    /// raw-tile access at all (external slide library, remote tile server,
    /// plain PNG/JPEG) or whose tile at this position is a sparse hole.
    async fn read_raw_tile(
        &self,
        _level: u32,
        _tile_x: u32,
        _tile_y: u32,
    ) -> Result<Option<(Bytes, Compression)>, PyramidError> {
        Ok(None)
    }

    /// Decode one tile at `(level, tile_x, tile_y)` into an owned pixel
    /// buffer, reporting whether the position actually carried data or was
    /// synthesized. Implementations merge JPEGTables, apply YCbCr-to-RGB
    /// conversion, or fetch over HTTP as their format requires, but always
    /// return fully-decoded pixels here - compression is re-applied only at
    /// the writer/HTTP-response boundary.
    async fn decode_tile(
        &self,
        level: u32,
        tile_x: u32,
        tile_y: u32,
    ) -> Result<DecodedTile, PyramidError>;

    /// Whether a tile physically exists at this position, as distinct from
    /// being out of the level's tile grid entirely. Sparse pyramids (a
    /// DICOM series missing a concatenation part, a TIFF with holes in its
    /// tile offset table) can have in-grid tiles with no data; callers use
    /// this to decide whether to repaint with a background color instead of
    /// erroring.
    fn tile_exists(&self, level: u32, tile_x: u32, tile_y: u32) -> bool {
        match self.level(level) {
            Some(info) => tile_x < info.tiles_x && tile_y < info.tiles_y,
            None => false,
        }
    }
}

/// Closed enum dispatching to one of the five `TiledSource` implementations.
///
/// Mirrors `slide::registry::SlideReaderInner`'s role: a single concrete
/// type that can be stored, cloned into an `Arc`, and cached by the
/// pyramid registry, while still forwarding every call to whichever format
/// actually backs a given pyramid.
pub enum PyramidSourceInner {
    DicomPyramid(DicomPyramidSource),
    HierarchicalTiff(HierarchicalTiffSource),
    PlainImage(PlainImageSource),
    ExternalSlide(ExternalSlideSource),
    RemoteTile(RemoteTileSource),
}

macro_rules! dispatch {
    ($self:ident, $method:ident($($arg:expr),*)) => {
        match $self {
            PyramidSourceInner::DicomPyramid(s) => s.$method($($arg),*),
            PyramidSourceInner::HierarchicalTiff(s) => s.$method($($arg),*),
            PyramidSourceInner::PlainImage(s) => s.$method($($arg),*),
            PyramidSourceInner::ExternalSlide(s) => s.$method($($arg),*),
            PyramidSourceInner::RemoteTile(s) => s.$method($($arg),*),
        }
    };
}

#[async_trait]
impl TiledSource for PyramidSourceInner {
    fn level_count(&self) -> u32 {
        dispatch!(self, level_count())
    }

    fn level(&self, level: u32) -> Option<TiledSourceLevel> {
        dispatch!(self, level(level))
    }

    fn pixel_format(&self) -> PixelFormat {
        dispatch!(self, pixel_format())
    }

    fn photometric_interpretation(&self) -> PhotometricInterpretation {
        dispatch!(self, photometric_interpretation())
    }

    async fn read_raw_tile(
        &self,
        level: u32,
        tile_x: u32,
        tile_y: u32,
    ) -> Result<Option<(Bytes, Compression)>, PyramidError> {
        match self {
            PyramidSourceInner::DicomPyramid(s) => s.read_raw_tile(level, tile_x, tile_y).await,
            PyramidSourceInner::HierarchicalTiff(s) => s.read_raw_tile(level, tile_x, tile_y).await,
            PyramidSourceInner::PlainImage(s) => s.read_raw_tile(level, tile_x, tile_y).await,
            PyramidSourceInner::ExternalSlide(s) => s.read_raw_tile(level, tile_x, tile_y).await,
            PyramidSourceInner::RemoteTile(s) => s.read_raw_tile(level, tile_x, tile_y).await,
        }
    }

    async fn decode_tile(
        &self,
        level: u32,
        tile_x: u32,
        tile_y: u32,
    ) -> Result<DecodedTile, PyramidError> {
        match self {
            PyramidSourceInner::DicomPyramid(s) => s.decode_tile(level, tile_x, tile_y).await,
            PyramidSourceInner::HierarchicalTiff(s) => s.decode_tile(level, tile_x, tile_y).await,
            PyramidSourceInner::PlainImage(s) => s.decode_tile(level, tile_x, tile_y).await,
            PyramidSourceInner::ExternalSlide(s) => s.decode_tile(level, tile_x, tile_y).await,
            PyramidSourceInner::RemoteTile(s) => s.decode_tile(level, tile_x, tile_y).await,
        }
    }

    fn tile_exists(&self, level: u32, tile_x: u32, tile_y: u32) -> bool {
        dispatch!(self, tile_exists(level, tile_x, tile_y))
    }
}

impl PyramidSourceInner {
    /// The source's own background/absent-pixel color, when it carries one.
    /// Only a DICOM pyramid's "recommended absent pixel CIE L*a*b*" tag
    /// supplies this (§3); every other source kind returns `None` and the
    /// pipeline falls back to `--color`.
    pub fn background_color(&self) -> Option<(u8, u8, u8)> {
        match self {
            PyramidSourceInner::DicomPyramid(s) => s.background_color(),
            _ => None,
        }
    }
}
