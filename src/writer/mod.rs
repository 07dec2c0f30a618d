//! The `PyramidWriter` abstraction: a format-agnostic interface for emitting
//! tiles into a pyramid output (multiframe DICOM, hierarchical TIFF, an
//! in-memory tiled image, or a level-truncating wrapper around any of the
//! above).
//!
//! Generalizes `IPyramidWriter`/`PyramidWriterBase`: levels are declared
//! strictly decreasing in size before any tile is written, and a tile may be
//! supplied either pre-compressed (`write_raw_tile`, transcoded if its
//! compression does not match the writer's own) or as a decoded pixel buffer
//! (`encode_tile`). As in the teacher's `PyramidSourceInner`, a trait this
//! shaped cannot be boxed into a trait object once it is also generic over
//! its own output sink, so dispatch goes through a closed enum.

mod dicom;
mod memory;
mod tiff;
mod truncated;

pub use dicom::{generate_uid, DicomInstanceSink, DicomPyramidWriter, DicomWriterConfig, FolderSink, OrthancSink, OrthancSinkConfig};
pub use memory::InMemoryTiledImage;
pub use tiff::HierarchicalTiffWriter;
pub use truncated::TruncatedPyramidWriter;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::PyramidError;
use crate::pixel::{Compression, Image, PixelFormat};

/// Bookkeeping for one pyramid level, mirroring `PyramidWriterBase::Level`.
#[derive(Debug, Clone, Copy)]
pub struct WriterLevel {
    pub z: u32,
    pub width: u32,
    pub height: u32,
    pub tiles_x: u32,
    pub tiles_y: u32,
}

/// Per-writer level bookkeeping shared by every concrete writer: validates
/// that levels are added in strictly decreasing size before any tile write,
/// and rejects further `add_level` calls once writing has started.
pub struct LevelTracker {
    tile_width: u32,
    tile_height: u32,
    levels: Vec<WriterLevel>,
    first_tile_written: bool,
}

impl LevelTracker {
    pub fn new(tile_width: u32, tile_height: u32) -> Self {
        LevelTracker {
            tile_width,
            tile_height,
            levels: Vec::new(),
            first_tile_written: false,
        }
    }

    pub fn add_level(&mut self, width: u32, height: u32) -> Result<WriterLevel, PyramidError> {
        if self.first_tile_written {
            return Err(PyramidError::BadSequenceOfCalls(
                "cannot add pyramid levels after some tile has already been written".to_string(),
            ));
        }

        if let Some(previous) = self.levels.last() {
            if width >= previous.width || height >= previous.height || width == 0 || height == 0 {
                return Err(PyramidError::BadSequenceOfCalls(
                    "levels must have strictly decreasing sizes".to_string(),
                ));
            }
        }

        let level = WriterLevel {
            z: self.levels.len() as u32,
            width,
            height,
            tiles_x: width.div_ceil(self.tile_width),
            tiles_y: height.div_ceil(self.tile_height),
        };
        self.levels.push(level);
        Ok(level)
    }

    pub fn level(&self, z: u32) -> Result<WriterLevel, PyramidError> {
        self.levels
            .get(z as usize)
            .copied()
            .ok_or_else(|| PyramidError::ParameterOutOfRange(format!("no such pyramid level: {}", z)))
    }

    pub fn level_count(&self) -> u32 {
        self.levels.len() as u32
    }

    pub fn mark_tile_written(&mut self) {
        self.first_tile_written = true;
    }

    pub fn tile_width(&self) -> u32 {
        self.tile_width
    }

    pub fn tile_height(&self) -> u32 {
        self.tile_height
    }
}

/// Output sink for a pyramid writer's raw bytes: either a local file or some
/// remote store (Orthanc's REST API, in the original; this crate targets a
/// local filesystem path by default, with the trait left open for other
/// sinks since the conversion pipeline is not tied to any particular
/// destination).
#[async_trait]
pub trait PyramidWriter: Send {
    fn level_count(&self) -> u32;

    fn pixel_format(&self) -> PixelFormat;

    fn tile_width(&self) -> u32;

    fn tile_height(&self) -> u32;

    fn count_tiles_x(&self, level: u32) -> Result<u32, PyramidError>;

    fn count_tiles_y(&self, level: u32) -> Result<u32, PyramidError>;

    /// Declares a new pyramid level. Levels must be added finest-last...
    /// actually coarsest-last: widths/heights must strictly decrease, level 0
    /// being the full-resolution level. Must be called before any tile write.
    async fn add_level(&mut self, width: u32, height: u32) -> Result<(), PyramidError>;

    /// Writes an already-compressed tile. If `compression` does not match
    /// this writer's own compression, the tile is transcoded first.
    async fn write_raw_tile(
        &mut self,
        tile: Bytes,
        compression: Compression,
        level: u32,
        tile_x: u32,
        tile_y: u32,
    ) -> Result<(), PyramidError>;

    /// Encodes and writes a decoded tile.
    async fn encode_tile(&mut self, tile: &Image, level: u32, tile_x: u32, tile_y: u32) -> Result<(), PyramidError>;

    /// Flushes any buffered state (out-of-order tiles, open DICOM instances)
    /// to the output sink. Must be called exactly once, after the last tile.
    async fn flush(&mut self) -> Result<(), PyramidError>;
}

/// Closed enum dispatching to one of the four `PyramidWriter` implementations.
pub enum PyramidWriterInner {
    Dicom(Box<DicomPyramidWriter>),
    HierarchicalTiff(Box<HierarchicalTiffWriter>),
    Memory(Box<InMemoryTiledImage>),
    Truncated(Box<TruncatedPyramidWriter>),
}

macro_rules! dispatch {
    ($self:ident, $method:ident $(, $arg:expr)*) => {
        match $self {
            PyramidWriterInner::Dicom(w) => w.$method($($arg),*),
            PyramidWriterInner::HierarchicalTiff(w) => w.$method($($arg),*),
            PyramidWriterInner::Memory(w) => w.$method($($arg),*),
            PyramidWriterInner::Truncated(w) => w.$method($($arg),*),
        }
    };
}

#[async_trait]
impl PyramidWriter for PyramidWriterInner {
    fn level_count(&self) -> u32 {
        dispatch!(self, level_count)
    }

    fn pixel_format(&self) -> PixelFormat {
        dispatch!(self, pixel_format)
    }

    fn tile_width(&self) -> u32 {
        dispatch!(self, tile_width)
    }

    fn tile_height(&self) -> u32 {
        dispatch!(self, tile_height)
    }

    fn count_tiles_x(&self, level: u32) -> Result<u32, PyramidError> {
        dispatch!(self, count_tiles_x, level)
    }

    fn count_tiles_y(&self, level: u32) -> Result<u32, PyramidError> {
        dispatch!(self, count_tiles_y, level)
    }

    async fn add_level(&mut self, width: u32, height: u32) -> Result<(), PyramidError> {
        match self {
            PyramidWriterInner::Dicom(w) => w.add_level(width, height).await,
            PyramidWriterInner::HierarchicalTiff(w) => w.add_level(width, height).await,
            PyramidWriterInner::Memory(w) => w.add_level(width, height).await,
            PyramidWriterInner::Truncated(w) => w.add_level(width, height).await,
        }
    }

    async fn write_raw_tile(
        &mut self,
        tile: Bytes,
        compression: Compression,
        level: u32,
        tile_x: u32,
        tile_y: u32,
    ) -> Result<(), PyramidError> {
        match self {
            PyramidWriterInner::Dicom(w) => w.write_raw_tile(tile, compression, level, tile_x, tile_y).await,
            PyramidWriterInner::HierarchicalTiff(w) => {
                w.write_raw_tile(tile, compression, level, tile_x, tile_y).await
            }
            PyramidWriterInner::Memory(w) => w.write_raw_tile(tile, compression, level, tile_x, tile_y).await,
            PyramidWriterInner::Truncated(w) => w.write_raw_tile(tile, compression, level, tile_x, tile_y).await,
        }
    }

    async fn encode_tile(&mut self, tile: &Image, level: u32, tile_x: u32, tile_y: u32) -> Result<(), PyramidError> {
        match self {
            PyramidWriterInner::Dicom(w) => w.encode_tile(tile, level, tile_x, tile_y).await,
            PyramidWriterInner::HierarchicalTiff(w) => w.encode_tile(tile, level, tile_x, tile_y).await,
            PyramidWriterInner::Memory(w) => w.encode_tile(tile, level, tile_x, tile_y).await,
            PyramidWriterInner::Truncated(w) => w.encode_tile(tile, level, tile_x, tile_y).await,
        }
    }

    async fn flush(&mut self) -> Result<(), PyramidError> {
        match self {
            PyramidWriterInner::Dicom(w) => w.flush().await,
            PyramidWriterInner::HierarchicalTiff(w) => w.flush().await,
            PyramidWriterInner::Memory(w) => w.flush().await,
            PyramidWriterInner::Truncated(w) => w.flush().await,
        }
    }
}

/// Shared `write_raw_tile` transcode-if-mismatched logic, factored out of
/// `PyramidWriterBase::WriteRawTile` so every concrete writer gets it for
/// free instead of repeating the branch.
pub(crate) fn transcode_if_needed(
    tile: Bytes,
    from: Compression,
    to: Compression,
    width: u32,
    height: u32,
    quality: u8,
) -> Result<Bytes, PyramidError> {
    if from == to {
        Ok(tile)
    } else {
        crate::pixel::change_tile_compression(&tile, from, to, width, height, quality)
    }
}
