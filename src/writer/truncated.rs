//! A `PyramidWriter` wrapper that mirrors one level's tiles into an
//! in-memory tiled image while forwarding every level and every tile through
//! unchanged to the real writer underneath.
//!
//! Grounded on the truncated-pyramid conversion mode: when a pyramid is
//! reconstructed down to some coarse "split level" from a native resolution
//! that does not itself reach that level, the reconstruction command needs a
//! second pass that treats the split level's tiles as its new level-0 input.
//! Since `PyramidWriter` has no read-back API, this wrapper captures the
//! split level's tiles as they are written so that second pass can read them
//! straight out of memory instead.

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::PyramidError;
use crate::pixel::{Compression, Image, PhotometricInterpretation, PixelFormat};

use super::memory::InMemoryTiledImage;
use super::PyramidWriter;

pub struct TruncatedPyramidWriter {
    inner: Box<dyn PyramidWriter>,
    split_level: u32,
    coarse: Option<InMemoryTiledImage>,
}

impl TruncatedPyramidWriter {
    /// `split_level` is the level whose tiles should also be captured into an
    /// in-memory grid (set once that level's dimensions are known, via
    /// `set_coarse_grid`, since `add_level` on the in-memory image cannot add
    /// levels after construction).
    pub fn new(inner: Box<dyn PyramidWriter>, split_level: u32) -> Self {
        TruncatedPyramidWriter {
            inner,
            split_level,
            coarse: None,
        }
    }

    /// Must be called once, after `add_level` has been issued for
    /// `split_level` on this writer, so the coarse mirror's grid matches.
    pub fn set_coarse_grid(&mut self, tiles_x: u32, tiles_y: u32, photometric: PhotometricInterpretation) {
        self.coarse = Some(InMemoryTiledImage::new(
            self.inner.pixel_format(),
            tiles_x,
            tiles_y,
            self.inner.tile_width(),
            self.inner.tile_height(),
            photometric,
        ));
    }

    pub fn coarse_image(&self) -> Option<&InMemoryTiledImage> {
        self.coarse.as_ref()
    }

    pub fn split_level(&self) -> u32 {
        self.split_level
    }

    pub fn into_parts(self) -> (Box<dyn PyramidWriter>, Option<InMemoryTiledImage>) {
        (self.inner, self.coarse)
    }
}

#[async_trait]
impl PyramidWriter for TruncatedPyramidWriter {
    fn level_count(&self) -> u32 {
        self.inner.level_count()
    }

    fn pixel_format(&self) -> PixelFormat {
        self.inner.pixel_format()
    }

    fn tile_width(&self) -> u32 {
        self.inner.tile_width()
    }

    fn tile_height(&self) -> u32 {
        self.inner.tile_height()
    }

    fn count_tiles_x(&self, level: u32) -> Result<u32, PyramidError> {
        self.inner.count_tiles_x(level)
    }

    fn count_tiles_y(&self, level: u32) -> Result<u32, PyramidError> {
        self.inner.count_tiles_y(level)
    }

    async fn add_level(&mut self, width: u32, height: u32) -> Result<(), PyramidError> {
        self.inner.add_level(width, height).await
    }

    async fn write_raw_tile(
        &mut self,
        tile: Bytes,
        compression: Compression,
        level: u32,
        tile_x: u32,
        tile_y: u32,
    ) -> Result<(), PyramidError> {
        if level == self.split_level {
            if let Some(coarse) = &mut self.coarse {
                coarse.write_raw_tile(tile.clone(), compression, 0, tile_x, tile_y).await?;
            }
        }
        self.inner.write_raw_tile(tile, compression, level, tile_x, tile_y).await
    }

    async fn encode_tile(&mut self, tile: &Image, level: u32, tile_x: u32, tile_y: u32) -> Result<(), PyramidError> {
        if level == self.split_level {
            if let Some(coarse) = &mut self.coarse {
                coarse.encode_tile(tile, 0, tile_x, tile_y).await?;
            }
        }
        self.inner.encode_tile(tile, level, tile_x, tile_y).await
    }

    async fn flush(&mut self) -> Result<(), PyramidError> {
        self.inner.flush().await
    }
}
