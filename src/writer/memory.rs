//! An in-memory, single-level tiled image that is both a `TiledSource` and a
//! `PyramidWriter`. Used as the embedded storage behind a truncated pyramid's
//! coarsest level, and as scratch space when reconstructing missing levels.
//!
//! Grounded on `InMemoryTiledImage.{h,cpp}`: a fixed `countTilesX` x
//! `countTilesY` grid, always decoded (raw writes are immediately decoded
//! and stored; there is no raw-tile readback), tiles not yet written are a
//! hard error to read rather than a background fill.

use std::collections::HashMap;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::PyramidError;
use crate::pixel::{decode_tile, Compression, Image, PhotometricInterpretation, PixelFormat};
use crate::pyramid::{DecodedTile, TiledSource, TiledSourceLevel};

use super::PyramidWriter;

pub struct InMemoryTiledImage {
    format: PixelFormat,
    photometric: PhotometricInterpretation,
    count_tiles_x: u32,
    count_tiles_y: u32,
    tile_width: u32,
    tile_height: u32,
    tiles: HashMap<(u32, u32), Image>,
}

impl InMemoryTiledImage {
    pub fn new(
        format: PixelFormat,
        count_tiles_x: u32,
        count_tiles_y: u32,
        tile_width: u32,
        tile_height: u32,
        photometric: PhotometricInterpretation,
    ) -> Self {
        InMemoryTiledImage {
            format,
            photometric,
            count_tiles_x,
            count_tiles_y,
            tile_width,
            tile_height,
            tiles: HashMap::new(),
        }
    }

    fn check_level(level: u32) -> Result<(), PyramidError> {
        if level != 0 {
            Err(PyramidError::ParameterOutOfRange(format!("in-memory tiled image has only level 0, got {}", level)))
        } else {
            Ok(())
        }
    }

    fn check_bounds(&self, tile_x: u32, tile_y: u32) -> Result<(), PyramidError> {
        if tile_x >= self.count_tiles_x || tile_y >= self.count_tiles_y {
            Err(PyramidError::ParameterOutOfRange(format!(
                "tile ({}, {}) is out of the {}x{} grid",
                tile_x, tile_y, self.count_tiles_x, self.count_tiles_y
            )))
        } else {
            Ok(())
        }
    }

    pub fn level_width(&self) -> u32 {
        self.tile_width * self.count_tiles_x
    }

    pub fn level_height(&self) -> u32 {
        self.tile_height * self.count_tiles_y
    }
}

#[async_trait]
impl TiledSource for InMemoryTiledImage {
    fn level_count(&self) -> u32 {
        1
    }

    fn level(&self, level: u32) -> Option<TiledSourceLevel> {
        if level != 0 {
            return None;
        }
        Some(TiledSourceLevel {
            level: 0,
            width: self.level_width(),
            height: self.level_height(),
            tile_width: self.tile_width,
            tile_height: self.tile_height,
            tiles_x: self.count_tiles_x,
            tiles_y: self.count_tiles_y,
            downsample: 1.0,
        })
    }

    fn pixel_format(&self) -> PixelFormat {
        self.format
    }

    fn photometric_interpretation(&self) -> PhotometricInterpretation {
        self.photometric
    }

    async fn read_raw_tile(
        &self,
        level: u32,
        _tile_x: u32,
        _tile_y: u32,
    ) -> Result<Option<(Bytes, Compression)>, PyramidError> {
        Self::check_level(level)?;
        Ok(None)
    }

    async fn decode_tile(&self, level: u32, tile_x: u32, tile_y: u32) -> Result<DecodedTile, PyramidError> {
        Self::check_level(level)?;
        self.check_bounds(tile_x, tile_y)?;

        match self.tiles.get(&(tile_x, tile_y)) {
            Some(image) => Ok(DecodedTile {
                image: image.clone(),
                is_empty: false,
            }),
            None => Err(PyramidError::InternalError(format!(
                "tile ({}, {}) has not been set in the in-memory tiled image",
                tile_x, tile_y
            ))),
        }
    }
}

#[async_trait]
impl PyramidWriter for InMemoryTiledImage {
    fn level_count(&self) -> u32 {
        1
    }

    fn pixel_format(&self) -> PixelFormat {
        self.format
    }

    fn tile_width(&self) -> u32 {
        self.tile_width
    }

    fn tile_height(&self) -> u32 {
        self.tile_height
    }

    fn count_tiles_x(&self, level: u32) -> Result<u32, PyramidError> {
        Self::check_level(level)?;
        Ok(self.count_tiles_x)
    }

    fn count_tiles_y(&self, level: u32) -> Result<u32, PyramidError> {
        Self::check_level(level)?;
        Ok(self.count_tiles_y)
    }

    async fn add_level(&mut self, _width: u32, _height: u32) -> Result<(), PyramidError> {
        Err(PyramidError::BadSequenceOfCalls(
            "the in-memory tiled image has a fixed single level, set at construction".to_string(),
        ))
    }

    async fn write_raw_tile(
        &mut self,
        tile: Bytes,
        compression: Compression,
        level: u32,
        tile_x: u32,
        tile_y: u32,
    ) -> Result<(), PyramidError> {
        let decoded = decode_tile(&tile, compression, self.tile_width, self.tile_height)?;
        self.encode_tile(&decoded, level, tile_x, tile_y).await
    }

    async fn encode_tile(&mut self, tile: &Image, level: u32, tile_x: u32, tile_y: u32) -> Result<(), PyramidError> {
        Self::check_level(level)?;
        self.check_bounds(tile_x, tile_y)?;
        self.tiles.insert((tile_x, tile_y), tile.clone());
        Ok(())
    }

    async fn flush(&mut self) -> Result<(), PyramidError> {
        Ok(())
    }
}
