//! Hierarchical (pyramidal) TIFF tiled source.
//!
//! Generalizes the teacher's `GenericTiffReader` (which already handles
//! Aperio SVS and plain pyramidal TIFF alike via `format::detect`) into a
//! `TiledSource` by pairing it with a type-erased reader, exposing both the
//! JPEGTables-merged raw bytes (for transcoding passthrough) and fully
//! decoded tiles through the shared `pixel::codec` path.

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::PyramidError;
use crate::format::generic_tiff::GenericTiffReader;
use crate::pixel::{decode_tile as codec_decode_tile, Compression, PhotometricInterpretation, PixelFormat};

use super::{DecodedTile, DynRangeReader, TiledSource, TiledSourceLevel};

pub struct HierarchicalTiffSource {
    reader: DynRangeReader,
    inner: GenericTiffReader,
}

impl HierarchicalTiffSource {
    pub async fn open(reader: DynRangeReader) -> Result<Self, PyramidError> {
        let inner = GenericTiffReader::open(&reader).await?;
        Ok(HierarchicalTiffSource { reader, inner })
    }

    pub fn warnings(&self) -> &[String] {
        self.inner.warnings()
    }

    /// `true` if the tile at this grid position has a nonzero byte count,
    /// i.e. is not a sparse hole in the TIFF's tile offset table.
    fn tile_has_data(&self, level: u32, tile_x: u32, tile_y: u32) -> bool {
        self.inner
            .get_level(level as usize)
            .and_then(|l| l.get_tile_location(tile_x, tile_y))
            .map(|(_, size)| size > 0)
            .unwrap_or(false)
    }
}

#[async_trait]
impl TiledSource for HierarchicalTiffSource {
    fn level_count(&self) -> u32 {
        self.inner.level_count() as u32
    }

    fn level(&self, level: u32) -> Option<TiledSourceLevel> {
        let idx = level as usize;
        let (width, height) = self.inner.level_dimensions(idx)?;
        let (tile_width, tile_height) = self.inner.tile_size(idx)?;
        let (tiles_x, tiles_y) = self.inner.tile_count(idx)?;
        let downsample = self.inner.level_downsample(idx)?;
        Some(TiledSourceLevel {
            level,
            width,
            height,
            tile_width,
            tile_height,
            tiles_x,
            tiles_y,
            downsample,
        })
    }

    fn pixel_format(&self) -> PixelFormat {
        PixelFormat::Rgb24
    }

    fn photometric_interpretation(&self) -> PhotometricInterpretation {
        PhotometricInterpretation::Rgb
    }

    async fn read_raw_tile(
        &self,
        level: u32,
        tile_x: u32,
        tile_y: u32,
    ) -> Result<Option<(Bytes, Compression)>, PyramidError> {
        if !self.tile_has_data(level, tile_x, tile_y) {
            return Ok(None);
        }
        let jpeg_bytes = self
            .inner
            .read_tile(&self.reader, level as usize, tile_x, tile_y)
            .await?;
        Ok(Some((jpeg_bytes, Compression::Jpeg)))
    }

    async fn decode_tile(
        &self,
        level: u32,
        tile_x: u32,
        tile_y: u32,
    ) -> Result<DecodedTile, PyramidError> {
        let info = self
            .level(level)
            .ok_or_else(|| PyramidError::ParameterOutOfRange(format!("level {} out of range", level)))?;

        if !self.tile_has_data(level, tile_x, tile_y) {
            let image = crate::pixel::Image::allocate(PixelFormat::Rgb24, info.tile_width, info.tile_height);
            return Ok(DecodedTile { image, is_empty: true });
        }

        let jpeg_bytes = self
            .inner
            .read_tile(&self.reader, level as usize, tile_x, tile_y)
            .await?;

        let image = codec_decode_tile(&jpeg_bytes, Compression::Jpeg, info.tile_width, info.tile_height)?;
        Ok(DecodedTile { image, is_empty: false })
    }
}
