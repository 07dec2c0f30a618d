//! Single-level tiled source over a plain, already-decoded image: a plain
//! (non-pyramidal) TIFF, or a standalone PNG/JPEG.
//!
//! These inputs carry no pyramid structure of their own, so this source
//! decodes the whole image once at `open()` time and retiles it into a
//! virtual grid at the caller's chosen tile size, optionally padding the
//! last row/column of tiles out to a configured alignment so every tile in
//! the grid is a uniform size (the shape a DICOM multiframe writer and a
//! hierarchical TIFF writer both require).

use async_trait::async_trait;

use crate::error::PyramidError;
use crate::pixel::{bytes_per_pixel, Image, PhotometricInterpretation, PixelFormat};

use super::{DecodedTile, TiledSource, TiledSourceLevel};

pub struct PlainImageSource {
    image: Image,
    tile_width: u32,
    tile_height: u32,
    /// Background color used to fill tiles (or parts of edge tiles) beyond
    /// the source image's actual extent.
    background: (u8, u8, u8),
    tiles_x: u32,
    tiles_y: u32,
    /// Total padded extent, a multiple of the configured alignment.
    padded_width: u32,
    padded_height: u32,
}

impl PlainImageSource {
    /// `padding_alignment` of `1` disables padding (the grid's total extent
    /// equals the image's own dimensions, and the final row/column of tiles
    /// may be partially filled).
    pub fn new(
        image: Image,
        tile_width: u32,
        tile_height: u32,
        padding_alignment: u32,
        background: (u8, u8, u8),
    ) -> Result<Self, PyramidError> {
        if tile_width == 0 || tile_height == 0 {
            return Err(PyramidError::ParameterOutOfRange(
                "tile dimensions must be nonzero".to_string(),
            ));
        }
        let alignment = padding_alignment.max(1);
        let padded_width = round_up_to_multiple(image.width(), alignment);
        let padded_height = round_up_to_multiple(image.height(), alignment);

        Ok(PlainImageSource {
            tiles_x: padded_width.div_ceil(tile_width),
            tiles_y: padded_height.div_ceil(tile_height),
            image,
            tile_width,
            tile_height,
            background,
            padded_width,
            padded_height,
        })
    }
}

fn round_up_to_multiple(value: u32, multiple: u32) -> u32 {
    if multiple <= 1 {
        return value;
    }
    value.div_ceil(multiple) * multiple
}

#[async_trait]
impl TiledSource for PlainImageSource {
    fn level_count(&self) -> u32 {
        1
    }

    fn level(&self, level: u32) -> Option<TiledSourceLevel> {
        if level != 0 {
            return None;
        }
        Some(TiledSourceLevel {
            level: 0,
            width: self.padded_width,
            height: self.padded_height,
            tile_width: self.tile_width,
            tile_height: self.tile_height,
            tiles_x: self.tiles_x,
            tiles_y: self.tiles_y,
            downsample: 1.0,
        })
    }

    fn pixel_format(&self) -> PixelFormat {
        self.image.format()
    }

    fn photometric_interpretation(&self) -> PhotometricInterpretation {
        match self.image.format() {
            PixelFormat::Gray8 => PhotometricInterpretation::Monochrome2,
            PixelFormat::Rgb24 => PhotometricInterpretation::Rgb,
        }
    }

    async fn decode_tile(
        &self,
        level: u32,
        tile_x: u32,
        tile_y: u32,
    ) -> Result<DecodedTile, PyramidError> {
        if level != 0 || tile_x >= self.tiles_x || tile_y >= self.tiles_y {
            return Err(PyramidError::ParameterOutOfRange(format!(
                "tile ({}, {}) at level {} out of range",
                tile_x, tile_y, level
            )));
        }

        let origin_x = tile_x * self.tile_width;
        let origin_y = tile_y * self.tile_height;
        let format = self.image.format();

        if origin_x >= self.image.width() || origin_y >= self.image.height() {
            let mut tile = Image::allocate(format, self.tile_width, self.tile_height);
            tile.set(self.background.0, self.background.1, self.background.2);
            return Ok(DecodedTile { image: tile, is_empty: true });
        }

        let fully_inside = origin_x + self.tile_width <= self.image.width()
            && origin_y + self.tile_height <= self.image.height();

        if fully_inside {
            let tile = extract_subimage(&self.image, origin_x, origin_y, self.tile_width, self.tile_height);
            return Ok(DecodedTile { image: tile, is_empty: false });
        }

        // Edge tile: straddles the image's actual extent and the padded
        // region, so paint the background first then embed what overlaps.
        let mut tile = Image::allocate(format, self.tile_width, self.tile_height);
        tile.set(self.background.0, self.background.1, self.background.2);

        let copy_width = self.tile_width.min(self.image.width() - origin_x);
        let copy_height = self.tile_height.min(self.image.height() - origin_y);
        let overlap = extract_subimage(&self.image, origin_x, origin_y, copy_width, copy_height);
        tile.embed(&overlap, 0, 0);

        Ok(DecodedTile { image: tile, is_empty: false })
    }

    fn tile_exists(&self, level: u32, tile_x: u32, tile_y: u32) -> bool {
        level == 0 && tile_x < self.tiles_x && tile_y < self.tiles_y
    }
}

/// Copy the `width x height` region of `source` starting at `(x, y)` into a
/// freshly allocated image, row by row through `source`'s pitch.
fn extract_subimage(source: &Image, x: u32, y: u32, width: u32, height: u32) -> Image {
    let mut out = Image::allocate(source.format(), width, height);
    let bpp = bytes_per_pixel(source.format());
    let start = x as usize * bpp;
    let len = width as usize * bpp;
    for row in 0..height {
        let src_row = source.row(y + row);
        out.row_mut(row).copy_from_slice(&src_row[start..start + len]);
    }
    out
}
