//! The resampling reader: the cache-and-repaint layer sitting between a
//! `TiledSource` and the task/writer layer (core specification §4.3).
//!
//! Grounded on `Framework/Algorithms/PyramidReader.{h,cpp}` in the original
//! orthanc-wsi implementation: a per-task, not-thread-safe object scoped to
//! one reconstruction/transcode command, wrapping a single pyramid level and
//! remapping target tile coordinates onto the source's own tile grid.

use std::cell::RefCell;
use std::collections::HashMap;

use crate::error::PyramidError;
use crate::pixel::{Compression, Image, PixelFormat};

use super::{PyramidSourceInner, TiledSource};

/// Background/repaint policy the reader applies while resampling. Mirrors
/// the subset of `DicomizerParameters` that `PyramidReader` actually reads.
#[derive(Debug, Clone, Copy)]
pub struct ResamplingParameters {
    pub force_reencode: bool,
    pub repaint_background: bool,
    pub background_color: (u8, u8, u8),
    pub safety_check: bool,
}

impl Default for ResamplingParameters {
    fn default() -> Self {
        ResamplingParameters {
            force_reencode: false,
            repaint_background: false,
            background_color: (255, 255, 255),
            safety_check: false,
        }
    }
}

/// One source tile's cached state: raw bytes (if usable as passthrough),
/// the decoded image (computed lazily), and whether the source considers
/// the tile empty.
struct SourceTile {
    raw: Option<(bytes::Bytes, Compression)>,
    decoded: RefCell<Option<Image>>,
    is_empty: bool,
}

/// Resamples a single pyramid level of a `TiledSource` onto a different
/// target tile grid, caching each visited source tile for the lifetime of
/// the reader. Not `Send`/`Sync` on purpose: one instance is created per
/// task and never shared across threads (§4.3, §5 "Resampling reader: not
/// thread-safe; one instance per task").
pub struct ResamplingReader<'a> {
    source: &'a PyramidSourceInner,
    level: u32,
    level_width: u32,
    level_height: u32,
    source_tile_width: u32,
    source_tile_height: u32,
    target_tile_width: u32,
    target_tile_height: u32,
    parameters: ResamplingParameters,
    cache: RefCell<HashMap<(u32, u32), SourceTile>>,
    outside: RefCell<Option<Image>>,
}

impl<'a> ResamplingReader<'a> {
    pub fn new(
        source: &'a PyramidSourceInner,
        level: u32,
        target_tile_width: u32,
        target_tile_height: u32,
        parameters: ResamplingParameters,
    ) -> Result<Self, PyramidError> {
        let info = source
            .level(level)
            .ok_or_else(|| PyramidError::ParameterOutOfRange(format!("level {} does not exist", level)))?;

        if info.tile_width % target_tile_width != 0 || info.tile_height % target_tile_height != 0 {
            return Err(PyramidError::SizeMismatch(format!(
                "source tile size {}x{} is not a multiple of target tile size {}x{}",
                info.tile_width, info.tile_height, target_tile_width, target_tile_height
            )));
        }

        Ok(ResamplingReader {
            source,
            level,
            level_width: info.width,
            level_height: info.height,
            source_tile_width: info.tile_width,
            source_tile_height: info.tile_height,
            target_tile_width,
            target_tile_height,
            parameters,
            cache: RefCell::new(HashMap::new()),
            outside: RefCell::new(None),
        })
    }

    pub fn pixel_format(&self) -> PixelFormat {
        self.source.pixel_format()
    }

    fn map_target_to_source(&self, tile_x: u32, tile_y: u32) -> (u32, u32) {
        let ratio_x = self.source_tile_width / self.target_tile_width;
        let ratio_y = self.source_tile_height / self.target_tile_height;
        (tile_x / ratio_x, tile_y / ratio_y)
    }

    fn is_boundary(&self, source_x: u32, source_y: u32) -> bool {
        (source_x + 1) * self.source_tile_width > self.level_width
            || (source_y + 1) * self.source_tile_height > self.level_height
    }

    async fn load_source_tile(&self, source_x: u32, source_y: u32) -> Result<(), PyramidError> {
        if self.cache.borrow().contains_key(&(source_x, source_y)) {
            return Ok(());
        }

        let needs_repaint = self.parameters.repaint_background && self.is_boundary(source_x, source_y);

        let entry = if !self.parameters.force_reencode && !needs_repaint {
            match self.source.read_raw_tile(self.level, source_x, source_y).await? {
                Some((bytes, compression)) => {
                    if self.parameters.safety_check {
                        let decoded = crate::pixel::decode_tile(
                            &bytes,
                            compression,
                            self.source_tile_width,
                            self.source_tile_height,
                        )?;
                        if decoded.width() != self.source_tile_width || decoded.height() != self.source_tile_height {
                            return Err(PyramidError::SizeMismatch(format!(
                                "source tile ({},{}) decodes to {}x{}, expected {}x{}",
                                source_x,
                                source_y,
                                decoded.width(),
                                decoded.height(),
                                self.source_tile_width,
                                self.source_tile_height
                            )));
                        }
                    }
                    SourceTile {
                        raw: Some((bytes, compression)),
                        decoded: RefCell::new(None),
                        is_empty: false,
                    }
                }
                None => self.decode_and_repaint(source_x, source_y).await?,
            }
        } else {
            self.decode_and_repaint(source_x, source_y).await?
        };

        self.cache.borrow_mut().insert((source_x, source_y), entry);
        Ok(())
    }

    async fn decode_and_repaint(&self, source_x: u32, source_y: u32) -> Result<SourceTile, PyramidError> {
        let tile = self.source.decode_tile(self.level, source_x, source_y).await?;
        let mut image = tile.image;

        if self.parameters.repaint_background && self.is_boundary(source_x, source_y) {
            self.repaint_background(&mut image, source_x, source_y);
        }

        Ok(SourceTile {
            raw: None,
            decoded: RefCell::new(Some(image)),
            is_empty: tile.is_empty,
        })
    }

    /// Fills the bottom and/or right overflow rectangles of a boundary tile
    /// with the background color, mirroring `SourceTile::RepaintBackground`.
    fn repaint_background(&self, image: &mut Image, source_x: u32, source_y: u32) {
        let (r, g, b) = self.parameters.background_color;

        if (source_y + 1) * self.source_tile_height > self.level_height {
            let visible_rows = self.level_height - source_y * self.source_tile_height;
            for y in visible_rows..self.source_tile_height {
                fill_row(image, y, 0, self.source_tile_width, r, g, b);
            }
        }

        if (source_x + 1) * self.source_tile_width > self.level_width {
            let visible_cols = self.level_width - source_x * self.source_tile_width;
            for y in 0..self.source_tile_height {
                fill_row(image, y, visible_cols, self.source_tile_width, r, g, b);
            }
        }
    }

    fn outside_tile(&self) -> Image {
        if self.outside.borrow().is_none() {
            let mut image = Image::allocate(self.pixel_format(), self.target_tile_width, self.target_tile_height);
            let (r, g, b) = self.parameters.background_color;
            image.set(r, g, b);
            *self.outside.borrow_mut() = Some(image);
        }
        self.outside.borrow().clone().unwrap()
    }

    /// Raw passthrough, only possible when source and target tile sizes are
    /// identical and the cached source tile has raw bytes available.
    pub async fn raw_tile(
        &self,
        tile_x: u32,
        tile_y: u32,
    ) -> Result<Option<(bytes::Bytes, Compression)>, PyramidError> {
        if self.source_tile_width != self.target_tile_width || self.source_tile_height != self.target_tile_height {
            return Ok(None);
        }

        let (source_x, source_y) = self.map_target_to_source(tile_x, tile_y);
        self.load_source_tile(source_x, source_y).await?;

        let cache = self.cache.borrow();
        let entry = cache.get(&(source_x, source_y)).expect("just inserted");
        Ok(entry.raw.clone())
    }

    /// Decoded tile at the target tile grid position, extracted from the
    /// (possibly larger) source tile that covers it.
    pub async fn decoded_tile(&self, tile_x: u32, tile_y: u32) -> Result<(Image, bool), PyramidError> {
        if tile_x * self.target_tile_width >= self.level_width
            || tile_y * self.target_tile_height >= self.level_height
        {
            return Ok((self.outside_tile(), true));
        }

        let (source_x, source_y) = self.map_target_to_source(tile_x, tile_y);
        self.load_source_tile(source_x, source_y).await?;

        let cache = self.cache.borrow();
        let entry = cache.get(&(source_x, source_y)).expect("just inserted");

        if entry.decoded.borrow().is_none() {
            let (bytes, compression) = entry.raw.clone().ok_or_else(|| {
                PyramidError::InternalError("source tile has neither raw bytes nor decoded image".to_string())
            })?;
            let mut decoded =
                crate::pixel::decode_tile(&bytes, compression, self.source_tile_width, self.source_tile_height)?;
            if self.parameters.repaint_background && self.is_boundary(source_x, source_y) {
                self.repaint_background(&mut decoded, source_x, source_y);
            }
            *entry.decoded.borrow_mut() = Some(decoded);
        }

        let ratio_x = self.source_tile_width / self.target_tile_width;
        let ratio_y = self.source_tile_height / self.target_tile_height;
        let xx = tile_x % ratio_x;
        let yy = tile_y % ratio_y;

        let source_image = entry.decoded.borrow();
        let source_image = source_image.as_ref().expect("decoded above");
        let cropped = extract_region(
            source_image,
            xx * self.target_tile_width,
            yy * self.target_tile_height,
            self.target_tile_width,
            self.target_tile_height,
        );

        Ok((cropped, entry.is_empty))
    }
}

fn fill_row(image: &mut Image, y: u32, from_x: u32, to_x: u32, r: u8, g: u8, b: u8) {
    let bpp = image.format().components();
    let value: Vec<u8> = match image.format() {
        PixelFormat::Gray8 => {
            let luma = 0.2126 * r as f32 + 0.7152 * g as f32 + 0.0722 * b as f32;
            vec![luma.round().clamp(0.0, 255.0) as u8]
        }
        PixelFormat::Rgb24 => vec![r, g, b],
    };
    let row = image.row_mut(y);
    for x in from_x..to_x {
        let off = x as usize * bpp;
        row[off..off + bpp].copy_from_slice(&value);
    }
}

fn extract_region(image: &Image, x: u32, y: u32, width: u32, height: u32) -> Image {
    let mut out = Image::allocate(image.format(), width, height);
    let bpp = image.format().components();
    for row in 0..height {
        let src_row = image.row(y + row);
        let src_start = x as usize * bpp;
        let src_bytes = &src_row[src_start..src_start + width as usize * bpp];
        out.row_mut(row).copy_from_slice(src_bytes);
    }
    out
}
