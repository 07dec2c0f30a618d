//! A hierarchical (pyramidal) classic-TIFF writer.
//!
//! Grounded on `format::tiff::parser::TiffHeader`/`format::tiff::tags`: this
//! writer emits exactly the byte layout those modules parse back, restricted
//! to classic TIFF (4-byte offsets) since no file this crate produces is
//! expected to cross the 4GiB mark at the tile sizes whole-slide pyramids
//! use. Only JPEG-compressed tiles are supported, mirroring
//! `format::tiff::tags::Compression::is_supported`.
//!
//! Tiles can arrive out of raster order (the reconstruction command finishes
//! quadrants independently), so tiles for positions past the writer's current
//! raster cursor are spooled to a `tempfile` scratch file and replayed once
//! their turn comes, keeping memory bounded by the number of pending tiles
//! rather than their bytes.

use std::collections::HashMap;
use std::io::{Read, Seek, SeekFrom, Write};

use async_trait::async_trait;
use bytes::Bytes;
use tempfile::NamedTempFile;

use crate::error::PyramidError;
use crate::format::tiff::TiffTag;
use crate::pixel::{Compression, Image, PhotometricInterpretation, PixelFormat};

use super::{transcode_if_needed, LevelTracker, PyramidWriter};

const ENTRY_SIZE: usize = 12;

/// A tile that has arrived before its raster turn, spooled to disk so the
/// writer does not have to hold an unbounded number of pending tiles in
/// memory.
struct PendingTile {
    file: NamedTempFile,
    len: u64,
}

struct LevelState {
    width: u32,
    height: u32,
    tiles_x: u32,
    tiles_y: u32,
    next_raster_index: u32,
    offsets: Vec<u32>,
    byte_counts: Vec<u32>,
    pending: HashMap<u32, PendingTile>,
    done: bool,
}

impl LevelState {
    fn new(width: u32, height: u32, tiles_x: u32, tiles_y: u32) -> Self {
        let total = (tiles_x * tiles_y) as usize;
        LevelState {
            width,
            height,
            tiles_x,
            tiles_y,
            next_raster_index: 0,
            offsets: vec![0u32; total],
            byte_counts: vec![0u32; total],
            pending: HashMap::new(),
            done: false,
        }
    }
}

/// Emits a pyramidal classic TIFF: one tiled IFD per level, chained through
/// the standard "next IFD offset" linked list, coarsest level last.
pub struct HierarchicalTiffWriter {
    tracker: LevelTracker,
    photometric: PhotometricInterpretation,
    pixel_format: PixelFormat,
    quality: u8,
    buffer: Vec<u8>,
    levels: Vec<LevelState>,
    first_ifd_offset_patch: Option<usize>,
    previous_ifd_next_offset_patch: Option<usize>,
    flushed: bool,
    output_path: std::path::PathBuf,
}

impl HierarchicalTiffWriter {
    pub fn new(
        output_path: std::path::PathBuf,
        tile_width: u32,
        tile_height: u32,
        photometric: PhotometricInterpretation,
        pixel_format: PixelFormat,
        quality: u8,
    ) -> Self {
        let mut buffer = Vec::with_capacity(4096);
        // Classic TIFF header: byte order, magic 42, first IFD offset (patched later).
        buffer.extend_from_slice(b"II");
        buffer.extend_from_slice(&42u16.to_le_bytes());
        let first_ifd_offset_patch = buffer.len();
        buffer.extend_from_slice(&0u32.to_le_bytes());

        HierarchicalTiffWriter {
            tracker: LevelTracker::new(tile_width, tile_height),
            photometric,
            pixel_format,
            quality: quality.clamp(1, 100),
            buffer,
            levels: Vec::new(),
            first_ifd_offset_patch: Some(first_ifd_offset_patch),
            previous_ifd_next_offset_patch: None,
            flushed: false,
            output_path,
        }
    }

    fn samples_per_pixel(&self) -> u16 {
        match self.pixel_format {
            PixelFormat::Gray8 => 1,
            PixelFormat::Rgb24 => 3,
        }
    }

    fn photometric_code(&self) -> u16 {
        match self.photometric {
            PhotometricInterpretation::Rgb => 2,
            PhotometricInterpretation::Monochrome2 => 1,
            PhotometricInterpretation::YbrFull422 | PhotometricInterpretation::YbrIct => 6,
        }
    }

    fn raster_index(level: &LevelState, tile_x: u32, tile_y: u32) -> Result<u32, PyramidError> {
        if tile_x >= level.tiles_x || tile_y >= level.tiles_y {
            return Err(PyramidError::ParameterOutOfRange(format!(
                "tile ({}, {}) is out of the {}x{} grid",
                tile_x, tile_y, level.tiles_x, level.tiles_y
            )));
        }
        Ok(tile_y * level.tiles_x + tile_x)
    }

    /// Appends `bytes` to the output buffer at its current end, records the
    /// placed offset/length in the level's tile tables, and advances the
    /// raster cursor, replaying any pending tiles that are now due.
    fn place_tile(&mut self, level_z: u32, raster_index: u32, bytes: &[u8]) -> Result<(), PyramidError> {
        let offset = self.buffer.len() as u32;
        self.buffer.extend_from_slice(bytes);

        let level = &mut self.levels[level_z as usize];
        level.offsets[raster_index as usize] = offset;
        level.byte_counts[raster_index as usize] = bytes.len() as u32;
        level.next_raster_index = raster_index + 1;
        Ok(())
    }

    fn write_tile_bytes(&mut self, level_z: u32, tile_x: u32, tile_y: u32, bytes: &[u8]) -> Result<(), PyramidError> {
        let raster_index = Self::raster_index(&self.levels[level_z as usize], tile_x, tile_y)?;
        let level = &self.levels[level_z as usize];

        if raster_index == level.next_raster_index {
            self.place_tile(level_z, raster_index, bytes)?;
            self.drain_pending(level_z)?;
        } else if raster_index < level.next_raster_index {
            return Err(PyramidError::BadSequenceOfCalls(format!(
                "tile ({}, {}) at level {} was already written",
                tile_x, tile_y, level_z
            )));
        } else {
            let mut file = NamedTempFile::new()
                .map_err(|e| PyramidError::InternalError(format!("failed to create spool file: {}", e)))?;
            file.write_all(bytes)
                .map_err(|e| PyramidError::InternalError(format!("failed to write spool file: {}", e)))?;
            let len = bytes.len() as u64;
            self.levels[level_z as usize].pending.insert(raster_index, PendingTile { file, len });
        }
        Ok(())
    }

    fn drain_pending(&mut self, level_z: u32) -> Result<(), PyramidError> {
        loop {
            let next = self.levels[level_z as usize].next_raster_index;
            let Some(mut pending) = self.levels[level_z as usize].pending.remove(&next) else {
                break;
            };
            let mut contents = Vec::with_capacity(pending.len as usize);
            pending
                .file
                .seek(SeekFrom::Start(0))
                .map_err(|e| PyramidError::InternalError(format!("failed to seek spool file: {}", e)))?;
            pending
                .file
                .read_to_end(&mut contents)
                .map_err(|e| PyramidError::InternalError(format!("failed to read spool file: {}", e)))?;
            self.place_tile(level_z, next, &contents)?;
        }
        Ok(())
    }

    /// Writes the IFD for a completed level: entries sorted ascending by tag,
    /// external array data (`TileOffsets`/`TileByteCounts`) appended
    /// immediately after the entry table. The next-IFD-offset field (or, for
    /// level 0, the header's first-IFD-offset field) is patched once this IFD
    /// lands, since its offset is only known after the preceding data is
    /// written.
    fn write_ifd_for_level(&mut self, level_z: u32) -> Result<(), PyramidError> {
        let level = &self.levels[level_z as usize];
        if level.next_raster_index != level.tiles_x * level.tiles_y {
            return Err(PyramidError::BadSequenceOfCalls(format!(
                "level {} is missing tiles: {}/{} written",
                level_z,
                level.next_raster_index,
                level.tiles_x * level.tiles_y
            )));
        }

        let width = level.width;
        let height = level.height;
        let tile_width = self.tracker.tile_width();
        let tile_height = self.tracker.tile_height();
        let tile_count = level.offsets.len();
        let samples_per_pixel = self.samples_per_pixel();
        let photometric_code = self.photometric_code();
        let is_ycbcr = self.photometric == PhotometricInterpretation::YbrFull422
            || self.photometric == PhotometricInterpretation::YbrIct;

        let mut entries: Vec<(u16, u16, u32, Vec<u8>)> = Vec::new();
        // (tag, field_type, count, inline-or-external payload bytes)
        entries.push((TiffTag::ImageWidth.as_u16(), 4, 1, width.to_le_bytes().to_vec()));
        entries.push((TiffTag::ImageLength.as_u16(), 4, 1, height.to_le_bytes().to_vec()));
        entries.push((
            TiffTag::BitsPerSample.as_u16(),
            3,
            samples_per_pixel as u32,
            bits_per_sample_payload(samples_per_pixel),
        ));
        entries.push((TiffTag::Compression.as_u16(), 3, 1, (7u16).to_le_bytes().to_vec()));
        entries.push((
            TiffTag::PhotometricInterpretation.as_u16(),
            3,
            1,
            photometric_code.to_le_bytes().to_vec(),
        ));
        entries.push((
            TiffTag::SamplesPerPixel.as_u16(),
            3,
            1,
            samples_per_pixel.to_le_bytes().to_vec(),
        ));
        entries.push((TiffTag::PlanarConfiguration.as_u16(), 3, 1, (1u16).to_le_bytes().to_vec()));
        entries.push((TiffTag::TileWidth.as_u16(), 3, 1, (tile_width as u16).to_le_bytes().to_vec()));
        entries.push((TiffTag::TileLength.as_u16(), 3, 1, (tile_height as u16).to_le_bytes().to_vec()));

        let mut offsets_payload = Vec::with_capacity(tile_count * 4);
        for offset in &level.offsets {
            offsets_payload.extend_from_slice(&offset.to_le_bytes());
        }
        entries.push((TiffTag::TileOffsets.as_u16(), 4, tile_count as u32, offsets_payload));

        let mut byte_counts_payload = Vec::with_capacity(tile_count * 4);
        for count in &level.byte_counts {
            byte_counts_payload.extend_from_slice(&count.to_le_bytes());
        }
        entries.push((TiffTag::TileByteCounts.as_u16(), 4, tile_count as u32, byte_counts_payload));

        if is_ycbcr {
            entries.push((TiffTag::YCbCrSubSampling.as_u16(), 3, 2, vec![2, 0, 2, 0]));
        }

        entries.sort_by_key(|(tag, ..)| *tag);

        let ifd_start = self.buffer.len();
        let entry_count = entries.len() as u16;
        self.buffer.extend_from_slice(&entry_count.to_le_bytes());

        // Reserve the entry table; external payloads are appended right
        // after it, so each entry's offset is (ifd_start + header) + running
        // external-data length computed ahead of time.
        let entry_table_start = self.buffer.len();
        let entry_table_len = entries.len() * ENTRY_SIZE;
        let external_data_start = entry_table_start + entry_table_len + 4; // + next-IFD-offset field
        self.buffer.resize(entry_table_start + entry_table_len, 0);

        let mut external_cursor = external_data_start as u32;
        let mut external_blob = Vec::new();

        for (i, (tag, field_type, count, payload)) in entries.iter().enumerate() {
            let entry_offset = entry_table_start + i * ENTRY_SIZE;
            self.buffer[entry_offset..entry_offset + 2].copy_from_slice(&tag.to_le_bytes());
            self.buffer[entry_offset + 2..entry_offset + 4].copy_from_slice(&field_type.to_le_bytes());
            self.buffer[entry_offset + 4..entry_offset + 8].copy_from_slice(&count.to_le_bytes());

            if payload.len() <= 4 {
                let mut inline = [0u8; 4];
                inline[..payload.len()].copy_from_slice(payload);
                self.buffer[entry_offset + 8..entry_offset + 12].copy_from_slice(&inline);
            } else {
                self.buffer[entry_offset + 8..entry_offset + 12].copy_from_slice(&external_cursor.to_le_bytes());
                external_blob.extend_from_slice(payload);
                external_cursor += payload.len() as u32;
            }
        }

        // Next-IFD-offset placeholder, patched once the following IFD (or
        // nothing, for the coarsest level) is known.
        let next_offset_field = self.buffer.len();
        self.buffer.extend_from_slice(&0u32.to_le_bytes());
        self.buffer.extend_from_slice(&external_blob);

        if let Some(patch_at) = self.first_ifd_offset_patch.take() {
            let value = (ifd_start as u32).to_le_bytes();
            self.buffer[patch_at..patch_at + 4].copy_from_slice(&value);
        } else if let Some(patch_at) = self.previous_ifd_next_offset_patch.take() {
            let value = (ifd_start as u32).to_le_bytes();
            self.buffer[patch_at..patch_at + 4].copy_from_slice(&value);
        }
        self.previous_ifd_next_offset_patch = Some(next_offset_field);

        Ok(())
    }
}

fn bits_per_sample_payload(samples_per_pixel: u16) -> Vec<u8> {
    let mut payload = Vec::with_capacity(samples_per_pixel as usize * 2);
    for _ in 0..samples_per_pixel {
        payload.extend_from_slice(&8u16.to_le_bytes());
    }
    payload
}

#[async_trait]
impl PyramidWriter for HierarchicalTiffWriter {
    fn level_count(&self) -> u32 {
        self.tracker.level_count()
    }

    fn pixel_format(&self) -> PixelFormat {
        self.pixel_format
    }

    fn tile_width(&self) -> u32 {
        self.tracker.tile_width()
    }

    fn tile_height(&self) -> u32 {
        self.tracker.tile_height()
    }

    fn count_tiles_x(&self, level: u32) -> Result<u32, PyramidError> {
        Ok(self.tracker.level(level)?.tiles_x)
    }

    fn count_tiles_y(&self, level: u32) -> Result<u32, PyramidError> {
        Ok(self.tracker.level(level)?.tiles_y)
    }

    async fn add_level(&mut self, width: u32, height: u32) -> Result<(), PyramidError> {
        let level = self.tracker.add_level(width, height)?;
        self.levels.push(LevelState::new(width, height, level.tiles_x, level.tiles_y));
        Ok(())
    }

    async fn write_raw_tile(
        &mut self,
        tile: Bytes,
        compression: Compression,
        level: u32,
        tile_x: u32,
        tile_y: u32,
    ) -> Result<(), PyramidError> {
        self.tracker.level(level)?;
        let bytes = transcode_if_needed(
            tile,
            compression,
            Compression::Jpeg,
            self.tracker.tile_width(),
            self.tracker.tile_height(),
            self.quality,
        )?;
        self.tracker.mark_tile_written();
        self.write_tile_bytes(level, tile_x, tile_y, &bytes)
    }

    async fn encode_tile(&mut self, tile: &Image, level: u32, tile_x: u32, tile_y: u32) -> Result<(), PyramidError> {
        self.tracker.level(level)?;
        let bytes = crate::pixel::encode_tile(tile, Compression::Jpeg, self.quality)?;
        self.tracker.mark_tile_written();
        self.write_tile_bytes(level, tile_x, tile_y, &bytes)
    }

    async fn flush(&mut self) -> Result<(), PyramidError> {
        if self.flushed {
            return Ok(());
        }
        for level_z in 0..self.levels.len() as u32 {
            self.write_ifd_for_level(level_z)?;
        }
        self.flushed = true;

        let path = self.output_path.clone();
        let buffer = self.buffer.clone();
        tokio::fs::write(&path, buffer)
            .await
            .map_err(|e| PyramidError::InternalError(format!("failed to write TIFF to {}: {}", path.display(), e)))?;
        Ok(())
    }
}
