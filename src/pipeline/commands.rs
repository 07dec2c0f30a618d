//! The two unit-of-work commands the conversion pipelines submit to the
//! worker pool (§4.6): transcode a rectangle of tiles verbatim, or
//! recursively reconstruct a quad-tree of missing upper-level tiles by
//! 2x2 mosaic reduction.
//!
//! Both hold their writer behind a `tokio::sync::Mutex` shared across
//! workers (spec §5: "Writers: guarded by an internal mutex; only one
//! thread may mutate at a time") and build their own
//! [`ResamplingReader`], which is deliberately *not* shared - §4.3/§5 call
//! out that the reader is scoped to a single task and needs no locking.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::runtime::Handle;
use tokio::sync::Mutex as AsyncMutex;

use crate::error::PyramidError;
use crate::pixel::Image;
use crate::pyramid::{PyramidSourceInner, ResamplingParameters, ResamplingReader};
use crate::task::Command;
use crate::writer::PyramidWriter;

type SharedWriter = Arc<AsyncMutex<Box<dyn PyramidWriter>>>;

/// Transcodes a rectangle of target tiles at one level: raw passthrough
/// when the resampling reader can provide it, otherwise a decode + re-encode
/// through the writer. Empty (sparse, out-of-grid) decoded tiles are
/// skipped rather than written - the core specification's "ICI" debug print
/// for this case is explicitly called out as dead output, not a protocol
/// hook (§ Open Questions), so this command stays silent here.
pub struct TranscodeCommand {
    pub source: Arc<PyramidSourceInner>,
    pub writer: SharedWriter,
    pub level: u32,
    pub target_tile_width: u32,
    pub target_tile_height: u32,
    pub start_x: u32,
    pub start_y: u32,
    pub count_x: u32,
    pub count_y: u32,
    pub parameters: ResamplingParameters,
}

impl Command for TranscodeCommand {
    fn execute(&self, handle: &Handle) -> Result<(), String> {
        handle.block_on(self.run()).map_err(|e| e.to_string())
    }
}

impl TranscodeCommand {
    async fn run(&self) -> Result<(), PyramidError> {
        let reader = ResamplingReader::new(
            &self.source,
            self.level,
            self.target_tile_width,
            self.target_tile_height,
            self.parameters,
        )?;

        for ty in self.start_y..self.start_y + self.count_y {
            for tx in self.start_x..self.start_x + self.count_x {
                if let Some((bytes, compression)) = reader.raw_tile(tx, ty).await? {
                    let mut writer = self.writer.lock().await;
                    writer.write_raw_tile(bytes, compression, self.level, tx, ty).await?;
                } else {
                    let (image, is_empty) = reader.decoded_tile(tx, ty).await?;
                    if !is_empty {
                        let mut writer = self.writer.lock().await;
                        writer.encode_tile(&image, self.level, tx, ty).await?;
                    }
                }
            }
        }
        Ok(())
    }
}

/// Builds one `TranscodeCommand` per block of `block_tiles x block_tiles`
/// target tiles at `level`, covering the whole level's tile grid. Mirrors
/// "Prepare-tasks generator: one command per source-tile rectangle per
/// level" - `block_tiles` is this command's block edge length in *target*
/// tile units.
#[allow(clippy::too_many_arguments)]
pub fn prepare_transcode_tasks(
    source: Arc<PyramidSourceInner>,
    writer: SharedWriter,
    level: u32,
    tiles_x: u32,
    tiles_y: u32,
    target_tile_width: u32,
    target_tile_height: u32,
    block_tiles: u32,
    parameters: ResamplingParameters,
) -> Vec<Box<dyn Command>> {
    let block_tiles = block_tiles.max(1);
    let mut commands: Vec<Box<dyn Command>> = Vec::new();
    let mut ty = 0;
    while ty < tiles_y {
        let count_y = block_tiles.min(tiles_y - ty);
        let mut tx = 0;
        while tx < tiles_x {
            let count_x = block_tiles.min(tiles_x - tx);
            commands.push(Box::new(TranscodeCommand {
                source: source.clone(),
                writer: writer.clone(),
                level,
                target_tile_width,
                target_tile_height,
                start_x: tx,
                start_y: ty,
                count_x,
                count_y,
                parameters,
            }));
            tx += block_tiles;
        }
        ty += block_tiles;
    }
    commands
}

/// Recursively builds one subtree of the reconstructed pyramid, from the
/// coarsest level (`up_to_level`, written first in the recursion's base
/// case order but last to return) down to level 0 (the real source tiles),
/// per §4.6's `Explore` pseudocode.
pub struct ReconstructCommand {
    pub source: Arc<PyramidSourceInner>,
    pub writer: SharedWriter,
    /// `U`: the coarsest level this command builds, inclusive.
    pub up_to_level: u32,
    /// Output level number added to every level this command writes, letting
    /// the truncated-pyramid two-pass split (§4.4.3) number levels starting
    /// above zero in the outer writer.
    pub shift_target_level: u32,
    /// Level-0 tile coordinates of this command's subtree origin, aligned
    /// to `2^up_to_level`.
    pub base_x: u32,
    pub base_y: u32,
    pub tile_width: u32,
    pub tile_height: u32,
    pub background_color: (u8, u8, u8),
    pub smooth: bool,
    /// Level-0 tile grid extent, used for the "outside coverage" check.
    pub source_tiles_x: u32,
    pub source_tiles_y: u32,
    pub parameters: ResamplingParameters,
}

impl Command for ReconstructCommand {
    fn execute(&self, handle: &Handle) -> Result<(), String> {
        handle.block_on(self.run()).map_err(|e| e.to_string())
    }
}

type ExploreResult<'a> = Pin<Box<dyn Future<Output = Result<Option<(Image, bool)>, PyramidError>> + 'a>>;

impl ReconstructCommand {
    async fn run(&self) -> Result<(), PyramidError> {
        let reader = ResamplingReader::new(
            &self.source,
            0,
            self.tile_width,
            self.tile_height,
            self.parameters,
        )?;
        self.explore(&reader, self.up_to_level, 0, 0).await?;
        Ok(())
    }

    fn explore<'a>(&'a self, reader: &'a ResamplingReader<'a>, level: u32, offset_x: u32, offset_y: u32) -> ExploreResult<'a> {
        Box::pin(async move {
            let zoom = 1u32 << level;
            let abs_x = self.base_x + offset_x * zoom;
            let abs_y = self.base_y + offset_y * zoom;
            if abs_x >= self.source_tiles_x || abs_y >= self.source_tiles_y {
                return Ok(None);
            }

            if level == 0 {
                let raw = reader.raw_tile(abs_x, abs_y).await?;
                let (decoded, is_empty) = reader.decoded_tile(abs_x, abs_y).await?;

                if (abs_x == 0 && abs_y == 0) || !is_empty || level == self.up_to_level {
                    let mut writer = self.writer.lock().await;
                    match raw {
                        Some((bytes, compression)) => {
                            writer.write_raw_tile(bytes, compression, self.shift_target_level, abs_x, abs_y).await?;
                        }
                        None => {
                            writer.encode_tile(&decoded, self.shift_target_level, abs_x, abs_y).await?;
                        }
                    }
                }
                return Ok(Some((decoded, is_empty)));
            }

            let mut mosaic = Image::allocate(reader.pixel_format(), self.tile_width * 2, self.tile_height * 2);
            mosaic.set(self.background_color.0, self.background_color.1, self.background_color.2);
            let mut any_nonempty = false;

            for (dx, dy) in [(0u32, 0u32), (1, 0), (0, 1), (1, 1)] {
                if let Some((sub, sub_empty)) =
                    self.explore(reader, level - 1, offset_x * 2 + dx, offset_y * 2 + dy).await?
                {
                    mosaic.embed(&sub, dx * self.tile_width, dy * self.tile_height);
                    if !sub_empty {
                        any_nonempty = true;
                    }
                }
            }

            if self.smooth {
                mosaic = mosaic.gaussian_blur_5x5();
            }
            let halved = mosaic.downsample_2x2_average();

            if (abs_x == 0 && abs_y == 0) || any_nonempty || level == self.up_to_level {
                let mut writer = self.writer.lock().await;
                writer.encode_tile(&halved, self.shift_target_level + level, offset_x, offset_y).await?;
            }

            Ok(Some((halved, !any_nonempty)))
        })
    }
}

/// Builds one `ReconstructCommand` per `2^up_to_level`-tile-edge subtree
/// covering the source's level-0 tile grid, per §4.6's prepare-tasks
/// generator.
#[allow(clippy::too_many_arguments)]
pub fn prepare_reconstruct_tasks(
    source: Arc<PyramidSourceInner>,
    writer: SharedWriter,
    up_to_level: u32,
    shift_target_level: u32,
    source_tiles_x: u32,
    source_tiles_y: u32,
    tile_width: u32,
    tile_height: u32,
    background_color: (u8, u8, u8),
    smooth: bool,
    parameters: ResamplingParameters,
) -> Vec<Box<dyn Command>> {
    let step = 1u32 << up_to_level;
    let mut commands: Vec<Box<dyn Command>> = Vec::new();
    let mut y = 0;
    while y < source_tiles_y {
        let mut x = 0;
        while x < source_tiles_x {
            commands.push(Box::new(ReconstructCommand {
                source: source.clone(),
                writer: writer.clone(),
                up_to_level,
                shift_target_level,
                base_x: x,
                base_y: y,
                tile_width,
                tile_height,
                background_color,
                smooth,
                source_tiles_x,
                source_tiles_y,
                parameters,
            }));
            x += step;
        }
        y += step;
    }
    commands
}

/// Automatic choice of how many upper levels to reconstruct (§4.6):
/// doubles the zoom factor starting from 1 until the candidate level count
/// would exceed `writer_max_levels`, the number of level-0 tiles per task
/// drops below `4 * threads`, or a task's mosaic buffer would exceed
/// 4096x4096 pixels. Returns `U`, the highest level index to build
/// (0-based; `U == 0` means no reconstruction is actually needed beyond
/// the source's own level 0).
pub fn auto_level_count(
    source_tiles_x: u32,
    source_tiles_y: u32,
    tile_width: u32,
    tile_height: u32,
    writer_max_levels: u32,
    threads: usize,
) -> u32 {
    let mut accepted_zoom = 1u32;
    let mut zoom = 1u32;

    loop {
        let next_zoom = zoom * 2;
        let level_count = next_zoom.trailing_zeros() + 1;
        if writer_max_levels != 0 && level_count > writer_max_levels {
            break;
        }

        let tiles_per_task_x = source_tiles_x.div_ceil(next_zoom).min(next_zoom);
        let tiles_per_task_y = source_tiles_y.div_ceil(next_zoom).min(next_zoom);
        let full_res_tiles_per_task = (next_zoom.min(tiles_per_task_x.max(1)) as u64)
            * (next_zoom.min(tiles_per_task_y.max(1)) as u64);
        if full_res_tiles_per_task < 4 * threads as u64 {
            break;
        }

        let buffer_edge = next_zoom as u64 * tile_width.max(tile_height) as u64;
        if buffer_edge > 4096 {
            break;
        }

        zoom = next_zoom;
        accepted_zoom = zoom;
    }

    accepted_zoom.trailing_zeros()
}
