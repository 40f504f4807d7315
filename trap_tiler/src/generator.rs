// Copyright 2025 the Vello Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Handing out coverage tiles in raster order.

use crate::context::TileContext;
use crate::fill::{FillError, TrapFiller};
use crate::grid::{TILE_AREA, TILE_SIZE, TileAlpha, TileGrid};
use crate::kurbo::{Affine, Rect, Stroke};
use crate::pool::Tile;
use crate::trapezoid::{Tessellator, TrapezoidList};
use crate::worker::{self, RasterQueue};
use crate::{Error, Result};
use core::fmt::{Debug, Formatter};
use static_assertions::assert_impl_all;
use std::sync::Arc;

/// A source of coverage tiles, consumed by a compositor.
///
/// Tiles are produced strictly in raster order, left to right and top to bottom. For every tile
/// the compositor either calls [`alpha`](AlphaTileGenerator::alpha), or, if
/// [`typical_alpha`](AlphaTileGenerator::typical_alpha) says the tile is uniform,
/// [`next_tile`](AlphaTileGenerator::next_tile).
pub trait AlphaTileGenerator {
    /// The width of a tile in pixels.
    fn tile_width(&self) -> usize {
        TILE_SIZE
    }

    /// The height of a tile in pixels.
    fn tile_height(&self) -> usize {
        TILE_SIZE
    }

    /// The total number of tiles.
    fn tile_count(&self) -> usize;

    /// The coverage class of the current tile.
    ///
    /// [`TileAlpha::Empty`] and [`TileAlpha::Full`] tiles can be composited without looking at
    /// their pixels.
    fn typical_alpha(&self) -> TileAlpha;

    /// Skip the current tile.
    fn next_tile(&mut self);

    /// Write the coverage of the current tile into `dest` and move on to the next tile.
    ///
    /// Row `r` of the tile is written to `dest[offset + r * row_stride..][..tile_width]`.
    fn alpha(&mut self, dest: &mut [u8], offset: usize, row_stride: usize) -> Result<()>;

    /// Release all resources.
    fn dispose(self)
    where
        Self: Sized,
    {
        drop(self);
    }
}

/// Diagnostic counters of a [`TileGenerator`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RasterStats {
    /// Partial tiles the consumer rasterized itself.
    pub consumer: usize,
    /// Partial tiles picked up from the background worker.
    pub worker: usize,
    /// Tiles the worker rasterized after the consumer had already done so.
    pub doubled: usize,
}

/// Generates the coverage tiles of one shape.
///
/// See the [crate documentation](crate) for an overview.
pub struct TileGenerator<F: TrapFiller> {
    grid: Arc<TileGrid>,
    filler: Arc<F>,
    cursor: usize,
    /// Used whenever the consumer has to rasterize a tile itself.
    scratch: Option<Tile<F::Image>>,
    queue: Option<RasterQueue<F>>,
    stats: RasterStats,
}

assert_impl_all!(TileGenerator<crate::SampleFiller>: Send);

impl<F: TrapFiller> TileGenerator<F> {
    /// Create a generator for a pre-sorted trapezoid list.
    ///
    /// If `ctx` has a worker thread and the shape touches more than
    /// [`TileSettings::min_raster_tiles`](crate::TileSettings::min_raster_tiles) tiles, a background
    /// worker starts rasterizing right away.
    pub fn new(ctx: &TileContext<F>, traps: TrapezoidList) -> Self {
        let grid = Arc::new(TileGrid::new(traps));
        let settings = ctx.settings();

        let queue = ctx
            .thread_pool()
            .filter(|_| grid.raster_tile_count() > settings.min_raster_tiles)
            .map(|thread_pool| {
                worker::spawn(
                    thread_pool,
                    grid.clone(),
                    ctx.filler().clone(),
                    ctx.pool().clone(),
                    settings.worker_start,
                )
            });

        log::debug!(
            "Tile generator for {}x{} tiles, {} to rasterize, threaded: {}",
            grid.tiles_x(),
            grid.tiles_y(),
            grid.raster_tile_count(),
            queue.is_some()
        );

        Self {
            grid,
            filler: ctx.filler().clone(),
            cursor: 0,
            scratch: None,
            queue,
            stats: RasterStats::default(),
        }
    }

    /// Create a generator for `shape`, decomposed into trapezoids by `tessellator`.
    pub fn from_shape<T: Tessellator>(
        ctx: &TileContext<F>,
        tessellator: &T,
        shape: &T::Shape,
        transform: Affine,
        clip: Option<Rect>,
        stroke: Option<&Stroke>,
    ) -> Self {
        let traps = tessellator.tessellate(shape, transform, clip, stroke);
        Self::new(ctx, traps)
    }

    /// The pixel bounding box of the shape as `[left, top, right, bottom]`.
    pub fn bbox(&self) -> [i32; 4] {
        self.grid.bbox()
    }

    /// The tile grid of the shape.
    pub fn grid(&self) -> &TileGrid {
        &self.grid
    }

    /// The index of the current tile.
    pub fn position(&self) -> usize {
        self.cursor
    }

    /// Whether a background worker rasterizes tiles for this generator.
    pub fn is_threaded(&self) -> bool {
        self.queue.is_some()
    }

    /// Diagnostic counters.
    pub fn stats(&self) -> RasterStats {
        RasterStats {
            doubled: self.queue.as_ref().map_or(0, RasterQueue::doubled),
            ..self.stats
        }
    }

    fn rasterize_current(&mut self, dest: &mut [u8], offset: usize, row_stride: usize) -> Result<()> {
        let pos = self.cursor;

        if let Some(queue) = self.queue.as_mut() {
            if let Some(tile) = queue.take(pos) {
                copy_tile(tile.alpha(), dest, offset, row_stride);
                queue.release(tile);
                self.stats.worker += 1;
                return Ok(());
            }
        }

        let scratch = self.scratch.get_or_insert_with(Tile::new);
        rasterize_tile(&self.grid, &*self.filler, pos, scratch)?;
        copy_tile(scratch.alpha(), dest, offset, row_stride);
        self.stats.consumer += 1;

        Ok(())
    }
}

impl<F: TrapFiller> AlphaTileGenerator for TileGenerator<F> {
    fn tile_count(&self) -> usize {
        self.grid.tile_count()
    }

    fn typical_alpha(&self) -> TileAlpha {
        self.grid.tile_alpha(self.cursor)
    }

    fn next_tile(&mut self) {
        self.cursor += 1;
    }

    fn alpha(&mut self, dest: &mut [u8], offset: usize, row_stride: usize) -> Result<()> {
        if row_stride < TILE_SIZE {
            return Err(Error::StrideTooSmall(row_stride));
        }
        let needed = (TILE_SIZE - 1)
            .checked_mul(row_stride)
            .and_then(|n| n.checked_add(offset))
            .and_then(|n| n.checked_add(TILE_SIZE));
        if needed.is_none_or(|needed| dest.len() < needed) {
            return Err(Error::DestinationTooSmall {
                len: dest.len(),
                offset,
                row_stride,
            });
        }

        match self.grid.tile_alpha(self.cursor) {
            TileAlpha::Empty => fill_tile(dest, offset, row_stride, 0x00),
            TileAlpha::Full => fill_tile(dest, offset, row_stride, 0xff),
            TileAlpha::Partial => self.rasterize_current(dest, offset, row_stride)?,
        }

        self.next_tile();
        Ok(())
    }
}

impl<F: TrapFiller> Drop for TileGenerator<F> {
    fn drop(&mut self) {
        if let Some(mut queue) = self.queue.take() {
            queue.shutdown(self.grid.tile_count());
            log::debug!(
                "Tile generator done: {} tiles from the consumer, {} from the worker, {} doubled",
                self.stats.consumer,
                self.stats.worker,
                queue.doubled()
            );
        }

        if let Some(image) = self.scratch.as_mut().and_then(Tile::take_image) {
            self.filler.free_image(image);
        }
    }
}

impl<F: TrapFiller> Debug for TileGenerator<F> {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("TileGenerator")
            .field("tile_count", &self.grid.tile_count())
            .field("cursor", &self.cursor)
            .field("threaded", &self.queue.is_some())
            .finish_non_exhaustive()
    }
}

/// Rasterize tile `pos` of `grid` into `tile`, if it is a partial tile.
///
/// Empty and full tiles are left untouched, their content follows from their [`TileAlpha`].
pub(crate) fn rasterize_tile<F: TrapFiller>(
    grid: &TileGrid,
    filler: &F,
    pos: usize,
    tile: &mut Tile<F::Image>,
) -> Result<(), FillError> {
    if grid.tile_alpha(pos) != TileAlpha::Partial {
        return Ok(());
    }

    let (x, y) = grid.tile_origin(pos);
    // On error the filler has released the handle, the tile is left without one.
    let image = tile.take_image();
    let image = filler.rasterize(
        image,
        grid.traps(),
        grid.trap_indices(pos),
        tile.alpha_mut(),
        x,
        y,
    )?;
    tile.set_image(image);
    tile.set_pos(pos);

    Ok(())
}

fn copy_tile(src: &[u8], dest: &mut [u8], offset: usize, row_stride: usize) {
    debug_assert_eq!(src.len(), TILE_AREA, "tile buffers hold exactly one tile");

    for (row, src_row) in src.chunks_exact(TILE_SIZE).enumerate() {
        let start = offset + row * row_stride;
        dest[start..start + TILE_SIZE].copy_from_slice(src_row);
    }
}

fn fill_tile(dest: &mut [u8], offset: usize, row_stride: usize, value: u8) {
    for row in 0..TILE_SIZE {
        let start = offset + row * row_stride;
        dest[start..start + TILE_SIZE].fill(value);
    }
}
