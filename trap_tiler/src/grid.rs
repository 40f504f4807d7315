// Copyright 2025 the Vello Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Bucketing of trapezoids into tiles and per-tile coverage classification.

use crate::trapezoid::{FIXED_ONE, TrapezoidList, ceil_px, floor_px};
use core::ops::RangeInclusive;
use smallvec::SmallVec;
use static_assertions::const_assert_eq;

/// The width and height of a tile in pixels.
pub const TILE_SIZE: usize = 32;

/// The number of pixels in a tile.
pub const TILE_AREA: usize = TILE_SIZE * TILE_SIZE;

const_assert_eq!(TILE_AREA, 1024);

const TILE_SIZE_I64: i64 = TILE_SIZE as i64;

/// Indices into the [`TrapezoidList`] of all trapezoids touching one tile, in list order.
pub(crate) type TrapIndices = SmallVec<[u32; 8]>;

/// The coverage class of a tile.
///
/// The discriminants are the typical alpha values reported to the compositor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TileAlpha {
    /// No trapezoid touches the tile, every pixel is `0x00`.
    Empty = 0x00,
    /// The tile is partially covered and has to be rasterized (a "gray" tile).
    Partial = 0x7f,
    /// The trapezoids provably cover the whole tile, every pixel is `0xff`.
    Full = 0xff,
}

impl TileAlpha {
    /// The typical alpha value of the class.
    #[inline]
    pub const fn to_u8(self) -> u8 {
        self as u8
    }
}

/// The trapezoids of one shape, bucketed into a grid of [`TILE_SIZE`]×[`TILE_SIZE`] tiles.
///
/// The grid is built once and only read afterwards, so it can be shared between the consumer
/// and the background worker without locking.
#[derive(Debug)]
pub struct TileGrid {
    traps: TrapezoidList,
    bbox: [i32; 4],
    tiles_x: usize,
    tiles_y: usize,
    /// `None` marks a tile no trapezoid touches.
    buckets: Vec<Option<TrapIndices>>,
    alphas: Vec<TileAlpha>,
    raster_tiles: usize,
}

impl TileGrid {
    /// Bucket and classify `traps`.
    ///
    /// Lists without trapezoids produce an empty grid with a zero bounding box. Lists whose
    /// bounding box has no area are emptied, keeping their bounding box.
    pub fn new(mut traps: TrapezoidList) -> Self {
        let mut grid = Self {
            traps: TrapezoidList::empty(),
            bbox: [0; 4],
            tiles_x: 0,
            tiles_y: 0,
            buckets: Vec::new(),
            alphas: Vec::new(),
            raster_tiles: 0,
        };

        if traps.is_empty() {
            grid.traps = traps;
            return grid;
        }

        grid.bbox = traps.bounds();
        let [left, top, right, bottom] = grid.bbox;
        let width = i64::from(right) - i64::from(left);
        let height = i64::from(bottom) - i64::from(top);

        if width <= 0 || height <= 0 {
            // Nothing visible, don't render anything.
            traps.set_size_zero();
            grid.traps = traps;
            return grid;
        }

        grid.tiles_x = (width as u64).div_ceil(TILE_SIZE as u64) as usize;
        grid.tiles_y = (height as u64).div_ceil(TILE_SIZE as u64) as usize;
        grid.traps = traps;

        let tile_count = grid.tile_count();
        grid.buckets = vec![None; tile_count];
        grid.bucket_traps();
        grid.classify();

        grid
    }

    fn bucket_traps(&mut self) {
        let [left, top, ..] = self.bbox;
        let (left, top) = (i64::from(left), i64::from(top));

        for idx in 0..self.traps.size() {
            let trap = self.traps.get(idx);

            let y0 = i64::from(floor_px(trap.top)) - top;
            let y1 = i64::from(ceil_px(trap.bottom)) - top;
            let x0 = i64::from(floor_px(trap.min_x())) - left;
            let x1 = i64::from(ceil_px(trap.max_x())) - left;

            let Some(rows) = tile_span(y0, y1, self.tiles_y) else {
                continue;
            };
            let Some(cols) = tile_span(x0, x1, self.tiles_x) else {
                continue;
            };

            for row in rows {
                for col in cols.clone() {
                    self.buckets[row * self.tiles_x + col]
                        .get_or_insert_with(TrapIndices::new)
                        .push(idx as u32);
                }
            }
        }
    }

    fn classify(&mut self) {
        self.alphas = (0..self.tile_count())
            .map(|pos| match self.buckets[pos].as_deref() {
                Some(list) if !list.is_empty() => {
                    if self.traps_cover_tile(list, pos) {
                        TileAlpha::Full
                    } else {
                        TileAlpha::Partial
                    }
                }
                _ => TileAlpha::Empty,
            })
            .collect();
        self.raster_tiles = self
            .alphas
            .iter()
            .filter(|alpha| **alpha != TileAlpha::Empty)
            .count();
    }

    /// Check whether the y-sorted trapezoids in `list` cover tile `pos` completely.
    ///
    /// This only recognizes a vertical stack of trapezoids, each spanning the whole tile width and
    /// starting exactly where the previous one ends. Anything else is reported as not covering.
    pub(crate) fn traps_cover_tile(&self, list: &[u32], pos: usize) -> bool {
        // Tiles with that many trapezoids practically never pass the test.
        if list.len() > TILE_SIZE {
            return false;
        }

        let (x, y) = self.tile_origin(pos);
        let x = i64::from(x) * i64::from(FIXED_ONE);
        let y = i64::from(y) * i64::from(FIXED_ONE);
        let end_x = x + TILE_SIZE_I64 * i64::from(FIXED_ONE);
        let end_y = y + TILE_SIZE_I64 * i64::from(FIXED_ONE);

        let Some(&first) = list.first() else {
            return false;
        };
        let first = self.traps.get(first as usize);
        if i64::from(first.top) > y || i64::from(first.bottom) < y {
            return false;
        }

        let mut last_bottom = first.top;
        for &idx in list {
            let trap = self.traps.get(idx as usize);
            if trap.top != last_bottom
                || i64::from(trap.left_x_max()) > x
                || i64::from(trap.right_x_min()) < end_x
            {
                return false;
            }
            last_bottom = trap.bottom;
        }

        i64::from(last_bottom) >= end_y
    }

    /// The trapezoids of the grid.
    pub fn traps(&self) -> &TrapezoidList {
        &self.traps
    }

    /// The pixel bounding box as `[left, top, right, bottom]`.
    pub fn bbox(&self) -> [i32; 4] {
        self.bbox
    }

    /// The number of tile columns.
    pub fn tiles_x(&self) -> usize {
        self.tiles_x
    }

    /// The number of tile rows.
    pub fn tiles_y(&self) -> usize {
        self.tiles_y
    }

    /// The total number of tiles.
    pub fn tile_count(&self) -> usize {
        self.tiles_x * self.tiles_y
    }

    /// The number of tiles that are not empty.
    pub fn raster_tile_count(&self) -> usize {
        self.raster_tiles
    }

    /// The coverage class of tile `pos`. Tiles outside the grid are empty.
    #[inline]
    pub fn tile_alpha(&self, pos: usize) -> TileAlpha {
        self.alphas.get(pos).copied().unwrap_or(TileAlpha::Empty)
    }

    /// The indices of the trapezoids touching tile `pos`, in list order.
    #[inline]
    pub fn trap_indices(&self, pos: usize) -> &[u32] {
        self.buckets
            .get(pos)
            .and_then(Option::as_deref)
            .unwrap_or_default()
    }

    /// The absolute pixel position of the top-left corner of tile `pos`.
    #[inline]
    pub fn tile_origin(&self, pos: usize) -> (i32, i32) {
        let (row, col) = if self.tiles_x == 0 {
            (0, 0)
        } else {
            (pos / self.tiles_x, pos % self.tiles_x)
        };

        (
            self.bbox[0] + (col * TILE_SIZE) as i32,
            self.bbox[1] + (row * TILE_SIZE) as i32,
        )
    }
}

/// The tiles touched by the pixel span `start..end`, relative to the grid origin.
///
/// An end lying exactly on a tile boundary doesn't reach into the next tile.
fn tile_span(start: i64, end: i64, tiles: usize) -> Option<RangeInclusive<usize>> {
    if end <= start || end <= 0 || tiles == 0 {
        return None;
    }

    let first = start.max(0) / TILE_SIZE_I64;
    let mut last = end / TILE_SIZE_I64;
    if end % TILE_SIZE_I64 == 0 {
        last -= 1;
    }
    let last = last.min(tiles as i64 - 1);

    if first > last {
        return None;
    }

    Some(first as usize..=last as usize)
}
