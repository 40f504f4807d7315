// Copyright 2025 the Vello Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! This crate turns trapezoid-decomposed fills and strokes into anti-aliased 8-bit coverage
//! masks, one fixed-size tile at a time.
//!
//! # Overview
//!
//! A [`TileGenerator`] takes a sorted [`TrapezoidList`] (as produced by a [`Tessellator`]),
//! buckets the trapezoids into a grid of [`TILE_SIZE`]×[`TILE_SIZE`] tiles and classifies every
//! tile as empty, fully covered or partially covered. The caller then pulls the tiles out in
//! raster order through the [`AlphaTileGenerator`] interface. Only partially covered tiles are
//! handed to the [`TrapFiller`], the primitive that computes per-pixel coverage.
//!
//! When a shape touches enough tiles and the [`TileContext`] has a worker thread, a background
//! worker races ahead of the caller and rasterizes partial tiles before they are requested. The
//! produced masks are identical to the single-threaded ones, only the thread doing the work
//! differs.
//!
//! # Usage
//!
//! ```
//! use trap_tiler::{
//!     AlphaTileGenerator, SampleFiller, TILE_AREA, TILE_SIZE, TileContext, Trapezoid,
//!     TrapezoidList,
//! };
//!
//! let ctx = TileContext::new(SampleFiller::new());
//! let traps = TrapezoidList::from_trapezoids(&[Trapezoid::from_rect(0.5, 0.5, 70.0, 40.0)]);
//! let mut generator = ctx.generator(traps);
//!
//! let mut mask = [0_u8; TILE_AREA];
//! for _ in 0..generator.tile_count() {
//!     generator.alpha(&mut mask, 0, TILE_SIZE).unwrap();
//! }
//! generator.dispose();
//! ```
// LINEBENDER LINT SET - lib.rs - v3
// See https://linebender.org/wiki/canonical-lints/
// These lints shouldn't apply to examples or tests.
#![cfg_attr(not(test), warn(unused_crate_dependencies))]
// These lints shouldn't apply to examples.
#![warn(clippy::print_stdout, clippy::print_stderr)]
// Targeting e.g. 32-bit means structs containing usize can give false positives for 64-bit.
#![cfg_attr(target_pointer_width = "64", warn(clippy::trivially_copy_pass_by_ref))]
// END LINEBENDER LINT SET
#![cfg_attr(docsrs, feature(doc_cfg))]
#![forbid(unsafe_code)]

mod context;
mod fill;
mod generator;
mod grid;
mod pool;
mod trapezoid;
mod worker;

pub use context::{TileContext, TileSettings};
pub use fill::{FillError, SampleFiller, SampleImage, TrapFiller};
pub use generator::{AlphaTileGenerator, RasterStats, TileGenerator};
pub use grid::{TILE_AREA, TILE_SIZE, TileAlpha, TileGrid};
pub use peniko::kurbo;
pub use pool::{POOL_SYNC_GRANULARITY, Tile, TilePool};
pub use trapezoid::{
    Edge, FIXED_ONE, Fixed, FixedPoint, Tessellator, Trapezoid, TrapezoidList, fixed_from_f64,
    fixed_to_f64,
};
pub use worker::TILE_SYNC_GRANULARITY;

use thiserror::Error;

/// Errors that can occur while generating coverage tiles.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// The fill primitive failed to rasterize a tile.
    #[error("Couldn't rasterize tile: {0}")]
    Fill(#[from] FillError),
    /// The destination buffer passed to [`AlphaTileGenerator::alpha`] can't hold a whole tile.
    #[error("Destination of {len} bytes is too small for a tile at offset {offset} with row stride {row_stride}")]
    DestinationTooSmall {
        /// Length of the destination buffer.
        len: usize,
        /// Offset of the first tile pixel.
        offset: usize,
        /// Distance between two tile rows.
        row_stride: usize,
    },
    /// The row stride passed to [`AlphaTileGenerator::alpha`] is narrower than a tile row.
    #[error("Row stride {0} is smaller than the tile width")]
    StrideTooSmall(usize),
    /// The worker thread pool couldn't be created.
    #[error("Couldn't build the worker thread pool")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

pub(crate) type Result<T, E = Error> = std::result::Result<T, E>;
