// Copyright 2025 the Vello Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The per-tile coverage primitive.

use crate::grid::{TILE_AREA, TILE_SIZE};
use crate::trapezoid::{FIXED_ONE, Fixed, TrapezoidList};
use thiserror::Error;

/// Errors reported by a [`TrapFiller`].
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum FillError {
    /// The filler couldn't allocate the image backing a tile.
    #[error("Couldn't allocate a {size} byte fill image")]
    ImageAllocation {
        /// The requested allocation size in bytes.
        size: usize,
    },
    /// The destination isn't large enough to hold a tile.
    #[error("Fill destination holds {len} bytes, but a tile needs {TILE_AREA}")]
    Destination {
        /// The length of the destination.
        len: usize,
    },
    /// Any other failure of the fill backend.
    #[error("Fill backend failed: {0}")]
    Backend(String),
}

/// Computes the coverage of a set of trapezoids over one tile.
///
/// Implementations are shared between the consumer and the background worker, so they have to
/// be thread-safe. The image handle lets an implementation keep per-tile resources alive across
/// calls: it is handed back on the next call for the same tile buffer and released through
/// [`TrapFiller::free_image`] exactly once. A handle passed to a call that fails is not handed
/// back or freed afterwards, the implementation releases it itself before returning the error.
pub trait TrapFiller: Send + Sync + 'static {
    /// An opaque per-tile resource.
    type Image: Send + 'static;

    /// Fill `dest` (a [`TILE_SIZE`]×[`TILE_SIZE`] buffer with a row stride of [`TILE_SIZE`])
    /// with the coverage of the trapezoids `indices` of `traps`.
    ///
    /// Pixel `(0, 0)` of `dest` covers the absolute area starting at `(x_offset, y_offset)`.
    /// `image` is the handle returned by the previous call for this buffer, if any. On error the
    /// implementation is responsible for releasing it.
    fn rasterize(
        &self,
        image: Option<Self::Image>,
        traps: &TrapezoidList,
        indices: &[u32],
        dest: &mut [u8],
        x_offset: i32,
        y_offset: i32,
    ) -> Result<Self::Image, FillError>;

    /// Release an image handle.
    fn free_image(&self, image: Self::Image) {
        let _ = image;
    }
}

/// The number of sub-scanlines sampled per pixel row.
const SUB_SCANLINES: i64 = 4;

const ONE: i64 = FIXED_ONE as i64;

/// A software [`TrapFiller`].
///
/// Each pixel row is sampled at [`SUB_SCANLINES`] evenly spaced heights, and at each height the
/// exact horizontal overlap of every trapezoid with every pixel is accumulated in fixed point.
/// Overlapping trapezoids are unioned. A pixel that is covered at every sample is exactly `0xff`,
/// a pixel no trapezoid reaches is exactly `0x00`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SampleFiller {
    _priv: (),
}

impl SampleFiller {
    /// Create a new filler.
    pub fn new() -> Self {
        Self::default()
    }
}

/// Scratch storage reused by [`SampleFiller`] across tiles.
#[derive(Debug)]
pub struct SampleImage {
    line: Vec<i64>,
    acc: Vec<i64>,
}

impl SampleImage {
    fn new() -> Result<Self, FillError> {
        let mut line = Vec::new();
        let mut acc = Vec::new();
        line.try_reserve_exact(TILE_SIZE)
            .and_then(|()| acc.try_reserve_exact(TILE_SIZE))
            .map_err(|_| FillError::ImageAllocation {
                size: 2 * TILE_SIZE * size_of::<i64>(),
            })?;
        line.resize(TILE_SIZE, 0);
        acc.resize(TILE_SIZE, 0);

        Ok(Self { line, acc })
    }
}

impl TrapFiller for SampleFiller {
    type Image = SampleImage;

    fn rasterize(
        &self,
        image: Option<SampleImage>,
        traps: &TrapezoidList,
        indices: &[u32],
        dest: &mut [u8],
        x_offset: i32,
        y_offset: i32,
    ) -> Result<SampleImage, FillError> {
        if dest.len() < TILE_AREA {
            return Err(FillError::Destination { len: dest.len() });
        }

        let mut image = match image {
            Some(image) => image,
            None => SampleImage::new()?,
        };

        let tile_x = i64::from(x_offset) * ONE;
        let tile_end_x = tile_x + TILE_SIZE as i64 * ONE;

        for (row, out) in dest.chunks_exact_mut(TILE_SIZE).take(TILE_SIZE).enumerate() {
            image.acc.fill(0);
            let row_y = (i64::from(y_offset) + row as i64) * ONE;

            for sample in 0..SUB_SCANLINES {
                let y = row_y + (2 * sample + 1) * ONE / (2 * SUB_SCANLINES);
                image.line.fill(0);

                for &idx in indices {
                    let idx = idx as usize;
                    let top = i64::from(traps.trap_top(idx));
                    // The indices are sorted by top, nothing after this reaches `y`.
                    if top > y {
                        break;
                    }
                    if y >= i64::from(traps.trap_bottom(idx)) {
                        continue;
                    }

                    let y = y as Fixed;
                    let x0 = i64::from(traps.left_edge(idx).x_at(y)).max(tile_x);
                    let x1 = i64::from(traps.right_edge(idx).x_at(y)).min(tile_end_x);
                    if x1 <= x0 {
                        continue;
                    }

                    accumulate_span(&mut image.line, x0 - tile_x, x1 - tile_x);
                }

                for (acc, cov) in image.acc.iter_mut().zip(&image.line) {
                    *acc += (*cov).min(ONE);
                }
            }

            let full = SUB_SCANLINES * ONE;
            for (px, acc) in out.iter_mut().zip(&image.acc) {
                *px = ((acc * 255 + full / 2) / full) as u8;
            }
        }

        Ok(image)
    }
}

/// Add the coverage of the span `x0..x1` (relative to the tile, in fixed point) to `line`.
fn accumulate_span(line: &mut [i64], x0: i64, x1: i64) {
    let first = (x0 / ONE) as usize;
    let last = ((x1 + ONE - 1) / ONE) as usize;

    for (col, cov) in line
        .iter_mut()
        .enumerate()
        .take(last.min(TILE_SIZE))
        .skip(first)
    {
        let px0 = col as i64 * ONE;
        let px1 = px0 + ONE;
        *cov += x1.min(px1) - x0.max(px0);
    }
}
