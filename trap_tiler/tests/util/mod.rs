// Copyright 2025 the Vello Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Utility functions shared across different tests.

#![allow(dead_code, reason = "not every test uses every helper")]

use std::sync::atomic::{AtomicUsize, Ordering};
use trap_tiler::kurbo::{Affine, Rect, Stroke};
use trap_tiler::{
    AlphaTileGenerator, Edge, FillError, FixedPoint, SampleFiller, TILE_SIZE, Tessellator,
    TileContext, TileGenerator, TileSettings, TrapFiller, Trapezoid, TrapezoidList, fixed_from_f64,
};

pub(crate) fn get_ctx<F: TrapFiller>(filler: F, num_threads: u16) -> TileContext<F> {
    TileContext::new_with(
        filler,
        TileSettings {
            num_threads,
            ..TileSettings::default()
        },
    )
}

/// A disk around `(cx, cy)`, cut into horizontal bands of height `band`.
///
/// Consecutive bands share their boundary exactly, so interior tiles are recognized as full.
pub(crate) fn disk(cx: f64, cy: f64, r: f64, band: f64) -> TrapezoidList {
    let bands = (2.0 * r / band).ceil() as usize;
    let y_at = |i: usize| (cy - r + i as f64 * band).min(cy + r);
    let half_width = |y: f64| (r * r - (y - cy) * (y - cy)).max(0.0).sqrt();

    let traps: Vec<_> = (0..bands)
        .map(|i| {
            let (y0, y1) = (y_at(i), y_at(i + 1));
            let (w0, w1) = (half_width(y0), half_width(y1));

            Trapezoid {
                top: fixed_from_f64(y0),
                bottom: fixed_from_f64(y1),
                left: Edge::new(FixedPoint::from_f64(cx - w0, y0), FixedPoint::from_f64(cx - w1, y1)),
                right: Edge::new(FixedPoint::from_f64(cx + w0, y0), FixedPoint::from_f64(cx + w1, y1)),
            }
        })
        .collect();

    TrapezoidList::from_trapezoids(&traps)
}

/// Pull every tile of `generator` into a canvas covering the whole grid.
///
/// Returns the canvas and its row stride.
pub(crate) fn render_canvas<F: TrapFiller>(generator: &mut TileGenerator<F>) -> (Vec<u8>, usize) {
    let tiles_x = generator.grid().tiles_x();
    let tiles_y = generator.grid().tiles_y();
    let stride = tiles_x * TILE_SIZE;
    let mut canvas = vec![0x33; stride * tiles_y * TILE_SIZE];

    for pos in 0..generator.tile_count() {
        assert_eq!(generator.position(), pos);
        let (row, col) = (pos / tiles_x, pos % tiles_x);
        let offset = row * TILE_SIZE * stride + col * TILE_SIZE;
        generator.alpha(&mut canvas, offset, stride).unwrap();
    }

    (canvas, stride)
}

/// Pull every tile of `generator`, one buffer per tile.
pub(crate) fn render_tiles(generator: &mut impl AlphaTileGenerator) -> Vec<Vec<u8>> {
    (0..generator.tile_count())
        .map(|_| {
            let mut tile = vec![0x33; TILE_SIZE * TILE_SIZE];
            generator.alpha(&mut tile, 0, TILE_SIZE).unwrap();
            tile
        })
        .collect()
}

/// Rasterize the tile at `(x, y)` with all trapezoids of `traps`, without any bucketing.
pub(crate) fn reference_tile(traps: &TrapezoidList, x: i32, y: i32) -> Vec<u8> {
    let indices: Vec<u32> = (0..traps.size() as u32).collect();
    let mut tile = vec![0; TILE_SIZE * TILE_SIZE];
    SampleFiller::new()
        .rasterize(None, traps, &indices, &mut tile, x, y)
        .unwrap();
    tile
}

/// A filler that counts its invocations.
#[derive(Debug, Default)]
pub(crate) struct CountingFiller<F> {
    inner: F,
    calls: AtomicUsize,
    created: AtomicUsize,
    freed: AtomicUsize,
}

impl<F> CountingFiller<F> {
    pub(crate) fn new(inner: F) -> Self {
        Self {
            inner,
            calls: AtomicUsize::new(0),
            created: AtomicUsize::new(0),
            freed: AtomicUsize::new(0),
        }
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// The number of image handles handed out.
    pub(crate) fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    pub(crate) fn freed(&self) -> usize {
        self.freed.load(Ordering::SeqCst)
    }
}

impl<F: TrapFiller> TrapFiller for CountingFiller<F> {
    type Image = F::Image;

    fn rasterize(
        &self,
        image: Option<Self::Image>,
        traps: &TrapezoidList,
        indices: &[u32],
        dest: &mut [u8],
        x_offset: i32,
        y_offset: i32,
    ) -> Result<Self::Image, FillError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if image.is_none() {
            self.created.fetch_add(1, Ordering::SeqCst);
        }
        self.inner
            .rasterize(image, traps, indices, dest, x_offset, y_offset)
    }

    fn free_image(&self, image: Self::Image) {
        self.freed.fetch_add(1, Ordering::SeqCst);
        self.inner.free_image(image);
    }
}

/// A filler whose backend always fails.
#[derive(Debug, Default)]
pub(crate) struct FailingFiller;

impl TrapFiller for FailingFiller {
    type Image = ();

    fn rasterize(
        &self,
        _: Option<()>,
        _: &TrapezoidList,
        _: &[u32],
        _: &mut [u8],
        _: i32,
        _: i32,
    ) -> Result<(), FillError> {
        Err(FillError::Backend("device lost".into()))
    }
}

/// A [`SampleFiller`] that fails whenever it runs on a background worker thread.
#[derive(Debug, Default)]
pub(crate) struct WorkerFailingFiller {
    inner: SampleFiller,
}

impl TrapFiller for WorkerFailingFiller {
    type Image = <SampleFiller as TrapFiller>::Image;

    fn rasterize(
        &self,
        image: Option<Self::Image>,
        traps: &TrapezoidList,
        indices: &[u32],
        dest: &mut [u8],
        x_offset: i32,
        y_offset: i32,
    ) -> Result<Self::Image, FillError> {
        let on_worker = std::thread::current()
            .name()
            .is_some_and(|name| name.starts_with("trap-tiler-"));
        if on_worker {
            return Err(FillError::Backend("worker can't rasterize".into()));
        }

        self.inner
            .rasterize(image, traps, indices, dest, x_offset, y_offset)
    }
}

/// Decomposes axis-aligned rectangles into a single trapezoid.
#[derive(Debug, Default)]
pub(crate) struct RectTessellator;

impl Tessellator for RectTessellator {
    type Shape = Rect;

    fn tessellate(
        &self,
        shape: &Rect,
        transform: Affine,
        clip: Option<Rect>,
        stroke: Option<&Stroke>,
    ) -> TrapezoidList {
        let mut rect = transform.transform_rect_bbox(*shape);
        if let Some(stroke) = stroke {
            rect = rect.inflate(stroke.width / 2.0, stroke.width / 2.0);
        }
        if let Some(clip) = clip {
            rect = rect.intersect(clip);
        }
        if rect.is_zero_area() {
            return TrapezoidList::empty();
        }

        TrapezoidList::from_trapezoids(&[Trapezoid::from_rect(rect.x0, rect.y0, rect.x1, rect.y1)])
    }
}
