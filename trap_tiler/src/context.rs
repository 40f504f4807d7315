// Copyright 2025 the Vello Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Shared state of all tile generators of a rendering session.

use crate::fill::TrapFiller;
use crate::generator::TileGenerator;
use crate::pool::TilePool;
use crate::trapezoid::TrapezoidList;
use crate::Result;
use core::fmt::{Debug, Formatter};
use rayon::{ThreadPool, ThreadPoolBuilder};
use std::sync::Arc;

/// Settings that apply to all generators created from a [`TileContext`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileSettings {
    /// The number of background worker threads. 0 disables threading.
    pub num_threads: u16,
    /// Shapes with at most this many partial tiles are rasterized on the consumer thread alone.
    pub min_raster_tiles: usize,
    /// The first tile the background worker rasterizes.
    pub worker_start: usize,
}

impl Default for TileSettings {
    fn default() -> Self {
        let parallelism = std::thread::available_parallelism().map_or(1, |n| n.get());

        Self {
            num_threads: if parallelism > 1 { 1 } else { 0 },
            min_raster_tiles: 16,
            worker_start: 16,
        }
    }
}

/// The state shared by the generators of one session: the filler, the pool of tile buffers and
/// the background threads.
///
/// Generators must not be driven from inside the context's own thread pool, since disposing a
/// generator waits for its worker.
pub struct TileContext<F: TrapFiller> {
    settings: TileSettings,
    filler: Arc<F>,
    pool: Arc<TilePool<F>>,
    thread_pool: Option<ThreadPool>,
}

impl<F: TrapFiller> TileContext<F> {
    /// Create a context with the default settings.
    pub fn new(filler: F) -> Self {
        Self::new_with(filler, TileSettings::default())
    }

    /// Create a context with custom settings.
    ///
    /// If the worker threads can't be started, all generators run single-threaded.
    pub fn new_with(filler: F, settings: TileSettings) -> Self {
        let filler = Arc::new(filler);
        let thread_pool = build_thread_pool(settings.num_threads).unwrap_or_else(|e| {
            log::warn!("Rasterizing single-threaded: {e}");
            None
        });

        Self::from_parts(filler, settings, thread_pool)
    }

    /// Create a context with custom settings, failing if the worker threads can't be started.
    pub fn try_new_with(filler: F, settings: TileSettings) -> Result<Self> {
        let thread_pool = build_thread_pool(settings.num_threads)?;
        Ok(Self::from_parts(Arc::new(filler), settings, thread_pool))
    }

    fn from_parts(filler: Arc<F>, settings: TileSettings, thread_pool: Option<ThreadPool>) -> Self {
        Self {
            settings,
            pool: Arc::new(TilePool::new(filler.clone())),
            filler,
            thread_pool,
        }
    }

    /// Create a generator for a pre-sorted trapezoid list.
    pub fn generator(&self, traps: TrapezoidList) -> TileGenerator<F> {
        TileGenerator::new(self, traps)
    }

    /// The settings of this context.
    pub fn settings(&self) -> &TileSettings {
        &self.settings
    }

    /// The filler shared by all generators.
    pub fn filler(&self) -> &Arc<F> {
        &self.filler
    }

    /// The pool of tile buffers shared by all generators.
    pub fn pool(&self) -> &Arc<TilePool<F>> {
        &self.pool
    }

    /// Whether generators of this context can use a background worker.
    pub fn is_threaded(&self) -> bool {
        self.thread_pool.is_some()
    }

    pub(crate) fn thread_pool(&self) -> Option<&ThreadPool> {
        self.thread_pool.as_ref()
    }
}

fn build_thread_pool(num_threads: u16) -> Result<Option<ThreadPool>> {
    if num_threads == 0 {
        return Ok(None);
    }

    let thread_pool = ThreadPoolBuilder::new()
        .num_threads(usize::from(num_threads))
        .thread_name(|i| format!("trap-tiler-{i}"))
        .build()?;
    Ok(Some(thread_pool))
}

impl<F: TrapFiller> Drop for TileContext<F> {
    fn drop(&mut self) {
        // Generators that outlive the context keep the pool alive, it purges itself once they
        // are gone.
        self.pool.purge();
    }
}

impl<F: TrapFiller> Debug for TileContext<F> {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("TileContext")
            .field("settings", &self.settings)
            .field("pool", &self.pool)
            .field("threaded", &self.thread_pool.is_some())
            .finish_non_exhaustive()
    }
}
