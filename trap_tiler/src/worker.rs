// Copyright 2025 the Vello Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The background worker that rasterizes partial tiles ahead of the consumer.

use crate::fill::TrapFiller;
use crate::generator::rasterize_tile;
use crate::grid::{TileAlpha, TileGrid};
use crate::pool::{ConsumerTiles, POOL_SYNC_GRANULARITY, Tile, TilePool, WorkerTiles};
use core::cmp::Ordering as CmpOrdering;
use crossbeam_channel::{Receiver, SendError, Sender};
use rayon::ThreadPool;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// The number of rasterized tiles the worker collects before publishing them to the consumer.
pub const TILE_SYNC_GRANULARITY: usize = 8;

type TileBatch<I> = Vec<Tile<I>>;

/// Start a worker on `thread_pool` that rasterizes the partial tiles of `grid` from tile `start`
/// on, and return the consumer end.
pub(crate) fn spawn<F: TrapFiller>(
    thread_pool: &ThreadPool,
    grid: Arc<TileGrid>,
    filler: Arc<F>,
    pool: Arc<TilePool<F>>,
    start: usize,
) -> RasterQueue<F> {
    let (sender, receiver) = crossbeam_channel::unbounded();
    let skip_to = Arc::new(AtomicUsize::new(start));

    let worker = TileWorker {
        grid,
        filler,
        tiles: WorkerTiles::new(pool.clone()),
        sender,
        skip_to: skip_to.clone(),
        start,
    };
    thread_pool.spawn(move || worker.run());

    RasterQueue::new(receiver, skip_to, start, ConsumerTiles::new(pool))
}

pub(crate) struct TileWorker<F: TrapFiller> {
    grid: Arc<TileGrid>,
    filler: Arc<F>,
    tiles: WorkerTiles<F>,
    sender: Sender<TileBatch<F::Image>>,
    /// The worker doesn't rasterize anything before this tile. Only a hint, the consumer checks
    /// every tile position it receives.
    skip_to: Arc<AtomicUsize>,
    start: usize,
}

impl<F: TrapFiller> TileWorker<F> {
    /// Rasterize until the end of the grid. Dropping `self` at the end disconnects the channel,
    /// which tells the consumer that no more tiles will arrive.
    pub(crate) fn run(mut self) {
        let tile_count = self.grid.tile_count();
        let mut batch = Vec::with_capacity(TILE_SYNC_GRANULARITY + 1);
        let mut rasterized = 0_usize;
        let mut pos = self.start;

        while pos < tile_count {
            if self.grid.tile_alpha(pos) == TileAlpha::Partial {
                let max_batch = (tile_count - pos).min(POOL_SYNC_GRANULARITY);
                let mut tile = self.tiles.acquire(max_batch);

                if let Err(e) = rasterize_tile(&self.grid, &*self.filler, pos, &mut tile) {
                    log::warn!("Background rasterization stopped at tile {pos}: {e}");
                    self.tiles.recycle(tile);
                    break;
                }

                batch.push(tile);
                rasterized += 1;

                if batch.len() > TILE_SYNC_GRANULARITY {
                    self.publish(&mut batch);
                }
            }

            // Skip the tiles the consumer has already rasterized itself.
            pos = (pos + 1).max(self.skip_to.load(Ordering::Relaxed));
        }

        self.publish(&mut batch);
        log::trace!("Background worker rasterized {rasterized} tiles");
    }

    fn publish(&mut self, batch: &mut TileBatch<F::Image>) {
        if batch.is_empty() {
            return;
        }

        let tiles = core::mem::replace(batch, Vec::with_capacity(TILE_SYNC_GRANULARITY + 1));
        log::trace!("Publishing {} rasterized tiles", tiles.len());

        if let Err(SendError(tiles)) = self.sender.send(tiles) {
            // The consumer is gone, keep the tiles in the pool.
            for tile in tiles {
                self.tiles.recycle(tile);
            }
        }
    }
}

/// The consumer end of a background worker.
pub(crate) struct RasterQueue<F: TrapFiller> {
    receiver: Receiver<TileBatch<F::Image>>,
    /// Tiles received from the worker, ordered by position.
    staged: VecDeque<Tile<F::Image>>,
    skip_to: Arc<AtomicUsize>,
    start: usize,
    tiles: ConsumerTiles<F>,
    doubled: usize,
}

impl<F: TrapFiller> RasterQueue<F> {
    fn new(
        receiver: Receiver<TileBatch<F::Image>>,
        skip_to: Arc<AtomicUsize>,
        start: usize,
        tiles: ConsumerTiles<F>,
    ) -> Self {
        Self {
            receiver,
            staged: VecDeque::new(),
            skip_to,
            start,
            tiles,
            doubled: 0,
        }
    }

    /// Take the rasterized tile at `pos`, if the worker has produced it already.
    ///
    /// Positions must be requested in increasing order. Tiles before `pos` that were never taken
    /// are released, the consumer has produced those itself. On a miss, the worker is told to
    /// skip ahead past `pos`.
    pub(crate) fn take(&mut self, pos: usize) -> Option<Tile<F::Image>> {
        loop {
            if self.staged.is_empty() && (pos < self.start || !self.refill()) {
                break;
            }

            let Some(front) = self.staged.front() else {
                break;
            };
            match front.pos().cmp(&pos) {
                CmpOrdering::Less => {
                    if let Some(stale) = self.staged.pop_front() {
                        self.doubled += 1;
                        self.tiles.release(stale);
                    }
                }
                CmpOrdering::Equal => return self.staged.pop_front(),
                CmpOrdering::Greater => break,
            }
        }

        // Leave the worker some room to get ahead again.
        self.skip_to
            .store(pos + TILE_SYNC_GRANULARITY / 2 + 1, Ordering::Relaxed);
        None
    }

    /// Move everything the worker has published so far into the staging queue.
    fn refill(&mut self) -> bool {
        while let Ok(batch) = self.receiver.try_recv() {
            self.staged.extend(batch);
        }

        !self.staged.is_empty()
    }

    /// Give a tile obtained through [`RasterQueue::take`] back to the pool.
    pub(crate) fn release(&mut self, tile: Tile<F::Image>) {
        self.tiles.release(tile);
    }

    /// The number of tiles both the worker and the consumer rasterized.
    pub(crate) fn doubled(&self) -> usize {
        self.doubled
    }

    /// Stop the worker and return every tile to the pool.
    ///
    /// Blocks until the worker has finished. Moving the consumer position to the end of the grid
    /// makes it skip all remaining tiles, so this only waits for the tile in flight.
    pub(crate) fn shutdown(&mut self, tile_count: usize) {
        self.skip_to.store(tile_count, Ordering::Relaxed);

        while let Ok(batch) = self.receiver.recv() {
            for tile in batch {
                self.tiles.release(tile);
            }
        }
        for tile in self.staged.drain(..) {
            self.tiles.release(tile);
        }

        self.tiles.release_all();
    }
}
