// Copyright 2025 the Vello Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Recycling of tile buffers between the background worker and the consumer.

use crate::fill::TrapFiller;
use crate::grid::TILE_AREA;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// The number of tiles a role-local list collects before handing them to the shared list in bulk.
pub const POOL_SYNC_GRANULARITY: usize = 16;

/// A coverage buffer for one tile, together with the filler's image handle for it.
pub struct Tile<I> {
    alpha: Box<[u8]>,
    image: Option<I>,
    pos: usize,
}

impl<I> Tile<I> {
    pub(crate) fn new() -> Self {
        Self {
            alpha: vec![0; TILE_AREA].into_boxed_slice(),
            image: None,
            pos: 0,
        }
    }

    /// The coverage values, row by row.
    pub fn alpha(&self) -> &[u8] {
        &self.alpha
    }

    /// The index of the tile whose coverage this buffer last received.
    pub fn pos(&self) -> usize {
        self.pos
    }

    pub(crate) fn set_pos(&mut self, pos: usize) {
        self.pos = pos;
    }

    pub(crate) fn alpha_mut(&mut self) -> &mut [u8] {
        &mut self.alpha
    }

    pub(crate) fn take_image(&mut self) -> Option<I> {
        self.image.take()
    }

    pub(crate) fn set_image(&mut self, image: I) {
        self.image = Some(image);
    }
}

impl<I> core::fmt::Debug for Tile<I> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Tile")
            .field("pos", &self.pos)
            .field("has_image", &self.image.is_some())
            .finish_non_exhaustive()
    }
}

/// A pool of idle tiles, shared by all generators of a [`TileContext`](crate::TileContext).
///
/// Tiles move between the pool and the two roles (worker and consumer) in batches, so the lock
/// is taken once per batch instead of once per tile. The pool never shrinks on its own, call
/// [`TilePool::purge`] to drop the idle tiles. Whatever is still cached when the last handle to
/// the pool goes away is purged then, so every image reaches [`TrapFiller::free_image`] even if
/// a generator outlives its context.
pub struct TilePool<F: TrapFiller> {
    filler: Arc<F>,
    idle: Mutex<Vec<Tile<F::Image>>>,
    created: AtomicUsize,
    acquired: AtomicUsize,
    released: AtomicUsize,
}

impl<F: TrapFiller> TilePool<F> {
    /// Create an empty pool whose images are released through `filler`.
    pub fn new(filler: Arc<F>) -> Self {
        Self {
            filler,
            idle: Mutex::new(Vec::new()),
            created: AtomicUsize::new(0),
            acquired: AtomicUsize::new(0),
            released: AtomicUsize::new(0),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Tile<F::Image>>> {
        // A panic while holding the lock can't leave the list half-modified.
        self.idle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Move up to `max` idle tiles into `local`.
    fn take_into(&self, max: usize, local: &mut Vec<Tile<F::Image>>) {
        let mut idle = self.lock();
        let start = idle.len() - max.min(idle.len());
        local.extend(idle.drain(start..));
    }

    /// Move all tiles of `local` into the idle list.
    fn give_back(&self, local: &mut Vec<Tile<F::Image>>) {
        if local.is_empty() {
            return;
        }

        self.lock().append(local);
    }

    /// The number of tiles this pool has allocated and not purged yet.
    pub fn created(&self) -> usize {
        self.created.load(Ordering::Relaxed)
    }

    /// The number of tiles currently in the shared idle list.
    pub fn idle(&self) -> usize {
        self.lock().len()
    }

    /// The number of tiles handed out to workers so far.
    pub fn acquired(&self) -> usize {
        self.acquired.load(Ordering::Relaxed)
    }

    /// The number of tiles given back by workers and consumers so far.
    pub fn released(&self) -> usize {
        self.released.load(Ordering::Relaxed)
    }

    /// The number of allocated tiles that are not in the shared idle list.
    pub fn outstanding(&self) -> usize {
        self.created().saturating_sub(self.idle())
    }

    /// Drop all idle tiles, releasing their images through the filler.
    pub fn purge(&self) {
        let tiles = core::mem::take(&mut *self.lock());
        self.created.fetch_sub(tiles.len(), Ordering::Relaxed);

        for mut tile in tiles {
            if let Some(image) = tile.take_image() {
                self.filler.free_image(image);
            }
        }
    }
}

impl<F: TrapFiller> Drop for TilePool<F> {
    fn drop(&mut self) {
        self.purge();
    }
}

impl<F: TrapFiller> core::fmt::Debug for TilePool<F> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("TilePool")
            .field("created", &self.created())
            .field("idle", &self.idle())
            .field("acquired", &self.acquired())
            .field("released", &self.released())
            .finish_non_exhaustive()
    }
}

/// The worker's view of the pool.
pub(crate) struct WorkerTiles<F: TrapFiller> {
    pool: Arc<TilePool<F>>,
    local: Vec<Tile<F::Image>>,
}

impl<F: TrapFiller> WorkerTiles<F> {
    pub(crate) fn new(pool: Arc<TilePool<F>>) -> Self {
        Self {
            pool,
            local: Vec::new(),
        }
    }

    /// Get a tile, refilling the local list with up to `max_batch` idle tiles when it runs dry.
    pub(crate) fn acquire(&mut self, max_batch: usize) -> Tile<F::Image> {
        if self.local.is_empty() {
            self.local.reserve(max_batch);
            self.pool.take_into(max_batch, &mut self.local);
        }

        self.pool.acquired.fetch_add(1, Ordering::Relaxed);
        self.local.pop().unwrap_or_else(|| {
            self.pool.created.fetch_add(1, Ordering::Relaxed);
            Tile::new()
        })
    }

    /// Return a tile the worker acquired but didn't publish.
    pub(crate) fn recycle(&mut self, tile: Tile<F::Image>) {
        self.pool.released.fetch_add(1, Ordering::Relaxed);
        self.local.push(tile);
    }

    pub(crate) fn release_all(&mut self) {
        self.pool.give_back(&mut self.local);
    }
}

impl<F: TrapFiller> Drop for WorkerTiles<F> {
    fn drop(&mut self) {
        self.release_all();
    }
}

/// The consumer's view of the pool.
pub(crate) struct ConsumerTiles<F: TrapFiller> {
    pool: Arc<TilePool<F>>,
    local: Vec<Tile<F::Image>>,
}

impl<F: TrapFiller> ConsumerTiles<F> {
    pub(crate) fn new(pool: Arc<TilePool<F>>) -> Self {
        Self {
            pool,
            local: Vec::with_capacity(POOL_SYNC_GRANULARITY + 1),
        }
    }

    /// Give a tile back once its coverage has been copied out.
    pub(crate) fn release(&mut self, tile: Tile<F::Image>) {
        self.pool.released.fetch_add(1, Ordering::Relaxed);
        self.local.push(tile);

        if self.local.len() > POOL_SYNC_GRANULARITY {
            self.release_all();
        }
    }

    pub(crate) fn release_all(&mut self) {
        self.pool.give_back(&mut self.local);
    }
}

impl<F: TrapFiller> Drop for ConsumerTiles<F> {
    fn drop(&mut self) {
        self.release_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool() -> Arc<TilePool<CountingFree>> {
        Arc::new(TilePool::new(Arc::new(CountingFree::default())))
    }

    #[test]
    fn acquire_allocates_when_empty() {
        let pool = pool();
        let mut worker = WorkerTiles::new(pool.clone());

        let tile = worker.acquire(4);
        assert_eq!(tile.alpha().len(), TILE_AREA);
        assert_eq!(pool.created(), 1);
        assert_eq!(pool.acquired(), 1);
        assert_eq!(pool.outstanding(), 1);
    }

    #[test]
    fn consumer_releases_in_batches() {
        let pool = pool();
        let mut worker = WorkerTiles::new(pool.clone());
        let mut consumer = ConsumerTiles::new(pool.clone());

        let tiles: Vec<_> = (0..POOL_SYNC_GRANULARITY + 1)
            .map(|_| worker.acquire(1))
            .collect();
        let mut tiles = tiles.into_iter();

        for tile in tiles.by_ref().take(POOL_SYNC_GRANULARITY) {
            consumer.release(tile);
        }
        assert_eq!(pool.idle(), 0);

        consumer.release(tiles.next().unwrap());
        assert_eq!(pool.idle(), POOL_SYNC_GRANULARITY + 1);
        assert_eq!(pool.released(), POOL_SYNC_GRANULARITY + 1);
        assert_eq!(pool.outstanding(), 0);
    }

    #[test]
    fn worker_takes_bounded_batch() {
        let pool = pool();
        let mut consumer = ConsumerTiles::new(pool.clone());
        {
            let mut worker = WorkerTiles::new(pool.clone());
            for _ in 0..10 {
                let tile = worker.acquire(1);
                consumer.release(tile);
            }
        }
        consumer.release_all();
        assert_eq!(pool.created(), 10);
        assert_eq!(pool.idle(), 10);

        let mut worker = WorkerTiles::new(pool.clone());
        let _tile = worker.acquire(3);
        // Three tiles left the shared list, one of them is in use.
        assert_eq!(pool.idle(), 7);
        assert_eq!(worker.local.len(), 2);
        assert_eq!(pool.created(), 10);

        drop(worker);
        assert_eq!(pool.idle(), 9);
    }

    #[test]
    fn recycled_tiles_return_on_drop() {
        let pool = pool();
        let mut worker = WorkerTiles::new(pool.clone());
        let tile = worker.acquire(2);
        worker.recycle(tile);
        drop(worker);

        assert_eq!(pool.idle(), 1);
        assert_eq!(pool.acquired(), pool.released());
    }

    #[derive(Debug, Default)]
    struct CountingFree(AtomicUsize);

    impl TrapFiller for CountingFree {
        type Image = u32;

        fn rasterize(
            &self,
            _: Option<u32>,
            _: &crate::TrapezoidList,
            _: &[u32],
            _: &mut [u8],
            _: i32,
            _: i32,
        ) -> Result<u32, crate::FillError> {
            Ok(0)
        }

        fn free_image(&self, _: u32) {
            self.0.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[test]
    fn purge_frees_images() {
        let pool = pool();
        let mut worker = WorkerTiles::new(pool.clone());
        let mut with_image = worker.acquire(1);
        with_image.set_image(7);
        let without_image = worker.acquire(1);
        worker.recycle(with_image);
        worker.recycle(without_image);
        drop(worker);

        pool.purge();

        assert_eq!(pool.filler.0.load(Ordering::Relaxed), 1);
        assert_eq!(pool.created(), 0);
        assert_eq!(pool.idle(), 0);
    }

    #[test]
    fn last_handle_frees_cached_images() {
        let filler = Arc::new(CountingFree::default());
        let pool = Arc::new(TilePool::new(filler.clone()));
        let mut consumer = ConsumerTiles::new(pool.clone());
        {
            let mut worker = WorkerTiles::new(pool.clone());
            for image in 0..3 {
                let mut tile = worker.acquire(1);
                tile.set_image(image);
                consumer.release(tile);
            }
        }

        // Tiles still in a role-local list reach the pool when that list goes away.
        drop(pool);
        assert_eq!(filler.0.load(Ordering::Relaxed), 0);
        drop(consumer);
        assert_eq!(filler.0.load(Ordering::Relaxed), 3);
    }
}
