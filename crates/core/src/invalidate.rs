//! The tile invalidation pipeline
//!
//! Handlers registered with [`World::on_tile_invalidated`] transform tile
//! data: filters, overlays, format rewrites. A pass over a tile is an
//! explicit [`InvalidationJob`] advanced by
//! [`World::pump_invalidations`]; there is no hidden continuation chain
//! and no async runtime. Handlers that need more than one pump return
//! [`HandlerFlow::Pending`] and are resumed where they left off.
//!
//! Correctness rests on stamps. Every pass carries an
//! [`OutdatedToken`] minted against the supersession cell of the tile's
//! original cache key. Before a pass may commit, the token is rechecked;
//! if a newer pass has advanced the cell in the meantime, the finished
//! work is discarded and the pass is re-queued under the newest stamp.
//! Stamps only grow, so the last write always belongs to the newest
//! invalidation, no matter how passes interleave across pumps.
//!
//! Tiles sharing an original key share one derived record: the first
//! commit sweeps every un-diverged sharer onto it, so the handlers run
//! once per tile at most and the sharers never disagree on screen.

use std::collections::{HashMap, VecDeque};
use std::mem;
use std::sync::Arc;

use log::warn;

use deepzoom_cache::{
    CacheKey, CacheRecord, CacheResult, DataKind, EvictedTiles, TileCache, TileData, TileRef,
};
use deepzoom_scheduler::{JobOutcome, JobState, OutdatedToken, Stamp, SupersessionCell};

use crate::events::WorldEvent;
use crate::tile::{RenderSwap, Tile, TileId};
use crate::world::{find_tile, find_tile_by_ref, find_tile_mut, FramePlan, World};

/// What a handler reports after one step on one tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerFlow {
    /// This handler is finished with the tile.
    Done,
    /// Not finished; call again on a later pump. The pass keeps the tile
    /// and its working data parked in the meantime.
    Pending,
}

/// A data transform invoked for every invalidated tile.
///
/// Handlers run in registration order and see each other's output through
/// the tile's working cache. Returning an error discards the working data
/// accumulated so far and lets the remaining handlers run from clean
/// source data.
pub trait InvalidationHandler: Send + Sync {
    fn on_invalidated(&self, ctx: &mut InvalidationCtx<'_>) -> Result<HandlerFlow, String>;
}

impl<F> InvalidationHandler for F
where
    F: Fn(&mut InvalidationCtx<'_>) -> Result<HandlerFlow, String> + Send + Sync,
{
    fn on_invalidated(&self, ctx: &mut InvalidationCtx<'_>) -> Result<HandlerFlow, String> {
        self(ctx)
    }
}

/// A handler's window onto the tile it is transforming.
pub struct InvalidationCtx<'a> {
    tile: &'a mut Tile,
    pool: &'a TileCache,
    token: &'a OutdatedToken,
    evicted: &'a mut Vec<EvictedTiles>,
}

impl InvalidationCtx<'_> {
    pub fn tile(&self) -> TileId {
        self.tile.id()
    }

    pub fn stamp(&self) -> Stamp {
        self.token.stamp()
    }

    /// True once a newer pass has overtaken this one. Expensive handlers
    /// can poll this and bail early; the result would be discarded anyway.
    pub fn outdated(&self) -> bool {
        self.token.outdated()
    }

    /// Read the tile's data as `kind`, materializing the working cache
    /// from the current render source on first access.
    pub fn get_data(&mut self, kind: DataKind) -> CacheResult<TileData> {
        self.tile.get_data(self.pool, kind, self.evicted)
    }

    /// Replace the tile's working data.
    pub fn set_data(&mut self, data: TileData) {
        self.tile.set_data(self.pool, data, self.evicted);
    }

    /// Throw away everything this pass has written so far.
    pub fn reset_data(&mut self) {
        self.tile.discard_working(self.pool);
    }
}

/// One queued invalidation pass over one tile.
#[derive(Debug)]
pub(crate) struct InvalidationJob {
    pub(crate) tile: TileId,
    pub(crate) token: OutdatedToken,
    pub(crate) state: JobState,
    /// Revert to original data before the handlers run.
    pub(crate) restore: bool,
    /// Run even though the tile holds no loaded data.
    pub(crate) allow_unloaded: bool,
    /// Scheduled by a load completion rather than an invalidation request.
    /// Such jobs never re-queue on supersession; the newer pass covers
    /// them.
    pub(crate) from_first_load: bool,
    /// Resume point into the handler chain.
    pub(crate) handler_index: usize,
}

/// Counters from one [`World::pump_invalidations`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PumpStats {
    /// Jobs that reached a terminal state this pump.
    pub processed: usize,
    pub committed: usize,
    pub restored: usize,
    pub unchanged: usize,
    pub superseded: usize,
    pub requeued: usize,
    pub dropped: usize,
    /// Jobs still pending after this pump.
    pub parked: usize,
}

impl PumpStats {
    fn record(&mut self, outcome: JobOutcome) {
        self.processed += 1;
        match outcome {
            JobOutcome::Committed => self.committed += 1,
            JobOutcome::Restored => self.restored += 1,
            JobOutcome::Unchanged => self.unchanged += 1,
            JobOutcome::Superseded => self.superseded += 1,
            JobOutcome::Requeued => self.requeued += 1,
            JobOutcome::Dropped => self.dropped += 1,
        }
    }
}

impl World {
    /// Register a tile data transform. Handlers run in registration order
    /// on every invalidated tile and on every tile as it first loads.
    pub fn on_tile_invalidated(&mut self, handler: Arc<dyn InvalidationHandler>) {
        self.handlers.push(handler);
    }

    /// Invalidate specific tiles, scheduling a handler pass over each.
    /// With `restore`, tiles revert to original data before the handlers
    /// run. Returns the stamp of the pass.
    pub fn invalidate(&mut self, tiles: &[TileId], restore: bool) -> Stamp {
        let stamp = self.clock.next();
        self.invalidate_tiles(tiles, stamp, restore, false, false);
        stamp
    }

    /// Invalidate the whole world: every tile still worth keeping gets a
    /// handler pass, and loaded tiles that no recent frame looked at are
    /// released instead of being reprocessed.
    ///
    /// A tile is kept when it sits at or below its source's
    /// single-tile level (cheap, permanently useful) or when it was
    /// touched no earlier than the oldest tile of the most recent draw
    /// list.
    pub fn request_invalidate(&mut self, restore: bool) -> Stamp {
        let stamp = self.clock.next();
        self.last_invalidate = stamp;

        let mut keep: Vec<TileId> = Vec::new();
        let mut evict: Vec<TileId> = Vec::new();
        for image in &self.items {
            let cutoff = image.source().closest_level();
            let oldest = image
                .last_drawn
                .iter()
                .filter_map(|id| image.tiles.get(&id.index))
                .map(|tile| tile.last_touch())
                .min();
            for tile in image.tiles.values() {
                if !tile.loaded() {
                    continue;
                }
                let keep_tile = tile.id().index.level <= cutoff
                    || oldest.is_some_and(|floor| tile.last_touch() >= floor);
                if keep_tile {
                    keep.push(tile.id());
                } else {
                    evict.push(tile.id());
                }
            }
        }

        for id in evict {
            if let Some(tile) = find_tile_mut(&mut self.items, &id) {
                tile.unload(&self.pool, false);
                self.listeners.emit(&WorldEvent::TileUnloaded { tile: id });
            }
        }

        self.invalidate_tiles(&keep, stamp, restore, false, false);
        stamp
    }

    pub(crate) fn invalidate_tiles(
        &mut self,
        tiles: &[TileId],
        stamp: Stamp,
        restore: bool,
        allow_unloaded: bool,
        from_first_load: bool,
    ) {
        for id in tiles {
            let Some(tile) = find_tile(&self.items, id) else {
                continue;
            };
            if !tile.exists() || (!tile.loaded() && !allow_unloaded) {
                continue;
            }
            let original = tile.original_key().clone();

            // Advance the cell first so in-flight passes over the same
            // data see themselves superseded even when no new job queues.
            let cell = self
                .cells
                .entry(original)
                .or_insert_with(|| Arc::new(SupersessionCell::new()))
                .clone();
            cell.advance(stamp);

            if self.jobs.iter().any(|job| job.tile == *id && job.token.stamp() >= stamp) {
                continue;
            }
            self.jobs.push_back(InvalidationJob {
                tile: *id,
                token: OutdatedToken::new(cell, stamp),
                state: JobState::Pending,
                restore,
                allow_unloaded,
                from_first_load,
                handler_index: 0,
            });
        }
    }

    /// Advance every queued invalidation job as far as it will go.
    ///
    /// Call once per frame, between [`update`](World::update) and drawing.
    /// Jobs waiting on a [`HandlerFlow::Pending`] handler or on another
    /// pass that owns their tile stay queued for the next pump.
    pub fn pump_invalidations(&mut self, now_ms: u64) -> PumpStats {
        let mut stats = PumpStats::default();
        if self.jobs.is_empty() {
            return stats;
        }

        let pool = self.pool.clone();
        let handlers = self.handlers.clone();
        let mut evicted: Vec<EvictedTiles> = Vec::new();
        let mut parked: VecDeque<InvalidationJob> = VecDeque::new();
        let mut requeued: Vec<InvalidationJob> = Vec::new();
        // Displaced-record rebinds, applied after the loop; later commits
        // overwrite earlier ones.
        let mut rebinds: Vec<(CacheKey, Arc<CacheRecord>, Vec<TileRef>)> = Vec::new();
        // Last committed record per original key, for the sharer sweep.
        let mut shared_commits: HashMap<CacheKey, (CacheKey, Arc<CacheRecord>)> = HashMap::new();

        let mut remaining = mem::take(&mut self.jobs);
        while let Some(mut job) = remaining.pop_front() {
            let stamp = job.token.stamp();

            let Some(image) = self.items.iter_mut().find(|image| image.id() == job.tile.item)
            else {
                stats.record(JobOutcome::Dropped);
                continue;
            };
            let always_blend = image.options().always_blend;
            let Some(tile) = image.tiles.get_mut(&job.tile.index) else {
                stats.record(JobOutcome::Dropped);
                continue;
            };

            if !tile.loaded() && !job.allow_unloaded {
                if tile.processing() == Some(stamp) {
                    tile.clear_processing();
                }
                stats.record(JobOutcome::Dropped);
                continue;
            }

            match tile.processing() {
                Some(owner) if owner != stamp => {
                    // Another pass owns this tile; run after it finishes.
                    stats.parked += 1;
                    parked.push_back(job);
                    continue;
                }
                Some(_) => {}
                None => {
                    tile.set_processing(stamp);
                    if job.restore {
                        tile.restore(&pool, true);
                    }
                }
            }

            let mut waiting = false;
            while job.handler_index < handlers.len() {
                let mut ctx = InvalidationCtx {
                    tile: &mut *tile,
                    pool: &pool,
                    token: &job.token,
                    evicted: &mut evicted,
                };
                match handlers[job.handler_index].on_invalidated(&mut ctx) {
                    Ok(HandlerFlow::Done) => job.handler_index += 1,
                    Ok(HandlerFlow::Pending) => {
                        waiting = true;
                        break;
                    }
                    Err(message) => {
                        warn!(
                            "invalidation handler {} failed on tile {:?}: {message}",
                            job.handler_index, job.tile
                        );
                        tile.discard_working(&pool);
                        job.handler_index += 1;
                    }
                }
            }
            if waiting {
                stats.parked += 1;
                parked.push_back(job);
                continue;
            }

            if job.token.outdated() {
                tile.discard_working(&pool);
                tile.clear_processing();
                debug_assert!(job.state.can_advance(JobState::Superseded));
                job.state = JobState::Superseded;

                let latest = job.token.latest();
                let covered = remaining
                    .iter()
                    .chain(parked.iter())
                    .chain(requeued.iter())
                    .any(|other| other.tile == job.tile && other.token.stamp() >= latest);
                if !job.from_first_load && latest > stamp && !covered {
                    requeued.push(InvalidationJob {
                        tile: job.tile,
                        token: job.token.renew(),
                        state: JobState::Pending,
                        restore: false,
                        allow_unloaded: job.allow_unloaded,
                        from_first_load: false,
                        handler_index: 0,
                    });
                    stats.record(JobOutcome::Requeued);
                } else {
                    stats.record(JobOutcome::Superseded);
                }
                continue;
            }

            debug_assert!(job.state.can_advance(JobState::Committing));
            job.state = JobState::Committing;
            match tile.update_render_target(&pool) {
                Ok(swap) => {
                    let outcome = match &swap {
                        RenderSwap::Committed { key, record, affected } => {
                            rebinds.push((key.clone(), record.clone(), affected.clone()));
                            shared_commits.insert(
                                tile.original_key().clone(),
                                (key.clone(), record.clone()),
                            );
                            JobOutcome::Committed
                        }
                        RenderSwap::Restored => JobOutcome::Restored,
                        RenderSwap::Unchanged => JobOutcome::Unchanged,
                    };
                    // The original record carries the revision so every
                    // sharer reads the same processed-under stamp.
                    if let Some(record) = pool.peek(tile.original_key()) {
                        record.set_revision(stamp.raw());
                    }
                    if always_blend && !matches!(swap, RenderSwap::Unchanged) {
                        tile.set_loaded_now(now_ms);
                    }
                    debug_assert!(job.state.can_advance(JobState::Done));
                    job.state = JobState::Done;
                    stats.record(outcome);
                }
                Err(err) => {
                    warn!("tile {:?}: render target swap failed: {err}", job.tile);
                    tile.discard_working(&pool);
                    stats.record(JobOutcome::Dropped);
                }
            }
            tile.clear_processing();
        }

        for (key, record, affected) in rebinds {
            for tile_ref in &affected {
                if let Some(tile) = find_tile_by_ref(&mut self.items, tile_ref) {
                    tile.rebind_cache(&key, record.clone());
                }
            }
        }

        if !shared_commits.is_empty() {
            self.sweep_shared_commits(&shared_commits, now_ms);
        }

        parked.extend(requeued);
        self.jobs = parked;
        self.apply_evictions(evicted);
        stats
    }

    /// Move every loaded, un-diverged, idle tile sharing a just-committed
    /// original onto the committed record.
    fn sweep_shared_commits(
        &mut self,
        commits: &HashMap<CacheKey, (CacheKey, Arc<CacheRecord>)>,
        now_ms: u64,
    ) {
        for image in &mut self.items {
            let always_blend = image.options().always_blend;
            for tile in image.tiles.values_mut() {
                let Some((derived, record)) = commits.get(tile.original_key()) else {
                    continue;
                };
                if !tile.loaded()
                    || tile.processing().is_some()
                    || tile.working_key().is_some()
                    || tile.main_key() != tile.original_key()
                {
                    continue;
                }
                tile.adopt_main(derived, record.clone());
                if always_blend {
                    tile.set_loaded_now(now_ms);
                }
            }
        }
    }

    /// Queue passes for planned tiles whose data predates the most recent
    /// world-wide invalidation. Catches tiles revived from zombie records
    /// and tiles whose first-load pass was lost to supersession.
    pub(crate) fn ensure_tiles_up_to_date(&mut self, plan: &FramePlan) {
        if self.last_invalidate == Stamp::ZERO {
            return;
        }
        let threshold = self.last_invalidate;

        let mut stale: Vec<TileId> = Vec::new();
        for image_plan in &plan.images {
            for id in &image_plan.tiles {
                let Some(tile) = find_tile(&self.items, id) else {
                    continue;
                };
                if !tile.loaded() {
                    continue;
                }
                let Some(record) = self.pool.peek(tile.original_key()) else {
                    continue;
                };
                if record.revision() >= threshold.raw() {
                    continue;
                }
                let pending = self
                    .jobs
                    .iter()
                    .any(|job| job.tile == *id && job.token.stamp() >= threshold);
                if !pending {
                    stale.push(*id);
                }
            }
        }

        if !stale.is_empty() {
            self.invalidate_tiles(&stale, threshold, false, false, false);
        }
    }
}
