//! The world: items, shared cache, and the per-frame planning entry point
//!
//! A [`World`] owns every placed image, the shared [`TileCache`] pool, the
//! invalidation pipeline state, and the load queue. The embedding
//! application drives it in a loop:
//!
//! 1. [`update`](World::update) with the current [`ViewState`] to get a
//!    [`FramePlan`],
//! 2. drain [`next_load`](World::next_load) into its downloader and feed
//!    results back through [`complete_load`](World::complete_load),
//! 3. [`pump_invalidations`](World::pump_invalidations) to advance data
//!    modification passes,
//! 4. hand the plan to a drawer.
//!
//! The world never touches the network or a GPU. Loading and drawing are
//! collaborators; this type only decides what they should work on.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use log::{error, warn};

use deepzoom_cache::{
    CacheConfig, CacheSeed, CacheStats, ConversionRegistry, EvictedTiles, RendererProfile,
    TileCache, TileData, TileRef,
};
use deepzoom_scheduler::{LoadQueue, Stamp, StampClock, SupersessionCell};

use crate::events::{ListenerFn, ListenerId, Listeners, WorldEvent};
use crate::geometry::Rect;
use crate::image::TiledImage;
use crate::invalidate::InvalidationJob;
use crate::options::CoreOptions;
use crate::source::TileSource;
use crate::tile::{ItemId, Tile, TileId};
use crate::view::ViewState;

/// Where an item goes in viewport units. Height follows the source aspect.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ItemPlacement {
    pub x: f64,
    pub y: f64,
    pub width: f64,
}

impl Default for ItemPlacement {
    fn default() -> Self {
        Self { x: 0.0, y: 0.0, width: 1.0 }
    }
}

/// A tile the world wants loaded. Popped via [`World::next_load`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadRequest {
    pub tile: TileId,
}

/// One image's slice of a frame: its draw list in painter order.
#[derive(Debug, Clone)]
pub struct ImagePlan {
    pub item: ItemId,
    pub tiles: Vec<TileId>,
    pub needs_draw: bool,
}

/// Everything [`World::update`] decided for one frame.
#[derive(Debug, Clone, Default)]
pub struct FramePlan {
    pub images: Vec<ImagePlan>,
}

impl FramePlan {
    /// True while loads or blends are outstanding and another frame should
    /// be scheduled.
    pub fn needs_draw(&self) -> bool {
        self.images.iter().any(|plan| plan.needs_draw)
    }
}

pub struct World {
    pub(crate) options: CoreOptions,
    pub(crate) pool: TileCache,
    pub(crate) profile: RendererProfile,
    /// Stamps for invalidation passes.
    pub(crate) clock: StampClock,
    /// Stamps for draw recency. Kept apart from `clock` so frequent frames
    /// do not inflate invalidation stamps.
    pub(crate) touch: StampClock,
    /// Stamp of the most recent world-wide invalidation request.
    pub(crate) last_invalidate: Stamp,
    /// Draw order: index 0 is painted first.
    pub(crate) items: Vec<TiledImage>,
    pub(crate) next_item: ItemId,
    /// One supersession cell per original cache key.
    pub(crate) cells: HashMap<String, Arc<SupersessionCell>>,
    pub(crate) jobs: VecDeque<InvalidationJob>,
    pub(crate) handlers: Vec<Arc<dyn crate::invalidate::InvalidationHandler>>,
    pub(crate) listeners: Listeners,
    pub(crate) queue: LoadQueue<LoadRequest>,
    pub(crate) home_bounds: Rect,
    pub(crate) content_factor: f64,
    pub(crate) auto_refigure: bool,
    pub(crate) needs_refigure: bool,
}

impl World {
    pub fn new(
        options: CoreOptions,
        registry: Arc<ConversionRegistry>,
        profile: RendererProfile,
    ) -> Self {
        let pool =
            TileCache::new(CacheConfig::with_max_entries(options.max_cache_entries), registry);
        Self {
            options,
            pool,
            profile,
            clock: StampClock::new(),
            touch: StampClock::new(),
            last_invalidate: Stamp::ZERO,
            items: Vec::new(),
            next_item: 1,
            cells: HashMap::new(),
            jobs: VecDeque::new(),
            handlers: Vec::new(),
            listeners: Listeners::default(),
            queue: LoadQueue::new(),
            home_bounds: Rect::default(),
            content_factor: 1.0,
            auto_refigure: true,
            needs_refigure: false,
        }
    }

    pub fn options(&self) -> &CoreOptions {
        &self.options
    }

    /// Swap the options in, resizing the cache bound if it changed.
    pub fn set_options(&mut self, options: CoreOptions) {
        let resized = options.max_cache_entries != self.options.max_cache_entries;
        self.options = options;
        if resized {
            let notices = self.pool.set_max_entries(self.options.max_cache_entries);
            self.apply_evictions(notices);
        }
    }

    pub fn profile(&self) -> &RendererProfile {
        &self.profile
    }

    /// The shared record pool. Drawers use it to refresh recency on the
    /// records they present.
    pub fn cache(&self) -> &TileCache {
        &self.pool
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.pool.stats()
    }

    pub fn add_item(&mut self, source: Arc<dyn TileSource>) -> ItemId {
        self.add_item_at(source, ItemPlacement::default())
    }

    pub fn add_item_at(&mut self, source: Arc<dyn TileSource>, placement: ItemPlacement) -> ItemId {
        let id = self.next_item;
        self.next_item += 1;
        self.items.push(TiledImage::new(id, source, placement.x, placement.y, placement.width));
        let index = self.items.len() - 1;
        self.listeners.emit(&WorldEvent::ItemAdded { item: id, index });
        self.refigure_sizes();
        id
    }

    /// Remove an item, erasing its records and dropping its pending work.
    pub fn remove_item(&mut self, id: ItemId) -> bool {
        let Some(position) = self.items.iter().position(|image| image.id() == id) else {
            return false;
        };
        let mut image = self.items.remove(position);
        for tile in image.tiles.values_mut() {
            tile.unload(&self.pool, true);
        }
        self.jobs.retain(|job| job.tile.item != id);
        self.listeners.emit(&WorldEvent::ItemRemoved { item: id });
        self.refigure_sizes();
        true
    }

    /// Move an item within the draw order. The index clamps to the end.
    pub fn set_item_index(&mut self, id: ItemId, index: usize) -> bool {
        let Some(previous) = self.items.iter().position(|image| image.id() == id) else {
            return false;
        };
        let current = index.min(self.items.len() - 1);
        if current != previous {
            let image = self.items.remove(previous);
            self.items.insert(current, image);
            self.listeners.emit(&WorldEvent::ItemIndexChanged { item: id, previous, current });
        }
        true
    }

    pub fn set_item_placement(&mut self, id: ItemId, placement: ItemPlacement) -> bool {
        let Some(image) = self.items.iter_mut().find(|image| image.id() == id) else {
            return false;
        };
        image.set_placement(placement.x, placement.y, placement.width);
        self.refigure_sizes();
        true
    }

    pub fn item(&self, id: ItemId) -> Option<&TiledImage> {
        self.items.iter().find(|image| image.id() == id)
    }

    pub fn item_mut(&mut self, id: ItemId) -> Option<&mut TiledImage> {
        self.items.iter_mut().find(|image| image.id() == id)
    }

    pub fn items(&self) -> &[TiledImage] {
        &self.items
    }

    pub fn item_count(&self) -> usize {
        self.items.len()
    }

    pub fn index_of(&self, id: ItemId) -> Option<usize> {
        self.items.iter().position(|image| image.id() == id)
    }

    pub fn tile(&self, id: &TileId) -> Option<&Tile> {
        find_tile(&self.items, id)
    }

    pub fn on_event(&mut self, listener: ListenerFn) -> ListenerId {
        self.listeners.add(listener)
    }

    pub fn remove_listener(&mut self, id: ListenerId) -> bool {
        self.listeners.remove(id)
    }

    /// Defer layout metric recomputation while batching item changes.
    pub fn set_auto_refigure(&mut self, auto: bool) {
        self.auto_refigure = auto;
        if auto && self.needs_refigure {
            self.refigure_now();
        }
    }

    pub(crate) fn refigure_sizes(&mut self) {
        if self.auto_refigure {
            self.refigure_now();
        } else {
            self.needs_refigure = true;
        }
    }

    /// Recompute home bounds and the content scale factor, emitting
    /// [`WorldEvent::MetricsChanged`] when they moved.
    pub fn refigure_now(&mut self) {
        self.needs_refigure = false;

        let mut home: Option<Rect> = None;
        let mut factor: f64 = 0.0;
        for image in &self.items {
            let bounds = image.clipped_bounds();
            home = Some(match home {
                Some(acc) => acc.union(&bounds),
                None => bounds,
            });
            let (src_w, _) = image.source().dimensions();
            factor = factor.max(src_w as f64 / image.bounds().width);
        }
        let home = home.unwrap_or_default();
        let factor = if self.items.is_empty() { 1.0 } else { factor };

        let changed = !home.approx_eq(&self.home_bounds, 1e-9)
            || (factor - self.content_factor).abs() > 1e-9;
        self.home_bounds = home;
        self.content_factor = factor;

        if changed {
            self.listeners.emit(&WorldEvent::MetricsChanged {
                home_bounds: self.home_bounds,
                content_size: self.content_size(),
                content_factor: self.content_factor,
            });
        }
    }

    /// Union of item placements in viewport units.
    pub fn home_bounds(&self) -> Rect {
        self.home_bounds
    }

    /// Source pixels per viewport unit of the densest item.
    pub fn content_factor(&self) -> f64 {
        self.content_factor
    }

    /// Home bounds expressed in source pixels of the densest item.
    pub fn content_size(&self) -> (f64, f64) {
        (self.home_bounds.width * self.content_factor, self.home_bounds.height * self.content_factor)
    }

    /// Plan a frame: refresh every image against the view and collect the
    /// draw lists. Load requests land in the internal queue.
    pub fn update(&mut self, view: &ViewState, now_ms: u64) -> FramePlan {
        let mut plan = FramePlan::default();
        for image in &mut self.items {
            plan.images.push(image.update(view, &self.options, &self.touch, now_ms, &mut self.queue));
        }
        self.ensure_tiles_up_to_date(&plan);
        plan
    }

    /// Pop the most urgent pending load and mark its tile loading. Stale
    /// and duplicate queue entries are skipped.
    pub fn next_load(&mut self) -> Option<TileId> {
        while let Some(request) = self.queue.pop() {
            let Some(tile) = find_tile_mut(&mut self.items, &request.tile) else {
                continue;
            };
            if tile.loaded() || tile.loading() || tile.queued_priority().is_none() {
                continue;
            }
            tile.mark_loading();
            return Some(request.tile);
        }
        None
    }

    /// Feed a finished download back in. On success the data becomes the
    /// tile's original record, first-load handlers are scheduled, and
    /// [`WorldEvent::TileLoaded`] fires.
    pub fn complete_load(&mut self, id: TileId, result: Result<TileData, String>, now_ms: u64) {
        let mut evicted = Vec::new();
        let mut loaded = false;
        {
            let Some(tile) = find_tile_mut(&mut self.items, &id) else {
                warn!("load completion for unknown tile {id:?}");
                return;
            };
            match result {
                Ok(data) => {
                    let key = tile.original_key().clone();
                    let attach = tile.add_cache(
                        &self.pool,
                        key,
                        CacheSeed::value(data),
                        true,
                        true,
                        self.profile.supported(),
                        &mut evicted,
                    );
                    match attach {
                        Ok(_) => {
                            tile.set_loaded_now(now_ms);
                            loaded = true;
                        }
                        Err(err) => {
                            error!("tile {id:?}: caching loaded data failed: {err}");
                            tile.mark_failed();
                        }
                    }
                }
                Err(message) => {
                    error!("tile {id:?}: load failed: {message}");
                    tile.mark_failed();
                }
            }
        }
        self.apply_evictions(evicted);

        if loaded {
            if !self.handlers.is_empty() {
                let stamp = self.clock.next();
                self.invalidate_tiles(&[id], stamp, false, false, true);
            }
            self.listeners.emit(&WorldEvent::TileLoaded { tile: id });
        }
    }

    /// Reset the tiles named by pool eviction notices. Their remaining
    /// records are released as revivable zombies and the tiles will be
    /// re-requested by the next update that wants them.
    pub(crate) fn apply_evictions(&mut self, notices: Vec<EvictedTiles>) {
        for notice in notices {
            for tile_ref in &notice.tiles {
                let Some(tile) = find_tile_by_ref(&mut self.items, tile_ref) else {
                    continue;
                };
                let id = tile.id();
                tile.forget_cache(&notice.key);
                tile.unload(&self.pool, false);
                self.listeners.emit(&WorldEvent::TileUnloaded { tile: id });
            }
        }
    }
}

impl std::fmt::Debug for World {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("World")
            .field("items", &self.items.len())
            .field("jobs", &self.jobs.len())
            .field("handlers", &self.handlers.len())
            .field("queue", &self.queue.len())
            .finish()
    }
}

pub(crate) fn find_tile<'a>(items: &'a [TiledImage], id: &TileId) -> Option<&'a Tile> {
    items.iter().find(|image| image.id() == id.item)?.tiles.get(&id.index)
}

pub(crate) fn find_tile_mut<'a>(items: &'a mut [TiledImage], id: &TileId) -> Option<&'a mut Tile> {
    items.iter_mut().find(|image| image.id() == id.item)?.tiles.get_mut(&id.index)
}

pub(crate) fn find_tile_by_ref<'a>(
    items: &'a mut [TiledImage],
    tile_ref: &TileRef,
) -> Option<&'a mut Tile> {
    let id = TileId::new(tile_ref.item, tile_ref.level, tile_ref.x, tile_ref.y);
    find_tile_mut(items, &id)
}
