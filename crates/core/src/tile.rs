//! A single pyramid tile and its cache bindings
//!
//! A [`Tile`] owns no pixels. It holds cache keys and shared
//! [`CacheRecord`] handles into the [`TileCache`] pool and tracks the load,
//! blend, and modification state the frame planner and drawers read.
//!
//! Three keys matter:
//!
//! * `original_key` is the source identity ([`TileSource::tile_key`]) and
//!   never changes. Tiles with equal original keys share one record.
//! * `main_key` names the record a drawer should show. It starts equal to
//!   the original key and moves to a derived key once a modification
//!   commits.
//! * `working_key`, when present, names a private scratch record that
//!   handlers write through while a modification pass runs. It is unique
//!   per tile per pass, so concurrent passes over shared tiles never stomp
//!   each other.
//!
//! [`TileSource::tile_key`]: crate::source::TileSource::tile_key

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use log::{error, warn};

use deepzoom_cache::{
    CacheKey, CacheRecord, CacheResult, CacheSeed, DataKind, EvictedTiles, TileCache, TileData,
    TileRef,
};
use deepzoom_scheduler::{LoadPriority, Stamp};

use crate::geometry::Rect;

/// Identifies an image within a [`World`](crate::world::World).
pub type ItemId = u64;

/// Grid position of a tile within one pyramid level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TileIndex {
    pub level: u32,
    pub x: u32,
    pub y: u32,
}

impl TileIndex {
    pub fn new(level: u32, x: u32, y: u32) -> Self {
        Self { level, x, y }
    }
}

/// World-unique tile identity: which image, which grid cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TileId {
    pub item: ItemId,
    pub index: TileIndex,
}

impl TileId {
    pub fn new(item: ItemId, level: u32, x: u32, y: u32) -> Self {
        Self { item, index: TileIndex::new(level, x, y) }
    }
}

/// Coarse summary of what a tile currently holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TileDataState {
    Empty,
    Loading,
    Loaded,
    /// Loaded, with an uncommitted working cache on top.
    Modified,
}

/// What [`Tile::update_render_target`] did.
#[derive(Debug)]
pub enum RenderSwap {
    /// The working cache became the tile's main record under `key`.
    /// `affected` lists every tile now bound to `record`, including tiles
    /// rebound away from a displaced older record.
    Committed {
        key: CacheKey,
        record: Arc<CacheRecord>,
        affected: Vec<TileRef>,
    },
    /// A pending restore reverted the main key to the original.
    Restored,
    Unchanged,
}

// Working keys embed a global sequence number so that tiles sharing an
// original key still get distinct scratch records.
static WORKING_SEQ: AtomicU64 = AtomicU64::new(1);

pub struct Tile {
    id: TileId,
    /// Position within the image, normalized so the image spans width 1.
    bounds: Rect,
    /// Pixel rectangle of usable content inside the tile bitmap.
    source_bounds: Rect,
    exists: bool,
    loading: bool,
    loaded: bool,
    failed: bool,
    /// A restore was requested; the next render-target update reverts.
    restoring: bool,
    /// Stamp of the invalidation pass currently working this tile.
    processing: Option<Stamp>,
    last_touch: Stamp,
    queued_priority: Option<LoadPriority>,
    opacity: f64,
    blend_start: Option<u64>,
    has_transparency: bool,
    main_key: CacheKey,
    original_key: CacheKey,
    working_key: Option<CacheKey>,
    caches: HashMap<CacheKey, Arc<CacheRecord>>,
    /// Last screen-space rectangle computed by the frame planner.
    screen_rect: Rect,
}

impl Tile {
    pub fn new(
        id: TileId,
        key: CacheKey,
        bounds: Rect,
        source_bounds: Rect,
        exists: bool,
        has_transparency: bool,
    ) -> Self {
        Self {
            id,
            bounds,
            source_bounds,
            exists,
            loading: false,
            loaded: false,
            failed: false,
            restoring: false,
            processing: None,
            last_touch: Stamp::ZERO,
            queued_priority: None,
            opacity: 0.0,
            blend_start: None,
            has_transparency,
            main_key: key.clone(),
            original_key: key,
            working_key: None,
            caches: HashMap::new(),
            screen_rect: Rect::default(),
        }
    }

    pub fn id(&self) -> TileId {
        self.id
    }

    pub fn bounds(&self) -> Rect {
        self.bounds
    }

    pub fn source_bounds(&self) -> Rect {
        self.source_bounds
    }

    pub fn exists(&self) -> bool {
        self.exists
    }

    pub fn loading(&self) -> bool {
        self.loading
    }

    pub fn loaded(&self) -> bool {
        self.loaded
    }

    pub fn failed(&self) -> bool {
        self.failed
    }

    pub fn restoring(&self) -> bool {
        self.restoring
    }

    pub fn processing(&self) -> Option<Stamp> {
        self.processing
    }

    pub fn last_touch(&self) -> Stamp {
        self.last_touch
    }

    pub fn queued_priority(&self) -> Option<LoadPriority> {
        self.queued_priority
    }

    pub fn opacity(&self) -> f64 {
        self.opacity
    }

    pub fn has_transparency(&self) -> bool {
        self.has_transparency
    }

    pub fn main_key(&self) -> &CacheKey {
        &self.main_key
    }

    pub fn original_key(&self) -> &CacheKey {
        &self.original_key
    }

    pub fn working_key(&self) -> Option<&CacheKey> {
        self.working_key.as_ref()
    }

    pub fn screen_rect(&self) -> Rect {
        self.screen_rect
    }

    /// The record drawers should present, if any.
    pub fn record(&self) -> Option<&Arc<CacheRecord>> {
        self.caches.get(&self.main_key)
    }

    pub fn data_state(&self) -> TileDataState {
        if self.loading {
            TileDataState::Loading
        } else if self.loaded && self.working_key.is_some() {
            TileDataState::Modified
        } else if self.loaded {
            TileDataState::Loaded
        } else {
            TileDataState::Empty
        }
    }

    /// This tile as a pool-side reference.
    pub fn cache_ref(&self) -> TileRef {
        TileRef::new(self.id.item, self.id.index.level, self.id.index.x, self.id.index.y)
    }

    /// Read tile data as `kind`, creating the working cache on first use.
    ///
    /// The working record is seeded lazily from a deep copy of the current
    /// render source (the original record while a restore is pending,
    /// otherwise the main record), so untouched passes cost nothing.
    pub fn get_data(
        &mut self,
        pool: &TileCache,
        kind: DataKind,
        evicted: &mut Vec<EvictedTiles>,
    ) -> CacheResult<TileData> {
        if let Some(key) = &self.working_key {
            if let Some(record) = self.caches.get(key) {
                return record.data_as(kind, false);
            }
        }

        let source_key = if self.restoring { &self.original_key } else { &self.main_key };
        let source = self
            .caches
            .get(source_key)
            .cloned()
            .ok_or_else(|| deepzoom_cache::CacheError::MissingCache(source_key.clone()))?;

        let key = self.mint_working_key();
        let seed = CacheSeed::deferred(move || source.deep_snapshot().map_err(|e| e.to_string()));
        let (record, notices) = pool.cache_tile(key.clone(), seed, self.cache_ref());
        evicted.extend(notices);
        // Working records are pinned against eviction for the pass.
        record.mark_processing();
        self.caches.insert(key.clone(), record.clone());
        self.working_key = Some(key);
        record.data_as(kind, false)
    }

    /// Replace tile data, creating the working cache if none exists yet.
    pub fn set_data(
        &mut self,
        pool: &TileCache,
        data: TileData,
        evicted: &mut Vec<EvictedTiles>,
    ) {
        if let Some(key) = &self.working_key {
            if let Some(record) = self.caches.get(key) {
                record.set_data(data);
                return;
            }
        }

        let key = self.mint_working_key();
        let (record, notices) = pool.cache_tile(key.clone(), CacheSeed::value(data), self.cache_ref());
        evicted.extend(notices);
        record.mark_processing();
        self.caches.insert(key.clone(), record);
        self.working_key = Some(key);
    }

    fn mint_working_key(&self) -> CacheKey {
        let seq = WORKING_SEQ.fetch_add(1, Ordering::Relaxed);
        format!("{}#working:{}", self.original_key, seq)
    }

    /// Drop the working cache without committing it.
    pub(crate) fn discard_working(&mut self, pool: &TileCache) {
        if let Some(key) = self.working_key.take() {
            if let Some(record) = self.caches.remove(&key) {
                record.done_processing();
            }
            pool.unload_tile(&key, &self.cache_ref(), true);
        }
    }

    /// Attach a record under `key`, creating it from `seed` if absent.
    ///
    /// With `set_as_main` the key becomes the render target and the tile
    /// counts as loaded. `safely` checks value seeds against the drawer's
    /// `supported` formats and logs when no conversion path exists; the
    /// cache still happens so the failure surfaces where the data is used.
    pub fn add_cache(
        &mut self,
        pool: &TileCache,
        key: CacheKey,
        seed: CacheSeed,
        set_as_main: bool,
        safely: bool,
        supported: &[DataKind],
        evicted: &mut Vec<EvictedTiles>,
    ) -> CacheResult<Arc<CacheRecord>> {
        if safely && (set_as_main || key == self.main_key) && !supported.is_empty() {
            if let CacheSeed::Value(data) = &seed {
                let kind = data.kind();
                if pool.registry().first_reachable(kind, supported).is_none() {
                    error!(
                        "tile {:?}: no conversion from {kind} to any supported format of the active drawer",
                        self.id
                    );
                }
            }
        }

        let (record, notices) = pool.cache_tile(key.clone(), seed, self.cache_ref());
        evicted.extend(notices);
        self.caches.insert(key.clone(), record.clone());

        if set_as_main {
            self.main_key = key;
            self.loaded = true;
            self.loading = false;
            self.failed = false;
        }
        Ok(record)
    }

    /// Detach the record under `key` from this tile.
    ///
    /// Removing the main key reverts to the original record when one is
    /// still attached. The original itself is refused while the tile is
    /// diverged, and the sole remaining drawable is always refused.
    pub fn remove_cache(&mut self, pool: &TileCache, key: &CacheKey, free: bool) -> bool {
        let diverged = self.main_key != self.original_key || self.working_key.is_some();
        if *key == self.original_key && diverged {
            warn!("tile {:?}: refusing to remove original cache of a modified tile", self.id);
            return false;
        }

        if *key == self.main_key {
            if self.main_key != self.original_key && self.caches.contains_key(&self.original_key) {
                if self.caches.remove(key).is_some() {
                    pool.unload_tile(key, &self.cache_ref(), free);
                }
                self.main_key = self.original_key.clone();
                return true;
            }
            warn!("tile {:?}: refusing to remove the only renderable cache", self.id);
            return false;
        }

        if self.caches.remove(key).is_some() {
            if self.working_key.as_ref() == Some(key) {
                self.working_key = None;
            }
            pool.unload_tile(key, &self.cache_ref(), free);
            return true;
        }
        false
    }

    /// Request a revert to the original data. Takes effect at the next
    /// [`update_render_target`](Self::update_render_target); a no-op when the
    /// tile never diverged.
    pub fn restore(&mut self, pool: &TileCache, free: bool) {
        if self.main_key == self.original_key && self.working_key.is_none() {
            return;
        }
        self.restoring = true;
        if let Some(key) = self.working_key.take() {
            if let Some(record) = self.caches.remove(&key) {
                record.done_processing();
            }
            pool.unload_tile(&key, &self.cache_ref(), free);
        }
    }

    /// The key modified data commits under. One derived key exists per
    /// original, so every tile sharing the original converges on the same
    /// record after commits.
    pub fn derived_key(&self) -> CacheKey {
        format!("{}#mod", self.original_key)
    }

    /// Swap the committed state forward: promote the working cache to the
    /// tile's main record, or complete a pending restore.
    ///
    /// Commits always land on [`derived_key`](Self::derived_key), so a
    /// repeated modification pass displaces the previous derived record
    /// instead of piling up keys. Tiles bound to the displaced record are
    /// listed in [`RenderSwap::Committed`] and must be rebound by the
    /// caller.
    pub fn update_render_target(&mut self, pool: &TileCache) -> CacheResult<RenderSwap> {
        if let Some(working) = self.working_key.take() {
            let derived = self.derived_key();
            let record = pool.consume(&working, derived.clone())?;
            record.done_processing();
            self.caches.remove(&working);
            self.caches.insert(derived.clone(), record.clone());
            self.main_key = derived.clone();
            self.restoring = false;
            let affected = record.tiles();
            return Ok(RenderSwap::Committed { key: derived, record, affected });
        }

        if self.restoring {
            self.restoring = false;
            if self.main_key != self.original_key {
                let derived = std::mem::replace(&mut self.main_key, self.original_key.clone());
                if self.caches.remove(&derived).is_some() {
                    pool.unload_tile(&derived, &self.cache_ref(), true);
                }
                return Ok(RenderSwap::Restored);
            }
        }
        Ok(RenderSwap::Unchanged)
    }

    /// Detach every record and reset to the unloaded state. `erase` frees
    /// released records outright instead of letting them park as zombies.
    pub(crate) fn unload(&mut self, pool: &TileCache, erase: bool) {
        if let Some(key) = &self.working_key {
            if let Some(record) = self.caches.get(key) {
                if record.is_processing() {
                    record.done_processing();
                }
            }
        }
        let tile_ref = self.cache_ref();
        for (key, _) in self.caches.drain() {
            pool.unload_tile(&key, &tile_ref, erase);
        }
        self.working_key = None;
        self.main_key = self.original_key.clone();
        self.loaded = false;
        self.loading = false;
        self.failed = false;
        self.restoring = false;
        self.processing = None;
        self.queued_priority = None;
        self.opacity = 0.0;
        self.blend_start = None;
    }

    /// Drop a table entry without telling the pool. Used when the pool
    /// already evicted the record and reported it back.
    pub(crate) fn forget_cache(&mut self, key: &CacheKey) -> bool {
        if self.working_key.as_ref() == Some(key) {
            self.working_key = None;
        }
        self.caches.remove(key).is_some()
    }

    /// Point an existing key at a replacement record. Used after a commit
    /// on a shared tile displaces the record this tile was bound to.
    pub(crate) fn rebind_cache(&mut self, key: &CacheKey, record: Arc<CacheRecord>) {
        self.caches.insert(key.clone(), record);
    }

    /// Switch the render target to a record another tile committed for the
    /// shared original. Keeps un-diverged sharers visually consistent
    /// without re-running their handlers.
    pub(crate) fn adopt_main(&mut self, key: &CacheKey, record: Arc<CacheRecord>) {
        record.add_tile(self.cache_ref());
        self.caches.insert(key.clone(), record);
        self.main_key = key.clone();
    }

    /// Mark the instant the tile became presentable, starting the blend
    /// ramp from now.
    pub(crate) fn set_loaded_now(&mut self, now_ms: u64) {
        self.blend_start = Some(now_ms);
    }

    /// Opacity at `now_ms` given the configured blend duration.
    pub fn current_opacity(&self, blend_time_ms: u64, now_ms: u64) -> f64 {
        if !self.loaded {
            return 0.0;
        }
        if blend_time_ms == 0 {
            return 1.0;
        }
        match self.blend_start {
            None => 1.0,
            Some(start) => {
                let elapsed = now_ms.saturating_sub(start) as f64;
                (elapsed / blend_time_ms as f64).clamp(0.0, 1.0)
            }
        }
    }

    pub(crate) fn touch(&mut self, stamp: Stamp) {
        self.last_touch = stamp;
    }

    pub(crate) fn set_screen_rect(&mut self, rect: Rect) {
        self.screen_rect = rect;
    }

    pub(crate) fn set_opacity(&mut self, opacity: f64) {
        self.opacity = opacity;
    }

    pub(crate) fn mark_loading(&mut self) {
        self.loading = true;
        self.queued_priority = None;
    }

    pub(crate) fn mark_failed(&mut self) {
        self.loading = false;
        self.failed = true;
    }

    pub(crate) fn set_queued_priority(&mut self, priority: Option<LoadPriority>) {
        self.queued_priority = priority;
    }

    pub(crate) fn set_processing(&mut self, stamp: Stamp) {
        self.processing = Some(stamp);
    }

    pub(crate) fn clear_processing(&mut self) {
        self.processing = None;
    }
}

impl std::fmt::Debug for Tile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tile")
            .field("id", &self.id)
            .field("state", &self.data_state())
            .field("main_key", &self.main_key)
            .field("working_key", &self.working_key)
            .field("caches", &self.caches.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use deepzoom_cache::{CacheConfig, ConversionRegistry, RasterImage};

    fn pool() -> TileCache {
        TileCache::new(CacheConfig::default(), Arc::new(ConversionRegistry::new()))
    }

    fn raster(fill: u8) -> TileData {
        TileData::raster(RasterImage::filled(4, 4, [fill, fill, fill, 255]))
    }

    fn loaded_tile(pool: &TileCache) -> Tile {
        let mut tile = Tile::new(
            TileId::new(1, 3, 0, 0),
            "img/3/0_0".to_string(),
            Rect::new(0.0, 0.0, 1.0, 1.0),
            Rect::new(0.0, 0.0, 256.0, 256.0),
            true,
            false,
        );
        let mut evicted = Vec::new();
        tile.add_cache(
            pool,
            tile.original_key().clone(),
            CacheSeed::value(raster(10)),
            true,
            false,
            &[],
            &mut evicted,
        )
        .unwrap();
        assert!(evicted.is_empty());
        tile
    }

    #[test]
    fn a_fresh_tile_restores_as_a_no_op() {
        let pool = pool();
        let mut tile = loaded_tile(&pool);

        tile.restore(&pool, true);
        assert!(!tile.restoring());

        let swap = tile.update_render_target(&pool).unwrap();
        assert!(matches!(swap, RenderSwap::Unchanged));
        assert_eq!(tile.main_key(), tile.original_key());
    }

    #[test]
    fn setting_data_creates_a_private_working_cache() {
        let pool = pool();
        let mut tile = loaded_tile(&pool);
        let mut evicted = Vec::new();

        tile.set_data(&pool, raster(99), &mut evicted);

        let working = tile.working_key().cloned().unwrap();
        assert!(working.starts_with("img/3/0_0#working:"));
        assert_eq!(tile.data_state(), TileDataState::Modified);
        // The main record still holds the untouched original data.
        let main = tile.record().unwrap().data_as(DataKind::Raster, false).unwrap();
        assert_eq!(main.as_raster().unwrap().pixels[0], 10);
    }

    #[test]
    fn reading_data_seeds_the_working_cache_from_the_render_source() {
        let pool = pool();
        let mut tile = loaded_tile(&pool);
        let mut evicted = Vec::new();

        let data = tile.get_data(&pool, DataKind::Raster, &mut evicted).unwrap();
        assert_eq!(data.as_raster().unwrap().pixels[0], 10);
        assert!(tile.working_key().is_some());

        // A second read hits the same working record.
        let key = tile.working_key().cloned().unwrap();
        tile.get_data(&pool, DataKind::Raster, &mut evicted).unwrap();
        assert_eq!(tile.working_key().cloned().unwrap(), key);
    }

    #[test]
    fn committing_promotes_the_working_cache_to_a_derived_key() {
        let pool = pool();
        let mut tile = loaded_tile(&pool);
        let mut evicted = Vec::new();

        tile.set_data(&pool, raster(99), &mut evicted);
        let swap = tile.update_render_target(&pool).unwrap();

        match swap {
            RenderSwap::Committed { key, record, affected } => {
                assert_eq!(key, "img/3/0_0#mod");
                assert_eq!(record.data_as(DataKind::Raster, false).unwrap().as_raster().unwrap().pixels[0], 99);
                assert_eq!(affected, vec![tile.cache_ref()]);
            }
            other => panic!("expected a commit, got {other:?}"),
        }
        assert_eq!(tile.main_key(), "img/3/0_0#mod");
        assert_eq!(tile.original_key(), "img/3/0_0");
        assert!(tile.working_key().is_none());
        assert_eq!(tile.data_state(), TileDataState::Loaded);
        // The original record stays attached for restores.
        assert!(pool.contains(&"img/3/0_0".to_string()));
    }

    #[test]
    fn later_commits_reuse_the_derived_key() {
        let pool = pool();
        let mut tile = loaded_tile(&pool);
        let mut evicted = Vec::new();

        tile.set_data(&pool, raster(50), &mut evicted);
        tile.update_render_target(&pool).unwrap();
        let first = tile.main_key().clone();

        tile.set_data(&pool, raster(60), &mut evicted);
        tile.update_render_target(&pool).unwrap();

        assert_eq!(tile.main_key(), &first);
        let shown = tile.record().unwrap().data_as(DataKind::Raster, false).unwrap();
        assert_eq!(shown.as_raster().unwrap().pixels[0], 60);
        assert_eq!(pool.num_records(), 2);
    }

    #[test]
    fn restore_reverts_a_committed_modification() {
        let pool = pool();
        let mut tile = loaded_tile(&pool);
        let mut evicted = Vec::new();

        tile.set_data(&pool, raster(99), &mut evicted);
        tile.update_render_target(&pool).unwrap();
        assert_ne!(tile.main_key(), tile.original_key());

        tile.restore(&pool, true);
        assert!(tile.restoring());
        let swap = tile.update_render_target(&pool).unwrap();
        assert!(matches!(swap, RenderSwap::Restored));
        assert_eq!(tile.main_key(), tile.original_key());
        let shown = tile.record().unwrap().data_as(DataKind::Raster, false).unwrap();
        assert_eq!(shown.as_raster().unwrap().pixels[0], 10);
        // The derived record is gone from the pool.
        assert_eq!(pool.num_records(), 1);
    }

    #[test]
    fn restore_discards_an_uncommitted_working_cache() {
        let pool = pool();
        let mut tile = loaded_tile(&pool);
        let mut evicted = Vec::new();

        tile.set_data(&pool, raster(99), &mut evicted);
        tile.restore(&pool, true);
        assert!(tile.working_key().is_none());

        let swap = tile.update_render_target(&pool).unwrap();
        assert!(matches!(swap, RenderSwap::Unchanged));
        assert_eq!(tile.main_key(), tile.original_key());
    }

    #[test]
    fn the_original_cache_is_protected_while_diverged() {
        let pool = pool();
        let mut tile = loaded_tile(&pool);
        let mut evicted = Vec::new();

        // The sole renderable record is never removable.
        let original = tile.original_key().clone();
        assert!(!tile.remove_cache(&pool, &original, true));

        tile.set_data(&pool, raster(99), &mut evicted);
        tile.update_render_target(&pool).unwrap();
        assert!(!tile.remove_cache(&pool, &original, true));

        // Removing the derived main reverts to the original.
        let derived = tile.main_key().clone();
        assert!(tile.remove_cache(&pool, &derived, true));
        assert_eq!(tile.main_key(), &original);
    }

    #[test]
    fn unload_resets_state_and_releases_every_record() {
        let pool = pool();
        let mut tile = loaded_tile(&pool);
        let mut evicted = Vec::new();

        tile.set_data(&pool, raster(99), &mut evicted);
        tile.update_render_target(&pool).unwrap();
        tile.set_loaded_now(500);

        tile.unload(&pool, true);
        assert_eq!(tile.data_state(), TileDataState::Empty);
        assert_eq!(tile.main_key(), tile.original_key());
        assert!(tile.record().is_none());
        assert_eq!(tile.current_opacity(200, 1000), 0.0);
        assert_eq!(pool.num_records(), 0);
    }

    #[test]
    fn opacity_ramps_over_the_blend_window() {
        let pool = pool();
        let mut tile = loaded_tile(&pool);
        tile.set_loaded_now(1000);

        assert_eq!(tile.current_opacity(100, 1000), 0.0);
        assert_eq!(tile.current_opacity(100, 1050), 0.5);
        assert_eq!(tile.current_opacity(100, 1100), 1.0);
        assert_eq!(tile.current_opacity(100, 2000), 1.0);
        // Zero blend time snaps straight to opaque.
        assert_eq!(tile.current_opacity(0, 1000), 1.0);
    }

    #[test]
    fn shared_tiles_are_rebound_when_a_commit_displaces_their_record() {
        let pool = pool();
        let mut a = loaded_tile(&pool);
        let mut b = Tile::new(
            TileId::new(2, 3, 0, 0),
            "img/3/0_0".to_string(),
            Rect::new(0.0, 0.0, 1.0, 1.0),
            Rect::new(0.0, 0.0, 256.0, 256.0),
            true,
            false,
        );
        let mut evicted = Vec::new();
        b.add_cache(
            &pool,
            b.original_key().clone(),
            CacheSeed::value(raster(10)),
            true,
            false,
            &[],
            &mut evicted,
        )
        .unwrap();

        // First commit on `a` diverges it onto a derived key.
        a.set_data(&pool, raster(50), &mut evicted);
        a.update_render_target(&pool).unwrap();
        let derived = a.main_key().clone();

        // Bind `b` to the same derived record, as a rebind pass would after
        // a shared commit.
        let record = pool.get(&derived).unwrap();
        record.add_tile(b.cache_ref());
        b.rebind_cache(&derived, record);

        // The next commit on `a` displaces that record; `b` appears in the
        // affected list and is rebound to the replacement.
        a.set_data(&pool, raster(60), &mut evicted);
        let swap = a.update_render_target(&pool).unwrap();
        match swap {
            RenderSwap::Committed { key, record, affected } => {
                assert_eq!(key, derived);
                assert!(affected.contains(&b.cache_ref()));
                b.rebind_cache(&key, record.clone());
                let seen = record.data_as(DataKind::Raster, false).unwrap();
                assert_eq!(seen.as_raster().unwrap().pixels[0], 60);
            }
            other => panic!("expected a commit, got {other:?}"),
        }
    }
}
