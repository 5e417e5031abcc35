//! Shared tile cache pool
//!
//! One pool instance backs every image in a viewer. Records are keyed by
//! string, bounded in number, and evicted least-recently-used. A record
//! whose last tile unloads without freeing becomes a zombie: it keeps its
//! data and sits in a reclaim queue so an immediately re-requested tile can
//! revive it instead of refetching. Zombies are the first to go under
//! memory pressure, oldest first, and records currently used by a drawer
//! are never destroyed.
//!
//! The pool cannot reach into tiles, so eviction hands back
//! [`EvictedTiles`] notices naming the tiles that just lost data; the
//! caller resets them.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use log::{debug, warn};

use crate::convert::ConversionRegistry;
use crate::error::{CacheError, CacheResult};
use crate::record::{CacheKey, CacheRecord, CacheSeed, TileRef};

#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Upper bound on resident records, live and zombie together.
    pub max_entries: usize,
}

impl CacheConfig {
    pub const DEFAULT_MAX_ENTRIES: usize = 200;

    pub fn with_max_entries(max_entries: usize) -> Self {
        Self { max_entries }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { max_entries: Self::DEFAULT_MAX_ENTRIES }
    }
}

/// Counters for diagnostics overlays and tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub records: usize,
    pub zombies: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub revived: u64,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let lookups = self.hits + self.misses;
        if lookups == 0 {
            0.0
        } else {
            self.hits as f64 / lookups as f64
        }
    }
}

/// Eviction notice: the record under `key` was destroyed while these tiles
/// still referenced it.
#[derive(Debug, Clone)]
pub struct EvictedTiles {
    pub key: CacheKey,
    pub tiles: Vec<TileRef>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnloadOutcome {
    /// Last reference gone, record destroyed.
    Destroyed,
    /// Last reference gone, record parked for possible revival.
    Zombie,
    /// Other tiles still reference the record.
    StillShared,
    /// No record under that key.
    Missing,
}

struct PoolState {
    /// Live and zombie records together.
    records: HashMap<CacheKey, Arc<CacheRecord>>,
    /// Live keys, front = coldest.
    lru: VecDeque<CacheKey>,
    /// Zombie keys, front = oldest.
    zombies: VecDeque<CacheKey>,
    max_entries: usize,
    hits: u64,
    misses: u64,
    evictions: u64,
    revived: u64,
}

impl PoolState {
    fn touch(&mut self, key: &CacheKey) {
        remove_key(&mut self.lru, key);
        self.lru.push_back(key.clone());
    }

    fn forget(&mut self, key: &CacheKey) {
        remove_key(&mut self.lru, key);
        remove_key(&mut self.zombies, key);
    }

    fn is_zombie(&self, key: &CacheKey) -> bool {
        self.zombies.iter().any(|k| k == key)
    }
}

fn remove_key(queue: &mut VecDeque<CacheKey>, key: &CacheKey) {
    if let Some(position) = queue.iter().position(|k| k == key) {
        queue.remove(position);
    }
}

/// Handle to the shared pool. Clones share state.
#[derive(Clone)]
pub struct TileCache {
    state: Arc<Mutex<PoolState>>,
    registry: Arc<ConversionRegistry>,
}

impl TileCache {
    pub fn new(config: CacheConfig, registry: Arc<ConversionRegistry>) -> Self {
        Self {
            state: Arc::new(Mutex::new(PoolState {
                records: HashMap::new(),
                lru: VecDeque::new(),
                zombies: VecDeque::new(),
                max_entries: config.max_entries,
                hits: 0,
                misses: 0,
                evictions: 0,
                revived: 0,
            })),
            registry,
        }
    }

    pub fn registry(&self) -> &Arc<ConversionRegistry> {
        &self.registry
    }

    /// Attach `tile` to the record under `key`, creating it from `seed` if
    /// absent. An existing record keeps its data and the seed is dropped;
    /// a zombie under that key is revived. Inserting may evict, and the
    /// just-touched key is never the victim.
    pub fn cache_tile(
        &self,
        key: CacheKey,
        seed: CacheSeed,
        tile: TileRef,
    ) -> (Arc<CacheRecord>, Vec<EvictedTiles>) {
        let mut state = self.state.lock().unwrap();

        if let Some(record) = state.records.get(&key).cloned() {
            if state.is_zombie(&key) {
                remove_key(&mut state.zombies, &key);
                state.lru.push_back(key.clone());
                state.revived += 1;
            } else {
                state.touch(&key);
            }
            record.add_tile(tile);
            return (record, Vec::new());
        }

        let record = Arc::new(CacheRecord::new(key.clone(), self.registry.clone(), seed));
        record.add_tile(tile);
        state.records.insert(key.clone(), record.clone());
        state.lru.push_back(key.clone());

        let evicted = Self::enforce_bound(&mut state, Some(&key));
        (record, evicted)
    }

    /// Look up a live record, updating recency and hit counters. Zombies
    /// are invisible here; only [`cache_tile`](Self::cache_tile) revives.
    pub fn get(&self, key: &CacheKey) -> Option<Arc<CacheRecord>> {
        let mut state = self.state.lock().unwrap();
        if !state.is_zombie(key) {
            if let Some(record) = state.records.get(key).cloned() {
                state.hits += 1;
                state.touch(key);
                return Some(record);
            }
        }
        state.misses += 1;
        None
    }

    /// Look up a live record without touching recency or counters.
    pub fn peek(&self, key: &CacheKey) -> Option<Arc<CacheRecord>> {
        let state = self.state.lock().unwrap();
        if state.is_zombie(key) {
            return None;
        }
        state.records.get(key).cloned()
    }

    pub fn contains(&self, key: &CacheKey) -> bool {
        let state = self.state.lock().unwrap();
        !state.is_zombie(key) && state.records.contains_key(key)
    }

    pub fn mark_used(&self, key: &CacheKey) {
        let mut state = self.state.lock().unwrap();
        if !state.is_zombie(key) && state.records.contains_key(key) {
            state.touch(key);
        }
    }

    /// Detach `tile` from the record under `key`. When the last reference
    /// goes, the record is destroyed (`free_if_unused`) or parked as a
    /// zombie. Parked zombies are reclaimed lazily on the next insert.
    pub fn unload_tile(&self, key: &CacheKey, tile: &TileRef, free_if_unused: bool) -> UnloadOutcome {
        let mut state = self.state.lock().unwrap();

        let record = match state.records.get(key) {
            Some(record) if !state.is_zombie(key) => record.clone(),
            _ => {
                debug!("unload of unknown cache key {key:?}");
                return UnloadOutcome::Missing;
            }
        };

        if record.remove_tile(tile) > 0 {
            return UnloadOutcome::StillShared;
        }

        if free_if_unused && !record.is_processing() {
            state.records.remove(key);
            state.forget(key);
            record.destroy();
            return UnloadOutcome::Destroyed;
        }

        // A processing record cannot be freed yet; park it so pressure can
        // reclaim it once the drawer finishes.
        remove_key(&mut state.lru, key);
        state.zombies.push_back(key.clone());
        UnloadOutcome::Zombie
    }

    /// Put `seed` under `key` unconditionally, attaching `tiles`. Any
    /// record previously under the key is destroyed.
    pub fn inject(&self, key: CacheKey, seed: CacheSeed, tiles: &[TileRef]) -> Arc<CacheRecord> {
        let mut state = self.state.lock().unwrap();

        if let Some(displaced) = state.records.remove(&key) {
            state.forget(&key);
            displaced.clear_tiles();
            // A refused destroy only delays memory release until the
            // drawer drops its Arc.
            displaced.destroy();
        }

        let record = Arc::new(CacheRecord::new(key.clone(), self.registry.clone(), seed));
        for tile in tiles {
            record.add_tile(*tile);
        }
        state.records.insert(key.clone(), record.clone());
        state.lru.push_back(key);
        record
    }

    /// Move the record under `victim_key` to `consumer_key`, replacing and
    /// destroying whatever was there. Tiles of the replaced record transfer
    /// to the moved one. This is the swap step that promotes a finished
    /// working cache to a tile's main key without copying pixels.
    pub fn consume(&self, victim_key: &CacheKey, consumer_key: CacheKey) -> CacheResult<Arc<CacheRecord>> {
        let mut state = self.state.lock().unwrap();

        let victim = state
            .records
            .remove(victim_key)
            .ok_or_else(|| CacheError::MissingCache(victim_key.clone()))?;
        state.forget(victim_key);
        victim.rekey(consumer_key.clone());

        if let Some(displaced) = state.records.remove(&consumer_key) {
            state.forget(&consumer_key);
            for tile in displaced.tiles() {
                victim.add_tile(tile);
            }
            displaced.clear_tiles();
            displaced.destroy();
        }

        state.records.insert(consumer_key.clone(), victim.clone());
        state.lru.push_back(consumer_key);
        Ok(victim)
    }

    /// Destroy every record not currently processing. Processing records
    /// stay resident and keep their list position.
    pub fn clear(&self) {
        let mut state = self.state.lock().unwrap();

        let keys: Vec<CacheKey> = state.records.keys().cloned().collect();
        for key in keys {
            let processing = state.records.get(&key).is_some_and(|r| r.is_processing());
            if processing {
                warn!("cache clear keeping record {key:?} while processing");
                continue;
            }
            if let Some(record) = state.records.remove(&key) {
                state.forget(&key);
                record.clear_tiles();
                record.destroy();
            }
        }
    }

    /// Change the bound, evicting immediately if shrinking.
    pub fn set_max_entries(&self, max_entries: usize) -> Vec<EvictedTiles> {
        let mut state = self.state.lock().unwrap();
        state.max_entries = max_entries;
        Self::enforce_bound(&mut state, None)
    }

    pub fn stats(&self) -> CacheStats {
        let state = self.state.lock().unwrap();
        CacheStats {
            records: state.lru.len(),
            zombies: state.zombies.len(),
            hits: state.hits,
            misses: state.misses,
            evictions: state.evictions,
            revived: state.revived,
        }
    }

    pub fn num_records(&self) -> usize {
        self.state.lock().unwrap().lru.len()
    }

    pub fn num_zombies(&self) -> usize {
        self.state.lock().unwrap().zombies.len()
    }

    /// Zombies first (oldest first), then coldest live records. Skips
    /// `protect` and anything processing; the bound may be temporarily
    /// exceeded when everything resident is protected.
    fn enforce_bound(state: &mut PoolState, protect: Option<&CacheKey>) -> Vec<EvictedTiles> {
        let mut evicted = Vec::new();

        while state.records.len() > state.max_entries {
            if let Some(position) = state
                .zombies
                .iter()
                .position(|key| state.records.get(key).is_some_and(|r| !r.is_processing()))
            {
                let key = state.zombies.remove(position).unwrap_or_default();
                if let Some(record) = state.records.remove(&key) {
                    record.destroy();
                    state.evictions += 1;
                }
                continue;
            }

            let victim = state.lru.iter().position(|key| {
                Some(key) != protect
                    && state.records.get(key).is_some_and(|r| !r.is_processing())
            });
            let Some(position) = victim else {
                break;
            };

            let key = state.lru.remove(position).unwrap_or_default();
            if let Some(record) = state.records.remove(&key) {
                let tiles = record.tiles();
                record.clear_tiles();
                record.destroy();
                state.evictions += 1;
                evicted.push(EvictedTiles { key, tiles });
            }
        }

        evicted
    }
}

impl std::fmt::Debug for TileCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let stats = self.stats();
        f.debug_struct("TileCache")
            .field("records", &stats.records)
            .field("zombies", &stats.zombies)
            .field("max_entries", &self.state.lock().unwrap().max_entries)
            .finish()
    }
}
