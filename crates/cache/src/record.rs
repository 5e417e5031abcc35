//! Cache records
//!
//! A [`CacheRecord`] owns one piece of tile data plus the bookkeeping that
//! makes sharing safe: the set of tiles referencing it, per-drawer private
//! copies, a processing counter that blocks destruction mid-draw, and a
//! revision used to detect stale asynchronous writes.
//!
//! Records are created by the pool and shared as `Arc<CacheRecord>`. All
//! mutable state sits behind one mutex; the processing and revision
//! counters are atomics so drawers can touch them without locking.

use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use log::warn;

use crate::convert::ConversionRegistry;
use crate::data::{DataKind, TileData};
use crate::error::{CacheError, CacheResult};
use crate::profile::{DrawerId, RendererProfile};

/// Cache keys are plain strings so sources can build them from URLs,
/// tile coordinates, or post-processing suffixes alike.
pub type CacheKey = String;

/// Identity of a tile referencing a record. The cache never dereferences
/// these; they exist so eviction can report which tiles lost data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TileRef {
    pub item: u64,
    pub level: u32,
    pub x: u32,
    pub y: u32,
}

impl TileRef {
    pub fn new(item: u64, level: u32, x: u32, y: u32) -> Self {
        Self { item, level, x, y }
    }
}

type Producer = Box<dyn FnOnce() -> Result<TileData, String> + Send>;

/// Initial content of a record: either data in hand or a producer that
/// materializes it on first read.
pub enum CacheSeed {
    Value(TileData),
    Deferred(Producer),
}

impl CacheSeed {
    pub fn value(data: TileData) -> Self {
        Self::Value(data)
    }

    pub fn deferred<F>(producer: F) -> Self
    where
        F: FnOnce() -> Result<TileData, String> + Send + 'static,
    {
        Self::Deferred(Box::new(producer))
    }
}

impl fmt::Debug for CacheSeed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Value(data) => f.debug_tuple("Value").field(&data.kind()).finish(),
            Self::Deferred(_) => f.write_str("Deferred"),
        }
    }
}

enum RecordContent {
    Pending(Option<Producer>),
    Ready(TileData),
    Failed(String),
}

struct RecordState {
    key: CacheKey,
    content: RecordContent,
    tiles: HashSet<TileRef>,
    private: HashMap<DrawerId, Box<dyn Any + Send>>,
    destroyed: bool,
}

pub struct CacheRecord {
    state: Mutex<RecordState>,
    registry: Arc<ConversionRegistry>,
    processing: AtomicU32,
    revision: AtomicU64,
}

impl CacheRecord {
    pub(crate) fn new(key: CacheKey, registry: Arc<ConversionRegistry>, seed: CacheSeed) -> Self {
        let content = match seed {
            CacheSeed::Value(data) => RecordContent::Ready(data),
            CacheSeed::Deferred(producer) => RecordContent::Pending(Some(producer)),
        };
        Self {
            state: Mutex::new(RecordState {
                key,
                content,
                tiles: HashSet::new(),
                private: HashMap::new(),
                destroyed: false,
            }),
            registry,
            processing: AtomicU32::new(0),
            revision: AtomicU64::new(0),
        }
    }

    pub fn key(&self) -> CacheKey {
        self.state.lock().unwrap().key.clone()
    }

    /// Data is present without forcing a deferred producer.
    pub fn is_loaded(&self) -> bool {
        matches!(self.state.lock().unwrap().content, RecordContent::Ready(_))
    }

    pub fn has_failed(&self) -> bool {
        matches!(self.state.lock().unwrap().content, RecordContent::Failed(_))
    }

    /// Kind of the stored data, `None` while pending or failed.
    pub fn kind(&self) -> Option<DataKind> {
        match &self.state.lock().unwrap().content {
            RecordContent::Ready(data) => Some(data.kind()),
            _ => None,
        }
    }

    pub fn byte_size(&self) -> usize {
        match &self.state.lock().unwrap().content {
            RecordContent::Ready(data) => data.byte_size(),
            _ => 0,
        }
    }

    /// Read the data as `kind`.
    ///
    /// With `copy == false` the record converts its stored data in place
    /// when needed and hands back a shared clone; subsequent reads of the
    /// same kind are free. With `copy == true` the stored representation is
    /// left untouched and the caller gets an independent deep copy.
    ///
    /// A deferred producer is forced on first read, under the record lock;
    /// producers must not call back into the record they seed.
    pub fn data_as(&self, kind: DataKind, copy: bool) -> CacheResult<TileData> {
        let mut state = self.state.lock().unwrap();
        if state.destroyed {
            return Err(CacheError::RecordDestroyed(state.key.clone()));
        }
        let data = Self::force(&mut state)?;

        if copy {
            return self.registry.convert(data.deep_copy(), kind);
        }
        if data.kind() == kind {
            return Ok(data);
        }

        let converted = self.registry.convert(data, kind)?;
        state.content = RecordContent::Ready(converted.clone());
        Ok(converted)
    }

    /// Deep copy of the stored data in its current kind, forcing a pending
    /// producer. Used to seed derived records without fixing a target kind.
    pub fn deep_snapshot(&self) -> CacheResult<TileData> {
        let mut state = self.state.lock().unwrap();
        if state.destroyed {
            return Err(CacheError::RecordDestroyed(state.key.clone()));
        }
        Ok(Self::force(&mut state)?.deep_copy())
    }

    /// Replace the stored data. Drawer-private copies are dropped; they
    /// were built from the old data.
    pub fn set_data(&self, data: TileData) {
        let mut state = self.state.lock().unwrap();
        if state.destroyed {
            warn!("ignoring set_data on destroyed record {:?}", state.key);
            return;
        }
        state.content = RecordContent::Ready(data);
        state.private.clear();
    }

    /// Convert the stored data to something `profile` supports and build
    /// the drawer's private copy if it wants one and none exists yet.
    /// Returns the (shared) drawable data.
    pub fn prepare_for_rendering(&self, profile: &RendererProfile) -> CacheResult<TileData> {
        let mut state = self.state.lock().unwrap();
        if state.destroyed {
            return Err(CacheError::RecordDestroyed(state.key.clone()));
        }
        let data = Self::force(&mut state)?;

        let data = if profile.supported().contains(&data.kind()) {
            data
        } else {
            let converted = self.registry.convert_to_any(data, profile.supported())?;
            state.content = RecordContent::Ready(converted.clone());
            converted
        };

        if let Some(factory) = profile.private_factory() {
            if !state.private.contains_key(&profile.id()) {
                let private = factory(&data).map_err(|message| CacheError::ConverterFailed {
                    name: format!("private:{}", profile.id()),
                    message,
                })?;
                state.private.insert(profile.id(), private);
            }
        }

        Ok(data)
    }

    /// Run `f` against the drawer's private copy, if one of type `T` exists.
    pub fn with_private<T, R>(&self, drawer: DrawerId, f: impl FnOnce(&T) -> R) -> Option<R>
    where
        T: Any,
    {
        let state = self.state.lock().unwrap();
        state.private.get(&drawer).and_then(|boxed| boxed.downcast_ref::<T>()).map(f)
    }

    pub fn has_private(&self, drawer: DrawerId) -> bool {
        self.state.lock().unwrap().private.contains_key(&drawer)
    }

    /// Register `tile` as a referent. Returns the reference count after.
    pub fn add_tile(&self, tile: TileRef) -> usize {
        let mut state = self.state.lock().unwrap();
        state.tiles.insert(tile);
        state.tiles.len()
    }

    /// Drop `tile` as a referent. Returns the reference count after.
    pub fn remove_tile(&self, tile: &TileRef) -> usize {
        let mut state = self.state.lock().unwrap();
        state.tiles.remove(tile);
        state.tiles.len()
    }

    pub fn tiles(&self) -> Vec<TileRef> {
        self.state.lock().unwrap().tiles.iter().copied().collect()
    }

    pub fn tile_count(&self) -> usize {
        self.state.lock().unwrap().tiles.len()
    }

    /// Pin this record resident: a drawer is mid-draw with it, or a
    /// handler pass holds it as working data. Destruction and eviction
    /// are refused until the matching
    /// [`done_processing`](Self::done_processing).
    pub fn mark_processing(&self) {
        self.processing.fetch_add(1, Ordering::AcqRel);
    }

    pub fn done_processing(&self) {
        let result = self
            .processing
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
        if result.is_err() {
            warn!("done_processing without matching mark_processing");
        }
    }

    pub fn is_processing(&self) -> bool {
        self.processing.load(Ordering::Acquire) > 0
    }

    /// Revision of the tile content this record belongs to. Monotonic;
    /// written by the invalidation pipeline to detect stale commits.
    pub fn revision(&self) -> u64 {
        self.revision.load(Ordering::Acquire)
    }

    pub fn set_revision(&self, revision: u64) {
        self.revision.fetch_max(revision, Ordering::AcqRel);
    }

    pub fn is_destroyed(&self) -> bool {
        self.state.lock().unwrap().destroyed
    }

    /// Release the record's memory. Refused (returning `false`) while a
    /// drawer is processing it.
    pub(crate) fn destroy(&self) -> bool {
        if self.is_processing() {
            warn!("refusing to destroy record {:?} while processing", self.key());
            return false;
        }
        let mut state = self.state.lock().unwrap();
        state.destroyed = true;
        state.content = RecordContent::Failed("destroyed".to_string());
        state.private.clear();
        state.tiles.clear();
        true
    }

    pub(crate) fn clear_tiles(&self) {
        self.state.lock().unwrap().tiles.clear();
    }

    pub(crate) fn rekey(&self, key: CacheKey) {
        self.state.lock().unwrap().key = key;
    }

    /// Run a pending producer and return the (shared) ready data.
    fn force(state: &mut RecordState) -> CacheResult<TileData> {
        match &mut state.content {
            RecordContent::Ready(data) => Ok(data.clone()),
            RecordContent::Failed(message) => Err(CacheError::ProducerFailed {
                key: state.key.clone(),
                message: message.clone(),
            }),
            RecordContent::Pending(slot) => {
                // The slot is only empty within this critical section; the
                // content is rewritten before the lock drops.
                let producer = match slot.take() {
                    Some(producer) => producer,
                    None => {
                        return Err(CacheError::ProducerFailed {
                            key: state.key.clone(),
                            message: "producer missing".to_string(),
                        })
                    }
                };
                match producer() {
                    Ok(data) => {
                        state.content = RecordContent::Ready(data.clone());
                        Ok(data)
                    }
                    Err(message) => {
                        state.content = RecordContent::Failed(message.clone());
                        Err(CacheError::ProducerFailed { key: state.key.clone(), message })
                    }
                }
            }
        }
    }
}

impl fmt::Debug for CacheRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock().unwrap();
        let content = match &state.content {
            RecordContent::Pending(_) => "pending".to_string(),
            RecordContent::Ready(data) => data.kind().to_string(),
            RecordContent::Failed(_) => "failed".to_string(),
        };
        f.debug_struct("CacheRecord")
            .field("key", &state.key)
            .field("content", &content)
            .field("tiles", &state.tiles.len())
            .field("destroyed", &state.destroyed)
            .finish()
    }
}
