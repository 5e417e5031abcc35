//! Deep-zoom tile data cache
//!
//! Reference-counted cache of tile pixel data shared across tiles and
//! renderers, with pluggable conversion between data representations and
//! LRU eviction with zombie retention.

pub mod convert;
pub mod data;
pub mod error;
pub mod pool;
pub mod profile;
pub mod record;

pub use convert::{ConversionRegistry, Converter};
pub use data::{DataKind, EncodedImage, RasterImage, SurfaceHandle, TileData};
pub use error::{CacheError, CacheResult};
pub use pool::{CacheConfig, CacheStats, EvictedTiles, TileCache, UnloadOutcome};
pub use profile::{DrawerId, PrivateCacheFn, RendererProfile};
pub use record::{CacheKey, CacheRecord, CacheSeed, TileRef};
