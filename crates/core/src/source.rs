//! Tile source contract
//!
//! A [`TileSource`] describes a pyramidal image: which levels exist, how
//! many tiles each level has, where each tile sits, and the cache key that
//! identifies its pixel content. Format adapters (DZI, IIIF, custom
//! backends) implement this; the core only consumes it.
//!
//! Levels are numbered coarse to fine: `max_level()` is full resolution and
//! each step down halves the dimensions.

use deepzoom_cache::CacheKey;

use crate::geometry::Rect;

pub trait TileSource: Send + Sync {
    /// Content size in source pixels at full resolution.
    fn dimensions(&self) -> (u64, u64);

    fn min_level(&self) -> u32;

    fn max_level(&self) -> u32;

    /// The finest level whose whole content fits in a single tile.
    ///
    /// Tiles at or below this level are cheap to keep resident; the
    /// invalidation pass never evicts them.
    fn closest_level(&self) -> u32;

    /// Columns and rows of the tile grid at `level`.
    fn num_tiles(&self, level: u32) -> (u32, u32);

    /// Tile edge length in level pixels.
    fn tile_size(&self, level: u32) -> u32;

    /// Tile rectangle normalized so the full image spans width 1.
    fn tile_bounds(&self, level: u32, x: u32, y: u32) -> Rect;

    /// Pixel rectangle within the tile's own bitmap to sample when drawing.
    /// Edge tiles are narrower than the nominal tile size.
    fn tile_source_bounds(&self, level: u32, x: u32, y: u32) -> Rect;

    fn tile_exists(&self, level: u32, x: u32, y: u32) -> bool;

    /// Whether produced tiles may carry alpha.
    fn has_transparency(&self) -> bool;

    /// Stable cache identity for a tile. Equal keys mean intentionally
    /// shared pixel content.
    fn tile_key(&self, level: u32, x: u32, y: u32) -> CacheKey;

    /// Scale of `level` relative to full resolution (`1.0` at `max_level`,
    /// halving per level down).
    fn level_scale(&self, level: u32) -> f64 {
        f64::powi(2.0, level as i32 - self.max_level() as i32)
    }
}

/// The standard power-of-two pyramid over a plain `width x height` image.
#[derive(Debug, Clone)]
pub struct PyramidSource {
    name: String,
    width: u64,
    height: u64,
    tile_size: u32,
    max_level: u32,
    transparent: bool,
}

impl PyramidSource {
    /// `name` prefixes every cache key, so two sources with different names
    /// never share records.
    pub fn new(name: impl Into<String>, width: u64, height: u64, tile_size: u32) -> Self {
        debug_assert!(width > 0 && height > 0 && tile_size > 0);
        let longest = width.max(height);
        let mut max_level = 0;
        while (1u64 << max_level) < longest {
            max_level += 1;
        }
        Self { name: name.into(), width, height, tile_size, max_level, transparent: false }
    }

    pub fn with_transparency(mut self, transparent: bool) -> Self {
        self.transparent = transparent;
        self
    }

    /// Level dimensions in level pixels.
    fn level_dimensions(&self, level: u32) -> (u64, u64) {
        let shift = self.max_level - level.min(self.max_level);
        (ceil_shift(self.width, shift), ceil_shift(self.height, shift))
    }
}

fn ceil_shift(value: u64, shift: u32) -> u64 {
    let divisor = 1u64 << shift;
    value.div_ceil(divisor)
}

fn ceil_div(value: u64, divisor: u64) -> u64 {
    value.div_ceil(divisor)
}

impl TileSource for PyramidSource {
    fn dimensions(&self) -> (u64, u64) {
        (self.width, self.height)
    }

    fn min_level(&self) -> u32 {
        0
    }

    fn max_level(&self) -> u32 {
        self.max_level
    }

    fn closest_level(&self) -> u32 {
        let mut level = self.min_level();
        while level < self.max_level {
            let (cols, rows) = self.num_tiles(level + 1);
            if cols > 1 || rows > 1 {
                break;
            }
            level += 1;
        }
        level
    }

    fn num_tiles(&self, level: u32) -> (u32, u32) {
        let (lw, lh) = self.level_dimensions(level);
        let ts = self.tile_size as u64;
        (ceil_div(lw, ts) as u32, ceil_div(lh, ts) as u32)
    }

    fn tile_size(&self, _level: u32) -> u32 {
        self.tile_size
    }

    fn tile_bounds(&self, level: u32, x: u32, y: u32) -> Rect {
        // Tile span in full-resolution pixels.
        let shift = self.max_level - level.min(self.max_level);
        let span = (self.tile_size as u64) << shift;
        let x0 = (x as u64 * span).min(self.width);
        let y0 = (y as u64 * span).min(self.height);
        let x1 = ((x as u64 + 1) * span).min(self.width);
        let y1 = ((y as u64 + 1) * span).min(self.height);

        let w = self.width as f64;
        Rect::new(
            x0 as f64 / w,
            y0 as f64 / w,
            (x1 - x0) as f64 / w,
            (y1 - y0) as f64 / w,
        )
    }

    fn tile_source_bounds(&self, level: u32, x: u32, y: u32) -> Rect {
        let (lw, lh) = self.level_dimensions(level);
        let ts = self.tile_size as u64;
        let width = (lw - (x as u64 * ts).min(lw)).min(ts);
        let height = (lh - (y as u64 * ts).min(lh)).min(ts);
        Rect::new(0.0, 0.0, width as f64, height as f64)
    }

    fn tile_exists(&self, level: u32, x: u32, y: u32) -> bool {
        if level > self.max_level {
            return false;
        }
        let (cols, rows) = self.num_tiles(level);
        x < cols && y < rows
    }

    fn has_transparency(&self) -> bool {
        self.transparent
    }

    fn tile_key(&self, level: u32, x: u32, y: u32) -> CacheKey {
        format!("{}/{}/{}_{}", self.name, level, x, y)
    }
}
