//! World-level tuning options with JSON persistence
//!
//! [`CoreOptions`] collects the knobs that apply across every image in a
//! [`World`](crate::world::World). Per-image overrides live in
//! [`TiledImageOptions`](crate::image::TiledImageOptions). Options persist
//! as a versioned JSON envelope so older files still load after fields are
//! added.

use std::path::Path;

use deepzoom_cache::CacheConfig;
use serde::{Deserialize, Serialize};

const OPTIONS_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, thiserror::Error)]
pub enum OptionsError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("options file written by a newer schema (version {0})")]
    UnsupportedVersion(u32),
}

/// When drawers snap tile rectangles to whole pixels.
///
/// Snapping hides hairline seams between tiles but makes motion judder, so
/// the usual compromise is [`OnlyAtRest`](Self::OnlyAtRest).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubPixelRounding {
    Always,
    OnlyAtRest,
    #[default]
    Never,
}

fn default_max_cache_entries() -> usize {
    CacheConfig::DEFAULT_MAX_ENTRIES
}

fn default_min_pixel_ratio() -> f64 {
    0.5
}

fn default_smooth_min_zoom() -> f64 {
    f64::INFINITY
}

fn default_allow_edge_smoothing() -> bool {
    true
}

fn default_visibility_margin_tiles() -> u32 {
    1
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoreOptions {
    /// Bound on resident cache records across all images.
    #[serde(default = "default_max_cache_entries")]
    pub max_cache_entries: usize,
    /// Milliseconds a freshly loaded tile fades in over. Zero disables
    /// blending entirely.
    #[serde(default)]
    pub blend_time_ms: u64,
    /// Lowest screen-pixels-per-tile-pixel ratio before the planner climbs
    /// to a finer level. Lower values pick coarser levels.
    #[serde(default = "default_min_pixel_ratio")]
    pub min_pixel_ratio: f64,
    /// Image zoom above which tile edges get the seam-hiding treatment.
    /// Infinity (the default) turns it off.
    #[serde(default = "default_smooth_min_zoom", with = "finite_or_null")]
    pub smooth_tile_edges_min_zoom: f64,
    #[serde(default)]
    pub sub_pixel_rounding: SubPixelRounding,
    #[serde(default = "default_allow_edge_smoothing")]
    pub allow_edge_smoothing: bool,
    /// Extra rings of tiles loaded beyond the strictly visible set.
    #[serde(default = "default_visibility_margin_tiles")]
    pub visibility_margin_tiles: u32,
}

impl Default for CoreOptions {
    fn default() -> Self {
        Self {
            max_cache_entries: default_max_cache_entries(),
            blend_time_ms: 0,
            min_pixel_ratio: default_min_pixel_ratio(),
            smooth_tile_edges_min_zoom: default_smooth_min_zoom(),
            sub_pixel_rounding: SubPixelRounding::default(),
            allow_edge_smoothing: default_allow_edge_smoothing(),
            visibility_margin_tiles: default_visibility_margin_tiles(),
        }
    }
}

impl CoreOptions {
    pub fn with_max_cache_entries(mut self, max_cache_entries: usize) -> Self {
        self.max_cache_entries = max_cache_entries;
        self
    }

    pub fn with_blend_time_ms(mut self, blend_time_ms: u64) -> Self {
        self.blend_time_ms = blend_time_ms;
        self
    }

    pub fn with_min_pixel_ratio(mut self, min_pixel_ratio: f64) -> Self {
        self.min_pixel_ratio = min_pixel_ratio;
        self
    }

    pub fn with_smooth_tile_edges_min_zoom(mut self, min_zoom: f64) -> Self {
        self.smooth_tile_edges_min_zoom = min_zoom;
        self
    }

    pub fn with_sub_pixel_rounding(mut self, rounding: SubPixelRounding) -> Self {
        self.sub_pixel_rounding = rounding;
        self
    }

    pub fn with_allow_edge_smoothing(mut self, allow: bool) -> Self {
        self.allow_edge_smoothing = allow;
        self
    }

    pub fn with_visibility_margin_tiles(mut self, tiles: u32) -> Self {
        self.visibility_margin_tiles = tiles;
        self
    }

    /// Load options saved by [`save_to`](Self::save_to), or defaults when
    /// the file does not exist.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, OptionsError> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }

        let bytes = std::fs::read(path)?;
        let envelope: OptionsEnvelope = serde_json::from_slice(&bytes)?;
        if envelope.version > OPTIONS_SCHEMA_VERSION {
            return Err(OptionsError::UnsupportedVersion(envelope.version));
        }
        Ok(envelope.options)
    }

    pub fn save_to(&self, path: impl AsRef<Path>) -> Result<(), OptionsError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let envelope =
            OptionsEnvelope { version: OPTIONS_SCHEMA_VERSION, options: self.clone() };
        let bytes = serde_json::to_vec_pretty(&envelope)?;
        std::fs::write(path, bytes)?;
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct OptionsEnvelope {
    #[serde(default)]
    version: u32,
    #[serde(default)]
    options: CoreOptions,
}

/// JSON has no infinity, so a non-finite zoom threshold serializes as
/// `null` and reads back as "off".
mod finite_or_null {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
        if value.is_finite() {
            serializer.serialize_some(value)
        } else {
            serializer.serialize_none()
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
        Ok(Option::<f64>::deserialize(deserializer)?.unwrap_or(f64::INFINITY))
    }
}
