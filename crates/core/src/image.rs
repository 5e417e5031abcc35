//! A placed pyramidal image and its per-frame tile selection
//!
//! [`TiledImage`] owns the tiles of one [`TileSource`] placement. Its
//! [`update`](TiledImage::update) walks pyramid levels from the zoom-chosen
//! target down toward the coarsest useful level, refreshes tile state,
//! queues loads by urgency, and emits the draw list for the frame in
//! painter order: coarse levels first, so finer tiles land on top.
//!
//! Level descent stops early once a level is fully covered by opaque
//! loaded tiles, which is what keeps a settled view down to one drawn
//! level per image.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use deepzoom_scheduler::{LoadPriority, LoadQueue, StampClock};

use crate::geometry::{Point, Rect};
use crate::options::CoreOptions;
use crate::source::TileSource;
use crate::tile::{ItemId, Tile, TileId, TileIndex};
use crate::view::ViewState;
use crate::world::{ImagePlan, LoadRequest};

/// Blend mode applied when compositing an image over what is already on
/// the target.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CompositeOp {
    #[default]
    SourceOver,
    SourceAtop,
    Multiply,
    Screen,
    Overlay,
    Darken,
    Lighten,
    Lighter,
    Xor,
}

impl CompositeOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SourceOver => "source-over",
            Self::SourceAtop => "source-atop",
            Self::Multiply => "multiply",
            Self::Screen => "screen",
            Self::Overlay => "overlay",
            Self::Darken => "darken",
            Self::Lighten => "lighten",
            Self::Lighter => "lighter",
            Self::Xor => "xor",
        }
    }
}

impl std::fmt::Display for CompositeOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Color {
    pub const TRANSPARENT: Color = Color::rgba(0, 0, 0, 0);
    pub const BLACK: Color = Color::rgba(0, 0, 0, 255);
    pub const WHITE: Color = Color::rgba(255, 255, 255, 255);

    pub const fn rgba(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self { r, g, b, a }
    }
}

/// Supplies crop polygons in normalized image coordinates (image width
/// spans 0..1). Re-queried every frame so the host can animate them.
pub type CropPolygonFn = Arc<dyn Fn() -> Vec<Vec<Point>> + Send + Sync>;

/// Supplies the fill painted behind not-yet-loaded regions.
pub type PlaceholderFillFn = Arc<dyn Fn() -> Color + Send + Sync>;

/// Per-image rendering options, overriding world defaults where set.
#[derive(Clone)]
pub struct TiledImageOptions {
    /// Whole-image opacity multiplied onto every tile at draw time.
    pub opacity: f64,
    pub composite: Option<CompositeOp>,
    /// Clip in viewport coordinates. Tiles are neither loaded nor drawn
    /// outside it.
    pub clip: Option<Rect>,
    pub crop_polygons: Option<CropPolygonFn>,
    pub placeholder_fill: Option<PlaceholderFillFn>,
    /// Overrides [`CoreOptions::smooth_tile_edges_min_zoom`] when set.
    pub smooth_tile_edges_min_zoom: Option<f64>,
    /// Overrides [`CoreOptions::blend_time_ms`] when set.
    pub blend_time_ms: Option<u64>,
    /// Restart the blend ramp whenever a data modification commits, not
    /// just on first load.
    pub always_blend: bool,
}

impl Default for TiledImageOptions {
    fn default() -> Self {
        Self {
            opacity: 1.0,
            composite: None,
            clip: None,
            crop_polygons: None,
            placeholder_fill: None,
            smooth_tile_edges_min_zoom: None,
            blend_time_ms: None,
            always_blend: false,
        }
    }
}

impl std::fmt::Debug for TiledImageOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TiledImageOptions")
            .field("opacity", &self.opacity)
            .field("composite", &self.composite)
            .field("clip", &self.clip)
            .field("crop_polygons", &self.crop_polygons.is_some())
            .field("placeholder_fill", &self.placeholder_fill.is_some())
            .field("smooth_tile_edges_min_zoom", &self.smooth_tile_edges_min_zoom)
            .field("blend_time_ms", &self.blend_time_ms)
            .field("always_blend", &self.always_blend)
            .finish()
    }
}

/// Which grid cells of the current walk are already fully hidden by
/// opaque content at a finer level.
#[derive(Debug, Default)]
pub struct Coverage {
    covered: HashSet<(u32, u32, u32)>,
}

impl Coverage {
    pub fn set(&mut self, level: u32, x: u32, y: u32) {
        self.covered.insert((level, x, y));
    }

    pub fn is_covered(&self, level: u32, x: u32, y: u32) -> bool {
        self.covered.contains(&(level, x, y))
    }

    /// True when all four child cells one level finer are covered.
    pub fn children_cover(&self, level: u32, x: u32, y: u32) -> bool {
        let child = level + 1;
        self.is_covered(child, 2 * x, 2 * y)
            && self.is_covered(child, 2 * x + 1, 2 * y)
            && self.is_covered(child, 2 * x, 2 * y + 1)
            && self.is_covered(child, 2 * x + 1, 2 * y + 1)
    }
}

pub struct TiledImage {
    id: ItemId,
    source: Arc<dyn TileSource>,
    /// Placement in viewport units; height follows the source aspect.
    bounds: Rect,
    rotation_deg: f64,
    flipped: bool,
    options: TiledImageOptions,
    pub(crate) tiles: HashMap<TileIndex, Tile>,
    /// Draw list of the most recent update, coarse levels first.
    pub(crate) last_drawn: Vec<TileId>,
    needs_draw: bool,
}

impl TiledImage {
    pub(crate) fn new(id: ItemId, source: Arc<dyn TileSource>, x: f64, y: f64, width: f64) -> Self {
        let (src_w, src_h) = source.dimensions();
        let height = width * src_h as f64 / src_w as f64;
        Self {
            id,
            source,
            bounds: Rect::new(x, y, width, height),
            rotation_deg: 0.0,
            flipped: false,
            options: TiledImageOptions::default(),
            tiles: HashMap::new(),
            last_drawn: Vec::new(),
            needs_draw: false,
        }
    }

    pub fn id(&self) -> ItemId {
        self.id
    }

    pub fn source(&self) -> &Arc<dyn TileSource> {
        &self.source
    }

    pub fn bounds(&self) -> Rect {
        self.bounds
    }

    /// Move and resize the placement, keeping the source aspect.
    pub fn set_placement(&mut self, x: f64, y: f64, width: f64) {
        let (src_w, src_h) = self.source.dimensions();
        let height = width * src_h as f64 / src_w as f64;
        self.bounds = Rect::new(x, y, width, height);
        self.needs_draw = true;
    }

    pub fn rotation_deg(&self) -> f64 {
        self.rotation_deg
    }

    pub fn set_rotation_deg(&mut self, degrees: f64) {
        self.rotation_deg = degrees;
        self.needs_draw = true;
    }

    pub fn flipped(&self) -> bool {
        self.flipped
    }

    pub fn set_flipped(&mut self, flipped: bool) {
        self.flipped = flipped;
        self.needs_draw = true;
    }

    pub fn options(&self) -> &TiledImageOptions {
        &self.options
    }

    pub fn options_mut(&mut self) -> &mut TiledImageOptions {
        self.needs_draw = true;
        &mut self.options
    }

    /// Placement bounds after the optional clip.
    pub fn clipped_bounds(&self) -> Rect {
        match self.options.clip {
            Some(clip) => clip.intersection(&self.bounds).unwrap_or(Rect::new(
                self.bounds.x,
                self.bounds.y,
                0.0,
                0.0,
            )),
            None => self.bounds,
        }
    }

    /// Map a rectangle in normalized image coordinates into viewport units.
    pub fn viewport_rect_of(&self, normalized: Rect) -> Rect {
        Rect::new(
            self.bounds.x + normalized.x * self.bounds.width,
            self.bounds.y + normalized.y * self.bounds.width,
            normalized.width * self.bounds.width,
            normalized.height * self.bounds.width,
        )
    }

    pub fn tile(&self, index: &TileIndex) -> Option<&Tile> {
        self.tiles.get(index)
    }

    pub fn last_drawn(&self) -> &[TileId] {
        &self.last_drawn
    }

    /// The pyramid level whose pixels best match the screen at this zoom.
    fn target_level(&self, image_zoom: f64, options: &CoreOptions) -> u32 {
        let min = self.source.min_level() as f64;
        let max = self.source.max_level() as f64;
        let ideal = max + (image_zoom / options.min_pixel_ratio).log2();
        if ideal.is_nan() {
            return self.source.max_level();
        }
        ideal.floor().clamp(min, max) as u32
    }

    /// Refresh tile state for this frame: pick levels, update blend
    /// opacity and screen rectangles, queue missing loads, and produce the
    /// coarse-first draw list.
    pub(crate) fn update(
        &mut self,
        view: &ViewState,
        world_options: &CoreOptions,
        touch: &StampClock,
        now_ms: u64,
        queue: &mut LoadQueue<LoadRequest>,
    ) -> ImagePlan {
        let mut plan = ImagePlan { item: self.id, tiles: Vec::new(), needs_draw: false };

        if self.options.opacity <= 0.0 {
            self.last_drawn.clear();
            self.needs_draw = false;
            return plan;
        }

        let visible = match view.viewport_bounds().intersection(&self.clipped_bounds()) {
            Some(rect) => rect,
            None => {
                self.last_drawn.clear();
                self.needs_draw = false;
                return plan;
            }
        };

        // Visible region in normalized image coordinates (width spans 1).
        let norm = Rect::new(
            (visible.x - self.bounds.x) / self.bounds.width,
            (visible.y - self.bounds.y) / self.bounds.width,
            visible.width / self.bounds.width,
            visible.height / self.bounds.width,
        );

        let (src_w, _) = self.source.dimensions();
        let image_zoom = view.image_zoom(self.bounds.width, src_w as f64);
        let target = self.target_level(image_zoom, world_options);
        let lowest = self.source.closest_level().min(target);
        let blend_ms = self.options.blend_time_ms.unwrap_or(world_options.blend_time_ms);
        let margin = world_options.visibility_margin_tiles as i64;

        let mut coverage = Coverage::default();
        let mut collected: Vec<(u32, Vec<TileId>)> = Vec::new();
        let mut pending_loads = false;
        let mut blending = false;

        let mut level = target;
        loop {
            let scale = self.source.level_scale(level);
            let level_width_px = src_w as f64 * scale;
            let tile_px = self.source.tile_size(level) as f64;
            let (cols, rows) = self.source.num_tiles(level);

            let x0 = ((norm.x * level_width_px / tile_px).floor() as i64 - margin).max(0) as u32;
            let y0 = ((norm.y * level_width_px / tile_px).floor() as i64 - margin).max(0) as u32;
            let x1 = (((norm.right() * level_width_px / tile_px).ceil() as i64 - 1 + margin)
                .max(0) as u32)
                .min(cols.saturating_sub(1));
            let y1 = (((norm.bottom() * level_width_px / tile_px).ceil() as i64 - 1 + margin)
                .max(0) as u32)
                .min(rows.saturating_sub(1));

            let mut level_tiles = Vec::new();
            let mut level_fully_covered = true;

            for y in y0..=y1 {
                for x in x0..=x1 {
                    let index = TileIndex::new(level, x, y);
                    let id = TileId { item: self.id, index };

                    let tile = self.tiles.entry(index).or_insert_with(|| {
                        Tile::new(
                            id,
                            self.source.tile_key(level, x, y),
                            self.source.tile_bounds(level, x, y),
                            self.source.tile_source_bounds(level, x, y),
                            self.source.tile_exists(level, x, y),
                            self.source.has_transparency(),
                        )
                    });

                    if !tile.exists() {
                        // A permanent hole never blocks coverage.
                        coverage.set(level, x, y);
                        continue;
                    }

                    tile.touch(touch.next());
                    tile.set_screen_rect(view.viewport_to_screen_rect(Rect::new(
                        self.bounds.x + tile.bounds().x * self.bounds.width,
                        self.bounds.y + tile.bounds().y * self.bounds.width,
                        tile.bounds().width * self.bounds.width,
                        tile.bounds().height * self.bounds.width,
                    )));
                    tile.set_opacity(tile.current_opacity(blend_ms, now_ms));

                    if coverage.children_cover(level, x, y) {
                        coverage.set(level, x, y);
                        continue;
                    }

                    let covers =
                        tile.loaded() && tile.opacity() >= 1.0 && !tile.has_transparency();
                    if covers {
                        coverage.set(level, x, y);
                    } else {
                        level_fully_covered = false;
                    }

                    if tile.loaded() {
                        if tile.opacity() < 1.0 {
                            blending = true;
                        }
                        level_tiles.push(id);
                    } else if !tile.loading() && !tile.failed() {
                        let priority = if level == target {
                            if tile.bounds().intersects(&norm) {
                                LoadPriority::Visible
                            } else {
                                LoadPriority::Nearby
                            }
                        } else {
                            LoadPriority::Backfill
                        };
                        let upgrade = match tile.queued_priority() {
                            None => true,
                            Some(queued) => priority > queued,
                        };
                        if upgrade {
                            queue.push(priority, LoadRequest { tile: id });
                            tile.set_queued_priority(Some(priority));
                        }
                        pending_loads = true;
                    } else if !tile.failed() {
                        pending_loads = true;
                    }
                }
            }

            collected.push((level, level_tiles));

            if level_fully_covered || level == lowest {
                break;
            }
            level -= 1;
        }

        // Painter order: coarsest collected level first.
        for (_, level_tiles) in collected.into_iter().rev() {
            plan.tiles.extend(level_tiles);
        }

        plan.needs_draw = pending_loads || blending;
        self.needs_draw = plan.needs_draw;
        self.last_drawn = plan.tiles.clone();
        plan
    }
}

impl std::fmt::Debug for TiledImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TiledImage")
            .field("id", &self.id)
            .field("bounds", &self.bounds)
            .field("tiles", &self.tiles.len())
            .field("last_drawn", &self.last_drawn.len())
            .finish()
    }
}
