//! Canvas-style draw orchestration
//!
//! One [`CanvasDrawer::draw`] call turns a [`FramePlan`] into target
//! operations. Most of the logic is the per-image route decision: tiles
//! are either drawn straight onto the main surface, or composited on an
//! offscreen sketch layer first and blended back in a single draw. The
//! sketch route exists because per-tile alpha blending onto the main
//! surface double-blends overlapping tile edges; it is taken for
//! translucent images, non-default composite modes, transparent images
//! above other content, and for edge smoothing at high zoom.
//!
//! Transform state on the target is strictly scoped: every save is paired
//! with a restore on all paths, including error paths, so one image's
//! rotation or clip never leaks into the next.

use std::sync::Arc;

use log::{debug, warn};

use deepzoom_cache::RendererProfile;
use deepzoom_core::{
    CoreOptions, FramePlan, ImagePlan, Point, Rect, SubPixelRounding, Tile, TiledImage, ViewState,
    World,
};

use crate::drawer::{DrawHooks, Drawer, TileAction};
use crate::error::DrawError;
use crate::rounding;
use crate::target::DrawTarget;

/// Static drawing policy, fixed for the drawer's lifetime.
#[derive(Debug, Clone)]
pub struct DrawerConfig {
    pub sub_pixel_rounding: SubPixelRounding,
    pub allow_edge_smoothing: bool,
    /// World-wide edge smoothing threshold; a per-image option overrides it.
    pub smooth_tile_edges_min_zoom: f64,
}

impl DrawerConfig {
    pub fn from_options(options: &CoreOptions) -> Self {
        Self {
            sub_pixel_rounding: options.sub_pixel_rounding,
            allow_edge_smoothing: options.allow_edge_smoothing,
            smooth_tile_edges_min_zoom: options.smooth_tile_edges_min_zoom,
        }
    }
}

impl Default for DrawerConfig {
    fn default() -> Self {
        Self::from_options(&CoreOptions::default())
    }
}

/// The compositing route for one image this frame.
#[derive(Debug, Clone, PartialEq)]
pub struct SketchPlan {
    /// Composite tiles on an offscreen layer, then blend the layer once.
    pub use_sketch: bool,
    /// Scale applied to tile rectangles on the layer. Present only on the
    /// edge smoothing path.
    pub scale: Option<f64>,
    /// Whole-pixel snap offset paired with `scale`.
    pub translate: Option<Point>,
}

impl SketchPlan {
    pub fn direct() -> Self {
        Self { use_sketch: false, scale: None, translate: None }
    }

    /// Decide the route for one image.
    ///
    /// Edge smoothing requires more than one tile, an image zoom above the
    /// configured threshold, and zero net rotation; it forces the sketch
    /// route so tiles can be composited near their native resolution and
    /// upscaled in one interpolated draw, instead of each tile rounding
    /// its edges independently.
    pub fn decide(
        config: &DrawerConfig,
        image: &TiledImage,
        tiles: &[&Tile],
        image_zoom: f64,
        bottom_layer: bool,
    ) -> Self {
        let options = image.options();
        let transparency = tiles.iter().any(|tile| tile.has_transparency());
        let mut use_sketch = options.opacity < 1.0
            || options.composite.is_some()
            || (!bottom_layer && transparency);

        let smooth_min = options
            .smooth_tile_edges_min_zoom
            .unwrap_or(config.smooth_tile_edges_min_zoom);
        let mut scale = None;
        let mut translate = None;
        if config.allow_edge_smoothing
            && tiles.len() > 1
            && image_zoom > smooth_min
            && image.rotation_deg() % 360.0 == 0.0
        {
            use_sketch = true;
            let (s, t) = edge_smoothing_transform(tiles);
            scale = Some(s);
            translate = Some(t);
        }

        SketchPlan { use_sketch, scale, translate }
    }
}

/// Scale factor and snap offset that land tiles near their native
/// resolution and on whole layer pixels. The ratio comes from the finest
/// drawn tile, the one whose edges are visible at high zoom.
fn edge_smoothing_transform(tiles: &[&Tile]) -> (f64, Point) {
    let finest = tiles[tiles.len() - 1];
    let drawn = finest.screen_rect().width;
    let native = finest.source_bounds().width;
    let mut scale = if drawn > 0.0 { native / drawn } else { 1.0 };
    if !scale.is_finite() || scale <= 0.0 {
        scale = 1.0;
    }
    scale = scale.min(1.0);

    // Keep the offset strictly positive; a tile drawn at a negative layer
    // coordinate would be cropped before the blend back.
    let origin = finest.screen_rect();
    let translate = Point::new(
        1.0 - (origin.x * scale).rem_euclid(1.0),
        1.0 - (origin.y * scale).rem_euclid(1.0),
    );
    (scale, translate)
}

fn image_point_to_screen(image: &TiledImage, view: &ViewState, point: Point) -> Point {
    let bounds = image.bounds();
    let viewport = Point::new(bounds.x + point.x * bounds.width, bounds.y + point.y * bounds.width);
    view.viewport_to_screen_point(viewport)
}

/// Draws frames through the [`DrawTarget`] contract of a 2D canvas.
pub struct CanvasDrawer {
    profile: RendererProfile,
    config: DrawerConfig,
    hooks: Vec<Arc<dyn DrawHooks>>,
}

impl CanvasDrawer {
    /// `profile` should be the same profile the world was built with, so
    /// records prepared during loading match what this drawer reads.
    pub fn new(profile: RendererProfile, config: DrawerConfig) -> Self {
        Self { profile, config, hooks: Vec::new() }
    }

    pub fn config(&self) -> &DrawerConfig {
        &self.config
    }

    /// Register frame observers. Hooks run in registration order.
    pub fn add_hooks(&mut self, hooks: Arc<dyn DrawHooks>) {
        self.hooks.push(hooks);
    }

    fn draw_image(
        &self,
        world: &World,
        image: &TiledImage,
        plan: &ImagePlan,
        view: &ViewState,
        target: &mut dyn DrawTarget,
    ) -> Result<(), DrawError> {
        let tiles: Vec<&Tile> = plan
            .tiles
            .iter()
            .filter_map(|id| image.tile(&id.index))
            .filter(|tile| tile.loaded() && tile.record().is_some())
            .collect();
        if tiles.is_empty() && image.options().placeholder_fill.is_none() {
            return Ok(());
        }

        let bottom_layer = world.index_of(image.id()) == Some(0);
        let image_zoom =
            view.image_zoom(image.bounds().width, image.source().dimensions().0 as f64);
        let sketch = SketchPlan::decide(&self.config, image, &tiles, image_zoom, bottom_layer);

        target.save();
        let result = self.draw_content(world, image, &tiles, view, target, &sketch);
        target.restore();
        result
    }

    fn draw_content(
        &self,
        world: &World,
        image: &TiledImage,
        tiles: &[&Tile],
        view: &ViewState,
        target: &mut dyn DrawTarget,
        sketch: &SketchPlan,
    ) -> Result<(), DrawError> {
        let options = image.options();
        let opacity = options.opacity;

        if image.rotation_deg() % 360.0 != 0.0 {
            let pivot = view.viewport_to_screen_point(image.clipped_bounds().center());
            target.translate(pivot.x, pivot.y);
            target.rotate(image.rotation_deg());
            target.translate(-pivot.x, -pivot.y);
        }

        // Clips apply before any tile draw in this scope.
        if let Some(clip) = options.clip {
            target.clip_rect(view.viewport_to_screen_rect(clip));
        }
        if let Some(crop) = options.crop_polygons.clone() {
            let polygons: Vec<Vec<Point>> = crop()
                .into_iter()
                .map(|ring| {
                    ring.into_iter()
                        .map(|point| image_point_to_screen(image, view, point))
                        .collect()
                })
                .collect();
            if !polygons.is_empty() {
                target.clip_polygons(&polygons);
            }
        }

        if let Some(fill) = options.placeholder_fill.clone() {
            let has_opaque =
                tiles.iter().any(|tile| !tile.has_transparency() && tile.opacity() >= 1.0);
            if !has_opaque {
                target.fill_rect(view.viewport_to_screen_rect(image.clipped_bounds()), fill());
            }
        }

        if tiles.is_empty() {
            return Ok(());
        }

        if sketch.use_sketch {
            let (width, height) = target.size();
            let mut layer = target.make_layer(width, height);
            if sketch.scale.is_some() {
                // Tiles land pixel-exact on the layer; interpolation
                // happens once, in the blend below.
                layer.set_smoothing(false);
            }
            self.draw_tiles(world, image, tiles, view, layer.as_mut(), sketch, 1.0)?;

            let scale = sketch.scale.unwrap_or(1.0);
            let translate = sketch.translate.unwrap_or_else(|| Point::new(0.0, 0.0));
            let full = Rect::new(0.0, 0.0, width, height);
            // Backends reject blend rectangles that leave the surface.
            let src = Rect::new(translate.x, translate.y, width * scale, height * scale)
                .intersection(&full)
                .unwrap_or(full);
            let dst = src
                .translated(-translate.x, -translate.y)
                .scaled(1.0 / scale)
                .intersection(&full)
                .unwrap_or(full);
            target.draw_layer(layer, src, dst, opacity, options.composite.unwrap_or_default())?;
        } else {
            self.draw_tiles(world, image, tiles, view, target, sketch, opacity)?;
        }
        Ok(())
    }

    fn draw_tiles(
        &self,
        world: &World,
        image: &TiledImage,
        tiles: &[&Tile],
        view: &ViewState,
        surface: &mut dyn DrawTarget,
        sketch: &SketchPlan,
        alpha_base: f64,
    ) -> Result<(), DrawError> {
        let pool = world.cache();
        for tile in tiles {
            if self.hooks.iter().any(|hooks| hooks.tile_drawing(image, tile) == TileAction::Skip)
            {
                continue;
            }
            let Some(record) = tile.record() else {
                continue;
            };
            let data = match record.prepare_for_rendering(&self.profile) {
                Ok(data) => data,
                Err(err) => {
                    debug!("tile {:?} not drawable this frame: {err}", tile.id());
                    continue;
                }
            };

            let mut rect = rounding::apply(
                self.config.sub_pixel_rounding,
                tile.screen_rect(),
                view.animating,
            );
            if let (Some(scale), Some(translate)) = (sketch.scale, sketch.translate) {
                rect = rect.scaled(scale).translated(translate.x, translate.y);
            }

            surface.save();
            surface.set_alpha(alpha_base * tile.opacity());
            if tile.has_transparency() && alpha_base >= 1.0 {
                // Stale pixels must not show through transparent regions
                // when the tile is drawn without a separate blend pass.
                surface.clear_rect(rect);
            }
            if image.flipped() {
                let center_x = rect.center().x;
                surface.translate(center_x, 0.0);
                surface.scale(-1.0, 1.0);
                surface.translate(-center_x, 0.0);
            }
            let drawn = surface.draw_data(&data, tile.source_bounds(), rect);
            surface.restore();
            drawn?;

            pool.mark_used(tile.main_key());
            for hooks in &self.hooks {
                hooks.tile_drawn(image, tile);
            }
        }
        Ok(())
    }
}

impl Drawer for CanvasDrawer {
    fn profile(&self) -> &RendererProfile {
        &self.profile
    }

    /// One image failing mid-draw is logged and skipped; the rest of the
    /// frame still draws.
    fn draw(
        &self,
        world: &World,
        plan: &FramePlan,
        view: &ViewState,
        target: &mut dyn DrawTarget,
    ) -> Result<(), DrawError> {
        for image_plan in &plan.images {
            let Some(image) = world.item(image_plan.item) else {
                continue;
            };
            if image.options().opacity <= 0.0 {
                continue;
            }
            if let Err(err) = self.draw_image(world, image, image_plan, view, target) {
                warn!("item {}: draw failed this frame: {err}", image_plan.item);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recording::{DrawOp, RecordingTarget};
    use deepzoom_cache::{ConversionRegistry, DataKind, RasterImage, TileData};
    use deepzoom_core::{Color, CompositeOp, PyramidSource, TileId, TileSource};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn profile() -> RendererProfile {
        RendererProfile::new(vec![DataKind::Raster])
    }

    fn world_and_drawer() -> (World, CanvasDrawer) {
        let profile = profile();
        let world = World::new(
            CoreOptions::default(),
            Arc::new(ConversionRegistry::new()),
            profile.clone(),
        );
        let drawer = CanvasDrawer::new(profile, DrawerConfig::default());
        (world, drawer)
    }

    fn small_source(name: &str) -> Arc<dyn TileSource> {
        Arc::new(PyramidSource::new(name, 512, 512, 256))
    }

    fn raster() -> TileData {
        TileData::raster(RasterImage::filled(4, 4, [9, 9, 9, 255]))
    }

    fn load_everything(world: &mut World, view: &ViewState) {
        world.update(view, 0);
        while let Some(id) = world.next_load() {
            world.complete_load(id, Ok(raster()), 0);
        }
    }

    fn planned_tiles<'a>(image: &'a TiledImage, plan: &ImagePlan) -> Vec<&'a Tile> {
        plan.tiles.iter().filter_map(|id| image.tile(&id.index)).collect()
    }

    fn count(ops: &[DrawOp], matcher: fn(&DrawOp) -> bool) -> usize {
        ops.iter().filter(|op| matcher(op)).count()
    }

    #[test]
    fn test_translucent_image_takes_the_sketch_route() {
        let (mut world, drawer) = world_and_drawer();
        let item = world.add_item(small_source("a"));
        let view = ViewState::new(512.0, 512.0);
        load_everything(&mut world, &view);
        world.item_mut(item).unwrap().options_mut().opacity = 0.5;

        let plan = world.update(&view, 0);
        let image = world.item(item).unwrap();
        let tiles = planned_tiles(image, &plan.images[0]);

        let sketch = SketchPlan::decide(drawer.config(), image, &tiles, 1.0, true);
        assert!(sketch.use_sketch);
        assert_eq!(sketch.scale, None);
        assert_eq!(sketch.translate, None);
    }

    #[test]
    fn test_edge_smoothing_forces_a_scaled_sketch() {
        let (mut world, _) = world_and_drawer();
        let item = world.add_item(small_source("a"));
        let view = ViewState::new(512.0, 512.0);
        load_everything(&mut world, &view);

        let plan = world.update(&view, 0);
        let image = world.item(item).unwrap();
        let tiles = planned_tiles(image, &plan.images[0]);
        assert!(tiles.len() > 1);

        let config = DrawerConfig { smooth_tile_edges_min_zoom: 0.5, ..DrawerConfig::default() };
        let sketch = SketchPlan::decide(&config, image, &tiles, 1.0, true);
        assert!(sketch.use_sketch);
        assert!(sketch.scale.is_some());
        assert!(sketch.translate.is_some());
    }

    #[test]
    fn test_plain_bottom_image_draws_direct() {
        let (mut world, drawer) = world_and_drawer();
        let item = world.add_item(small_source("a"));
        let view = ViewState::new(512.0, 512.0);
        load_everything(&mut world, &view);

        let plan = world.update(&view, 0);
        let image = world.item(item).unwrap();
        let tiles = planned_tiles(image, &plan.images[0]);

        let sketch = SketchPlan::decide(drawer.config(), image, &tiles, 1.0, true);
        assert_eq!(sketch, SketchPlan::direct());
    }

    #[test]
    fn test_transparency_above_other_content_needs_a_sketch() {
        let (mut world, drawer) = world_and_drawer();
        world.add_item(small_source("base"));
        let top = world.add_item(Arc::new(
            PyramidSource::new("overlay", 512, 512, 256).with_transparency(true),
        ));
        let view = ViewState::new(512.0, 512.0);
        load_everything(&mut world, &view);

        let plan = world.update(&view, 0);
        let image = world.item(top).unwrap();
        let tiles = planned_tiles(image, &plan.images[1]);
        assert!(tiles.iter().all(|tile| tile.has_transparency()));

        let over = SketchPlan::decide(drawer.config(), image, &tiles, 1.0, false);
        assert!(over.use_sketch);
        let alone = SketchPlan::decide(drawer.config(), image, &tiles, 1.0, true);
        assert!(!alone.use_sketch);
    }

    #[test]
    fn test_frames_draw_coarse_first_with_balanced_state() {
        let (mut world, drawer) = world_and_drawer();
        let item = world.add_item(small_source("a"));
        let view = ViewState::new(512.0, 512.0);

        // Hold one finest-level tile back so a coarser level stays in the plan.
        world.update(&view, 0);
        let mut pending = Vec::new();
        while let Some(id) = world.next_load() {
            pending.push(id);
        }
        let held = TileId::new(item, 9, 1, 1);
        for id in pending {
            if id != held {
                world.complete_load(id, Ok(raster()), 0);
            }
        }

        let plan = world.update(&view, 0);
        let mut target = RecordingTarget::new(512.0, 512.0);
        drawer.draw(&world, &plan, &view, &mut target).unwrap();

        let rects = target.draw_rects();
        assert_eq!(rects.len(), 4);
        assert!(rects[0].width > rects[1].width, "coarse level must paint first");
        assert_eq!(
            count(target.ops(), |op| matches!(op, DrawOp::Save)),
            count(target.ops(), |op| matches!(op, DrawOp::Restore)),
        );
    }

    #[test]
    fn test_clips_precede_tile_draws() {
        let (mut world, drawer) = world_and_drawer();
        let item = world.add_item(small_source("a"));
        let view = ViewState::new(512.0, 512.0);
        load_everything(&mut world, &view);
        {
            let options = world.item_mut(item).unwrap().options_mut();
            options.clip = Some(Rect::new(0.0, 0.0, 0.5, 0.5));
            options.crop_polygons = Some(Arc::new(|| {
                vec![vec![
                    Point::new(0.0, 0.0),
                    Point::new(1.0, 0.0),
                    Point::new(0.5, 1.0),
                ]]
            }));
        }

        let plan = world.update(&view, 0);
        let mut target = RecordingTarget::new(512.0, 512.0);
        drawer.draw(&world, &plan, &view, &mut target).unwrap();

        let ops = target.ops();
        let clip = ops.iter().position(|op| matches!(op, DrawOp::ClipRect { .. })).unwrap();
        let crop = ops
            .iter()
            .position(|op| matches!(op, DrawOp::ClipPolygons { polygons: 1 }))
            .unwrap();
        let first_draw = ops.iter().position(|op| matches!(op, DrawOp::DrawData { .. })).unwrap();
        assert!(clip < first_draw);
        assert!(crop < first_draw);
    }

    #[test]
    fn test_placeholder_fills_until_tiles_land() {
        let (mut world, drawer) = world_and_drawer();
        let item = world.add_item(small_source("a"));
        world.item_mut(item).unwrap().options_mut().placeholder_fill =
            Some(Arc::new(|| Color::rgba(32, 32, 32, 255)));
        let view = ViewState::new(512.0, 512.0);

        let plan = world.update(&view, 0);
        let mut target = RecordingTarget::new(512.0, 512.0);
        drawer.draw(&world, &plan, &view, &mut target).unwrap();
        assert_eq!(count(target.ops(), |op| matches!(op, DrawOp::FillRect { .. })), 1);
        assert_eq!(target.draw_count(), 0);

        load_everything(&mut world, &view);
        let plan = world.update(&view, 0);
        let mut target = RecordingTarget::new(512.0, 512.0);
        drawer.draw(&world, &plan, &view, &mut target).unwrap();
        assert_eq!(count(target.ops(), |op| matches!(op, DrawOp::FillRect { .. })), 0);
        assert!(target.draw_count() > 0);
    }

    struct SkipColumnZero {
        drawn: AtomicUsize,
    }

    impl DrawHooks for SkipColumnZero {
        fn tile_drawing(&self, _image: &TiledImage, tile: &Tile) -> TileAction {
            if tile.id().index.x == 0 {
                TileAction::Skip
            } else {
                TileAction::Draw
            }
        }

        fn tile_drawn(&self, _image: &TiledImage, _tile: &Tile) {
            self.drawn.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[test]
    fn test_hooks_veto_and_observe_tiles() {
        let (mut world, mut drawer) = world_and_drawer();
        world.add_item(small_source("a"));
        let hooks = Arc::new(SkipColumnZero { drawn: AtomicUsize::new(0) });
        drawer.add_hooks(hooks.clone());
        let view = ViewState::new(512.0, 512.0);
        load_everything(&mut world, &view);

        let plan = world.update(&view, 0);
        assert_eq!(plan.images[0].tiles.len(), 4);
        let mut target = RecordingTarget::new(512.0, 512.0);
        drawer.draw(&world, &plan, &view, &mut target).unwrap();

        assert_eq!(target.draw_count(), 2);
        assert_eq!(hooks.drawn.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn test_sketch_blend_carries_opacity_and_composite() {
        let (mut world, drawer) = world_and_drawer();
        let item = world.add_item(small_source("a"));
        let view = ViewState::new(512.0, 512.0);
        load_everything(&mut world, &view);
        {
            let options = world.item_mut(item).unwrap().options_mut();
            options.opacity = 0.5;
            options.composite = Some(CompositeOp::Multiply);
        }

        let plan = world.update(&view, 0);
        let mut target = RecordingTarget::new(512.0, 512.0);
        drawer.draw(&world, &plan, &view, &mut target).unwrap();

        let blend = target
            .ops()
            .iter()
            .find_map(|op| match op {
                DrawOp::DrawLayer { ops, src, alpha, composite, .. } => {
                    Some((ops.clone(), *src, *alpha, *composite))
                }
                _ => None,
            })
            .expect("the frame must end in a layer blend");
        let (ops, src, alpha, composite) = blend;
        assert_eq!(alpha, 0.5);
        assert_eq!(composite, CompositeOp::Multiply);
        assert_eq!(src, Rect::new(0.0, 0.0, 512.0, 512.0));
        assert_eq!(count(&ops, |op| matches!(op, DrawOp::DrawData { .. })), 4);
        // Tiles composite at full alpha; the image opacity applies once.
        assert!(ops.iter().any(|op| matches!(op, DrawOp::SetAlpha { alpha } if *alpha == 1.0)));
    }

    #[test]
    fn test_edge_smoothing_scales_tiles_and_blend_rect() {
        let (mut world, drawer) = world_and_drawer();
        let item = world.add_item(small_source("a"));
        let view = ViewState::new(512.0, 512.0);
        load_everything(&mut world, &view);
        world.item_mut(item).unwrap().options_mut().smooth_tile_edges_min_zoom = Some(0.5);

        let plan = world.update(&view, 0);
        let mut target = RecordingTarget::new(512.0, 512.0);
        drawer.draw(&world, &plan, &view, &mut target).unwrap();

        let blend = target
            .ops()
            .iter()
            .find_map(|op| match op {
                DrawOp::DrawLayer { ops, src, dst, .. } => Some((ops.clone(), *src, *dst)),
                _ => None,
            })
            .expect("edge smoothing must route through a layer");
        let (ops, src, dst) = blend;
        // Native and drawn resolution agree at 100% zoom, so the scale is
        // 1 and only the whole-pixel snap offsets the rectangles.
        assert_eq!(src, Rect::new(1.0, 1.0, 511.0, 511.0));
        assert_eq!(dst, Rect::new(0.0, 0.0, 511.0, 511.0));
        assert!(matches!(ops[0], DrawOp::SetSmoothing { enabled: false }));
        assert_eq!(target.draw_rects()[0], Rect::new(1.0, 1.0, 256.0, 256.0));
    }

    #[test]
    fn test_undrawable_tiles_are_skipped_without_failing_the_frame() {
        let (mut world, drawer) = world_and_drawer();
        world.add_item(small_source("a"));
        let view = ViewState::new(512.0, 512.0);
        world.update(&view, 0);
        while let Some(id) = world.next_load() {
            // No conversion edge can turn encoded bytes into raster data.
            world.complete_load(id, Ok(TileData::encoded("png", vec![1, 2, 3])), 0);
        }

        let plan = world.update(&view, 0);
        assert!(!plan.images[0].tiles.is_empty());
        let mut target = RecordingTarget::new(512.0, 512.0);
        drawer.draw(&world, &plan, &view, &mut target).unwrap();
        assert_eq!(target.draw_count(), 0);
    }
}
