//! Drawing surface abstraction
//!
//! The core never touches pixels itself; a [`DrawTarget`] is the boundary
//! to whatever actually rasters (a 2D canvas, a software framebuffer, a
//! test recorder). The contract mirrors a stateful 2D context: a
//! save/restore transform stack, clips that apply until the enclosing
//! restore, and alpha/composite state consumed by the draw calls.
//!
//! Coordinates are device pixels throughout. `src` rectangles address the
//! tile bitmap, `dst` rectangles the target surface.

use std::any::Any;

use deepzoom_cache::TileData;
use deepzoom_core::{Color, CompositeOp, Point, Rect};

use crate::error::DrawError;

pub trait DrawTarget {
    /// Surface extent in device pixels.
    fn size(&self) -> (f64, f64);

    /// Push the current transform, clip, and compositing state.
    fn save(&mut self);

    /// Pop back to the most recent [`save`](Self::save). Every save must be
    /// paired with exactly one restore within the frame.
    fn restore(&mut self);

    fn translate(&mut self, dx: f64, dy: f64);

    fn scale(&mut self, sx: f64, sy: f64);

    /// Rotate about the current origin, in degrees, clockwise positive.
    fn rotate(&mut self, degrees: f64);

    /// Alpha applied to subsequent draw calls.
    fn set_alpha(&mut self, alpha: f64);

    /// Blend mode applied to subsequent draw calls.
    fn set_composite(&mut self, composite: CompositeOp);

    /// Toggle interpolation for subsequent bitmap draws.
    fn set_smoothing(&mut self, enabled: bool);

    /// Intersect the current clip with `rect`.
    fn clip_rect(&mut self, rect: Rect);

    /// Intersect the current clip with the union of closed polygons.
    fn clip_polygons(&mut self, polygons: &[Vec<Point>]);

    fn fill_rect(&mut self, rect: Rect, color: Color);

    /// Reset `rect` to fully transparent pixels.
    fn clear_rect(&mut self, rect: Rect);

    /// Draw the `src` region of a tile bitmap into the `dst` region.
    fn draw_data(&mut self, data: &TileData, src: Rect, dst: Rect) -> Result<(), DrawError>;

    /// An offscreen surface compatible with this target, for sketch
    /// compositing. Blended back with [`draw_layer`](Self::draw_layer).
    fn make_layer(&self, width: f64, height: f64) -> Box<dyn DrawTarget>;

    /// Composite a layer produced by [`make_layer`](Self::make_layer):
    /// the `src` region of the layer lands on the `dst` region of this
    /// target under the given alpha and blend mode.
    fn draw_layer(
        &mut self,
        layer: Box<dyn DrawTarget>,
        src: Rect,
        dst: Rect,
        alpha: f64,
        composite: CompositeOp,
    ) -> Result<(), DrawError>;

    /// Recover the concrete target type, used by implementations to accept
    /// their own layers back.
    fn into_any(self: Box<Self>) -> Box<dyn Any>;
}
