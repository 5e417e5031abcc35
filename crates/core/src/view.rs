//! Viewport state
//!
//! Everything the frame planner needs to know about the camera, collected
//! in one plain value the embedding application owns and mutates.
//!
//! Coordinates follow the usual deep-zoom convention: world layout happens
//! in viewport units where an image placed with width `w` spans `w` units,
//! and a zoom of `z` shows `1 / z` units across the container. The
//! container size is in logical pixels; `dpr` carries the device pixel
//! ratio, so screen-space output is in physical pixels.

use crate::geometry::{Point, Rect};

#[derive(Debug, Clone, PartialEq)]
pub struct ViewState {
    /// Container size in logical pixels.
    pub container: (f64, f64),
    /// Look-at point in viewport units.
    pub center: Point,
    pub zoom: f64,
    pub rotation_deg: f64,
    /// Device pixel ratio of the output surface.
    pub dpr: f64,
    /// True while a pan or zoom animation is in flight. Drawers use this
    /// to relax pixel snapping.
    pub animating: bool,
}

impl ViewState {
    pub fn new(container_width: f64, container_height: f64) -> Self {
        let aspect = container_height / container_width;
        Self {
            container: (container_width, container_height),
            center: Point::new(0.5, 0.5 * aspect),
            zoom: 1.0,
            rotation_deg: 0.0,
            dpr: 1.0,
            animating: false,
        }
    }

    pub fn with_zoom(mut self, zoom: f64) -> Self {
        self.zoom = zoom;
        self
    }

    pub fn with_center(mut self, center: Point) -> Self {
        self.center = center;
        self
    }

    pub fn with_dpr(mut self, dpr: f64) -> Self {
        self.dpr = dpr;
        self
    }

    pub fn with_animating(mut self, animating: bool) -> Self {
        self.animating = animating;
        self
    }

    /// Visible region in viewport units.
    pub fn viewport_bounds(&self) -> Rect {
        let width = 1.0 / self.zoom;
        let height = width * self.container.1 / self.container.0;
        Rect::new(self.center.x - width / 2.0, self.center.y - height / 2.0, width, height)
    }

    /// Physical pixels per viewport unit.
    pub fn screen_scale(&self) -> f64 {
        self.container.0 * self.zoom * self.dpr
    }

    pub fn viewport_to_screen_point(&self, point: Point) -> Point {
        let bounds = self.viewport_bounds();
        (point - bounds.top_left()) * self.screen_scale()
    }

    pub fn viewport_to_screen_rect(&self, rect: Rect) -> Rect {
        let bounds = self.viewport_bounds();
        let scale = self.screen_scale();
        Rect::new(
            (rect.x - bounds.x) * scale,
            (rect.y - bounds.y) * scale,
            rect.width * scale,
            rect.height * scale,
        )
    }

    /// Screen pixels per source pixel for an image of `source_px_width`
    /// pixels placed `placement_width` viewport units wide. A value of 1
    /// means the source is shown 1:1.
    pub fn image_zoom(&self, placement_width: f64, source_px_width: f64) -> f64 {
        placement_width * self.screen_scale() / source_px_width
    }
}
