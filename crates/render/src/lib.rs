//! Frame drawing for deep-zoom worlds
//!
//! Turns the frame plans produced by `deepzoom-core` into draw calls
//! against an abstract 2D [`DrawTarget`]. [`CanvasDrawer`] implements the
//! compositing rules: painter-order tile draws, offscreen sketch layers
//! for translucent and composited images, tile edge smoothing at high
//! zoom, and sub-pixel rounding policies. [`RecordingTarget`] captures the
//! emitted operations for inspection.

pub mod canvas;
pub mod drawer;
pub mod error;
pub mod recording;
pub mod rounding;
pub mod target;

pub use canvas::{CanvasDrawer, DrawerConfig, SketchPlan};
pub use drawer::{DrawHooks, Drawer, TileAction};
pub use error::DrawError;
pub use recording::{DrawOp, RecordingTarget};
pub use target::DrawTarget;
