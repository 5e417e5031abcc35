//! Deep-zoom viewer core
//!
//! The world model of a tiled image viewer: pyramidal sources, per-frame
//! tile selection with coarse-to-fine coverage, a shared tile cache, the
//! load queue, and the stamped invalidation pipeline that lets handlers
//! rewrite tile data without ever presenting stale results.
//!
//! A host drives the world in a loop: [`World::update`] plans a frame,
//! [`World::next_load`] / [`World::complete_load`] move tile data in, and
//! [`World::pump_invalidations`] advances handler passes between frames.
//! Drawing the resulting [`FramePlan`] is left to a renderer crate.

pub mod events;
pub mod geometry;
pub mod image;
pub mod invalidate;
pub mod options;
pub mod source;
pub mod tile;
pub mod view;
pub mod world;

pub use events::{ListenerFn, ListenerId, WorldEvent};
pub use geometry::{Point, Rect};
pub use image::{
    Color, CompositeOp, Coverage, CropPolygonFn, PlaceholderFillFn, TiledImage, TiledImageOptions,
};
pub use invalidate::{HandlerFlow, InvalidationCtx, InvalidationHandler, PumpStats};
pub use options::{CoreOptions, OptionsError, SubPixelRounding};
pub use source::{PyramidSource, TileSource};
pub use tile::{ItemId, RenderSwap, Tile, TileDataState, TileId, TileIndex};
pub use view::ViewState;
pub use world::{FramePlan, ImagePlan, ItemPlacement, LoadRequest, World};
