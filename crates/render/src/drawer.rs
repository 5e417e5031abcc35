//! Renderer contract

use deepzoom_cache::RendererProfile;
use deepzoom_core::{FramePlan, Tile, TiledImage, ViewState, World};

use crate::error::DrawError;
use crate::target::DrawTarget;

/// What a [`DrawHooks::tile_drawing`] observer decided for one tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TileAction {
    Draw,
    Skip,
}

/// Frame observers, consulted around each tile draw.
///
/// Hooks see tiles in draw order. A `Skip` from any hook suppresses the
/// tile for this frame only; the tile stays loaded and planned.
pub trait DrawHooks: Send + Sync {
    /// Veto point before a tile's pixels reach the surface.
    fn tile_drawing(&self, _image: &TiledImage, _tile: &Tile) -> TileAction {
        TileAction::Draw
    }

    /// The tile's pixels reached the surface.
    fn tile_drawn(&self, _image: &TiledImage, _tile: &Tile) {}
}

/// Draws planned frames onto a target.
///
/// A drawer holds no reference into the world; it is handed the current
/// plan and item state every frame.
pub trait Drawer {
    /// Data formats this drawer consumes, in preference order. The cache
    /// layer prepares records against this profile.
    fn profile(&self) -> &RendererProfile;

    /// Draw one planned frame.
    fn draw(
        &self,
        world: &World,
        plan: &FramePlan,
        view: &ViewState,
        target: &mut dyn DrawTarget,
    ) -> Result<(), DrawError>;
}
