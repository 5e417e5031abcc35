//! Sub-pixel rounding of tile destination rectangles
//!
//! Some raster backends produce visible seams when adjacent tiles land on
//! fractional pixel positions. The policy is pluggable because the
//! underlying behavior differs per backend: round every frame, round only
//! when the viewport is at rest, or leave coordinates untouched.

use deepzoom_core::{Rect, SubPixelRounding};

/// Apply `policy` to a tile's destination rectangle.
///
/// Edges are rounded independently, so rectangles that abut before
/// rounding still abut after it.
pub fn apply(policy: SubPixelRounding, rect: Rect, animating: bool) -> Rect {
    let round = match policy {
        SubPixelRounding::Always => true,
        SubPixelRounding::OnlyAtRest => !animating,
        SubPixelRounding::Never => false,
    };
    if !round {
        return rect;
    }
    let left = rect.x.round();
    let top = rect.y.round();
    Rect::new(left, top, rect.right().round() - left, rect.bottom().round() - top)
}
