//! A draw target that records its operations
//!
//! Used by the drawer tests to assert on protocol shape (ordering,
//! save/restore pairing, blend parameters) without a real raster backend.
//! Layer contents are captured as nested operation lists.

use std::any::Any;

use deepzoom_cache::{DataKind, TileData};
use deepzoom_core::{Color, CompositeOp, Point, Rect};

use crate::error::DrawError;
use crate::target::DrawTarget;

/// One recorded target operation.
#[derive(Debug, Clone, PartialEq)]
pub enum DrawOp {
    Save,
    Restore,
    Translate { dx: f64, dy: f64 },
    Scale { sx: f64, sy: f64 },
    Rotate { degrees: f64 },
    SetAlpha { alpha: f64 },
    SetComposite { composite: CompositeOp },
    SetSmoothing { enabled: bool },
    ClipRect { rect: Rect },
    ClipPolygons { polygons: usize },
    FillRect { rect: Rect, color: Color },
    ClearRect { rect: Rect },
    DrawData { kind: DataKind, src: Rect, dst: Rect },
    DrawLayer { ops: Vec<DrawOp>, src: Rect, dst: Rect, alpha: f64, composite: CompositeOp },
}

pub struct RecordingTarget {
    width: f64,
    height: f64,
    ops: Vec<DrawOp>,
}

impl RecordingTarget {
    pub fn new(width: f64, height: f64) -> Self {
        Self { width, height, ops: Vec::new() }
    }

    pub fn ops(&self) -> &[DrawOp] {
        &self.ops
    }

    /// Number of bitmap draws, including those inside layers.
    pub fn draw_count(&self) -> usize {
        fn count(ops: &[DrawOp]) -> usize {
            ops.iter()
                .map(|op| match op {
                    DrawOp::DrawData { .. } => 1,
                    DrawOp::DrawLayer { ops, .. } => count(ops),
                    _ => 0,
                })
                .sum()
        }
        count(&self.ops)
    }

    /// Destination rectangles of every bitmap draw, in draw order,
    /// layers included.
    pub fn draw_rects(&self) -> Vec<Rect> {
        fn collect(ops: &[DrawOp], out: &mut Vec<Rect>) {
            for op in ops {
                match op {
                    DrawOp::DrawData { dst, .. } => out.push(*dst),
                    DrawOp::DrawLayer { ops, .. } => collect(ops, out),
                    _ => {}
                }
            }
        }
        let mut out = Vec::new();
        collect(&self.ops, &mut out);
        out
    }
}

impl DrawTarget for RecordingTarget {
    fn size(&self) -> (f64, f64) {
        (self.width, self.height)
    }

    fn save(&mut self) {
        self.ops.push(DrawOp::Save);
    }

    fn restore(&mut self) {
        self.ops.push(DrawOp::Restore);
    }

    fn translate(&mut self, dx: f64, dy: f64) {
        self.ops.push(DrawOp::Translate { dx, dy });
    }

    fn scale(&mut self, sx: f64, sy: f64) {
        self.ops.push(DrawOp::Scale { sx, sy });
    }

    fn rotate(&mut self, degrees: f64) {
        self.ops.push(DrawOp::Rotate { degrees });
    }

    fn set_alpha(&mut self, alpha: f64) {
        self.ops.push(DrawOp::SetAlpha { alpha });
    }

    fn set_composite(&mut self, composite: CompositeOp) {
        self.ops.push(DrawOp::SetComposite { composite });
    }

    fn set_smoothing(&mut self, enabled: bool) {
        self.ops.push(DrawOp::SetSmoothing { enabled });
    }

    fn clip_rect(&mut self, rect: Rect) {
        self.ops.push(DrawOp::ClipRect { rect });
    }

    fn clip_polygons(&mut self, polygons: &[Vec<Point>]) {
        self.ops.push(DrawOp::ClipPolygons { polygons: polygons.len() });
    }

    fn fill_rect(&mut self, rect: Rect, color: Color) {
        self.ops.push(DrawOp::FillRect { rect, color });
    }

    fn clear_rect(&mut self, rect: Rect) {
        self.ops.push(DrawOp::ClearRect { rect });
    }

    fn draw_data(&mut self, data: &TileData, src: Rect, dst: Rect) -> Result<(), DrawError> {
        let kind = data.kind();
        if kind == DataKind::Encoded {
            return Err(DrawError::Undrawable(kind));
        }
        self.ops.push(DrawOp::DrawData { kind, src, dst });
        Ok(())
    }

    fn make_layer(&self, width: f64, height: f64) -> Box<dyn DrawTarget> {
        Box::new(RecordingTarget::new(width, height))
    }

    fn draw_layer(
        &mut self,
        layer: Box<dyn DrawTarget>,
        src: Rect,
        dst: Rect,
        alpha: f64,
        composite: CompositeOp,
    ) -> Result<(), DrawError> {
        let layer = layer
            .into_any()
            .downcast::<RecordingTarget>()
            .map_err(|_| DrawError::ForeignLayer)?;
        self.ops.push(DrawOp::DrawLayer { ops: layer.ops, src, dst, alpha, composite });
        Ok(())
    }

    fn into_any(self: Box<Self>) -> Box<dyn Any> {
        self
    }
}
