//! Conversion registry
//!
//! Conversions between data representations are declared as directed edges
//! (source kind, target kind, function) on a registry instance handed to the
//! cache at construction. No global registration exists; embedders build a
//! registry, add the edges their backends need, and share it via `Arc`.
//!
//! A requested conversion is resolved by breadth-first search: the shortest
//! path by hop count wins, and among equal-length paths the one using
//! earlier-registered edges wins. Determinism is chosen over speed; the
//! graphs are tiny.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use crate::data::{DataKind, TileData};
use crate::error::CacheError;

/// A conversion function. On failure, returns a message that the registry
/// wraps with the edge's name.
pub type Converter = Arc<dyn Fn(TileData) -> Result<TileData, String> + Send + Sync>;

struct Edge {
    from: DataKind,
    to: DataKind,
    name: String,
    convert: Converter,
}

/// Directed graph of registered conversions.
#[derive(Default)]
pub struct ConversionRegistry {
    edges: Vec<Edge>,
}

impl ConversionRegistry {
    pub fn new() -> Self {
        Self { edges: Vec::new() }
    }

    /// Register a conversion edge. Registration order is significant: it is
    /// the tie-break among equal-length paths.
    pub fn register<F>(&mut self, from: DataKind, to: DataKind, name: impl Into<String>, convert: F)
    where
        F: Fn(TileData) -> Result<TileData, String> + Send + Sync + 'static,
    {
        self.edges.push(Edge { from, to, name: name.into(), convert: Arc::new(convert) });
    }

    /// Number of registered edges.
    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    /// Whether `from` can reach `to` (trivially true when equal).
    pub fn can_convert(&self, from: DataKind, to: DataKind) -> bool {
        self.path(from, to).is_some()
    }

    /// The first target in `targets` reachable from `from`, if any.
    ///
    /// Used by the write-time guard that keeps undrawable data out of a
    /// tile's main cache.
    pub fn first_reachable(&self, from: DataKind, targets: &[DataKind]) -> Option<DataKind> {
        targets.iter().copied().find(|&target| self.can_convert(from, target))
    }

    /// Shortest conversion path as a sequence of edge indices. Empty when
    /// `from == to`; `None` when unreachable.
    fn path(&self, from: DataKind, to: DataKind) -> Option<Vec<usize>> {
        if from == to {
            return Some(Vec::new());
        }

        // Kind -> index of the edge that first reached it. First reach is
        // both shortest and earliest-registered because expansion follows
        // registration order.
        let mut reached_by: HashMap<DataKind, usize> = HashMap::new();
        let mut frontier = VecDeque::new();
        frontier.push_back(from);

        while let Some(current) = frontier.pop_front() {
            for (index, edge) in self.edges.iter().enumerate() {
                if edge.from != current || edge.to == from || reached_by.contains_key(&edge.to) {
                    continue;
                }
                reached_by.insert(edge.to, index);
                if edge.to == to {
                    return Some(self.reconstruct(from, to, &reached_by));
                }
                frontier.push_back(edge.to);
            }
        }

        None
    }

    fn reconstruct(&self, from: DataKind, to: DataKind, reached_by: &HashMap<DataKind, usize>) -> Vec<usize> {
        let mut path = Vec::new();
        let mut cursor = to;
        while cursor != from {
            let index = reached_by[&cursor];
            path.push(index);
            cursor = self.edges[index].from;
        }
        path.reverse();
        path
    }

    /// Convert `data` to `to`, running the shortest registered path.
    pub fn convert(&self, data: TileData, to: DataKind) -> Result<TileData, CacheError> {
        let from = data.kind();
        match self.path(from, to) {
            Some(path) => self.run_path(data, &path),
            None => Err(CacheError::ConversionUnavailable { from, to }),
        }
    }

    /// Convert `data` to whichever of `targets` is cheapest to reach.
    ///
    /// Strictly shorter paths win; among equal lengths the earlier entry in
    /// `targets` wins, so a renderer's preference order is honored.
    pub fn convert_to_any(&self, data: TileData, targets: &[DataKind]) -> Result<TileData, CacheError> {
        let from = data.kind();

        let mut best: Option<Vec<usize>> = None;
        for &target in targets {
            if let Some(path) = self.path(from, target) {
                let better = match &best {
                    Some(current) => path.len() < current.len(),
                    None => true,
                };
                if better {
                    if path.is_empty() {
                        return Ok(data);
                    }
                    best = Some(path);
                }
            }
        }

        match best {
            Some(path) => self.run_path(data, &path),
            None => Err(CacheError::NoSupportedFormat { from, targets: targets.to_vec() }),
        }
    }

    fn run_path(&self, mut data: TileData, path: &[usize]) -> Result<TileData, CacheError> {
        for &index in path {
            let edge = &self.edges[index];
            data = (edge.convert)(data).map_err(|message| CacheError::ConverterFailed {
                name: edge.name.clone(),
                message,
            })?;
            debug_assert_eq!(data.kind(), edge.to, "converter {} produced the wrong kind", edge.name);
        }
        Ok(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{RasterImage, SurfaceHandle};
    use std::sync::Arc as StdArc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Raster <-> Surface edges backed by a plain raster payload.
    fn raster_surface_edges(registry: &mut ConversionRegistry) {
        registry.register(DataKind::Raster, DataKind::Surface, "raster-to-surface", |data| {
            let raster = data.as_raster().ok_or("expected raster input")?.clone();
            Ok(TileData::Surface(SurfaceHandle::new(raster.width, raster.height, raster)))
        });
        registry.register(DataKind::Surface, DataKind::Raster, "surface-to-raster", |data| {
            let handle = data.as_surface().ok_or("expected surface input")?;
            let raster = handle
                .downcast_ref::<StdArc<RasterImage>>()
                .ok_or("surface not raster-backed")?;
            Ok(TileData::Raster(raster.clone()))
        });
    }

    #[test]
    fn test_identity_needs_no_edges() {
        let registry = ConversionRegistry::new();
        let data = TileData::raster(RasterImage::filled(2, 2, [0, 0, 0, 255]));

        assert!(registry.can_convert(DataKind::Raster, DataKind::Raster));
        let out = registry.convert(data, DataKind::Raster).unwrap();
        assert_eq!(out.kind(), DataKind::Raster);
    }

    #[test]
    fn test_single_edge() {
        let mut registry = ConversionRegistry::new();
        raster_surface_edges(&mut registry);

        let data = TileData::raster(RasterImage::filled(3, 3, [9, 9, 9, 255]));
        let surface = registry.convert(data, DataKind::Surface).unwrap();
        assert_eq!(surface.kind(), DataKind::Surface);

        let back = registry.convert(surface, DataKind::Raster).unwrap();
        assert_eq!(back.as_raster().unwrap().width, 3);
    }

    #[test]
    fn test_unreachable_kind_fails() {
        let mut registry = ConversionRegistry::new();
        raster_surface_edges(&mut registry);

        let data = TileData::raster(RasterImage::filled(1, 1, [0; 4]));
        let err = registry.convert(data, DataKind::Encoded).unwrap_err();
        assert!(matches!(
            err,
            CacheError::ConversionUnavailable { from: DataKind::Raster, to: DataKind::Encoded }
        ));
    }

    #[test]
    fn test_multi_hop_path() {
        let mut registry = ConversionRegistry::new();
        // Encoded -> Raster -> Surface, no direct Encoded -> Surface edge.
        registry.register(DataKind::Encoded, DataKind::Raster, "decode", |data| {
            let encoded = data.as_encoded().ok_or("expected encoded input")?;
            let side = encoded.bytes.len() as u32;
            Ok(TileData::raster(RasterImage::filled(side, 1, [0, 0, 0, 255])))
        });
        raster_surface_edges(&mut registry);

        let data = TileData::encoded("raw", vec![1, 2, 3, 4]);
        let surface = registry.convert(data, DataKind::Surface).unwrap();
        assert_eq!(surface.as_surface().unwrap().width, 4);
    }

    #[test]
    fn test_shortest_path_beats_registration_order() {
        // A two-hop route registered first must lose to a one-hop route
        // registered later.
        let mut registry = ConversionRegistry::new();
        registry.register(DataKind::Encoded, DataKind::Raster, "decode", |_| {
            Ok(TileData::raster(RasterImage::filled(1, 1, [0; 4])))
        });
        registry.register(DataKind::Raster, DataKind::Surface, "upload", |_| {
            Ok(TileData::Surface(SurfaceHandle::new(1, 1, "two-hop")))
        });
        registry.register(DataKind::Encoded, DataKind::Surface, "direct", |_| {
            Ok(TileData::Surface(SurfaceHandle::new(1, 1, "one-hop")))
        });

        let out = registry.convert(TileData::encoded("raw", vec![0]), DataKind::Surface).unwrap();
        let marker = out.as_surface().unwrap().downcast_ref::<&str>().unwrap();
        assert_eq!(*marker, "one-hop");
    }

    #[test]
    fn test_equal_length_tie_breaks_by_registration_order() {
        let hits = StdArc::new(AtomicUsize::new(0));

        let mut registry = ConversionRegistry::new();
        let first_hits = hits.clone();
        registry.register(DataKind::Raster, DataKind::Surface, "first", move |_| {
            first_hits.fetch_add(1, Ordering::SeqCst);
            Ok(TileData::Surface(SurfaceHandle::new(1, 1, ())))
        });
        registry.register(DataKind::Raster, DataKind::Surface, "second", |_| {
            Err("the earlier edge should have been chosen".to_string())
        });

        let data = TileData::raster(RasterImage::filled(1, 1, [0; 4]));
        registry.convert(data, DataKind::Surface).unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_convert_to_any_prefers_shorter_then_target_order() {
        let mut registry = ConversionRegistry::new();
        registry.register(DataKind::Encoded, DataKind::Raster, "decode", |_| {
            Ok(TileData::raster(RasterImage::filled(1, 1, [0; 4])))
        });
        registry.register(DataKind::Raster, DataKind::Surface, "upload", |_| {
            Ok(TileData::Surface(SurfaceHandle::new(1, 1, ())))
        });

        // Surface listed first but two hops away; Raster one hop wins.
        let data = TileData::encoded("raw", vec![0]);
        let out = registry
            .convert_to_any(data, &[DataKind::Surface, DataKind::Raster])
            .unwrap();
        assert_eq!(out.kind(), DataKind::Raster);

        // Already-supported data comes back untouched.
        let raster = TileData::raster(RasterImage::filled(1, 1, [0; 4]));
        let out = registry
            .convert_to_any(raster, &[DataKind::Surface, DataKind::Raster])
            .unwrap();
        assert_eq!(out.kind(), DataKind::Raster);
    }

    #[test]
    fn test_convert_to_any_unreachable() {
        let registry = ConversionRegistry::new();
        let data = TileData::encoded("raw", vec![0]);
        let err = registry
            .convert_to_any(data, &[DataKind::Raster, DataKind::Surface])
            .unwrap_err();
        assert!(matches!(err, CacheError::NoSupportedFormat { from: DataKind::Encoded, .. }));
    }

    #[test]
    fn test_converter_failure_is_named() {
        let mut registry = ConversionRegistry::new();
        registry.register(DataKind::Encoded, DataKind::Raster, "decode", |_| {
            Err("corrupt header".to_string())
        });

        let err = registry.convert(TileData::encoded("raw", vec![0]), DataKind::Raster).unwrap_err();
        match err {
            CacheError::ConverterFailed { name, message } => {
                assert_eq!(name, "decode");
                assert_eq!(message, "corrupt header");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_first_reachable() {
        let mut registry = ConversionRegistry::new();
        raster_surface_edges(&mut registry);

        assert_eq!(
            registry.first_reachable(DataKind::Raster, &[DataKind::Encoded, DataKind::Surface]),
            Some(DataKind::Surface)
        );
        assert_eq!(registry.first_reachable(DataKind::Encoded, &[DataKind::Surface]), None);
    }

    #[test]
    fn test_png_round_trip_via_image_crate() {
        use image::codecs::png::PngEncoder;
        use image::ImageEncoder;

        let mut registry = ConversionRegistry::new();
        registry.register(DataKind::Encoded, DataKind::Raster, "png-decode", |data| {
            let encoded = data.as_encoded().ok_or("expected encoded input")?;
            let decoded = image::load_from_memory(&encoded.bytes).map_err(|e| e.to_string())?;
            let rgba = decoded.to_rgba8();
            let (width, height) = rgba.dimensions();
            Ok(TileData::raster(RasterImage::new(width, height, rgba.into_raw())))
        });
        registry.register(DataKind::Raster, DataKind::Encoded, "png-encode", |data| {
            let raster = data.as_raster().ok_or("expected raster input")?;
            let mut bytes = Vec::new();
            PngEncoder::new(&mut bytes)
                .write_image(&raster.pixels, raster.width, raster.height, image::ExtendedColorType::Rgba8)
                .map_err(|e| e.to_string())?;
            Ok(TileData::encoded("png", bytes))
        });

        let original = RasterImage::filled(5, 3, [200, 100, 50, 255]);
        let encoded = registry
            .convert(TileData::raster(original.clone()), DataKind::Encoded)
            .unwrap();
        assert_eq!(encoded.as_encoded().unwrap().format, "png");

        let decoded = registry.convert(encoded, DataKind::Raster).unwrap();
        assert_eq!(**decoded.as_raster().unwrap(), original);
    }
}
