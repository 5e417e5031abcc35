//! Tile data representations
//!
//! A tile's pixel data lives in exactly one representation at a time. The set
//! of representations is a closed enum; conversions between them go through
//! the [`ConversionRegistry`](crate::ConversionRegistry) rather than ad hoc
//! per-pair logic.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// The representation a payload is currently in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataKind {
    /// Compressed image bytes as delivered by the download collaborator.
    Encoded,
    /// Decoded RGBA8 pixel buffer.
    Raster,
    /// Backend-owned drawable surface.
    Surface,
}

impl fmt::Display for DataKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DataKind::Encoded => "encoded",
            DataKind::Raster => "raster",
            DataKind::Surface => "surface",
        };
        write!(f, "{}", name)
    }
}

/// Undecoded image bytes plus a format label (e.g. "png", "jpeg").
///
/// The core mandates no codec; decoding happens through whatever conversion
/// edge the embedder registers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedImage {
    pub format: String,
    pub bytes: Vec<u8>,
}

impl EncodedImage {
    pub fn new(format: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self { format: format.into(), bytes }
    }

    pub fn byte_size(&self) -> usize {
        self.bytes.len()
    }
}

/// Decoded RGBA8 pixels, row-major, 4 bytes per pixel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RasterImage {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

impl RasterImage {
    /// Wrap an existing RGBA8 buffer. The buffer length must be
    /// `width * height * 4`.
    pub fn new(width: u32, height: u32, pixels: Vec<u8>) -> Self {
        debug_assert_eq!(pixels.len(), width as usize * height as usize * 4);
        Self { width, height, pixels }
    }

    /// A solid-color raster, useful for placeholders and tests.
    pub fn filled(width: u32, height: u32, rgba: [u8; 4]) -> Self {
        let mut pixels = Vec::with_capacity(width as usize * height as usize * 4);
        for _ in 0..width as usize * height as usize {
            pixels.extend_from_slice(&rgba);
        }
        Self { width, height, pixels }
    }

    /// Size of the pixel buffer in bytes.
    pub fn byte_size(&self) -> usize {
        self.pixels.len()
    }

    /// True when every pixel has full alpha.
    pub fn is_opaque(&self) -> bool {
        self.pixels.chunks_exact(4).all(|px| px[3] == 255)
    }
}

/// A drawable surface owned by a render backend.
///
/// The core never looks inside the payload; the backend that created the
/// surface downcasts it back with [`SurfaceHandle::downcast_ref`].
#[derive(Clone)]
pub struct SurfaceHandle {
    pub width: u32,
    pub height: u32,
    payload: Arc<dyn Any + Send + Sync>,
}

impl SurfaceHandle {
    pub fn new<T: Any + Send + Sync>(width: u32, height: u32, payload: T) -> Self {
        Self { width, height, payload: Arc::new(payload) }
    }

    pub fn from_arc(width: u32, height: u32, payload: Arc<dyn Any + Send + Sync>) -> Self {
        Self { width, height, payload }
    }

    /// Downcast the backend payload to its concrete type.
    ///
    /// Returns `None` if the payload is of a different type (for example a
    /// surface created by another backend).
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.payload.downcast_ref::<T>()
    }

    /// Estimated memory footprint (RGBA at the surface's dimensions).
    pub fn byte_size(&self) -> usize {
        self.width as usize * self.height as usize * 4
    }
}

impl fmt::Debug for SurfaceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SurfaceHandle")
            .field("width", &self.width)
            .field("height", &self.height)
            .finish_non_exhaustive()
    }
}

/// One unit of tile pixel data in its current representation.
///
/// Payloads are shared: cloning a `TileData` is cheap and aliases the same
/// underlying pixels. Use [`TileData::deep_copy`] for a private copy.
#[derive(Debug, Clone)]
pub enum TileData {
    Encoded(Arc<EncodedImage>),
    Raster(Arc<RasterImage>),
    Surface(SurfaceHandle),
}

impl TileData {
    pub fn encoded(format: impl Into<String>, bytes: Vec<u8>) -> Self {
        TileData::Encoded(Arc::new(EncodedImage::new(format, bytes)))
    }

    pub fn raster(image: RasterImage) -> Self {
        TileData::Raster(Arc::new(image))
    }

    pub fn kind(&self) -> DataKind {
        match self {
            TileData::Encoded(_) => DataKind::Encoded,
            TileData::Raster(_) => DataKind::Raster,
            TileData::Surface(_) => DataKind::Surface,
        }
    }

    pub fn byte_size(&self) -> usize {
        match self {
            TileData::Encoded(image) => image.byte_size(),
            TileData::Raster(image) => image.byte_size(),
            TileData::Surface(handle) => handle.byte_size(),
        }
    }

    /// A copy that does not alias this payload.
    ///
    /// Surfaces are backend-shared by design: the handle is cloned and the
    /// backend decides deep-copy semantics through its conversion edges.
    pub fn deep_copy(&self) -> TileData {
        match self {
            TileData::Encoded(image) => TileData::Encoded(Arc::new((**image).clone())),
            TileData::Raster(image) => TileData::Raster(Arc::new((**image).clone())),
            TileData::Surface(handle) => TileData::Surface(handle.clone()),
        }
    }

    pub fn as_encoded(&self) -> Option<&Arc<EncodedImage>> {
        match self {
            TileData::Encoded(image) => Some(image),
            _ => None,
        }
    }

    pub fn as_raster(&self) -> Option<&Arc<RasterImage>> {
        match self {
            TileData::Raster(image) => Some(image),
            _ => None,
        }
    }

    pub fn as_surface(&self) -> Option<&SurfaceHandle> {
        match self {
            TileData::Surface(handle) => Some(handle),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_matches_variant() {
        assert_eq!(TileData::encoded("png", vec![1, 2, 3]).kind(), DataKind::Encoded);
        assert_eq!(TileData::raster(RasterImage::filled(2, 2, [0, 0, 0, 255])).kind(), DataKind::Raster);

        let surface = TileData::Surface(SurfaceHandle::new(4, 4, ()));
        assert_eq!(surface.kind(), DataKind::Surface);
    }

    #[test]
    fn test_byte_sizes() {
        assert_eq!(TileData::encoded("png", vec![0; 10]).byte_size(), 10);
        assert_eq!(TileData::raster(RasterImage::filled(4, 2, [0; 4])).byte_size(), 32);
        assert_eq!(TileData::Surface(SurfaceHandle::new(4, 2, ())).byte_size(), 32);
    }

    #[test]
    fn test_is_opaque() {
        assert!(RasterImage::filled(2, 2, [10, 20, 30, 255]).is_opaque());
        assert!(!RasterImage::filled(2, 2, [10, 20, 30, 254]).is_opaque());
    }

    #[test]
    fn test_clone_aliases_deep_copy_does_not() {
        let original = TileData::raster(RasterImage::filled(2, 2, [1, 2, 3, 255]));

        let alias = original.clone();
        let private = original.deep_copy();

        let original_arc = original.as_raster().unwrap();
        assert!(Arc::ptr_eq(original_arc, alias.as_raster().unwrap()));
        assert!(!Arc::ptr_eq(original_arc, private.as_raster().unwrap()));
        assert_eq!(**original_arc, **private.as_raster().unwrap());
    }

    #[test]
    fn test_surface_downcast() {
        let handle = SurfaceHandle::new(8, 8, String::from("backend data"));
        assert_eq!(handle.downcast_ref::<String>().map(String::as_str), Some("backend data"));
        assert!(handle.downcast_ref::<u32>().is_none());
    }

    #[test]
    fn test_kind_display() {
        assert_eq!(DataKind::Encoded.to_string(), "encoded");
        assert_eq!(DataKind::Raster.to_string(), "raster");
        assert_eq!(DataKind::Surface.to_string(), "surface");
    }
}
