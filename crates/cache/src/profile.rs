//! Renderer profiles
//!
//! A drawer announces which data kinds it consumes and, optionally, a
//! factory for a private per-record copy (a GPU texture handle, a scaled
//! bitmap). Records keep one private copy per drawer id and drop them all
//! whenever the underlying data changes.

use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::data::{DataKind, TileData};

static NEXT_DRAWER_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of a drawer instance. Keys private copies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DrawerId(u64);

impl DrawerId {
    pub fn next() -> Self {
        Self(NEXT_DRAWER_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for DrawerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "drawer-{}", self.0)
    }
}

/// Builds a drawer-private value from shared tile data.
pub type PrivateCacheFn = Arc<dyn Fn(&TileData) -> Result<Box<dyn Any + Send>, String> + Send + Sync>;

/// What a drawer can consume and how it wants records prepared.
#[derive(Clone)]
pub struct RendererProfile {
    id: DrawerId,
    supported: Vec<DataKind>,
    create_private: Option<PrivateCacheFn>,
}

impl RendererProfile {
    /// `supported` is the drawer's preference order, most preferred first.
    /// An empty list is allowed; every preparation then fails gracefully.
    pub fn new(supported: Vec<DataKind>) -> Self {
        Self { id: DrawerId::next(), supported, create_private: None }
    }

    /// Attach a private-copy factory. Records prepared for this profile get
    /// one lazily built private value per record, invalidated on data change.
    pub fn with_private_cache<F>(mut self, create: F) -> Self
    where
        F: Fn(&TileData) -> Result<Box<dyn Any + Send>, String> + Send + Sync + 'static,
    {
        self.create_private = Some(Arc::new(create));
        self
    }

    pub fn id(&self) -> DrawerId {
        self.id
    }

    pub fn supported(&self) -> &[DataKind] {
        &self.supported
    }

    pub fn uses_private_cache(&self) -> bool {
        self.create_private.is_some()
    }

    pub(crate) fn private_factory(&self) -> Option<&PrivateCacheFn> {
        self.create_private.as_ref()
    }
}

impl fmt::Debug for RendererProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RendererProfile")
            .field("id", &self.id)
            .field("supported", &self.supported)
            .field("private_cache", &self.create_private.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_drawer_ids_are_unique() {
        let a = DrawerId::next();
        let b = DrawerId::next();
        assert_ne!(a, b);
        assert!(b.raw() > a.raw());
    }

    #[test]
    fn test_profile_without_private_cache() {
        let profile = RendererProfile::new(vec![DataKind::Surface, DataKind::Raster]);
        assert_eq!(profile.supported(), &[DataKind::Surface, DataKind::Raster]);
        assert!(!profile.uses_private_cache());
    }

    #[test]
    fn test_profile_with_private_cache() {
        let profile = RendererProfile::new(vec![DataKind::Raster])
            .with_private_cache(|_| Ok(Box::new(42u32)));
        assert!(profile.uses_private_cache());
        assert!(profile.private_factory().is_some());
    }

    #[test]
    fn test_empty_support_list_is_allowed() {
        let profile = RendererProfile::new(Vec::new());
        assert!(profile.supported().is_empty());
    }
}
