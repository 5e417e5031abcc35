//! Draw error taxonomy

use deepzoom_cache::{CacheError, DataKind};

/// Errors surfaced while drawing a frame.
///
/// A tile that merely cannot be drawn yet (data pending, no conversion
/// path) is skipped, not an error; these variants cover genuine contract
/// violations between a drawer and its target.
#[derive(Debug, thiserror::Error)]
pub enum DrawError {
    /// The cache layer failed while preparing or reading tile data.
    #[error(transparent)]
    Cache(#[from] CacheError),

    /// The target was handed data in a representation it cannot raster.
    #[error("target cannot draw {0} data")]
    Undrawable(DataKind),

    /// A layer was blended onto a target that did not create it.
    #[error("layer does not belong to this target")]
    ForeignLayer,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        assert_eq!(
            DrawError::Undrawable(DataKind::Encoded).to_string(),
            "target cannot draw encoded data"
        );
        assert_eq!(DrawError::ForeignLayer.to_string(), "layer does not belong to this target");
    }
}
