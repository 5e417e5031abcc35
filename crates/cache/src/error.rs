//! Cache error taxonomy

use crate::data::DataKind;
use crate::record::CacheKey;

/// Result alias for cache operations.
pub type CacheResult<T> = Result<T, CacheError>;

/// Errors surfaced by the cache layer.
///
/// A superseded invalidation is deliberately not represented here: it is a
/// silently discarded result, not an error.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// No registered conversion path between two representations.
    #[error("no conversion path from {from} to {to}")]
    ConversionUnavailable { from: DataKind, to: DataKind },

    /// No registered path from the stored representation to anything in a
    /// renderer's supported set.
    #[error("no conversion path from {from} to any supported format {targets:?}")]
    NoSupportedFormat { from: DataKind, targets: Vec<DataKind> },

    /// A registered conversion function failed.
    #[error("converter {name} failed: {message}")]
    ConverterFailed { name: String, message: String },

    /// A deferred data producer failed on first read. The failure is sticky:
    /// later reads of the same record report it again.
    #[error("data producer for cache {key} failed: {message}")]
    ProducerFailed { key: CacheKey, message: String },

    /// The requested cache key has no backing record.
    #[error("no cache record for key {0:?}")]
    MissingCache(CacheKey),

    /// The record was destroyed while a reference to it was still held.
    #[error("cache record {0:?} was destroyed")]
    RecordDestroyed(CacheKey),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = CacheError::ConversionUnavailable { from: DataKind::Encoded, to: DataKind::Surface };
        assert_eq!(err.to_string(), "no conversion path from encoded to surface");

        let err = CacheError::MissingCache("1/2_3".to_string());
        assert_eq!(err.to_string(), "no cache record for key \"1/2_3\"");

        let err = CacheError::ConverterFailed { name: "decode".into(), message: "truncated".into() };
        assert_eq!(err.to_string(), "converter decode failed: truncated");
    }
}
