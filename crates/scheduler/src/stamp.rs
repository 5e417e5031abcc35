//! Monotonic invalidation stamps
//!
//! Every invalidation request is tagged with a stamp drawn from a shared
//! clock. Stamps are strictly increasing, so "newer request" is always
//! decidable by comparison, and a commit can be checked against the latest
//! stamp seen for its cache identity.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// An invalidation timestamp.
///
/// Stamps are opaque ordered values: the only meaningful operations are
/// comparison and equality. `Stamp::ZERO` predates every stamp a clock will
/// ever issue and marks "never invalidated".
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Stamp(u64);

impl Stamp {
    /// The stamp that precedes all issued stamps.
    pub const ZERO: Stamp = Stamp(0);

    /// Rebuild a stamp from its raw value.
    ///
    /// Intended for storing stamps in atomics; pairing with [`Stamp::raw`]
    /// round-trips exactly.
    pub fn from_raw(raw: u64) -> Self {
        Stamp(raw)
    }

    /// The raw counter value of this stamp.
    pub fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for Stamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "t{}", self.0)
    }
}

/// A source of strictly increasing stamps.
///
/// Shared by value across the world and its pipelines; issuing is wait-free.
#[derive(Debug)]
pub struct StampClock {
    next: AtomicU64,
}

impl StampClock {
    /// Create a clock whose first issued stamp is greater than `Stamp::ZERO`.
    pub fn new() -> Self {
        Self { next: AtomicU64::new(1) }
    }

    /// Issue the next stamp. Each call returns a strictly greater stamp.
    pub fn next(&self) -> Stamp {
        Stamp(self.next.fetch_add(1, Ordering::Relaxed))
    }

    /// The most recently issued stamp, or `Stamp::ZERO` if none was issued.
    pub fn latest(&self) -> Stamp {
        Stamp(self.next.load(Ordering::Relaxed) - 1)
    }
}

impl Default for StampClock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stamps_strictly_increase() {
        let clock = StampClock::new();
        let a = clock.next();
        let b = clock.next();
        let c = clock.next();

        assert!(Stamp::ZERO < a);
        assert!(a < b);
        assert!(b < c);
    }

    #[test]
    fn test_latest_tracks_issued() {
        let clock = StampClock::new();
        assert_eq!(clock.latest(), Stamp::ZERO);

        let a = clock.next();
        assert_eq!(clock.latest(), a);

        let b = clock.next();
        assert_eq!(clock.latest(), b);
    }

    #[test]
    fn test_raw_round_trip() {
        let clock = StampClock::new();
        let stamp = clock.next();
        assert_eq!(Stamp::from_raw(stamp.raw()), stamp);
    }

    #[test]
    fn test_display() {
        assert_eq!(Stamp::ZERO.to_string(), "t0");
        assert_eq!(Stamp::from_raw(42).to_string(), "t42");
    }

    #[test]
    fn test_default_is_zero() {
        assert_eq!(Stamp::default(), Stamp::ZERO);
    }
}
