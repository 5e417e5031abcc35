//! Supersession tracking for overlapping invalidation passes
//!
//! One [`SupersessionCell`] exists per cache identity under invalidation. A
//! pass advances the cell with its own stamp when it starts; any pass whose
//! stamp is older than the cell's latest is superseded. Passes are expected
//! to poll their [`OutdatedToken`] at checkpoints and abandon side effects
//! once it reports outdated. A pass that ignores the token still has its
//! result discarded at commit time by the same comparison.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::Stamp;

/// The latest invalidation stamp seen for one cache identity.
///
/// Advancing is monotonic: an older stamp never overwrites a newer one, so
/// concurrent advances from any interleaving converge to the maximum.
#[derive(Debug, Default)]
pub struct SupersessionCell {
    latest: AtomicU64,
}

impl SupersessionCell {
    /// Create a cell that has seen no stamps yet.
    pub fn new() -> Self {
        Self { latest: AtomicU64::new(Stamp::ZERO.raw()) }
    }

    /// Record `stamp` as seen. Returns `true` if it became the latest.
    ///
    /// Idempotent and order-insensitive: re-advancing with an old stamp is a
    /// no-op.
    pub fn advance(&self, stamp: Stamp) -> bool {
        let previous = self.latest.fetch_max(stamp.raw(), Ordering::AcqRel);
        stamp.raw() > previous
    }

    /// The newest stamp this cell has seen.
    pub fn latest(&self) -> Stamp {
        Stamp::from_raw(self.latest.load(Ordering::Acquire))
    }

    /// Whether a pass carrying `stamp` has been superseded by a newer one.
    pub fn is_outdated(&self, stamp: Stamp) -> bool {
        self.latest() > stamp
    }
}

/// A single pass's handle onto its supersession cell.
///
/// Cheap to clone; all clones observe the same cell. Handed to invalidation
/// handlers as the cooperative `outdated()` predicate.
#[derive(Debug, Clone)]
pub struct OutdatedToken {
    cell: Arc<SupersessionCell>,
    stamp: Stamp,
}

impl OutdatedToken {
    /// Bind a pass's stamp to the cache's cell.
    pub fn new(cell: Arc<SupersessionCell>, stamp: Stamp) -> Self {
        Self { cell, stamp }
    }

    /// Whether a newer pass has superseded this one.
    pub fn outdated(&self) -> bool {
        self.cell.is_outdated(self.stamp)
    }

    /// The stamp this pass runs under.
    pub fn stamp(&self) -> Stamp {
        self.stamp
    }

    /// The newest stamp the underlying cell has seen.
    pub fn latest(&self) -> Stamp {
        self.cell.latest()
    }

    /// A fresh token for the same cell at its current latest stamp.
    ///
    /// A superseded pass uses this to re-run under the stamp that beat it.
    pub fn renew(&self) -> OutdatedToken {
        OutdatedToken { cell: self.cell.clone(), stamp: self.cell.latest() }
    }
}
