//! Invalidation job lifecycle
//!
//! Each queued tile invalidation is an explicit job walking a small state
//! machine instead of an implicit chain of continuations. The legal
//! transitions are:
//!
//! ```text
//! Pending ──► Committing ──► Done
//!    │             │
//!    └─────────────┴──► Superseded
//! ```
//!
//! `Superseded` and `Done` are terminal. A job parked by a cooperative
//! handler stays `Pending` across pumps.

/// Lifecycle state of one invalidation job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobState {
    /// Queued or parked; the transform has not finished.
    Pending,
    /// Transform finished and the commit check passed; swap in progress.
    Committing,
    /// A newer pass won; this job's result was discarded.
    Superseded,
    /// Commit finished.
    Done,
}

impl JobState {
    /// Whether moving from `self` to `next` is a legal transition.
    pub fn can_advance(self, next: JobState) -> bool {
        matches!(
            (self, next),
            (JobState::Pending, JobState::Committing)
                | (JobState::Pending, JobState::Superseded)
                | (JobState::Committing, JobState::Done)
                | (JobState::Committing, JobState::Superseded)
        )
    }

    /// Whether this state admits no further transitions.
    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Superseded | JobState::Done)
    }
}

/// What one pumped invalidation job produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    /// Working data was committed as the tile's new render target.
    Committed,
    /// No modification was made and the tile swapped back to original data.
    Restored,
    /// Neither modified nor restoring; the tile is already current.
    Unchanged,
    /// A newer pass superseded this job; its result was discarded.
    Superseded,
    /// Superseded and re-queued under the newest stamp.
    Requeued,
    /// The tile was unloaded or evicted before the job could run.
    Dropped,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_legal_transitions() {
        assert!(JobState::Pending.can_advance(JobState::Committing));
        assert!(JobState::Pending.can_advance(JobState::Superseded));
        assert!(JobState::Committing.can_advance(JobState::Done));
        assert!(JobState::Committing.can_advance(JobState::Superseded));
    }

    #[test]
    fn test_illegal_transitions() {
        assert!(!JobState::Pending.can_advance(JobState::Done));
        assert!(!JobState::Pending.can_advance(JobState::Pending));
        assert!(!JobState::Committing.can_advance(JobState::Pending));
        assert!(!JobState::Done.can_advance(JobState::Pending));
        assert!(!JobState::Done.can_advance(JobState::Committing));
        assert!(!JobState::Superseded.can_advance(JobState::Committing));
        assert!(!JobState::Superseded.can_advance(JobState::Done));
    }

    #[test]
    fn test_terminal_states() {
        assert!(!JobState::Pending.is_terminal());
        assert!(!JobState::Committing.is_terminal());
        assert!(JobState::Superseded.is_terminal());
        assert!(JobState::Done.is_terminal());
    }
}
