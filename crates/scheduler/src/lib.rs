//! Deep-zoom scheduling primitives
//!
//! Building blocks for the viewer's invalidation and load pipelines: monotonic
//! invalidation stamps, supersession tracking for overlapping invalidation
//! passes, the per-job lifecycle state machine, and a priority queue for tile
//! load requests.
//!
//! Invalidation passes are never force-cancelled. Each pass carries a stamp
//! from a shared [`StampClock`]; a later pass advances the per-cache
//! [`SupersessionCell`], and the earlier pass observes that it has been
//! superseded through its [`OutdatedToken`] at its own checkpoints.
//!
//! # Example
//!
//! ```
//! use deepzoom_scheduler::{OutdatedToken, StampClock, SupersessionCell};
//! use std::sync::Arc;
//!
//! let clock = StampClock::new();
//! let cell = Arc::new(SupersessionCell::new());
//!
//! // First pass begins.
//! let first = clock.next();
//! cell.advance(first);
//! let token = OutdatedToken::new(cell.clone(), first);
//! assert!(!token.outdated());
//!
//! // A newer pass arrives; the first pass is now outdated and should
//! // abandon its side effects at the next checkpoint.
//! let newer = clock.next();
//! cell.advance(newer);
//! assert!(token.outdated());
//! ```

mod job;
mod queue;
mod stamp;
mod supersede;

// Re-export public API
pub use job::{JobOutcome, JobState};
pub use queue::{LoadPriority, LoadQueue};
pub use stamp::{Stamp, StampClock};
pub use supersede::{OutdatedToken, SupersessionCell};
