//! Bonfire core: the pure synchronization model shared by Bonfire clients.
//!
//! Responsibilities:
//! - the message model and its canonical `(created_at, id)` order
//! - deterministic transcript-window merges (snapshot, feed, history)
//! - viewport-relative unread accounting
//! - the host-authoritative run-state row and its derived timings
//!
//! Everything here is synchronous and deterministic; all I/O lives in the
//! client runtime crate.

pub mod message;
pub mod run_state;
pub mod unread;
pub mod window;

pub use message::{Message, MessageId, SendError};
pub use run_state::{
    AutoAdvanceGuard, RUN_STATE_VERSION, RunCommand, RunMode, RunState, RunWrite, Segment,
    SegmentPlan, plan_transition, remaining_seconds,
};
pub use unread::{UnreadState, Viewport};
pub use window::{MergeOutcome, TranscriptWindow};
