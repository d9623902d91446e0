use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::{debug, warn};

use bonfire_core::run_state::{
    AutoAdvanceGuard, RUN_STATE_VERSION, RunCommand, RunState, SegmentPlan, plan_transition,
    remaining_seconds,
};

use crate::backend::{BackendResult, RunStateBackend};
use crate::clock::Clock;
use crate::session::{ActiveSession, SessionContext, SessionStamp};

/// Observable run state: the authoritative row plus values derived from it
/// locally (remaining time, the viewer's private preview index).
#[derive(Debug, Clone)]
pub struct RunView {
    pub state: RunState,
    pub remaining_secs: f64,
    /// Local-only segment preview; never part of the shared row.
    pub preview_index: Option<usize>,
}

struct RunShared {
    state: RunState,
    preview_index: Option<usize>,
    guard: AutoAdvanceGuard,
}

/// Holds the host-authoritative playback row for one session and derives
/// per-tick timings from it. Host control actions write through the backend
/// and adopt only the row it returns; nothing is mutated optimistically,
/// because timer drift here is user-visible on every device.
pub struct RunController {
    backend: Arc<dyn RunStateBackend>,
    ctx: SessionContext,
    active: Arc<ActiveSession>,
    stamp: SessionStamp,
    plan: SegmentPlan,
    clock: Arc<dyn Clock>,
    shared: Mutex<RunShared>,
    view_tx: watch::Sender<RunView>,
}

impl RunController {
    pub fn new(
        backend: Arc<dyn RunStateBackend>,
        ctx: SessionContext,
        active: Arc<ActiveSession>,
        stamp: SessionStamp,
        plan: SegmentPlan,
        clock: Arc<dyn Clock>,
    ) -> Arc<Self> {
        let state = RunState::idle();
        let remaining = remaining_seconds(&state, &plan, clock.now());
        let (view_tx, _) = watch::channel(RunView {
            state: state.clone(),
            remaining_secs: remaining,
            preview_index: None,
        });
        Arc::new(Self {
            backend,
            ctx,
            active,
            stamp,
            plan,
            clock,
            shared: Mutex::new(RunShared {
                state,
                preview_index: None,
                guard: AutoAdvanceGuard::new(),
            }),
            view_tx,
        })
    }

    pub fn subscribe(&self) -> watch::Receiver<RunView> {
        self.view_tx.subscribe()
    }

    pub fn view(&self) -> RunView {
        self.view_tx.borrow().clone()
    }

    pub fn plan(&self) -> &SegmentPlan {
        &self.plan
    }

    /// Fetch and adopt the authoritative row; the backend materializes an
    /// idle row on first open.
    pub async fn refresh(&self) -> BackendResult<()> {
        let row = self.backend.fetch_run_state(&self.ctx.session_id).await?;
        if !self.active.is_current(&self.stamp) {
            debug!(session = %self.stamp.session_id(), "dropping run state for superseded session");
            return Ok(());
        }
        self.adopt(row);
        Ok(())
    }

    /// Resync wrapper that downgrades failures to a warning; the next tick
    /// retries.
    pub async fn resync(&self) {
        if let Err(err) = self.refresh().await {
            warn!(session = %self.stamp.session_id(), error = %err, "run state resync failed");
        }
    }

    /// Adopt an authoritative row from any source (fetch, write response,
    /// change feed). Idempotent: re-delivery of the current row is a no-op,
    /// so duplicate notifications cannot re-arm the auto-advance guard.
    pub fn apply_feed_row(&self, row: RunState) {
        if !self.active.is_current(&self.stamp) {
            return;
        }
        self.adopt(row);
    }

    fn adopt(&self, row: RunState) {
        if row.version != RUN_STATE_VERSION {
            warn!(version = row.version, "dropping run state row with unknown version");
            return;
        }
        let mut shared = self.shared.lock();
        if shared.state == row {
            return;
        }
        shared.state = row;
        shared.guard.rearm();
        self.publish(&shared);
    }

    /// Issue a host control action through the authoritative write path.
    /// On failure the local row is untouched and the error surfaces to the
    /// caller; on success the stored row is adopted.
    pub async fn apply(&self, command: RunCommand) -> BackendResult<RunState> {
        let write = {
            let shared = self.shared.lock();
            plan_transition(&shared.state, command, &self.plan, self.clock.now())
        };
        let row = self
            .backend
            .write_run_state(&self.ctx.session_id, write)
            .await?;
        if self.active.is_current(&self.stamp) {
            self.adopt(row.clone());
        }
        Ok(row)
    }

    pub async fn start(&self) -> BackendResult<RunState> {
        self.apply(RunCommand::Start).await
    }

    pub async fn pause(&self) -> BackendResult<RunState> {
        self.apply(RunCommand::Pause).await
    }

    pub async fn resume(&self) -> BackendResult<RunState> {
        self.apply(RunCommand::Resume).await
    }

    pub async fn go_to(&self, index: usize) -> BackendResult<RunState> {
        self.apply(RunCommand::GoTo(index)).await
    }

    pub async fn end(&self) -> BackendResult<RunState> {
        self.apply(RunCommand::End).await
    }

    pub async fn restart(&self) -> BackendResult<RunState> {
        self.apply(RunCommand::Restart).await
    }

    /// Seconds left in the live segment, derived from the stored row and the
    /// local clock. Never touches the network.
    pub fn remaining_secs(&self) -> f64 {
        let shared = self.shared.lock();
        remaining_seconds(&shared.state, &self.plan, self.clock.now())
    }

    /// Set or clear the viewer's private segment preview.
    pub fn set_preview(&self, index: Option<usize>) {
        let mut shared = self.shared.lock();
        shared.preview_index = index.map(|i| self.plan.clamp_index(i));
        self.publish(&shared);
    }

    /// One local tick: republish the derived view, and on the host decide
    /// whether the segment just expired. Returns the follow-up command the
    /// caller should apply (the tick itself never mutates the row).
    pub fn tick(&self) -> Option<RunCommand> {
        let mut guard = self.shared.lock();
        let shared = &mut *guard;
        let remaining = remaining_seconds(&shared.state, &self.plan, self.clock.now());
        self.publish(shared);
        if !self.ctx.is_host {
            return None;
        }
        if !shared.guard.observe(shared.state.mode, remaining) {
            return None;
        }
        let index = self.plan.clamp_index(shared.state.segment_index);
        if self.plan.has_next(index) {
            Some(RunCommand::GoTo(index + 1))
        } else {
            Some(RunCommand::End)
        }
    }

    fn publish(&self, shared: &RunShared) {
        self.view_tx.send_replace(RunView {
            state: shared.state.clone(),
            remaining_secs: remaining_seconds(&shared.state, &self.plan, self.clock.now()),
            preview_index: shared.preview_index,
        });
    }
}
