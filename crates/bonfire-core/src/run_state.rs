use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

pub const RUN_STATE_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    Idle,
    Running,
    Paused,
    Ended,
}

/// The shared playback row for one session: exactly one logical row, mutated
/// only through the host's authoritative write path. All timestamps are
/// stamped by the backend's clock; clients never write their own wall time
/// into this row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunState {
    pub version: u32,
    pub mode: RunMode,
    pub segment_index: usize,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub started_at: Option<OffsetDateTime>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub paused_at: Option<OffsetDateTime>,
    #[serde(default)]
    pub elapsed_before_pause_secs: f64,
}

impl RunState {
    /// The row a backend materializes the first time any participant opens
    /// the session.
    pub fn idle() -> Self {
        Self {
            version: RUN_STATE_VERSION,
            mode: RunMode::Idle,
            segment_index: 0,
            started_at: None,
            paused_at: None,
            elapsed_before_pause_secs: 0.0,
        }
    }
}

/// One timed segment of the run script.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Segment {
    pub label: String,
    pub duration_secs: u64,
}

impl Segment {
    pub fn new(label: impl Into<String>, duration_secs: u64) -> Self {
        Self {
            label: label.into(),
            duration_secs,
        }
    }
}

/// The ordered, read-only script of timed segments a run plays through.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentPlan {
    segments: Vec<Segment>,
}

impl SegmentPlan {
    pub fn new(segments: Vec<Segment>) -> Self {
        Self { segments }
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn get(&self, index: usize) -> Option<&Segment> {
        self.segments.get(index)
    }

    /// Clamp an index into `[0, len - 1]`; an empty plan clamps to 0.
    pub fn clamp_index(&self, index: usize) -> usize {
        if self.segments.is_empty() {
            0
        } else {
            index.min(self.segments.len() - 1)
        }
    }

    pub fn has_next(&self, index: usize) -> bool {
        index + 1 < self.segments.len()
    }

    pub fn duration_secs(&self, index: usize) -> u64 {
        self.segments.get(index).map(|s| s.duration_secs).unwrap_or(0)
    }
}

/// Seconds left in the current segment, derived purely from the stored row
/// and the caller's clock — no network, no mutation. Running time accrues
/// from `started_at`; paused time is frozen at `elapsed_before_pause_secs`;
/// idle shows the full segment; ended shows zero.
pub fn remaining_seconds(state: &RunState, plan: &SegmentPlan, now: OffsetDateTime) -> f64 {
    let index = plan.clamp_index(state.segment_index);
    let duration = plan.duration_secs(index) as f64;
    let elapsed = match state.mode {
        RunMode::Running => {
            let since_start = state
                .started_at
                .map(|t| (now - t).as_seconds_f64().max(0.0))
                .unwrap_or(0.0);
            state.elapsed_before_pause_secs + since_start
        }
        RunMode::Paused => state.elapsed_before_pause_secs,
        RunMode::Idle => 0.0,
        RunMode::Ended => duration,
    };
    (duration - elapsed).max(0.0)
}

/// Host control actions. The surrounding authorization layer decides who may
/// issue them; this module only shapes the write they produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunCommand {
    Start,
    Pause,
    Resume,
    GoTo(usize),
    End,
    Restart,
}

/// The row a host control sends through the authoritative write path. The
/// backend stamps `started_at`/`paused_at` with its own clock at write time;
/// `reset_timer` asks for a fresh `started_at`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunWrite {
    pub mode: RunMode,
    pub segment_index: usize,
    pub elapsed_before_pause_secs: f64,
    pub reset_timer: bool,
}

/// Compute the write a command produces against the current row.
///
/// `now` is only used for the pause computation — the client works out what
/// elapsed value to forward so resuming continues smoothly, but whatever the
/// backend stores remains authoritative.
pub fn plan_transition(
    current: &RunState,
    command: RunCommand,
    plan: &SegmentPlan,
    now: OffsetDateTime,
) -> RunWrite {
    let index = plan.clamp_index(current.segment_index);
    match command {
        RunCommand::Start => RunWrite {
            mode: RunMode::Running,
            segment_index: index,
            elapsed_before_pause_secs: 0.0,
            reset_timer: true,
        },
        RunCommand::Pause => {
            let running_leg = if current.mode == RunMode::Running {
                current
                    .started_at
                    .map(|t| (now - t).as_seconds_f64().max(0.0))
                    .unwrap_or(0.0)
            } else {
                0.0
            };
            RunWrite {
                mode: RunMode::Paused,
                segment_index: index,
                elapsed_before_pause_secs: current.elapsed_before_pause_secs + running_leg,
                reset_timer: false,
            }
        }
        RunCommand::Resume => RunWrite {
            mode: RunMode::Running,
            segment_index: index,
            elapsed_before_pause_secs: current.elapsed_before_pause_secs,
            reset_timer: true,
        },
        RunCommand::GoTo(target) => {
            let target = plan.clamp_index(target);
            // Legal in any mode. While running or paused the segment timer
            // restarts; otherwise only the index moves.
            RunWrite {
                mode: current.mode,
                segment_index: target,
                elapsed_before_pause_secs: 0.0,
                reset_timer: current.mode == RunMode::Running,
            }
        }
        RunCommand::End => RunWrite {
            mode: RunMode::Ended,
            segment_index: index,
            elapsed_before_pause_secs: current.elapsed_before_pause_secs,
            reset_timer: false,
        },
        RunCommand::Restart => RunWrite {
            mode: RunMode::Running,
            segment_index: 0,
            elapsed_before_pause_secs: 0.0,
            reset_timer: true,
        },
    }
}

/// Edge trigger for host-side auto-advance: fires at most once per segment
/// even though the tick observes "remaining == 0" every second. Re-arms only
/// when remaining climbs back above zero, or explicitly when a fresh
/// authoritative row is adopted.
#[derive(Debug, Default)]
pub struct AutoAdvanceGuard {
    armed: bool,
}

impl AutoAdvanceGuard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rearm(&mut self) {
        self.armed = true;
    }

    /// Feed one tick observation. Returns true exactly when an armed guard
    /// sees a running segment hit zero.
    pub fn observe(&mut self, mode: RunMode, remaining: f64) -> bool {
        if remaining > 0.0 {
            self.armed = true;
            return false;
        }
        if mode == RunMode::Running && self.armed {
            self.armed = false;
            return true;
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    fn plan() -> SegmentPlan {
        SegmentPlan::new(vec![
            Segment::new("warmup", 60),
            Segment::new("main", 120),
            Segment::new("cooldown", 30),
        ])
    }

    fn t0() -> OffsetDateTime {
        datetime!(2026-01-01 10:00:00 UTC)
    }

    fn running(started: OffsetDateTime, elapsed_before: f64) -> RunState {
        RunState {
            mode: RunMode::Running,
            started_at: Some(started),
            elapsed_before_pause_secs: elapsed_before,
            ..RunState::idle()
        }
    }

    #[test]
    fn remaining_while_running() {
        let state = running(t0(), 10.0);
        let now = t0() + time::Duration::seconds(20);
        assert_eq!(remaining_seconds(&state, &plan(), now), 30.0);
    }

    #[test]
    fn remaining_clamps_at_zero() {
        let state = running(t0(), 0.0);
        let now = t0() + time::Duration::seconds(500);
        assert_eq!(remaining_seconds(&state, &plan(), now), 0.0);
    }

    #[test]
    fn remaining_idle_is_full_segment_and_ended_is_zero() {
        let mut state = RunState::idle();
        state.segment_index = 1;
        assert_eq!(remaining_seconds(&state, &plan(), t0()), 120.0);
        state.mode = RunMode::Ended;
        assert_eq!(remaining_seconds(&state, &plan(), t0()), 0.0);
    }

    #[test]
    fn remaining_clamps_out_of_range_index() {
        let mut state = RunState::idle();
        state.segment_index = 99;
        assert_eq!(remaining_seconds(&state, &plan(), t0()), 30.0);
    }

    #[test]
    fn pause_resume_round_trip_ignores_the_pause_gap() {
        let plan = plan();
        let mut now = t0();
        let state = running(now, 0.0);

        // Pause at elapsed 20s.
        now += time::Duration::seconds(20);
        let pause = plan_transition(&state, RunCommand::Pause, &plan, now);
        assert_eq!(pause.mode, RunMode::Paused);
        assert_eq!(pause.elapsed_before_pause_secs, 20.0);
        assert!(!pause.reset_timer);
        let paused = RunState {
            mode: RunMode::Paused,
            started_at: None,
            paused_at: Some(now),
            elapsed_before_pause_secs: pause.elapsed_before_pause_secs,
            ..state.clone()
        };
        assert_eq!(remaining_seconds(&paused, &plan, now), 40.0);

        // A long pause gap contributes nothing.
        now += time::Duration::seconds(300);
        let resume = plan_transition(&paused, RunCommand::Resume, &plan, now);
        assert_eq!(resume.elapsed_before_pause_secs, 20.0);
        assert!(resume.reset_timer);
        let resumed = RunState {
            mode: RunMode::Running,
            started_at: Some(now),
            paused_at: None,
            elapsed_before_pause_secs: resume.elapsed_before_pause_secs,
            ..paused
        };

        // 15s later the timer reads as if the segment ran 35s continuously.
        now += time::Duration::seconds(15);
        assert_eq!(remaining_seconds(&resumed, &plan, now), 25.0);
    }

    #[test]
    fn go_to_clamps_and_restarts_timer_only_when_live() {
        let plan = plan();
        let state = running(t0(), 12.0);
        let write = plan_transition(&state, RunCommand::GoTo(99), &plan, t0());
        assert_eq!(write.segment_index, 2);
        assert_eq!(write.elapsed_before_pause_secs, 0.0);
        assert!(write.reset_timer);

        let idle = RunState::idle();
        let write = plan_transition(&idle, RunCommand::GoTo(1), &plan, t0());
        assert_eq!(write.mode, RunMode::Idle);
        assert_eq!(write.segment_index, 1);
        assert!(!write.reset_timer);
    }

    #[test]
    fn restart_goes_back_to_segment_zero_running() {
        let mut state = running(t0(), 50.0);
        state.mode = RunMode::Ended;
        state.segment_index = 2;
        let write = plan_transition(&state, RunCommand::Restart, &plan(), t0());
        assert_eq!(write.mode, RunMode::Running);
        assert_eq!(write.segment_index, 0);
        assert_eq!(write.elapsed_before_pause_secs, 0.0);
        assert!(write.reset_timer);
    }

    #[test]
    fn auto_advance_fires_once_across_repeated_zero_ticks() {
        let mut guard = AutoAdvanceGuard::new();
        assert!(!guard.observe(RunMode::Running, 3.0));
        assert!(guard.observe(RunMode::Running, 0.0));
        assert!(!guard.observe(RunMode::Running, 0.0));
        assert!(!guard.observe(RunMode::Running, 0.0));

        // A new segment re-arms the guard.
        assert!(!guard.observe(RunMode::Running, 30.0));
        assert!(guard.observe(RunMode::Running, 0.0));
    }

    #[test]
    fn auto_advance_only_fires_while_running() {
        let mut guard = AutoAdvanceGuard::new();
        assert!(!guard.observe(RunMode::Paused, 5.0));
        assert!(!guard.observe(RunMode::Paused, 0.0));
        guard.rearm();
        assert!(!guard.observe(RunMode::Idle, 0.0));
        assert!(guard.observe(RunMode::Running, 0.0));
    }

    #[test]
    fn run_state_row_round_trips_through_json() {
        let row = RunState {
            mode: RunMode::Paused,
            segment_index: 1,
            paused_at: Some(t0()),
            elapsed_before_pause_secs: 12.5,
            ..RunState::idle()
        };
        let encoded = serde_json::to_string(&row).unwrap();
        let decoded: RunState = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded, row);
    }
}
