//! Run-state synchronization: host controls through the authoritative write
//! path, derived timings against the shared clock, and ticker-driven
//! auto-advance.

use std::sync::Arc;
use std::time::Duration;

use time::macros::datetime;

use bonfire_client_core::backend::BackendError;
use bonfire_client_core::backend::memory::MemoryBackend;
use bonfire_client_core::clock::ManualClock;
use bonfire_client_core::config::SyncConfig;
use bonfire_client_core::session::{ActiveSession, SessionContext};
use bonfire_client_core::sync::SessionSync;
use bonfire_core::run_state::{RunMode, Segment, SegmentPlan};

fn plan() -> SegmentPlan {
    SegmentPlan::new(vec![Segment::new("warmup", 60), Segment::new("main", 45)])
}

struct Harness {
    backend: Arc<MemoryBackend>,
    clock: Arc<ManualClock>,
    session: SessionSync,
}

async fn open(ctx: SessionContext) -> Harness {
    let clock = ManualClock::starting_at(datetime!(2026-01-01 10:00:00 UTC));
    let backend = MemoryBackend::with_clock(clock.clone());
    open_with(ctx, backend, clock).await
}

async fn open_with(
    ctx: SessionContext,
    backend: Arc<MemoryBackend>,
    clock: Arc<ManualClock>,
) -> Harness {
    let session = SessionSync::open(
        backend.clone(),
        backend.clone(),
        Arc::new(ActiveSession::new()),
        ctx,
        plan(),
        clock.clone(),
        SyncConfig::default(),
    )
    .await
    .expect("open session");
    Harness {
        backend,
        clock,
        session,
    }
}

async fn settle() {
    for _ in 0..32 {
        tokio::task::yield_now().await;
    }
}

#[tokio::test(start_paused = true)]
async fn session_opens_idle() {
    let h = open(SessionContext::new("s1", "host").as_host()).await;
    let view = h.session.run.view();
    assert_eq!(view.state.mode, RunMode::Idle);
    assert_eq!(view.state.segment_index, 0);
    assert_eq!(view.remaining_secs, 60.0);
}

#[tokio::test(start_paused = true)]
async fn pause_resume_round_trip_matches_continuous_play() {
    let h = open(SessionContext::new("s1", "host").as_host()).await;

    h.session.run.start().await.expect("start");
    h.clock.advance_secs(20);
    let paused = h.session.run.pause().await.expect("pause");
    assert_eq!(paused.mode, RunMode::Paused);
    assert_eq!(paused.elapsed_before_pause_secs, 20.0);
    assert_eq!(h.session.run.remaining_secs(), 40.0);

    // The pause gap contributes nothing.
    h.clock.advance_secs(300);
    assert_eq!(h.session.run.remaining_secs(), 40.0);

    let resumed = h.session.run.resume().await.expect("resume");
    assert_eq!(resumed.mode, RunMode::Running);
    assert_eq!(resumed.elapsed_before_pause_secs, 20.0);

    h.clock.advance_secs(15);
    assert_eq!(h.session.run.remaining_secs(), 25.0);
}

#[tokio::test(start_paused = true)]
async fn failed_transition_leaves_local_state_untouched() {
    let h = open(SessionContext::new("s1", "host").as_host()).await;
    h.session.run.start().await.expect("start");
    h.clock.advance_secs(5);

    h.backend.set_reject_run_writes("s1", true);
    let before = h.session.run.view().state;
    let err = h.session.run.pause().await.expect_err("rejected");
    assert!(matches!(err, BackendError::Unauthorized));
    assert_eq!(h.session.run.view().state, before);
    assert_eq!(h.session.run.view().state.mode, RunMode::Running);
}

#[tokio::test(start_paused = true)]
async fn go_to_clamps_and_restarts_the_segment_timer() {
    let h = open(SessionContext::new("s1", "host").as_host()).await;
    h.session.run.start().await.expect("start");
    h.clock.advance_secs(30);

    let moved = h.session.run.go_to(99).await.expect("go_to");
    assert_eq!(moved.segment_index, 1);
    assert_eq!(moved.mode, RunMode::Running);
    assert_eq!(h.session.run.remaining_secs(), 45.0);
}

#[tokio::test(start_paused = true)]
async fn auto_advance_fires_exactly_once_per_segment() {
    let h = open(SessionContext::new("s1", "host").as_host()).await;
    h.session.run.start().await.expect("start");

    // Segment one expires; three ticks observe zero but only one write goes out.
    h.clock.advance_secs(61);
    tokio::time::advance(Duration::from_secs(3)).await;
    settle().await;
    let writes = h.backend.run_writes("s1");
    assert_eq!(writes.len(), 2, "start + one auto-advance");
    assert_eq!(writes[1].segment_index, 1);
    assert_eq!(writes[1].mode, RunMode::Running);
    assert_eq!(h.session.run.view().state.segment_index, 1);

    // Last segment expires: the run ends, once.
    h.clock.advance_secs(46);
    tokio::time::advance(Duration::from_secs(3)).await;
    settle().await;
    let writes = h.backend.run_writes("s1");
    assert_eq!(writes.len(), 3, "start + advance + end");
    assert_eq!(writes[2].mode, RunMode::Ended);
    assert_eq!(h.session.run.view().state.mode, RunMode::Ended);

    // Ticks keep coming; nothing else is written.
    tokio::time::advance(Duration::from_secs(5)).await;
    settle().await;
    assert_eq!(h.backend.run_writes("s1").len(), 3);
}

#[tokio::test(start_paused = true)]
async fn participants_adopt_host_writes_but_never_auto_advance() {
    let clock = ManualClock::starting_at(datetime!(2026-01-01 10:00:00 UTC));
    let backend = MemoryBackend::with_clock(clock.clone());
    let host = open_with(
        SessionContext::new("s1", "host").as_host(),
        backend.clone(),
        clock.clone(),
    )
    .await;
    let participant = open_with(
        SessionContext::new("s1", "viewer"),
        backend.clone(),
        clock.clone(),
    )
    .await;

    host.session.run.start().await.expect("start");
    settle().await;
    assert_eq!(participant.session.run.view().state.mode, RunMode::Running);

    // Only the host's device reacts to segment expiry.
    clock.advance_secs(61);
    tokio::time::advance(Duration::from_secs(3)).await;
    settle().await;
    let writes = backend.run_writes("s1");
    assert_eq!(writes.len(), 2);
    assert_eq!(participant.session.run.view().state.segment_index, 1);
}

#[tokio::test(start_paused = true)]
async fn preview_is_local_only() {
    let h = open(SessionContext::new("s1", "viewer")).await;
    h.session.run.set_preview(Some(99));
    let view = h.session.run.view();
    assert_eq!(view.preview_index, Some(1));
    assert_eq!(view.state.segment_index, 0);
    assert!(h.backend.run_writes("s1").is_empty());

    h.session.run.set_preview(None);
    assert_eq!(h.session.run.view().preview_index, None);
}

#[tokio::test(start_paused = true)]
async fn restart_returns_to_segment_zero() {
    let h = open(SessionContext::new("s1", "host").as_host()).await;
    h.session.run.start().await.expect("start");
    h.session.run.go_to(1).await.expect("go_to");
    h.session.run.end().await.expect("end");

    let restarted = h.session.run.restart().await.expect("restart");
    assert_eq!(restarted.mode, RunMode::Running);
    assert_eq!(restarted.segment_index, 0);
    assert_eq!(restarted.elapsed_before_pause_secs, 0.0);
    assert_eq!(h.session.run.remaining_secs(), 60.0);
}
