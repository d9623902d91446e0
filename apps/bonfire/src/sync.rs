use std::sync::Arc;

use tokio::sync::broadcast::error::RecvError;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, warn};

use bonfire_core::run_state::SegmentPlan;

use crate::backend::{BackendResult, RunStateBackend, TranscriptBackend};
use crate::clock::Clock;
use crate::config::SyncConfig;
use crate::run::RunController;
use crate::session::{ActiveSession, SessionContext, SessionStamp};
use crate::transcript::TranscriptController;

/// One open session view: transcript and run-state controllers plus the
/// background task that feeds them.
///
/// Opening loads the initial snapshots, attaches both change feeds, and
/// starts two timers: the fixed-interval resync (self-healing, independent of
/// feed delivery) and the per-second tick that re-derives run timings and
/// drives host auto-advance. Dropping the handle (or calling [`close`])
/// deterministically tears the timers down; in-flight fetches finish on their
/// own and are discarded by the staleness guard.
///
/// [`close`]: SessionSync::close
pub struct SessionSync {
    pub transcript: Arc<TranscriptController>,
    pub run: Arc<RunController>,
    active: Arc<ActiveSession>,
    stamp: SessionStamp,
    shutdown_tx: mpsc::Sender<()>,
    task: Option<JoinHandle<()>>,
}

impl SessionSync {
    pub async fn open(
        transcript_backend: Arc<dyn TranscriptBackend>,
        run_backend: Arc<dyn RunStateBackend>,
        active: Arc<ActiveSession>,
        ctx: SessionContext,
        plan: SegmentPlan,
        clock: Arc<dyn Clock>,
        config: SyncConfig,
    ) -> BackendResult<Self> {
        let config = config.normalized();
        let stamp = active.activate(&ctx.session_id);

        let transcript = TranscriptController::new(
            transcript_backend.clone(),
            ctx.clone(),
            active.clone(),
            stamp.clone(),
            config.clone(),
        );
        let run = RunController::new(
            run_backend.clone(),
            ctx.clone(),
            active.clone(),
            stamp.clone(),
            plan,
            clock,
        );

        transcript.refresh().await?;
        run.refresh().await?;

        let mut message_rx = transcript_backend.subscribe_messages(&ctx.session_id);
        let mut run_rx = run_backend.subscribe_run_state(&ctx.session_id);
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);

        let task = {
            let transcript = transcript.clone();
            let run = run.clone();
            let session_id = ctx.session_id.clone();
            // Anchor the timers at open time, not at the task's first poll,
            // so the first tick is not delayed by spawn scheduling.
            let start = time::Instant::now();
            tokio::spawn(async move {
                let mut resync =
                    time::interval_at(start + config.resync_interval, config.resync_interval);
                resync.set_missed_tick_behavior(MissedTickBehavior::Skip);
                let mut tick = time::interval_at(start + config.tick_interval, config.tick_interval);
                tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

                let mut message_feed_open = true;
                let mut run_feed_open = true;

                loop {
                    tokio::select! {
                        _ = shutdown_rx.recv() => break,
                        event = message_rx.recv(), if message_feed_open => match event {
                            Ok(event) => transcript.apply_feed_event(event),
                            Err(RecvError::Lagged(skipped)) => {
                                warn!(session = %session_id, skipped, "message feed lagged, resyncing");
                                transcript.resync().await;
                            }
                            Err(RecvError::Closed) => {
                                warn!(session = %session_id, "message feed closed, relying on resync");
                                message_feed_open = false;
                            }
                        },
                        row = run_rx.recv(), if run_feed_open => match row {
                            Ok(row) => run.apply_feed_row(row),
                            Err(RecvError::Lagged(_)) => run.resync().await,
                            Err(RecvError::Closed) => {
                                warn!(session = %session_id, "run feed closed, relying on resync");
                                run_feed_open = false;
                            }
                        },
                        _ = resync.tick() => {
                            transcript.resync().await;
                            run.resync().await;
                        }
                        _ = tick.tick() => {
                            if let Some(command) = run.tick() {
                                if let Err(err) = run.apply(command).await {
                                    warn!(session = %session_id, error = %err, "auto-advance write failed");
                                }
                            }
                        }
                    }
                }
                debug!(session = %session_id, "session sync loop stopped");
            })
        };

        Ok(Self {
            transcript,
            run,
            active,
            stamp,
            shutdown_tx,
            task: Some(task),
        })
    }

    /// Tear down timers and feeds and invalidate outstanding completions.
    /// A session opened after this one stays untouched.
    pub fn close(&mut self) {
        if self.active.is_current(&self.stamp) {
            self.active.deactivate();
        }
        let _ = self.shutdown_tx.try_send(());
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for SessionSync {
    fn drop(&mut self) {
        self.close();
    }
}
