//! In-memory backend for tests and non-transport contexts.
//!
//! Holds one authoritative message list and run-state row per session and
//! pushes change-feed events over broadcast channels. Feed delivery can be
//! suppressed per session to simulate missed notifications, sends can be
//! rate limited, and run-state writes can be rejected, which is enough to
//! exercise every recovery path in the synchronization core.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use time::OffsetDateTime;
use tokio::sync::broadcast;

use async_trait::async_trait;
use bonfire_core::message::{Message, MessageId, SendError};
use bonfire_core::run_state::{RUN_STATE_VERSION, RunMode, RunState, RunWrite};

use super::{BackendError, BackendResult, MessageEvent, RunStateBackend, TranscriptBackend};
use crate::clock::{Clock, SystemClock};

const FEED_CAPACITY: usize = 64;

struct SessionSlot {
    messages: Vec<Message>,
    run_state: RunState,
    run_writes: Vec<RunWrite>,
    message_tx: broadcast::Sender<MessageEvent>,
    run_tx: broadcast::Sender<RunState>,
    suppress_feed: bool,
    rate_limited: bool,
    reject_run_writes: bool,
}

impl SessionSlot {
    fn new() -> Self {
        Self {
            messages: Vec::new(),
            run_state: RunState::idle(),
            run_writes: Vec::new(),
            message_tx: broadcast::channel(FEED_CAPACITY).0,
            run_tx: broadcast::channel(FEED_CAPACITY).0,
            suppress_feed: false,
            rate_limited: false,
            reject_run_writes: false,
        }
    }
}

pub struct MemoryBackend {
    clock: Arc<dyn Clock>,
    max_body_bytes: usize,
    fetch_delay: Mutex<Option<Duration>>,
    sessions: Mutex<HashMap<String, SessionSlot>>,
}

impl MemoryBackend {
    pub fn new() -> Arc<Self> {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Arc<Self> {
        Arc::new(Self {
            clock,
            max_body_bytes: 2000,
            fetch_delay: Mutex::new(None),
            sessions: Mutex::new(HashMap::new()),
        })
    }

    /// Insert a message as if another participant sent it. Emits a feed event
    /// unless delivery is suppressed for the session.
    pub fn insert_remote_message(&self, session_id: &str, author_id: &str, body: &str) -> Message {
        let row = Message {
            id: MessageId(uuid::Uuid::new_v4().to_string()),
            session_id: session_id.to_string(),
            author_id: author_id.to_string(),
            body: body.to_string(),
            created_at: self.clock.now(),
        };
        self.insert_message_row(row.clone());
        row
    }

    /// Insert a fully-formed row, for tests that control ids and timestamps.
    pub fn insert_message_row(&self, row: Message) {
        let mut sessions = self.sessions.lock();
        let slot = slot_mut(&mut sessions, &row.session_id);
        slot.messages.retain(|m| m.id != row.id);
        let at = slot
            .messages
            .partition_point(|m| m.cmp_order(&row) == std::cmp::Ordering::Less);
        slot.messages.insert(at, row.clone());
        if !slot.suppress_feed {
            let _ = slot.message_tx.send(MessageEvent::Inserted(row));
        }
    }

    pub fn delete_message(&self, session_id: &str, id: &MessageId) {
        let mut sessions = self.sessions.lock();
        let slot = slot_mut(&mut sessions, session_id);
        slot.messages.retain(|m| &m.id != id);
        if !slot.suppress_feed {
            let _ = slot.message_tx.send(MessageEvent::Deleted(id.clone()));
        }
    }

    /// Stop (or resume) emitting feed events for a session; the stored rows
    /// keep mutating either way, so resync has something to heal from.
    pub fn set_feed_suppressed(&self, session_id: &str, suppressed: bool) {
        let mut sessions = self.sessions.lock();
        slot_mut(&mut sessions, session_id).suppress_feed = suppressed;
    }

    pub fn set_rate_limited(&self, session_id: &str, limited: bool) {
        let mut sessions = self.sessions.lock();
        slot_mut(&mut sessions, session_id).rate_limited = limited;
    }

    pub fn set_reject_run_writes(&self, session_id: &str, reject: bool) {
        let mut sessions = self.sessions.lock();
        slot_mut(&mut sessions, session_id).reject_run_writes = reject;
    }

    /// Artificial latency for fetches, so tests can hold a request in flight.
    pub fn set_fetch_delay(&self, delay: Option<Duration>) {
        *self.fetch_delay.lock() = delay;
    }

    pub fn message_count(&self, session_id: &str) -> usize {
        let mut sessions = self.sessions.lock();
        slot_mut(&mut sessions, session_id).messages.len()
    }

    /// Every run-state write received so far, oldest first.
    pub fn run_writes(&self, session_id: &str) -> Vec<RunWrite> {
        let mut sessions = self.sessions.lock();
        slot_mut(&mut sessions, session_id).run_writes.clone()
    }

    async fn apply_fetch_delay(&self) {
        let delay = *self.fetch_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }
}

fn slot_mut<'a>(
    sessions: &'a mut HashMap<String, SessionSlot>,
    session_id: &str,
) -> &'a mut SessionSlot {
    sessions
        .entry(session_id.to_string())
        .or_insert_with(SessionSlot::new)
}

/// Clone a row through JSON, the way a real transport would hand it over.
fn over_the_wire<T: serde::Serialize + serde::de::DeserializeOwned>(
    rows: Vec<T>,
) -> BackendResult<Vec<T>> {
    let encoded =
        serde_json::to_value(rows).map_err(|e| BackendError::Transport(e.to_string()))?;
    serde_json::from_value(encoded).map_err(|e| BackendError::Transport(e.to_string()))
}

#[async_trait]
impl TranscriptBackend for MemoryBackend {
    async fn fetch_recent_messages(
        &self,
        session_id: &str,
        limit: usize,
    ) -> BackendResult<Vec<Message>> {
        self.apply_fetch_delay().await;
        let rows = {
            let mut sessions = self.sessions.lock();
            let slot = slot_mut(&mut sessions, session_id);
            slot.messages
                .iter()
                .rev()
                .take(limit)
                .cloned()
                .collect::<Vec<_>>()
        };
        over_the_wire(rows)
    }

    async fn fetch_older_messages(
        &self,
        session_id: &str,
        before: OffsetDateTime,
        limit: usize,
    ) -> BackendResult<Vec<Message>> {
        self.apply_fetch_delay().await;
        let rows = {
            let mut sessions = self.sessions.lock();
            let slot = slot_mut(&mut sessions, session_id);
            slot.messages
                .iter()
                .rev()
                .filter(|m| m.created_at < before)
                .take(limit)
                .cloned()
                .collect::<Vec<_>>()
        };
        over_the_wire(rows)
    }

    async fn send_message(
        &self,
        session_id: &str,
        author_id: &str,
        body: &str,
    ) -> Result<Message, SendError> {
        if body.trim().is_empty() {
            return Err(SendError::Empty);
        }
        if body.len() > self.max_body_bytes {
            return Err(SendError::TooLong {
                limit: self.max_body_bytes,
            });
        }
        {
            let mut sessions = self.sessions.lock();
            if slot_mut(&mut sessions, session_id).rate_limited {
                return Err(SendError::RateLimited);
            }
        }
        let row = Message {
            id: MessageId(uuid::Uuid::new_v4().to_string()),
            session_id: session_id.to_string(),
            author_id: author_id.to_string(),
            body: body.to_string(),
            created_at: self.clock.now(),
        };
        self.insert_message_row(row.clone());
        Ok(row)
    }

    fn subscribe_messages(&self, session_id: &str) -> broadcast::Receiver<MessageEvent> {
        let mut sessions = self.sessions.lock();
        slot_mut(&mut sessions, session_id).message_tx.subscribe()
    }
}

#[async_trait]
impl RunStateBackend for MemoryBackend {
    async fn fetch_run_state(&self, session_id: &str) -> BackendResult<RunState> {
        let mut sessions = self.sessions.lock();
        Ok(slot_mut(&mut sessions, session_id).run_state.clone())
    }

    async fn write_run_state(&self, session_id: &str, write: RunWrite) -> BackendResult<RunState> {
        let now = self.clock.now();
        let mut sessions = self.sessions.lock();
        let slot = slot_mut(&mut sessions, session_id);
        if slot.reject_run_writes {
            return Err(BackendError::Unauthorized);
        }
        let previous = slot.run_state.clone();
        let state = RunState {
            version: RUN_STATE_VERSION,
            mode: write.mode,
            segment_index: write.segment_index,
            elapsed_before_pause_secs: write.elapsed_before_pause_secs,
            started_at: if write.mode == RunMode::Running {
                if write.reset_timer {
                    Some(now)
                } else {
                    previous.started_at.or(Some(now))
                }
            } else {
                None
            },
            paused_at: if write.mode == RunMode::Paused {
                Some(now)
            } else {
                None
            },
        };
        slot.run_state = state.clone();
        slot.run_writes.push(write);
        if !slot.suppress_feed {
            let _ = slot.run_tx.send(state.clone());
        }
        Ok(state)
    }

    fn subscribe_run_state(&self, session_id: &str) -> broadcast::Receiver<RunState> {
        let mut sessions = self.sessions.lock();
        slot_mut(&mut sessions, session_id).run_tx.subscribe()
    }
}
