//! Abstract operations the synchronization core consumes from the
//! surrounding system. Concrete transports (database SDK, RPC, …) implement
//! these traits; [`memory`] ships an in-process implementation for tests and
//! demos.

use async_trait::async_trait;
use thiserror::Error;
use time::OffsetDateTime;
use tokio::sync::broadcast;

use bonfire_core::message::{Message, MessageId, SendError};
use bonfire_core::run_state::{RunState, RunWrite};

pub mod memory;

#[derive(Debug, Clone, Error)]
pub enum BackendError {
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("not authorized for host controls")]
    Unauthorized,
    #[error("backend closed")]
    Closed,
}

pub type BackendResult<T> = Result<T, BackendError>;

/// Change-feed notification for one session's message stream.
///
/// Delivery is untrusted: events may be duplicated, reordered, or silently
/// missed across disconnects. Consumers apply every event through the same
/// idempotent merge and rely on periodic resync to heal gaps.
#[derive(Debug, Clone)]
pub enum MessageEvent {
    Inserted(Message),
    Updated(Message),
    Deleted(MessageId),
}

#[async_trait]
pub trait TranscriptBackend: Send + Sync {
    /// Most recent `limit` rows, descending by time; callers reverse.
    async fn fetch_recent_messages(
        &self,
        session_id: &str,
        limit: usize,
    ) -> BackendResult<Vec<Message>>;

    /// Up to `limit` rows strictly older than `before`, descending by time.
    async fn fetch_older_messages(
        &self,
        session_id: &str,
        before: OffsetDateTime,
        limit: usize,
    ) -> BackendResult<Vec<Message>>;

    /// Persist a message. The backend stamps `created_at` with its own clock
    /// and returns the authoritative row.
    async fn send_message(
        &self,
        session_id: &str,
        author_id: &str,
        body: &str,
    ) -> Result<Message, SendError>;

    /// Subscribe to the session's message feed. Dropping the receiver is the
    /// unsubscribe.
    fn subscribe_messages(&self, session_id: &str) -> broadcast::Receiver<MessageEvent>;
}

#[async_trait]
pub trait RunStateBackend: Send + Sync {
    /// Fetch the session's run-state row, materializing a default idle row
    /// server-side if none exists yet.
    async fn fetch_run_state(&self, session_id: &str) -> BackendResult<RunState>;

    /// Host-only authoritative write. The backend stamps the timestamps with
    /// its own clock and returns the stored row.
    async fn write_run_state(&self, session_id: &str, write: RunWrite) -> BackendResult<RunState>;

    /// Subscribe to run-state changes. Dropping the receiver unsubscribes.
    fn subscribe_run_state(&self, session_id: &str) -> broadcast::Receiver<RunState>;
}
