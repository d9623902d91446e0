use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use thiserror::Error;
use time::OffsetDateTime;

/// Opaque message identifier. Ordered by plain byte comparison, which must
/// match the tie-break the backend applies to range queries — snapshot and
/// change-feed sources have to agree on ordering.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(pub String);

impl MessageId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for MessageId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for MessageId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// One transcript entry. Immutable after creation; the reconciler only ever
/// adds, replaces, or drops whole rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub session_id: String,
    pub author_id: String,
    pub body: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl Message {
    /// Canonical transcript order: ascending `(created_at, id)`. Timestamps
    /// are millisecond-coarse server stamps, so equal instants are routine and
    /// the id tie-break is load-bearing.
    pub fn cmp_order(&self, other: &Message) -> Ordering {
        self.created_at
            .cmp(&other.created_at)
            .then_with(|| self.id.cmp(&other.id))
    }
}

/// Validation taxonomy for message sends. Surfaced directly to the caller for
/// user-facing handling; never retried automatically.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SendError {
    #[error("message body is empty")]
    Empty,
    #[error("message body exceeds {limit} bytes")]
    TooLong { limit: usize },
    #[error("sender is rate limited")]
    RateLimited,
    #[error("send failed: {0}")]
    Unknown(String),
}
