use std::env;
use std::time::Duration;

/// Tunables for the session synchronization core.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Maximum retained transcript rows (`W`). Trimming always drops the
    /// oldest end.
    pub max_window: usize,
    /// Rows fetched by the periodic resync snapshot (`S`); clamped to
    /// `max_window`.
    pub snapshot_size: usize,
    /// Rows per history page (`P`).
    pub page_size: usize,
    /// Local validation limit for outgoing message bodies, in bytes.
    pub max_message_bytes: usize,
    /// Fixed self-healing resync interval, independent of feed delivery.
    pub resync_interval: Duration,
    /// Local re-render tick for derived run timings.
    pub tick_interval: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_window: 1000,
            snapshot_size: 200,
            page_size: 50,
            max_message_bytes: 2000,
            resync_interval: Duration::from_secs(60),
            tick_interval: Duration::from_secs(1),
        }
    }
}

impl SyncConfig {
    /// Load configuration, letting the environment override the defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(window) = read_usize("BONFIRE_MAX_WINDOW") {
            config.max_window = window.max(1);
        }
        if let Some(snapshot) = read_usize("BONFIRE_SNAPSHOT_SIZE") {
            config.snapshot_size = snapshot.max(1);
        }
        if let Some(secs) = read_usize("BONFIRE_RESYNC_SECS") {
            config.resync_interval = Duration::from_secs(secs.max(1) as u64);
        }
        config.normalized()
    }

    /// Enforce `snapshot_size <= max_window`.
    pub fn normalized(mut self) -> Self {
        self.snapshot_size = self.snapshot_size.min(self.max_window);
        self
    }
}

fn read_usize(var: &str) -> Option<usize> {
    env::var(var).ok()?.parse().ok()
}
