use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::{debug, warn};

use bonfire_core::message::{Message, MessageId, SendError};
use bonfire_core::unread::{UnreadState, Viewport};
use bonfire_core::window::{MergeOutcome, TranscriptWindow};

use crate::backend::{BackendResult, MessageEvent, TranscriptBackend};
use crate::config::SyncConfig;
use crate::session::{ActiveSession, SessionContext, SessionStamp};

/// Observable transcript state: the canonical window plus the viewer's
/// unread markers. Cheap to clone; the message slice is shared.
#[derive(Debug, Clone)]
pub struct TranscriptView {
    pub messages: Arc<[Message]>,
    pub pending: usize,
    pub first_unseen: Option<MessageId>,
    pub viewport: Viewport,
}

impl Default for TranscriptView {
    fn default() -> Self {
        Self {
            messages: Arc::from(Vec::new()),
            pending: 0,
            first_unseen: None,
            viewport: Viewport::AtTail,
        }
    }
}

/// Result of a history-page request. `Skipped` covers both backpressure
/// rejections (a page already in flight, empty window) and stale completions;
/// neither is an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageOutcome {
    Skipped,
    Loaded { spliced: usize, has_more: bool },
}

struct Shared {
    window: TranscriptWindow,
    unread: UnreadState,
    viewport: Viewport,
}

#[derive(Default)]
struct PagerState {
    in_flight: bool,
    next_seq: u64,
}

/// Maintains the canonical transcript for one session from three untrusted
/// inputs: snapshot fetches, change-feed events, and history pages. Every
/// write path funnels through the pure window merges, so interleaving is
/// safe regardless of arrival order.
pub struct TranscriptController {
    backend: Arc<dyn TranscriptBackend>,
    ctx: SessionContext,
    active: Arc<ActiveSession>,
    stamp: SessionStamp,
    config: SyncConfig,
    shared: Mutex<Shared>,
    view_tx: watch::Sender<TranscriptView>,
    pager: Mutex<PagerState>,
    resync_in_flight: AtomicBool,
}

impl TranscriptController {
    pub fn new(
        backend: Arc<dyn TranscriptBackend>,
        ctx: SessionContext,
        active: Arc<ActiveSession>,
        stamp: SessionStamp,
        config: SyncConfig,
    ) -> Arc<Self> {
        let (view_tx, _) = watch::channel(TranscriptView::default());
        Arc::new(Self {
            backend,
            active,
            stamp,
            shared: Mutex::new(Shared {
                window: TranscriptWindow::new(config.max_window),
                unread: UnreadState::default(),
                viewport: Viewport::AtTail,
            }),
            view_tx,
            pager: Mutex::new(PagerState::default()),
            resync_in_flight: AtomicBool::new(false),
            ctx,
            config,
        })
    }

    pub fn subscribe(&self) -> watch::Receiver<TranscriptView> {
        self.view_tx.subscribe()
    }

    pub fn view(&self) -> TranscriptView {
        self.view_tx.borrow().clone()
    }

    /// Fetch the recent snapshot and reconcile it in. Used for the initial
    /// load and by every resync tick; errors propagate to the caller.
    pub async fn refresh(&self) -> BackendResult<()> {
        let mut rows = self
            .backend
            .fetch_recent_messages(&self.ctx.session_id, self.config.snapshot_size)
            .await?;
        if !self.active.is_current(&self.stamp) {
            debug!(session = %self.stamp.session_id(), "dropping snapshot for superseded session");
            return Ok(());
        }
        rows.reverse();
        let mut shared = self.shared.lock();
        let newly = shared.window.reconcile_snapshot(rows);
        let foreign: Vec<MessageId> = newly
            .into_iter()
            .filter(|id| {
                shared
                    .window
                    .get(id)
                    .map(|m| m.author_id != self.ctx.viewer_id)
                    .unwrap_or(false)
            })
            .collect();
        let viewport = shared.viewport;
        shared.unread.absorb(viewport, &foreign);
        self.publish(&shared);
        Ok(())
    }

    /// Self-healing resync. Duplicate triggers while one is running are
    /// dropped, and failures wait for the next tick rather than retrying.
    pub async fn resync(&self) {
        if self
            .resync_in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("transcript resync already running, dropping trigger");
            return;
        }
        if let Err(err) = self.refresh().await {
            warn!(session = %self.stamp.session_id(), error = %err, "transcript resync failed");
        }
        self.resync_in_flight.store(false, Ordering::SeqCst);
    }

    /// Apply one change-feed notification. Idempotent; duplicates and
    /// reordering collapse inside the window merge.
    pub fn apply_feed_event(&self, event: MessageEvent) {
        if !self.active.is_current(&self.stamp) {
            return;
        }
        let mut shared = self.shared.lock();
        match event {
            MessageEvent::Inserted(row) | MessageEvent::Updated(row) => {
                if row.session_id != self.ctx.session_id {
                    debug!(got = %row.session_id, "dropping feed row for another session");
                    return;
                }
                let foreign = row.author_id != self.ctx.viewer_id;
                let id = row.id.clone();
                let outcome = shared.window.merge_one(row);
                if outcome == MergeOutcome::Inserted && foreign {
                    let viewport = shared.viewport;
                    shared.unread.absorb(viewport, std::slice::from_ref(&id));
                }
            }
            MessageEvent::Deleted(id) => {
                shared.window.remove_by_id(&id);
            }
        }
        self.publish(&shared);
    }

    /// Validate and send a message, then merge the authoritative row so the
    /// sender sees it immediately without waiting for feed delivery. Sending
    /// clears unread markers.
    pub async fn send(&self, body: &str) -> Result<Message, SendError> {
        let trimmed = body.trim();
        if trimmed.is_empty() {
            return Err(SendError::Empty);
        }
        if trimmed.len() > self.config.max_message_bytes {
            return Err(SendError::TooLong {
                limit: self.config.max_message_bytes,
            });
        }
        let row = self
            .backend
            .send_message(&self.ctx.session_id, &self.ctx.viewer_id, trimmed)
            .await?;
        if self.active.is_current(&self.stamp) {
            let mut shared = self.shared.lock();
            shared.window.merge_one(row.clone());
            shared.unread.clear();
            self.publish(&shared);
        }
        Ok(row)
    }

    /// Load one page of history strictly older than the current window.
    ///
    /// No-ops (not errors) when a page is already in flight or the window is
    /// empty. Fetches `page_size + 1` rows to detect whether more remain and
    /// splices at most `page_size`.
    pub async fn load_older(&self) -> BackendResult<PageOutcome> {
        let cursor = {
            let shared = self.shared.lock();
            match shared.window.oldest() {
                Some(oldest) => oldest.created_at,
                None => return Ok(PageOutcome::Skipped),
            }
        };
        let my_seq = {
            let mut pager = self.pager.lock();
            if pager.in_flight {
                debug!("history page already in flight, skipping");
                return Ok(PageOutcome::Skipped);
            }
            pager.in_flight = true;
            pager.next_seq += 1;
            pager.next_seq
        };

        let page = self.config.page_size;
        let result = self
            .backend
            .fetch_older_messages(&self.ctx.session_id, cursor, page + 1)
            .await;

        let stale = {
            let mut pager = self.pager.lock();
            pager.in_flight = false;
            !self.active.is_current(&self.stamp) || pager.next_seq != my_seq
        };
        let mut rows = result?;
        if stale {
            debug!(session = %self.stamp.session_id(), "dropping stale history page");
            return Ok(PageOutcome::Skipped);
        }

        let has_more = rows.len() > page;
        rows.truncate(page);
        rows.reverse();
        let mut shared = self.shared.lock();
        let spliced = shared.window.prepend_history(rows);
        self.publish(&shared);
        Ok(PageOutcome::Loaded { spliced, has_more })
    }

    /// Report where the viewer's viewport is. Returning to the tail clears
    /// unread markers.
    pub fn set_viewport(&self, viewport: Viewport) {
        let mut shared = self.shared.lock();
        shared.viewport = viewport;
        if viewport == Viewport::AtTail {
            shared.unread.clear();
        }
        self.publish(&shared);
    }

    fn publish(&self, shared: &Shared) {
        self.view_tx.send_replace(TranscriptView {
            messages: Arc::from(shared.window.messages()),
            pending: shared.unread.pending(),
            first_unseen: shared.unread.first_unseen().cloned(),
            viewport: shared.viewport,
        });
    }
}
