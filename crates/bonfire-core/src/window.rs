use std::cmp::Ordering;
use std::collections::HashSet;

use crate::message::{Message, MessageId};

/// What a single-row merge did. Duplicate feed delivery shows up as
/// `Replaced`; callers use `Inserted` to drive unread accounting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    Inserted,
    Replaced,
}

/// The canonical, deduplicated, time-ordered message window for one session.
///
/// All merges are deterministic and idempotent: applying the same input twice
/// yields the same window as applying it once, regardless of interleaving
/// with other sources. The window is capped at `cap` rows and only ever trims
/// from the oldest end, so it stays contiguous.
#[derive(Debug, Clone, PartialEq)]
pub struct TranscriptWindow {
    cap: usize,
    messages: Vec<Message>,
}

impl TranscriptWindow {
    pub fn new(cap: usize) -> Self {
        Self {
            cap: cap.max(1),
            messages: Vec::new(),
        }
    }

    pub fn cap(&self) -> usize {
        self.cap
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn oldest(&self) -> Option<&Message> {
        self.messages.first()
    }

    pub fn newest(&self) -> Option<&Message> {
        self.messages.last()
    }

    pub fn get(&self, id: &MessageId) -> Option<&Message> {
        self.messages.iter().find(|m| &m.id == id)
    }

    pub fn contains(&self, id: &MessageId) -> bool {
        self.get(id).is_some()
    }

    /// Merge one row, typically from the change feed. If the id is already
    /// present the row is replaced in place (absorbs duplicate delivery);
    /// otherwise it is inserted at its canonical position.
    pub fn merge_one(&mut self, incoming: Message) -> MergeOutcome {
        if let Some(pos) = self.messages.iter().position(|m| m.id == incoming.id) {
            self.messages[pos] = incoming;
            // A replacement may carry a corrected server timestamp.
            self.messages.sort_by(Message::cmp_order);
            self.trim_oldest();
            MergeOutcome::Replaced
        } else {
            let at = self
                .messages
                .partition_point(|m| m.cmp_order(&incoming) == Ordering::Less);
            self.messages.insert(at, incoming);
            self.trim_oldest();
            MergeOutcome::Inserted
        }
    }

    /// Reconcile an authoritative snapshot into the window.
    ///
    /// The snapshot owns the time range it covers: local rows inside that
    /// range survive only if the snapshot still carries them. Local rows
    /// strictly older than the snapshot's oldest row are kept verbatim, and
    /// local rows strictly newer than its newest row are kept too — those are
    /// messages the snapshot has not caught up to yet, typically a
    /// just-sent-by-self row racing a lagging fetch.
    ///
    /// Returns the ids that were not previously known, in canonical order,
    /// for unread classification.
    pub fn reconcile_snapshot(&mut self, mut snapshot: Vec<Message>) -> Vec<MessageId> {
        snapshot.sort_by(Message::cmp_order);
        snapshot.dedup_by(|a, b| a.id == b.id);
        let (Some(oldest), Some(newest)) = (snapshot.first().cloned(), snapshot.last().cloned())
        else {
            // Nothing authoritative arrived; local knowledge stands.
            return Vec::new();
        };

        let known_before: HashSet<MessageId> =
            self.messages.iter().map(|m| m.id.clone()).collect();
        let snapshot_ids: HashSet<MessageId> = snapshot.iter().map(|m| m.id.clone()).collect();

        let mut merged: Vec<Message> = Vec::with_capacity(self.messages.len() + snapshot.len());
        for row in self.messages.drain(..) {
            if snapshot_ids.contains(&row.id) {
                continue;
            }
            let before = row.cmp_order(&oldest) == Ordering::Less;
            let after = row.cmp_order(&newest) == Ordering::Greater;
            if before || after {
                merged.push(row);
            }
        }
        merged.extend(snapshot);
        merged.sort_by(Message::cmp_order);
        self.messages = merged;
        self.trim_oldest();

        self.messages
            .iter()
            .filter(|m| !known_before.contains(&m.id))
            .map(|m| m.id.clone())
            .collect()
    }

    /// Splice strictly-older history rows in front of the window. The tail is
    /// untouched; rows at or after the current oldest row are ignored, as are
    /// ids already present. Returns how many rows were spliced.
    pub fn prepend_history(&mut self, older: Vec<Message>) -> usize {
        let Some(cutoff) = self.messages.first().cloned() else {
            return 0;
        };
        let mut incoming: Vec<Message> = older
            .into_iter()
            .filter(|m| m.cmp_order(&cutoff) == Ordering::Less && !self.contains(&m.id))
            .collect();
        incoming.sort_by(Message::cmp_order);
        incoming.dedup_by(|a, b| a.id == b.id);
        let spliced = incoming.len();
        if spliced == 0 {
            return 0;
        }
        incoming.append(&mut self.messages);
        self.messages = incoming;
        self.trim_oldest();
        spliced
    }

    /// Apply a delete notification. Returns whether anything was removed.
    pub fn remove_by_id(&mut self, id: &MessageId) -> bool {
        let before = self.messages.len();
        self.messages.retain(|m| &m.id != id);
        self.messages.len() != before
    }

    fn trim_oldest(&mut self) {
        if self.messages.len() > self.cap {
            let excess = self.messages.len() - self.cap;
            self.messages.drain(..excess);
        }
    }
}
