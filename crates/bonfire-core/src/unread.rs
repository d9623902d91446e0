use crate::message::MessageId;

/// Where the viewer's viewport sits relative to the transcript tail. Only the
/// tail/not-tail distinction matters to unread accounting; pixel offsets stay
/// in the view layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Viewport {
    #[default]
    AtTail,
    ScrolledBack,
}

/// Ephemeral per-viewer unread markers: how many foreign messages arrived
/// while scrolled back, and which one anchors the "new messages" divider.
/// Never persisted; reset on return-to-tail or own send.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct UnreadState {
    pending: usize,
    first_unseen: Option<MessageId>,
}

impl UnreadState {
    pub fn pending(&self) -> usize {
        self.pending
    }

    pub fn first_unseen(&self) -> Option<&MessageId> {
        self.first_unseen.as_ref()
    }

    /// Account for newly-seen foreign messages (already filtered to exclude
    /// the viewer's own). At the tail nothing accumulates.
    pub fn absorb(&mut self, viewport: Viewport, new_foreign: &[MessageId]) {
        if viewport == Viewport::AtTail {
            return;
        }
        for id in new_foreign {
            if self.first_unseen.is_none() {
                self.first_unseen = Some(id.clone());
            }
            self.pending += 1;
        }
    }

    pub fn clear(&mut self) {
        self.pending = 0;
        self.first_unseen = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn at_tail_stays_zero() {
        let mut unread = UnreadState::default();
        unread.absorb(Viewport::AtTail, &["m1".into(), "m2".into()]);
        assert_eq!(unread.pending(), 0);
        assert!(unread.first_unseen().is_none());
    }

    #[test]
    fn scrolled_back_counts_and_anchors_first() {
        let mut unread = UnreadState::default();
        unread.absorb(Viewport::ScrolledBack, &["m1".into()]);
        unread.absorb(Viewport::ScrolledBack, &["m2".into(), "m3".into()]);
        assert_eq!(unread.pending(), 3);
        assert_eq!(unread.first_unseen(), Some(&"m1".into()));

        unread.clear();
        assert_eq!(unread.pending(), 0);
        assert!(unread.first_unseen().is_none());
    }
}
