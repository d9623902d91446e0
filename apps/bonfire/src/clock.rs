use std::sync::Arc;
use time::OffsetDateTime;

/// Wall-clock source for derived timings. All authoritative timestamps are
/// stamped by the backend; the client only ever reads a clock to compute
/// remaining time against stored server stamps.
pub trait Clock: Send + Sync {
    fn now(&self) -> OffsetDateTime;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> OffsetDateTime {
        OffsetDateTime::now_utc()
    }
}

/// Manually advanced clock for tests and demos; pairs with the in-memory
/// backend so client and "server" share one time source.
#[derive(Debug)]
pub struct ManualClock {
    now: parking_lot::Mutex<OffsetDateTime>,
}

impl ManualClock {
    pub fn starting_at(now: OffsetDateTime) -> Arc<Self> {
        Arc::new(Self {
            now: parking_lot::Mutex::new(now),
        })
    }

    pub fn advance(&self, by: time::Duration) {
        *self.now.lock() += by;
    }

    pub fn advance_secs(&self, secs: i64) {
        self.advance(time::Duration::seconds(secs));
    }
}

impl Clock for ManualClock {
    fn now(&self) -> OffsetDateTime {
        *self.now.lock()
    }
}
