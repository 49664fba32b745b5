//! Wall-clock time source
//!
//! Schedules are computed in local wall-clock time. The engine never reads
//! the system clock directly so tests can drive time with [`MockClock`].

use chrono::{Duration, Local, NaiveDateTime};
use parking_lot::RwLock;
use std::sync::Arc;

pub trait Clock: Send + Sync + 'static {
    fn now(&self) -> NaiveDateTime;
}

pub type SharedClock = Arc<dyn Clock>;

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        Local::now().naive_local()
    }
}

/// A controllable clock for tests
#[derive(Debug, Clone)]
pub struct MockClock {
    current: Arc<RwLock<NaiveDateTime>>,
}

impl MockClock {
    pub fn at(time: NaiveDateTime) -> Self {
        Self {
            current: Arc::new(RwLock::new(time)),
        }
    }

    pub fn set(&self, time: NaiveDateTime) {
        *self.current.write() = time;
    }

    pub fn advance(&self, duration: Duration) {
        let mut current = self.current.write();
        *current += duration;
    }

    pub fn advance_seconds(&self, seconds: i64) {
        self.advance(Duration::seconds(seconds));
    }

    pub fn advance_minutes(&self, minutes: i64) {
        self.advance(Duration::minutes(minutes));
    }
}

impl Clock for MockClock {
    fn now(&self) -> NaiveDateTime {
        *self.current.read()
    }
}
