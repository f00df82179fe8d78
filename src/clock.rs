//! Time sources.
//!
//! Handlers never read the wall clock directly; they ask the
//! [`Clock`] held by the environment, so tests can pin and advance time.

use std::sync::{Arc, Mutex, PoisonError};

use time::{Duration, OffsetDateTime};

pub trait Clock: Send + Sync {
    fn now(&self) -> OffsetDateTime;
}

/// The system clock, in UTC.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> OffsetDateTime {
        OffsetDateTime::now_utc()
    }
}

/// A clock that only moves when told to. Clones share the same time.
#[derive(Clone, Debug)]
pub struct MockClock {
    current: Arc<Mutex<OffsetDateTime>>,
}

impl MockClock {
    pub fn new(start: OffsetDateTime) -> Self {
        Self {
            current: Arc::new(Mutex::new(start)),
        }
    }

    pub fn advance(&self, duration: Duration) {
        let mut current = self.current.lock().unwrap_or_else(PoisonError::into_inner);
        *current += duration;
    }

    pub fn set(&self, t: OffsetDateTime) {
        *self.current.lock().unwrap_or_else(PoisonError::into_inner) = t;
    }
}

impl Clock for MockClock {
    fn now(&self) -> OffsetDateTime {
        *self.current.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mock_clock_moves_only_when_told() {
        let start = OffsetDateTime::from_unix_timestamp(1_704_067_200);
        let clock = MockClock::new(start);
        let shared = clock.clone();

        assert_eq!(clock.now(), start);

        shared.advance(Duration::hours(12));
        assert_eq!(clock.now(), start + Duration::hours(12));

        clock.set(start);
        assert_eq!(shared.now(), start);
    }
}
