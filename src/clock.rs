//! Wall-clock access and cadence alignment.

use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, TimeDelta, Utc};

/// Source of the current wall-clock time.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// The system clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to. Clones share the same time.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<DateTime<Utc>>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Arc::new(Mutex::new(start)),
        }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner) = now;
    }

    pub fn advance(&self, by: TimeDelta) {
        let mut now = self.now.lock().unwrap_or_else(PoisonError::into_inner);
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// First instant strictly after `now` on the epoch-aligned `cadence` grid.
///
/// With a 30 minute cadence this is the next minute 0 or minute 30 of the hour,
/// so a restarted process lands back on the same boundaries.
pub fn next_boundary(now: DateTime<Utc>, cadence: TimeDelta) -> DateTime<Utc> {
    let step = cadence.num_milliseconds().max(1);
    let ts = now.timestamp_millis();
    (ts.div_euclid(step) + 1)
        .checked_mul(step)
        .and_then(DateTime::from_timestamp_millis)
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// First instant strictly after `now` on the grid that starts at `tick` and
/// steps by `cadence`. Ticks missed in between are skipped.
///
/// Saturates at the latest representable time instead of overflowing.
pub fn next_tick_after(
    tick: DateTime<Utc>,
    now: DateTime<Utc>,
    cadence: TimeDelta,
) -> DateTime<Utc> {
    let step = cadence.num_milliseconds().max(1);
    let behind = (now - tick).num_milliseconds().max(0);
    (behind / step + 1)
        .checked_mul(step)
        .and_then(TimeDelta::try_milliseconds)
        .and_then(|offset| tick.checked_add_signed(offset))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}
