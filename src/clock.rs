//! Monotonic wall clock for change timestamps.

use std::sync::atomic::{AtomicI64, Ordering};

use chrono::Utc;

/// Wall clock that never goes backwards.
///
/// Change appends are totally ordered per target by `detected_at`; if the
/// local clock regresses, the next reading is `last + 1` instead.
#[derive(Debug, Default)]
pub struct MonotonicClock {
    last_ms: AtomicI64,
}

impl MonotonicClock {
    /// Create a clock starting at the current wall time.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current epoch-millisecond reading, guaranteed strictly greater than
    /// any previous reading from this clock.
    pub fn now_ms(&self) -> i64 {
        let wall = Utc::now().timestamp_millis();
        let mut last = self.last_ms.load(Ordering::Relaxed);
        loop {
            let next = wall.max(last + 1);
            match self.last_ms.compare_exchange_weak(
                last,
                next,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => return next,
                Err(observed) => last = observed,
            }
        }
    }
}

/// One-off wall reading for fields that do not need the monotonic guard.
pub fn wall_ms() -> i64 {
    Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_readings_strictly_increase() {
        let clock = MonotonicClock::new();
        let mut previous = clock.now_ms();
        for _ in 0..1000 {
            let next = clock.now_ms();
            assert!(next > previous);
            previous = next;
        }
    }
}
