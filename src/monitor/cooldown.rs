//! Alert cooldown tracking.

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::Mutex;

/// Tracks when each rule last fired and suppresses re-fires inside the
/// cooldown window. Owned by the monitor loop; no external mutation.
#[derive(Debug)]
pub struct CooldownTracker {
    window: Duration,
    last_fired_ms: Mutex<HashMap<String, i64>>,
}

impl CooldownTracker {
    /// Tracker with the given window.
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last_fired_ms: Mutex::new(HashMap::new()),
        }
    }

    /// Whether the rule may fire at `now_ms`; records the fire when yes.
    pub fn try_fire(&self, rule_id: &str, now_ms: i64) -> bool {
        let mut last = self.last_fired_ms.lock();
        let ready = last
            .get(rule_id)
            .map_or(true, |fired| now_ms - fired >= self.window.as_millis() as i64);
        if ready {
            last.insert(rule_id.to_string(), now_ms);
        }
        ready
    }

    /// When the rule last fired, if ever.
    pub fn last_fired(&self, rule_id: &str) -> Option<i64> {
        self.last_fired_ms.lock().get(rule_id).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fires_once_per_window() {
        let tracker = CooldownTracker::new(Duration::from_millis(1_000));
        assert!(tracker.try_fire("orphan", 10_000));
        assert!(!tracker.try_fire("orphan", 10_500));
        assert!(!tracker.try_fire("orphan", 10_999));
        assert!(tracker.try_fire("orphan", 11_000));
    }

    #[test]
    fn test_rules_track_independently() {
        let tracker = CooldownTracker::new(Duration::from_millis(1_000));
        assert!(tracker.try_fire("orphan", 10_000));
        assert!(tracker.try_fire("spof", 10_001));
        assert!(!tracker.try_fire("orphan", 10_002));
    }

    #[test]
    fn test_suppressed_fire_does_not_extend_window() {
        let tracker = CooldownTracker::new(Duration::from_millis(1_000));
        assert!(tracker.try_fire("orphan", 10_000));
        assert!(!tracker.try_fire("orphan", 10_900));
        // The suppressed attempt must not push the window forward.
        assert!(tracker.try_fire("orphan", 11_000));
    }
}
