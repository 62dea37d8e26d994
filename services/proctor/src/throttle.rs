//! Per-session emission throttling.

use crate::events::EventKind;
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Rate limiter deciding whether an event of a given kind may be emitted.
///
/// Each kind is throttled independently; suppressing one kind never blocks
/// another. The state is owned by exactly one session processor, which
/// serializes its frames, so no internal lock is needed.
#[derive(Debug)]
pub struct EventThrottle {
    window: Duration,
    last_emitted: HashMap<EventKind, Instant>,
}

impl EventThrottle {
    /// Create a throttle with the given minimum spacing between emissions.
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last_emitted: HashMap::new(),
        }
    }

    /// Check whether an event of `kind` may be emitted at `now`.
    ///
    /// On `true` the emission time is recorded, so the check and the record
    /// are a single step. The first call for a never-seen kind always
    /// passes.
    pub fn can_emit(&mut self, kind: EventKind, now: Instant) -> bool {
        match self.last_emitted.get(&kind) {
            Some(&last) if now.duration_since(last) < self.window => false,
            _ => {
                self.last_emitted.insert(kind, now);
                true
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WINDOW: Duration = Duration::from_secs(5);

    #[test]
    fn test_first_emission_always_allowed() {
        let mut throttle = EventThrottle::new(WINDOW);
        assert!(throttle.can_emit(EventKind::PhoneDetected, Instant::now()));
    }

    #[test]
    fn test_suppressed_inside_window() {
        let mut throttle = EventThrottle::new(WINDOW);
        let t0 = Instant::now();

        assert!(throttle.can_emit(EventKind::PhoneDetected, t0));
        assert!(!throttle.can_emit(EventKind::PhoneDetected, t0 + WINDOW - Duration::from_millis(1)));
    }

    #[test]
    fn test_allowed_after_window() {
        let mut throttle = EventThrottle::new(WINDOW);
        let t0 = Instant::now();

        assert!(throttle.can_emit(EventKind::PhoneDetected, t0));
        assert!(throttle.can_emit(EventKind::PhoneDetected, t0 + WINDOW + Duration::from_millis(1)));
    }

    #[test]
    fn test_kinds_throttle_independently() {
        let mut throttle = EventThrottle::new(WINDOW);
        let t0 = Instant::now();

        assert!(throttle.can_emit(EventKind::PhoneDetected, t0));
        // A different kind inside the phone window is unaffected
        assert!(throttle.can_emit(EventKind::GazeAway, t0 + Duration::from_secs(1)));
        assert!(!throttle.can_emit(EventKind::PhoneDetected, t0 + Duration::from_secs(1)));
    }

    #[test]
    fn test_suppressed_emission_does_not_reset_window() {
        let mut throttle = EventThrottle::new(WINDOW);
        let t0 = Instant::now();

        assert!(throttle.can_emit(EventKind::GazeAway, t0));
        assert!(!throttle.can_emit(EventKind::GazeAway, t0 + Duration::from_secs(3)));
        // Window still measured from t0, not from the rejected attempt
        assert!(throttle.can_emit(EventKind::GazeAway, t0 + Duration::from_secs(6)));
    }
}
