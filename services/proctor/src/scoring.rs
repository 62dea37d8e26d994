//! Cheat-likelihood scoring over stored integrity events.
//!
//! The score is a weighted sum of per-type contributions. Each contribution
//! grows logarithmically with the event count and saturates around ten
//! occurrences, so a burst of one signal cannot dominate the result.

use crate::events::IntegrityEvent;
use std::collections::HashMap;

/// Per-type weights. Identity and device violations count double relative
/// to attention lapses; the weights sum to 1.0 so the saturated score is
/// exactly 1.0.
pub const EVENT_WEIGHTS: [(&str, f64); 3] = [
    ("multiple_faces", 0.4),
    ("phone_detected", 0.4),
    ("gaze_away", 0.2),
];

/// Count at which a type's contribution reaches its full weight.
const SATURATION_COUNT: f64 = 10.0;

/// Compute the cheat-likelihood score for a session's events.
///
/// Returns 0.0 for an empty slice. Event types without a weight entry are
/// ignored, so rows written by newer service versions do not affect the
/// score until they are classified. The result is clamped to [0, 1] and
/// rounded to two decimal places.
pub fn compute_cheat_score(events: &[IntegrityEvent]) -> f64 {
    if events.is_empty() {
        return 0.0;
    }

    let mut counts: HashMap<&str, u64> = HashMap::new();
    for event in events {
        *counts.entry(event.event_type.as_str()).or_insert(0) += 1;
    }

    let saturation = (1.0 + SATURATION_COUNT).ln();

    let mut score = 0.0;
    for (event_type, weight) in EVENT_WEIGHTS {
        if let Some(&count) = counts.get(event_type) {
            let damped = (1.0 + count as f64).ln() / saturation;
            score += weight * damped.min(1.0);
        }
    }

    (score.min(1.0) * 100.0).round() / 100.0
}
