//! Integrity event types shared across the service.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use uuid::Uuid;

/// Kind of integrity signal a session processor can emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// More than one person visible in frame
    MultipleFaces,
    /// A cell phone visible in frame
    PhoneDetected,
    /// Candidate looking away from the screen
    GazeAway,
}

impl EventKind {
    /// Wire/storage name of this event kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::MultipleFaces => "multiple_faces",
            EventKind::PhoneDetected => "phone_detected",
            EventKind::GazeAway => "gaze_away",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A stored integrity event.
///
/// `event_type` is kept as a plain string so rows written by newer service
/// versions with additional kinds still load; scoring ignores types it does
/// not know.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct IntegrityEvent {
    /// Unique event ID
    pub id: Uuid,
    /// Interview session this event belongs to
    pub session_id: String,
    /// Event kind as stored (snake_case)
    pub event_type: String,
    /// Model confidence in [0, 1]
    pub confidence: f64,
    /// Seconds into the interview when the event fired
    pub elapsed_seconds: i64,
    /// When the record was created
    pub created_at: DateTime<Utc>,
}

/// A stored per-session analysis summary.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct AnalysisSummary {
    /// Interview session the summary describes
    pub session_id: String,
    /// Aggregated cheat-likelihood score in [0, 1]
    pub cheat_score: f64,
    /// Human-readable summary text
    pub summary: String,
    /// When the summary was (re)written
    pub created_at: DateTime<Utc>,
}
