//! InterviewShield Proctoring Service
//!
//! Real-time interview-proctoring backend. Candidates stream video frames
//! over a per-session websocket; the service samples those frames, asks a
//! remote vision model whether multiple people or a phone are visible and
//! whether the candidate is looking away, and records throttled integrity
//! events. A separate analyse operation aggregates a session's events into
//! a bounded cheat-likelihood score and a recruiter-facing summary.
//!
//! ## Features
//!
//! - **Sequential Frame Processing**: one frame in flight per session, two
//!   remote calls per frame (objects batched into one call, then gaze),
//!   respecting the vision provider's per-caller rate limit
//! - **Throttled Event Emission**: per-session, per-type minimum spacing so
//!   a sustained violation stores one event per window instead of one per
//!   frame
//! - **Deterministic Scoring**: weighted, log-dampened event counts,
//!   clamped to [0, 1]
//! - **Graceful Degradation**: every remote call and store write sits
//!   behind its own failure boundary; no failure terminates the service
//!
//! ## Architecture
//!
//! ```text
//! WebSocket                 Remote Models              PostgreSQL
//! ┌──────────────┐         ┌──────────────┐          ┌──────────────────┐
//! │ /ws/video/:id│         │ detect       │          │ ai_events        │
//! └──────┬───────┘         │ answer_yes_no│          │ analysis_        │
//!        │                 └──────▲───────┘          │   summaries      │
//!        ▼                        │                  └───────▲──────────┘
//! ┌──────────────┐         ┌──────┴───────┐                 │
//! │ Session      │────────▶│ SessionFrame │─────────────────┘
//! │ Registry     │         │ Processor    │   (throttled events)
//! └──────────────┘         └──────────────┘
//!
//! ┌──────────────┐         ┌──────────────┐          ┌──────────────┐
//! │ POST         │────────▶│ Score        │─────────▶│ Summary      │
//! │ /analysis/:id│         │ Aggregator   │          │ Generator    │
//! └──────────────┘         └──────────────┘          └──────────────┘
//! ```

pub mod api;
pub mod config;
pub mod events;
pub mod frame_decoder;
pub mod scoring;
pub mod session;
pub mod store;
pub mod summarizer;
pub mod throttle;
pub mod vision;

// Re-export main types
pub use api::{AnalysisResponse, AppState};
pub use config::Config;
pub use events::{AnalysisSummary, EventKind, IntegrityEvent};
pub use frame_decoder::{DecodeError, PixelBuffer};
pub use scoring::compute_cheat_score;
pub use session::{ProcessorSettings, SessionFrameProcessor, SessionRegistry};
pub use store::{EventSink, EventStore};
pub use summarizer::{GeminiClient, SummaryGenerator, TextModel};
pub use throttle::EventThrottle;
pub use vision::{Detection, MoondreamClient, VisionModel};
