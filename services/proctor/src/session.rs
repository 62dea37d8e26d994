//! Per-session frame processing.
//!
//! One [`SessionFrameProcessor`] exists per live interview session. Frames
//! are processed strictly sequentially per session: decode, one object
//! detection call, one gaze question call, in that order, with both remote
//! calls finished before the next frame is accepted. The remote capability
//! is rate-limited per caller, so overlapping calls would blow the budget.
//!
//! Each remote call sits behind its own failure boundary: a failed detection
//! never cancels the gaze check, and vice versa. A missed frame is
//! acceptable loss given continuous sampling.

use crate::config::ProcessingConfig;
use crate::events::EventKind;
use crate::frame_decoder::{self, PixelBuffer};
use crate::store::EventSink;
use crate::throttle::EventThrottle;
use crate::vision::VisionModel;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

const LABEL_PERSON: &str = "person";
const LABEL_CELL_PHONE: &str = "cell phone";

const GAZE_QUESTION: &str =
    "Is the person looking away from the screen? Answer only yes or no.";

// Fixed confidence policy per event kind
const MULTIPLE_FACES_CONFIDENCE: f64 = 0.9;
const GAZE_AWAY_CONFIDENCE: f64 = 0.75;
const PHONE_FALLBACK_CONFIDENCE: f64 = 0.85;

/// Runtime settings for session processors.
#[derive(Debug, Clone)]
pub struct ProcessorSettings {
    /// Minimum spacing between emissions of the same event kind
    pub throttle_window: Duration,
}

impl From<&ProcessingConfig> for ProcessorSettings {
    fn from(config: &ProcessingConfig) -> Self {
        Self {
            throttle_window: config.throttle_window(),
        }
    }
}

/// Processes one session's inbound frames and emits integrity events.
pub struct SessionFrameProcessor {
    session_id: String,
    vision: Arc<dyn VisionModel>,
    events: Arc<dyn EventSink>,
    throttle: EventThrottle,
    created_at: Instant,
}

impl SessionFrameProcessor {
    /// Create a processor for a new session. The elapsed clock starts here.
    pub fn new(
        session_id: String,
        vision: Arc<dyn VisionModel>,
        events: Arc<dyn EventSink>,
        settings: &ProcessorSettings,
    ) -> Self {
        Self {
            session_id,
            vision,
            events,
            throttle: EventThrottle::new(settings.throttle_window),
            created_at: Instant::now(),
        }
    }

    /// Process one encoded frame.
    ///
    /// Undecodable frames are dropped silently. Exactly two remote calls are
    /// made per decodable frame: objects first, then gaze.
    pub async fn process_frame(&mut self, encoded: &[u8]) {
        metrics::counter!("proctor.frames.received").increment(1);

        let frame = match frame_decoder::decode(encoded) {
            Ok(frame) => frame,
            Err(e) => {
                metrics::counter!("proctor.frames.dropped").increment(1);
                debug!(session_id = %self.session_id, error = %e, "Dropped undecodable frame");
                return;
            }
        };

        self.check_objects(&frame).await;
        self.check_gaze(&frame).await;
    }

    /// One detection call covering all configured labels.
    async fn check_objects(&mut self, frame: &PixelBuffer) {
        let detections = match self.vision.detect(frame).await {
            Ok(detections) => detections,
            Err(e) => {
                warn!(session_id = %self.session_id, error = %e, "Object detection failed");
                return;
            }
        };

        let persons = detections
            .iter()
            .filter(|d| d.label == LABEL_PERSON)
            .count();
        if persons > 1 && self.throttle.can_emit(EventKind::MultipleFaces, Instant::now()) {
            info!(session_id = %self.session_id, persons, "Multiple people detected");
            self.emit(EventKind::MultipleFaces, MULTIPLE_FACES_CONFIDENCE)
                .await;
        }

        let phone = detections.iter().find(|d| d.label == LABEL_CELL_PHONE);
        if let Some(phone) = phone {
            if self.throttle.can_emit(EventKind::PhoneDetected, Instant::now()) {
                info!(session_id = %self.session_id, "Phone detected");
                self.emit(
                    EventKind::PhoneDetected,
                    phone.confidence.unwrap_or(PHONE_FALLBACK_CONFIDENCE),
                )
                .await;
            }
        }
    }

    /// One visual-question-answering call about gaze direction.
    async fn check_gaze(&mut self, frame: &PixelBuffer) {
        let answer = match self.vision.answer_yes_no(frame, GAZE_QUESTION).await {
            Ok(answer) => answer,
            Err(e) => {
                warn!(session_id = %self.session_id, error = %e, "Gaze check failed");
                return;
            }
        };

        if answer.trim().to_lowercase().starts_with("yes")
            && self.throttle.can_emit(EventKind::GazeAway, Instant::now())
        {
            info!(session_id = %self.session_id, "Gaze away detected");
            self.emit(EventKind::GazeAway, GAZE_AWAY_CONFIDENCE).await;
        }
    }

    async fn emit(&self, kind: EventKind, confidence: f64) {
        let elapsed_seconds = self.created_at.elapsed().as_secs() as i64;

        if let Err(e) = self
            .events
            .insert_event(&self.session_id, kind, confidence, elapsed_seconds)
            .await
        {
            error!(
                session_id = %self.session_id,
                kind = %kind,
                error = %e,
                "Failed to persist integrity event"
            );
            return;
        }

        metrics::counter!("proctor.events.emitted", "kind" => kind.as_str()).increment(1);
        debug!(
            session_id = %self.session_id,
            kind = %kind,
            confidence,
            elapsed_seconds,
            "Integrity event emitted"
        );
    }
}

/// Shared handle to a session processor. The mutex keeps frame processing
/// sequential even if two connections feed the same session id.
pub type SessionHandle = Arc<Mutex<SessionFrameProcessor>>;

/// Registry of live sessions.
///
/// The map is the only state shared across sessions; everything else is
/// owned per processor.
pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, SessionHandle>>,
    vision: Arc<dyn VisionModel>,
    events: Arc<dyn EventSink>,
    settings: ProcessorSettings,
}

impl SessionRegistry {
    pub fn new(
        vision: Arc<dyn VisionModel>,
        events: Arc<dyn EventSink>,
        settings: ProcessorSettings,
    ) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            vision,
            events,
            settings,
        }
    }

    /// Get the processor for a session, creating it on first contact.
    pub fn get_or_create(&self, session_id: &str) -> SessionHandle {
        if let Some(handle) = self.sessions.read().get(session_id) {
            return handle.clone();
        }

        let mut sessions = self.sessions.write();
        // Re-check under the write lock; another connection may have won
        if let Some(handle) = sessions.get(session_id) {
            return handle.clone();
        }

        let processor = SessionFrameProcessor::new(
            session_id.to_string(),
            self.vision.clone(),
            self.events.clone(),
            &self.settings,
        );
        let handle: SessionHandle = Arc::new(Mutex::new(processor));
        sessions.insert(session_id.to_string(), handle.clone());

        info!(
            session_id = %session_id,
            active_sessions = sessions.len(),
            "Session registered"
        );
        metrics::gauge!("proctor.sessions.active").set(sessions.len() as f64);

        handle
    }

    /// Drop a session's processor and throttle state.
    pub fn remove(&self, session_id: &str) {
        let mut sessions = self.sessions.write();
        if sessions.remove(session_id).is_some() {
            info!(
                session_id = %session_id,
                active_sessions = sessions.len(),
                "Session removed"
            );
            metrics::gauge!("proctor.sessions.active").set(sessions.len() as f64);
        }
    }

    /// Number of live sessions.
    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vision::{Detection, VisionError};
    use async_trait::async_trait;
    use image::{DynamicImage, ImageFormat, RgbImage};
    use std::io::Cursor;
    use std::sync::Mutex as StdMutex;

    fn encode_test_frame() -> Vec<u8> {
        let img = RgbImage::from_pixel(8, 8, image::Rgb([10, 20, 30]));
        let mut out = Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(img)
            .write_to(&mut out, ImageFormat::Png)
            .unwrap();
        out.into_inner()
    }

    fn detection(label: &str, confidence: Option<f64>) -> Detection {
        Detection {
            label: label.to_string(),
            confidence,
            bbox: None,
        }
    }

    fn test_settings() -> ProcessorSettings {
        ProcessorSettings {
            throttle_window: Duration::from_secs(5),
        }
    }

    /// Records every inserted event.
    #[derive(Default)]
    struct RecordingSink {
        inserted: StdMutex<Vec<(String, EventKind, f64, i64)>>,
    }

    #[async_trait]
    impl EventSink for RecordingSink {
        async fn insert_event(
            &self,
            session_id: &str,
            kind: EventKind,
            confidence: f64,
            elapsed_seconds: i64,
        ) -> anyhow::Result<()> {
            self.inserted.lock().unwrap().push((
                session_id.to_string(),
                kind,
                confidence,
                elapsed_seconds,
            ));
            Ok(())
        }
    }

    /// Always fails to persist.
    struct FailingSink;

    #[async_trait]
    impl EventSink for FailingSink {
        async fn insert_event(
            &self,
            _session_id: &str,
            _kind: EventKind,
            _confidence: f64,
            _elapsed_seconds: i64,
        ) -> anyhow::Result<()> {
            anyhow::bail!("store unavailable")
        }
    }

    /// Returns fixed detections and a fixed answer; counts calls.
    struct StaticVision {
        detections: Result<Vec<Detection>, ()>,
        answer: Result<String, ()>,
        detect_calls: StdMutex<u32>,
        gaze_calls: StdMutex<u32>,
    }

    impl StaticVision {
        fn new(detections: Result<Vec<Detection>, ()>, answer: Result<String, ()>) -> Self {
            Self {
                detections,
                answer,
                detect_calls: StdMutex::new(0),
                gaze_calls: StdMutex::new(0),
            }
        }
    }

    fn api_error() -> VisionError {
        VisionError::Api {
            status: 500,
            message: "internal".to_string(),
        }
    }

    #[async_trait]
    impl VisionModel for StaticVision {
        async fn detect(&self, _frame: &PixelBuffer) -> Result<Vec<Detection>, VisionError> {
            *self.detect_calls.lock().unwrap() += 1;
            self.detections.clone().map_err(|_| api_error())
        }

        async fn answer_yes_no(
            &self,
            _frame: &PixelBuffer,
            _question: &str,
        ) -> Result<String, VisionError> {
            *self.gaze_calls.lock().unwrap() += 1;
            self.answer.clone().map_err(|_| api_error())
        }
    }

    fn create_processor(
        vision: Arc<dyn VisionModel>,
        sink: Arc<dyn EventSink>,
    ) -> SessionFrameProcessor {
        SessionFrameProcessor::new("session-1".to_string(), vision, sink, &test_settings())
    }

    #[tokio::test]
    async fn test_multiple_persons_emit_multiple_faces() {
        let vision = Arc::new(StaticVision::new(
            Ok(vec![
                detection(LABEL_PERSON, Some(0.95)),
                detection(LABEL_PERSON, Some(0.7)),
            ]),
            Ok("No.".to_string()),
        ));
        let sink = Arc::new(RecordingSink::default());
        let mut processor = create_processor(vision, sink.clone());

        processor.process_frame(&encode_test_frame()).await;

        let inserted = sink.inserted.lock().unwrap();
        assert_eq!(inserted.len(), 1);
        assert_eq!(inserted[0].1, EventKind::MultipleFaces);
        assert_eq!(inserted[0].2, MULTIPLE_FACES_CONFIDENCE);
        assert_eq!(inserted[0].0, "session-1");
        assert!(inserted[0].3 >= 0);
    }

    #[tokio::test]
    async fn test_single_person_no_event() {
        let vision = Arc::new(StaticVision::new(
            Ok(vec![detection(LABEL_PERSON, Some(0.95))]),
            Ok("no".to_string()),
        ));
        let sink = Arc::new(RecordingSink::default());
        let mut processor = create_processor(vision, sink.clone());

        processor.process_frame(&encode_test_frame()).await;

        assert!(sink.inserted.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_phone_uses_detection_confidence() {
        let vision = Arc::new(StaticVision::new(
            Ok(vec![
                detection(LABEL_PERSON, Some(0.95)),
                detection(LABEL_CELL_PHONE, Some(0.67)),
            ]),
            Ok("no".to_string()),
        ));
        let sink = Arc::new(RecordingSink::default());
        let mut processor = create_processor(vision, sink.clone());

        processor.process_frame(&encode_test_frame()).await;

        let inserted = sink.inserted.lock().unwrap();
        assert_eq!(inserted.len(), 1);
        assert_eq!(inserted[0].1, EventKind::PhoneDetected);
        assert_eq!(inserted[0].2, 0.67);
    }

    #[tokio::test]
    async fn test_phone_confidence_fallback() {
        let vision = Arc::new(StaticVision::new(
            Ok(vec![detection(LABEL_CELL_PHONE, None)]),
            Ok("no".to_string()),
        ));
        let sink = Arc::new(RecordingSink::default());
        let mut processor = create_processor(vision, sink.clone());

        processor.process_frame(&encode_test_frame()).await;

        let inserted = sink.inserted.lock().unwrap();
        assert_eq!(inserted.len(), 1);
        assert_eq!(inserted[0].2, PHONE_FALLBACK_CONFIDENCE);
    }

    #[tokio::test]
    async fn test_gaze_away_on_yes_answer() {
        let vision = Arc::new(StaticVision::new(
            Ok(vec![]),
            Ok("  Yes, towards the side of the room.".to_string()),
        ));
        let sink = Arc::new(RecordingSink::default());
        let mut processor = create_processor(vision, sink.clone());

        processor.process_frame(&encode_test_frame()).await;

        let inserted = sink.inserted.lock().unwrap();
        assert_eq!(inserted.len(), 1);
        assert_eq!(inserted[0].1, EventKind::GazeAway);
        assert_eq!(inserted[0].2, GAZE_AWAY_CONFIDENCE);
    }

    #[tokio::test]
    async fn test_no_gaze_event_on_no_answer() {
        let vision = Arc::new(StaticVision::new(Ok(vec![]), Ok("No.".to_string())));
        let sink = Arc::new(RecordingSink::default());
        let mut processor = create_processor(vision, sink.clone());

        processor.process_frame(&encode_test_frame()).await;

        assert!(sink.inserted.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_undecodable_frame_makes_no_remote_calls() {
        let vision = Arc::new(StaticVision::new(Ok(vec![]), Ok("no".to_string())));
        let sink = Arc::new(RecordingSink::default());
        let mut processor = create_processor(vision.clone(), sink.clone());

        processor.process_frame(b"not an image").await;
        processor.process_frame(&[]).await;

        assert_eq!(*vision.detect_calls.lock().unwrap(), 0);
        assert_eq!(*vision.gaze_calls.lock().unwrap(), 0);
        assert!(sink.inserted.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_detection_failure_does_not_blind_gaze_check() {
        let vision = Arc::new(StaticVision::new(Err(()), Ok("yes".to_string())));
        let sink = Arc::new(RecordingSink::default());
        let mut processor = create_processor(vision.clone(), sink.clone());

        processor.process_frame(&encode_test_frame()).await;

        assert_eq!(*vision.gaze_calls.lock().unwrap(), 1);
        let inserted = sink.inserted.lock().unwrap();
        assert_eq!(inserted.len(), 1);
        assert_eq!(inserted[0].1, EventKind::GazeAway);
    }

    #[tokio::test]
    async fn test_gaze_failure_does_not_blind_detection() {
        let vision = Arc::new(StaticVision::new(
            Ok(vec![
                detection(LABEL_PERSON, Some(0.9)),
                detection(LABEL_PERSON, Some(0.9)),
            ]),
            Err(()),
        ));
        let sink = Arc::new(RecordingSink::default());
        let mut processor = create_processor(vision, sink.clone());

        processor.process_frame(&encode_test_frame()).await;

        let inserted = sink.inserted.lock().unwrap();
        assert_eq!(inserted.len(), 1);
        assert_eq!(inserted[0].1, EventKind::MultipleFaces);
    }

    #[tokio::test]
    async fn test_throttle_suppresses_repeat_emissions() {
        let vision = Arc::new(StaticVision::new(
            Ok(vec![detection(LABEL_CELL_PHONE, Some(0.8))]),
            Ok("no".to_string()),
        ));
        let sink = Arc::new(RecordingSink::default());
        let mut processor = create_processor(vision, sink.clone());

        let frame = encode_test_frame();
        processor.process_frame(&frame).await;
        processor.process_frame(&frame).await;
        processor.process_frame(&frame).await;

        // Three frames inside the window, one stored event
        assert_eq!(sink.inserted.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_insert_failure_does_not_propagate() {
        let vision = Arc::new(StaticVision::new(
            Ok(vec![detection(LABEL_CELL_PHONE, Some(0.8))]),
            Ok("yes".to_string()),
        ));
        let mut processor = create_processor(vision.clone(), Arc::new(FailingSink));

        // Both emissions fail to persist; processing continues regardless
        processor.process_frame(&encode_test_frame()).await;
        assert_eq!(*vision.gaze_calls.lock().unwrap(), 1);
    }

    // ------------------------------------------------------------------
    // Sequencing
    // ------------------------------------------------------------------

    /// Logs call boundaries with a small delay to expose interleaving.
    struct SlowVision {
        log: Arc<StdMutex<Vec<&'static str>>>,
    }

    #[async_trait]
    impl VisionModel for SlowVision {
        async fn detect(&self, _frame: &PixelBuffer) -> Result<Vec<Detection>, VisionError> {
            self.log.lock().unwrap().push("detect_start");
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.log.lock().unwrap().push("detect_end");
            Ok(vec![])
        }

        async fn answer_yes_no(
            &self,
            _frame: &PixelBuffer,
            _question: &str,
        ) -> Result<String, VisionError> {
            self.log.lock().unwrap().push("gaze_start");
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.log.lock().unwrap().push("gaze_end");
            Ok("no".to_string())
        }
    }

    #[tokio::test]
    async fn test_back_to_back_frames_never_overlap() {
        let log = Arc::new(StdMutex::new(Vec::new()));
        let vision = Arc::new(SlowVision { log: log.clone() });
        let sink = Arc::new(RecordingSink::default());

        let registry = SessionRegistry::new(vision, sink, test_settings());
        let handle = registry.get_or_create("session-1");
        let frame = encode_test_frame();

        let first = tokio::spawn({
            let handle = handle.clone();
            let frame = frame.clone();
            async move { handle.lock().await.process_frame(&frame).await }
        });
        let second = tokio::spawn({
            let handle = handle.clone();
            let frame = frame.clone();
            async move { handle.lock().await.process_frame(&frame).await }
        });

        first.await.unwrap();
        second.await.unwrap();

        // The second frame's calls must not start before the first frame's
        // calls complete: objects then gaze, twice, with no interleaving.
        let log = log.lock().unwrap();
        assert_eq!(
            *log,
            vec![
                "detect_start",
                "detect_end",
                "gaze_start",
                "gaze_end",
                "detect_start",
                "detect_end",
                "gaze_start",
                "gaze_end",
            ]
        );
    }

    // ------------------------------------------------------------------
    // Registry
    // ------------------------------------------------------------------

    fn create_registry() -> SessionRegistry {
        let vision = Arc::new(StaticVision::new(Ok(vec![]), Ok("no".to_string())));
        let sink = Arc::new(RecordingSink::default());
        SessionRegistry::new(vision, sink, test_settings())
    }

    #[test]
    fn test_registry_reuses_existing_session() {
        let registry = create_registry();

        let first = registry.get_or_create("session-a");
        let again = registry.get_or_create("session-a");
        assert!(Arc::ptr_eq(&first, &again));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_registry_separate_sessions() {
        let registry = create_registry();

        let a = registry.get_or_create("session-a");
        let b = registry.get_or_create("session-b");
        assert!(!Arc::ptr_eq(&a, &b));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_registry_remove_drops_state() {
        let registry = create_registry();

        let first = registry.get_or_create("session-a");
        registry.remove("session-a");
        assert!(registry.is_empty());

        // A reconnect gets a fresh processor (fresh throttle state)
        let second = registry.get_or_create("session-a");
        assert!(!Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_registry_remove_unknown_is_noop() {
        let registry = create_registry();
        registry.remove("never-seen");
        assert!(registry.is_empty());
    }
}
