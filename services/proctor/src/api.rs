//! HTTP and websocket surface.
//!
//! Frames stream in over `/ws/video/:session_id` (fire-and-forget; nothing
//! is written back). The analyse endpoint aggregates a session's stored
//! events into a score and summary. Transport-level errors only ever cost
//! the affected session its state; they never surface as application
//! errors.

use crate::config::ApiConfig;
use crate::scoring;
use crate::session::SessionRegistry;
use crate::store::EventStore;
use crate::summarizer::SummaryGenerator;
use anyhow::{Context, Result};
use axum::{
    extract::ws::{Message, WebSocket},
    extract::{Path, State, WebSocketUpgrade},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use base64::{engine::general_purpose::STANDARD, Engine};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, instrument, warn};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<SessionRegistry>,
    pub store: Arc<EventStore>,
    pub summarizer: Arc<SummaryGenerator>,
}

/// Inbound websocket frame message
#[derive(Debug, Deserialize)]
pub struct FramePayload {
    /// Base64-encoded still image
    pub frame: String,
}

/// Analysis result returned to the reviewer dashboard
#[derive(Debug, Serialize, Deserialize)]
pub struct AnalysisResponse {
    pub session_id: String,
    pub cheat_score: f64,
    pub summary: String,
}

/// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

/// Create the API router
pub fn create_router(state: AppState, config: &ApiConfig) -> Router {
    let cors = if config.cors_enabled {
        if config.cors_origins.is_empty() {
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any)
        } else {
            let origins: Vec<_> = config
                .cors_origins
                .iter()
                .filter_map(|o| o.parse().ok())
                .collect();
            CorsLayer::new()
                .allow_origin(origins)
                .allow_methods(Any)
                .allow_headers(Any)
        }
    } else {
        CorsLayer::new()
    };

    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/ws/video/:session_id", get(ws_video_handler))
        .route(
            "/api/v1/analysis/:session_id",
            get(get_analysis).post(analyse_session),
        )
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Health check endpoint
async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "proctor-service"
    }))
}

/// Readiness check endpoint
async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    match sqlx::query("SELECT 1").fetch_one(state.store.pool()).await {
        Ok(_) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "status": "ready",
                "database": "connected"
            })),
        ),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({
                "status": "not_ready",
                "database": "disconnected",
                "error": e.to_string()
            })),
        ),
    }
}

/// Upgrade handler for the per-session video stream
async fn ws_video_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> impl IntoResponse {
    info!(session_id = %session_id, "Video stream connecting");
    ws.on_upgrade(move |socket| handle_video_socket(socket, state, session_id))
}

/// Socket loop: one frame at a time through the session's processor.
///
/// The processor handle's mutex plus this sequential loop guarantee that a
/// frame's remote calls complete before the next frame is touched.
async fn handle_video_socket(mut socket: WebSocket, state: AppState, session_id: String) {
    let processor = state.registry.get_or_create(&session_id);

    while let Some(message) = socket.recv().await {
        match message {
            Ok(Message::Text(text)) => {
                let payload: FramePayload = match serde_json::from_str(&text) {
                    Ok(payload) => payload,
                    Err(e) => {
                        warn!(session_id = %session_id, error = %e, "Invalid frame message");
                        continue;
                    }
                };

                let encoded = match STANDARD.decode(payload.frame.as_bytes()) {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        warn!(session_id = %session_id, error = %e, "Invalid frame encoding");
                        continue;
                    }
                };

                processor.lock().await.process_frame(&encoded).await;
            }
            Ok(Message::Binary(bytes)) => {
                processor.lock().await.process_frame(&bytes).await;
            }
            Ok(Message::Close(_)) => {
                info!(session_id = %session_id, "Video stream closed");
                break;
            }
            Ok(_) => {
                // Ping/pong are answered by the protocol layer
            }
            Err(e) => {
                warn!(session_id = %session_id, error = %e, "Video stream error");
                break;
            }
        }
    }

    state.registry.remove(&session_id);
}

/// Aggregate a session's stored events into a score and summary.
///
/// Idempotent in effect: re-running overwrites the stored summary. Store
/// failures degrade (empty event set, unsaved summary) but the response is
/// always produced.
#[instrument(skip(state))]
async fn analyse_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Json<AnalysisResponse> {
    let events = match state.store.fetch_events(&session_id).await {
        Ok(events) => events,
        Err(e) => {
            error!(session_id = %session_id, error = %e, "Failed to fetch events, analysing empty set");
            Vec::new()
        }
    };

    let cheat_score = scoring::compute_cheat_score(&events);
    let summary = state.summarizer.generate(&events, cheat_score).await;

    if let Err(e) = state
        .store
        .upsert_summary(&session_id, cheat_score, &summary)
        .await
    {
        error!(session_id = %session_id, error = %e, "Failed to persist analysis summary");
    }

    info!(
        session_id = %session_id,
        cheat_score,
        event_count = events.len(),
        "Session analysed"
    );
    metrics::counter!("proctor.analyses.completed").increment(1);

    Json(AnalysisResponse {
        session_id,
        cheat_score,
        summary,
    })
}

/// Return a previously stored analysis summary
#[instrument(skip(state))]
async fn get_analysis(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<AnalysisResponse>, (StatusCode, Json<ErrorResponse>)> {
    let summary = state
        .store
        .fetch_summary(&session_id)
        .await
        .map_err(|e| {
            error!(session_id = %session_id, error = %e, "Failed to fetch analysis summary");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse {
                    error: "Failed to fetch analysis summary".to_string(),
                    code: "QUERY_ERROR".to_string(),
                }),
            )
        })?;

    match summary {
        Some(s) => Ok(Json(AnalysisResponse {
            session_id: s.session_id,
            cheat_score: s.cheat_score,
            summary: s.summary,
        })),
        None => Err((
            StatusCode::NOT_FOUND,
            Json(ErrorResponse {
                error: "Session has not been analysed".to_string(),
                code: "NOT_FOUND".to_string(),
            }),
        )),
    }
}

/// Start the API server
pub async fn start_api_server(state: AppState, config: &ApiConfig) -> Result<()> {
    let router = create_router(state, config);
    let addr = format!("{}:{}", config.host, config.port);

    info!(address = %addr, "Starting proctor API server");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("Failed to bind to address")?;

    axum::serve(listener, router)
        .await
        .context("API server error")?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_payload_parsing() {
        let payload: FramePayload = serde_json::from_str(r#"{"frame": "aGVsbG8="}"#).unwrap();
        assert_eq!(payload.frame, "aGVsbG8=");
        assert_eq!(STANDARD.decode(payload.frame.as_bytes()).unwrap(), b"hello");
    }

    #[test]
    fn test_frame_payload_rejects_missing_key() {
        assert!(serde_json::from_str::<FramePayload>(r#"{"image": "abc"}"#).is_err());
    }

    #[test]
    fn test_analysis_response_shape() {
        let response = AnalysisResponse {
            session_id: "1331a3ae".to_string(),
            cheat_score: 0.21,
            summary: "Two gaze deviations and one phone sighting.".to_string(),
        };

        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["session_id"], "1331a3ae");
        assert_eq!(json["cheat_score"], 0.21);
    }
}
