//! Remote vision model capability.
//!
//! The session processor only sees the [`VisionModel`] trait: one detection
//! call (all labels batched) and one visual-question-answering call. The
//! concrete client talks to a Moondream-style cloud API over HTTPS with a
//! bounded per-request timeout; a timeout or API error surfaces as an
//! ordinary [`VisionError`] at the caller's failure boundary.

use crate::config::VisionConfig;
use crate::frame_decoder::{DecodeError, PixelBuffer};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Errors from the remote vision capability.
#[derive(Debug, Error)]
pub enum VisionError {
    #[error("Vision request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Vision API returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Frame could not be encoded for upload: {0}")]
    Encode(#[from] DecodeError),
}

/// A labeled detection returned by the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Detection {
    /// Detected object label (e.g. "person", "cell phone")
    pub label: String,
    /// Confidence score (0.0 - 1.0), if the model reports one
    #[serde(default)]
    pub confidence: Option<f64>,
    /// Bounding box [x, y, width, height] normalized 0-1
    #[serde(default)]
    pub bbox: Option<[f64; 4]>,
}

/// Black-box vision capability: labeled detections and yes/no questions.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait VisionModel: Send + Sync {
    /// Run object detection over the frame. One remote call regardless of
    /// how many labels the client is configured to request.
    async fn detect(&self, frame: &PixelBuffer) -> Result<Vec<Detection>, VisionError>;

    /// Ask a yes/no question about the frame. The answer is returned as a
    /// single resolved string regardless of how the capability streams it.
    async fn answer_yes_no(
        &self,
        frame: &PixelBuffer,
        question: &str,
    ) -> Result<String, VisionError>;
}

// ============================================================================
// Moondream cloud client
// ============================================================================

const DETECT_PATH: &str = "/v1/detect";
const QUERY_PATH: &str = "/v1/query";
const AUTH_HEADER: &str = "X-Moondream-Auth";

/// HTTP client for the Moondream cloud detection/VQA API.
pub struct MoondreamClient {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    detect_objects: Vec<String>,
    confidence_threshold: f64,
}

#[derive(Serialize)]
struct DetectRequest<'a> {
    image_url: String,
    objects: &'a [String],
    confidence_threshold: f64,
}

#[derive(Deserialize)]
struct DetectResponse {
    #[serde(default)]
    detections: Vec<Detection>,
}

#[derive(Serialize)]
struct QueryRequest<'a> {
    image_url: String,
    question: &'a str,
}

#[derive(Deserialize)]
struct QueryResponse {
    answer: AnswerPayload,
}

/// The query answer arrives either as plain text or as an incrementally
/// produced sequence of fragments, depending on the API version.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum AnswerPayload {
    Text(String),
    Fragments(Vec<String>),
}

impl AnswerPayload {
    /// Resolve to a single string before inspection.
    fn into_text(self) -> String {
        match self {
            AnswerPayload::Text(text) => text,
            AnswerPayload::Fragments(fragments) => fragments.concat(),
        }
    }
}

impl MoondreamClient {
    /// Create a client from configuration.
    pub fn new(config: &VisionConfig) -> Result<Self, VisionError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .connect_timeout(Duration::from_secs(5))
            .build()?;

        Ok(Self {
            client,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            detect_objects: config.detect_objects.clone(),
            confidence_threshold: config.confidence_threshold,
        })
    }

    async fn post_json<B: Serialize>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<reqwest::Response, VisionError> {
        let response = self
            .client
            .post(format!("{}{}", self.endpoint, path))
            .header(AUTH_HEADER, &self.api_key)
            .json(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(VisionError::Api {
                status: status.as_u16(),
                message,
            });
        }

        Ok(response)
    }
}

#[async_trait]
impl VisionModel for MoondreamClient {
    async fn detect(&self, frame: &PixelBuffer) -> Result<Vec<Detection>, VisionError> {
        let request = DetectRequest {
            image_url: frame.to_data_url()?,
            objects: &self.detect_objects,
            confidence_threshold: self.confidence_threshold,
        };

        let response: DetectResponse =
            self.post_json(DETECT_PATH, &request).await?.json().await?;

        Ok(response.detections)
    }

    async fn answer_yes_no(
        &self,
        frame: &PixelBuffer,
        question: &str,
    ) -> Result<String, VisionError> {
        let request = QueryRequest {
            image_url: frame.to_data_url()?,
            question,
        };

        let response: QueryResponse =
            self.post_json(QUERY_PATH, &request).await?.json().await?;

        Ok(response.answer.into_text())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_string_answer() {
        let response: QueryResponse =
            serde_json::from_str(r#"{"answer": "Yes, the person is looking away."}"#).unwrap();
        assert_eq!(response.answer.into_text(), "Yes, the person is looking away.");
    }

    #[test]
    fn test_fragment_sequence_answer() {
        let response: QueryResponse =
            serde_json::from_str(r#"{"answer": ["No", ", the person is ", "facing the screen."]}"#)
                .unwrap();
        assert_eq!(
            response.answer.into_text(),
            "No, the person is facing the screen."
        );
    }

    #[test]
    fn test_detection_confidence_optional() {
        let response: DetectResponse = serde_json::from_str(
            r#"{"detections": [
                {"label": "person", "confidence": 0.93, "bbox": [0.1, 0.1, 0.5, 0.8]},
                {"label": "cell phone"}
            ]}"#,
        )
        .unwrap();

        assert_eq!(response.detections.len(), 2);
        assert_eq!(response.detections[0].confidence, Some(0.93));
        assert_eq!(response.detections[1].confidence, None);
    }

    #[test]
    fn test_missing_detections_defaults_empty() {
        let response: DetectResponse = serde_json::from_str("{}").unwrap();
        assert!(response.detections.is_empty());
    }
}
