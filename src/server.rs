//! HTTP detection endpoint.
//!
//! A minimal upload boundary around the detector: images arrive as base64 in
//! a JSON body, the response carries the detections, the summary, and an
//! annotated PNG (also base64).

use std::sync::Arc;

use ab_glyph::FontVec;
use anyhow::{Context, Result};
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use image::codecs::png::PngEncoder;
use image::{ExtendedColorType, ImageEncoder};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::annotate;
use crate::detect::{Detection, DetectionSummary, YoloDetector};

/// Shared state behind the endpoint: one loaded detector plus defaults.
pub struct AppState {
    pub detector: YoloDetector,
    pub confidence: f32,
    pub font: Option<FontVec>,
}

#[derive(Debug, Deserialize)]
pub struct DetectRequest {
    /// Base64-encoded image in any common raster format.
    pub image: String,
    /// Optional override for the server's default confidence threshold.
    pub confidence: Option<f32>,
}

#[derive(Debug, Serialize)]
pub struct DetectResponse {
    pub detections: Vec<Detection>,
    pub summary: DetectionSummary,
    /// Annotated copy of the input as a base64 PNG.
    pub annotated_image: String,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/v1/detect", post(detect_handler))
        .with_state(state)
}

async fn health_handler() -> &'static str {
    "ok"
}

/// POST /v1/detect - run the detector on an uploaded image.
///
/// Invalid payloads map to 400, inference failures to 500; neither is
/// retried and neither takes the process down. An empty result is a normal
/// response, not an error.
async fn detect_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<DetectRequest>,
) -> Result<Json<DetectResponse>, (StatusCode, String)> {
    let confidence = request
        .confidence
        .unwrap_or(state.confidence)
        .clamp(0.0, 1.0);

    let bytes = BASE64.decode(request.image.as_bytes()).map_err(|e| {
        warn!("rejecting request: invalid base64 ({e})");
        (StatusCode::BAD_REQUEST, format!("invalid base64 image: {e}"))
    })?;
    let image = image::load_from_memory(&bytes)
        .map_err(|e| (StatusCode::BAD_REQUEST, format!("invalid image: {e}")))?;

    let detections = state.detector.detect(&image, confidence).map_err(|e| {
        warn!("detection failed: {e:#}");
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("detection failed: {e}"),
        )
    })?;
    if detections.is_empty() {
        info!("no objects detected");
    }

    let summary = DetectionSummary::new(&detections, state.detector.class_names());
    let annotated = annotate::draw_detections(
        &image,
        &detections,
        state.detector.class_names(),
        state.font.as_ref(),
    );

    let mut png = Vec::new();
    PngEncoder::new(&mut png)
        .write_image(
            annotated.as_raw(),
            annotated.width(),
            annotated.height(),
            ExtendedColorType::Rgb8,
        )
        .map_err(|e| {
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("failed to encode annotated image: {e}"),
            )
        })?;

    Ok(Json(DetectResponse {
        detections,
        summary,
        annotated_image: BASE64.encode(&png),
    }))
}

/// Bind and serve the detection router until the task is stopped.
pub async fn serve(state: Arc<AppState>, port: u16) -> Result<()> {
    let addr = format!("0.0.0.0:{port}");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!("listening on {addr}");

    axum::serve(listener, router(state))
        .await
        .context("server error")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detect_request_parses_with_and_without_confidence() {
        let request: DetectRequest =
            serde_json::from_str(r#"{"image": "aGVsbG8=", "confidence": 0.4}"#).unwrap();
        assert_eq!(request.confidence, Some(0.4));

        let request: DetectRequest = serde_json::from_str(r#"{"image": "aGVsbG8="}"#).unwrap();
        assert!(request.confidence.is_none());
        assert_eq!(BASE64.decode(request.image).unwrap(), b"hello");
    }

    #[test]
    fn detect_request_rejects_missing_image() {
        let result: Result<DetectRequest, _> = serde_json::from_str(r#"{"confidence": 0.4}"#);
        assert!(result.is_err());
    }
}
