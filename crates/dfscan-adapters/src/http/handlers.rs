//! Route handlers.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::multipart::MultipartRejection;
use axum::extract::{Multipart, State};
use axum::Json;
use dfscan_core::{FrameAnalysis, Verdict};
use serde::Serialize;
use tracing::{debug, info};

use super::error::ApiError;
use super::AppState;
use crate::clock::iso_timestamp;

/// Multipart field carrying the frame.
const FILE_FIELD: &str = "file";

/// Body of `GET /`.
#[derive(Debug, Serialize)]
pub struct RootResponse {
    /// Liveness message.
    pub message: String,
}

/// Body of a successful `POST /analyze-frame/`.
#[derive(Debug, Serialize)]
pub struct AnalyzeResponse {
    /// Always `"ok"`.
    pub status: &'static str,
    /// Mean of the per-model probabilities.
    pub deepfake_probability: f32,
    /// Human-readable verdict label.
    pub result: &'static str,
    /// Machine-readable verdict (`high` / `low`).
    pub verdict: Verdict,
    /// Per-model probabilities, in pool order.
    pub model_probabilities: Vec<f32>,
    /// Time of analysis (RFC 3339).
    pub timestamp: String,
}

impl AnalyzeResponse {
    fn new(analysis: FrameAnalysis, timestamp: String) -> Self {
        Self {
            status: "ok",
            deepfake_probability: analysis.deepfake_probability,
            result: analysis.verdict.label(),
            verdict: analysis.verdict,
            model_probabilities: analysis.model_probabilities,
            timestamp,
        }
    }
}

/// `GET /`
pub async fn root(State(state): State<AppState>) -> Json<RootResponse> {
    let message = if state.analyzer.pool().len() > 1 {
        "Deepfake Server Running with DFDC Ensemble Model!"
    } else {
        "Deepfake Server Running with DFDC Model!"
    };
    Json(RootResponse {
        message: message.to_string(),
    })
}

/// `POST /analyze-frame/`
///
/// Reads the uploaded frame, scores it on the blocking pool and returns the
/// aggregate probability.
pub async fn analyze_frame(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<AnalyzeResponse>, ApiError> {
    let mut multipart = multipart?;
    let (name, bytes) = read_upload(&mut multipart).await?;
    debug!(file = %name, bytes = bytes.len(), "Received frame");

    let analyzer = Arc::clone(&state.analyzer);
    let analysis = tokio::task::spawn_blocking(move || analyzer.analyze_bytes(&bytes))
        .await
        .map_err(|e| ApiError::Task(e.to_string()))??;

    info!(
        file = %name,
        probability = analysis.deepfake_probability,
        verdict = %analysis.verdict,
        "Analyzed frame"
    );
    Ok(Json(AnalyzeResponse::new(analysis, iso_timestamp())))
}

/// Returns the `file` field, or the first field carrying a file name when no
/// field is called `file`.
async fn read_upload(multipart: &mut Multipart) -> Result<(String, Bytes), ApiError> {
    let mut fallback = None;
    while let Some(field) = multipart.next_field().await? {
        let is_file = field.name() == Some(FILE_FIELD);
        let file_name = field.file_name().map(str::to_string);
        if is_file {
            let bytes = field.bytes().await?;
            return Ok((file_name.unwrap_or_else(|| FILE_FIELD.to_string()), bytes));
        }
        if fallback.is_none() {
            if let Some(file_name) = file_name {
                let bytes = field.bytes().await?;
                fallback = Some((file_name, bytes));
            }
        }
    }
    fallback.ok_or(ApiError::MissingFile)
}
