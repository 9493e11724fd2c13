// Copyright (c) 2025 tubequeue contributors
// Licensed under the MIT License. See LICENSE file for details.

//! Engine error taxonomy and its HTTP mapping.
//!
//! Validation problems are rejected synchronously before a job exists.
//! Worker-level failures (spawn, non-zero exit) never cross the API as
//! errors — they resolve to job status `error` and reach callers through the
//! same status channel shape as every other outcome.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

use crate::jobs::JobId;

/// Errors surfaced by the job lifecycle engine.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Bad submission input or bad limit value; rejected before any state
    /// changes.
    #[error("invalid request: {0}")]
    Validation(String),

    /// Pause/resume requested for a job with no live worker process.
    #[error("no active process for job {0}")]
    NotActive(JobId),

    /// The OS rejected a signal to a live worker (e.g. no permission).
    #[error("signal delivery failed: {0}")]
    Signal(std::io::Error),
}

impl CoreError {
    /// HTTP status for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            CoreError::Validation(_) => StatusCode::BAD_REQUEST,
            CoreError::NotActive(_) => StatusCode::NOT_FOUND,
            CoreError::Signal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for CoreError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!("request failed: {}", self);
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}
