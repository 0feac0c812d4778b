// HTTP route handlers for the codetest API

use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use codetest_common::config::SubmissionLimits;
use codetest_common::types::{Report, Submission};
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::AppState;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Malformed submission: {0}")]
    MalformedBody(#[from] serde_json::Error),
    #[error("Invalid submission: {0}")]
    InvalidSubmission(String),
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        warn!(error = %self, "Rejected submission");
        (
            StatusCode::BAD_REQUEST,
            Json(ErrorBody {
                error: self.to_string(),
            }),
        )
            .into_response()
    }
}

/// POST /test_code - Run a submission against its test cases
///
/// The body is decoded whatever its content type. Nothing is executed
/// unless the whole submission parses and passes the size limits.
pub async fn test_code(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<(StatusCode, Json<Report>), ApiError> {
    let submission: Submission = serde_json::from_slice(&body)?;
    validate_submission(&submission, &state.limits)?;

    let submission_id = Uuid::new_v4();
    let report = state.executor.execute(submission_id, &submission).await;

    info!(
        submission_id = %submission_id,
        passed = ?report.passed_indices,
        "Report sent"
    );

    Ok((StatusCode::CREATED, Json(report)))
}

/// GET /status - Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

fn validate_submission(submission: &Submission, limits: &SubmissionLimits) -> Result<(), ApiError> {
    if submission.code.len() > limits.max_code_bytes {
        return Err(ApiError::InvalidSubmission(format!(
            "code exceeds maximum size of {} bytes",
            limits.max_code_bytes
        )));
    }

    if submission.test_cases.len() > limits.max_test_cases {
        return Err(ApiError::InvalidSubmission(format!(
            "{} test cases exceed the maximum of {}",
            submission.test_cases.len(),
            limits.max_test_cases
        )));
    }

    if let Some(index) = submission
        .test_cases
        .iter()
        .position(|tc| tc.input.len() > limits.max_input_bytes)
    {
        return Err(ApiError::InvalidSubmission(format!(
            "input of test case {} exceeds maximum size of {} bytes",
            index, limits.max_input_bytes
        )));
    }

    Ok(())
}
