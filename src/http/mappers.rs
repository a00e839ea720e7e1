use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};

use crate::{
    constants::BODY_TOO_LARGE_MSG,
    core::{admission::AdmissionError, domain::ExecutionResult, queue::QueueError},
    http::models::{CompileResponse, OutputBody},
};

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Admission(#[from] AdmissionError),
    #[error("{}", BODY_TOO_LARGE_MSG)]
    BodyTooLarge,
    #[error("Queue Error: {0}")]
    Queue(#[from] QueueError),
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Admission(AdmissionError::RateLimited { .. }) => {
                StatusCode::TOO_MANY_REQUESTS
            }
            ApiError::Admission(_) => StatusCode::BAD_REQUEST,
            ApiError::BodyTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::Queue(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = OutputBody {
            output: self.to_string(),
        };
        (self.status_code(), Json(body)).into_response()
    }
}

impl From<ExecutionResult> for CompileResponse {
    fn from(result: ExecutionResult) -> Self {
        Self {
            output: result.output,
            status: result.status,
            duration_ms: result.duration.as_millis() as u64,
        }
    }
}
