use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;
use tracing::error;

use klaxon_ports::error::PortError;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Port(#[from] PortError),

    #[error("invalid request: {0}")]
    BadRequest(String),
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: &'static str,
    message: String,
}

impl ApiError {
    fn status(&self) -> (StatusCode, &'static str) {
        match self {
            Self::BadRequest(_) | Self::Port(PortError::Invalid(_)) => {
                (StatusCode::BAD_REQUEST, "invalid_request")
            }
            Self::Port(PortError::NotFound) => (StatusCode::NOT_FOUND, "not_found"),
            Self::Port(PortError::Conflict(_)) => (StatusCode::CONFLICT, "conflict"),
            Self::Port(PortError::Persistence(_) | PortError::Connection(_)) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "internal_error")
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error) = self.status();
        if status.is_server_error() {
            error!(err = %self, "request failed");
        }
        let body = ErrorBody {
            error,
            message: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}
