//! API request, response, and error types.

use std::fmt;

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use tokio::task::JoinError;

use crate::error::BosError;

/// Body of `POST /batteries/{name}/current`.
#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
pub struct CurrentRequest {
    /// Amperes; positive discharges, negative charges.
    pub current: f64,
}

/// Error body returned with every non-2xx status.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// A failed request on its way to becoming an HTTP response.
#[derive(Debug)]
pub enum ApiError {
    Bos(BosError),
    /// The blocking task serving the request panicked or was cancelled.
    Task(String),
}

impl From<BosError> for ApiError {
    fn from(e: BosError) -> Self {
        Self::Bos(e)
    }
}

impl From<JoinError> for ApiError {
    fn from(e: JoinError) -> Self {
        Self::Task(e.to_string())
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bos(e) => write!(f, "{e}"),
            Self::Task(msg) => write!(f, "request task failed: {msg}"),
        }
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        let Self::Bos(err) = self else {
            return StatusCode::INTERNAL_SERVER_ERROR;
        };
        match err {
            BosError::BadName(_) => StatusCode::NOT_FOUND,
            BosError::NameTaken(_) | BosError::BatteryInUse(_) => StatusCode::CONFLICT,
            BosError::InvalidArgument(_)
            | BosError::CurrentOutOfRange { .. }
            | BosError::VoltageMismatch { .. }
            | BosError::NoBattery => StatusCode::BAD_REQUEST,
            BosError::NoResources(_) => StatusCode::UNPROCESSABLE_ENTITY,
            BosError::DriverError(_)
            | BosError::ServerError(_)
            | BosError::BadResponse(_)
            | BosError::Transport(_) => StatusCode::BAD_GATEWAY,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = Json(ErrorResponse {
            error: self.to_string(),
        });
        (status, body).into_response()
    }
}
