//! HTTP representation of gateway errors

use crate::error::GatewayError;
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;

impl GatewayError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFoundInCache { .. } | Self::NotLoaded { .. } => StatusCode::NOT_FOUND,
            Self::UnsupportedKind { .. }
            | Self::KindMismatch { .. }
            | Self::InvalidRequest { .. } => StatusCode::BAD_REQUEST,
            Self::QuantizerUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            Self::LoaderFailure { .. }
            | Self::QuantizationFailed { .. }
            | Self::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
        } else {
            tracing::debug!(error = %self, status = status.as_u16(), "Request rejected");
        }

        let body = Json(ErrorResponse {
            error: self.to_string(),
            timestamp: chrono::Utc::now(),
        });

        (status, body).into_response()
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    timestamp: chrono::DateTime<chrono::Utc>,
}
