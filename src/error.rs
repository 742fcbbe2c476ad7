//! Error taxonomy shared by the scanner, manager and planner
//!
//! These types carry no transport representation. The HTTP mapping lives in
//! `api::error`.

use thiserror::Error;

pub type GatewayResult<T> = Result<T, GatewayError>;

#[derive(Debug, Error)]
pub enum GatewayError {
    /// Requested name does not resolve to an artifact in the local cache
    #[error("model '{name}' not found in local cache")]
    NotFoundInCache { name: String },

    /// The runtime loader rejected the artifact
    #[error("failed to load model '{name}': {message}")]
    LoaderFailure { name: String, message: String },

    #[error("unsupported model kind '{kind}' (expected 'embedding' or 'generative')")]
    UnsupportedKind { kind: String },

    /// Resident model exists but has the other kind
    #[error("model '{name}' is loaded as {actual}, not {expected}")]
    KindMismatch {
        name: String,
        expected: String,
        actual: String,
    },

    #[error("model '{name}' is not loaded")]
    NotLoaded { name: String },

    #[error("{message}")]
    InvalidRequest { message: String },

    #[error("no quantization converter configured")]
    QuantizerUnavailable,

    #[error("quantization of '{name}' failed: {message}")]
    QuantizationFailed { name: String, message: String },

    #[error("internal error: {message}")]
    Internal { message: String },
}

impl GatewayError {
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidRequest {
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }
}

impl From<tokio::task::JoinError> for GatewayError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::internal(format!("blocking task failed: {}", err))
    }
}
