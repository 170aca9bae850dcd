use serde_json::json;

use crate::provider::{UpstreamFailure, UpstreamTransportErrorKind};

pub type GatewayResult<T> = Result<T, GatewayError>;

#[derive(Debug, Clone, thiserror::Error)]
pub enum GatewayError {
    /// Malformed or empty caller request. Never retried.
    #[error("{0}")]
    Validation(String),
    /// No usable credential remains for the model.
    #[error("{message}")]
    CredentialExhausted { model: String, message: String },
    /// Upstream answered with a non-2xx status.
    #[error("upstream rejected request with status {status}: {body}")]
    UpstreamRejected { status: u16, body: String },
    #[error("upstream transport failure ({}): {message}", kind.as_str())]
    Transport {
        kind: UpstreamTransportErrorKind,
        message: String,
    },
    /// Malformed upstream event or identity tag.
    #[error("decode failure: {0}")]
    Decode(String),
}

impl GatewayError {
    pub fn no_credentials(model: &str) -> Self {
        GatewayError::CredentialExhausted {
            model: model.to_string(),
            message: format!(
                "no credentials available for model {model}; switch models or retry later"
            ),
        }
    }

    pub fn exhausted(model: &str) -> Self {
        GatewayError::CredentialExhausted {
            model: model.to_string(),
            message: format!(
                "all credentials exhausted for model {model}; switch models or retry later"
            ),
        }
    }

    pub fn status_code(&self) -> u16 {
        match self {
            GatewayError::Validation(_) => 400,
            GatewayError::CredentialExhausted { .. } => 429,
            GatewayError::UpstreamRejected { status, .. } if *status >= 400 => *status,
            GatewayError::UpstreamRejected { .. } => 502,
            GatewayError::Transport { .. } | GatewayError::Decode(_) => 502,
        }
    }

    pub fn error_type(&self) -> &'static str {
        match self {
            GatewayError::Validation(_) => "invalid_request_error",
            GatewayError::CredentialExhausted { .. } => "rate_limit_error",
            GatewayError::UpstreamRejected { .. } => "upstream_error",
            GatewayError::Transport { .. } => "upstream_transport_error",
            GatewayError::Decode(_) => "decode_error",
        }
    }

    /// Structured caller-facing payload.
    pub fn to_payload(&self) -> serde_json::Value {
        json!({
            "error": {
                "message": self.to_string(),
                "type": self.error_type(),
            }
        })
    }
}

impl From<UpstreamFailure> for GatewayError {
    fn from(value: UpstreamFailure) -> Self {
        GatewayError::Transport {
            kind: value.kind,
            message: value.message,
        }
    }
}
