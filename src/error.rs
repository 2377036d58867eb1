//! Error type shared by the RPC client, the print device and the ordering
//! session.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, RelayError>;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum RelayError {
    /// The request never produced a response (connect/DNS/TLS/reset).
    #[error("{0}")]
    Network(String),

    #[error("{0}")]
    Timeout(String),

    /// The peer answered with a non-2xx HTTP status.
    #[error("{message} (HTTP {status})")]
    HttpStatus { status: u16, message: String },

    /// The backend answered but reported `success: false` or a JSON-RPC error.
    #[error("{code}: {message}")]
    Rpc {
        code: String,
        message: String,
        trace_id: Option<String>,
    },

    #[error("malformed response: {0}")]
    Decode(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    /// User input rejected before any request was made.
    #[error("{0}")]
    Validation(String),

    #[error("credential store: {0}")]
    Credential(String),
}

impl RelayError {
    pub fn rpc(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Rpc {
            code: code.into(),
            message: message.into(),
            trace_id: None,
        }
    }

    /// Transport-level failures: the outcome of the call is unknown.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Network(_) | Self::Timeout(_) => true,
            Self::HttpStatus { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// Backend trace id, when the failure carried one.
    pub fn trace_id(&self) -> Option<&str> {
        match self {
            Self::Rpc { trace_id, .. } => trace_id.as_deref(),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for RelayError {
    fn from(err: serde_json::Error) -> Self {
        Self::Decode(err.to_string())
    }
}
