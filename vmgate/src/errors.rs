use std::fmt;

use http::StatusCode;
use validator::ValidationErrors;

use crate::xapi::XapiError;

/// Why a session could not be established.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionCause {
    Refused,
    AuthenticationFailed,
    Transport,
}

impl ConnectionCause {
    pub fn classify(err: &XapiError) -> Self {
        if matches!(err, XapiError::ConnectionRefused(_)) {
            ConnectionCause::Refused
        } else if err.is_authentication_failure() {
            ConnectionCause::AuthenticationFailed
        } else {
            ConnectionCause::Transport
        }
    }
}

impl fmt::Display for ConnectionCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ConnectionCause::Refused => "connection refused",
            ConnectionCause::AuthenticationFailed => "authentication failed",
            ConnectionCause::Transport => "transport failure",
        })
    }
}

/// Outcome taxonomy of every gateway operation.
#[derive(thiserror::Error, Debug)]
pub enum GatewayError {
    #[error("Missing required field: {0}")]
    Config(&'static str),

    #[error("Connection failed ({cause}): {source}")]
    Connection {
        cause: ConnectionCause,
        #[source]
        source: XapiError,
    },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("{count} {kind}s are named {name:?}; refusing to pick one")]
    AmbiguousMatch {
        kind: &'static str,
        name: String,
        count: usize,
    },

    #[error(transparent)]
    Upstream(XapiError),

    #[error("failed to hash credential: {0}")]
    Credential(String),

    #[error("operation aborted before completion")]
    Aborted,
}

impl From<XapiError> for GatewayError {
    fn from(err: XapiError) -> Self {
        if err.is_not_found() {
            GatewayError::NotFound(err.to_string())
        } else {
            GatewayError::Upstream(err)
        }
    }
}

impl GatewayError {
    pub fn invalidates_session(&self) -> bool {
        match self {
            GatewayError::Upstream(err) => err.invalidates_session(),
            GatewayError::Aborted => true,
            _ => false,
        }
    }
}

/// Errors surfaced by the HTTP layer.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Gateway(#[from] GatewayError),

    #[error("validation error in request body")]
    InvalidEntity(#[from] ValidationErrors),

    #[error("Invalid UUID format")]
    InvalidUuid,

    #[error("Missing required parameters")]
    MissingParameters,

    #[error("Invalid JSON format")]
    InvalidJson,

    #[error("unauthorized")]
    Unauthorized,

    #[error("Too many requests, please try again later.")]
    RateLimited { retry_after_seconds: u64 },

    #[error("{message}")]
    Rejected { status: StatusCode, message: String },
}
