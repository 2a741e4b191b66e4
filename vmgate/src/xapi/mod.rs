//! Access to the XAPI management endpoint of a XenServer / XCP-ng pool.
//!
//! [`Xapi`] is the transport seam: one JSON-RPC method call in, one JSON value
//! out. [`Remote`] layers the typed, session-scoped calls used by the gateway
//! on top of it.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

mod client;
mod remote;

pub use client::XapiClient;
pub use remote::Remote;

/// Opaque reference to a server-side object (`OpaqueRef:...`), sessions included.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct OpaqueRef(String);

impl OpaqueRef {
    pub fn new(reference: impl Into<String>) -> Self {
        Self(reference.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OpaqueRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum XapiError {
    #[error("connection refused by {0}")]
    ConnectionRefused(String),

    #[error("transport error: {0}")]
    Transport(String),

    /// A failure reported by XAPI itself: an error code plus its parameters.
    #[error("{code}: {}", .params.join(", "))]
    Failure { code: String, params: Vec<String> },

    #[error("malformed response to {method}: {message}")]
    Decode { method: String, message: String },
}

impl XapiError {
    pub fn failure<I, S>(code: impl Into<String>, params: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        XapiError::Failure {
            code: code.into(),
            params: params.into_iter().map(Into::into).collect(),
        }
    }

    pub fn code(&self) -> Option<&str> {
        match self {
            XapiError::Failure { code, .. } => Some(code),
            _ => None,
        }
    }

    /// Unknown UUIDs and dangling references.
    pub fn is_not_found(&self) -> bool {
        matches!(self.code(), Some("UUID_INVALID" | "HANDLE_INVALID"))
    }

    pub fn is_authentication_failure(&self) -> bool {
        match self {
            XapiError::Failure { code, params } => {
                code == "SESSION_AUTHENTICATION_FAILED"
                    || params
                        .iter()
                        .any(|p| p.to_lowercase().contains("authentication"))
            }
            XapiError::Transport(message) => message.to_lowercase().contains("authentication"),
            _ => false,
        }
    }

    /// Whether the session used for the failed call must not be handed out again.
    pub fn invalidates_session(&self) -> bool {
        match self {
            XapiError::ConnectionRefused(_) | XapiError::Transport(_) => true,
            XapiError::Failure { code, .. } => code == "SESSION_INVALID",
            XapiError::Decode { .. } => false,
        }
    }
}

/// A JSON-RPC endpoint speaking the XAPI method namespace.
#[async_trait]
pub trait Xapi: Send + Sync {
    /// Invoke `method` with positional `params`; session-scoped methods take the
    /// session reference as their first parameter.
    async fn call(&self, method: &str, params: Vec<Value>) -> Result<Value, XapiError>;
}
