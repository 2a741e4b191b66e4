use std::{
    error::Error as _,
    io,
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, instrument};

use super::{Xapi, XapiError};
use crate::configuration::HypervisorSettings;

/// JSON-RPC 2.0 client for the `/jsonrpc` endpoint of a pool master.
pub struct XapiClient {
    http: reqwest::Client,
    endpoint: String,
    next_id: AtomicU64,
}

#[derive(Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcFault>,
}

#[derive(Deserialize)]
struct RpcFault {
    message: String,
    #[serde(default)]
    data: Option<Value>,
}

impl RpcFault {
    fn into_error(self) -> XapiError {
        let params = match self.data {
            Some(Value::Array(values)) => values.into_iter().map(param_to_string).collect(),
            Some(Value::Null) | None => vec![],
            Some(other) => vec![param_to_string(other)],
        };
        XapiError::Failure {
            code: self.message,
            params,
        }
    }
}

fn param_to_string(value: Value) -> String {
    match value {
        Value::String(s) => s,
        other => other.to_string(),
    }
}

impl XapiClient {
    pub fn new(settings: &HypervisorSettings) -> Result<Self, XapiError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.request_timeout_seconds))
            .danger_accept_invalid_certs(!settings.verify_tls)
            .build()
            .map_err(|e| XapiError::Transport(e.to_string()))?;

        Ok(Self {
            http,
            endpoint: endpoint_for(&settings.host),
            next_id: AtomicU64::new(1),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

/// Bare hosts are reached over HTTPS; explicit schemes are kept as given.
fn endpoint_for(host: &str) -> String {
    let host = host.trim().trim_end_matches('/');
    if host.contains("://") {
        format!("{}/jsonrpc", host)
    } else {
        format!("https://{}/jsonrpc", host)
    }
}

fn transport_error(endpoint: &str, err: reqwest::Error) -> XapiError {
    if err.is_connect() && is_connection_refused(&err) {
        return XapiError::ConnectionRefused(endpoint.to_string());
    }
    XapiError::Transport(err.to_string())
}

fn is_connection_refused(err: &reqwest::Error) -> bool {
    let mut source = err.source();
    while let Some(cause) = source {
        if let Some(io_err) = cause.downcast_ref::<io::Error>()
            && io_err.kind() == io::ErrorKind::ConnectionRefused
        {
            return true;
        }
        source = cause.source();
    }
    false
}

#[async_trait]
impl Xapi for XapiClient {
    // Parameters are never recorded: login calls carry the pool password.
    #[instrument(skip(self, params), fields(endpoint = %self.endpoint))]
    async fn call(&self, method: &str, params: Vec<Value>) -> Result<Value, XapiError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        debug!(id, "Sending XAPI request");

        let body = json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
            "id": id,
        });

        let response = self
            .http
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| transport_error(&self.endpoint, e))?;

        let response: RpcResponse = response.json().await.map_err(|e| XapiError::Decode {
            method: method.to_string(),
            message: e.to_string(),
        })?;

        match response.error {
            Some(fault) => Err(fault.into_error()),
            None => Ok(response.result.unwrap_or(Value::Null)),
        }
    }
}
