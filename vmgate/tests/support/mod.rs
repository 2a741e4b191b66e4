//! Shared fixtures: a scripted in-memory XAPI endpoint and app builders.

#![allow(dead_code)]

use std::{
    collections::{HashMap, VecDeque},
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use axum::{Router, body::Body, response::Response};
use base64::{Engine, engine::general_purpose::STANDARD};
use common::telemtry::{get_subscriber, init_subscriber};
use once_cell::sync::Lazy;
use secrecy::Secret;
use serde_json::{Value, json};
use vmgate::{
    App,
    auth::AdminCredentials,
    configuration::HypervisorSettings,
    gateway::Gateway,
    handlers,
    rate_limit::RateLimiter,
    session::SessionManager,
    xapi::{Xapi, XapiError},
};

// Set TEST_LOG to see the server's logs while the tests run.
static TRACING: Lazy<()> = Lazy::new(|| {
    let filter = "debug".to_string();
    if std::env::var("TEST_LOG").is_ok() {
        init_subscriber(get_subscriber("test".into(), filter, std::io::stdout));
    } else {
        init_subscriber(get_subscriber("test".into(), filter, std::io::sink));
    }
});

pub fn init_tracing() {
    Lazy::force(&TRACING);
}

pub const ADMIN_PASSWORD: &str = "hunter2-admin";
pub const VM_UUID: &str = "0b8e3c6a-1d2f-4a5b-8c7d-9e0f1a2b3c4d";
pub const VM_REF: &str = "OpaqueRef:vm-1";

#[derive(Debug, Clone)]
pub struct Call {
    pub method: String,
    pub params: Vec<Value>,
}

/// Records every call and answers from scripted responses. Queued responses
/// are used first, then the standing response for the method. Login and logout
/// succeed unless scripted otherwise; anything else unscripted fails with
/// `MESSAGE_METHOD_UNKNOWN`.
#[derive(Default)]
pub struct FakeXapi {
    queued: Mutex<HashMap<String, VecDeque<Result<Value, XapiError>>>>,
    standing: Mutex<HashMap<String, Result<Value, XapiError>>>,
    calls: Mutex<Vec<Call>>,
    logins: AtomicUsize,
}

impl FakeXapi {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn on(&self, method: &str, value: Value) -> &Self {
        self.standing
            .lock()
            .unwrap()
            .insert(method.to_string(), Ok(value));
        self
    }

    pub fn fail(&self, method: &str, err: XapiError) -> &Self {
        self.standing
            .lock()
            .unwrap()
            .insert(method.to_string(), Err(err));
        self
    }

    pub fn once(&self, method: &str, result: Result<Value, XapiError>) -> &Self {
        self.queued
            .lock()
            .unwrap()
            .entry(method.to_string())
            .or_default()
            .push_back(result);
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn methods(&self) -> Vec<String> {
        self.calls().into_iter().map(|c| c.method).collect()
    }

    /// Methods called, leaving out login and logout.
    pub fn api_methods(&self) -> Vec<String> {
        self.methods()
            .into_iter()
            .filter(|m| !m.starts_with("session."))
            .collect()
    }

    pub fn calls_to(&self, method: &str) -> Vec<Vec<Value>> {
        self.calls()
            .into_iter()
            .filter(|c| c.method == method)
            .map(|c| c.params)
            .collect()
    }

    pub fn count(&self, method: &str) -> usize {
        self.calls_to(method).len()
    }
}

#[async_trait]
impl Xapi for FakeXapi {
    async fn call(&self, method: &str, params: Vec<Value>) -> Result<Value, XapiError> {
        self.calls.lock().unwrap().push(Call {
            method: method.to_string(),
            params,
        });

        if let Some(result) = self
            .queued
            .lock()
            .unwrap()
            .get_mut(method)
            .and_then(VecDeque::pop_front)
        {
            return result;
        }
        if let Some(result) = self.standing.lock().unwrap().get(method) {
            return result.clone();
        }

        match method {
            "session.login_with_password" => {
                let n = self.logins.fetch_add(1, Ordering::SeqCst) + 1;
                Ok(json!(format!("OpaqueRef:session-{}", n)))
            }
            "session.logout" => Ok(Value::Null),
            "session.get_this_host" => Ok(json!("OpaqueRef:host-1")),
            other => Err(XapiError::failure("MESSAGE_METHOD_UNKNOWN", [other])),
        }
    }
}

pub fn hypervisor_settings(max_idle_sessions: usize) -> HypervisorSettings {
    HypervisorSettings {
        host: "xcp.test".to_string(),
        username: "root".to_string(),
        password: Secret::new("xapi-secret".to_string()),
        verify_tls: true,
        request_timeout_seconds: 5,
        max_idle_sessions,
        idle_session_ttl_seconds: 300,
    }
}

pub fn gateway(fake: &Arc<FakeXapi>, max_idle_sessions: usize) -> Gateway {
    init_tracing();
    Gateway::new(SessionManager::new(
        fake.clone(),
        hypervisor_settings(max_idle_sessions),
    ))
}

pub fn test_app_with_limit(fake: &Arc<FakeXapi>, max_requests: u32) -> Router {
    let env = App::new(
        gateway(fake, 0),
        AdminCredentials::new(&Secret::new(ADMIN_PASSWORD.to_string())),
        RateLimiter::new(max_requests, Duration::from_secs(900)),
    );
    handlers::app(env)
}

pub fn test_app(fake: &Arc<FakeXapi>) -> Router {
    test_app_with_limit(fake, 1000)
}

pub fn admin_auth() -> String {
    format!(
        "Basic {}",
        STANDARD.encode(format!("admin:{}", ADMIN_PASSWORD))
    )
}

pub async fn json_body(response: Response<Body>) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

pub fn vm_record(uuid: &str, name: &str, power_state: &str) -> Value {
    json!({
        "uuid": uuid,
        "name_label": name,
        "power_state": power_state,
        "is_a_template": false,
        "is_control_domain": false,
        "memory_static_max": "2147483648",
        "metrics": "OpaqueRef:metrics-1",
    })
}

/// Scripts `VM.get_by_uuid` and `VM.get_record` for a single VM.
pub fn with_vm(fake: &FakeXapi, power_state: &str) {
    fake.on("VM.get_by_uuid", json!(VM_REF))
        .on("VM.get_record", vm_record(VM_UUID, "web-01", power_state));
}

pub fn subject(uuid: &str, username: &str, roles: &[&str]) -> Value {
    json!({
        "uuid": uuid,
        "subject_identifier": username,
        "other_config": { "subject-name": username },
        "roles": roles,
    })
}
