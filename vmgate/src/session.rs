//! Lifecycle of authenticated XAPI sessions.
//!
//! Sessions are plain values owned by the operation that checked them out.
//! With `max_idle_sessions = 0` every operation logs in and out; a larger value
//! keeps that many healthy sessions around for the next checkout. An idle
//! session is only handed out again while it is younger than
//! `idle_session_ttl_seconds` and the host still accepts it.

use std::{
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use secrecy::ExposeSecret;
use serde_json::json;
use tokio::time::Instant;
use tracing::{debug, error, info, instrument, warn};

use crate::{
    configuration::HypervisorSettings,
    errors::{ConnectionCause, GatewayError},
    xapi::{OpaqueRef, Remote, Xapi, XapiError},
};

const API_VERSION: &str = "1.0";
const ORIGINATOR: &str = "vmgate";

#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    reference: OpaqueRef,
    username: String,
}

impl Session {
    pub fn reference(&self) -> &OpaqueRef {
        &self.reference
    }

    pub fn username(&self) -> &str {
        &self.username
    }
}

struct IdleSession {
    session: Session,
    parked_at: Instant,
}

pub struct SessionManager {
    api: Arc<dyn Xapi>,
    settings: HypervisorSettings,
    idle: Mutex<Vec<IdleSession>>,
}

impl SessionManager {
    pub fn new(api: Arc<dyn Xapi>, settings: HypervisorSettings) -> Self {
        Self {
            api,
            settings,
            idle: Mutex::new(Vec::new()),
        }
    }

    pub fn remote(&self, session: &Session) -> Remote {
        Remote::new(self.api.clone(), session.reference.clone())
    }

    pub fn idle_sessions(&self) -> usize {
        self.lock_idle().len()
    }

    fn lock_idle(&self) -> MutexGuard<'_, Vec<IdleSession>> {
        self.idle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Logs in with the configured credentials.
    ///
    /// Incomplete configuration fails before any request is sent.
    #[instrument(skip(self))]
    pub async fn open(&self) -> Result<Session, GatewayError> {
        if let Some(field) = self.settings.missing_field() {
            error!("Configuration error: Missing required field: {}", field);
            return Err(GatewayError::Config(field));
        }

        let login = self
            .api
            .call(
                "session.login_with_password",
                vec![
                    json!(self.settings.username),
                    json!(self.settings.password.expose_secret()),
                    json!(API_VERSION),
                    json!(ORIGINATOR),
                ],
            )
            .await
            .and_then(|value| {
                serde_json::from_value::<OpaqueRef>(value).map_err(|e| XapiError::Decode {
                    method: "session.login_with_password".to_string(),
                    message: e.to_string(),
                })
            });

        match login {
            Ok(reference) => {
                info!(host = %self.settings.host, "Successfully connected to XAPI");
                Ok(Session {
                    reference,
                    username: self.settings.username.clone(),
                })
            }
            Err(source) => {
                let cause = ConnectionCause::classify(&source);
                match cause {
                    ConnectionCause::Refused => {
                        error!(host = %self.settings.host, "Connection refused. Please check the host and network.")
                    }
                    ConnectionCause::AuthenticationFailed => error!(
                        user = %self.settings.username,
                        "Authentication failed. Please check your username and password."
                    ),
                    ConnectionCause::Transport => {
                        error!(host = %self.settings.host, error = %source, "Failed to connect to XAPI")
                    }
                }
                Err(GatewayError::Connection { cause, source })
            }
        }
    }

    /// Logs out the session held in `slot`, if any. Logout failures are only
    /// logged; the slot is empty afterwards either way.
    #[instrument(skip_all)]
    pub async fn close(&self, slot: &mut Option<Session>) {
        let Some(session) = slot.take() else {
            return;
        };

        match self
            .api
            .call("session.logout", vec![json!(session.reference)])
            .await
        {
            Ok(_) => info!("Successfully disconnected from XAPI"),
            Err(e) => warn!(error = %e, "Error disconnecting from XAPI"),
        }
    }

    /// Hands out a live idle session when one is available, otherwise opens a
    /// new one. Expired or rejected idle sessions are logged out on the way.
    pub async fn checkout(&self) -> Result<Session, GatewayError> {
        let ttl = Duration::from_secs(self.settings.idle_session_ttl_seconds);
        loop {
            let pooled = self.lock_idle().pop();
            let Some(IdleSession { session, parked_at }) = pooled else {
                return self.open().await;
            };

            if parked_at.elapsed() >= ttl {
                debug!("Idle XAPI session expired");
                self.close(&mut Some(session)).await;
                continue;
            }

            match self.validate(&session).await {
                Ok(()) => {
                    debug!("Reusing idle XAPI session");
                    return Ok(session);
                }
                Err(e) => {
                    warn!(error = %e, "Discarding idle XAPI session rejected by the host");
                    self.close(&mut Some(session)).await;
                }
            }
        }
    }

    async fn validate(&self, session: &Session) -> Result<(), XapiError> {
        self.api
            .call(
                "session.get_this_host",
                vec![json!(session.reference), json!(session.reference)],
            )
            .await
            .map(|_| ())
    }

    /// Returns the session in `slot` to the idle set when `reusable` and there is
    /// room, and closes it otherwise. The slot is empty afterwards either way.
    pub async fn checkin(&self, slot: &mut Option<Session>, reusable: bool) {
        let Some(session) = slot.take() else {
            return;
        };

        let mut rejected = if reusable {
            self.park(session)
        } else {
            Some(session)
        };
        self.close(&mut rejected).await;
    }

    fn park(&self, session: Session) -> Option<Session> {
        let mut idle = self.lock_idle();
        if idle.len() < self.settings.max_idle_sessions {
            idle.push(IdleSession {
                session,
                parked_at: Instant::now(),
            });
            None
        } else {
            Some(session)
        }
    }

    /// Logs out every idle session; used on shutdown.
    pub async fn drain(&self) {
        let sessions: Vec<IdleSession> = self.lock_idle().drain(..).collect();
        for IdleSession { session, .. } in sessions {
            self.close(&mut Some(session)).await;
        }
    }
}
