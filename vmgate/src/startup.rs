use std::{
    future::{Future, IntoFuture},
    net::SocketAddr,
    sync::Arc,
    time::Duration,
};
use tokio::net::TcpListener;

use crate::{
    App,
    auth::AdminCredentials,
    configuration::Settings,
    gateway::Gateway,
    handlers::app,
    rate_limit::RateLimiter,
    session::SessionManager,
    xapi::{XapiClient, XapiError},
};

/// Wires the XAPI client, session manager, credentials and rate limiter
/// together. No connection is made until the first request.
pub fn build_app(settings: Settings) -> Result<App, XapiError> {
    let Settings {
        hypervisor,
        auth,
        rate_limit,
        ..
    } = settings;

    if let Some(field) = hypervisor.missing_field() {
        tracing::warn!(
            "Hypervisor {} is not configured; every VM and user operation will fail",
            field
        );
    }

    let client = XapiClient::new(&hypervisor)?;
    tracing::info!("XAPI endpoint: {}", client.endpoint());
    let sessions = SessionManager::new(Arc::new(client), hypervisor);

    let admin = AdminCredentials::new(&auth.admin_password);
    if !admin.is_configured() {
        tracing::warn!("ADMIN_PASSWORD is not set; mutating routes will reject every request");
    }

    let limiter = RateLimiter::new(
        rate_limit.max_requests,
        Duration::from_secs(rate_limit.window_seconds),
    );

    Ok(App::new(Gateway::new(sessions), admin, limiter))
}

pub fn run<F>(
    listener: TcpListener,
    env: App,
    shutdown: F,
) -> impl IntoFuture<Output = std::io::Result<()>> + Send
where
    F: Future<Output = ()> + Send + 'static,
{
    let router = app(env);
    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown)
}
