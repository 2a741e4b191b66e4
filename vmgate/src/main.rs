use tokio::net::TcpListener;

use common::telemtry::{get_subscriber, init_subscriber};
use vmgate::{
    configuration::get_configuration,
    startup::{build_app, run},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let subscriber = get_subscriber("vmgate".into(), "info".into(), std::io::stdout);
    init_subscriber(subscriber);

    let configuration = get_configuration().expect("Failed to read configuration.");
    let address = format!(
        "{}:{}",
        configuration.application.host, configuration.application.port
    );

    let env = build_app(configuration)?;
    let gateway = env.gateway().clone();

    let listener = TcpListener::bind(&address).await?;
    tracing::info!("Server running on {}", address);

    if let Err(e) = run(listener, env, shutdown_signal()).await {
        tracing::error!("Server failed: {}", e);
    }

    gateway.sessions().drain().await;
    tracing::info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("Shutdown signal received"),
        Err(e) => tracing::error!("Failed to listen for shutdown signal: {}", e),
    }
}
