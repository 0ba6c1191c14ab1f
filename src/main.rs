use clap::Parser;
use parley::adapters::health_handler::HealthHandler;
use parley::cli::Cli;
use parley::config::Settings;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let settings = Settings::new_with_cli(&cli)?;
    let host = settings.server.host.clone();
    let port = settings.server.port;

    if settings.model_api_key().is_none() {
        warn!("model.api_key is not set; chat requests will fail with a configuration error");
    }
    if settings.store.url.is_none() || settings.store_service_key().is_none() {
        warn!("store.url or store.service_key is not set; chat requests will fail with a configuration error");
    }

    info!("Starting Parley on {}:{}", host, port);

    let state = parley::build_state(&settings)?;
    let health_handler = Arc::new(HealthHandler::new(Arc::new(settings)));
    let app = parley::create_app(state, health_handler);

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    info!("Listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
