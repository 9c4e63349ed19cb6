use anyhow::{Context, Result};
use sketchforge_api::api::start_api_server;
use sketchforge_api::{
    AppState, Config, FalClient, HandlerSettings, HttpMeshFetcher, QrEncoder, S3Store,
};
use std::sync::Arc;
use tokio::signal;
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Mesh format requested from the model
const OUTPUT_FORMAT: &str = "glb";

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env file is fine; the environment may already be populated
    dotenvy::dotenv().ok();

    // Fails before anything starts if required settings are missing
    let config = Config::load().context("Failed to load configuration")?;

    init_tracing(&config.service.log_level);

    info!(
        service = %config.service.name,
        bucket = %config.s3.bucket,
        "Starting Sketchforge API"
    );

    init_metrics(config.service.metrics_port)?;

    let store = Arc::new(S3Store::new(&config.s3).await);

    let inference =
        Arc::new(FalClient::new(&config.inference).context("Failed to initialize fal client")?);

    let meshes = Arc::new(
        HttpMeshFetcher::new(config.inference.mesh_download_timeout())
            .context("Failed to initialize mesh downloader")?,
    );

    let state = AppState {
        store,
        inference,
        meshes,
        qr: QrEncoder::default(),
        settings: Arc::new(HandlerSettings {
            service_name: config.service.name.clone(),
            bucket: config.s3.bucket.clone(),
            demo_model_key: config.s3.demo_model_key.clone(),
            model_endpoint: config.inference.model_endpoint.clone(),
            output_format: OUTPUT_FORMAT.to_string(),
            max_upload_bytes: config.api.max_upload_bytes,
        }),
    };

    start_api_server(state, &config.api, shutdown_signal()).await?;

    info!("Sketchforge API stopped");

    Ok(())
}

/// Initialize tracing/logging
fn init_tracing(log_level: &str) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().json())
        .init();
}

/// Initialize Prometheus metrics exporter
fn init_metrics(port: u16) -> Result<()> {
    let builder = metrics_exporter_prometheus::PrometheusBuilder::new();

    builder
        .with_http_listener(([0, 0, 0, 0], port))
        .install()
        .context("Failed to install Prometheus metrics exporter")?;

    info!(port = port, "Prometheus metrics exporter started");

    Ok(())
}

/// Wait for shutdown signal (SIGINT or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        }
        _ = terminate => {
            info!("Received SIGTERM signal");
        }
    }
}
