use anyhow::{Context, Result};
use proctor_service::api::{start_api_server, AppState};
use proctor_service::config::Config;
use proctor_service::session::{ProcessorSettings, SessionRegistry};
use proctor_service::store::EventStore;
use proctor_service::summarizer::{GeminiClient, SummaryGenerator};
use proctor_service::vision::MoondreamClient;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::load().context("Failed to load configuration")?;

    // Initialize logging
    init_tracing(&config.service.log_level);

    info!(
        service = %config.service.name,
        "Starting InterviewShield proctoring service"
    );

    // Validate configuration
    config.validate().context("Invalid configuration")?;

    // Initialize metrics
    init_metrics(config.service.metrics_port)?;

    // Initialize the event store
    let store = Arc::new(
        EventStore::new(&config.database)
            .await
            .context("Failed to initialize event store")?,
    );

    // Run migrations if enabled
    if config.database.run_migrations {
        store
            .run_migrations()
            .await
            .context("Failed to run database migrations")?;
    }

    // Remote model clients
    let vision = Arc::new(
        MoondreamClient::new(&config.vision).context("Failed to initialize vision client")?,
    );
    let text_model = Arc::new(
        GeminiClient::new(&config.summary).context("Failed to initialize summary client")?,
    );

    // Session registry and summary generator
    let registry = Arc::new(SessionRegistry::new(
        vision,
        store.clone(),
        ProcessorSettings::from(&config.processing),
    ));
    let summarizer = Arc::new(SummaryGenerator::new(text_model));

    // Create API state
    let api_state = AppState {
        registry,
        store,
        summarizer,
    };

    // Spawn API server task
    let api_config = config.api.clone();
    let api_handle = tokio::spawn(async move {
        if let Err(e) = start_api_server(api_state, &api_config).await {
            error!(error = %e, "API server error");
        }
    });

    info!("Proctoring service started successfully");

    // Wait for shutdown signal
    shutdown_signal().await;

    info!("Shutting down proctoring service");

    api_handle.abort();

    info!("Proctoring service stopped");

    Ok(())
}

/// Initialize tracing/logging
fn init_tracing(log_level: &str) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

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
