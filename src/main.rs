use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tavola::api::auth::hash_password;
use tavola::config::Config;
use tavola::services::{spawn_maintenance_task, Maintenance};
use tavola::AppState;

#[derive(Parser, Debug)]
#[command(name = "tavola")]
#[command(author, version, about = "Multi-tenant restaurant ordering backend", long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "tavola.toml")]
    config: PathBuf,

    /// Override log level
    #[arg(short, long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let config = Config::load(&cli.config)?;

    // Initialize logging
    let log_level = cli
        .log_level
        .as_ref()
        .unwrap_or(&config.logging.level)
        .clone();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&log_level)),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Tavola v{}", env!("CARGO_PKG_VERSION"));

    // Ensure data directory exists
    std::fs::create_dir_all(&config.server.data_dir).with_context(|| {
        format!(
            "Failed to create data directory: {}",
            config.server.data_dir.display()
        )
    })?;

    // Initialize database
    let db = tavola::db::init(&config.server.data_dir).await?;

    // Bootstrap administrator
    if let (Some(email), Some(password)) = (&config.auth.admin_email, &config.auth.admin_password) {
        let password_hash = hash_password(password)
            .map_err(|e| anyhow::anyhow!("Failed to hash admin password: {}", e))?;
        tavola::db::ensure_admin_user(&db, email, &password_hash).await?;
    } else {
        tracing::warn!("No bootstrap administrator configured");
    }

    let metrics_handle = tavola::api::metrics::init_metrics()?;
    let state = Arc::new(AppState::new(config.clone(), db.clone()).with_metrics(metrics_handle));

    spawn_maintenance_task(
        Maintenance::new(db.clone(), state.carts.clone(), state.cache.clone()),
        &config.maintenance,
    );

    let app = tavola::api::create_router(state);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    tracing::info!("API server listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
