//! Face Attribute Service
//!
//! Detects faces in images fetched by URL and returns age, gender and face
//! descriptors. Models are loaded with OpenVINO on the first request.

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tokio::sync::Notify;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use face_attr::api::rest::{create_rest_router, AppState};
use face_attr::api::server::{serve, ServerExit};
use face_attr::config::Config;
use face_attr::engine::{ModelRegistry, OpenVinoLoader};
use face_attr::service::DetectionPipeline;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    info!("Starting Face Attribute Service v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config_path = Config::default_path();
    let config = if Path::new(&config_path).exists() {
        Config::load(&config_path)
            .with_context(|| format!("failed to load config from {}", config_path))?
    } else {
        info!("No config at {}, using defaults", config_path);
        Config::default()
    }
    .with_env_overrides()?;

    info!("Configuration loaded:");
    info!("  Port: {}", config.server.port);
    info!("  Device: {}", config.inference.device);
    info!("  Detector input size: {}", config.detector.input_size);
    info!("  Recognition model: {}", config.models.recognition.is_some());
    info!("  POST action: {:?}", config.server.post_action);

    // Models load lazily on the first detection request
    let loader = OpenVinoLoader::new(&config)?;
    let registry = Arc::new(ModelRegistry::new(loader, config.model_sources())?);
    let pipeline = Arc::new(DetectionPipeline::new(registry, &config)?);

    let restart = Arc::new(Notify::new());
    let app_state = Arc::new(AppState {
        pipeline,
        post_action: config.server.post_action,
        restart: restart.clone(),
        start_time: Instant::now(),
    });

    let router = create_rest_router(app_state);

    let addr = format!("0.0.0.0:{}", config.server.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    info!("Listening on http://{}", addr);

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };
    let grace = Duration::from_secs(config.server.restart_grace_secs);

    if serve(listener, router, restart, shutdown, grace).await? == ServerExit::Restart {
        // Non-zero exit so the supervisor brings the service back up
        std::process::exit(1);
    }

    info!("Goodbye!");
    Ok(())
}
