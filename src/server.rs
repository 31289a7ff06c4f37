/// Server setup and initialization
///
/// Wires together all components: HTTP runner, execution engine, run
/// registry, and HTTP routes. Provides the main application factory function
/// for creating the Axum app.

use crate::{
    api::{create_run_routes, AppState},
    config::Config,
    runtime::{ExecutionEngine, HttpRunner, RunRegistry},
};
use anyhow::Result;
use axum::{extract::State, routing::get, Json, Router};
use serde_json::{json, Value};
use std::{sync::Arc, time::Duration};
use tokio::net::TcpListener;

/// Create the main Axum application with all routes
///
/// Initializes the HTTP runner, execution engine and run registry and wires
/// them into the router. Also starts the sweeper that drops run channels
/// which were subscribed to but never ran.
pub async fn create_app(config: Config) -> Result<Router> {
    tracing::info!("🌐 Initializing HTTP runner (timeout {} ms)", config.runtime.http_timeout_ms);
    let http = HttpRunner::new(config.runtime.clone(), config.secrets.clone())
        .map_err(|e| anyhow::anyhow!("Failed to initialize HTTP runner: {}", e))?;

    tracing::info!("🚀 Initializing execution engine");
    let engine = Arc::new(ExecutionEngine::new(http));

    tracing::info!("📡 Initializing run registry (buffer {})", config.runtime.event_buffer);
    let runs = Arc::new(RunRegistry::new(config.runtime.event_buffer));

    let ttl = Duration::from_secs(config.runtime.subscriber_ttl_secs);
    let sweeper_runs = Arc::clone(&runs);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(ttl.max(Duration::from_secs(1)));
        loop {
            ticker.tick().await;
            let pruned = sweeper_runs.prune_expired(ttl);
            if pruned > 0 {
                tracing::debug!("🧹 Pruned {} idle run channel(s)", pruned);
            }
        }
    });

    let app_state = AppState {
        engine,
        runs,
        config: Arc::new(config.runtime.clone()),
    };

    tracing::info!("📡 Creating HTTP router with all endpoints");
    let app = Router::new()
        // Health check endpoint
        .route("/healthz", get(health_check))

        // Run endpoint and event stream
        .merge(create_run_routes())
        .with_state(app_state);

    tracing::info!("✅ Application initialized successfully");

    Ok(app)
}

/// Start the HTTP server with the given configuration
///
/// Creates the application and starts the Axum server on the configured address and port.
pub async fn start_server(config: Config) -> Result<()> {
    // Initialize tracing subscriber for logging
    tracing_subscriber::fmt()
        .with_target(false)
        .with_thread_ids(true)
        .with_level(true)
        .init();

    tracing::info!("Starting geoflow server (mocks by default: {})...", config.runtime.default_use_mocks);

    // Create the application
    let app = create_app(config.clone()).await?;

    // Bind to the configured address
    let bind_addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = TcpListener::bind(&bind_addr).await?;

    tracing::info!("Server listening on http://{}", bind_addr);

    // Start the server
    axum::serve(listener, app.into_make_service()).await?;

    Ok(())
}

/// Health check endpoint handler
///
/// Reports liveness plus how many run channels are currently open.
async fn health_check(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "open_runs": state.runs.len(),
        "mocks_default": state.config.default_use_mocks,
    }))
}
