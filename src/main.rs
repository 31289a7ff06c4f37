/// Geoflow: declarative place/route/weather retrieval pipelines
///
/// Main entry point for the geoflow server. Initializes configuration and
/// starts the HTTP server with the run endpoint and event stream.

use geoflow::{config::Config, server::start_server};

/// Application entry point
///
/// Initializes the server with environment-driven configuration and starts
/// listening for requests. The server provides:
/// - Pipeline runs at POST /api/run
/// - Live run events at GET /ws/{run_id}
/// - Health check at /healthz
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration (defaults to 0.0.0.0:3004, live APIs)
    let config = Config::default();

    // Start the server
    start_server(config).await?;

    Ok(())
}
