/// HTTP API Layer
///
/// This module provides the endpoints around the execution engine:
/// - Run planning + execution with an aggregated response
/// - Live websocket event stream per run

// Run endpoint and event stream
pub mod runs;

// Re-export router builder and state
pub use runs::{create_run_routes, AppState};
