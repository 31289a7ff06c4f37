/// Runtime Execution Engine
///
/// This module interprets pipeline specs. It handles:
/// - Path resolution and `{{ }}` templating against the run scope
/// - HTTP nodes with retry/backoff and bounded fan-out
/// - Pure data transforms over normalized rows
/// - Run lifecycle events and the per-run channel registry

// Error taxonomy
pub mod error;

// Dotted and JSON-path resolution
pub mod path;

// Run scope (origin, context, outputs, overlays)
pub mod scope;

// {{ }} interpolation
pub mod template;

// Columnar/row normalization
pub mod rows;

// Join, quality, score, top-n, correlation
pub mod transforms;

// Retry-with-backoff combinator
pub mod retry;

// HTTP node runner
pub mod http;

// Offline API simulations
pub mod mock;

// Lifecycle events and per-run event bus
pub mod events;

// Run id -> event bus registry
pub mod registry;

// Node-by-node interpreter
pub mod engine;

// Re-export main types
pub use engine::{ExecutionEngine, RunRecord};
pub use error::ExecError;
pub use events::{EventBus, EventKind, RunEvent};
pub use http::HttpRunner;
pub use registry::RunRegistry;
