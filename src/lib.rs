/// Geoflow: declarative place/route/weather retrieval pipelines
///
/// This library provides a small workflow interpreter: HTTP and transform
/// nodes run in declaration order, outputs flow through a shared scope, and
/// every step is streamed to live subscribers as events.

// Core configuration and setup
pub mod config;

// Pipeline definitions and the planner that builds them
pub mod workflow;

// Runtime execution engine - resolver, templating, HTTP, transforms, events
pub mod runtime;

// HTTP API layer - run endpoint and event stream
pub mod api;

// Server setup and initialization
pub mod server;

// Re-export commonly used types for external consumers
pub use runtime::{ExecutionEngine, RunRecord};
pub use server::start_server;
pub use workflow::{Edge, Node, NodeKind, PipelineSpec};
