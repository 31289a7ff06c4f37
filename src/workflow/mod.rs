/// Pipeline Definition Layer
///
/// This module handles the declarative side of a run:
/// - Type definitions (PipelineSpec, Node, Edge, Origin)
/// - The planner that turns a goal and origin into a concrete spec

// Core pipeline type definitions
pub mod types;

// Goal/context -> PipelineSpec
pub mod planner;

// Re-export commonly used types
pub use types::{Edge, HttpNode, Node, NodeKind, NodeStatus, Origin, PipelineSpec, TransformNode};
