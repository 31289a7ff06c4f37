/// Run lifecycle events and the per-run event bus
///
/// Every event carries the run id, a timestamp and (where the graph changed)
/// a full node/edge snapshot so a subscriber can re-render from any event.

use crate::workflow::types::{Edge, Node, PipelineSpec};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::broadcast;

/// Complete node/edge state at one point in time
#[derive(Debug, Clone, Serialize)]
pub struct Snapshot {
    pub nodes: Vec<Node>,
    pub edges: Vec<Edge>,
}

impl Snapshot {
    pub fn of(spec: &PipelineSpec) -> Self {
        Self { nodes: spec.nodes.clone(), edges: spec.edges.clone() }
    }
}

/// One event on a run's stream
#[derive(Debug, Clone, Serialize)]
pub struct RunEvent {
    #[serde(rename = "runId")]
    pub run_id: String,
    pub timestamp: String,
    #[serde(flatten)]
    pub kind: EventKind,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    PlanningStart {
        goal: String,
        #[serde(rename = "useMocks")]
        use_mocks: bool,
    },
    PlanningComplete {
        snapshot: Snapshot,
    },
    ExecutionStart {},
    NodeStart {
        #[serde(rename = "nodeId")]
        node_id: String,
        snapshot: Snapshot,
    },
    NodeComplete {
        #[serde(rename = "nodeId")]
        node_id: String,
        latency_ms: u64,
        snapshot: Snapshot,
    },
    NodeFail {
        #[serde(rename = "nodeId")]
        node_id: String,
        error: String,
        duration_ms: u64,
        snapshot: Snapshot,
    },
    PipelineComplete {
        snapshot: Snapshot,
        summary: String,
        correlation: Value,
        health: Value,
    },
    Error {
        error: String,
    },
}

impl EventKind {
    /// Name of the event as it appears in the `type` field
    pub fn name(&self) -> &'static str {
        match self {
            EventKind::PlanningStart { .. } => "planning_start",
            EventKind::PlanningComplete { .. } => "planning_complete",
            EventKind::ExecutionStart {} => "execution_start",
            EventKind::NodeStart { .. } => "node_start",
            EventKind::NodeComplete { .. } => "node_complete",
            EventKind::NodeFail { .. } => "node_fail",
            EventKind::PipelineComplete { .. } => "pipeline_complete",
            EventKind::Error { .. } => "error",
        }
    }

    /// No further events follow this one
    pub fn is_terminal(&self) -> bool {
        matches!(self, EventKind::PipelineComplete { .. } | EventKind::Error { .. })
    }
}

/// Event bus for one run, using a tokio broadcast channel.
/// All subscribers receive all events published after they subscribed.
#[derive(Debug)]
pub struct EventBus {
    run_id: String,
    tx: broadcast::Sender<RunEvent>,
}

impl EventBus {
    pub fn new(run_id: impl Into<String>, capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { run_id: run_id.into(), tx }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Stamp and publish an event
    pub fn publish(&self, kind: EventKind) {
        let event = RunEvent {
            run_id: self.run_id.clone(),
            timestamp: chrono::Utc::now().to_rfc3339(),
            kind,
        };
        tracing::debug!("📣 [{}] {}", self.run_id, event.kind.name());
        // Ignore error if no receivers
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RunEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}
