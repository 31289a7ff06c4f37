/// Pipeline execution engine
///
/// Interprets a `PipelineSpec` node by node in declaration order. Each node
/// goes pending -> running -> completed | failed; a failed node never stops
/// the run, later nodes simply see its output as missing. Every transition
/// is published on the run's event bus with a full node/edge snapshot.

use crate::runtime::{
    error::ExecError,
    events::{EventBus, EventKind, Snapshot},
    http::{HttpRunner, ItemError},
    rows::as_rows,
    scope::Scope,
    transforms::Transform,
};
use crate::workflow::types::{NodeKind, NodeStatus, PipelineSpec};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::{collections::HashMap, time::Instant};

/// Everything a run produced
#[derive(Debug, Clone, Serialize)]
pub struct RunRecord {
    /// Output store: node id -> produced value
    pub outputs: Map<String, Value>,
    /// One entry per node, in execution order
    pub log: Vec<LogEntry>,
    /// Node failures and scoped fan-out item failures
    pub errors: Vec<RunError>,
    pub metrics: RunMetrics,
    pub ranked_list: Vec<Value>,
    pub correlation: Value,
    pub summary: String,
    pub health: RunHealth,
}

#[derive(Debug, Clone, Serialize)]
pub struct LogEntry {
    pub node_id: String,
    pub status: NodeStatus,
    pub attempts: u32,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunError {
    /// Node id, or `node[index]` for a fan-out item
    pub node_id: String,
    pub message: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RunMetrics {
    pub nodes_total: usize,
    pub nodes_completed: usize,
    pub nodes_failed: usize,
    pub http_attempts: u32,
    pub rows_joined: usize,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunHealth {
    pub status: HealthStatus,
    pub success_rate: f64,
    pub failed_nodes: Vec<String>,
}

/// What one node produced before bookkeeping
struct NodeOutcome {
    data: Value,
    attempts: u32,
    item_errors: Vec<ItemError>,
}

/// Edge lookup by node id, built with petgraph
///
/// Edge weights are positions in `spec.edges`. Edges naming unknown nodes
/// are left out; they simply never change status.
struct EdgeIndex {
    graph: DiGraph<(), usize>,
    nodes: HashMap<String, NodeIndex>,
}

impl EdgeIndex {
    fn build(spec: &PipelineSpec) -> Self {
        let mut graph = DiGraph::new();
        let nodes: HashMap<String, NodeIndex> = spec
            .nodes
            .iter()
            .map(|node| (node.id.clone(), graph.add_node(())))
            .collect();

        for (position, edge) in spec.edges.iter().enumerate() {
            match (nodes.get(&edge.from), nodes.get(&edge.to)) {
                (Some(&from), Some(&to)) => {
                    graph.add_edge(from, to, position);
                }
                _ => tracing::warn!("⚠️ Edge '{}' → '{}' references an unknown node", edge.from, edge.to),
            }
        }

        Self { graph, nodes }
    }

    fn edges(&self, node_id: &str, direction: Direction) -> Vec<usize> {
        match self.nodes.get(node_id) {
            Some(&index) => self.graph.edges_directed(index, direction).map(|e| *e.weight()).collect(),
            None => Vec::new(),
        }
    }
}

/// Runs pipeline specs
#[derive(Debug)]
pub struct ExecutionEngine {
    http: HttpRunner,
}

impl ExecutionEngine {
    pub fn new(http: HttpRunner) -> Self {
        Self { http }
    }

    /// Execute every node in order and assemble the run record
    ///
    /// Only an unusable spec is an `Err`; node failures are recorded in the
    /// record and the run carries on.
    pub async fn execute(
        &self,
        spec: &mut PipelineSpec,
        use_mocks: bool,
        bus: &EventBus,
    ) -> Result<RunRecord, ExecError> {
        if spec.nodes.is_empty() {
            return Err(ExecError::InvalidSpec("'nodes' is empty".into()));
        }

        let run_start = Instant::now();
        spec.reset();
        let edges = EdgeIndex::build(spec);
        let mut scope = Scope::new(spec.origin, spec.context.clone());
        let mut log = Vec::with_capacity(spec.nodes.len());
        let mut errors = Vec::new();
        let mut http_attempts = 0;

        tracing::info!("🚀 Executing run {} with {} node(s) (mocks: {})", bus.run_id(), spec.nodes.len(), use_mocks);
        bus.publish(EventKind::ExecutionStart {});

        for position in 0..spec.nodes.len() {
            let node_id = spec.nodes[position].id.clone();
            let kind = spec.nodes[position].kind.clone();

            spec.nodes[position].status = NodeStatus::Running;
            for edge in edges.edges(&node_id, Direction::Incoming) {
                spec.edges[edge].status = NodeStatus::Running;
            }
            tracing::info!("📍 Step {}/{}: '{}'", position + 1, spec.nodes.len(), node_id);
            bus.publish(EventKind::NodeStart { node_id: node_id.clone(), snapshot: Snapshot::of(spec) });

            let started = Instant::now();
            let outcome = self.run_node(&node_id, &kind, &scope, use_mocks).await;
            let elapsed_ms = started.elapsed().as_millis() as u64;

            match outcome {
                Ok(NodeOutcome { data, attempts, item_errors }) => {
                    http_attempts += attempts;
                    for ItemError { index, message } in item_errors {
                        errors.push(RunError { node_id: format!("{node_id}[{index}]"), message });
                    }
                    scope.set_output(&node_id, data);

                    let node = &mut spec.nodes[position];
                    node.status = NodeStatus::Completed;
                    node.latency_ms = Some(elapsed_ms);
                    for edge in edges.edges(&node_id, Direction::Outgoing) {
                        spec.edges[edge].status = NodeStatus::Completed;
                    }
                    settle_incoming(spec, &edges, &node_id);
                    log.push(LogEntry {
                        node_id: node_id.clone(),
                        status: NodeStatus::Completed,
                        attempts,
                        duration_ms: elapsed_ms,
                        error: None,
                    });

                    tracing::info!("✅ Node '{}' completed in {}ms", node_id, elapsed_ms);
                    bus.publish(EventKind::NodeComplete {
                        node_id,
                        latency_ms: elapsed_ms,
                        snapshot: Snapshot::of(spec),
                    });
                }
                Err(e) => {
                    let message = e.to_string();
                    http_attempts += e.attempts();

                    let node = &mut spec.nodes[position];
                    node.status = NodeStatus::Failed;
                    node.latency_ms = Some(elapsed_ms);
                    node.error_message = Some(message.clone());
                    for edge in edges.edges(&node_id, Direction::Outgoing) {
                        spec.edges[edge].status = NodeStatus::Failed;
                    }
                    settle_incoming(spec, &edges, &node_id);
                    errors.push(RunError { node_id: node_id.clone(), message: message.clone() });
                    log.push(LogEntry {
                        node_id: node_id.clone(),
                        status: NodeStatus::Failed,
                        attempts: e.attempts(),
                        duration_ms: elapsed_ms,
                        error: Some(message.clone()),
                    });

                    tracing::error!("❌ Node '{}' failed after {}ms: {}", node_id, elapsed_ms, message);
                    bus.publish(EventKind::NodeFail {
                        node_id,
                        error: message,
                        duration_ms: elapsed_ms,
                        snapshot: Snapshot::of(spec),
                    });
                }
            }
        }

        let record = assemble(spec, scope, log, errors, http_attempts, run_start);
        tracing::info!("🎉 Run {} finished in {}ms: {}", bus.run_id(), record.metrics.duration_ms, record.summary);

        bus.publish(EventKind::PipelineComplete {
            snapshot: Snapshot::of(spec),
            summary: record.summary.clone(),
            correlation: record.correlation.clone(),
            health: json!(record.health),
        });
        Ok(record)
    }

    async fn run_node(
        &self,
        node_id: &str,
        kind: &NodeKind,
        scope: &Scope,
        use_mocks: bool,
    ) -> Result<NodeOutcome, ExecError> {
        match kind {
            NodeKind::Http(http) => {
                let outcome = self.http.run(node_id, http, scope, use_mocks).await?;
                Ok(NodeOutcome { data: outcome.data, attempts: outcome.attempts, item_errors: outcome.item_errors })
            }
            NodeKind::Transform(t) => {
                let transform = Transform::parse(&t.function, &t.args)?;
                tracing::debug!("🧮 Applying {} for '{}'", transform.name(), node_id);
                let data = transform.apply(scope)?;
                Ok(NodeOutcome { data, attempts: 0, item_errors: Vec::new() })
            }
        }
    }
}

/// Incoming edges stop showing `running` once their target settles and go
/// back to mirroring their source node
fn settle_incoming(spec: &mut PipelineSpec, edges: &EdgeIndex, node_id: &str) {
    for position in edges.edges(node_id, Direction::Incoming) {
        let source = spec.edges[position].from.as_str();
        if let Some(status) = spec.node(source).map(|n| n.status) {
            spec.edges[position].status = status;
        }
    }
}

/// Build final aggregates from whatever the run produced
fn assemble(
    spec: &PipelineSpec,
    scope: Scope,
    log: Vec<LogEntry>,
    errors: Vec<RunError>,
    http_attempts: u32,
    run_start: Instant,
) -> RunRecord {
    let ranked_list = last_output_of(spec, &scope, "top_n")
        .map(as_rows)
        .unwrap_or_default();
    let correlation = last_output_of(spec, &scope, "correlation")
        .cloned()
        .unwrap_or_else(|| json!({ "x": null, "y": null, "pearson_r": 0.0, "n": 0 }));
    let rows_joined = last_output_of(spec, &scope, "join_on_index")
        .map(|v| as_rows(v).len())
        .unwrap_or(0);

    let nodes_completed = spec.nodes.iter().filter(|n| n.status == NodeStatus::Completed).count();
    let nodes_failed = spec.nodes.iter().filter(|n| n.status == NodeStatus::Failed).count();
    let metrics = RunMetrics {
        nodes_total: spec.nodes.len(),
        nodes_completed,
        nodes_failed,
        http_attempts,
        rows_joined,
        duration_ms: run_start.elapsed().as_millis() as u64,
    };

    let health = RunHealth {
        status: if nodes_failed == spec.nodes.len() {
            HealthStatus::Failed
        } else if errors.is_empty() {
            HealthStatus::Healthy
        } else {
            HealthStatus::Degraded
        },
        success_rate: nodes_completed as f64 / spec.nodes.len().max(1) as f64,
        failed_nodes: spec
            .nodes
            .iter()
            .filter(|n| n.status == NodeStatus::Failed)
            .map(|n| n.id.clone())
            .collect(),
    };

    let summary = summarize(&ranked_list, rows_joined, &correlation);

    RunRecord {
        outputs: scope.outputs().clone(),
        log,
        errors,
        metrics,
        ranked_list,
        correlation,
        summary,
        health,
    }
}

/// Output of the last completed transform node with this function name
fn last_output_of<'a>(spec: &PipelineSpec, scope: &'a Scope, function: &str) -> Option<&'a Value> {
    spec.nodes
        .iter()
        .rev()
        .filter(|node| node.status == NodeStatus::Completed)
        .find(|node| matches!(&node.kind, NodeKind::Transform(t) if t.function == function))
        .and_then(|node| scope.output(&node.id))
}

/// One-line, human-readable result summary
pub fn summarize(ranked: &[Value], rows_joined: usize, correlation: &Value) -> String {
    let Some(best) = ranked.first() else {
        return "No results.".to_string();
    };

    let name = ["name", "tags.name"]
        .iter()
        .find_map(|path| crate::runtime::path::lookup(best, path).and_then(Value::as_str))
        .unwrap_or("unnamed place");
    let score = best.get("score").and_then(Value::as_f64).unwrap_or(0.0);
    let r = correlation.get("pearson_r").and_then(Value::as_f64).unwrap_or(0.0);
    let label = |key: &str| correlation.get(key).and_then(Value::as_str).unwrap_or("?").to_string();

    format!(
        "Top {} of {} candidates; best is {} (score {:.2}). Correlation {} vs {}: r = {:.2}.",
        ranked.len(),
        rows_joined,
        name,
        score,
        label("x"),
        label("y"),
        r
    )
}
