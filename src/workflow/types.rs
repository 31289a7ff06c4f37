/// Core pipeline type definitions
///
/// Defines the declarative specification the engine interprets: an ordered
/// node list (HTTP calls and pure transforms), descriptive edges, an origin
/// coordinate and free-form context. These types travel as JSON between the
/// planner, the engine and event subscribers.

use crate::runtime::error::ExecError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::{collections::BTreeMap, fmt, str::FromStr};

/// A complete pipeline specification
///
/// Nodes execute strictly in declaration order. Edges never influence
/// execution; they only carry status for whoever renders the graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineSpec {
    /// Ordered list of nodes
    pub nodes: Vec<Node>,
    /// Descriptive links between nodes
    #[serde(default)]
    pub edges: Vec<Edge>,
    /// Reference point for routing and place lookups
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<Origin>,
    /// Free-form run context (radius_m, time, ...)
    #[serde(default)]
    pub context: Map<String, Value>,
}

impl PipelineSpec {
    /// Validate and decode a specification produced by a planner or a client
    ///
    /// Fails fast when `nodes` is missing, not a list, or empty.
    pub fn from_value(value: Value) -> Result<Self, ExecError> {
        match value.get("nodes") {
            None => return Err(ExecError::InvalidSpec("missing 'nodes'".into())),
            Some(Value::Array(nodes)) if nodes.is_empty() => {
                return Err(ExecError::InvalidSpec("'nodes' is empty".into()))
            }
            Some(Value::Array(_)) => {}
            Some(_) => return Err(ExecError::InvalidSpec("'nodes' must be a list".into())),
        }

        serde_json::from_value(value).map_err(|e| ExecError::InvalidSpec(e.to_string()))
    }

    /// Find a node by id
    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.iter().find(|node| node.id == id)
    }

    /// Put every node and edge back to `pending` and clear per-run fields
    pub fn reset(&mut self) {
        for node in &mut self.nodes {
            node.status = NodeStatus::Pending;
            node.latency_ms = None;
            node.error_message = None;
        }
        for edge in &mut self.edges {
            edge.status = NodeStatus::Pending;
        }
    }
}

/// A single step of the pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    /// Unique, stable node key (also the output store key)
    pub id: String,
    /// Human-readable label
    #[serde(default)]
    pub name: String,
    /// HTTP call or transform, tagged by `type`
    #[serde(flatten)]
    pub kind: NodeKind,
    /// Mutable run status
    #[serde(default)]
    pub status: NodeStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

/// The two supported node kinds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum NodeKind {
    /// Templated HTTP call with retry, mapping and optional fan-out
    Http(HttpNode),
    /// Pure data transform over earlier outputs
    Transform(TransformNode),
}

/// HTTP node definition
///
/// Every string in `url`, `headers`, `params`, `body` and `compose` is a
/// template (see `runtime::template`). `map` turns the raw response body into
/// named output columns, one path expression per column.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpNode {
    #[serde(default = "default_method")]
    pub method: String,
    pub url: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub params: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<BTreeMap<String, String>>,
    /// Named templates evaluated first, in declaration order
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub compose: Map<String, Value>,
    /// Output column name -> path expression over the response body
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub map: Option<BTreeMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetrySpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fanout: Option<FanoutSpec>,
    /// Accepted but never executed: exhausting retries with a fallback
    /// declared fails the node.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback: Option<Value>,
    /// Canned raw response body used in mock mode
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mock: Option<Value>,
}

fn default_method() -> String {
    "GET".to_string()
}

/// Retry policy for one HTTP node
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrySpec {
    /// Additional attempts after the first one
    #[serde(default)]
    pub times: u32,
    /// Base delay; doubles after every failed attempt
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
}

fn default_backoff_ms() -> u64 {
    250
}

/// Bounded parallel repetition of an HTTP node
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FanoutSpec {
    /// Path expression yielding the collection to iterate
    pub over: String,
    /// Cap on the number of calls dispatched
    #[serde(default = "default_fanout_max")]
    pub max: usize,
    /// Scope variable name -> field of the current item
    #[serde(default)]
    pub mapping: BTreeMap<String, String>,
}

fn default_fanout_max() -> usize {
    10
}

/// Transform node definition
///
/// `fn` names a transform from `runtime::transforms`; `args` are decoded into
/// that transform's typed argument struct when the node runs, so an unknown
/// name fails the node rather than the whole spec.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransformNode {
    #[serde(rename = "fn")]
    pub function: String,
    #[serde(default)]
    pub args: Value,
}

/// Descriptive link between two nodes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Edge {
    pub from: String,
    pub to: String,
    /// Mirrors the terminal status of the source node
    #[serde(default)]
    pub status: NodeStatus,
}

impl Edge {
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self { from: from.into(), to: to.into(), status: NodeStatus::Pending }
    }
}

/// Node and edge lifecycle: pending -> running -> completed | failed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    #[default]
    Pending,
    Running,
    Completed,
    Failed,
}

/// Geographic coordinate
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Origin {
    pub lat: f64,
    pub lon: f64,
}

impl FromStr for Origin {
    type Err = String;

    /// Parse the `"lat,lon"` form used by run requests
    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let (lat, lon) = raw
            .split_once(',')
            .ok_or_else(|| format!("expected \"lat,lon\", got {raw:?}"))?;
        let lat: f64 = lat.trim().parse().map_err(|_| format!("invalid latitude in {raw:?}"))?;
        let lon: f64 = lon.trim().parse().map_err(|_| format!("invalid longitude in {raw:?}"))?;

        if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lon) {
            return Err(format!("coordinate out of range: {raw:?}"));
        }
        Ok(Origin { lat, lon })
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.lat, self.lon)
    }
}
