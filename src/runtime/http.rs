/// HTTP node runner
///
/// Compiles a node's templates against the scope, performs the call with a
/// per-call timeout and the node's retry policy, and maps the raw response
/// into named output columns. With `fanout`, the node runs once per item of
/// a collection (bounded by `fanout.max`) and the results are merged
/// column-wise by item position.

use crate::config::RuntimeConfig;
use crate::runtime::{
    error::ExecError,
    mock, path,
    retry::{Attempted, RetryPolicy},
    rows::as_rows,
    scope::Scope,
    template::interpolate,
};
use crate::workflow::types::{FanoutSpec, HttpNode};
use futures::future::join_all;
use serde_json::{Map, Value};
use std::{collections::BTreeMap, sync::Arc, time::Duration};

/// Longest slice of an error body kept in error messages
const ERROR_BODY_LIMIT: usize = 200;

/// A fully interpolated request, ready to send (or to mock)
#[derive(Debug, Clone)]
pub struct CompiledRequest {
    pub method: reqwest::Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub params: Vec<(String, String)>,
    pub body: Option<BTreeMap<String, String>>,
    /// Send `body` form-encoded instead of as JSON
    pub form: bool,
    pub timeout: Duration,
}

/// Outcome of one HTTP node
#[derive(Debug, Clone)]
pub struct HttpOutcome {
    /// Mapped output (columns) or the raw body when the node has no `map`
    pub data: Value,
    /// Attempts used; the maximum across calls for a fan-out
    pub attempts: u32,
    /// Always false: declared fallbacks are never executed
    pub fallback_used: bool,
    /// Fan-out positions that failed
    pub item_errors: Vec<ItemError>,
}

#[derive(Debug, Clone)]
pub struct ItemError {
    pub index: usize,
    pub message: String,
}

/// Executes HTTP nodes
#[derive(Debug, Clone)]
pub struct HttpRunner {
    client: reqwest::Client,
    config: RuntimeConfig,
    secrets: Arc<BTreeMap<String, String>>,
}

impl HttpRunner {
    /// Create a runner with a shared connection pool
    pub fn new(config: RuntimeConfig, secrets: BTreeMap<String, String>) -> Result<Self, ExecError> {
        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| ExecError::Transport(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { client, config, secrets: Arc::new(secrets) })
    }

    /// Run one HTTP node (single call or fan-out)
    pub async fn run(
        &self,
        node_id: &str,
        node: &HttpNode,
        scope: &Scope,
        use_mocks: bool,
    ) -> Result<HttpOutcome, ExecError> {
        if let Some(fanout) = &node.fanout {
            return self.run_fanout(node_id, node, fanout, scope, use_mocks).await;
        }

        let Attempted { result, attempts } = self.call(node_id, node, scope, use_mocks).await;
        Ok(HttpOutcome { data: result?, attempts, fallback_used: false, item_errors: Vec::new() })
    }

    /// One logical call: compile, then send with retries (or mock)
    async fn call(&self, label: &str, node: &HttpNode, scope: &Scope, use_mocks: bool) -> Attempted<Value> {
        let request = match self.compile(label, node, scope) {
            Ok(request) => request,
            Err(e) => return Attempted { result: Err(e), attempts: 0 },
        };

        if use_mocks {
            tracing::debug!("🎭 Mocking {} {} for '{}'", request.method, request.url, label);
            tokio::time::sleep(Duration::from_millis(self.config.mock_delay_ms)).await;
            let body = mock::respond(node, &request, scope.origin());
            return Attempted { result: Ok(apply_map(node, body)), attempts: 1 };
        }

        let policy = node
            .retry
            .as_ref()
            .map(|r| RetryPolicy::new(r.times, r.backoff_ms))
            .unwrap_or_default();

        let Attempted { result, attempts } = policy
            .run(label, |attempt| {
                let request = &request;
                async move {
                    tracing::debug!("🌍 [{}] {} {} (attempt {})", label, request.method, request.url, attempt);
                    self.send(request).await
                }
            })
            .await;

        let result = match result {
            Ok(body) => Ok(apply_map(node, body)),
            Err(e) if node.fallback.is_some() => {
                tracing::warn!("⚠️ '{}' declares a fallback, which is not supported", label);
                Err(ExecError::FallbackUnsupported { attempts, message: e.to_string() })
            }
            Err(e) => Err(ExecError::RetriesExhausted { attempts, message: e.to_string() }),
        };
        Attempted { result, attempts }
    }

    /// Interpolate every template field of the node
    ///
    /// `compose` entries are evaluated first, in declaration order; each one
    /// becomes a scope variable visible to later entries and to the request
    /// templates. Headers additionally see `secrets.*`.
    pub fn compile(&self, label: &str, node: &HttpNode, scope: &Scope) -> Result<CompiledRequest, ExecError> {
        let method = parse_method(&node.method).ok_or_else(|| ExecError::InvalidNode {
            node: label.to_string(),
            reason: format!("unsupported HTTP method: {}", node.method),
        })?;

        let mut scope = scope.clone();
        for (name, template) in &node.compose {
            let value = match template {
                Value::String(template) => Value::String(interpolate(template, &scope)),
                literal => literal.clone(),
            };
            scope.set_var(name, value);
        }

        let header_scope = scope.with_secrets(Arc::clone(&self.secrets));
        let headers: Vec<(String, String)> = node
            .headers
            .iter()
            .map(|(name, template)| (name.clone(), interpolate(template, &header_scope)))
            .collect();

        let form = headers.iter().any(|(name, value)| {
            name.eq_ignore_ascii_case("content-type")
                && value.to_ascii_lowercase().contains("application/x-www-form-urlencoded")
        });

        Ok(CompiledRequest {
            method,
            url: interpolate(&node.url, &scope),
            headers,
            params: node
                .params
                .iter()
                .map(|(name, template)| (name.clone(), interpolate(template, &scope)))
                .collect(),
            body: node.body.as_ref().map(|body| {
                body.iter()
                    .map(|(name, template)| (name.clone(), interpolate(template, &scope)))
                    .collect()
            }),
            form,
            timeout: Duration::from_millis(node.timeout_ms.unwrap_or(self.config.http_timeout_ms)),
        })
    }

    /// Issue the request; only 2xx counts as success
    async fn send(&self, request: &CompiledRequest) -> Result<Value, ExecError> {
        let mut builder = self
            .client
            .request(request.method.clone(), &request.url)
            .timeout(request.timeout);

        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if !request.params.is_empty() {
            builder = builder.query(&request.params);
        }
        if let Some(body) = &request.body {
            builder = if request.form { builder.form(body) } else { builder.json(body) };
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                ExecError::Timeout(request.timeout.as_millis() as u64)
            } else {
                ExecError::Transport(e.to_string())
            }
        })?;

        let status = response.status();
        let text = response.text().await.map_err(|e| ExecError::Transport(format!("failed to read response body: {e}")))?;
        tracing::debug!("📡 {} {} -> {}", request.method, request.url, status);

        if !status.is_success() {
            return Err(ExecError::Status { status: status.as_u16(), body: truncate(&text, ERROR_BODY_LIMIT) });
        }

        Ok(serde_json::from_str(&text).unwrap_or(Value::String(text)))
    }

    /// Run the node once per item, in parallel, and merge by position
    async fn run_fanout(
        &self,
        node_id: &str,
        node: &HttpNode,
        fanout: &FanoutSpec,
        scope: &Scope,
        use_mocks: bool,
    ) -> Result<HttpOutcome, ExecError> {
        let items = scope.resolve_path(&fanout.over).map(|v| as_rows(&v)).unwrap_or_default();
        let count = fanout.max.min(items.len());
        let gap = self.config.fanout_dispatch_delay_ms;

        tracing::info!("🪭 Fan-out '{}': {} of {} item(s) over '{}'", node_id, count, items.len(), fanout.over);

        let calls = items.iter().take(count).enumerate().map(|(index, item)| {
            let item_scope = scope.with_vars(bind_item(&fanout.mapping, item));
            let label = format!("{node_id}[{index}]");
            async move {
                if gap > 0 && index > 0 {
                    tokio::time::sleep(Duration::from_millis(gap * index as u64)).await;
                }
                self.call(&label, node, &item_scope, use_mocks).await
            }
        });
        let settled = join_all(calls).await;

        let mut columns = Columns::new(count, node.map.as_ref().map(|m| m.keys().cloned().collect()));
        let mut attempts = 0;
        let mut item_errors = Vec::new();
        let mut last_error = None;

        for (index, Attempted { result, attempts: used }) in settled.into_iter().enumerate() {
            attempts = attempts.max(used);
            match result {
                Ok(data) => columns.fill(index, data),
                Err(e) => {
                    tracing::warn!("❌ Fan-out call {}[{}] failed: {}", node_id, index, e);
                    item_errors.push(ItemError { index, message: e.to_string() });
                    last_error = Some(e);
                }
            }
        }

        if count > 0 && item_errors.len() == count {
            let message = last_error.map(|e| e.to_string()).unwrap_or_default();
            return Err(ExecError::FanoutFailed { failed: count, attempts, message });
        }

        Ok(HttpOutcome { data: columns.into_value(), attempts, fallback_used: false, item_errors })
    }
}

/// Column-wise merge target for fan-out results, indexed by item position
struct Columns {
    len: usize,
    columns: Vec<(String, Vec<Value>)>,
}

impl Columns {
    fn new(len: usize, names: Option<Vec<String>>) -> Self {
        let columns = names
            .unwrap_or_default()
            .into_iter()
            .map(|name| (name, vec![Value::Null; len]))
            .collect();
        Self { len, columns }
    }

    fn column(&mut self, name: &str) -> &mut Vec<Value> {
        let position = match self.columns.iter().position(|(n, _)| n == name) {
            Some(position) => position,
            None => {
                self.columns.push((name.to_string(), vec![Value::Null; self.len]));
                self.columns.len() - 1
            }
        };
        &mut self.columns[position].1
    }

    fn fill(&mut self, index: usize, data: Value) {
        match data {
            Value::Object(fields) => {
                for (name, value) in fields {
                    self.column(&name)[index] = value;
                }
            }
            other => self.column("value")[index] = other,
        }
    }

    fn into_value(self) -> Value {
        Value::Object(
            self.columns
                .into_iter()
                .map(|(name, values)| (name, Value::Array(values)))
                .collect(),
        )
    }
}

/// Scope variables for one fan-out item: `item` plus the configured mapping
fn bind_item(mapping: &BTreeMap<String, String>, item: &Value) -> Map<String, Value> {
    let mut vars = Map::new();
    vars.insert("item".into(), item.clone());
    for (var, field) in mapping {
        let value = path::lookup(item, field).cloned().unwrap_or(Value::Null);
        vars.insert(var.clone(), value);
    }
    vars
}

/// Turn the raw body into named columns; a failing path yields null
fn apply_map(node: &HttpNode, body: Value) -> Value {
    match &node.map {
        None => body,
        Some(map) => Value::Object(
            map.iter()
                .map(|(column, expr)| (column.clone(), path::resolve_str(&body, expr).unwrap_or(Value::Null)))
                .collect(),
        ),
    }
}

fn parse_method(raw: &str) -> Option<reqwest::Method> {
    match raw.trim().to_ascii_uppercase().as_str() {
        "GET" => Some(reqwest::Method::GET),
        "POST" => Some(reqwest::Method::POST),
        "PUT" => Some(reqwest::Method::PUT),
        "PATCH" => Some(reqwest::Method::PATCH),
        "DELETE" => Some(reqwest::Method::DELETE),
        _ => None,
    }
}

fn truncate(text: &str, limit: usize) -> String {
    match text.char_indices().nth(limit) {
        Some((cut, _)) => format!("{}…", &text[..cut]),
        None => text.to_string(),
    }
}
