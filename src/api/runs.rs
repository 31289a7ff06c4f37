/// Pipeline run endpoints
///
/// POST /api/run plans and executes one pipeline and answers with the
/// aggregated results. GET /ws/{run_id} streams that run's events as JSON
/// text frames. Runs execute on their own task, so a client that goes away
/// only stops event delivery, never the run.

use crate::config::RuntimeConfig;
use crate::runtime::{
    engine::RunRecord,
    error::ExecError,
    events::{EventKind, RunEvent, Snapshot},
    ExecutionEngine, RunRegistry,
};
use crate::workflow::planner::{plan, Plan, RunRequest};
use crate::workflow::types::PipelineSpec;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::{get, post},
    Router,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};

/// Application state shared by the run endpoints
#[derive(Clone)]
pub struct AppState {
    /// Interpreter for pipeline specs
    pub engine: Arc<ExecutionEngine>,
    /// Run id -> event bus
    pub runs: Arc<RunRegistry>,
    /// Runtime defaults (mock mode, buffers)
    pub config: Arc<RuntimeConfig>,
}

/// Create run routes
pub fn create_run_routes() -> Router<AppState> {
    Router::new()
        .route("/api/run", post(run_pipeline))
        .route("/ws/{run_id}", get(run_events))
}

/// Plan and execute one pipeline
///
/// POST /api/run
/// Body: { "runId": "...", "goal": "...", "context": { "origin": "lat,lon", "radius_m": 1500 }, "useMocks": true }
async fn run_pipeline(
    State(state): State<AppState>,
    Json(request): Json<RunRequest>,
) -> (StatusCode, Json<Value>) {
    let run_id = request
        .run_id
        .clone()
        .filter(|id| !id.trim().is_empty())
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    let use_mocks = request.use_mocks.unwrap_or(state.config.default_use_mocks);

    tracing::info!("📥 Run request {}: {:?} (mocks: {})", run_id, request.goal, use_mocks);

    let task = tokio::spawn(execute_run(state, run_id.clone(), request, use_mocks));
    match task.await {
        Ok(response) => response,
        Err(e) => {
            tracing::error!("❌ Run task {} aborted: {}", run_id, e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "status": "error", "runId": run_id, "error": "run task aborted" })),
            )
        }
    }
}

async fn execute_run(
    state: AppState,
    run_id: String,
    request: RunRequest,
    use_mocks: bool,
) -> (StatusCode, Json<Value>) {
    let bus = state.runs.open(&run_id);
    bus.publish(EventKind::PlanningStart { goal: request.goal.clone(), use_mocks });

    let outcome = async {
        let Plan { mut spec, decisions } = plan(&request)?;
        bus.publish(EventKind::PlanningComplete { snapshot: Snapshot::of(&spec) });

        let record = state.engine.execute(&mut spec, use_mocks, &bus).await?;
        Ok::<_, ExecError>(run_response(&run_id, &spec, record, decisions))
    }
    .await;

    let response = match outcome {
        Ok(body) => (StatusCode::OK, Json(body)),
        Err(e) => {
            tracing::warn!("❌ Run {} rejected: {}", run_id, e);
            bus.publish(EventKind::Error { error: e.to_string() });
            (
                StatusCode::UNPROCESSABLE_ENTITY,
                Json(json!({ "status": "error", "runId": run_id, "error": e.to_string() })),
            )
        }
    };

    state.runs.close(&run_id);
    response
}

/// Client-facing response for a finished run
fn run_response(run_id: &str, spec: &PipelineSpec, record: RunRecord, decisions: Vec<String>) -> Value {
    json!({
        "status": "ok",
        "runId": run_id,
        "summary": record.summary,
        "results": {
            "ranked_list": record.ranked_list,
            "correlation": record.correlation,
            "metrics": record.metrics,
        },
        "pipeline_spec": spec,
        "log": {
            "run": record.log,
            "decision": decisions,
        },
        "errors": record.errors,
        "health": record.health,
    })
}

/// Stream a run's events over a websocket
///
/// GET /ws/{run_id}
/// Subscribing before the run starts is fine: the channel is opened here
/// and picked up by the run.
async fn run_events(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Path(run_id): Path<String>,
) -> impl IntoResponse {
    let rx = state.runs.open(&run_id).subscribe();
    ws.on_upgrade(move |socket| relay_events(socket, rx, run_id))
}

async fn relay_events(mut socket: WebSocket, mut rx: broadcast::Receiver<RunEvent>, run_id: String) {
    tracing::debug!("🔌 Subscriber attached to run {}", run_id);

    loop {
        tokio::select! {
            event = rx.recv() => match event {
                Ok(event) => {
                    let terminal = event.kind.is_terminal();
                    let text = match serde_json::to_string(&event) {
                        Ok(text) => text,
                        Err(e) => {
                            tracing::warn!("⚠️ Failed to encode {} event: {}", event.kind.name(), e);
                            continue;
                        }
                    };
                    if socket.send(Message::Text(text.into())).await.is_err() || terminal {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!("⚠️ Subscriber for run {} lagged, skipped {} event(s)", run_id, skipped);
                }
                Err(RecvError::Closed) => break,
            },
            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }

    let _ = socket.send(Message::Close(None)).await;
    tracing::debug!("🔌 Subscriber detached from run {}", run_id);
}
