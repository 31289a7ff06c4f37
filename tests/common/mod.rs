//! Shared fixtures: an in-process stand-in for the remote APIs

#![allow(dead_code)]

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use geoflow::config::RuntimeConfig;
use geoflow::runtime::{ExecutionEngine, HttpRunner};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};
use std::time::Duration;
use tokio::net::TcpListener;

/// How long `GET /slow` takes to answer
pub const SLOW_RESPONSE_MS: u64 = 1_000;

/// Hit counters for the stub endpoints
#[derive(Debug, Default)]
pub struct Hits {
    pub places: AtomicUsize,
    pub flaky: AtomicUsize,
    pub items: AtomicUsize,
    pub slow: AtomicUsize,
}

impl Hits {
    pub fn flaky(&self) -> usize {
        self.flaky.load(Ordering::SeqCst)
    }

    pub fn items(&self) -> usize {
        self.items.load(Ordering::SeqCst)
    }

    pub fn slow(&self) -> usize {
        self.slow.load(Ordering::SeqCst)
    }
}

/// Running stub API
pub struct StubApi {
    pub base: String,
    pub hits: Arc<Hits>,
}

/// Serve the stub API on an ephemeral port
///
/// - `GET /places` three elements with `lat` and `name`
/// - `GET /flaky` always 500
/// - `GET /item/{n}` `{ "value": n * 10 }`, except n = 1 which is a 500
/// - `GET /slow` answers only after `SLOW_RESPONSE_MS`
pub async fn spawn_stub_api() -> StubApi {
    let hits = Arc::new(Hits::default());

    let app = Router::new()
        .route("/places", get(places))
        .route("/flaky", get(flaky))
        .route("/item/{n}", get(item))
        .route("/slow", get(slow))
        .with_state(Arc::clone(&hits));

    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind stub api");
    let addr = listener.local_addr().expect("stub api address");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("serve stub api");
    });

    StubApi { base: format!("http://{addr}"), hits }
}

async fn places(State(hits): State<Arc<Hits>>) -> Json<Value> {
    hits.places.fetch_add(1, Ordering::SeqCst);
    Json(json!({
        "elements": [
            { "lat": 1.0, "name": "a" },
            { "lat": 2.0, "name": "b" },
            { "lat": 3.0, "name": "c" }
        ]
    }))
}

async fn flaky(State(hits): State<Arc<Hits>>) -> (StatusCode, &'static str) {
    hits.flaky.fetch_add(1, Ordering::SeqCst);
    (StatusCode::INTERNAL_SERVER_ERROR, "upstream exploded")
}

async fn item(State(hits): State<Arc<Hits>>, Path(n): Path<u64>) -> Result<Json<Value>, StatusCode> {
    hits.items.fetch_add(1, Ordering::SeqCst);
    if n == 1 {
        return Err(StatusCode::INTERNAL_SERVER_ERROR);
    }
    Ok(Json(json!({ "value": n * 10 })))
}

async fn slow(State(hits): State<Arc<Hits>>) -> Json<Value> {
    hits.slow.fetch_add(1, Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(SLOW_RESPONSE_MS)).await;
    Json(json!({ "late": true }))
}

/// Runtime settings without artificial delays
pub fn fast_config() -> RuntimeConfig {
    RuntimeConfig {
        fanout_dispatch_delay_ms: 0,
        mock_delay_ms: 0,
        http_timeout_ms: 5_000,
        ..RuntimeConfig::default()
    }
}

pub fn engine() -> ExecutionEngine {
    let http = HttpRunner::new(fast_config(), BTreeMap::new()).expect("http runner");
    ExecutionEngine::new(http)
}
