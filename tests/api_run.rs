//! HTTP surface: run endpoint and health check over a real socket

mod common;

use geoflow::config::{Config, ServerConfig};
use geoflow::server::create_app;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use tokio::net::TcpListener;

async fn spawn_app() -> String {
    let config = Config {
        server: ServerConfig { host: "127.0.0.1".into(), port: 0 },
        runtime: common::fast_config(),
        secrets: BTreeMap::new(),
    };
    let app = create_app(config).await.expect("app");

    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind app");
    let addr = listener.local_addr().expect("app address");
    tokio::spawn(async move {
        axum::serve(listener, app.into_make_service()).await.expect("serve app");
    });
    format!("http://{addr}")
}

#[tokio::test]
async fn test_healthz_reports_ok() {
    let base = spawn_app().await;
    let body: Value = reqwest::get(format!("{base}/healthz"))
        .await
        .expect("healthz")
        .json()
        .await
        .expect("healthz body");

    assert_eq!(body["status"], json!("ok"));
    assert_eq!(body["open_runs"], json!(0));
}

#[tokio::test]
async fn test_mock_run_returns_ranked_results() {
    let base = spawn_app().await;
    let response = reqwest::Client::new()
        .post(format!("{base}/api/run"))
        .json(&json!({
            "runId": "api-mock-1",
            "goal": "best 2 cafes",
            "context": { "origin": "52.52,13.405" },
            "useMocks": true
        }))
        .send()
        .await
        .expect("run request");

    assert_eq!(response.status(), reqwest::StatusCode::OK);
    let body: Value = response.json().await.expect("run body");

    assert_eq!(body["status"], json!("ok"));
    assert_eq!(body["runId"], json!("api-mock-1"));
    assert_eq!(body["results"]["ranked_list"].as_array().map(Vec::len), Some(2));
    assert_eq!(body["results"]["metrics"]["nodes_total"], json!(8));
    assert_eq!(body["health"]["status"], json!("healthy"));
    assert_eq!(body["pipeline_spec"]["nodes"].as_array().map(Vec::len), Some(8));
    assert!(body["pipeline_spec"]["nodes"]
        .as_array()
        .into_iter()
        .flatten()
        .all(|node| node["status"] == json!("completed")));
    let edges = body["pipeline_spec"]["edges"].as_array().expect("edges");
    assert_eq!(edges.len(), 9);
    assert!(edges.iter().all(|edge| edge["status"] == json!("completed")), "{edges:?}");
    assert!(body["log"]["decision"].as_array().is_some_and(|d| !d.is_empty()));
    assert_eq!(body["errors"], json!([]));
}

#[tokio::test]
async fn test_run_without_origin_is_rejected() {
    let base = spawn_app().await;
    let response = reqwest::Client::new()
        .post(format!("{base}/api/run"))
        .json(&json!({ "goal": "coffee", "context": {}, "useMocks": true }))
        .send()
        .await
        .expect("run request");

    assert_eq!(response.status(), reqwest::StatusCode::UNPROCESSABLE_ENTITY);
    let body: Value = response.json().await.expect("error body");
    assert_eq!(body["status"], json!("error"));
    assert!(body["runId"].as_str().is_some_and(|id| !id.is_empty()));
    assert!(body["error"].as_str().is_some_and(|e| e.contains("origin")));
}
