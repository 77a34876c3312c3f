//! HTTP surface of the assessment worker.
//!
//! `POST /runner` dispatches on the request `action`; `GET /healthstatus`
//! answers liveness probes.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use crate::models::CodeRequest;
use crate::orchestrator::Orchestrator;
use crate::pipeline::Pipeline;

#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<Pipeline>,
    pub orchestrator: Arc<Orchestrator>,
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/healthstatus", get(health))
        .route("/runner", post(runner))
        .layer(cors)
        .with_state(state)
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

async fn runner(State(state): State<AppState>, Json(req): Json<CodeRequest>) -> Response {
    if req.action.trim().is_empty() {
        return bad_request("missing field: action");
    }
    if req.code.trim().is_empty() {
        return bad_request("missing field: code");
    }

    let action = req.action.trim().to_ascii_lowercase();
    info!(action, "runner request");
    match action.as_str() {
        "compile" => Json(state.pipeline.compile_only(&req).await).into_response(),
        "run" => Json(state.pipeline.run_program(&req).await).into_response(),
        // Both spellings occur in the wild.
        "analyze" | "analyse" => Json(state.orchestrator.analyze(&req).await).into_response(),
        _ => bad_request(&format!("unknown action: {}", req.action)),
    }
}

fn bad_request(message: &str) -> Response {
    (StatusCode::BAD_REQUEST, Json(json!({ "error": message }))).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::OpenAiReview;
    use crate::config::ToolchainConfig;
    use crate::report::TextReportWriter;
    use crate::static_analysis::BuildDiagnostics;
    use crate::test_runner::DotnetTestRunner;
    use std::net::SocketAddr;
    use std::os::unix::fs::PermissionsExt;
    use std::path::Path;

    fn stub_toolchain(dir: &Path) -> String {
        let path = dir.join("toolchain.sh");
        let script = r#"#!/bin/sh
case "$1" in
  new) exit 0 ;;
  restore) echo "restored"; exit 0 ;;
  build) echo "built"; exit 0 ;;
  *) exit 0 ;;
esac
"#;
        std::fs::write(&path, script).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path.to_string_lossy().into_owned()
    }

    async fn spawn_server(dir: &Path) -> SocketAddr {
        let toolchain = ToolchainConfig {
            command: stub_toolchain(dir),
            env: Vec::new(),
            scaffold_timeout_ms: 10_000,
            restore_timeout_ms: 10_000,
            build_timeout_ms: 10_000,
            publish_timeout_ms: 10_000,
            run_timeout_ms: 10_000,
            test_timeout_ms: 10_000,
            sampling_interval_ms: 50,
        };
        let pipeline = Arc::new(Pipeline::new(toolchain.clone()));
        let orchestrator = Arc::new(Orchestrator::new(
            Arc::new(OpenAiReview::new(None)),
            Arc::new(BuildDiagnostics::new(toolchain.clone())),
            pipeline.clone(),
            Arc::new(DotnetTestRunner::new(toolchain, dir.join("no-template"))),
            Arc::new(TextReportWriter::new(dir.join("reports"))),
        ));
        let app = router(AppState {
            pipeline,
            orchestrator,
        });

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        addr
    }

    #[tokio::test]
    async fn health_endpoint_reports_ok() {
        let dir = tempfile::tempdir().unwrap();
        let addr = spawn_server(dir.path()).await;

        let body: serde_json::Value = reqwest::get(format!("http://{addr}/healthstatus"))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn missing_action_is_rejected_with_400() {
        let dir = tempfile::tempdir().unwrap();
        let addr = spawn_server(dir.path()).await;

        let resp = reqwest::Client::new()
            .post(format!("http://{addr}/runner"))
            .json(&json!({ "code": "class P {}" }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 400);
        let body: serde_json::Value = resp.json().await.unwrap();
        assert!(body["error"].as_str().unwrap().contains("action"));
    }

    #[tokio::test]
    async fn unknown_action_is_rejected_with_400() {
        let dir = tempfile::tempdir().unwrap();
        let addr = spawn_server(dir.path()).await;

        let resp = reqwest::Client::new()
            .post(format!("http://{addr}/runner"))
            .json(&json!({ "action": "transpile", "code": "class P {}" }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 400);
        let body: serde_json::Value = resp.json().await.unwrap();
        assert!(body["error"].as_str().unwrap().contains("transpile"));
    }

    #[tokio::test]
    async fn compile_action_returns_the_build_outcome() {
        let dir = tempfile::tempdir().unwrap();
        let addr = spawn_server(dir.path()).await;

        let resp = reqwest::Client::new()
            .post(format!("http://{addr}/runner"))
            .json(&json!({ "action": "Compile", "code": "class P {}" }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
        let body: serde_json::Value = resp.json().await.unwrap();
        assert_eq!(body["success"], true);
        assert_eq!(body["exitCode"], 0);
        assert!(body["stdOut"].as_str().unwrap().contains("built"));
    }
}
