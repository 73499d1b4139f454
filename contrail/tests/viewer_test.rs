//! Viewer Server Integration Tests

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tower::ServiceExt;

use contrail::viewer::{ensure_artifact, router, ViewerState};
use shared_types::TraceRecord;

fn write_capture_log(dir: &Path) -> PathBuf {
    let path = dir.join("trace.jsonl");
    let mut record = TraceRecord::new(json!({
        "model": "gpt-4",
        "messages": [
            {"role": "system", "content": "Be helpful"},
            {"role": "user", "content": "What's 2+2?"},
        ],
    }));
    record.response = Some(json!({
        "model": "gpt-4",
        "choices": [{"message": {"role": "assistant", "content": "4"}}],
    }));
    let mut line = serde_json::to_string(&record).expect("record");
    line.push('\n');
    std::fs::write(&path, line).expect("write log");
    path
}

fn app_for(artifact_path: PathBuf) -> axum::Router {
    router(Arc::new(ViewerState { artifact_path }))
}

async fn get_response(app: &axum::Router, uri: &str) -> (StatusCode, Vec<u8>) {
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("GET")
                .uri(uri)
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");
    let status = response.status();
    let body = response
        .into_body()
        .collect()
        .await
        .expect("collect body")
        .to_bytes()
        .to_vec();
    (status, body)
}

#[tokio::test]
async fn test_index_serves_the_ui() {
    let dir = tempfile::tempdir().expect("temp dir");
    let app = app_for(dir.path().join("artifact.json"));

    let (status, body) = get_response(&app, "/").await;
    assert_eq!(status, StatusCode::OK);
    let html = String::from_utf8(body).expect("utf8");
    assert!(html.contains("contrail"));
    assert!(html.contains("/viewer.js"));

    let (status, body) = get_response(&app, "/viewer.js").await;
    assert_eq!(status, StatusCode::OK);
    assert!(String::from_utf8(body).expect("utf8").contains("data.json"));
}

#[tokio::test]
async fn test_data_json_serves_cooked_artifact() {
    let dir = tempfile::tempdir().expect("temp dir");
    let log = write_capture_log(dir.path());
    let artifact_path = ensure_artifact(&log).expect("cook");
    let app = app_for(artifact_path);

    let (status, body) = get_response(&app, "/data.json").await;
    assert_eq!(status, StatusCode::OK);
    let artifact: Value = serde_json::from_slice(&body).expect("artifact json");
    assert_eq!(artifact["requests"].as_array().expect("requests").len(), 1);
    assert_eq!(artifact["messages"][0]["content"], "Be helpful");
}

#[tokio::test]
async fn test_data_json_404s_without_artifact() {
    let dir = tempfile::tempdir().expect("temp dir");
    let app = app_for(dir.path().join("missing.json"));

    let (status, body) = get_response(&app, "/data.json").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let error: Value = serde_json::from_slice(&body).expect("error json");
    assert!(error["error"].is_string());
}

#[tokio::test]
async fn test_local_endpoint_cooks_on_demand() {
    let dir = tempfile::tempdir().expect("temp dir");
    let log = write_capture_log(dir.path());
    let app = app_for(dir.path().join("unused.json"));

    let uri = format!("/_local?path={}", log.display());
    let (status, body) = get_response(&app, &uri).await;
    assert_eq!(status, StatusCode::OK);
    let artifact: Value = serde_json::from_slice(&body).expect("artifact json");
    assert_eq!(artifact["requests"].as_array().expect("requests").len(), 1);

    let (status, _) = get_response(&app, "/_local?path=/no/such/file.jsonl").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_stale_artifact_is_recooked() {
    let dir = tempfile::tempdir().expect("temp dir");
    let log = write_capture_log(dir.path());

    let artifact_path = ensure_artifact(&log).expect("first cook");
    let first: Value =
        serde_json::from_str(&std::fs::read_to_string(&artifact_path).expect("read"))
            .expect("json");
    assert_eq!(first["requests"].as_array().expect("requests").len(), 1);

    // Append a second record and backdate the artifact so the log is newer.
    let mut record = TraceRecord::new(json!({
        "model": "gpt-4",
        "messages": [{"role": "user", "content": "another"}],
    }));
    record.response = Some(json!({
        "model": "gpt-4",
        "choices": [{"message": {"role": "assistant", "content": "sure"}}],
    }));
    let mut line = serde_json::to_string(&record).expect("record");
    line.push('\n');
    use std::io::Write;
    let mut file = std::fs::OpenOptions::new()
        .append(true)
        .open(&log)
        .expect("open log");
    file.write_all(line.as_bytes()).expect("append");
    drop(file);
    let old = std::time::SystemTime::now() - std::time::Duration::from_secs(60);
    let file = std::fs::OpenOptions::new()
        .write(true)
        .open(&artifact_path)
        .expect("open artifact");
    file.set_modified(old).expect("backdate artifact");
    drop(file);

    let artifact_path = ensure_artifact(&log).expect("second cook");
    let second: Value =
        serde_json::from_str(&std::fs::read_to_string(&artifact_path).expect("read"))
            .expect("json");
    assert_eq!(second["requests"].as_array().expect("requests").len(), 2);

    // Content-type on the wire is JSON.
    let app = app_for(artifact_path);
    let response = app
        .oneshot(
            Request::builder()
                .method("GET")
                .uri("/data.json")
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");
    assert_eq!(
        response.headers()[header::CONTENT_TYPE],
        "application/json"
    );
}
