//! Viewer server: the static UI plus the derived artifact over HTTP.
//!
//! Stateless: the artifact is read from disk on every `/data.json` fetch,
//! so a concurrent `cook` run (which replaces the file atomically) is
//! picked up on the next reload.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::{header, StatusCode},
    response::{Html, IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::capture;
use crate::cook::{self, CookError};

static INDEX_HTML: &str = include_str!("../../assets/index.html");
static VIEWER_JS: &str = include_str!("../../assets/viewer.js");

pub struct ViewerState {
    pub artifact_path: PathBuf,
}

pub fn router(state: Arc<ViewerState>) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/viewer.js", get(viewer_js))
        .route("/data.json", get(data))
        .route("/_local", get(local))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Make sure a fresh artifact exists for `input` and return its path.
///
/// An input that is already a cooked artifact (`.json`) is served as-is;
/// a capture log is cooked into a `.cooked.json` sibling whenever that
/// sibling is missing or older than the log.
pub fn ensure_artifact(input: &Path) -> Result<PathBuf, CookError> {
    if input.extension().and_then(|e| e.to_str()) == Some("json") {
        return Ok(input.to_path_buf());
    }

    let artifact = input.with_extension("cooked.json");
    if artifact_is_stale(input, &artifact) {
        info!(input = %input.display(), artifact = %artifact.display(), "artifact stale; cooking");
        cook::cook_file(input, &artifact)?;
    }
    Ok(artifact)
}

fn artifact_is_stale(input: &Path, artifact: &Path) -> bool {
    let input_mtime = std::fs::metadata(input).and_then(|m| m.modified()).ok();
    let artifact_mtime = std::fs::metadata(artifact).and_then(|m| m.modified()).ok();
    match (input_mtime, artifact_mtime) {
        (Some(input_mtime), Some(artifact_mtime)) => artifact_mtime < input_mtime,
        _ => true,
    }
}

async fn index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

async fn viewer_js() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "application/javascript")],
        VIEWER_JS,
    )
}

async fn data(State(state): State<Arc<ViewerState>>) -> Response {
    match std::fs::read(&state.artifact_path) {
        Ok(bytes) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "application/json")],
            bytes,
        )
            .into_response(),
        Err(e) => {
            warn!(path = %state.artifact_path.display(), error = %e, "artifact read failed");
            (
                StatusCode::NOT_FOUND,
                Json(json!({"error": format!("artifact not readable: {e}")})),
            )
                .into_response()
        }
    }
}

#[derive(Debug, Deserialize)]
struct LocalQuery {
    path: String,
}

/// Development aid: cook an arbitrary local capture log on demand.
async fn local(Query(query): Query<LocalQuery>) -> Response {
    match capture::read_records(Path::new(&query.path)) {
        Ok(records) => {
            let (artifact, _) = cook::cook_records(&records);
            Json(artifact).into_response()
        }
        Err(e) => (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": format!("cannot read {}: {e}", query.path)})),
        )
            .into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use shared_types::TraceRecord;

    fn write_log(dir: &Path) -> PathBuf {
        let path = dir.join("trace.jsonl");
        let mut record = TraceRecord::new(json!({
            "model": "gpt-4",
            "messages": [{"role": "user", "content": "hi"}],
        }));
        record.response = Some(json!({
            "model": "gpt-4",
            "choices": [{"message": {"role": "assistant", "content": "hello"}}],
        }));
        let mut line = serde_json::to_string(&record).unwrap();
        line.push('\n');
        std::fs::write(&path, line).unwrap();
        path
    }

    #[test]
    fn ensure_artifact_cooks_when_missing() {
        let dir = tempfile::tempdir().unwrap();
        let log = write_log(dir.path());

        let artifact = ensure_artifact(&log).unwrap();
        assert!(artifact.exists());
        assert_eq!(artifact.extension().unwrap(), "json");
    }

    #[test]
    fn ensure_artifact_skips_fresh_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let log = write_log(dir.path());

        let artifact = ensure_artifact(&log).unwrap();
        let first = std::fs::metadata(&artifact).unwrap().modified().unwrap();
        let again = ensure_artifact(&log).unwrap();
        let second = std::fs::metadata(&again).unwrap().modified().unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn cooked_json_input_is_served_directly() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("artifact.json");
        std::fs::write(&path, "{}").unwrap();
        assert_eq!(ensure_artifact(&path).unwrap(), path);
    }
}
