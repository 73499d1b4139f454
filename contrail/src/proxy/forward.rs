//! Per-request forwarding, SSE pass-through, and trace assembly.

use std::sync::Arc;
use std::time::Instant;

use axum::{
    body::Body,
    extract::{Request, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use base64::Engine;
use bytes::Bytes;
use futures_util::StreamExt;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{error, info, warn};

use shared_types::TraceRecord;

use crate::capture;

use super::AppState;

/// Forward one client request to `{target}{path}?{query}` and mirror the
/// response back. Exactly one `TraceRecord` is appended once the upstream
/// connection settles (success or tagged error).
pub async fn forward_request(State(state): State<Arc<AppState>>, req: Request) -> Response {
    let started = Instant::now();

    let path_and_query = req
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    let upstream_url = format!("{}{}", state.target, path_and_query);

    let (parts, body) = req.into_parts();
    let body_bytes = match body.collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            error!(error = %e, "failed to read client request body");
            return (StatusCode::BAD_REQUEST, "invalid request body").into_response();
        }
    };

    let mut record = TraceRecord::new(request_value(&parts.headers, &body_bytes));

    let method = reqwest::Method::from_bytes(parts.method.as_str().as_bytes())
        .unwrap_or(reqwest::Method::POST);
    let mut upstream_req = state
        .client
        .request(method, &upstream_url)
        .body(body_bytes);
    upstream_req = copy_request_headers(upstream_req, &parts.headers);

    let upstream_res = match upstream_req.send().await {
        Ok(res) => res,
        Err(e) => {
            let message = upstream_error_string(&e);
            error!(upstream_url = %upstream_url, error = %e, "upstream request failed");
            record.error = Some(message.clone());
            record.duration_ms = started.elapsed().as_millis() as u64;
            capture::append_record_async(&state.capture, record);
            return bad_gateway(&message);
        }
    };

    let status = upstream_res.status();
    let headers = upstream_res.headers().clone();

    if is_event_stream(&headers) {
        return stream_response(state, upstream_res, status, headers, record, started);
    }

    let bytes = match upstream_res.bytes().await {
        Ok(b) => b,
        Err(e) => {
            let message = upstream_error_string(&e);
            error!(upstream_url = %upstream_url, error = %e, "failed to read upstream response body");
            record.error = Some(message.clone());
            record.duration_ms = started.elapsed().as_millis() as u64;
            capture::append_record_async(&state.capture, record);
            return bad_gateway(&message);
        }
    };

    record.duration_ms = started.elapsed().as_millis() as u64;
    record.response = Some(response_value(&bytes));
    info!(
        status = status.as_u16(),
        duration_ms = record.duration_ms,
        "proxied request"
    );
    capture::append_record_async(&state.capture, record);

    let mut response = Response::new(Body::from(bytes));
    *response.status_mut() = status;
    copy_response_headers(response.headers_mut(), &headers);
    response
}

/// Pass an SSE body through line by line while accumulating the raw lines
/// for the trace record. Each complete line is flushed to the client before
/// the next upstream chunk is awaited; the accumulator lives inside the
/// spawned task and dies with it on every exit path.
fn stream_response(
    state: Arc<AppState>,
    upstream_res: reqwest::Response,
    status: StatusCode,
    headers: HeaderMap,
    mut record: TraceRecord,
    started: Instant,
) -> Response {
    let (tx, rx) = tokio::sync::mpsc::channel::<Result<Bytes, std::io::Error>>(64);
    let capture = state.capture.clone();

    tokio::spawn(async move {
        let mut stream = upstream_res.bytes_stream();
        let mut buf: Vec<u8> = Vec::new();
        let mut sse_lines: Vec<String> = Vec::new();
        let mut client_gone = false;

        loop {
            match stream.next().await {
                Some(Ok(chunk)) => {
                    buf.extend_from_slice(&chunk);
                    while let Some(pos) = buf.iter().position(|b| *b == b'\n') {
                        let raw: Vec<u8> = buf.drain(..=pos).collect();
                        if !client_gone && tx.send(Ok(Bytes::from(raw.clone()))).await.is_err() {
                            // Client left; keep draining upstream so the
                            // record stays complete.
                            client_gone = true;
                        }
                        sse_lines.push(strip_line_terminator(raw));
                    }
                }
                Some(Err(e)) => {
                    let message = if client_gone {
                        "client disconnected".to_string()
                    } else {
                        upstream_error_string(&e)
                    };
                    warn!(error = %e, "upstream stream ended with error");
                    record.error = Some(message);
                    break;
                }
                None => break,
            }
        }

        if !buf.is_empty() {
            if !client_gone {
                let _ = tx.send(Ok(Bytes::from(buf.clone()))).await;
            }
            sse_lines.push(strip_line_terminator(buf));
        }

        record.duration_ms = started.elapsed().as_millis() as u64;
        record.response = Some(json!({"stream": true, "sse_lines": sse_lines}));
        info!(
            status = status.as_u16(),
            lines = record.sse_lines().map(Vec::len).unwrap_or(0),
            duration_ms = record.duration_ms,
            "proxied streaming request"
        );
        capture::append_record_async(&capture, record);
    });

    let mut response = Response::new(Body::from_stream(ReceiverStream::new(rx)));
    *response.status_mut() = status;
    copy_response_headers(response.headers_mut(), &headers);
    response
}

/// The request body as it goes into the trace record: decoded JSON when the
/// body parses, otherwise the raw bytes with a content-type marker.
fn request_value(headers: &HeaderMap, body: &[u8]) -> Value {
    if body.is_empty() {
        return Value::Null;
    }
    match serde_json::from_slice::<Value>(body) {
        Ok(value) => value,
        Err(_) => {
            let content_type = headers
                .get(header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .unwrap_or("application/octet-stream");
            json!({
                "content_type": content_type,
                "base64": base64::engine::general_purpose::STANDARD.encode(body),
            })
        }
    }
}

/// The response body for the trace record: parsed JSON when possible, else
/// the text wrapped in `{"raw": ...}`.
fn response_value(bytes: &[u8]) -> Value {
    match serde_json::from_slice::<Value>(bytes) {
        Ok(value) => value,
        Err(_) => json!({"raw": String::from_utf8_lossy(bytes)}),
    }
}

fn is_event_stream(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|ct| ct.starts_with("text/event-stream"))
        .unwrap_or(false)
}

fn strip_line_terminator(mut raw: Vec<u8>) -> String {
    if raw.last() == Some(&b'\n') {
        raw.pop();
    }
    if raw.last() == Some(&b'\r') {
        raw.pop();
    }
    String::from_utf8_lossy(&raw).into_owned()
}

fn upstream_error_string(e: &reqwest::Error) -> String {
    if e.is_timeout() {
        "timeout".to_string()
    } else {
        e.to_string()
    }
}

fn bad_gateway(message: &str) -> Response {
    (
        StatusCode::BAD_GATEWAY,
        Json(json!({"error": {"message": message, "type": "proxy_error"}})),
    )
        .into_response()
}

fn is_hop_by_hop(name: &header::HeaderName) -> bool {
    name == header::CONNECTION
        || name == header::TE
        || name == header::TRAILER
        || name == header::TRANSFER_ENCODING
        || name == header::UPGRADE
        || name.as_str().eq_ignore_ascii_case("keep-alive")
        || name.as_str().starts_with("proxy-")
}

fn copy_request_headers(
    mut request: reqwest::RequestBuilder,
    headers: &HeaderMap,
) -> reqwest::RequestBuilder {
    for (name, value) in headers {
        if name == header::HOST || name == header::CONTENT_LENGTH || is_hop_by_hop(name) {
            continue;
        }
        request = request.header(name, value);
    }
    request
}

fn copy_response_headers(dest: &mut HeaderMap, src: &HeaderMap) {
    for (name, value) in src {
        if is_hop_by_hop(name) {
            continue;
        }
        if let Ok(header_value) = HeaderValue::from_bytes(value.as_bytes()) {
            dest.insert(name, header_value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_value_decodes_json_bodies() {
        let headers = HeaderMap::new();
        let value = request_value(&headers, br#"{"model":"gpt-4"}"#);
        assert_eq!(value["model"], "gpt-4");
    }

    #[test]
    fn request_value_wraps_non_json_bodies() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("text/plain"),
        );
        let value = request_value(&headers, b"not json");
        assert_eq!(value["content_type"], "text/plain");
        assert_eq!(
            value["base64"],
            base64::engine::general_purpose::STANDARD.encode(b"not json")
        );
    }

    #[test]
    fn request_value_is_null_for_empty_bodies() {
        assert_eq!(request_value(&HeaderMap::new(), b""), Value::Null);
    }

    #[test]
    fn response_value_keeps_raw_text() {
        assert_eq!(response_value(b"oops")["raw"], "oops");
        assert_eq!(response_value(br#"{"ok":true}"#)["ok"], true);
    }

    #[test]
    fn event_stream_detection_matches_prefix() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("text/event-stream; charset=utf-8"),
        );
        assert!(is_event_stream(&headers));

        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        assert!(!is_event_stream(&headers));
    }

    #[test]
    fn line_terminators_are_stripped_for_storage() {
        assert_eq!(strip_line_terminator(b"data: x\n".to_vec()), "data: x");
        assert_eq!(strip_line_terminator(b"data: x\r\n".to_vec()), "data: x");
        assert_eq!(strip_line_terminator(b"data: x".to_vec()), "data: x");
    }

    #[test]
    fn hop_by_hop_headers_are_recognised() {
        assert!(is_hop_by_hop(&header::CONNECTION));
        assert!(is_hop_by_hop(&header::TRANSFER_ENCODING));
        assert!(is_hop_by_hop(&header::HeaderName::from_static(
            "proxy-authorization"
        )));
        assert!(!is_hop_by_hop(&header::AUTHORIZATION));
        assert!(!is_hop_by_hop(&header::CONTENT_TYPE));
    }
}
