//! Shared types for the contrail pipeline
//!
//! These types are used by every stage:
//! - Proxy (writes `TraceRecord` lines to the capture log)
//! - Cook (reads the log, emits the cooked artifact)
//! - Viewer (serves the cooked artifact)
//!
//! Serializable with serde for JSON-Lines and the derived artifact.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ============================================================================
// Capture log
// ============================================================================

/// A single captured request/response pair. One line in the capture log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceRecord {
    /// Fresh UUID assigned at request arrival
    pub id: String,

    /// Wall-clock UTC at request arrival
    pub timestamp: DateTime<Utc>,

    /// Request body as forwarded upstream: decoded JSON when the body was
    /// JSON, otherwise `{content_type, base64}`
    pub request: Value,

    /// Upstream response body, or `{stream: true, sse_lines: [...]}` for
    /// streamed responses. Null when the upstream call failed before any
    /// body arrived.
    pub response: Option<Value>,

    /// Milliseconds between request arrival and the final upstream byte
    pub duration_ms: u64,

    /// Null on success, otherwise a short description of the failure
    pub error: Option<String>,
}

impl TraceRecord {
    /// Create a record for a just-arrived request. Response fields are
    /// filled in once the upstream call settles.
    pub fn new(request: Value) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            request,
            response: None,
            duration_ms: 0,
            error: None,
        }
    }

    /// True when the response was captured as a raw SSE line sequence.
    pub fn is_stream(&self) -> bool {
        self.response
            .as_ref()
            .and_then(|r| r.get("stream"))
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    /// The captured SSE lines, when `is_stream()`.
    pub fn sse_lines(&self) -> Option<&Vec<Value>> {
        self.response
            .as_ref()
            .and_then(|r| r.get("sse_lines"))
            .and_then(Value::as_array)
    }
}

// ============================================================================
// Cooked artifact
// ============================================================================

/// Role of a canonical message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    System,
    User,
    Assistant,
    ToolUse,
    ToolResult,
    Thinking,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::ToolUse => "tool_use",
            Role::ToolResult => "tool_result",
            Role::Thinking => "thinking",
        }
    }
}

/// A single tool invocation inside a `tool_use` message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub name: String,
    /// Decoded argument object (never the raw JSON string)
    pub arguments: Value,
    pub id: String,
}

/// Deduplicated message with a stable `m{N}` id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CookedMessage {
    pub id: String,
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_use_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_error: Option<bool>,
}

/// Deduplicated tool definition with a stable `t{N}` id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CookedTool {
    pub id: String,
    pub name: String,
    pub description: String,
    /// JSON schema of the tool parameters
    pub parameters: Value,
}

/// One captured call, with message/tool references resolved against the
/// artifact-level id maps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CookedRequest {
    /// Equal to the originating `TraceRecord` id
    pub id: String,

    /// Inferred predecessor in the dependency forest; null for roots
    pub parent_id: Option<String>,

    /// Unix epoch milliseconds
    pub timestamp: i64,

    /// Ordered message ids making up the prompt prefix
    pub request_messages: Vec<String>,

    /// Ordered message ids produced by the response (a `thinking` part
    /// may precede the main part)
    pub response_messages: Vec<String>,

    pub model: String,

    /// Tool ids declared in the request (set semantics, stored in
    /// first-seen order)
    pub tools: Vec<String>,

    pub duration_ms: u64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// The derived artifact consumed by the viewer.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CookedArtifact {
    pub messages: Vec<CookedMessage>,
    pub tools: Vec<CookedTool>,
    pub requests: Vec<CookedRequest>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn role_serializes_snake_case() {
        assert_eq!(serde_json::to_string(&Role::ToolUse).unwrap(), "\"tool_use\"");
        assert_eq!(serde_json::to_string(&Role::Thinking).unwrap(), "\"thinking\"");
    }

    #[test]
    fn trace_record_round_trips_on_one_line() {
        let record = TraceRecord::new(json!({"model": "gpt-4", "messages": []}));
        let line = serde_json::to_string(&record).unwrap();
        assert!(!line.contains('\n'));
        let back: TraceRecord = serde_json::from_str(&line).unwrap();
        assert_eq!(back.id, record.id);
        assert_eq!(back.request, record.request);
    }

    #[test]
    fn stream_detection_reads_response_container() {
        let mut record = TraceRecord::new(json!({}));
        assert!(!record.is_stream());

        record.response = Some(json!({"stream": true, "sse_lines": ["data: {}"]}));
        assert!(record.is_stream());
        assert_eq!(record.sse_lines().unwrap().len(), 1);
    }

    #[test]
    fn optional_message_fields_stay_off_the_wire() {
        let msg = CookedMessage {
            id: "m0".into(),
            role: Role::User,
            content: "hi".into(),
            tool_calls: None,
            tool_use_id: None,
            is_error: None,
        };
        let encoded = serde_json::to_string(&msg).unwrap();
        assert!(!encoded.contains("tool_calls"));
        assert!(!encoded.contains("tool_use_id"));
        assert!(!encoded.contains("is_error"));
    }
}
