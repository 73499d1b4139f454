//! Per-record API dialect detection.
//!
//! Nothing in a capture log says which API surface a record came from, so
//! the cook sniffs each record. A record is Claude when any of the Claude
//! fingerprints is present; everything else normalises as OpenAI.

use serde_json::Value;
use shared_types::TraceRecord;

use super::sse::data_payload;

/// The API surface convention a trace record conforms to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    OpenAi,
    Claude,
}

const CLAUDE_EVENT_TYPES: &[&str] = &[
    "message_start",
    "content_block_start",
    "content_block_delta",
    "message_delta",
    "message_stop",
];

const CLAUDE_BLOCK_TYPES: &[&str] = &["tool_use", "tool_result", "thinking"];

/// Detect the dialect of a record from its request shape and, for streamed
/// responses, from its SSE event types.
pub fn detect(record: &TraceRecord) -> Dialect {
    if has_claude_sse_events(record)
        || system_is_list(&record.request)
        || tools_use_input_schema(&record.request)
        || messages_have_claude_blocks(&record.request)
    {
        Dialect::Claude
    } else {
        Dialect::OpenAi
    }
}

fn has_claude_sse_events(record: &TraceRecord) -> bool {
    let Some(lines) = record.sse_lines() else {
        return false;
    };
    lines
        .iter()
        .filter_map(Value::as_str)
        .filter_map(data_payload)
        .filter_map(|data| serde_json::from_str::<Value>(data).ok())
        .any(|payload| {
            payload
                .get("type")
                .and_then(Value::as_str)
                .map(|t| CLAUDE_EVENT_TYPES.contains(&t))
                .unwrap_or(false)
        })
}

fn system_is_list(request: &Value) -> bool {
    request.get("system").map(Value::is_array).unwrap_or(false)
}

fn tools_use_input_schema(request: &Value) -> bool {
    request
        .get("tools")
        .and_then(Value::as_array)
        .and_then(|tools| tools.first())
        .map(|tool| tool.get("input_schema").is_some())
        .unwrap_or(false)
}

fn messages_have_claude_blocks(request: &Value) -> bool {
    let Some(messages) = request.get("messages").and_then(Value::as_array) else {
        return false;
    };
    messages
        .iter()
        .filter_map(|msg| msg.get("content").and_then(Value::as_array))
        .flatten()
        .any(|block| {
            block
                .get("type")
                .and_then(Value::as_str)
                .map(|t| CLAUDE_BLOCK_TYPES.contains(&t))
                .unwrap_or(false)
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record_with_request(request: Value) -> TraceRecord {
        TraceRecord::new(request)
    }

    #[test]
    fn plain_chat_request_is_openai() {
        let record = record_with_request(json!({
            "model": "gpt-4",
            "messages": [{"role": "user", "content": "hi"}],
        }));
        assert_eq!(detect(&record), Dialect::OpenAi);
    }

    #[test]
    fn list_system_prompt_is_claude() {
        let record = record_with_request(json!({
            "model": "claude-3-opus",
            "system": [{"type": "text", "text": "Be helpful"}],
            "messages": [],
        }));
        assert_eq!(detect(&record), Dialect::Claude);
    }

    #[test]
    fn input_schema_on_first_tool_is_claude() {
        let record = record_with_request(json!({
            "model": "claude-3-opus",
            "messages": [],
            "tools": [{"name": "calc", "input_schema": {"type": "object"}}],
        }));
        assert_eq!(detect(&record), Dialect::Claude);
    }

    #[test]
    fn openai_tool_shape_stays_openai() {
        let record = record_with_request(json!({
            "model": "gpt-4",
            "messages": [{"role": "user", "content": "hi"}],
            "tools": [{"type": "function", "function": {"name": "calc", "parameters": {}}}],
        }));
        assert_eq!(detect(&record), Dialect::OpenAi);
    }

    #[test]
    fn claude_content_blocks_are_detected() {
        let record = record_with_request(json!({
            "model": "claude-3-opus",
            "messages": [{
                "role": "user",
                "content": [{"type": "tool_result", "tool_use_id": "t1", "content": "4"}],
            }],
        }));
        assert_eq!(detect(&record), Dialect::Claude);
    }

    #[test]
    fn claude_sse_events_are_detected() {
        let mut record = record_with_request(json!({
            "model": "claude-3-opus",
            "messages": [{"role": "user", "content": "hi"}],
        }));
        record.response = Some(json!({
            "stream": true,
            "sse_lines": [
                "event: message_start",
                "data: {\"type\":\"message_start\",\"message\":{\"id\":\"msg_1\",\"model\":\"claude-3-opus\"}}",
            ],
        }));
        assert_eq!(detect(&record), Dialect::Claude);
    }
}
