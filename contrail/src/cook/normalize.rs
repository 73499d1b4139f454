//! Translation of both API dialects into the canonical message/tool model.
//!
//! Messages are produced in the order the surface conversation implies:
//! request-level Claude `system` blocks first, then the message stream in
//! block order, then the response parts (`thinking` before the main part).
//! Non-text content is flattened to the `[image]` placeholder.

use serde_json::{json, Value};
use shared_types::{Role, ToolCall, TraceRecord};

use super::dialect::{self, Dialect};
use super::sse;

/// A canonical message before deduplication assigns it an id.
#[derive(Debug, Clone, PartialEq)]
pub struct CanonicalMessage {
    pub role: Role,
    pub content: String,
    pub tool_calls: Option<Vec<ToolCall>>,
    pub tool_use_id: Option<String>,
    pub is_error: Option<bool>,
}

impl CanonicalMessage {
    pub fn text(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_calls: None,
            tool_use_id: None,
            is_error: None,
        }
    }

    pub fn tool_use(content: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            role: Role::ToolUse,
            content: content.into(),
            tool_calls: Some(tool_calls),
            tool_use_id: None,
            is_error: None,
        }
    }

    pub fn tool_result(
        content: impl Into<String>,
        tool_use_id: impl Into<String>,
        is_error: bool,
    ) -> Self {
        Self {
            role: Role::ToolResult,
            content: content.into(),
            tool_calls: None,
            tool_use_id: Some(tool_use_id.into()),
            is_error: Some(is_error),
        }
    }
}

/// A canonical tool definition before deduplication.
#[derive(Debug, Clone, PartialEq)]
pub struct CanonicalTool {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// One record translated into canonical form.
#[derive(Debug, Clone)]
pub struct NormalizedCall {
    pub request_messages: Vec<CanonicalMessage>,
    pub response_messages: Vec<CanonicalMessage>,
    pub tools: Vec<CanonicalTool>,
    pub model: String,
    /// Set when the call failed upstream or its response is unusable; the
    /// request prefix is still normalised so the call shows up in the
    /// artifact.
    pub error: Option<String>,
}

/// Errors that make a record unusable for normalisation.
#[derive(Debug, thiserror::Error)]
pub enum NormalizeError {
    #[error("record has no messages array; not an LLM call")]
    NotAnLlmCall,
}

/// Translate one trace record. Records whose request carries no `messages`
/// list (health checks, model listings, non-JSON bodies) are rejected.
pub fn normalize_record(record: &TraceRecord) -> Result<NormalizedCall, NormalizeError> {
    let messages = record
        .request
        .get("messages")
        .and_then(Value::as_array)
        .ok_or(NormalizeError::NotAnLlmCall)?;

    let dialect = dialect::detect(record);

    let mut request_messages = Vec::new();
    match dialect {
        Dialect::OpenAi => openai_request_messages(messages, &mut request_messages),
        Dialect::Claude => {
            claude_system_messages(record.request.get("system"), &mut request_messages);
            claude_request_messages(messages, &mut request_messages);
        }
    }

    let tools = normalize_tools(record.request.get("tools"));

    let (response, error) = resolve_response(record, dialect);
    let response_messages = match &response {
        Some(value) => match dialect {
            Dialect::OpenAi => openai_response_messages(value),
            Dialect::Claude => claude_response_messages(value),
        },
        None => Vec::new(),
    };

    let model = response
        .as_ref()
        .and_then(|r| r.get("model"))
        .and_then(Value::as_str)
        .or_else(|| record.request.get("model").and_then(Value::as_str))
        .unwrap_or("")
        .to_string();

    Ok(NormalizedCall {
        request_messages,
        response_messages,
        tools,
        model,
        error,
    })
}

/// The complete response value: the stored body for plain responses, the
/// reassembled body for streamed ones, nothing for failed calls.
fn resolve_response(record: &TraceRecord, dialect: Dialect) -> (Option<Value>, Option<String>) {
    if let Some(error) = &record.error {
        return (None, Some(error.clone()));
    }
    if record.is_stream() {
        let lines: Vec<String> = record
            .sse_lines()
            .map(|lines| {
                lines
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        let reassembled = match dialect {
            Dialect::OpenAi => sse::reassemble_openai(&lines),
            Dialect::Claude => sse::reassemble_claude(&lines),
        };
        return (Some(reassembled), None);
    }
    match &record.response {
        Some(value) if value.is_object() && value.get("raw").is_none() => {
            (Some(value.clone()), None)
        }
        Some(_) => (None, Some("unparseable upstream response".to_string())),
        None => (None, Some("missing upstream response".to_string())),
    }
}

// ============================================================================
// OpenAI
// ============================================================================

fn openai_request_messages(messages: &[Value], out: &mut Vec<CanonicalMessage>) {
    for msg in messages {
        let role = msg.get("role").and_then(Value::as_str).unwrap_or("");
        match role {
            "system" => out.push(CanonicalMessage::text(
                Role::System,
                openai_content_text(msg.get("content")),
            )),
            "user" => out.push(CanonicalMessage::text(
                Role::User,
                openai_content_text(msg.get("content")),
            )),
            "assistant" => out.push(openai_assistant_message(msg)),
            "tool" => {
                let tool_use_id = msg
                    .get("tool_call_id")
                    .and_then(Value::as_str)
                    .unwrap_or("");
                out.push(CanonicalMessage::tool_result(
                    openai_content_text(msg.get("content")),
                    tool_use_id,
                    false,
                ));
            }
            other => {
                tracing::warn!(role = other, "ignoring message with unknown role");
            }
        }
    }
}

fn openai_assistant_message(msg: &Value) -> CanonicalMessage {
    let content = openai_content_text(msg.get("content"));
    match msg.get("tool_calls").and_then(Value::as_array) {
        Some(calls) if !calls.is_empty() => {
            CanonicalMessage::tool_use(content, parse_openai_tool_calls(calls))
        }
        _ => CanonicalMessage::text(Role::Assistant, content),
    }
}

fn parse_openai_tool_calls(calls: &[Value]) -> Vec<ToolCall> {
    calls
        .iter()
        .map(|call| {
            let function = &call["function"];
            ToolCall {
                name: function
                    .get("name")
                    .and_then(Value::as_str)
                    .unwrap_or("")
                    .to_string(),
                arguments: decode_arguments(function.get("arguments")),
                id: call.get("id").and_then(Value::as_str).unwrap_or("").to_string(),
            }
        })
        .collect()
}

/// Tool arguments come over the wire as a JSON-encoded string; decode it,
/// keeping undecodable payloads as `{"raw": ...}`.
fn decode_arguments(arguments: Option<&Value>) -> Value {
    match arguments {
        Some(Value::String(s)) => {
            serde_json::from_str(s).unwrap_or_else(|_| json!({"raw": s}))
        }
        Some(value) => value.clone(),
        None => json!({}),
    }
}

/// Flatten string or multimodal-list content to text. Image parts become
/// the `[image]` placeholder.
fn openai_content_text(content: Option<&Value>) -> String {
    match content {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Array(parts)) => {
            let mut text = String::new();
            for part in parts {
                match part.get("type").and_then(Value::as_str) {
                    Some("text") => {
                        text.push_str(part.get("text").and_then(Value::as_str).unwrap_or(""));
                    }
                    Some("image_url") | Some("image") | Some("input_image") => {
                        text.push_str("[image]");
                    }
                    _ => {}
                }
            }
            text
        }
        _ => String::new(),
    }
}

fn openai_response_messages(response: &Value) -> Vec<CanonicalMessage> {
    match response["choices"][0].get("message") {
        Some(message) => vec![openai_assistant_message(message)],
        None => Vec::new(),
    }
}

// ============================================================================
// Claude
// ============================================================================

fn claude_system_messages(system: Option<&Value>, out: &mut Vec<CanonicalMessage>) {
    match system {
        Some(Value::String(s)) => out.push(CanonicalMessage::text(Role::System, s.clone())),
        Some(Value::Array(blocks)) => {
            for block in blocks {
                if block.get("type").and_then(Value::as_str) == Some("text") {
                    out.push(CanonicalMessage::text(
                        Role::System,
                        block.get("text").and_then(Value::as_str).unwrap_or(""),
                    ));
                }
            }
        }
        _ => {}
    }
}

fn claude_request_messages(messages: &[Value], out: &mut Vec<CanonicalMessage>) {
    for msg in messages {
        let role = msg.get("role").and_then(Value::as_str).unwrap_or("");
        match role {
            "user" => claude_user_message(msg.get("content"), out),
            "assistant" => claude_assistant_message(msg.get("content"), out),
            other => {
                tracing::warn!(role = other, "ignoring message with unknown role");
            }
        }
    }
}

fn claude_user_message(content: Option<&Value>, out: &mut Vec<CanonicalMessage>) {
    match content {
        Some(Value::String(s)) => out.push(CanonicalMessage::text(Role::User, s.clone())),
        Some(Value::Array(blocks)) => {
            let mut text = String::new();
            for block in blocks {
                match block.get("type").and_then(Value::as_str) {
                    Some("text") => {
                        text.push_str(block.get("text").and_then(Value::as_str).unwrap_or(""));
                    }
                    Some("image") => text.push_str("[image]"),
                    Some("tool_result") => {
                        if !text.is_empty() {
                            out.push(CanonicalMessage::text(Role::User, std::mem::take(&mut text)));
                        }
                        out.push(CanonicalMessage::tool_result(
                            claude_block_content_text(block.get("content")),
                            block
                                .get("tool_use_id")
                                .and_then(Value::as_str)
                                .unwrap_or(""),
                            block
                                .get("is_error")
                                .and_then(Value::as_bool)
                                .unwrap_or(false),
                        ));
                    }
                    _ => {}
                }
            }
            if !text.is_empty() {
                out.push(CanonicalMessage::text(Role::User, text));
            }
        }
        _ => {}
    }
}

/// Tool-result content may itself be a string or a block list.
fn claude_block_content_text(content: Option<&Value>) -> String {
    match content {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Array(blocks)) => {
            let mut text = String::new();
            for block in blocks {
                match block.get("type").and_then(Value::as_str) {
                    Some("text") => {
                        text.push_str(block.get("text").and_then(Value::as_str).unwrap_or(""));
                    }
                    Some("image") => text.push_str("[image]"),
                    _ => {}
                }
            }
            text
        }
        _ => String::new(),
    }
}

/// Emit assistant-turn blocks in block order: one message per `text` and
/// `thinking` block, plus a single `tool_use` message (at the position of
/// the first tool-use block) aggregating every tool call of the turn.
fn claude_assistant_message(content: Option<&Value>, out: &mut Vec<CanonicalMessage>) {
    match content {
        Some(Value::String(s)) => out.push(CanonicalMessage::text(Role::Assistant, s.clone())),
        Some(Value::Array(blocks)) => {
            let tool_calls: Vec<ToolCall> = blocks
                .iter()
                .filter(|b| b.get("type").and_then(Value::as_str) == Some("tool_use"))
                .map(claude_tool_call)
                .collect();

            let mut tool_use_emitted = false;
            for block in blocks {
                match block.get("type").and_then(Value::as_str) {
                    Some("text") => out.push(CanonicalMessage::text(
                        Role::Assistant,
                        block.get("text").and_then(Value::as_str).unwrap_or(""),
                    )),
                    Some("thinking") => out.push(CanonicalMessage::text(
                        Role::Thinking,
                        block.get("thinking").and_then(Value::as_str).unwrap_or(""),
                    )),
                    Some("tool_use") if !tool_use_emitted => {
                        out.push(CanonicalMessage::tool_use("", tool_calls.clone()));
                        tool_use_emitted = true;
                    }
                    _ => {}
                }
            }
        }
        _ => {}
    }
}

fn claude_tool_call(block: &Value) -> ToolCall {
    ToolCall {
        name: block.get("name").and_then(Value::as_str).unwrap_or("").to_string(),
        arguments: block.get("input").cloned().unwrap_or_else(|| json!({})),
        id: block.get("id").and_then(Value::as_str).unwrap_or("").to_string(),
    }
}

/// Response parts: an optional `thinking` message followed by the main
/// `assistant`/`tool_use` message.
fn claude_response_messages(response: &Value) -> Vec<CanonicalMessage> {
    let Some(blocks) = response.get("content").and_then(Value::as_array) else {
        return Vec::new();
    };

    let mut thinking = String::new();
    let mut text = String::new();
    let mut tool_calls: Vec<ToolCall> = Vec::new();
    for block in blocks {
        match block.get("type").and_then(Value::as_str) {
            Some("thinking") => {
                thinking.push_str(block.get("thinking").and_then(Value::as_str).unwrap_or(""));
            }
            Some("text") => {
                text.push_str(block.get("text").and_then(Value::as_str).unwrap_or(""));
            }
            Some("tool_use") => tool_calls.push(claude_tool_call(block)),
            _ => {}
        }
    }

    let mut out = Vec::new();
    if !thinking.is_empty() {
        out.push(CanonicalMessage::text(Role::Thinking, thinking));
    }
    if !tool_calls.is_empty() {
        out.push(CanonicalMessage::tool_use(text, tool_calls));
    } else if !text.is_empty() {
        out.push(CanonicalMessage::text(Role::Assistant, text));
    }
    out
}

// ============================================================================
// Tools
// ============================================================================

fn normalize_tools(tools: Option<&Value>) -> Vec<CanonicalTool> {
    let Some(tools) = tools.and_then(Value::as_array) else {
        return Vec::new();
    };

    let mut out = Vec::new();
    for tool in tools {
        if let Some(function) = tool.get("function") {
            out.push(CanonicalTool {
                name: function
                    .get("name")
                    .and_then(Value::as_str)
                    .unwrap_or("")
                    .to_string(),
                description: function
                    .get("description")
                    .and_then(Value::as_str)
                    .unwrap_or("")
                    .to_string(),
                parameters: function
                    .get("parameters")
                    .cloned()
                    .unwrap_or_else(|| json!({})),
            });
        } else if tool.get("name").is_some() {
            out.push(CanonicalTool {
                name: tool.get("name").and_then(Value::as_str).unwrap_or("").to_string(),
                description: tool
                    .get("description")
                    .and_then(Value::as_str)
                    .unwrap_or("")
                    .to_string(),
                parameters: tool
                    .get("input_schema")
                    .cloned()
                    .unwrap_or_else(|| json!({})),
            });
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn multimodal_user_content_flattens_images() {
        let content = json!([
            {"type": "text", "text": "look at "},
            {"type": "image_url", "image_url": {"url": "https://example.com/cat.png"}},
            {"type": "text", "text": " please"},
        ]);
        assert_eq!(
            openai_content_text(Some(&content)),
            "look at [image] please"
        );
    }

    #[test]
    fn tool_arguments_decode_or_wrap_raw() {
        assert_eq!(
            decode_arguments(Some(&json!("{\"expr\":\"2+2\"}"))),
            json!({"expr": "2+2"})
        );
        assert_eq!(
            decode_arguments(Some(&json!("not valid json"))),
            json!({"raw": "not valid json"})
        );
        assert_eq!(decode_arguments(None), json!({}));
    }

    #[test]
    fn claude_mixed_user_turn_preserves_block_order() {
        let mut out = Vec::new();
        claude_user_message(
            Some(&json!([
                {"type": "tool_result", "tool_use_id": "call_1", "content": "4"},
                {"type": "text", "text": "now explain it"},
            ])),
            &mut out,
        );
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].role, Role::ToolResult);
        assert_eq!(out[0].tool_use_id.as_deref(), Some("call_1"));
        assert_eq!(out[0].is_error, Some(false));
        assert_eq!(out[1].role, Role::User);
        assert_eq!(out[1].content, "now explain it");
    }

    #[test]
    fn claude_assistant_aggregates_tool_use_blocks() {
        let mut out = Vec::new();
        claude_assistant_message(
            Some(&json!([
                {"type": "thinking", "thinking": "needs two lookups"},
                {"type": "tool_use", "id": "call_1", "name": "calc", "input": {"expr": "2+2"}},
                {"type": "tool_use", "id": "call_2", "name": "calc", "input": {"expr": "3+3"}},
            ])),
            &mut out,
        );
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].role, Role::Thinking);
        assert_eq!(out[1].role, Role::ToolUse);
        let calls = out[1].tool_calls.as_ref().unwrap();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].id, "call_1");
        assert_eq!(calls[1].arguments, json!({"expr": "3+3"}));
    }

    #[test]
    fn tool_normalisation_unifies_both_shapes() {
        let tools = json!([
            {"type": "function", "function": {"name": "calc", "description": "math", "parameters": {"type": "object"}}},
            {"name": "search", "input_schema": {"type": "object", "properties": {}}},
        ]);
        let normalized = normalize_tools(Some(&tools));
        assert_eq!(normalized.len(), 2);
        assert_eq!(normalized[0].name, "calc");
        assert_eq!(normalized[0].description, "math");
        assert_eq!(normalized[1].name, "search");
        assert_eq!(normalized[1].description, "");
        assert_eq!(normalized[1].parameters["type"], "object");
    }

    #[test]
    fn record_without_messages_is_rejected() {
        let record = TraceRecord::new(json!({"content_type": "text/plain", "base64": "eA=="}));
        assert!(matches!(
            normalize_record(&record),
            Err(NormalizeError::NotAnLlmCall)
        ));
    }

    #[test]
    fn failed_call_keeps_request_prefix_and_error() {
        let mut record = TraceRecord::new(json!({
            "model": "gpt-4",
            "messages": [{"role": "user", "content": "hi"}],
        }));
        record.error = Some("timeout".to_string());

        let call = normalize_record(&record).unwrap();
        assert_eq!(call.request_messages.len(), 1);
        assert!(call.response_messages.is_empty());
        assert_eq!(call.error.as_deref(), Some("timeout"));
        assert_eq!(call.model, "gpt-4");
    }
}
