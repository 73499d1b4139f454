//! Reassembly of complete responses from captured SSE line sequences.
//!
//! The proxy stores the raw lines exactly as the upstream produced them;
//! classification happens here. Both reassemblers emit the corresponding
//! non-streaming response shape so the rest of the cook never needs to know
//! whether a response was streamed.

use std::collections::BTreeMap;

use serde_json::{json, Map, Value};

/// The payload of a `data:` line, with the field prefix stripped.
/// Comment lines, `event:` lines, and blank message terminators yield None.
pub fn data_payload(line: &str) -> Option<&str> {
    line.strip_prefix("data:").map(str::trim_start)
}

// ============================================================================
// OpenAI
// ============================================================================

#[derive(Debug, Default)]
struct ToolCallParts {
    id: String,
    name: String,
    arguments: String,
}

/// Rebuild a non-streaming OpenAI chat completion from its delta chunks:
/// `{choices: [{message: {role, content, tool_calls}}], id, model}`.
///
/// `content` deltas concatenate in arrival order; `tool_calls` deltas
/// accumulate per their numeric `index` with `function.arguments`
/// string-concatenated. `id` and `model` come from the first chunk that
/// supplies them. Lines that are not valid JSON are tolerated and skipped.
pub fn reassemble_openai(lines: &[String]) -> Value {
    let mut id: Option<String> = None;
    let mut model: Option<String> = None;
    let mut content = String::new();
    let mut saw_content = false;
    let mut tool_calls: BTreeMap<u64, ToolCallParts> = BTreeMap::new();

    for line in lines {
        let Some(data) = data_payload(line) else {
            continue;
        };
        if data == "[DONE]" {
            continue;
        }
        let Ok(chunk) = serde_json::from_str::<Value>(data) else {
            continue;
        };

        if id.is_none() {
            id = chunk.get("id").and_then(Value::as_str).map(str::to_string);
        }
        if model.is_none() {
            model = chunk
                .get("model")
                .and_then(Value::as_str)
                .map(str::to_string);
        }

        let delta = &chunk["choices"][0]["delta"];
        if let Some(text) = delta.get("content").and_then(Value::as_str) {
            content.push_str(text);
            saw_content = true;
        }
        if let Some(calls) = delta.get("tool_calls").and_then(Value::as_array) {
            for call in calls {
                let index = call.get("index").and_then(Value::as_u64).unwrap_or(0);
                let parts = tool_calls.entry(index).or_default();
                if let Some(call_id) = call.get("id").and_then(Value::as_str) {
                    parts.id = call_id.to_string();
                }
                if let Some(name) = call["function"].get("name").and_then(Value::as_str) {
                    parts.name.push_str(name);
                }
                if let Some(args) = call["function"].get("arguments").and_then(Value::as_str) {
                    parts.arguments.push_str(args);
                }
            }
        }
    }

    let tool_calls_value = if tool_calls.is_empty() {
        Value::Null
    } else {
        Value::Array(
            tool_calls
                .into_values()
                .map(|parts| {
                    json!({
                        "id": parts.id,
                        "type": "function",
                        "function": {"name": parts.name, "arguments": parts.arguments},
                    })
                })
                .collect(),
        )
    };

    let content_value = if saw_content {
        Value::String(content)
    } else {
        Value::Null
    };

    json!({
        "id": id,
        "model": model,
        "choices": [{
            "message": {
                "role": "assistant",
                "content": content_value,
                "tool_calls": tool_calls_value,
            }
        }],
    })
}

// ============================================================================
// Claude
// ============================================================================

#[derive(Debug, Default)]
struct BlockState {
    kind: String,
    text: String,
    thinking: String,
    partial_json: String,
    tool_id: String,
    tool_name: String,
    input: Option<Value>,
}

impl BlockState {
    fn finalize(&mut self) {
        if self.kind == "tool_use" && self.input.is_none() {
            self.input = Some(parse_tool_input(&self.partial_json));
        }
    }

    fn into_content_block(mut self) -> Option<Value> {
        match self.kind.as_str() {
            "text" => Some(json!({"type": "text", "text": self.text})),
            "thinking" => Some(json!({"type": "thinking", "thinking": self.thinking})),
            "tool_use" => {
                self.finalize();
                Some(json!({
                    "type": "tool_use",
                    "id": self.tool_id,
                    "name": self.tool_name,
                    "input": self.input.unwrap_or_else(|| json!({})),
                }))
            }
            _ => None,
        }
    }
}

fn parse_tool_input(partial_json: &str) -> Value {
    if partial_json.trim().is_empty() {
        return json!({});
    }
    serde_json::from_str(partial_json).unwrap_or_else(|_| json!({"raw": partial_json}))
}

/// Rebuild a non-streaming Claude message from its event stream. Blocks are
/// keyed by the `index` announced in `content_block_start`; tool-use input
/// arrives as `input_json_delta.partial_json` fragments that are parsed
/// once the block stops.
pub fn reassemble_claude(lines: &[String]) -> Value {
    let mut id: Option<String> = None;
    let mut model: Option<String> = None;
    let mut stop_reason: Option<String> = None;
    let mut blocks: BTreeMap<u64, BlockState> = BTreeMap::new();

    for line in lines {
        let Some(data) = data_payload(line) else {
            continue;
        };
        let Ok(event) = serde_json::from_str::<Value>(data) else {
            continue;
        };

        match event.get("type").and_then(Value::as_str) {
            Some("message_start") => {
                let message = &event["message"];
                if id.is_none() {
                    id = message.get("id").and_then(Value::as_str).map(str::to_string);
                }
                if model.is_none() {
                    model = message
                        .get("model")
                        .and_then(Value::as_str)
                        .map(str::to_string);
                }
            }
            Some("content_block_start") => {
                let index = event.get("index").and_then(Value::as_u64).unwrap_or(0);
                let start = &event["content_block"];
                let block = blocks.entry(index).or_default();
                block.kind = start
                    .get("type")
                    .and_then(Value::as_str)
                    .unwrap_or("text")
                    .to_string();
                if let Some(tool_id) = start.get("id").and_then(Value::as_str) {
                    block.tool_id = tool_id.to_string();
                }
                if let Some(name) = start.get("name").and_then(Value::as_str) {
                    block.tool_name = name.to_string();
                }
                if let Some(text) = start.get("text").and_then(Value::as_str) {
                    block.text.push_str(text);
                }
            }
            Some("content_block_delta") => {
                let index = event.get("index").and_then(Value::as_u64).unwrap_or(0);
                let delta = &event["delta"];
                let block = blocks.entry(index).or_default();
                match delta.get("type").and_then(Value::as_str) {
                    Some("text_delta") => {
                        if let Some(text) = delta.get("text").and_then(Value::as_str) {
                            block.text.push_str(text);
                        }
                    }
                    Some("thinking_delta") => {
                        if let Some(text) = delta.get("thinking").and_then(Value::as_str) {
                            block.thinking.push_str(text);
                        }
                    }
                    Some("input_json_delta") => {
                        if let Some(fragment) = delta.get("partial_json").and_then(Value::as_str)
                        {
                            block.partial_json.push_str(fragment);
                        }
                    }
                    _ => {}
                }
            }
            Some("content_block_stop") => {
                let index = event.get("index").and_then(Value::as_u64).unwrap_or(0);
                if let Some(block) = blocks.get_mut(&index) {
                    block.finalize();
                }
            }
            Some("message_delta") => {
                if let Some(reason) = event["delta"].get("stop_reason").and_then(Value::as_str) {
                    stop_reason = Some(reason.to_string());
                }
            }
            _ => {}
        }
    }

    let content: Vec<Value> = blocks
        .into_values()
        .filter_map(BlockState::into_content_block)
        .collect();

    let mut message = Map::new();
    message.insert("id".into(), id.map(Value::String).unwrap_or(Value::Null));
    message.insert(
        "model".into(),
        model.map(Value::String).unwrap_or(Value::Null),
    );
    message.insert("role".into(), Value::String("assistant".into()));
    message.insert("content".into(), Value::Array(content));
    message.insert(
        "stop_reason".into(),
        stop_reason.map(Value::String).unwrap_or(Value::Null),
    );
    Value::Object(message)
}
