//! The cook: capture log in, derived artifact out.
//!
//! Reads every parseable `TraceRecord`, translates it into the canonical
//! model, deduplicates messages and tools by content hash, and reconstructs
//! call lineage. Single-threaded and deterministic: the same log always
//! cooks to the same bytes.

pub mod dialect;
pub mod normalize;
pub mod sse;

use std::collections::HashMap;
use std::path::Path;

use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use shared_types::{CookedArtifact, CookedMessage, CookedRequest, CookedTool, TraceRecord};
use tracing::{info, warn};

use crate::capture::{self, CaptureError};
use crate::lineage;

use normalize::{CanonicalMessage, CanonicalTool, NormalizeError};

/// Errors that abort a whole cook run (per-record problems never do).
#[derive(Debug, thiserror::Error)]
pub enum CookError {
    #[error("failed to read capture log: {0}")]
    Input(#[from] CaptureError),

    #[error("failed to write artifact: {0}")]
    Output(#[from] std::io::Error),

    #[error("failed to encode artifact: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Counters reported after a cook run.
#[derive(Debug, Clone, Copy, Default)]
pub struct CookStats {
    pub records: usize,
    pub skipped: usize,
    pub messages: usize,
    pub tools: usize,
    pub requests: usize,
}

// ============================================================================
// Cooker
// ============================================================================

/// Accumulates deduplicated messages/tools across a whole cook run.
///
/// Ids are handed out in first-seen order (`m0`, `m1`, ... / `t0`, `t1`,
/// ...), which keeps artifacts diff-friendly across runs over a growing log.
#[derive(Debug, Default)]
pub struct Cooker {
    message_ids: HashMap<String, String>,
    tool_ids: HashMap<String, String>,
    artifact: CookedArtifact,
    skipped: usize,
}

impl Cooker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Normalise one record into the artifact. Unusable records are counted
    /// and skipped; failed-but-parseable calls keep their request prefix and
    /// carry an error flag.
    pub fn add_record(&mut self, record: &TraceRecord) {
        let call = match normalize::normalize_record(record) {
            Ok(call) => call,
            Err(NormalizeError::NotAnLlmCall) => {
                warn!(record_id = %record.id, "skipping record: no messages array");
                self.skipped += 1;
                return;
            }
        };

        let request_messages = call
            .request_messages
            .iter()
            .map(|m| self.intern_message(m))
            .collect();
        let response_messages = call
            .response_messages
            .iter()
            .map(|m| self.intern_message(m))
            .collect();

        let mut tools = Vec::new();
        for tool in &call.tools {
            let id = self.intern_tool(tool);
            if !tools.contains(&id) {
                tools.push(id);
            }
        }

        self.artifact.requests.push(CookedRequest {
            id: record.id.clone(),
            parent_id: None,
            timestamp: record.timestamp.timestamp_millis(),
            request_messages,
            response_messages,
            model: call.model,
            tools,
            duration_ms: record.duration_ms,
            error: call.error,
        });
    }

    /// Run lineage over the accumulated calls and hand back the artifact.
    pub fn finish(mut self) -> (CookedArtifact, CookStats) {
        lineage::assign_parents(&mut self.artifact.requests);
        let stats = CookStats {
            records: self.artifact.requests.len() + self.skipped,
            skipped: self.skipped,
            messages: self.artifact.messages.len(),
            tools: self.artifact.tools.len(),
            requests: self.artifact.requests.len(),
        };
        (self.artifact, stats)
    }

    fn intern_message(&mut self, msg: &CanonicalMessage) -> String {
        let key = message_hash(msg);
        if let Some(id) = self.message_ids.get(&key) {
            return id.clone();
        }
        let id = format!("m{}", self.message_ids.len());
        self.artifact.messages.push(CookedMessage {
            id: id.clone(),
            role: msg.role,
            content: msg.content.clone(),
            tool_calls: msg.tool_calls.clone(),
            tool_use_id: msg.tool_use_id.clone(),
            is_error: msg.is_error,
        });
        self.message_ids.insert(key, id.clone());
        id
    }

    fn intern_tool(&mut self, tool: &CanonicalTool) -> String {
        let key = tool_hash(tool);
        if let Some(id) = self.tool_ids.get(&key) {
            return id.clone();
        }
        let id = format!("t{}", self.tool_ids.len());
        self.artifact.tools.push(CookedTool {
            id: id.clone(),
            name: tool.name.clone(),
            description: tool.description.clone(),
            parameters: tool.parameters.clone(),
        });
        self.tool_ids.insert(key, id.clone());
        id
    }
}

// ============================================================================
// Content hashing
// ============================================================================

/// 16 hex chars of SHA-256 over the message's canonical fields. serde_json
/// maps serialise with sorted keys, so the encoding is stable; unset fields
/// hash as null.
fn message_hash(msg: &CanonicalMessage) -> String {
    content_hash(&json!({
        "role": msg.role.as_str(),
        "content": &msg.content,
        "tool_calls": &msg.tool_calls,
        "tool_use_id": &msg.tool_use_id,
        "is_error": msg.is_error,
    }))
}

fn tool_hash(tool: &CanonicalTool) -> String {
    content_hash(&json!({
        "name": &tool.name,
        "description": &tool.description,
        "parameters": &tool.parameters,
    }))
}

fn content_hash(value: &Value) -> String {
    let encoded = serde_json::to_string(value).unwrap_or_default();
    let digest = Sha256::digest(encoded.as_bytes());
    hex::encode(digest)[..16].to_string()
}

// ============================================================================
// Entry points
// ============================================================================

/// Cook a list of records into an artifact.
pub fn cook_records(records: &[TraceRecord]) -> (CookedArtifact, CookStats) {
    let mut cooker = Cooker::new();
    for record in records {
        cooker.add_record(record);
    }
    cooker.finish()
}

/// Cook a capture log file and atomically replace the artifact at `output`.
pub fn cook_file(input: &Path, output: &Path) -> Result<CookStats, CookError> {
    let records = capture::read_records(input)?;
    let (artifact, stats) = cook_records(&records);
    write_artifact(output, &artifact)?;
    info!(
        records = stats.records,
        skipped = stats.skipped,
        messages = stats.messages,
        tools = stats.tools,
        requests = stats.requests,
        output = %output.display(),
        "cook complete"
    );
    Ok(stats)
}

/// Serialise the artifact next to its destination, then rename into place so
/// readers never observe a half-written file.
pub fn write_artifact(path: &Path, artifact: &CookedArtifact) -> Result<(), CookError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let mut encoded = serde_json::to_string_pretty(artifact)?;
    encoded.push('\n');

    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = std::path::PathBuf::from(tmp);
    std::fs::write(&tmp, encoded)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}
