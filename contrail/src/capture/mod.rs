//! CaptureStoreActor - append-only capture log using ractor
//!
//! The proxy persists one `TraceRecord` per upstream call. All appends go
//! through a single actor so concurrent in-flight requests serialise on the
//! mailbox rather than on a lock held across I/O. Each record is serialised
//! completely in memory and written as one line; the log is plain JSON-Lines
//! readable by `cook` (and anything else that speaks JSONL).
//!
//! Reads scan top-to-bottom and skip lines that fail to parse, so one
//! corrupt record never aborts a cook run.

use ractor::{Actor, ActorProcessingErr, ActorRef, RpcReplyPort};
use shared_types::TraceRecord;
use std::path::{Path, PathBuf};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;

/// Actor that owns the capture log file handle
#[derive(Debug, Default)]
pub struct CaptureStoreActor;

/// Arguments for spawning CaptureStoreActor
#[derive(Debug, Clone)]
pub struct CaptureStoreArguments {
    /// Path of the JSONL file to append to (created if missing)
    pub path: PathBuf,
}

/// State for CaptureStoreActor
pub struct CaptureStoreState {
    file: File,
    path: PathBuf,
}

// ============================================================================
// Messages
// ============================================================================

/// Messages handled by CaptureStoreActor
#[derive(Debug)]
pub enum CaptureStoreMsg {
    /// Append a record and confirm the write
    Append {
        record: TraceRecord,
        reply: RpcReplyPort<Result<(), CaptureError>>,
    },
    /// Append a record without waiting for the result. Failures are logged
    /// and dropped; the client response has already completed by the time
    /// a record reaches the store.
    AppendAsync { record: TraceRecord },
}

// ============================================================================
// Error Types
// ============================================================================

/// Errors that can occur in the capture store
#[derive(Debug, thiserror::Error, Clone)]
pub enum CaptureError {
    #[error("I/O error: {0}")]
    Io(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<std::io::Error> for CaptureError {
    fn from(e: std::io::Error) -> Self {
        CaptureError::Io(e.to_string())
    }
}

impl From<serde_json::Error> for CaptureError {
    fn from(e: serde_json::Error) -> Self {
        CaptureError::Serialization(e.to_string())
    }
}

// ============================================================================
// Actor
// ============================================================================

impl Actor for CaptureStoreActor {
    type Msg = CaptureStoreMsg;
    type State = CaptureStoreState;
    type Arguments = CaptureStoreArguments;

    async fn pre_start(
        &self,
        myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        tracing::info!(
            actor_id = %myself.get_id(),
            path = %args.path.display(),
            "CaptureStoreActor starting"
        );

        if let Some(parent) = args.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await.map_err(|e| {
                    ActorProcessingErr::from(format!("Failed to create log directory: {e}"))
                })?;
            }
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&args.path)
            .await
            .map_err(|e| {
                ActorProcessingErr::from(format!("Failed to open capture log: {e}"))
            })?;

        Ok(CaptureStoreState {
            file,
            path: args.path,
        })
    }

    async fn handle(
        &self,
        _myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            CaptureStoreMsg::Append { record, reply } => {
                let result = append_line(&mut state.file, &record).await;
                let _ = reply.send(result);
            }
            CaptureStoreMsg::AppendAsync { record } => {
                if let Err(e) = append_line(&mut state.file, &record).await {
                    tracing::error!(
                        path = %state.path.display(),
                        record_id = %record.id,
                        error = %e,
                        "capture log append failed; record lost"
                    );
                }
            }
        }
        Ok(())
    }

    async fn post_stop(
        &self,
        myself: ActorRef<Self::Msg>,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        let _ = state.file.flush().await;
        tracing::info!(actor_id = %myself.get_id(), "CaptureStoreActor stopped");
        Ok(())
    }
}

/// Serialise the record fully, then append it as a single write. The full
/// line is built before the file is touched so concurrent completions can
/// never interleave inside one record.
async fn append_line(file: &mut File, record: &TraceRecord) -> Result<(), CaptureError> {
    let mut line = serde_json::to_string(record)?;
    line.push('\n');
    file.write_all(line.as_bytes()).await?;
    file.flush().await?;
    Ok(())
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Append a record and wait for the write to land
pub async fn append_record(
    store: &ActorRef<CaptureStoreMsg>,
    record: TraceRecord,
) -> Result<Result<(), CaptureError>, ractor::RactorErr<CaptureStoreMsg>> {
    ractor::call!(store, |reply| CaptureStoreMsg::Append { record, reply })
}

/// Append a record without waiting
pub fn append_record_async(store: &ActorRef<CaptureStoreMsg>, record: TraceRecord) {
    let _ = store.send_message(CaptureStoreMsg::AppendAsync { record });
}

/// Read every parseable record from a capture log, in file order.
///
/// Unparseable lines are skipped with a diagnostic rather than failing the
/// whole read.
pub fn read_records(path: &Path) -> Result<Vec<TraceRecord>, CaptureError> {
    let content = std::fs::read_to_string(path)?;
    let mut records = Vec::new();
    for (idx, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<TraceRecord>(line) {
            Ok(record) => records.push(record),
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    line = idx + 1,
                    error = %e,
                    "skipping unparseable capture log line"
                );
            }
        }
    }
    Ok(records)
}

// ============================================================================
// Tests
// ============================================================================
