//! Debug event stream for live execution timelines (SSE).
//!
//! The sink is a bounded channel and the producer never blocks: when the
//! consumer is slow, events are dropped. The execution log table stays the
//! authoritative record.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;

/// Bound of the debug channel; past this, events drop.
pub const DEBUG_CHANNEL_CAPACITY: usize = 32;

/// Maximum input/output JSON carried per event; the full payload lives in
/// the execution log.
const EVENT_JSON_LIMIT: usize = 4096;

#[derive(Debug, Clone, Serialize)]
pub struct DebugEvent {
    #[serde(rename = "executionId")]
    pub execution_id: i64,
    /// "started" | "node" | "finished"
    pub event: String,
    #[serde(rename = "nodeId", skip_serializing_if = "String::is_empty")]
    pub node_id: String,
    #[serde(rename = "nodeType", skip_serializing_if = "String::is_empty")]
    pub node_type: String,
    #[serde(rename = "nodeLabel", skip_serializing_if = "String::is_empty")]
    pub node_label: String,
    /// "running" | "success" | "error" | "completed" | "failed"
    pub status: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub input: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub output: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub error: String,
    #[serde(rename = "executedAt")]
    pub executed_at: DateTime<Utc>,
}

impl DebugEvent {
    pub fn started(execution_id: i64) -> Self {
        DebugEvent {
            execution_id,
            event: "started".to_string(),
            node_id: String::new(),
            node_type: String::new(),
            node_label: String::new(),
            status: "running".to_string(),
            input: String::new(),
            output: String::new(),
            error: String::new(),
            executed_at: Utc::now(),
        }
    }

    pub fn finished(execution_id: i64, status: &str, error: &str) -> Self {
        DebugEvent {
            execution_id,
            event: "finished".to_string(),
            node_id: String::new(),
            node_type: String::new(),
            node_label: String::new(),
            status: status.to_string(),
            input: String::new(),
            output: String::new(),
            error: error.to_string(),
            executed_at: Utc::now(),
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub fn node(
        execution_id: i64,
        node_id: &str,
        node_type: &str,
        node_label: &str,
        status: &str,
        input: &str,
        output: &str,
        error: &str,
    ) -> Self {
        DebugEvent {
            execution_id,
            event: "node".to_string(),
            node_id: node_id.to_string(),
            node_type: node_type.to_string(),
            node_label: node_label.to_string(),
            status: status.to_string(),
            input: trim_json(input),
            output: trim_json(output),
            error: error.to_string(),
            executed_at: Utc::now(),
        }
    }
}

/// Sending side of the debug stream.
pub type DebugSink = mpsc::Sender<DebugEvent>;

/// Create a debug channel with the standard bound.
pub fn debug_channel() -> (DebugSink, mpsc::Receiver<DebugEvent>) {
    mpsc::channel(DEBUG_CHANNEL_CAPACITY)
}

/// Non-blocking emit; a full or closed channel drops the event.
pub fn emit(sink: Option<&DebugSink>, event: DebugEvent) {
    if let Some(sink) = sink {
        let _ = sink.try_send(event);
    }
}

fn trim_json(s: &str) -> String {
    if s.len() <= EVENT_JSON_LIMIT {
        return s.to_string();
    }
    let mut cut = EVENT_JSON_LIMIT;
    while !s.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}…", &s[..cut])
}
