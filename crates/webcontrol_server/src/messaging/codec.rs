//! Conversion between WebSocket payloads and tasks/results.

use super::types::{FramingMode, Task, TaskResult};
use serde_json::Value;

/// Decodes one inbound payload into the tasks it carries.
///
/// A JSON array yields one task per element, in order; any other document
/// yields a single task. Invalid JSON yields a single malformed task so the
/// client still receives a result for it.
pub fn decode_payload(payload: &[u8], mode: FramingMode) -> Vec<Task> {
    match serde_json::from_slice::<Value>(payload) {
        Ok(Value::Array(documents)) => documents
            .into_iter()
            .map(|document| Task::from_document(document, mode))
            .collect(),
        Ok(document) => vec![Task::from_document(document, mode)],
        Err(e) => vec![Task::malformed(format!("invalid JSON: {e}"), mode)],
    }
}

/// Serializes a batch of results as one JSON array.
///
/// Returns the framing mode the batch should be written with (that of its
/// first result) alongside the encoded text.
pub fn encode_batch(results: &[TaskResult]) -> Result<(FramingMode, String), serde_json::Error> {
    let mode = results
        .first()
        .map(|result| result.mode)
        .unwrap_or(FramingMode::Text);
    Ok((mode, serde_json::to_string(results)?))
}
