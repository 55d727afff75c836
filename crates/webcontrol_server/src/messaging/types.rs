//! Message type definitions for client-server communication.
//!
//! Inbound frames decode into [`Task`]s, the dispatcher turns each one into a
//! [`TaskResult`], and a flush serializes a batch of results back to the
//! client as a single JSON array.

use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;

/// WebSocket framing of the message a task arrived in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FramingMode {
    Text,
    Binary,
}

/// A command requested by a client.
///
/// The `type` field selects the variant. Unrecognized types deserialize to
/// [`Command::Unknown`] and produce an empty result.
///
/// # Example
///
/// ```json
/// { "type": "ExecFunc", "fnc": "sum", "args": [1, 2, true], "watch": "#out" }
/// ```
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type")]
pub enum Command {
    /// List the display names of every known entity
    #[serde(rename = "getPlayerlist")]
    GetPlayerList,

    /// Compile and run raw script text
    Exec { script: String },

    /// Call a named function with typed arguments
    ExecFunc {
        fnc: String,
        #[serde(default)]
        args: Vec<Value>,
    },

    #[serde(other)]
    Unknown,
}

/// A typed argument for [`Command::ExecFunc`].
#[derive(Debug, Clone, PartialEq)]
pub enum ScriptArg {
    Number(f64),
    Text(String),
    Bool(bool),
    /// A script block to be compiled by the host, sent as `{"code": "..."}`
    Code(String),
}

impl ScriptArg {
    /// Converts a single JSON value, returning `None` for unsupported shapes.
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Number(n) => n.as_f64().map(ScriptArg::Number),
            Value::String(s) => Some(ScriptArg::Text(s.clone())),
            Value::Bool(b) => Some(ScriptArg::Bool(*b)),
            Value::Object(map) => map
                .get("code")
                .and_then(Value::as_str)
                .map(|code| ScriptArg::Code(code.to_string())),
            _ => None,
        }
    }

    /// Converts an argument list, skipping values that have no script type.
    pub fn collect(values: &[Value]) -> Vec<Self> {
        values.iter().filter_map(ScriptArg::from_value).collect()
    }
}

/// What a task carries: a command, or the reason decoding failed.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskBody {
    Command(Command),
    Malformed(String),
}

/// A decoded client command awaiting dispatch.
#[derive(Debug, Clone, PartialEq)]
pub struct Task {
    pub body: TaskBody,
    pub mode: FramingMode,
    /// Correlation token echoed back verbatim in the result
    pub watch: Option<Value>,
}

impl Task {
    /// Builds a task from one decoded JSON document.
    pub fn from_document(document: Value, mode: FramingMode) -> Self {
        let watch = document.get("watch").cloned();
        let body = match serde_json::from_value::<Command>(document) {
            Ok(command) => TaskBody::Command(command),
            Err(e) => TaskBody::Malformed(e.to_string()),
        };
        Self { body, mode, watch }
    }

    /// Builds a task standing in for a frame that was not valid JSON.
    pub fn malformed(reason: impl Into<String>, mode: FramingMode) -> Self {
        Self {
            body: TaskBody::Malformed(reason.into()),
            mode,
            watch: None,
        }
    }
}

/// Outcome payloads sent back to clients.
///
/// Serialized with `type` first and the remaining fields in declaration order.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum Reply {
    #[serde(rename = "playerlist")]
    PlayerList { players: Vec<String> },

    ExecRet {
        res: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        watch: Option<Value>,
    },

    Error {
        error: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        watch: Option<Value>,
    },
}

/// A dispatch outcome awaiting serialization.
///
/// A result without a reply serializes as an empty object.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskResult {
    pub reply: Option<Reply>,
    pub mode: FramingMode,
}

impl TaskResult {
    pub fn empty(mode: FramingMode) -> Self {
        Self { reply: None, mode }
    }

    pub fn error(message: impl Into<String>, watch: Option<Value>, mode: FramingMode) -> Self {
        Self {
            reply: Some(Reply::Error {
                error: message.into(),
                watch,
            }),
            mode,
        }
    }
}

impl Serialize for TaskResult {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match &self.reply {
            Some(reply) => reply.serialize(serializer),
            None => serializer.serialize_map(Some(0))?.end(),
        }
    }
}
