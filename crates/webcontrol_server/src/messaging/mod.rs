//! Task messages exchanged over upgraded WebSocket connections.
//!
//! Clients send JSON commands (a single object or an array of them); the
//! server answers every flush with an array of result objects.

pub mod codec;
pub mod dispatch;
pub mod types;

pub use codec::{decode_payload, encode_batch};
pub use dispatch::{dispatch, CommandDispatcher};
pub use types::{Command, FramingMode, Reply, ScriptArg, Task, TaskBody, TaskResult};
