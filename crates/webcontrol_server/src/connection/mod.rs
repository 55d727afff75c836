//! Connection handling for HTTP and upgraded WebSocket clients.
//!
//! Every accepted socket starts as an HTTP session. A WebSocket upgrade
//! turns it into a WebSocket session that registers itself with the
//! [`SessionRegistry`] so the tick thread can reach its task queue.

pub mod http;
pub mod keepalive;
pub mod pipeline;
pub mod registry;
pub mod request;
pub mod response;
pub mod static_files;
pub mod task_queue;
pub mod websocket;

pub use http::{HttpSessionState, SessionContext};
pub use registry::{SessionRegistry, WsSessionShared};
pub use task_queue::TaskQueue;

/// Identifier of a registered WebSocket session.
///
/// Assigned sequentially on upgrade and never reused while the server runs.
pub type SessionId = usize;
