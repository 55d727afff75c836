//! # Web Control Server - Embedded Remote-Control Surface
//!
//! An asynchronous network server meant to be embedded in a host process
//! whose main loop is single-threaded. It serves a static web console over
//! HTTP and exchanges JSON commands with that console over WebSocket, on the
//! same port.
//!
//! ## Design Philosophy
//!
//! Client commands touch host state that is only safe to use from the host's
//! own thread. The server therefore **never runs a command on a network
//! thread**: WebSocket sessions queue decoded tasks, and the host drains all
//! queues once per frame through [`Server::tick`]. Results travel back to the
//! client asynchronously.
//!
//! ## Architecture Overview
//!
//! ### Core Components
//!
//! * **Listener** - Accepts TCP connections and spawns HTTP sessions
//! * **HTTP Session** - Static files, bounded response pipelining, upgrade
//! * **WebSocket Session** - Frame decoding, ping/pong keepalive, flushing
//! * **Task Queue** - Per-session incoming/outgoing queues behind one mutex
//! * **Server** - Owns the I/O runtime and the session registry
//!
//! ### Message Flow
//!
//! 1. Client sends `{"type": "Exec", "script": "1+1", "watch": "abc"}`
//! 2. The session decodes it into a task and queues it
//! 3. The host calls `tick()`; the task runs through its [`CommandDispatcher`]
//! 4. The session sends `[{"type":"ExecRet","res":"2","watch":"abc"}]`
//!
//! ## Embedding
//!
//! ```rust,no_run
//! use webcontrol_server::{CommandDispatcher, DispatchError, ScriptArg, Server, ServerConfig};
//!
//! struct Host;
//!
//! impl CommandDispatcher for Host {
//!     fn player_names(&self) -> Result<Vec<String>, DispatchError> {
//!         Ok(vec!["Alpha".to_string()])
//!     }
//!
//!     fn execute_script(&self, script: &str) -> Result<String, DispatchError> {
//!         Err(DispatchError::Script(format!("no interpreter for '{script}'")))
//!     }
//!
//!     fn call_function(&self, name: &str, _args: &[ScriptArg]) -> Result<String, DispatchError> {
//!         Err(DispatchError::UnknownFunction(name.to_string()))
//!     }
//! }
//!
//! let server = Server::start(ServerConfig::default(), Box::new(Host))?;
//! loop {
//!     // ... host frame ...
//!     server.tick();
//! #   break;
//! }
//! server.shutdown();
//! # Ok::<(), webcontrol_server::ServerError>(())
//! ```
//!
//! ## Error Handling
//!
//! Only [`ServerError`] ever reaches the host, and only from
//! [`Server::start`]. Malformed requests, malformed tasks, I/O failures and
//! dispatcher failures (including panics) are all handled at the session
//! boundary and turned into responses or error results.

pub use config::ServerConfig;
pub use error::{DispatchError, RequestError, ServerError};
pub use messaging::{CommandDispatcher, ScriptArg};
pub use server::Server;

pub mod config;
pub mod connection;
pub mod error;
pub mod messaging;
pub mod server;
