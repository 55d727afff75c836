//! Server configuration types and defaults.
//!
//! This module contains the server configuration structure and default values
//! used to bind the listener, locate the document root, and tune the
//! per-connection timers and queues.

use crate::error::ServerError;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Name of the static document directory that sits next to the server binary.
pub const DOC_ROOT_DIR: &str = "wdata";

/// Configuration structure for the remote-control server.
///
/// Contains everything needed to bind the listener and drive the sessions:
/// network address, document root, keepalive interval and pipelining depth.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// The socket address to bind the listener to
    pub bind_address: SocketAddr,

    /// Directory that static files are served from
    pub doc_root: PathBuf,

    /// Keepalive/idle interval shared by HTTP and WebSocket sessions.
    ///
    /// An HTTP connection is shut down after one silent interval; a WebSocket
    /// connection is pinged after one and dropped after two.
    pub idle_timeout: Duration,

    /// Maximum number of unsent HTTP responses per connection
    pub pipeline_limit: usize,

    /// Number of background I/O threads (0 uses one per CPU core)
    pub io_threads: usize,

    /// Largest accepted HTTP request header block, in bytes
    pub max_request_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: SocketAddr::from(([0, 0, 0, 0], 8082)),
            doc_root: default_doc_root(),
            idle_timeout: Duration::from_secs(15),
            pipeline_limit: 8,
            io_threads: 1,
            max_request_bytes: 16 * 1024,
        }
    }
}

impl ServerConfig {
    /// Checks the values the sessions rely on being non-zero.
    pub fn validate(&self) -> Result<(), ServerError> {
        if self.pipeline_limit == 0 {
            return Err(ServerError::Config("pipeline_limit must be at least 1".to_string()));
        }
        if self.idle_timeout.is_zero() {
            return Err(ServerError::Config("idle_timeout must be non-zero".to_string()));
        }
        if self.max_request_bytes == 0 {
            return Err(ServerError::Config("max_request_bytes must be non-zero".to_string()));
        }
        Ok(())
    }

    /// Resolves the effective I/O thread count.
    pub fn worker_threads(&self) -> usize {
        if self.io_threads == 0 {
            num_cpus::get()
        } else {
            self.io_threads
        }
    }
}

/// Returns the `wdata` directory next to the running executable.
///
/// Falls back to a relative `wdata` path when the executable location
/// cannot be determined.
pub fn default_doc_root() -> PathBuf {
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|dir| dir.join(DOC_ROOT_DIR)))
        .unwrap_or_else(|| PathBuf::from(DOC_ROOT_DIR))
}
