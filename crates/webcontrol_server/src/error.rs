//! Error types for the remote-control server.
//!
//! Errors are categorized by where they can surface. `ServerError` is the
//! only one that reaches the host (at construction); the others are turned
//! into responses or results at the session boundary and never propagate
//! into the tick thread.

use thiserror::Error;

/// Errors raised while bringing the server up or tearing it down.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Socket creation, bind, or listen failures
    #[error("Network error: {0}")]
    Network(String),

    /// Runtime or filesystem I/O failures
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid configuration values
    #[error("Configuration error: {0}")]
    Config(String),

    /// Anything else that should never happen
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Failures reported by a [`CommandDispatcher`](crate::CommandDispatcher).
///
/// These are data, not control flow: the drain step converts every one of
/// them into an error result for the client.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    /// The script could not be compiled or raised while running
    #[error("script failed: {0}")]
    Script(String),

    /// No function is registered under the requested name
    #[error("unknown function '{0}'")]
    UnknownFunction(String),

    /// The host facility itself failed
    #[error("host failure: {0}")]
    Host(String),
}

/// Reasons an HTTP request could not be parsed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RequestError {
    #[error("malformed request: {0}")]
    Malformed(&'static str),

    #[error("request header block exceeds {0} bytes")]
    TooLarge(usize),

    #[error("unsupported transfer encoding")]
    UnsupportedEncoding,
}
