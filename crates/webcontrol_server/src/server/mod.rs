//! Server orchestration: the listening socket and the host-facing handle.

mod core;
pub mod listener;

pub use self::core::Server;
