//! Core server implementation.
//!
//! This module contains the [`Server`] struct, which owns the I/O runtime,
//! the listener and the WebSocket session registry, and exposes the per-tick
//! drain the host calls from its own thread.

use super::listener::{accept_loop, bind};
use crate::config::ServerConfig;
use crate::connection::{SessionContext, SessionRegistry};
use crate::error::ServerError;
use crate::messaging::CommandDispatcher;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::runtime::{Builder, Runtime};
use tokio::sync::broadcast;
use tokio::time::Duration;
use tracing::{debug, error, info};

/// How long [`Server::shutdown`] waits for I/O tasks to wind down.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(2);

/// The embedded remote-control server.
///
/// `Server` runs all network I/O on its own background runtime. The host
/// interacts with it from a single thread: construct it once at startup,
/// call [`tick`](Server::tick) once per frame, and call
/// [`shutdown`](Server::shutdown) on the way out.
///
/// # Architecture
///
/// * **Listener**: accepts TCP connections and spawns HTTP sessions
/// * **HTTP sessions**: serve static files and upgrade to WebSocket
/// * **WebSocket sessions**: queue client tasks and send back results
/// * **Registry**: the set of live WebSocket sessions reached by `tick`
///
/// Client tasks only ever run inside `tick`, on the host's thread.
pub struct Server {
    /// Background runtime driving every socket and timer
    runtime: Runtime,

    /// Live WebSocket sessions, shared with the I/O tasks
    registry: Arc<SessionRegistry>,

    /// Host facilities invoked for client commands
    dispatcher: Box<dyn CommandDispatcher>,

    /// Address the listener is bound to, if binding succeeded
    local_addr: Option<SocketAddr>,

    /// Channel for stopping the accept loop
    shutdown_sender: broadcast::Sender<()>,
}

impl Server {
    /// Builds the I/O runtime and starts listening.
    ///
    /// Blocks only for as long as it takes to bind the socket. A bind
    /// failure is logged and leaves the server running without a listener,
    /// so the host keeps working; [`local_addr`](Server::local_addr) then
    /// returns `None`.
    ///
    /// # Arguments
    ///
    /// * `config` - Network, document root and timing settings
    /// * `dispatcher` - Host facilities invoked for client commands
    ///
    /// # Returns
    ///
    /// The running server, or a `ServerError` if the configuration is
    /// invalid or the runtime could not be created.
    pub fn start(
        config: ServerConfig,
        dispatcher: Box<dyn CommandDispatcher>,
    ) -> Result<Self, ServerError> {
        config.validate()?;

        let worker_threads = config.worker_threads();
        let runtime = Builder::new_multi_thread()
            .worker_threads(worker_threads)
            .thread_name("webcontrol-io")
            .enable_all()
            .build()?;

        let registry = Arc::new(SessionRegistry::new());
        let (shutdown_sender, _) = broadcast::channel(1);
        let config = Arc::new(config);

        info!("🚀 Starting web control server on {}", config.bind_address);
        info!("📁 Serving files from {}", config.doc_root.display());

        let local_addr = match bind(config.bind_address) {
            Ok(std_listener) => {
                // from_std registers with the reactor of the current runtime
                let _guard = runtime.enter();
                match TcpListener::from_std(std_listener) {
                    Ok(listener) => {
                        let local_addr = listener.local_addr().ok();
                        let ctx = SessionContext {
                            config: config.clone(),
                            registry: registry.clone(),
                        };
                        runtime.spawn(accept_loop(listener, ctx, shutdown_sender.subscribe()));
                        local_addr
                    }
                    Err(e) => {
                        error!("Tokio listener creation failed: {}", e);
                        None
                    }
                }
            }
            Err(e) => {
                error!("{}; remote control is unavailable", e);
                None
            }
        };

        if let Some(addr) = local_addr {
            info!("✅ Listening on {} with {} I/O thread(s)", addr, worker_threads);
        }

        Ok(Self {
            runtime,
            registry,
            dispatcher,
            local_addr,
            shutdown_sender,
        })
    }

    /// Dispatches every queued task of every WebSocket session.
    ///
    /// Must be called from the host's tick thread, once per frame. Sessions
    /// that dispatched anything are woken to send their results. Cheap when
    /// nothing is queued.
    ///
    /// # Returns
    ///
    /// The number of tasks dispatched.
    pub fn tick(&self) -> usize {
        let dispatched = self.registry.drain_all(self.dispatcher.as_ref());
        if dispatched > 0 {
            debug!("Tick dispatched {} task(s)", dispatched);
        }
        dispatched
    }

    /// The bound listener address, or `None` if binding failed.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Number of live WebSocket sessions.
    pub fn session_count(&self) -> usize {
        self.registry.len()
    }

    /// Stops accepting, drops every session and joins the I/O threads.
    ///
    /// Results not yet sent to clients are discarded.
    pub fn shutdown(self) {
        info!("🛑 Shutting down web control server...");
        let _ = self.shutdown_sender.send(());
        self.registry.clear();
        self.runtime.shutdown_timeout(SHUTDOWN_TIMEOUT);
        info!("Server stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DispatchError;
    use crate::messaging::ScriptArg;

    struct Nobody;

    impl CommandDispatcher for Nobody {
        fn player_names(&self) -> Result<Vec<String>, DispatchError> {
            Ok(vec![])
        }

        fn execute_script(&self, _script: &str) -> Result<String, DispatchError> {
            Ok(String::new())
        }

        fn call_function(&self, _name: &str, _args: &[ScriptArg]) -> Result<String, DispatchError> {
            Ok(String::new())
        }
    }

    fn local_config() -> ServerConfig {
        ServerConfig {
            bind_address: "127.0.0.1:0".parse().unwrap(),
            ..ServerConfig::default()
        }
    }

    #[test]
    fn test_start_and_shutdown() {
        let server = Server::start(local_config(), Box::new(Nobody)).unwrap();
        assert!(server.local_addr().is_some());
        assert_eq!(server.session_count(), 0);
        assert_eq!(server.tick(), 0);
        server.shutdown();
    }

    #[test]
    fn test_bind_failure_leaves_server_inert() {
        let taken = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let config = ServerConfig {
            bind_address: taken.local_addr().unwrap(),
            ..ServerConfig::default()
        };

        let server = Server::start(config, Box::new(Nobody)).unwrap();
        assert!(server.local_addr().is_none());
        assert_eq!(server.tick(), 0);
        server.shutdown();
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let config = ServerConfig {
            pipeline_limit: 0,
            ..local_config()
        };
        assert!(matches!(
            Server::start(config, Box::new(Nobody)),
            Err(ServerError::Config(_))
        ));
    }
}
