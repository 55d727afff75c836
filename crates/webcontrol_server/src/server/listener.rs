//! Listening socket setup and the accept loop.

use crate::connection::{http, HttpSessionState, SessionContext};
use crate::error::ServerError;
use socket2::{Domain, Protocol, Socket, Type};
use std::net::{SocketAddr, TcpListener as StdTcpListener};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::time::Duration;
use tracing::{debug, error, info};

const LISTEN_BACKLOG: i32 = 1024;

/// Opens, binds and starts listening on `addr`.
///
/// The returned listener is non-blocking and ready to be handed to tokio.
pub fn bind(addr: SocketAddr) -> Result<StdTcpListener, ServerError> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))
        .map_err(|e| ServerError::Network(format!("Socket creation failed: {e}")))?;
    socket
        .set_reuse_address(true)
        .map_err(|e| ServerError::Network(format!("Setting SO_REUSEADDR failed: {e}")))?;

    socket
        .bind(&addr.into())
        .map_err(|e| ServerError::Network(format!("Bind to {addr} failed: {e}")))?;
    socket
        .listen(LISTEN_BACKLOG)
        .map_err(|e| ServerError::Network(format!("Listen failed: {e}")))?;

    let std_listener: StdTcpListener = socket.into();
    std_listener
        .set_nonblocking(true)
        .map_err(|e| ServerError::Network(format!("Setting non-blocking mode failed: {e}")))?;
    Ok(std_listener)
}

/// Accepts connections until a shutdown signal arrives.
///
/// Every accepted socket becomes an HTTP session. The loop keeps the state
/// of each live session and drops finished ones after every accept.
pub async fn accept_loop(
    listener: TcpListener,
    ctx: SessionContext,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut sessions: Vec<Arc<HttpSessionState>> = Vec::new();

    loop {
        let accepted = tokio::select! {
            accepted = listener.accept() => accepted,
            _ = shutdown.recv() => {
                info!("Accept loop stopping");
                return;
            }
        };

        match accepted {
            Ok((stream, peer)) => {
                debug!("Accepted connection from {}", peer);
                if let Err(e) = stream.set_nodelay(true) {
                    debug!("Failed to set TCP_NODELAY for {}: {}", peer, e);
                }
                sessions.push(http::spawn(stream, peer, ctx.clone()));
                sweep_closed(&mut sessions);
            }
            Err(e) => {
                error!("Failed to accept connection: {}", e);
                // Persistent failures such as EMFILE would otherwise spin
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        }
    }
}

fn sweep_closed(sessions: &mut Vec<Arc<HttpSessionState>>) {
    let before = sessions.len();
    sessions.retain(|session| !session.is_closed());
    let swept = before - sessions.len();
    if swept > 0 {
        debug!("Swept {} finished HTTP session(s), {} live", swept, sessions.len());
    }
}
