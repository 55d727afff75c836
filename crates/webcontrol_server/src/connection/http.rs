//! HTTP session: static files, response pipelining and WebSocket upgrade.
//!
//! Each accepted connection is split into a reader task and a writer task.
//! The reader parses requests, builds responses and queues them on the
//! pipeline; the writer drains the pipeline strictly in order. An idle
//! deadline shared by both is pushed forward by every completed read or
//! write and, when it passes, shuts the socket down in both directions.
//! Both tasks watch it, so a peer that stops reading is dropped even after
//! the reader has already finished.
//!
//! On a WebSocket upgrade the reader asks the writer for its half of the
//! socket back (after every earlier response has been written), completes
//! the handshake and continues as the WebSocket session. The HTTP session
//! is then inert and its idle deadline disarmed.

use super::pipeline::{PipelineItem, PipelineQueue, PipelineSlot};
use super::registry::SessionRegistry;
use super::request::{parse_request, HttpRequest};
use super::response::{HttpResponse, SERVER_NAME};
use super::static_files::handle_request;
use super::websocket;
use crate::config::ServerConfig;
use crate::error::RequestError;
use http::header::{
    CONNECTION, SEC_WEBSOCKET_ACCEPT, SEC_WEBSOCKET_KEY, SEC_WEBSOCKET_VERSION, SERVER, UPGRADE,
};
use http::{StatusCode, Version};
use socket2::SockRef;
use std::net::{Shutdown, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, Notify};
use tokio::time::{Duration, Instant};
use tokio_tungstenite::tungstenite::handshake::derive_accept_key;
use tokio_tungstenite::tungstenite::protocol::Role;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, info, warn};

const READ_CHUNK: usize = 4096;

/// Everything a session needs from the server that spawned it.
#[derive(Debug, Clone)]
pub struct SessionContext {
    pub config: Arc<ServerConfig>,
    pub registry: Arc<SessionRegistry>,
}

/// Lifecycle state shared by a session's tasks and the listener.
#[derive(Debug)]
pub struct HttpSessionState {
    peer: SocketAddr,
    idle_timeout: Duration,
    /// `None` once the connection has been handed to a WebSocket session
    deadline: Mutex<Option<Instant>>,
    closed: AtomicBool,
    wake: Notify,
}

/// Why a session task stopped waiting on I/O.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Interrupt {
    Closed,
    TimedOut,
}

impl HttpSessionState {
    fn new(peer: SocketAddr, idle_timeout: Duration) -> Self {
        Self {
            peer,
            idle_timeout,
            deadline: Mutex::new(Some(Instant::now() + idle_timeout)),
            closed: AtomicBool::new(false),
            wake: Notify::new(),
        }
    }

    /// Whether the session has finished, either closed or upgraded.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
        // Reader and writer may both be waiting
        self.wake.notify_waiters();
    }

    fn deadline(&self) -> Option<Instant> {
        *self.deadline.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Pushes the idle deadline forward unless it has been disarmed.
    fn touch(&self) {
        let mut deadline = self.deadline.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(at) = deadline.as_mut() {
            *at = Instant::now() + self.idle_timeout;
        }
    }

    fn disarm(&self) {
        *self.deadline.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) = None;
    }

    /// Resolves when the session is closed or its idle deadline really passes.
    async fn interrupted(&self) -> Interrupt {
        loop {
            // Registered before the check so a close in between is not lost
            let wake = self.wake.notified();
            tokio::pin!(wake);
            wake.as_mut().enable();

            if self.is_closed() {
                return Interrupt::Closed;
            }
            match self.deadline() {
                Some(at) => {
                    tokio::select! {
                        _ = tokio::time::sleep_until(at) => {
                            // The deadline may have moved while sleeping
                            if self.deadline().is_some_and(|at| at <= Instant::now()) {
                                return Interrupt::TimedOut;
                            }
                        }
                        _ = &mut wake => {}
                    }
                }
                None => wake.await,
            }
        }
    }
}

/// Starts serving an accepted connection.
///
/// Returns the state the listener keeps to sweep finished sessions.
pub fn spawn(stream: TcpStream, peer: SocketAddr, ctx: SessionContext) -> Arc<HttpSessionState> {
    let state = Arc::new(HttpSessionState::new(peer, ctx.config.idle_timeout));
    let session = HttpSession {
        state: state.clone(),
        ctx,
    };
    tokio::spawn(session.run(stream));
    state
}

enum ReadOutcome {
    Request(HttpRequest),
    Invalid(RequestError),
    Eof,
    Interrupted(Interrupt),
    Failed(std::io::Error),
}

struct HttpSession {
    state: Arc<HttpSessionState>,
    ctx: SessionContext,
}

impl HttpSession {
    async fn run(self, stream: TcpStream) {
        let limit = self.ctx.config.pipeline_limit;
        let (mut reader, writer) = stream.into_split();
        let (items, item_rx) = mpsc::channel(limit + 1);
        tokio::spawn(write_pipeline(writer, item_rx, self.state.clone()));

        let pipeline = PipelineQueue::new(limit);
        let mut buf = Vec::with_capacity(READ_CHUNK);

        loop {
            if pipeline.is_full() {
                debug!(
                    "Pipeline full for {} ({} responses unsent), deferring read",
                    self.state.peer,
                    pipeline.in_flight()
                );
            }
            let slot = tokio::select! {
                slot = pipeline.reserve() => slot,
                interrupt = self.state.interrupted() => {
                    self.interrupt(&reader, interrupt);
                    return;
                }
            };
            let Some(slot) = slot else { return };

            match self.read_request(&mut reader, &mut buf).await {
                ReadOutcome::Request(request) if request.is_websocket_upgrade() => {
                    self.upgrade(request, reader, buf, items, slot).await;
                    return;
                }
                ReadOutcome::Request(request) => {
                    let response = handle_request(&self.ctx.config.doc_root, &request).await;
                    debug!(
                        "{} {} {} -> {}",
                        self.state.peer,
                        request.method,
                        request.target,
                        response.status.as_u16()
                    );
                    let keep_alive = response.keep_alive;
                    if items.send(PipelineItem::Response(response, slot)).await.is_err() || !keep_alive {
                        return;
                    }
                }
                ReadOutcome::Invalid(e) => {
                    debug!("Rejecting request from {}: {}", self.state.peer, e);
                    let response =
                        HttpResponse::bad_request(Version::HTTP_11, false, &e.to_string());
                    let _ = items.send(PipelineItem::Response(response, slot)).await;
                    return;
                }
                // Dropping the item sender lets the writer finish and shut down
                ReadOutcome::Eof => return,
                ReadOutcome::Interrupted(interrupt) => {
                    self.interrupt(&reader, interrupt);
                    return;
                }
                ReadOutcome::Failed(e) => {
                    debug!("Read from {} failed: {}", self.state.peer, e);
                    self.state.close();
                    return;
                }
            }
        }
    }

    /// Reads until `buf` holds a complete request and removes it from `buf`.
    async fn read_request(&self, reader: &mut OwnedReadHalf, buf: &mut Vec<u8>) -> ReadOutcome {
        let max = self.ctx.config.max_request_bytes;
        loop {
            match parse_request(buf, max) {
                Ok(Some((request, used))) => {
                    buf.drain(..used);
                    return ReadOutcome::Request(request);
                }
                Ok(None) => {}
                Err(e) => return ReadOutcome::Invalid(e),
            }

            buf.reserve(READ_CHUNK);
            let read = tokio::select! {
                read = reader.read_buf(buf) => read,
                interrupt = self.state.interrupted() => return ReadOutcome::Interrupted(interrupt),
            };
            match read {
                Ok(0) => return ReadOutcome::Eof,
                Ok(_) => self.state.touch(),
                Err(e) => return ReadOutcome::Failed(e),
            }
        }
    }

    fn interrupt(&self, reader: &OwnedReadHalf, interrupt: Interrupt) {
        if interrupt == Interrupt::TimedOut {
            debug!("HTTP session {} idle, shutting down", self.state.peer);
            force_shutdown(SockRef::from(reader.as_ref()));
            self.state.close();
        }
    }

    /// Completes a WebSocket handshake and runs the resulting session.
    async fn upgrade(
        &self,
        request: HttpRequest,
        reader: OwnedReadHalf,
        leftover: Vec<u8>,
        items: mpsc::Sender<PipelineItem<OwnedWriteHalf>>,
        slot: PipelineSlot,
    ) {
        let key = match validate_upgrade(&request) {
            Ok(key) => key,
            Err(why) => {
                debug!("Refusing WebSocket upgrade from {}: {}", self.state.peer, why);
                let response = HttpResponse::bad_request(request.version, false, why);
                let _ = items.send(PipelineItem::Response(response, slot)).await;
                return;
            }
        };
        drop(slot);

        // Wait for every earlier response to be written
        let (handback, handback_rx) = oneshot::channel();
        if items.send(PipelineItem::Upgrade(handback)).await.is_err() {
            return;
        }
        let writer = tokio::select! {
            writer = handback_rx => match writer {
                Ok(writer) => writer,
                Err(_) => return,
            },
            interrupt = self.state.interrupted() => {
                self.interrupt(&reader, interrupt);
                return;
            }
        };
        self.state.disarm();

        let mut stream = match reader.reunite(writer) {
            Ok(stream) => stream,
            Err(e) => {
                warn!("Failed to reassemble connection from {}: {}", self.state.peer, e);
                self.state.close();
                return;
            }
        };

        let handshake = switching_protocols(&derive_accept_key(key.as_bytes()));
        if let Err(e) = write_all_flush(&mut stream, handshake.as_bytes()).await {
            debug!("WebSocket handshake with {} failed: {}", self.state.peer, e);
            self.state.close();
            return;
        }

        // The HTTP side is done; the listener may sweep it now
        self.state.close();

        let ws = WebSocketStream::from_partially_read(stream, leftover, Role::Server, None).await;
        let shared = self.ctx.registry.register(self.state.peer);
        info!("WebSocket session {} opened from {}", shared.id, self.state.peer);
        websocket::run(
            ws,
            shared,
            self.ctx.registry.clone(),
            self.ctx.config.idle_timeout,
        )
        .await;
    }
}

fn validate_upgrade(request: &HttpRequest) -> Result<&str, &'static str> {
    let key = request
        .header(SEC_WEBSOCKET_KEY)
        .filter(|key| !key.is_empty())
        .ok_or("Missing Sec-WebSocket-Key")?;
    match request.header(SEC_WEBSOCKET_VERSION) {
        Some("13") => Ok(key),
        _ => Err("Unsupported WebSocket version"),
    }
}

/// The 101 response head completing a WebSocket handshake.
fn switching_protocols(accept: &str) -> String {
    let status = StatusCode::SWITCHING_PROTOCOLS;
    format!(
        "{:?} {} {}\r\n{SERVER}: {SERVER_NAME}\r\n{UPGRADE}: websocket\r\n\
         {CONNECTION}: Upgrade\r\n{SEC_WEBSOCKET_ACCEPT}: {accept}\r\n\r\n",
        Version::HTTP_11,
        status.as_str(),
        status.canonical_reason().unwrap_or_default(),
    )
}

/// Writes queued items in order until the pipeline ends or a response asks
/// for the connection to close.
async fn write_pipeline(
    mut writer: OwnedWriteHalf,
    mut items: mpsc::Receiver<PipelineItem<OwnedWriteHalf>>,
    state: Arc<HttpSessionState>,
) {
    while let Some(item) = items.recv().await {
        match item {
            PipelineItem::Response(response, slot) => {
                let keep_alive = response.keep_alive;
                let written = tokio::select! {
                    written = response.write_to(&mut writer) => written,
                    interrupt = state.interrupted() => {
                        if interrupt == Interrupt::TimedOut {
                            debug!("HTTP session {} stopped reading, shutting down", state.peer);
                            force_shutdown(SockRef::from(writer.as_ref()));
                        }
                        state.close();
                        return;
                    }
                };
                if let Err(e) = written {
                    if !state.is_closed() {
                        debug!("Write to {} failed: {}", state.peer, e);
                    }
                    state.close();
                    return;
                }
                state.touch();
                drop(slot);

                if !keep_alive {
                    break;
                }
            }
            PipelineItem::Upgrade(handback) => {
                let _ = handback.send(writer);
                return;
            }
        }
    }

    // Reader is gone or the last response closed the connection
    let _ = writer.shutdown().await;
    state.close();
}

async fn write_all_flush<W>(writer: &mut W, bytes: &[u8]) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(bytes).await?;
    writer.flush().await
}

/// Shuts a socket down in both directions, failing any I/O in flight on it.
pub(crate) fn force_shutdown(socket: SockRef<'_>) {
    if let Err(e) = socket.shutdown(Shutdown::Both) {
        debug!("Socket shutdown failed: {}", e);
    }
}
