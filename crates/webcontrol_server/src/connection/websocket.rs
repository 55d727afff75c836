//! WebSocket session: frame decoding, keepalive and result flushing.
//!
//! The upgraded stream is split. A writer task owns the sink and sends
//! whatever the session queues for it, while the session task multiplexes
//! three event sources: inbound frames, the keepalive deadline, and flush
//! requests raised by the tick thread after it drained this session's
//! queue. Writes never block the session task, so the keepalive still fires
//! when the peer stops reading. The session leaves the registry whenever
//! the loop ends.

use super::http::force_shutdown;
use super::keepalive::{Keepalive, TimerAction};
use super::registry::{SessionRegistry, WsSessionShared};
use crate::messaging::{decode_payload, encode_batch, FramingMode};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use socket2::{SockRef, Socket};
use std::io::ErrorKind;
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::{Duration, Instant};
use tokio_tungstenite::tungstenite::error::ProtocolError;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, info, warn};

type WsStream = WebSocketStream<TcpStream>;

/// Drives a session until the peer goes away or stops answering pings.
pub async fn run(
    ws: WsStream,
    shared: Arc<WsSessionShared>,
    registry: Arc<SessionRegistry>,
    interval: Duration,
) {
    // A second handle on the socket, so it can be shut down while the
    // writer task is stuck in a send
    let socket = match SockRef::from(ws.get_ref()).try_clone() {
        Ok(socket) => Arc::new(socket),
        Err(e) => {
            warn!("WebSocket session {} could not share its socket: {}", shared.id, e);
            registry.deregister(shared.id);
            return;
        }
    };

    let (sink, mut frames) = ws.split();
    let (outgoing, outgoing_rx) = mpsc::unbounded_channel();
    let writer = tokio::spawn(write_frames(sink, outgoing_rx, socket.clone(), shared.id));
    let mut keepalive = Keepalive::new(interval);

    loop {
        tokio::select! {
            frame = frames.next() => match frame {
                Some(Ok(message)) => on_message(message, &shared, &mut keepalive),
                Some(Err(e)) => {
                    log_stream_error(shared.id, "read", &e);
                    break;
                }
                None => {
                    debug!("WebSocket session {} closed by peer", shared.id);
                    break;
                }
            },
            _ = tokio::time::sleep_until(keepalive.deadline()) => {
                match keepalive.on_timer(Instant::now(), !writer.is_finished()) {
                    TimerAction::Rearm => {}
                    TimerAction::SendPing => {
                        if outgoing.send(Message::Ping(Default::default())).is_err() {
                            break;
                        }
                        keepalive.ping_sent();
                    }
                    TimerAction::Close => {
                        debug!("WebSocket session {} unresponsive, shutting down", shared.id);
                        force_shutdown(SockRef::from(&*socket));
                        break;
                    }
                }
            }
            _ = shared.flush.notified() => {
                if let Some(message) = flush(&shared) {
                    if outgoing.send(message).is_err() {
                        break;
                    }
                }
            }
        }
    }

    drop(outgoing);
    writer.abort();
    registry.deregister(shared.id);
    info!("WebSocket session {} from {} ended", shared.id, shared.peer);
}

/// Sends queued frames in order until the session drops its sender.
///
/// A failed send shuts the socket down, which ends the session's read.
async fn write_frames(
    mut sink: SplitSink<WsStream, Message>,
    mut outgoing: mpsc::UnboundedReceiver<Message>,
    socket: Arc<Socket>,
    id: usize,
) {
    while let Some(message) = outgoing.recv().await {
        if let Err(e) = sink.send(message).await {
            log_stream_error(id, "write", &e);
            force_shutdown(SockRef::from(&*socket));
            return;
        }
    }
}

fn on_message(message: Message, shared: &WsSessionShared, keepalive: &mut Keepalive) {
    let mode = match message {
        Message::Text(_) => FramingMode::Text,
        Message::Binary(_) => FramingMode::Binary,
        // Control frames only prove the peer is alive
        Message::Ping(_) | Message::Pong(_) | Message::Close(_) | Message::Frame(_) => {
            keepalive.on_activity();
            return;
        }
    };

    let payload = message.into_data();
    if payload.is_empty() {
        return;
    }
    keepalive.on_activity();

    let tasks = decode_payload(&payload, mode);
    debug!("WebSocket session {} queued {} task(s)", shared.id, tasks.len());
    shared.queue.push_tasks(tasks);
}

/// Encodes every staged result into a single frame.
fn flush(shared: &WsSessionShared) -> Option<Message> {
    let results = shared.queue.take_results();
    if results.is_empty() {
        return None;
    }

    let (mode, batch) = match encode_batch(&results) {
        Ok(encoded) => encoded,
        Err(e) => {
            warn!("Dropping {} result(s) for session {}: {}", results.len(), shared.id, e);
            return None;
        }
    };
    Some(match mode {
        FramingMode::Text => Message::text(batch),
        FramingMode::Binary => Message::binary(batch.into_bytes()),
    })
}

// Peer closes and forced shutdowns are routine; only log surprises loudly.
fn log_stream_error(id: usize, during: &str, e: &WsError) {
    let benign = match e {
        WsError::ConnectionClosed
        | WsError::AlreadyClosed
        | WsError::Protocol(ProtocolError::ResetWithoutClosingHandshake) => true,
        WsError::Io(io) => matches!(
            io.kind(),
            ErrorKind::ConnectionReset
                | ErrorKind::ConnectionAborted
                | ErrorKind::BrokenPipe
                | ErrorKind::NotConnected
                | ErrorKind::UnexpectedEof
        ),
        _ => false,
    };
    if benign {
        debug!("WebSocket session {} {} ended: {}", id, during, e);
    } else {
        warn!("WebSocket session {} {} failed: {}", id, during, e);
    }
}
