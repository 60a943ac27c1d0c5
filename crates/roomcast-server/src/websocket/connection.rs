//! WebSocket connection lifecycle: from a registered session through disconnect.

use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, Utf8Bytes, WebSocket};
use futures::{Sink, SinkExt, StreamExt};
use roomcast_core::{ProtocolError, Scope, TransportError};
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};

use super::frames::{handle_global_frame, handle_room_frame};
use super::session::{CloseReason, Session};
use crate::chat::ChatHub;

/// Drive one connection until either side closes it.
///
/// 1. Spawns the writer task draining the session's outbound queue
/// 2. Reads inbound text frames and hands them to the frame handlers
/// 3. Stops when the peer goes away, a read fails, or the session is closed
///    from elsewhere (supersession, failed broadcast write)
/// 4. Tears the session down through the hub
#[instrument(skip_all, fields(session_id = %session.id(), user_id = %session.user_id(), scope = %session.scope()))]
pub async fn run_connection(
    socket: WebSocket,
    hub: Arc<ChatHub>,
    session: Arc<Session>,
    outbound: mpsc::Receiver<Arc<str>>,
) {
    let (ws_tx, mut ws_rx) = socket.split();
    let writer = tokio::spawn(write_loop(ws_tx, Arc::clone(&session), outbound, hub.write_timeout()));
    if session.activate() {
        info!(state = %session.state(), "connection active");
    }

    loop {
        tokio::select! {
            () = session.closed() => break,
            msg = ws_rx.next() => match msg {
                Some(Ok(Message::Text(text))) => dispatch(&hub, &session, text.as_str()),
                Some(Ok(Message::Binary(data))) => {
                    warn!(len = data.len(), error = %ProtocolError::Binary, "frame dropped");
                }
                Some(Ok(Message::Ping(_) | Message::Pong(_))) => {}
                Some(Ok(Message::Close(_))) | None => {
                    let _ = session.close(CloseReason::PeerClosed);
                    break;
                }
                Some(Err(e)) => {
                    let err = TransportError::Read(e.to_string());
                    debug!(error = %err, error_kind = err.error_kind(), "socket read failed");
                    let _ = session.close(CloseReason::ReadFailed);
                    break;
                }
            }
        }
    }

    hub.teardown(&session);
    if let Err(e) = writer.await {
        warn!(error = %e, "writer task failed");
    }
}

fn dispatch(hub: &ChatHub, session: &Session, raw: &str) {
    let result = match session.scope() {
        Scope::Room(room_id) => handle_room_frame(hub, session, room_id, raw),
        Scope::Global => handle_global_frame(hub, session, raw),
    };
    match result {
        Ok(outcome) => debug!(?outcome, "frame handled"),
        Err(e) => warn!(error = %e, "frame dropped"),
    }
}

/// Write one frame, giving up after `limit`.
async fn send_frame<S>(ws_tx: &mut S, message: Message, limit: Duration) -> Result<(), TransportError>
where
    S: Sink<Message> + Unpin,
    S::Error: Display,
{
    match tokio::time::timeout(limit, ws_tx.send(message)).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(TransportError::Write(e.to_string())),
        Err(_) => Err(TransportError::WriteTimeout(limit)),
    }
}

/// Drain the outbound queue into the socket. Every write is bounded by `write_timeout`
/// and abandoned as soon as the session closes, so a peer that stops reading cannot
/// pin this task.
async fn write_loop<S>(
    mut ws_tx: S,
    session: Arc<Session>,
    mut outbound: mpsc::Receiver<Arc<str>>,
    write_timeout: Duration,
) where
    S: Sink<Message> + Unpin,
    S::Error: Display,
{
    loop {
        let payload = tokio::select! {
            biased;
            () = session.closed() => break,
            payload = outbound.recv() => match payload {
                Some(payload) => payload,
                None => break,
            },
        };
        let message = Message::Text(payload.to_string().into());
        let result = tokio::select! {
            biased;
            () = session.closed() => break,
            result = send_frame(&mut ws_tx, message, write_timeout) => result,
        };
        if let Err(e) = result {
            debug!(error = %e, error_kind = e.error_kind(), "socket write failed");
            let _ = session.close(CloseReason::WriteFailed);
            return;
        }
    }

    let reason = session.close_reason().unwrap_or(CloseReason::ServerShutdown);
    if matches!(reason, CloseReason::PeerClosed | CloseReason::ReadFailed) {
        return;
    }
    let frame = CloseFrame {
        code: reason.close_code(),
        reason: Utf8Bytes::from_static(reason.as_str()),
    };
    if let Err(e) = send_frame(&mut ws_tx, Message::Close(Some(frame)), write_timeout).await {
        debug!(reason = reason.as_str(), error = %e, "close frame not delivered");
    }
}
