//! Live connection handles.
//!
//! A [`Session`] is the registry's view of one WebSocket: who is on it, which scope it
//! listens to, and a bounded queue feeding the connection's writer task. Only the
//! broadcast dispatcher pushes into that queue.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::ws::close_code;
use parking_lot::Mutex;
use roomcast_core::{Identity, Scope, SessionId, TransportError, UserId};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Connection lifecycle. A request is `Connecting` until its token verifies; the
/// [`Session`] it then gets starts `Authenticated`, turns `Active` once the socket is
/// driven, and ends `Closed`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    /// Upgrade requested, token not yet verified.
    Connecting,
    /// Registered, waiting for the handshake to complete.
    Authenticated,
    /// Socket read and write loops running.
    Active,
    /// Terminal.
    Closed,
}

impl SessionState {
    /// Label used in logs.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Connecting => "connecting",
            Self::Authenticated => "authenticated",
            Self::Active => "active",
            Self::Closed => "closed",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a session ended. The first reason recorded wins.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CloseReason {
    /// A newer global session for the same identity replaced this one.
    Superseded,
    /// A broadcast or socket write failed or timed out.
    WriteFailed,
    /// The socket returned a read error, or the upgrade never completed.
    ReadFailed,
    /// The peer sent a close frame or hung up.
    PeerClosed,
    /// The server is stopping.
    ServerShutdown,
}

impl CloseReason {
    /// Label used in logs and as the close frame reason.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Superseded => "superseded",
            Self::WriteFailed => "write_failed",
            Self::ReadFailed => "read_failed",
            Self::PeerClosed => "peer_closed",
            Self::ServerShutdown => "server_shutdown",
        }
    }

    /// WebSocket close code sent to the peer.
    pub fn close_code(self) -> u16 {
        match self {
            Self::Superseded => close_code::POLICY,
            Self::WriteFailed | Self::ReadFailed => close_code::ERROR,
            Self::PeerClosed => close_code::NORMAL,
            Self::ServerShutdown => close_code::AWAY,
        }
    }
}

/// One authenticated duplex connection bound to a scope.
pub struct Session {
    id: SessionId,
    identity: Identity,
    scope: Scope,
    subprotocol: String,
    opened_at: Instant,
    tx: mpsc::Sender<Arc<str>>,
    shutdown: CancellationToken,
    close_reason: Mutex<Option<CloseReason>>,
    active: AtomicBool,
    torn_down: AtomicBool,
}

impl Session {
    /// Create a session and the receiving end of its outbound queue.
    pub fn new(
        identity: Identity,
        scope: Scope,
        subprotocol: impl Into<String>,
        queue_capacity: usize,
    ) -> (Arc<Self>, mpsc::Receiver<Arc<str>>) {
        let (tx, rx) = mpsc::channel(queue_capacity.max(1));
        let session = Self {
            id: SessionId::new(),
            identity,
            scope,
            subprotocol: subprotocol.into(),
            opened_at: Instant::now(),
            tx,
            shutdown: CancellationToken::new(),
            close_reason: Mutex::new(None),
            active: AtomicBool::new(false),
            torn_down: AtomicBool::new(false),
        };
        (Arc::new(session), rx)
    }

    /// Process-unique id, used in logs.
    pub fn id(&self) -> &SessionId {
        &self.id
    }

    /// The identity the token resolved to.
    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    /// Shorthand for `identity().user_id`.
    pub fn user_id(&self) -> UserId {
        self.identity.user_id
    }

    /// The room or global channel this session listens to.
    pub fn scope(&self) -> Scope {
        self.scope
    }

    /// Time since the session was registered.
    pub fn age(&self) -> Duration {
        self.opened_at.elapsed()
    }

    /// The negotiated subprotocol (the bearer token the client offered).
    pub fn subprotocol(&self) -> &str {
        &self.subprotocol
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        if self.shutdown.is_cancelled() {
            SessionState::Closed
        } else if self.active.load(Ordering::Acquire) {
            SessionState::Active
        } else {
            SessionState::Authenticated
        }
    }

    /// Mark the handshake complete. Returns `false` if the session already closed.
    pub fn activate(&self) -> bool {
        self.active.store(true, Ordering::Release);
        !self.is_closed()
    }

    /// Whether [`Session::close`] has been called.
    pub fn is_closed(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Queue a payload for the writer task, waiting at most `timeout` for room.
    pub async fn send(&self, payload: Arc<str>, timeout: Duration) -> Result<(), TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        match self.tx.send_timeout(payload, timeout).await {
            Ok(()) => Ok(()),
            Err(mpsc::error::SendTimeoutError::Timeout(_)) => Err(TransportError::WriteTimeout(timeout)),
            Err(mpsc::error::SendTimeoutError::Closed(_)) => Err(TransportError::Closed),
        }
    }

    /// Close the session. Non-blocking; wakes the read loop and the writer task.
    /// Returns `false` if it was already closed.
    pub fn close(&self, reason: CloseReason) -> bool {
        {
            let mut current = self.close_reason.lock();
            if current.is_some() {
                return false;
            }
            *current = Some(reason);
        }
        self.shutdown.cancel();
        true
    }

    /// The reason recorded by the first [`Session::close`], if any.
    pub fn close_reason(&self) -> Option<CloseReason> {
        *self.close_reason.lock()
    }

    /// Resolves once the session is closed.
    pub async fn closed(&self) {
        self.shutdown.cancelled().await;
    }

    /// Claim the one-time teardown. Only the first caller gets `true`.
    pub(crate) fn begin_teardown(&self) -> bool {
        !self.torn_down.swap(true, Ordering::AcqRel)
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("user_id", &self.identity.user_id)
            .field("scope", &self.scope)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use roomcast_core::RoomId;

    fn session(capacity: usize) -> (Arc<Session>, mpsc::Receiver<Arc<str>>) {
        Session::new(
            Identity::new(UserId::new(7), "alice"),
            Scope::Room(RoomId::new(3)),
            "token-abc",
            capacity,
        )
    }

    #[tokio::test]
    async fn send_queues_payload() {
        let (s, mut rx) = session(4);
        s.send(Arc::from("hello"), Duration::from_secs(1)).await.unwrap();
        assert_eq!(&*rx.recv().await.unwrap(), "hello");
    }

    #[tokio::test]
    async fn send_after_receiver_dropped_is_closed() {
        let (s, rx) = session(4);
        drop(rx);
        let err = s.send(Arc::from("x"), Duration::from_secs(1)).await.unwrap_err();
        assert_eq!(err, TransportError::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn send_to_full_queue_times_out() {
        let (s, _rx) = session(1);
        s.send(Arc::from("one"), Duration::from_millis(10)).await.unwrap();
        let err = s.send(Arc::from("two"), Duration::from_millis(10)).await.unwrap_err();
        assert_eq!(err, TransportError::WriteTimeout(Duration::from_millis(10)));
    }

    #[test]
    fn lifecycle_moves_from_authenticated_to_active_to_closed() {
        let (s, _rx) = session(4);
        assert_eq!(s.state(), SessionState::Authenticated);
        assert!(s.activate());
        assert_eq!(s.state(), SessionState::Active);
        let _ = s.close(CloseReason::PeerClosed);
        assert_eq!(s.state(), SessionState::Closed);
        assert!(!s.activate());
    }

    #[test]
    fn teardown_is_claimed_once() {
        let (s, _rx) = session(1);
        assert!(s.begin_teardown());
        assert!(!s.begin_teardown());
    }

    #[tokio::test]
    async fn close_is_idempotent_and_keeps_first_reason() {
        let (s, _rx) = session(4);
        let _ = s.activate();
        assert!(s.close(CloseReason::Superseded));
        assert!(!s.close(CloseReason::WriteFailed));
        assert_eq!(s.close_reason(), Some(CloseReason::Superseded));
        assert_eq!(s.state(), SessionState::Closed);
        s.closed().await;
    }

    #[tokio::test]
    async fn send_on_closed_session_fails() {
        let (s, _rx) = session(4);
        let _ = s.close(CloseReason::PeerClosed);
        let err = s.send(Arc::from("x"), Duration::from_secs(1)).await.unwrap_err();
        assert_eq!(err, TransportError::Closed);
    }

    #[test]
    fn debug_omits_subprotocol_token() {
        let (s, _rx) = session(1);
        let rendered = format!("{s:?}");
        assert!(!rendered.contains("token-abc"), "got: {rendered}");
        assert_eq!(s.subprotocol(), "token-abc");
    }

    #[test]
    fn close_codes() {
        assert_eq!(CloseReason::Superseded.close_code(), close_code::POLICY);
        assert_eq!(CloseReason::PeerClosed.close_code(), close_code::NORMAL);
    }
}
