//! The chat hub: registry, presence, dispatcher and receipt outbox wired together.
//!
//! Both the WebSocket handlers and the HTTP chat API go through [`ChatHub`]; it is the
//! only place that decides what a session's arrival or departure does to shared state.

use std::sync::Arc;
use std::time::Duration;

use metrics::{counter, gauge, histogram};
use roomcast_core::{ChatFrame, ChatStore, Identity, NewMessage, PersistenceError, RoomId, Scope, UserId};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::config::HubConfig;
use crate::metrics::{
    WS_CONNECTIONS_ACTIVE, WS_CONNECTIONS_TOTAL, WS_CONNECTION_DURATION_SECONDS, WS_DISCONNECTIONS_TOTAL,
    WS_SUPERSEDED_TOTAL,
};
use crate::presence::PresenceTracker;
use crate::receipts::{History, ReadReceiptReconciler, ReceiptJob, ReceiptOutbox};
use crate::websocket::dispatcher::{BroadcastDispatcher, PublishError, Publisher};
use crate::websocket::registry::ConnectionRegistry;
use crate::websocket::session::{CloseReason, Session};

/// Body of `POST /api/chat`.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SendMessage {
    /// Message body.
    #[serde(default)]
    pub text: String,
    /// Client-side correlation id, echoed back. Empty means none.
    #[serde(default)]
    pub client_id: Option<String>,
    /// Attachment file names already uploaded.
    #[serde(default)]
    pub images: Vec<String>,
}

/// Shared chat state behind every handler.
pub struct ChatHub {
    registry: Arc<ConnectionRegistry>,
    presence: Arc<PresenceTracker>,
    publisher: Publisher,
    outbox: ReceiptOutbox,
    reconciler: ReadReceiptReconciler,
    store: Arc<dyn ChatStore>,
    session_queue: usize,
    write_timeout: Duration,
    attachment_base_url: String,
}

impl ChatHub {
    /// Build the hub and spawn the dispatcher and receipt worker.
    pub fn start(store: Arc<dyn ChatStore>, config: &HubConfig) -> (Arc<Self>, Vec<JoinHandle<()>>) {
        let registry = Arc::new(ConnectionRegistry::new());
        let presence = Arc::new(PresenceTracker::new());
        let (publisher, dispatcher) = BroadcastDispatcher::spawn(Arc::clone(&registry), &config.dispatcher);
        let (outbox, worker) = ReceiptOutbox::spawn(Arc::clone(&store), config.outbox.clone());
        let reconciler =
            ReadReceiptReconciler::new(Arc::clone(&store), Arc::clone(&presence), config.attachment_base_url.clone());

        let hub = Self {
            registry,
            presence,
            publisher,
            outbox,
            reconciler,
            store,
            session_queue: config.session_queue,
            write_timeout: config.dispatcher.write_timeout,
            attachment_base_url: config.attachment_base_url.clone(),
        };
        (Arc::new(hub), vec![dispatcher, worker])
    }

    /// Live sessions.
    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    /// Who is viewing which room.
    pub fn presence(&self) -> &PresenceTracker {
        &self.presence
    }

    /// Producer side of the broadcast queue.
    pub fn publisher(&self) -> &Publisher {
        &self.publisher
    }

    /// Queue of pending read-receipt jobs.
    pub fn outbox(&self) -> &ReceiptOutbox {
        &self.outbox
    }

    /// Upper bound on a single socket write.
    pub fn write_timeout(&self) -> Duration {
        self.write_timeout
    }

    /// Register an authenticated room session.
    pub fn open_room_session(
        &self,
        identity: Identity,
        room_id: RoomId,
        subprotocol: &str,
    ) -> (Arc<Session>, mpsc::Receiver<Arc<str>>) {
        let (session, rx) = Session::new(identity, Scope::Room(room_id), subprotocol, self.session_queue);
        self.registry.add_room_session(room_id, Arc::clone(&session));
        record_open(&session);
        info!(room_id = %room_id, user_id = %session.user_id(), session_id = %session.id(), "room session opened");
        (session, rx)
    }

    /// Register an authenticated global session, superseding any earlier one.
    pub fn open_global_session(&self, identity: Identity, subprotocol: &str) -> (Arc<Session>, mpsc::Receiver<Arc<str>>) {
        let (session, rx) = Session::new(identity, Scope::Global, subprotocol, self.session_queue);
        if self.registry.set_global_session(Arc::clone(&session)).is_some() {
            counter!(WS_SUPERSEDED_TOTAL).increment(1);
        }
        record_open(&session);
        info!(user_id = %session.user_id(), session_id = %session.id(), "global session opened");
        (session, rx)
    }

    /// Remove a finished session and clear the identity's presence once nothing
    /// of theirs is left that owns it. Only the first call per session has any effect.
    #[instrument(skip_all, fields(session_id = %session.id(), user_id = %session.user_id(), scope = %session.scope()))]
    pub fn teardown(&self, session: &Session) {
        if !session.begin_teardown() {
            return;
        }
        let user_id = session.user_id();
        let removed = self.registry.remove(session);
        let clear_presence = match session.scope() {
            Scope::Room(_) => !self.registry.has_room_sessions(user_id),
            // A superseded session is no longer in the registry; its replacement owns presence now.
            Scope::Global => removed,
        };
        if clear_presence {
            let _ = self.presence.clear_all_for(user_id);
        }
        let reason = session.close_reason().map_or("unknown", |r| r.as_str());
        let scope = scope_label(session.scope());
        counter!(WS_DISCONNECTIONS_TOTAL, "scope" => scope, "reason" => reason).increment(1);
        gauge!(WS_CONNECTIONS_ACTIVE, "scope" => scope).decrement(1.0);
        histogram!(WS_CONNECTION_DURATION_SECONDS, "scope" => scope).record(session.age().as_secs_f64());
        info!(removed, presence_cleared = clear_presence, reason, "session closed");
    }

    /// Close every live session, e.g. on server shutdown. Each connection tears
    /// itself down as its read loop observes the close.
    pub fn close_all(&self, reason: CloseReason) -> usize {
        let sessions = self.registry.all_sessions();
        let closed = sessions.iter().filter(|s| s.close(reason)).count();
        info!(closed, reason = reason.as_str(), "sessions closed");
        closed
    }

    /// Persist a message and its attachments, then broadcast it to the room.
    /// Attachment and broadcast failures are logged; the stored message stands.
    #[instrument(skip(self, identity, message), fields(user_id = %identity.user_id))]
    pub fn send_message(
        &self,
        room_id: RoomId,
        identity: &Identity,
        message: SendMessage,
    ) -> Result<ChatFrame, PersistenceError> {
        let client_id = message.client_id.filter(|id| !id.is_empty());
        let id = self.store.persist_message(NewMessage {
            room_id,
            sender_id: identity.user_id,
            text: &message.text,
            client_id: client_id.as_deref(),
        })?;

        for image in &message.images {
            if let Err(e) = self.store.persist_attachment(id, image) {
                warn!(message_id = %id, file = %image, error = %e, "attachment not saved");
            }
        }

        let frame = ChatFrame {
            id: Some(id),
            text: message.text,
            sender: identity.display_name.clone(),
            images: message
                .images
                .iter()
                .map(|file| format!("{}{}", self.attachment_base_url, file))
                .collect(),
            room_id: Some(room_id),
            kind: "message".into(),
            user_id: Some(identity.user_id),
            client_id,
            ..ChatFrame::default()
        };
        if let Err(e) = self.publish_room_event(room_id, &frame) {
            warn!(message_id = %id, error = %e, "stored message not broadcast");
        }
        debug!(message_id = %id, "message sent");
        Ok(frame)
    }

    /// Room history as seen by `requester`, reconciled against presence.
    pub fn history(&self, room_id: RoomId, requester: UserId) -> Result<History, PersistenceError> {
        self.reconciler.fetch_history(room_id, requester)
    }

    /// Queue a "mark everything read" job. `false` if the outbox is full.
    pub fn enqueue_receipts(&self, room_id: RoomId, reader_id: UserId) -> bool {
        self.outbox.enqueue(ReceiptJob { room_id, reader_id })
    }

    /// Serialize `payload` and queue it for every session in the room.
    pub fn publish_room_event<T: Serialize>(&self, room_id: RoomId, payload: &T) -> Result<(), PublishError> {
        self.publisher.publish_room_event(room_id, payload)
    }

    /// Serialize `payload` and queue it for every global session.
    pub fn publish_global_event<T: Serialize>(&self, payload: &T) -> Result<(), PublishError> {
        self.publisher.publish_global_event(payload)
    }
}

fn scope_label(scope: Scope) -> &'static str {
    match scope {
        Scope::Room(_) => "room",
        Scope::Global => "global",
    }
}

fn record_open(session: &Session) {
    let scope = scope_label(session.scope());
    counter!(WS_CONNECTIONS_TOTAL, "scope" => scope).increment(1);
    gauge!(WS_CONNECTIONS_ACTIVE, "scope" => scope).increment(1.0);
}
