//! Inbound frame handling for room and global sessions.

use roomcast_core::{ChatFrame, FrameKind, PresenceAction, ProtocolError, RoomId};
use serde_json::Value;
use tracing::{debug, warn};

use super::session::Session;
use crate::chat::ChatHub;

/// What an inbound frame turned into.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameOutcome {
    /// Published as a chat message.
    Broadcast,
    /// Receipts queued and a read notification published.
    ReadNotified,
    /// Presence changed (or an unknown action was ignored) and the frame re-broadcast.
    PresenceUpdated(Option<PresenceAction>),
    /// A `ping`; nothing is published.
    Keepalive,
    /// Unknown room frame type; dropped.
    Ignored,
}

/// Handle one text frame from a room session.
pub fn handle_room_frame(
    hub: &ChatHub,
    session: &Session,
    room_id: RoomId,
    raw: &str,
) -> Result<FrameOutcome, ProtocolError> {
    let mut frame: ChatFrame = serde_json::from_str(raw).map_err(|e| ProtocolError::Malformed(e.to_string()))?;
    let identity = session.identity();
    frame.sender.clone_from(&identity.display_name);
    frame.user_id = Some(identity.user_id);
    frame.room_id = Some(room_id);

    let outcome = match frame.frame_kind() {
        FrameKind::Message => {
            frame.kind = "message".into();
            FrameOutcome::Broadcast
        }
        FrameKind::Read => {
            let _ = hub.enqueue_receipts(room_id, identity.user_id);
            frame.text.clear();
            frame.images.clear();
            FrameOutcome::ReadNotified
        }
        FrameKind::Ping => {
            debug!(session_id = %session.id(), "keepalive");
            return Ok(FrameOutcome::Keepalive);
        }
        FrameKind::Unknown => {
            warn!(session_id = %session.id(), kind = %frame.kind, "unknown frame type dropped");
            return Ok(FrameOutcome::Ignored);
        }
    };

    if let Err(e) = hub.publish_room_event(room_id, &frame) {
        warn!(room_id = %room_id, error = %e, "room frame not broadcast");
    }
    Ok(outcome)
}

/// Handle one text frame from a global (notify) session.
pub fn handle_global_frame(hub: &ChatHub, session: &Session, raw: &str) -> Result<FrameOutcome, ProtocolError> {
    let value: Value = serde_json::from_str(raw).map_err(|e| ProtocolError::Malformed(e.to_string()))?;
    let Value::Object(mut frame) = value else {
        return Err(ProtocolError::Malformed("expected a JSON object".into()));
    };
    let user_id = session.user_id();

    let outcome = match frame.get("type").and_then(Value::as_str).unwrap_or_default() {
        "ping" => {
            debug!(session_id = %session.id(), "keepalive");
            return Ok(FrameOutcome::Keepalive);
        }
        "presence" => {
            let room_id = frame.get("roomId").and_then(room_id_of).ok_or(ProtocolError::InvalidField("roomId"))?;
            let action = frame.get("action").and_then(Value::as_str).unwrap_or_default();
            FrameOutcome::PresenceUpdated(hub.presence().apply(room_id, user_id, action))
        }
        _ => FrameOutcome::Broadcast,
    };

    let _ = frame.insert("userId".into(), Value::from(user_id.get()));
    if let Err(e) = hub.publish_global_event(&frame) {
        warn!(user_id = %user_id, error = %e, "global frame not broadcast");
    }
    Ok(outcome)
}

/// Room ids arrive as JSON numbers; integer-valued floats are accepted when they fit
/// in an `i64`. `i64::MAX as f64` rounds up to 2^63, so the upper bound is exclusive.
#[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
fn room_id_of(value: &Value) -> Option<RoomId> {
    if let Some(id) = value.as_i64() {
        return Some(RoomId::new(id));
    }
    let float = value.as_f64()?;
    let in_range = float >= i64::MIN as f64 && float < i64::MAX as f64;
    (float.fract() == 0.0 && in_range).then(|| RoomId::new(float as i64))
}
