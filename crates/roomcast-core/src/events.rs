//! Broadcast addressing and the chat wire frame.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::ids::{MessageId, RoomId, UserId};

/// Addressing unit for a broadcast.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
pub enum Scope {
    /// Sessions connected to one room.
    Room(RoomId),
    /// Every notification session.
    Global,
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Room(room) => write!(f, "room:{room}"),
            Self::Global => f.write_str("global"),
        }
    }
}

/// A serialized payload addressed to one scope. Immutable once built.
#[derive(Clone, Debug)]
pub struct OutboundEvent {
    scope: Scope,
    payload: Arc<str>,
}

impl OutboundEvent {
    /// Wrap an already serialized payload.
    pub fn new(scope: Scope, payload: impl Into<Arc<str>>) -> Self {
        Self {
            scope,
            payload: payload.into(),
        }
    }

    /// Serialize `payload` once for a room.
    pub fn room<T: Serialize>(room: RoomId, payload: &T) -> Result<Self, serde_json::Error> {
        Ok(Self::new(Scope::Room(room), serde_json::to_string(payload)?))
    }

    /// Serialize `payload` once for every global session.
    pub fn global<T: Serialize>(payload: &T) -> Result<Self, serde_json::Error> {
        Ok(Self::new(Scope::Global, serde_json::to_string(payload)?))
    }

    /// Who receives it.
    pub fn scope(&self) -> Scope {
        self.scope
    }

    /// Shared JSON text.
    pub fn payload(&self) -> &Arc<str> {
        &self.payload
    }
}

/// Room frame classification by its `type` field.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameKind {
    /// `message`, or an empty type.
    Message,
    /// The reader has seen the room.
    Read,
    /// Keepalive.
    Ping,
    /// Anything else.
    Unknown,
}

impl FrameKind {
    /// Classify a raw `type` value.
    pub fn classify(raw: &str) -> Self {
        match raw {
            "message" | "" => Self::Message,
            "read" => Self::Read,
            "ping" => Self::Ping,
            _ => Self::Unknown,
        }
    }
}

/// Two-party read state of a message, as seen by the sender.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReadStatus {
    /// The other party has read it.
    Read,
    /// Not yet read by the other party.
    Unread,
}

/// Presence transition carried by a global `presence` frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PresenceAction {
    /// The identity opened the room.
    Enter,
    /// The identity left the room.
    Leave,
}

impl PresenceAction {
    /// `enter` or `leave`; anything else is `None`.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "enter" => Some(Self::Enter),
            "leave" => Some(Self::Leave),
            _ => None,
        }
    }
}

/// Chat frame exchanged on room sessions and returned by history fetches.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatFrame {
    /// Store id; absent on frames that were never persisted.
    #[serde(default)]
    pub id: Option<MessageId>,
    /// Message body.
    #[serde(default)]
    pub text: String,
    /// Sender display name, stamped by the server.
    #[serde(default)]
    pub sender: String,
    /// Readers other than the sender.
    #[serde(default, skip_serializing_if = "is_zero")]
    pub read_count: u32,
    /// Two-party status; only set for direct rooms.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub read_status: Option<ReadStatus>,
    /// Attachment URLs.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<String>,
    /// Room the frame belongs to, stamped by the server.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room_id: Option<RoomId>,
    /// Raw `type` value.
    #[serde(rename = "type", default, skip_serializing_if = "String::is_empty")]
    pub kind: String,
    /// Sender id, stamped by the server.
    #[serde(rename = "userId", default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<UserId>,
    /// Client-generated id echoed back for optimistic UIs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
}

impl ChatFrame {
    /// Classification of `kind`.
    pub fn frame_kind(&self) -> FrameKind {
        FrameKind::classify(&self.kind)
    }
}

fn is_zero(n: &u32) -> bool {
    *n == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_frame_types() {
        assert_eq!(FrameKind::classify("message"), FrameKind::Message);
        assert_eq!(FrameKind::classify(""), FrameKind::Message);
        assert_eq!(FrameKind::classify("read"), FrameKind::Read);
        assert_eq!(FrameKind::classify("ping"), FrameKind::Ping);
        assert_eq!(FrameKind::classify("typing"), FrameKind::Unknown);
    }

    #[test]
    fn parse_presence_actions() {
        assert_eq!(PresenceAction::parse("enter"), Some(PresenceAction::Enter));
        assert_eq!(PresenceAction::parse("leave"), Some(PresenceAction::Leave));
        assert_eq!(PresenceAction::parse("wander"), None);
    }

    #[test]
    fn frame_decodes_sparse_client_input() {
        let frame: ChatFrame = serde_json::from_str(r#"{"text":"hi"}"#).unwrap();
        assert_eq!(frame.text, "hi");
        assert_eq!(frame.frame_kind(), FrameKind::Message);
        assert!(frame.user_id.is_none());
    }

    #[test]
    fn frame_uses_wire_field_names() {
        let frame = ChatFrame {
            id: Some(MessageId::new(1)),
            text: "hi".into(),
            sender: "alice".into(),
            read_status: Some(ReadStatus::Unread),
            room_id: Some(RoomId::new(3)),
            kind: "message".into(),
            user_id: Some(UserId::new(7)),
            client_id: Some("c-1".into()),
            ..Default::default()
        };
        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(json["type"], "message");
        assert_eq!(json["userId"], 7);
        assert_eq!(json["room_id"], 3);
        assert_eq!(json["read_status"], "unread");
        assert_eq!(json["client_id"], "c-1");
        assert!(json.get("read_count").is_none());
        assert!(json.get("images").is_none());
    }

    #[test]
    fn outbound_event_serializes_once() {
        let event = OutboundEvent::room(RoomId::new(3), &serde_json::json!({"a": 1})).unwrap();
        assert_eq!(event.scope(), Scope::Room(RoomId::new(3)));
        assert_eq!(&**event.payload(), r#"{"a":1}"#);
    }

    #[test]
    fn scope_display() {
        assert_eq!(Scope::Room(RoomId::new(3)).to_string(), "room:3");
        assert_eq!(Scope::Global.to_string(), "global");
    }
}
