//! Client and server message types.
//!
//! Handshake payloads (session descriptions, connectivity candidates) are
//! opaque to the coordinator and carried as raw JSON values. The `sender`
//! field on relayed handshake events is attached by the coordinator and is
//! never accepted from the originating client.

use serde::{Deserialize, Serialize};

/// One entry in a session roster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerInfo {
    /// Connection-scoped participant id.
    #[serde(rename = "userId")]
    pub user_id: String,
    /// Display name announced at join time.
    #[serde(rename = "userName")]
    pub user_name: String,
}

/// Presence status for one participant's local media.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaStatus {
    #[serde(rename = "cameraOn")]
    pub camera_on: bool,
    #[serde(rename = "micOn")]
    pub mic_on: bool,
    #[serde(rename = "screenSharing")]
    pub screen_sharing: bool,
}

/// The three handshake message kinds relayed between peers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HandshakeKind {
    Offer,
    Answer,
    Candidate,
}

impl HandshakeKind {
    /// Wire tag for this kind, as used in message `type` fields.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            HandshakeKind::Offer => "offer",
            HandshakeKind::Answer => "answer",
            HandshakeKind::Candidate => "candidate",
        }
    }
}

/// Messages a client sends to the coordinator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ClientMessage {
    /// Announce intent to join a session. Must be the first message on a
    /// connection.
    JoinRoom {
        #[serde(rename = "roomId")]
        room_id: String,
        #[serde(rename = "userName")]
        user_name: String,
    },

    /// Session description offered to one peer.
    Offer {
        target: String,
        offer: serde_json::Value,
    },

    /// Session description answering a peer's offer.
    Answer {
        target: String,
        answer: serde_json::Value,
    },

    /// Connectivity candidate for one peer.
    Candidate {
        target: String,
        candidate: serde_json::Value,
    },

    /// Presence update, rebroadcast to the rest of the session.
    UpdateMediaStatus(MediaStatus),

    /// Moderator request to remove a participant.
    KickUser {
        #[serde(rename = "targetId")]
        target_id: String,
    },
}

/// Events the coordinator sends to a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ServerEvent {
    /// Reply to a successful join: the occupants already in the session.
    UsersInRoom { users: Vec<PeerInfo> },

    /// A new occupant joined the session.
    NewUser {
        #[serde(rename = "userId")]
        user_id: String,
        #[serde(rename = "userName")]
        user_name: String,
        #[serde(rename = "roomId")]
        room_id: String,
    },

    /// Relayed offer, with the sender attached by the coordinator.
    Offer {
        sender: String,
        offer: serde_json::Value,
    },

    /// Relayed answer.
    Answer {
        sender: String,
        answer: serde_json::Value,
    },

    /// Relayed connectivity candidate.
    Candidate {
        sender: String,
        candidate: serde_json::Value,
    },

    /// Presence update from another participant.
    UpdateMediaStatus {
        #[serde(rename = "userId")]
        user_id: String,
        #[serde(flatten)]
        status: MediaStatus,
    },

    /// A participant left or lost its connection.
    UserDisconnected {
        #[serde(rename = "userId")]
        user_id: String,
    },

    /// The receiving participant was removed by a moderator. Distinct
    /// from `ForceCloseRoom` so clients can show a different message.
    Kicked,

    /// Terminal notice: the session ended. Clients must treat this as
    /// "redirect away"; the connection is closed immediately after.
    ForceCloseRoom,

    /// Join was denied (outside the authorized window, or not on the
    /// allow-list). No session state exists for this participant.
    JoinDenied { reason: String },

    /// Protocol-level error surfaced to the offending client only.
    Error { code: i32, message: String },
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn join_room_wire_format() {
        let msg: ClientMessage =
            serde_json::from_value(json!({"type": "join-room", "roomId": "standup", "userName": "ana"}))
                .unwrap();
        assert_eq!(
            msg,
            ClientMessage::JoinRoom {
                room_id: "standup".to_string(),
                user_name: "ana".to_string(),
            }
        );
    }

    #[test]
    fn offer_payload_is_opaque() {
        let msg: ClientMessage = serde_json::from_value(json!({
            "type": "offer",
            "target": "p-2",
            "offer": {"sdp": "v=0...", "type": "offer"}
        }))
        .unwrap();
        match msg {
            ClientMessage::Offer { target, offer } => {
                assert_eq!(target, "p-2");
                assert_eq!(offer["type"], "offer");
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn spoofed_sender_field_is_discarded() {
        // The client message shape has no `sender`; a spoofed one is
        // dropped on deserialization. The coordinator attaches the real
        // sender identity on relay.
        let msg: ClientMessage = serde_json::from_value(json!({
            "type": "offer",
            "target": "p-2",
            "sender": "spoofed",
            "offer": {}
        }))
        .unwrap();
        assert_eq!(
            serde_json::to_value(&msg).unwrap(),
            json!({"type": "offer", "target": "p-2", "offer": {}})
        );
    }

    #[test]
    fn server_offer_includes_sender() {
        let event = ServerEvent::Offer {
            sender: "p-1".to_string(),
            offer: json!({"sdp": "v=0"}),
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "offer");
        assert_eq!(value["sender"], "p-1");
    }

    #[test]
    fn media_status_flattens_into_event() {
        let event = ServerEvent::UpdateMediaStatus {
            user_id: "p-3".to_string(),
            status: MediaStatus {
                camera_on: true,
                mic_on: false,
                screen_sharing: false,
            },
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "update-media-status");
        assert_eq!(value["userId"], "p-3");
        assert_eq!(value["cameraOn"], true);
        assert_eq!(value["micOn"], false);
    }

    #[test]
    fn terminal_events_have_no_payload() {
        assert_eq!(
            serde_json::to_value(&ServerEvent::ForceCloseRoom).unwrap(),
            json!({"type": "force-close-room"})
        );
        assert_eq!(
            serde_json::to_value(&ServerEvent::Kicked).unwrap(),
            json!({"type": "kicked"})
        );
    }

    #[test]
    fn kebab_case_tags_round_trip() {
        let original = ClientMessage::KickUser {
            target_id: "p-9".to_string(),
        };
        let value = serde_json::to_value(&original).unwrap();
        assert_eq!(value["type"], "kick-user");
        assert_eq!(value["targetId"], "p-9");
        let back: ClientMessage = serde_json::from_value(value).unwrap();
        assert_eq!(back, original);
    }
}
