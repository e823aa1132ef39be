//! Message types for actor communication.
//!
//! All inter-actor communication uses strongly-typed message passing via
//! `tokio::sync::mpsc`. Request-reply patterns use `tokio::sync::oneshot`
//! respond_to channels.

use crate::errors::CoordinatorError;
use crate::schedule::{AccessWindow, Role};

use huddle_protocol::{HandshakeKind, MediaStatus, PeerInfo, ServerEvent};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

/// Messages sent to the `RegistryActor`.
#[derive(Debug)]
pub enum RegistryMessage {
    /// A connection wants to join a session. Creates the session actor on
    /// first join; idempotent per participant id.
    Join {
        session_id: String,
        participant_id: String,
        display_name: String,
        /// Outbound event channel owned by the connection's socket task.
        outbound: mpsc::Sender<ServerEvent>,
        respond_to: oneshot::Sender<Result<JoinResult, CoordinatorError>>,
    },

    /// A participant left (explicit leave or connection close).
    Leave { participant_id: String },

    /// Relay a handshake message to a member of the sender's session.
    /// Best effort: a missing sender or target is a silent drop.
    Relay {
        kind: HandshakeKind,
        sender: String,
        target: String,
        payload: serde_json::Value,
    },

    /// Rebroadcast a presence update to the sender's session.
    MediaStatus {
        sender: String,
        status: MediaStatus,
    },

    /// Moderator request to evict a participant from the requester's
    /// session. Evicting an absent target is a no-op.
    Evict {
        requester: String,
        target: String,
        respond_to: oneshot::Sender<Result<(), CoordinatorError>>,
    },

    /// Current members of a session (empty if the session is absent).
    Members {
        session_id: String,
        respond_to: oneshot::Sender<Vec<PeerInfo>>,
    },

    /// Handles to every live session, for the lifecycle monitor sweep.
    ListSessions {
        respond_to: oneshot::Sender<Vec<super::session::SessionActorHandle>>,
    },

    /// Stop admitting new joins. Existing sessions continue until they
    /// empty out or the registry is cancelled.
    Drain {
        respond_to: oneshot::Sender<()>,
    },

    /// Registry status for health reporting.
    GetStatus {
        respond_to: oneshot::Sender<RegistryStatus>,
    },
}

/// Messages sent to a `SessionActor`.
#[derive(Debug)]
pub enum SessionMessage {
    /// Admit (or re-admit) a participant. Re-joining the same id only
    /// updates the display name.
    Join {
        participant_id: String,
        display_name: String,
        role: Role,
        outbound: mpsc::Sender<ServerEvent>,
        respond_to: oneshot::Sender<Result<JoinResult, CoordinatorError>>,
    },

    /// Remove a participant and announce the departure.
    Leave { participant_id: String },

    /// Deliver a handshake message to one member, sender attached.
    Relay {
        kind: HandshakeKind,
        sender: String,
        target: String,
        payload: serde_json::Value,
    },

    /// Rebroadcast a presence update to all other members.
    MediaStatus {
        sender: String,
        status: MediaStatus,
    },

    /// Evict a participant; requester must hold the moderator role.
    Evict {
        requester: String,
        target: String,
        respond_to: oneshot::Sender<Result<(), CoordinatorError>>,
    },

    /// Current roster.
    Members {
        respond_to: oneshot::Sender<Vec<PeerInfo>>,
    },

    /// Point-in-time view for the lifecycle monitor.
    Snapshot {
        respond_to: oneshot::Sender<SessionSnapshot>,
    },

    /// Unconditional termination: terminal notice to every member, then
    /// disconnect all and shut the actor down.
    ForceClose {
        respond_to: oneshot::Sender<()>,
    },
}

/// Messages sent to a `ConnectionActor`.
#[derive(Debug)]
pub enum ConnectionMessage {
    /// Forward an event to the client, preserving mailbox order.
    Deliver { event: ServerEvent },

    /// Deliver an optional final notice, then close the connection.
    Close {
        notice: Option<ServerEvent>,
        reason: String,
    },
}

// ----------------------------------------------------------------------------
// Supporting types
// ----------------------------------------------------------------------------

/// Result of a successful join.
#[derive(Debug)]
pub struct JoinResult {
    /// The participant id admitted (echoed back).
    pub participant_id: String,
    /// Occupants already present, excluding the joiner.
    pub roster: Vec<PeerInfo>,
    /// Role granted by the authorization input.
    pub role: Role,
}

/// Registry status for health reporting.
#[derive(Debug, Clone)]
pub struct RegistryStatus {
    /// Live sessions.
    pub session_count: usize,
    /// Resident participants across all sessions.
    pub participant_count: usize,
    /// Whether the registry is refusing new joins.
    pub is_draining: bool,
}

/// Point-in-time view of one session, taken at sweep time.
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    pub session_id: String,
    pub participant_count: usize,
    /// Time since the last join/relay/status traffic.
    pub idle: Duration,
    /// Authorized window, absent for ad-hoc sessions.
    pub window: Option<AccessWindow>,
    /// Whether any current member holds the moderator role.
    pub has_moderator: bool,
}
