//! `SessionActor` - single-writer owner of one session's state.
//!
//! All membership, presence, and relay state for one session lives inside
//! this actor. Because every mutation arrives through one mailbox, roster
//! updates and relayed handshake traffic are serialized without locks,
//! and any two events bound for the same participant leave in the order
//! the session processed them.
//!
//! # Lifecycle
//!
//! 1. Spawned by the `RegistryActor` on the first join naming the session
//! 2. Runs until its membership empties, it is force-closed, or the
//!    registry cancels it
//! 3. Owns one `ConnectionActor` per resident participant

use crate::errors::CoordinatorError;
use crate::schedule::{AccessWindow, Role};

use super::connection::{ConnectionActor, ConnectionActorHandle};
use super::messages::{JoinResult, SessionMessage, SessionSnapshot};
use super::metrics::{ActorMetrics, ActorType, MailboxMonitor};

use huddle_protocol::{HandshakeKind, MediaStatus, PeerInfo, ServerEvent};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Channel buffer size for the session mailbox.
const SESSION_CHANNEL_BUFFER: usize = 100;

/// How often the session reaps connection actors whose tasks finished.
const CONNECTION_HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(10);

/// Handle to a `SessionActor`.
#[derive(Clone, Debug)]
pub struct SessionActorHandle {
    sender: mpsc::Sender<SessionMessage>,
    cancel_token: CancellationToken,
    session_id: String,
}

impl SessionActorHandle {
    /// Get the session ID this actor owns.
    #[must_use]
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Admit (or re-admit) a participant.
    pub async fn join(
        &self,
        participant_id: String,
        display_name: String,
        role: Role,
        outbound: mpsc::Sender<ServerEvent>,
    ) -> Result<JoinResult, CoordinatorError> {
        let (respond_to, response) = oneshot::channel();
        self.sender
            .send(SessionMessage::Join {
                participant_id,
                display_name,
                role,
                outbound,
                respond_to,
            })
            .await
            .map_err(|e| CoordinatorError::Internal(format!("channel send failed: {e}")))?;
        response
            .await
            .map_err(|e| CoordinatorError::Internal(format!("channel recv failed: {e}")))?
    }

    /// Remove a participant and announce the departure.
    pub async fn leave(&self, participant_id: String) -> Result<(), CoordinatorError> {
        self.sender
            .send(SessionMessage::Leave { participant_id })
            .await
            .map_err(|e| CoordinatorError::Internal(format!("channel send failed: {e}")))
    }

    /// Relay a handshake message to one member. Best effort.
    pub async fn relay(
        &self,
        kind: HandshakeKind,
        sender: String,
        target: String,
        payload: serde_json::Value,
    ) -> Result<(), CoordinatorError> {
        self.sender
            .send(SessionMessage::Relay {
                kind,
                sender,
                target,
                payload,
            })
            .await
            .map_err(|e| CoordinatorError::Internal(format!("channel send failed: {e}")))
    }

    /// Rebroadcast a presence update to every other member.
    pub async fn media_status(
        &self,
        sender: String,
        status: MediaStatus,
    ) -> Result<(), CoordinatorError> {
        self.sender
            .send(SessionMessage::MediaStatus { sender, status })
            .await
            .map_err(|e| CoordinatorError::Internal(format!("channel send failed: {e}")))
    }

    /// Evict a participant on behalf of a moderator.
    pub async fn evict(&self, requester: String, target: String) -> Result<(), CoordinatorError> {
        let (respond_to, response) = oneshot::channel();
        self.sender
            .send(SessionMessage::Evict {
                requester,
                target,
                respond_to,
            })
            .await
            .map_err(|e| CoordinatorError::Internal(format!("channel send failed: {e}")))?;
        response
            .await
            .map_err(|e| CoordinatorError::Internal(format!("channel recv failed: {e}")))?
    }

    /// Get the current roster.
    pub async fn members(&self) -> Result<Vec<PeerInfo>, CoordinatorError> {
        let (respond_to, response) = oneshot::channel();
        self.sender
            .send(SessionMessage::Members { respond_to })
            .await
            .map_err(|e| CoordinatorError::Internal(format!("channel send failed: {e}")))?;
        response
            .await
            .map_err(|e| CoordinatorError::Internal(format!("channel recv failed: {e}")))
    }

    /// Take a point-in-time snapshot for the lifecycle monitor.
    pub async fn snapshot(&self) -> Result<SessionSnapshot, CoordinatorError> {
        let (respond_to, response) = oneshot::channel();
        self.sender
            .send(SessionMessage::Snapshot { respond_to })
            .await
            .map_err(|e| CoordinatorError::Internal(format!("channel send failed: {e}")))?;
        response
            .await
            .map_err(|e| CoordinatorError::Internal(format!("channel recv failed: {e}")))
    }

    /// Terminate the session: every member gets exactly one terminal
    /// notice before their connection closes. Resolves once the last
    /// notice is queued.
    pub async fn force_close(&self) -> Result<(), CoordinatorError> {
        let (respond_to, response) = oneshot::channel();
        self.sender
            .send(SessionMessage::ForceClose { respond_to })
            .await
            .map_err(|e| CoordinatorError::Internal(format!("channel send failed: {e}")))?;
        response
            .await
            .map_err(|e| CoordinatorError::Internal(format!("channel recv failed: {e}")))
    }

    /// Cancel the session actor and its connections.
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    /// Check if the actor is cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }
}

/// One resident participant's server-side state.
struct Participant {
    display_name: String,
    role: Role,
    connection: ConnectionActorHandle,
    task_handle: JoinHandle<()>,
}

/// The `SessionActor` implementation.
pub struct SessionActor {
    /// Session this actor owns.
    session_id: String,
    /// Message receiver.
    receiver: mpsc::Receiver<SessionMessage>,
    /// Cancellation token (child of the registry's token).
    cancel_token: CancellationToken,
    /// Resident participants, keyed by participant id.
    participants: HashMap<String, Participant>,
    /// Authorized window, absent for ad-hoc sessions.
    window: Option<AccessWindow>,
    /// Last join/relay/status traffic, for the idle sweep.
    last_activity: Instant,
    /// Whether anyone has ever joined. An actor that has emptied out
    /// exits; one that is still waiting for its first join does not.
    has_admitted: bool,
    /// Shared metrics.
    metrics: Arc<ActorMetrics>,
    /// Mailbox monitor.
    mailbox: MailboxMonitor,
}

impl SessionActor {
    /// Spawn a new session actor.
    ///
    /// Returns a handle and the task join handle.
    pub fn spawn(
        session_id: String,
        window: Option<AccessWindow>,
        cancel_token: CancellationToken,
        metrics: Arc<ActorMetrics>,
    ) -> (SessionActorHandle, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(SESSION_CHANNEL_BUFFER);

        let actor = Self {
            session_id: session_id.clone(),
            receiver,
            cancel_token: cancel_token.clone(),
            participants: HashMap::new(),
            window,
            last_activity: Instant::now(),
            has_admitted: false,
            metrics,
            mailbox: MailboxMonitor::new(ActorType::Session, &session_id),
        };

        actor.metrics.session_created();
        let task_handle = tokio::spawn(actor.run());

        let handle = SessionActorHandle {
            sender,
            cancel_token,
            session_id,
        };

        (handle, task_handle)
    }

    /// Run the actor message loop.
    #[instrument(
        skip_all,
        name = "huddle.actor.session",
        fields(session_id = %self.session_id)
    )]
    async fn run(mut self) {
        info!(
            target: "huddle.actor.session",
            session_id = %self.session_id,
            "SessionActor started"
        );

        let mut health_check = tokio::time::interval(CONNECTION_HEALTH_CHECK_INTERVAL);
        health_check.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    debug!(
                        target: "huddle.actor.session",
                        session_id = %self.session_id,
                        "SessionActor received cancellation signal"
                    );
                    break;
                }

                _ = health_check.tick() => {
                    self.check_connection_health().await;
                    if self.is_drained() {
                        break;
                    }
                }

                msg = self.receiver.recv() => {
                    match msg {
                        Some(message) => {
                            self.mailbox.record_enqueue();
                            let should_exit = self.handle_message(message).await;
                            self.mailbox.record_dequeue();

                            if should_exit || self.is_drained() {
                                break;
                            }
                        }
                        None => {
                            debug!(
                                target: "huddle.actor.session",
                                session_id = %self.session_id,
                                "SessionActor channel closed, exiting"
                            );
                            break;
                        }
                    }
                }
            }
        }

        self.shutdown_connections().await;
        self.metrics.session_closed();

        info!(
            target: "huddle.actor.session",
            session_id = %self.session_id,
            messages_processed = self.mailbox.messages_processed(),
            "SessionActor stopped"
        );
    }

    /// True once the session has emptied out after serving someone.
    fn is_drained(&self) -> bool {
        self.has_admitted && self.participants.is_empty()
    }

    /// Handle a single message. Returns true if the actor should exit.
    async fn handle_message(&mut self, message: SessionMessage) -> bool {
        match message {
            SessionMessage::Join {
                participant_id,
                display_name,
                role,
                outbound,
                respond_to,
            } => {
                let result = self
                    .handle_join(participant_id, display_name, role, outbound)
                    .await;
                let _ = respond_to.send(result);
                false
            }

            SessionMessage::Leave { participant_id } => {
                self.handle_leave(&participant_id, "left").await;
                false
            }

            SessionMessage::Relay {
                kind,
                sender,
                target,
                payload,
            } => {
                self.handle_relay(kind, sender, target, payload).await;
                false
            }

            SessionMessage::MediaStatus { sender, status } => {
                self.handle_media_status(&sender, status).await;
                false
            }

            SessionMessage::Evict {
                requester,
                target,
                respond_to,
            } => {
                let result = self.handle_evict(&requester, &target).await;
                let _ = respond_to.send(result);
                false
            }

            SessionMessage::Members { respond_to } => {
                let _ = respond_to.send(self.roster_excluding(None));
                false
            }

            SessionMessage::Snapshot { respond_to } => {
                let _ = respond_to.send(SessionSnapshot {
                    session_id: self.session_id.clone(),
                    participant_count: self.participants.len(),
                    idle: self.last_activity.elapsed(),
                    window: self.window,
                    has_moderator: self
                        .participants
                        .values()
                        .any(|p| p.role == Role::Moderator),
                });
                false
            }

            SessionMessage::ForceClose { respond_to } => {
                self.handle_force_close().await;
                let _ = respond_to.send(());
                true
            }
        }
    }

    async fn handle_join(
        &mut self,
        participant_id: String,
        display_name: String,
        role: Role,
        outbound: mpsc::Sender<ServerEvent>,
    ) -> Result<JoinResult, CoordinatorError> {
        self.last_activity = Instant::now();

        // Re-joining under the same id is not an error and does not
        // duplicate the participant.
        if let Some(existing) = self.participants.get_mut(&participant_id) {
            debug!(
                target: "huddle.actor.session",
                session_id = %self.session_id,
                participant_id = %participant_id,
                "Repeat join, updating display name"
            );
            existing.display_name = display_name;
            let role = existing.role;
            return Ok(JoinResult {
                roster: self.roster_excluding(Some(&participant_id)),
                participant_id,
                role,
            });
        }

        let (connection, task_handle) = ConnectionActor::spawn(
            participant_id.clone(),
            self.session_id.clone(),
            outbound,
            self.cancel_token.child_token(),
            Arc::clone(&self.metrics),
        );

        let roster = self.roster_excluding(None);

        self.participants.insert(
            participant_id.clone(),
            Participant {
                display_name: display_name.clone(),
                role,
                connection,
                task_handle,
            },
        );
        self.has_admitted = true;

        info!(
            target: "huddle.actor.session",
            session_id = %self.session_id,
            participant_id = %participant_id,
            display_name = %display_name,
            participant_count = self.participants.len(),
            "Participant joined"
        );

        // Announce the arrival to everyone already present.
        let announcement = ServerEvent::NewUser {
            user_id: participant_id.clone(),
            user_name: display_name,
            room_id: self.session_id.clone(),
        };
        for (id, participant) in &self.participants {
            if id == &participant_id {
                continue;
            }
            let _ = participant.connection.deliver(announcement.clone()).await;
        }

        Ok(JoinResult {
            participant_id,
            roster,
            role,
        })
    }

    async fn handle_leave(&mut self, participant_id: &str, reason: &str) {
        let Some(participant) = self.participants.remove(participant_id) else {
            return;
        };

        let _ = participant.connection.close(None, reason).await;

        info!(
            target: "huddle.actor.session",
            session_id = %self.session_id,
            participant_id = %participant_id,
            reason = %reason,
            participant_count = self.participants.len(),
            "Participant left"
        );

        self.broadcast(ServerEvent::UserDisconnected {
            user_id: participant_id.to_string(),
        })
        .await;
    }

    async fn handle_relay(
        &mut self,
        kind: HandshakeKind,
        sender: String,
        target: String,
        payload: serde_json::Value,
    ) {
        self.last_activity = Instant::now();

        // Both endpoints must be resident. A stale target is normal
        // during churn, so a miss is a silent drop, not an error.
        if !self.participants.contains_key(&sender) {
            self.metrics.relay_dropped();
            return;
        }
        let Some(participant) = self.participants.get(&target) else {
            debug!(
                target: "huddle.actor.session",
                session_id = %self.session_id,
                kind = kind.as_str(),
                sender = %sender,
                target = %target,
                "Dropping relay to absent target"
            );
            self.metrics.relay_dropped();
            return;
        };

        let event = match kind {
            HandshakeKind::Offer => ServerEvent::Offer {
                sender,
                offer: payload,
            },
            HandshakeKind::Answer => ServerEvent::Answer {
                sender,
                answer: payload,
            },
            HandshakeKind::Candidate => ServerEvent::Candidate {
                sender,
                candidate: payload,
            },
        };

        if participant.connection.deliver(event).await.is_ok() {
            self.metrics.message_relayed();
        } else {
            self.metrics.relay_dropped();
        }
    }

    async fn handle_media_status(&mut self, sender: &str, status: MediaStatus) {
        if !self.participants.contains_key(sender) {
            return;
        }
        self.last_activity = Instant::now();

        let event = ServerEvent::UpdateMediaStatus {
            user_id: sender.to_string(),
            status,
        };

        for (id, participant) in &self.participants {
            if id == sender {
                continue;
            }
            let _ = participant.connection.deliver(event.clone()).await;
        }
    }

    async fn handle_evict(
        &mut self,
        requester: &str,
        target: &str,
    ) -> Result<(), CoordinatorError> {
        let Some(moderator) = self.participants.get(requester) else {
            return Err(CoordinatorError::NotResident);
        };
        if moderator.role != Role::Moderator {
            return Err(CoordinatorError::PermissionDenied(
                "only a moderator may remove participants".to_string(),
            ));
        }

        // The target may have left on their own already. That is the
        // outcome the moderator wanted, so report success.
        let Some(participant) = self.participants.remove(target) else {
            return Ok(());
        };

        info!(
            target: "huddle.actor.session",
            session_id = %self.session_id,
            requester = %requester,
            evicted = %target,
            "Participant evicted"
        );

        let _ = participant
            .connection
            .close(Some(ServerEvent::Kicked), "evicted by moderator")
            .await;
        self.metrics.participant_evicted();

        self.broadcast(ServerEvent::UserDisconnected {
            user_id: target.to_string(),
        })
        .await;

        Ok(())
    }

    async fn handle_force_close(&mut self) {
        info!(
            target: "huddle.actor.session",
            session_id = %self.session_id,
            participant_count = self.participants.len(),
            "Force-closing session"
        );

        for (_, participant) in self.participants.drain() {
            let _ = participant
                .connection
                .close(Some(ServerEvent::ForceCloseRoom), "session force-closed")
                .await;
        }
        self.metrics.session_force_closed();
    }

    /// Reap connection actors whose tasks have finished (the socket
    /// dropped without an explicit leave) and announce their departure.
    async fn check_connection_health(&mut self) {
        let dead: Vec<String> = self
            .participants
            .iter()
            .filter(|(_, p)| p.task_handle.is_finished())
            .map(|(id, _)| id.clone())
            .collect();

        for participant_id in dead {
            warn!(
                target: "huddle.actor.session",
                session_id = %self.session_id,
                participant_id = %participant_id,
                "Connection task finished unexpectedly, removing participant"
            );
            self.handle_leave(&participant_id, "connection lost").await;
        }
    }

    /// Deliver one event to every current member.
    async fn broadcast(&self, event: ServerEvent) {
        for participant in self.participants.values() {
            let _ = participant.connection.deliver(event.clone()).await;
        }
    }

    /// Current roster, optionally excluding one participant.
    fn roster_excluding(&self, excluded: Option<&str>) -> Vec<PeerInfo> {
        self.participants
            .iter()
            .filter(|(id, _)| excluded != Some(id.as_str()))
            .map(|(id, p)| PeerInfo {
                user_id: id.clone(),
                user_name: p.display_name.clone(),
            })
            .collect()
    }

    /// Cancel all remaining connection actors on the way out.
    async fn shutdown_connections(&mut self) {
        for (_, participant) in self.participants.drain() {
            participant.connection.cancel();
            let _ = tokio::time::timeout(Duration::from_secs(1), participant.task_handle).await;
        }
    }
}
