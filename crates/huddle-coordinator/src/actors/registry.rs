//! `RegistryActor` - singleton owner of the session population.
//!
//! Every client-facing operation enters the coordinator through this
//! actor's handle. The registry authorizes joins against the schedule,
//! creates session actors on demand, routes traffic to the owning
//! session, and enforces the one-session-per-participant rule through
//! its participant index.
//!
//! # Lifecycle
//!
//! 1. Spawned once at startup
//! 2. Supervises one `SessionActor` per live session
//! 3. On cancellation, shuts every session down with a bounded wait

use crate::errors::CoordinatorError;
use crate::schedule::{ScheduleError, ScheduleProvider};

use super::messages::{JoinResult, RegistryMessage, RegistryStatus};
use super::metrics::{ActorMetrics, ActorType, MailboxMonitor};
use super::session::{SessionActor, SessionActorHandle};

use chrono::Utc;
use huddle_protocol::{HandshakeKind, MediaStatus, PeerInfo, ServerEvent};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Channel buffer size for the registry mailbox.
const REGISTRY_CHANNEL_BUFFER: usize = 500;

/// How often the registry reaps session actors whose tasks finished.
const SESSION_HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(10);

/// Bounded wait for each session during shutdown.
const SESSION_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Handle to the `RegistryActor`.
#[derive(Clone, Debug)]
pub struct RegistryActorHandle {
    sender: mpsc::Sender<RegistryMessage>,
    cancel_token: CancellationToken,
}

impl RegistryActorHandle {
    /// Join a session, creating it if it does not exist yet.
    pub async fn join(
        &self,
        session_id: String,
        participant_id: String,
        display_name: String,
        outbound: mpsc::Sender<ServerEvent>,
    ) -> Result<JoinResult, CoordinatorError> {
        let (respond_to, response) = oneshot::channel();
        self.sender
            .send(RegistryMessage::Join {
                session_id,
                participant_id,
                display_name,
                outbound,
                respond_to,
            })
            .await
            .map_err(|e| CoordinatorError::Internal(format!("channel send failed: {e}")))?;
        response
            .await
            .map_err(|e| CoordinatorError::Internal(format!("channel recv failed: {e}")))?
    }

    /// Remove a participant from whichever session they are resident in.
    pub async fn leave(&self, participant_id: String) -> Result<(), CoordinatorError> {
        self.sender
            .send(RegistryMessage::Leave { participant_id })
            .await
            .map_err(|e| CoordinatorError::Internal(format!("channel send failed: {e}")))
    }

    /// Relay a handshake message within the sender's session. Best effort.
    pub async fn relay(
        &self,
        kind: HandshakeKind,
        sender: String,
        target: String,
        payload: serde_json::Value,
    ) -> Result<(), CoordinatorError> {
        self.sender
            .send(RegistryMessage::Relay {
                kind,
                sender,
                target,
                payload,
            })
            .await
            .map_err(|e| CoordinatorError::Internal(format!("channel send failed: {e}")))
    }

    /// Rebroadcast a presence update within the sender's session.
    pub async fn media_status(
        &self,
        sender: String,
        status: MediaStatus,
    ) -> Result<(), CoordinatorError> {
        self.sender
            .send(RegistryMessage::MediaStatus { sender, status })
            .await
            .map_err(|e| CoordinatorError::Internal(format!("channel send failed: {e}")))
    }

    /// Evict a participant from the requester's session.
    pub async fn evict(&self, requester: String, target: String) -> Result<(), CoordinatorError> {
        let (respond_to, response) = oneshot::channel();
        self.sender
            .send(RegistryMessage::Evict {
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

    /// Current members of a session. Absent sessions report empty.
    pub async fn members(&self, session_id: String) -> Result<Vec<PeerInfo>, CoordinatorError> {
        let (respond_to, response) = oneshot::channel();
        self.sender
            .send(RegistryMessage::Members {
                session_id,
                respond_to,
            })
            .await
            .map_err(|e| CoordinatorError::Internal(format!("channel send failed: {e}")))?;
        response
            .await
            .map_err(|e| CoordinatorError::Internal(format!("channel recv failed: {e}")))
    }

    /// Handles to every live session, for the lifecycle monitor.
    pub async fn list_sessions(&self) -> Result<Vec<SessionActorHandle>, CoordinatorError> {
        let (respond_to, response) = oneshot::channel();
        self.sender
            .send(RegistryMessage::ListSessions { respond_to })
            .await
            .map_err(|e| CoordinatorError::Internal(format!("channel send failed: {e}")))?;
        response
            .await
            .map_err(|e| CoordinatorError::Internal(format!("channel recv failed: {e}")))
    }

    /// Stop admitting new joins.
    pub async fn drain(&self) -> Result<(), CoordinatorError> {
        let (respond_to, response) = oneshot::channel();
        self.sender
            .send(RegistryMessage::Drain { respond_to })
            .await
            .map_err(|e| CoordinatorError::Internal(format!("channel send failed: {e}")))?;
        response
            .await
            .map_err(|e| CoordinatorError::Internal(format!("channel recv failed: {e}")))
    }

    /// Registry status for health reporting.
    pub async fn status(&self) -> Result<RegistryStatus, CoordinatorError> {
        let (respond_to, response) = oneshot::channel();
        self.sender
            .send(RegistryMessage::GetStatus { respond_to })
            .await
            .map_err(|e| CoordinatorError::Internal(format!("channel send failed: {e}")))?;
        response
            .await
            .map_err(|e| CoordinatorError::Internal(format!("channel recv failed: {e}")))
    }

    /// Cancel the registry and every session under it.
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    /// Check if the registry is cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }
}

/// A session actor under registry supervision.
struct ManagedSession {
    handle: SessionActorHandle,
    task_handle: JoinHandle<()>,
}

/// The `RegistryActor` implementation.
pub struct RegistryActor {
    /// Message receiver.
    receiver: mpsc::Receiver<RegistryMessage>,
    /// Root cancellation token; sessions get child tokens.
    cancel_token: CancellationToken,
    /// Live sessions, keyed by session id.
    sessions: HashMap<String, ManagedSession>,
    /// Which session each resident participant is in. A participant is
    /// resident in at most one session at a time.
    participant_index: HashMap<String, String>,
    /// Join-time authorization source.
    schedule: Arc<dyn ScheduleProvider>,
    /// Tolerance applied to both edges of an authorized window.
    window_grace: Duration,
    /// False once draining; new joins are refused.
    accepting_new: bool,
    /// Shared metrics.
    metrics: Arc<ActorMetrics>,
    /// Mailbox monitor.
    mailbox: MailboxMonitor,
}

impl RegistryActor {
    /// Spawn the registry actor.
    ///
    /// Returns a handle and the task join handle.
    pub fn spawn(
        schedule: Arc<dyn ScheduleProvider>,
        window_grace: Duration,
        cancel_token: CancellationToken,
        metrics: Arc<ActorMetrics>,
    ) -> (RegistryActorHandle, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(REGISTRY_CHANNEL_BUFFER);

        let actor = Self {
            receiver,
            cancel_token: cancel_token.clone(),
            sessions: HashMap::new(),
            participant_index: HashMap::new(),
            schedule,
            window_grace,
            accepting_new: true,
            metrics,
            mailbox: MailboxMonitor::new(ActorType::Registry, "registry"),
        };

        let task_handle = tokio::spawn(actor.run());

        let handle = RegistryActorHandle {
            sender,
            cancel_token,
        };

        (handle, task_handle)
    }

    /// Run the actor message loop.
    #[instrument(skip_all, name = "huddle.actor.registry")]
    async fn run(mut self) {
        info!(target: "huddle.actor.registry", "RegistryActor started");

        let mut health_check = tokio::time::interval(SESSION_HEALTH_CHECK_INTERVAL);
        health_check.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    info!(
                        target: "huddle.actor.registry",
                        "RegistryActor received cancellation signal"
                    );
                    break;
                }

                _ = health_check.tick() => {
                    self.check_session_health();
                }

                msg = self.receiver.recv() => {
                    match msg {
                        Some(message) => {
                            self.mailbox.record_enqueue();
                            self.handle_message(message).await;
                            self.mailbox.record_dequeue();
                        }
                        None => {
                            debug!(
                                target: "huddle.actor.registry",
                                "RegistryActor channel closed, exiting"
                            );
                            break;
                        }
                    }
                }
            }
        }

        self.shutdown_sessions().await;

        info!(
            target: "huddle.actor.registry",
            messages_processed = self.mailbox.messages_processed(),
            "RegistryActor stopped"
        );
    }

    async fn handle_message(&mut self, message: RegistryMessage) {
        match message {
            RegistryMessage::Join {
                session_id,
                participant_id,
                display_name,
                outbound,
                respond_to,
            } => {
                let result = self
                    .handle_join(session_id, participant_id, display_name, outbound)
                    .await;
                let _ = respond_to.send(result);
            }

            RegistryMessage::Leave { participant_id } => {
                self.handle_leave(&participant_id).await;
            }

            RegistryMessage::Relay {
                kind,
                sender,
                target,
                payload,
            } => {
                let Some(session) = self.session_of(&sender) else {
                    self.metrics.relay_dropped();
                    return;
                };
                let _ = session.relay(kind, sender, target, payload).await;
            }

            RegistryMessage::MediaStatus { sender, status } => {
                let Some(session) = self.session_of(&sender) else {
                    return;
                };
                let _ = session.media_status(sender, status).await;
            }

            RegistryMessage::Evict {
                requester,
                target,
                respond_to,
            } => {
                let result = self.handle_evict(requester, target).await;
                let _ = respond_to.send(result);
            }

            RegistryMessage::Members {
                session_id,
                respond_to,
            } => {
                let members = match self.sessions.get(&session_id) {
                    Some(managed) => managed.handle.members().await.unwrap_or_default(),
                    None => Vec::new(),
                };
                let _ = respond_to.send(members);
            }

            RegistryMessage::ListSessions { respond_to } => {
                self.check_session_health();
                let handles = self
                    .sessions
                    .values()
                    .map(|managed| managed.handle.clone())
                    .collect();
                let _ = respond_to.send(handles);
            }

            RegistryMessage::Drain { respond_to } => {
                info!(
                    target: "huddle.actor.registry",
                    session_count = self.sessions.len(),
                    "Registry draining, refusing new joins"
                );
                self.accepting_new = false;
                let _ = respond_to.send(());
            }

            RegistryMessage::GetStatus { respond_to } => {
                let _ = respond_to.send(RegistryStatus {
                    session_count: self.sessions.len(),
                    participant_count: self.participant_index.len(),
                    is_draining: !self.accepting_new,
                });
            }
        }
    }

    async fn handle_join(
        &mut self,
        session_id: String,
        participant_id: String,
        display_name: String,
        outbound: mpsc::Sender<ServerEvent>,
    ) -> Result<JoinResult, CoordinatorError> {
        if !self.accepting_new {
            return Err(CoordinatorError::Draining);
        }

        // Authorization is fail-closed: a schedule outage refuses the
        // join rather than waving it through.
        let authorization = self
            .schedule
            .authorize(&session_id, &display_name)
            .await
            .map_err(|e| match e {
                ScheduleError::Denied(reason) => CoordinatorError::JoinDenied(reason),
                ScheduleError::Unavailable(reason) => CoordinatorError::Schedule(reason),
            })?;

        if let Some(window) = authorization.window {
            if !window.contains_with_grace(Utc::now(), self.window_grace) {
                return Err(CoordinatorError::JoinDenied(
                    "outside the session's authorized window".to_string(),
                ));
            }
        }

        // A participant is resident in at most one session. A join while
        // resident elsewhere implicitly leaves the old session first.
        if let Some(previous) = self.participant_index.get(&participant_id) {
            if previous != &session_id {
                let previous = previous.clone();
                debug!(
                    target: "huddle.actor.registry",
                    participant_id = %participant_id,
                    from = %previous,
                    to = %session_id,
                    "Participant moving between sessions"
                );
                if let Some(managed) = self.sessions.get(&previous) {
                    let _ = managed.handle.leave(participant_id.clone()).await;
                }
                self.participant_index.remove(&participant_id);
            }
        }

        let session = self.session_entry(&session_id, authorization.window);
        let result = session
            .join(
                participant_id.clone(),
                display_name.clone(),
                authorization.role,
                outbound.clone(),
            )
            .await;

        // The actor can empty out and exit between lookup and join; a
        // dead mailbox gets one retry against a fresh actor.
        let result = match result {
            Err(CoordinatorError::Internal(_)) => {
                self.remove_session(&session_id);
                let session = self.session_entry(&session_id, authorization.window);
                session
                    .join(
                        participant_id.clone(),
                        display_name,
                        authorization.role,
                        outbound,
                    )
                    .await
            }
            other => other,
        }?;

        self.participant_index.insert(participant_id, session_id);
        Ok(result)
    }

    async fn handle_leave(&mut self, participant_id: &str) {
        let Some(session_id) = self.participant_index.remove(participant_id) else {
            return;
        };
        if let Some(managed) = self.sessions.get(&session_id) {
            let _ = managed.handle.leave(participant_id.to_string()).await;
        }
    }

    async fn handle_evict(
        &mut self,
        requester: String,
        target: String,
    ) -> Result<(), CoordinatorError> {
        let Some(session) = self.session_of(&requester) else {
            return Err(CoordinatorError::NotResident);
        };
        let session_id = session.session_id().to_string();

        session.evict(requester, target.clone()).await?;

        // Only drop the index entry if it still points at this session;
        // evicting an absent target is a successful no-op.
        if self.participant_index.get(&target) == Some(&session_id) {
            self.participant_index.remove(&target);
        }
        Ok(())
    }

    /// Get or create the session actor for an id.
    fn session_entry(
        &mut self,
        session_id: &str,
        window: Option<crate::schedule::AccessWindow>,
    ) -> SessionActorHandle {
        // A finished actor (session emptied out between health checks)
        // must not swallow the join.
        if self
            .sessions
            .get(session_id)
            .is_some_and(|managed| managed.task_handle.is_finished())
        {
            self.remove_session(session_id);
        }

        if let Some(managed) = self.sessions.get(session_id) {
            return managed.handle.clone();
        }

        info!(
            target: "huddle.actor.registry",
            session_id = %session_id,
            windowed = window.is_some(),
            "Creating session"
        );

        let (handle, task_handle) = SessionActor::spawn(
            session_id.to_string(),
            window,
            self.cancel_token.child_token(),
            Arc::clone(&self.metrics),
        );
        self.sessions.insert(
            session_id.to_string(),
            ManagedSession {
                handle: handle.clone(),
                task_handle,
            },
        );
        handle
    }

    /// Session handle for a resident participant, if any.
    fn session_of(&self, participant_id: &str) -> Option<SessionActorHandle> {
        let session_id = self.participant_index.get(participant_id)?;
        self.sessions
            .get(session_id)
            .map(|managed| managed.handle.clone())
    }

    /// Reap sessions whose actor tasks have finished.
    fn check_session_health(&mut self) {
        let finished: Vec<String> = self
            .sessions
            .iter()
            .filter(|(_, managed)| managed.task_handle.is_finished())
            .map(|(id, _)| id.clone())
            .collect();

        for session_id in finished {
            debug!(
                target: "huddle.actor.registry",
                session_id = %session_id,
                "Reaping finished session"
            );
            self.remove_session(&session_id);
        }
    }

    /// Drop a session and every index entry pointing at it.
    fn remove_session(&mut self, session_id: &str) {
        self.sessions.remove(session_id);
        self.participant_index
            .retain(|_, resident_in| resident_in != session_id);
    }

    /// Shut down every session with a bounded wait per actor.
    async fn shutdown_sessions(&mut self) {
        let count = self.sessions.len();
        if count > 0 {
            info!(
                target: "huddle.actor.registry",
                session_count = count,
                "Shutting down sessions"
            );
        }

        for (session_id, managed) in self.sessions.drain() {
            managed.handle.cancel();
            if tokio::time::timeout(SESSION_SHUTDOWN_TIMEOUT, managed.task_handle)
                .await
                .is_err()
            {
                warn!(
                    target: "huddle.actor.registry",
                    session_id = %session_id,
                    "Session did not stop within the shutdown timeout"
                );
            }
        }
        self.participant_index.clear();
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::schedule::{SessionSchedule, StaticSchedule};
    use chrono::Duration as ChronoDuration;

    fn spawn_registry(schedule: StaticSchedule) -> (RegistryActorHandle, JoinHandle<()>) {
        RegistryActor::spawn(
            Arc::new(schedule),
            Duration::from_secs(30),
            CancellationToken::new(),
            ActorMetrics::new(),
        )
    }

    async fn join(
        registry: &RegistryActorHandle,
        session: &str,
        id: &str,
        name: &str,
    ) -> (
        Result<JoinResult, CoordinatorError>,
        mpsc::Receiver<ServerEvent>,
    ) {
        let (out_tx, out_rx) = mpsc::channel(32);
        let result = registry
            .join(
                session.to_string(),
                id.to_string(),
                name.to_string(),
                out_tx,
            )
            .await;
        (result, out_rx)
    }

    #[tokio::test]
    async fn test_join_creates_session_implicitly() {
        let (registry, _task) = spawn_registry(StaticSchedule::open());

        let (result, _rx) = join(&registry, "standup", "a", "Ana").await;
        assert!(result.unwrap().roster.is_empty());

        let status = registry.status().await.unwrap();
        assert_eq!(status.session_count, 1);
        assert_eq!(status.participant_count, 1);

        registry.cancel();
    }

    #[tokio::test]
    async fn test_participant_is_resident_in_one_session_at_a_time() {
        let (registry, _task) = spawn_registry(StaticSchedule::open());

        let (_, _rx1) = join(&registry, "standup", "a", "Ana").await;
        let (result, _rx2) = join(&registry, "retro", "a", "Ana").await;
        assert!(result.is_ok());

        assert!(registry.members("standup".to_string()).await.unwrap().is_empty());
        assert_eq!(registry.members("retro".to_string()).await.unwrap().len(), 1);

        registry.cancel();
    }

    #[tokio::test]
    async fn test_join_outside_window_is_denied() {
        let schedule = StaticSchedule::default();
        let window = crate::schedule::AccessWindow {
            start: Utc::now() - ChronoDuration::hours(3),
            end: Utc::now() - ChronoDuration::hours(2),
        };
        schedule
            .set(
                "standup",
                SessionSchedule {
                    window: Some(window),
                    ..SessionSchedule::default()
                },
            )
            .await;
        let (registry, _task) = spawn_registry(schedule);

        let (result, _rx) = join(&registry, "standup", "a", "Ana").await;
        assert!(matches!(result, Err(CoordinatorError::JoinDenied(_))));

        // No session state was created for the refused join.
        let status = registry.status().await.unwrap();
        assert_eq!(status.session_count, 0);
        assert_eq!(status.participant_count, 0);

        registry.cancel();
    }

    #[tokio::test]
    async fn test_schedule_outage_denies_join_fail_closed() {
        struct UnreachableSchedule;

        #[async_trait::async_trait]
        impl ScheduleProvider for UnreachableSchedule {
            async fn authorize(
                &self,
                _session_id: &str,
                _user_name: &str,
            ) -> Result<crate::schedule::Authorization, ScheduleError> {
                Err(ScheduleError::Unavailable("lookup timed out".to_string()))
            }
        }

        let (registry, _task) = RegistryActor::spawn(
            Arc::new(UnreachableSchedule),
            Duration::from_secs(30),
            CancellationToken::new(),
            ActorMetrics::new(),
        );

        let (out_tx, _out_rx) = mpsc::channel(32);
        let result = registry
            .join(
                "standup".to_string(),
                "a".to_string(),
                "Ana".to_string(),
                out_tx,
            )
            .await;
        assert!(matches!(result, Err(CoordinatorError::Schedule(_))));

        // No session state was created for the refused join.
        let status = registry.status().await.unwrap();
        assert_eq!(status.session_count, 0);
        assert_eq!(status.participant_count, 0);

        registry.cancel();
    }

    #[tokio::test]
    async fn test_draining_refuses_new_joins() {
        let (registry, _task) = spawn_registry(StaticSchedule::open());

        let (_, _rx1) = join(&registry, "standup", "a", "Ana").await;
        registry.drain().await.unwrap();

        let (result, _rx2) = join(&registry, "standup", "b", "Ben").await;
        assert!(matches!(result, Err(CoordinatorError::Draining)));

        // The existing resident keeps working.
        assert_eq!(registry.members("standup".to_string()).await.unwrap().len(), 1);

        registry.cancel();
    }

    #[tokio::test]
    async fn test_relay_between_sessions_is_dropped() {
        let (registry, _task) = spawn_registry(StaticSchedule::open());

        let (_, _rx_a) = join(&registry, "standup", "a", "Ana").await;
        let (_, mut rx_b) = join(&registry, "retro", "b", "Ben").await;

        registry
            .relay(
                HandshakeKind::Offer,
                "a".to_string(),
                "b".to_string(),
                serde_json::json!({"sdp": "v=0"}),
            )
            .await
            .unwrap();

        // b never sees traffic from another session.
        registry.leave("b".to_string()).await.unwrap();
        assert!(rx_b.recv().await.is_none());

        registry.cancel();
    }

    #[tokio::test]
    async fn test_evict_by_non_resident_is_refused() {
        let (registry, _task) = spawn_registry(StaticSchedule::open());

        let (_, _rx) = join(&registry, "standup", "a", "Ana").await;
        let result = registry.evict("ghost".to_string(), "a".to_string()).await;
        assert!(matches!(result, Err(CoordinatorError::NotResident)));

        registry.cancel();
    }

    #[tokio::test]
    async fn test_members_of_absent_session_is_empty() {
        let (registry, _task) = spawn_registry(StaticSchedule::open());

        assert!(registry.members("nope".to_string()).await.unwrap().is_empty());

        registry.cancel();
    }

    #[tokio::test]
    async fn test_leave_clears_residency() {
        let (registry, _task) = spawn_registry(StaticSchedule::open());

        let (_, _rx) = join(&registry, "standup", "a", "Ana").await;
        registry.leave("a".to_string()).await.unwrap();

        let status = registry.status().await.unwrap();
        assert_eq!(status.participant_count, 0);

        registry.cancel();
    }
}
