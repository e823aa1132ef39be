//! `ConnectionActor` - per-participant outbound event pump.
//!
//! Each `ConnectionActor` owns the coordinator side of exactly one client
//! connection. Events delivered through its mailbox come out on the
//! socket in mailbox order, which is what upholds the per-directed-pair
//! ordering guarantee end to end: a sender's messages to one target all
//! funnel through the target's single connection mailbox.
//!
//! # Lifecycle
//!
//! 1. Spawned by the `SessionActor` when a join is admitted
//! 2. Runs until the participant leaves, is evicted, the session is
//!    force-closed, or the socket task drops the outbound channel
//! 3. Cancellation propagates from the session's child token

use crate::errors::CoordinatorError;

use super::messages::ConnectionMessage;
use super::metrics::{ActorMetrics, ActorType, MailboxMonitor};

use huddle_protocol::ServerEvent;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

/// Channel buffer size for the connection mailbox.
const CONNECTION_CHANNEL_BUFFER: usize = 200;

/// Handle to a `ConnectionActor`.
#[derive(Clone, Debug)]
pub struct ConnectionActorHandle {
    sender: mpsc::Sender<ConnectionMessage>,
    cancel_token: CancellationToken,
    participant_id: String,
}

impl ConnectionActorHandle {
    /// Get the participant ID this connection belongs to.
    #[must_use]
    pub fn participant_id(&self) -> &str {
        &self.participant_id
    }

    /// Deliver an event to the client, preserving order.
    pub async fn deliver(&self, event: ServerEvent) -> Result<(), CoordinatorError> {
        self.sender
            .send(ConnectionMessage::Deliver { event })
            .await
            .map_err(|e| CoordinatorError::Internal(format!("channel send failed: {e}")))
    }

    /// Deliver an optional final notice, then close the connection.
    pub async fn close(
        &self,
        notice: Option<ServerEvent>,
        reason: impl Into<String>,
    ) -> Result<(), CoordinatorError> {
        self.sender
            .send(ConnectionMessage::Close {
                notice,
                reason: reason.into(),
            })
            .await
            .map_err(|e| CoordinatorError::Internal(format!("channel send failed: {e}")))
    }

    /// Cancel the connection actor without a final notice.
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    /// Check if the actor is cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }
}

/// The `ConnectionActor` implementation.
pub struct ConnectionActor {
    /// Participant this connection belongs to.
    participant_id: String,
    /// Session the participant is resident in.
    session_id: String,
    /// Message receiver.
    receiver: mpsc::Receiver<ConnectionMessage>,
    /// Outbound channel drained by the socket task.
    outbound: mpsc::Sender<ServerEvent>,
    /// Cancellation token (child of the session's token).
    cancel_token: CancellationToken,
    /// Shared metrics.
    metrics: Arc<ActorMetrics>,
    /// Mailbox monitor.
    mailbox: MailboxMonitor,
    /// Whether the connection is closing.
    is_closing: bool,
}

impl ConnectionActor {
    /// Spawn a new connection actor.
    ///
    /// Returns a handle and the task join handle.
    pub fn spawn(
        participant_id: String,
        session_id: String,
        outbound: mpsc::Sender<ServerEvent>,
        cancel_token: CancellationToken,
        metrics: Arc<ActorMetrics>,
    ) -> (ConnectionActorHandle, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(CONNECTION_CHANNEL_BUFFER);

        let actor = Self {
            participant_id: participant_id.clone(),
            session_id,
            receiver,
            outbound,
            cancel_token: cancel_token.clone(),
            metrics,
            mailbox: MailboxMonitor::new(ActorType::Connection, &participant_id),
            is_closing: false,
        };

        actor.metrics.connection_opened();
        let task_handle = tokio::spawn(actor.run());

        let handle = ConnectionActorHandle {
            sender,
            cancel_token,
            participant_id,
        };

        (handle, task_handle)
    }

    /// Run the actor message loop.
    #[instrument(
        skip_all,
        name = "huddle.actor.connection",
        fields(participant_id = %self.participant_id, session_id = %self.session_id)
    )]
    async fn run(mut self) {
        debug!(
            target: "huddle.actor.connection",
            participant_id = %self.participant_id,
            session_id = %self.session_id,
            "ConnectionActor started"
        );

        loop {
            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    debug!(
                        target: "huddle.actor.connection",
                        participant_id = %self.participant_id,
                        "ConnectionActor received cancellation signal"
                    );
                    break;
                }

                msg = self.receiver.recv() => {
                    match msg {
                        Some(message) => {
                            self.mailbox.record_enqueue();
                            let should_exit = self.handle_message(message).await;
                            self.mailbox.record_dequeue();

                            if should_exit {
                                break;
                            }
                        }
                        None => {
                            debug!(
                                target: "huddle.actor.connection",
                                participant_id = %self.participant_id,
                                "ConnectionActor channel closed, exiting"
                            );
                            break;
                        }
                    }
                }
            }
        }

        self.metrics.connection_closed();

        info!(
            target: "huddle.actor.connection",
            participant_id = %self.participant_id,
            session_id = %self.session_id,
            events_delivered = self.mailbox.messages_processed(),
            "ConnectionActor stopped"
        );
    }

    /// Handle a single message. Returns true if the actor should exit.
    async fn handle_message(&mut self, message: ConnectionMessage) -> bool {
        match message {
            ConnectionMessage::Deliver { event } => {
                self.forward(event).await;
                false
            }

            ConnectionMessage::Close { notice, reason } => {
                debug!(
                    target: "huddle.actor.connection",
                    participant_id = %self.participant_id,
                    reason = %reason,
                    "Closing connection"
                );
                if let Some(event) = notice {
                    self.forward(event).await;
                }
                self.is_closing = true;
                // Dropping the outbound sender tells the socket task to
                // close the socket.
                true
            }
        }
    }

    /// Forward one event toward the socket task.
    async fn forward(&mut self, event: ServerEvent) {
        if self.is_closing {
            return;
        }

        if self.outbound.send(event).await.is_err() {
            // Socket task is gone; the session reaps this actor and
            // treats it as a departure.
            debug!(
                target: "huddle.actor.connection",
                participant_id = %self.participant_id,
                "Outbound channel closed, connection lost"
            );
            self.is_closing = true;
            self.cancel_token.cancel();
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn spawn_connection() -> (
        ConnectionActorHandle,
        JoinHandle<()>,
        mpsc::Receiver<ServerEvent>,
    ) {
        let metrics = ActorMetrics::new();
        let cancel_token = CancellationToken::new();
        let (out_tx, out_rx) = mpsc::channel(16);

        let (handle, task) = ConnectionActor::spawn(
            "p-1".to_string(),
            "s-1".to_string(),
            out_tx,
            cancel_token,
            metrics,
        );
        (handle, task, out_rx)
    }

    #[tokio::test]
    async fn test_deliver_preserves_order() {
        let (handle, _task, mut out_rx) = spawn_connection();

        for n in 0..3 {
            handle
                .deliver(ServerEvent::UserDisconnected {
                    user_id: format!("peer-{n}"),
                })
                .await
                .unwrap();
        }

        for n in 0..3 {
            let event = out_rx.recv().await.unwrap();
            assert_eq!(
                event,
                ServerEvent::UserDisconnected {
                    user_id: format!("peer-{n}"),
                }
            );
        }

        handle.cancel();
    }

    #[tokio::test]
    async fn test_close_delivers_final_notice_then_exits() {
        let (handle, task, mut out_rx) = spawn_connection();

        handle
            .close(Some(ServerEvent::ForceCloseRoom), "window elapsed")
            .await
            .unwrap();

        assert_eq!(out_rx.recv().await.unwrap(), ServerEvent::ForceCloseRoom);
        // Actor exits and drops the outbound sender.
        assert!(out_rx.recv().await.is_none());

        let result = tokio::time::timeout(Duration::from_secs(1), task).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_dropped_socket_cancels_actor() {
        let (handle, task, out_rx) = spawn_connection();
        drop(out_rx);

        handle
            .deliver(ServerEvent::UserDisconnected {
                user_id: "peer".to_string(),
            })
            .await
            .unwrap();

        let result = tokio::time::timeout(Duration::from_secs(1), task).await;
        assert!(result.is_ok());
        assert!(handle.is_cancelled());
    }

    #[tokio::test]
    async fn test_cancellation_stops_actor() {
        let (handle, task, _out_rx) = spawn_connection();

        handle.cancel();

        let result = tokio::time::timeout(Duration::from_secs(1), task).await;
        assert!(result.is_ok());
    }
}
