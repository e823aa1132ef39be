//! WebSocket transport for the signaling protocol.
//!
//! Each accepted socket gets a fresh connection-scoped participant id.
//! The first text frame must be a `join-room`; anything else is a
//! protocol error and the socket is closed without touching session
//! state. After a successful join the socket runs two halves:
//!
//! - an outbound pump draining the events queued by the participant's
//!   `ConnectionActor`, in order, onto the socket
//! - an inbound loop translating client frames into registry calls
//!
//! Closing the socket, with or without a close frame, is an implicit
//! leave. A terminal event (`kicked`, `force-close-room`) closes the
//! socket right after it is sent.

use crate::actors::RegistryActorHandle;
use crate::errors::CoordinatorError;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use huddle_protocol::{ClientMessage, HandshakeKind, ServerEvent};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Wire code for malformed or out-of-order frames.
const PROTOCOL_ERROR_CODE: i32 = 1;

/// Buffer between the connection actor and the socket task.
const OUTBOUND_CHANNEL_BUFFER: usize = 64;

/// Create the signaling router.
pub fn ws_router(registry: RegistryActorHandle) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .with_state(registry)
}

/// WebSocket upgrade handler.
async fn ws_handler(
    ws: WebSocketUpgrade,
    State(registry): State<RegistryActorHandle>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, registry))
}

/// Drive one client connection from upgrade to close.
async fn handle_socket(socket: WebSocket, registry: RegistryActorHandle) {
    // Ids are connection-scoped: a reconnect is a brand-new participant.
    let participant_id = Uuid::new_v4().to_string();
    let (mut ws_tx, mut ws_rx) = socket.split();

    debug!(
        target: "huddle.ws",
        participant_id = %participant_id,
        "WebSocket client connected"
    );

    // The handshake frame must be join-room; session state is only
    // created once it arrives.
    let (session_id, user_name) = match await_join_frame(&mut ws_rx).await {
        Ok(Some(join)) => join,
        Ok(None) => {
            debug!(
                target: "huddle.ws",
                participant_id = %participant_id,
                "Client closed before joining"
            );
            return;
        }
        Err(message) => {
            send_event(
                &mut ws_tx,
                &ServerEvent::Error {
                    code: PROTOCOL_ERROR_CODE,
                    message,
                },
            )
            .await;
            let _ = ws_tx.send(Message::Close(None)).await;
            return;
        }
    };

    let (out_tx, out_rx) = mpsc::channel(OUTBOUND_CHANNEL_BUFFER);
    let result = registry
        .join(
            session_id.clone(),
            participant_id.clone(),
            user_name,
            out_tx.clone(),
        )
        .await;

    let roster = match result {
        Ok(join) => join.roster,
        Err(e) => {
            send_event(&mut ws_tx, &refusal_event(&e)).await;
            let _ = ws_tx.send(Message::Close(None)).await;
            return;
        }
    };

    info!(
        target: "huddle.ws",
        participant_id = %participant_id,
        session_id = %session_id,
        "Participant joined via WebSocket"
    );

    // The roster reply goes out before the pump starts, so it precedes
    // everything the connection actor queues afterwards.
    send_event(&mut ws_tx, &ServerEvent::UsersInRoom { users: roster }).await;

    let pump = tokio::spawn(pump_outbound(ws_tx, out_rx));

    run_inbound(&mut ws_rx, &registry, &participant_id, &out_tx).await;

    // Implicit leave: residency ends when the socket does. Dropping our
    // out_tx clone lets the pump finish once the connection actor's
    // copy is gone too.
    let _ = registry.leave(participant_id.clone()).await;
    drop(out_tx);
    let _ = pump.await;

    debug!(
        target: "huddle.ws",
        participant_id = %participant_id,
        "WebSocket client disconnected"
    );
}

/// Wait for the join-room frame.
///
/// `Ok(None)` means the client went away first; `Err` carries a
/// client-facing protocol error message.
async fn await_join_frame(
    ws_rx: &mut SplitStream<WebSocket>,
) -> Result<Option<(String, String)>, String> {
    while let Some(frame) = ws_rx.next().await {
        match frame {
            Ok(Message::Text(text)) => {
                return match serde_json::from_str::<ClientMessage>(&text) {
                    Ok(ClientMessage::JoinRoom { room_id, user_name }) => {
                        Ok(Some((room_id, user_name)))
                    }
                    Ok(_) => Err("first message must be join-room".to_string()),
                    Err(_) => Err("malformed message".to_string()),
                };
            }
            Ok(Message::Close(_)) | Err(_) => return Ok(None),
            // Ping/pong handled by axum; binary is ignored.
            Ok(_) => {}
        }
    }
    Ok(None)
}

/// Drain queued events onto the socket until the channel closes or a
/// terminal event goes out.
async fn pump_outbound(
    mut ws_tx: SplitSink<WebSocket, Message>,
    mut out_rx: mpsc::Receiver<ServerEvent>,
) {
    while let Some(event) = out_rx.recv().await {
        let terminal = is_terminal(&event);
        if !send_event(&mut ws_tx, &event).await {
            return;
        }
        if terminal {
            break;
        }
    }
    let _ = ws_tx.send(Message::Close(None)).await;
}

/// Translate inbound frames into registry calls until the socket closes.
async fn run_inbound(
    ws_rx: &mut SplitStream<WebSocket>,
    registry: &RegistryActorHandle,
    participant_id: &str,
    out_tx: &mpsc::Sender<ServerEvent>,
) {
    while let Some(frame) = ws_rx.next().await {
        let text = match frame {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                debug!(target: "huddle.ws", participant_id = %participant_id, error = %e, "WebSocket error");
                break;
            }
        };

        let message = match serde_json::from_str::<ClientMessage>(&text) {
            Ok(message) => message,
            Err(_) => {
                let _ = out_tx
                    .send(ServerEvent::Error {
                        code: PROTOCOL_ERROR_CODE,
                        message: "malformed message".to_string(),
                    })
                    .await;
                continue;
            }
        };

        let result = dispatch(registry, participant_id, out_tx, message).await;
        if let Err(e) = result {
            warn!(
                target: "huddle.ws",
                participant_id = %participant_id,
                error = %e,
                "Request failed"
            );
            let _ = out_tx
                .send(ServerEvent::Error {
                    code: e.error_code(),
                    message: e.client_message(),
                })
                .await;
        }
    }
}

/// Route one parsed client message to the registry.
async fn dispatch(
    registry: &RegistryActorHandle,
    participant_id: &str,
    out_tx: &mpsc::Sender<ServerEvent>,
    message: ClientMessage,
) -> Result<(), CoordinatorError> {
    match message {
        // A second join-room moves the participant; residency is always
        // one session at a time.
        ClientMessage::JoinRoom { room_id, user_name } => {
            let join = registry
                .join(
                    room_id,
                    participant_id.to_string(),
                    user_name,
                    out_tx.clone(),
                )
                .await?;
            out_tx
                .send(ServerEvent::UsersInRoom { users: join.roster })
                .await
                .map_err(|e| CoordinatorError::Internal(format!("channel send failed: {e}")))
        }

        ClientMessage::Offer { target, offer } => {
            registry
                .relay(
                    HandshakeKind::Offer,
                    participant_id.to_string(),
                    target,
                    offer,
                )
                .await
        }

        ClientMessage::Answer { target, answer } => {
            registry
                .relay(
                    HandshakeKind::Answer,
                    participant_id.to_string(),
                    target,
                    answer,
                )
                .await
        }

        ClientMessage::Candidate { target, candidate } => {
            registry
                .relay(
                    HandshakeKind::Candidate,
                    participant_id.to_string(),
                    target,
                    candidate,
                )
                .await
        }

        ClientMessage::UpdateMediaStatus(status) => {
            registry
                .media_status(participant_id.to_string(), status)
                .await
        }

        ClientMessage::KickUser { target_id } => {
            registry
                .evict(participant_id.to_string(), target_id)
                .await
        }
    }
}

/// Events after which the socket is closed.
fn is_terminal(event: &ServerEvent) -> bool {
    matches!(
        event,
        ServerEvent::Kicked | ServerEvent::ForceCloseRoom | ServerEvent::JoinDenied { .. }
    )
}

/// Turn a refused join into the event the client sees.
fn refusal_event(error: &CoordinatorError) -> ServerEvent {
    match error {
        CoordinatorError::JoinDenied(_) | CoordinatorError::Schedule(_) => {
            ServerEvent::JoinDenied {
                reason: error.client_message(),
            }
        }
        other => ServerEvent::Error {
            code: other.error_code(),
            message: other.client_message(),
        },
    }
}

/// Send one event as a text frame. Returns false once the socket is gone.
async fn send_event(ws_tx: &mut SplitSink<WebSocket, Message>, event: &ServerEvent) -> bool {
    match serde_json::to_string(event) {
        Ok(json) => ws_tx.send(Message::Text(json)).await.is_ok(),
        Err(e) => {
            warn!(target: "huddle.ws", error = %e, "Event serialization failed");
            true
        }
    }
}
