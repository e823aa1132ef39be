//! End-to-end session flows through the registry handle.
//!
//! These tests exercise the same path the WebSocket transport uses:
//! every operation goes through `RegistryActorHandle`, and delivered
//! events are observed on each participant's outbound channel.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use huddle_coordinator::actors::{ActorMetrics, RegistryActor, RegistryActorHandle};
use huddle_coordinator::schedule::{SessionSchedule, StaticSchedule};
use huddle_protocol::{HandshakeKind, MediaStatus, ServerEvent};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

fn spawn_registry() -> (RegistryActorHandle, CancellationToken) {
    let cancel_token = CancellationToken::new();
    let (registry, _task) = RegistryActor::spawn(
        Arc::new(StaticSchedule::open()),
        Duration::from_secs(30),
        cancel_token.clone(),
        ActorMetrics::new(),
    );
    (registry, cancel_token)
}

async fn join(
    registry: &RegistryActorHandle,
    session: &str,
    id: &str,
    name: &str,
) -> (Vec<huddle_protocol::PeerInfo>, mpsc::Receiver<ServerEvent>) {
    let (out_tx, out_rx) = mpsc::channel(64);
    let result = registry
        .join(
            session.to_string(),
            id.to_string(),
            name.to_string(),
            out_tx,
        )
        .await
        .unwrap();
    (result.roster, out_rx)
}

/// Pull events until one matches, skipping roster announcements.
async fn next_non_roster(rx: &mut mpsc::Receiver<ServerEvent>) -> ServerEvent {
    loop {
        match rx.recv().await.expect("channel closed while waiting") {
            ServerEvent::NewUser { .. } => {}
            other => return other,
        }
    }
}

#[tokio::test]
async fn population_accounting_tracks_joins_and_leaves() {
    let (registry, _token) = spawn_registry();

    let (_, _rx_a) = join(&registry, "standup", "a", "Ana").await;
    let (_, _rx_b) = join(&registry, "standup", "b", "Ben").await;
    let (_, _rx_c) = join(&registry, "retro", "c", "Cai").await;

    let status = registry.status().await.unwrap();
    assert_eq!(status.session_count, 2);
    assert_eq!(status.participant_count, 3);

    let standup = registry.members("standup".to_string()).await.unwrap();
    assert_eq!(standup.len(), 2);

    registry.leave("a".to_string()).await.unwrap();
    let standup = registry.members("standup".to_string()).await.unwrap();
    assert_eq!(standup.len(), 1);
    assert_eq!(standup[0].user_id, "b");

    let status = registry.status().await.unwrap();
    assert_eq!(status.participant_count, 2);
}

#[tokio::test]
async fn relays_between_a_pair_arrive_in_send_order() {
    let (registry, _token) = spawn_registry();

    let (_, _rx_a) = join(&registry, "standup", "a", "Ana").await;
    let (_, mut rx_b) = join(&registry, "standup", "b", "Ben").await;

    let m1 = serde_json::json!({"sdp": "offer-1"});
    let m2 = serde_json::json!({"candidate": "cand-1"});
    let m3 = serde_json::json!({"candidate": "cand-2"});

    registry
        .relay(HandshakeKind::Offer, "a".to_string(), "b".to_string(), m1.clone())
        .await
        .unwrap();
    registry
        .relay(
            HandshakeKind::Candidate,
            "a".to_string(),
            "b".to_string(),
            m2.clone(),
        )
        .await
        .unwrap();
    registry
        .relay(
            HandshakeKind::Candidate,
            "a".to_string(),
            "b".to_string(),
            m3.clone(),
        )
        .await
        .unwrap();

    assert_eq!(
        next_non_roster(&mut rx_b).await,
        ServerEvent::Offer {
            sender: "a".to_string(),
            offer: m1,
        }
    );
    assert_eq!(
        next_non_roster(&mut rx_b).await,
        ServerEvent::Candidate {
            sender: "a".to_string(),
            candidate: m2,
        }
    );
    assert_eq!(
        next_non_roster(&mut rx_b).await,
        ServerEvent::Candidate {
            sender: "a".to_string(),
            candidate: m3,
        }
    );
}

#[tokio::test]
async fn repeat_join_is_idempotent() {
    let (registry, _token) = spawn_registry();

    let (_, _rx1) = join(&registry, "standup", "a", "Ana").await;
    let (roster, _rx2) = join(&registry, "standup", "a", "Ana").await;

    // No phantom peer from the repeat join.
    assert!(roster.is_empty());
    assert_eq!(registry.members("standup".to_string()).await.unwrap().len(), 1);

    let status = registry.status().await.unwrap();
    assert_eq!(status.session_count, 1);
    assert_eq!(status.participant_count, 1);
}

#[tokio::test]
async fn two_joiners_see_each_other_exactly_once() {
    let (registry, _token) = spawn_registry();

    // P1 joins an empty session: empty roster reply.
    let (roster_1, mut rx_1) = join(&registry, "standup", "p1", "One").await;
    assert!(roster_1.is_empty());

    // P2 joins: roster reply names P1, and P1 hears about P2 exactly once.
    let (roster_2, _rx_2) = join(&registry, "standup", "p2", "Two").await;
    assert_eq!(roster_2.len(), 1);
    assert_eq!(roster_2[0].user_id, "p1");

    let announcement = rx_1.recv().await.unwrap();
    assert_eq!(
        announcement,
        ServerEvent::NewUser {
            user_id: "p2".to_string(),
            user_name: "Two".to_string(),
            room_id: "standup".to_string(),
        }
    );

    // Nothing else is pending for P1.
    registry.leave("p2".to_string()).await.unwrap();
    assert_eq!(
        rx_1.recv().await.unwrap(),
        ServerEvent::UserDisconnected {
            user_id: "p2".to_string(),
        }
    );
}

#[tokio::test]
async fn relays_sent_before_join_are_never_delivered_late() {
    let (registry, _token) = spawn_registry();

    let (_, _rx_a) = join(&registry, "standup", "a", "Ana").await;

    // Sent while b is absent: dropped, not queued.
    registry
        .relay(
            HandshakeKind::Offer,
            "a".to_string(),
            "b".to_string(),
            serde_json::json!({"sdp": "stale"}),
        )
        .await
        .unwrap();

    let (_, mut rx_b) = join(&registry, "standup", "b", "Ben").await;

    // b sees only live traffic from this point on.
    registry
        .relay(
            HandshakeKind::Offer,
            "a".to_string(),
            "b".to_string(),
            serde_json::json!({"sdp": "fresh"}),
        )
        .await
        .unwrap();

    assert_eq!(
        next_non_roster(&mut rx_b).await,
        ServerEvent::Offer {
            sender: "a".to_string(),
            offer: serde_json::json!({"sdp": "fresh"}),
        }
    );
}

#[tokio::test]
async fn media_status_reaches_everyone_but_the_sender() {
    let (registry, _token) = spawn_registry();

    let (_, mut rx_a) = join(&registry, "standup", "a", "Ana").await;
    let (_, mut rx_b) = join(&registry, "standup", "b", "Ben").await;

    let status = MediaStatus {
        camera_on: false,
        mic_on: true,
        screen_sharing: false,
    };
    registry
        .media_status("a".to_string(), status)
        .await
        .unwrap();

    assert_eq!(
        next_non_roster(&mut rx_b).await,
        ServerEvent::UpdateMediaStatus {
            user_id: "a".to_string(),
            status,
        }
    );

    // The sender hears nothing back.
    registry.leave("b".to_string()).await.unwrap();
    assert_eq!(
        next_non_roster(&mut rx_a).await,
        ServerEvent::UserDisconnected {
            user_id: "b".to_string(),
        }
    );
}

#[tokio::test]
async fn moderator_evicts_and_target_gets_kicked() {
    let schedule = StaticSchedule::default();
    schedule
        .set(
            "standup",
            SessionSchedule {
                moderators: vec!["Ana".to_string()],
                ..SessionSchedule::default()
            },
        )
        .await;

    let cancel_token = CancellationToken::new();
    let (registry, _task) = RegistryActor::spawn(
        Arc::new(schedule),
        Duration::from_secs(30),
        cancel_token,
        ActorMetrics::new(),
    );

    let (_, _rx_a) = join(&registry, "standup", "a", "Ana").await;
    let (_, mut rx_b) = join(&registry, "standup", "b", "Ben").await;

    registry.evict("a".to_string(), "b".to_string()).await.unwrap();

    assert_eq!(next_non_roster(&mut rx_b).await, ServerEvent::Kicked);
    assert!(rx_b.recv().await.is_none());

    // Evicting again is a successful no-op.
    registry.evict("a".to_string(), "b".to_string()).await.unwrap();

    let status = registry.status().await.unwrap();
    assert_eq!(status.participant_count, 1);
}

#[tokio::test]
async fn empty_sessions_disappear() {
    let (registry, _token) = spawn_registry();

    let (_, _rx) = join(&registry, "standup", "a", "Ana").await;
    registry.leave("a".to_string()).await.unwrap();

    // The session actor exits once empty; a later join builds it fresh.
    let (roster, _rx2) = join(&registry, "standup", "b", "Ben").await;
    assert!(roster.is_empty());
}
