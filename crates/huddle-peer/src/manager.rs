//! Roster-driven layer above the per-remote links.
//!
//! The manager decides who gets an offer and when. The joiner initiates
//! toward every occupant named in the roster reply; incoming offers that
//! arrive before local media is ready are held in a FIFO and answered
//! the moment it is. Each remote has at most one link, and no link's
//! progress ever gates another's.
//!
//! Coordinator events go in, [`Command`]s come out; the embedder
//! executes them against its WebRTC stack and its socket and reports
//! the produced descriptions back through [`PeerLinkManager::offer_ready`]
//! and [`PeerLinkManager::answer_ready`].

use crate::link::{LinkAction, LinkState, PeerLink};
use crate::media::{LocalStream, MediaConstraints, MediaSource};
use crate::PeerError;

use huddle_protocol::{HandshakeKind, MediaStatus, ServerEvent};
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use tracing::{debug, info, warn};

/// Work for the embedder, in execution order.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Build a connection for the remote and produce an offer; report
    /// it back through `offer_ready`.
    CreateOffer { remote_id: String },
    /// Produce an answer for the applied remote offer; report it back
    /// through `answer_ready`.
    CreateAnswer { remote_id: String },
    /// Send a handshake message to the coordinator.
    Signal {
        kind: HandshakeKind,
        target: String,
        payload: Value,
    },
    /// Apply the remote's session description on the link's connection.
    ApplyRemoteDescription { remote_id: String, description: Value },
    /// Apply one remote candidate on the link's connection.
    ApplyCandidate { remote_id: String, candidate: Value },
    /// Swap outgoing tracks on the link's live connection.
    ReplaceTracks { remote_id: String },
    /// Tear down the remote's connection and UI.
    DropLink { remote_id: String },
    /// A peer's presence changed; update its UI.
    PeerMediaChanged {
        remote_id: String,
        status: MediaStatus,
    },
    /// The session is over for us; tear everything down and leave.
    LeaveSession { reason: SessionEnd },
}

/// Why the session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// Removed by a moderator.
    Kicked,
    /// The session was closed for everyone.
    ForceClosed,
    /// The coordinator refused the join.
    JoinDenied,
}

/// Client-side negotiation coordinator for one session.
#[derive(Debug, Default)]
pub struct PeerLinkManager {
    /// One link per remote participant.
    links: HashMap<String, PeerLink>,
    /// Local stream, present once acquisition succeeded.
    local: Option<LocalStream>,
    /// Offers held until local media is ready, arrival order.
    pending_offers: VecDeque<(String, Value)>,
    /// Roster occupants to offer to once local media is ready.
    pending_roster: Vec<String>,
}

impl PeerLinkManager {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether local media has been acquired.
    #[must_use]
    pub fn is_media_ready(&self) -> bool {
        self.local.is_some()
    }

    /// The presence payload for the current local stream, if any.
    #[must_use]
    pub fn media_status(&self) -> Option<MediaStatus> {
        self.local.as_ref().map(LocalStream::status)
    }

    /// Negotiation state of the link to one remote, if any.
    #[must_use]
    pub fn link_state(&self, remote_id: &str) -> Option<LinkState> {
        self.links.get(remote_id).map(PeerLink::state)
    }

    /// Acquire local media through the source. On failure the manager
    /// stays linkless; on success deferred work is released.
    pub async fn acquire_media(
        &mut self,
        source: &dyn MediaSource,
        constraints: MediaConstraints,
    ) -> Result<Vec<Command>, PeerError> {
        match source.acquire(constraints).await {
            Ok(stream) => Ok(self.local_media_ready(stream)),
            Err(e) => {
                warn!(target: "huddle.peer", error = %e, "Media acquisition failed");
                Err(e)
            }
        }
    }

    /// Local media became available: offer to every deferred occupant,
    /// then answer the held offers in arrival order.
    pub fn local_media_ready(&mut self, stream: LocalStream) -> Vec<Command> {
        self.local = Some(stream);
        let mut commands = Vec::new();

        for remote_id in std::mem::take(&mut self.pending_roster) {
            commands.extend(self.initiate(remote_id));
        }

        let held: Vec<(String, Value)> = self.pending_offers.drain(..).collect();
        for (sender, offer) in held {
            commands.extend(self.accept_incoming_offer(sender, offer));
        }

        commands
    }

    /// The local stream changed (camera/screen switch). Stable links
    /// get their tracks replaced in place and every open link is
    /// renegotiated by this side.
    pub fn local_media_changed(&mut self, stream: LocalStream) -> Vec<Command> {
        self.local = Some(stream);
        let mut commands = Vec::new();

        for (remote_id, link) in &mut self.links {
            if link.state() == LinkState::Closed {
                continue;
            }
            if link.state() == LinkState::Stable {
                commands.push(Command::ReplaceTracks {
                    remote_id: remote_id.clone(),
                });
            }
            link.restart();
            commands.push(Command::CreateOffer {
                remote_id: remote_id.clone(),
            });
        }

        info!(
            target: "huddle.peer",
            links = self.links.len(),
            "Local media changed, renegotiating"
        );
        commands
    }

    /// Feed one coordinator event through the manager.
    pub fn handle_event(&mut self, event: ServerEvent) -> Vec<Command> {
        match event {
            // The joiner offers to everyone already there.
            ServerEvent::UsersInRoom { users } => {
                let mut commands = Vec::new();
                for user in users {
                    if self.is_media_ready() {
                        commands.extend(self.initiate(user.user_id));
                    } else {
                        self.pending_roster.push(user.user_id);
                    }
                }
                commands
            }

            // The newcomer will offer to us; nothing to initiate here.
            ServerEvent::NewUser { user_id, .. } => {
                debug!(target: "huddle.peer", remote_id = %user_id, "Peer joined");
                Vec::new()
            }

            ServerEvent::Offer { sender, offer } => {
                if self.is_media_ready() {
                    self.accept_incoming_offer(sender, offer)
                } else {
                    debug!(target: "huddle.peer", remote_id = %sender, "Offer held until media is ready");
                    self.pending_offers.push_back((sender, offer));
                    Vec::new()
                }
            }

            ServerEvent::Answer { sender, answer } => {
                let Some(link) = self.links.get_mut(&sender) else {
                    return Vec::new();
                };
                Self::map_actions(&sender, link.accept_answer(answer))
            }

            ServerEvent::Candidate { sender, candidate } => {
                let Some(link) = self.links.get_mut(&sender) else {
                    return Vec::new();
                };
                Self::map_actions(&sender, link.add_remote_candidate(candidate))
            }

            ServerEvent::UpdateMediaStatus { user_id, status } => {
                vec![Command::PeerMediaChanged {
                    remote_id: user_id,
                    status,
                }]
            }

            ServerEvent::UserDisconnected { user_id } => self.drop_link(&user_id),

            ServerEvent::Kicked => self.end_session(SessionEnd::Kicked),
            ServerEvent::ForceCloseRoom => self.end_session(SessionEnd::ForceClosed),
            ServerEvent::JoinDenied { reason } => {
                warn!(target: "huddle.peer", reason = %reason, "Join denied");
                self.end_session(SessionEnd::JoinDenied)
            }

            ServerEvent::Error { code, message } => {
                warn!(target: "huddle.peer", code, message = %message, "Coordinator error");
                Vec::new()
            }
        }
    }

    /// The embedder produced the offer requested by `CreateOffer`.
    pub fn offer_ready(&mut self, remote_id: &str, offer: Value) -> Result<Vec<Command>, PeerError> {
        let link = self
            .links
            .get_mut(remote_id)
            .ok_or_else(|| PeerError::UnknownLink(remote_id.to_string()))?;
        Ok(Self::map_actions(remote_id, link.start_offer(offer)))
    }

    /// The embedder produced the answer requested by `CreateAnswer`.
    pub fn answer_ready(
        &mut self,
        remote_id: &str,
        answer: Value,
    ) -> Result<Vec<Command>, PeerError> {
        let link = self
            .links
            .get_mut(remote_id)
            .ok_or_else(|| PeerError::UnknownLink(remote_id.to_string()))?;
        Ok(Self::map_actions(remote_id, link.answer_ready(answer)))
    }

    /// Start a link toward a remote. A duplicate is a no-op.
    fn initiate(&mut self, remote_id: String) -> Vec<Command> {
        if self.links.contains_key(&remote_id) {
            debug!(target: "huddle.peer", remote_id = %remote_id, "Link already exists");
            return Vec::new();
        }
        self.links
            .insert(remote_id.clone(), PeerLink::new(remote_id.clone(), true));
        vec![Command::CreateOffer { remote_id }]
    }

    /// Apply a remote offer, creating the link if needed, and ask the
    /// embedder for an answer. A stable link renegotiates in place.
    fn accept_incoming_offer(&mut self, sender: String, offer: Value) -> Vec<Command> {
        let link = self
            .links
            .entry(sender.clone())
            .or_insert_with(|| PeerLink::new(sender.clone(), false));

        let mut commands = Self::map_actions(&sender, link.accept_offer(offer));
        commands.push(Command::CreateAnswer { remote_id: sender });
        commands
    }

    fn drop_link(&mut self, remote_id: &str) -> Vec<Command> {
        let Some(mut link) = self.links.remove(remote_id) else {
            return Vec::new();
        };
        link.close();
        self.pending_offers.retain(|(sender, _)| sender != remote_id);
        self.pending_roster.retain(|id| id != remote_id);
        vec![Command::DropLink {
            remote_id: remote_id.to_string(),
        }]
    }

    fn end_session(&mut self, reason: SessionEnd) -> Vec<Command> {
        let mut commands: Vec<Command> = self
            .links
            .drain()
            .map(|(remote_id, mut link)| {
                link.close();
                Command::DropLink { remote_id }
            })
            .collect();
        self.pending_offers.clear();
        self.pending_roster.clear();
        commands.push(Command::LeaveSession { reason });
        commands
    }

    /// Lift link actions into embedder commands.
    fn map_actions(remote_id: &str, actions: Vec<LinkAction>) -> Vec<Command> {
        actions
            .into_iter()
            .map(|action| match action {
                LinkAction::SendOffer { payload } => Command::Signal {
                    kind: HandshakeKind::Offer,
                    target: remote_id.to_string(),
                    payload,
                },
                LinkAction::SendAnswer { payload } => Command::Signal {
                    kind: HandshakeKind::Answer,
                    target: remote_id.to_string(),
                    payload,
                },
                LinkAction::ApplyRemoteDescription { description } => {
                    Command::ApplyRemoteDescription {
                        remote_id: remote_id.to_string(),
                        description,
                    }
                }
                LinkAction::ApplyCandidate { candidate } => Command::ApplyCandidate {
                    remote_id: remote_id.to_string(),
                    candidate,
                },
                LinkAction::ReplaceTracks => Command::ReplaceTracks {
                    remote_id: remote_id.to_string(),
                },
            })
            .collect()
    }
}
