//! Per-remote negotiation state machine.
//!
//! A `PeerLink` tracks one negotiation with one remote participant.
//! Candidates that arrive before the remote description is applied are
//! queued in arrival order and flushed the moment it lands; once the
//! link is stable they apply immediately. Nothing is dropped while the
//! link is open, nothing is applied twice, and a closed link discards
//! everything.

use serde_json::Value;
use std::collections::VecDeque;
use tracing::debug;

/// Negotiation state of a link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    /// An offer/answer exchange is in flight.
    Negotiating,
    /// Descriptions are exchanged; candidates apply directly.
    Stable,
    /// Torn down; all inputs are discarded.
    Closed,
}

/// What the embedder must do next with its WebRTC stack or its socket.
#[derive(Debug, Clone, PartialEq)]
pub enum LinkAction {
    /// Send the local offer to the remote via the coordinator.
    SendOffer { payload: Value },
    /// Send the local answer to the remote via the coordinator.
    SendAnswer { payload: Value },
    /// Apply the remote's session description.
    ApplyRemoteDescription { description: Value },
    /// Apply one remote candidate.
    ApplyCandidate { candidate: Value },
    /// Swap the outgoing tracks on the live connection.
    ReplaceTracks,
}

/// One negotiation with one remote participant.
#[derive(Debug)]
pub struct PeerLink {
    remote_id: String,
    state: LinkState,
    /// Whether this side sent the offer in the current exchange.
    initiator: bool,
    /// True once the remote description has been applied.
    remote_description_set: bool,
    /// Candidates waiting for the remote description, arrival order.
    candidate_queue: VecDeque<Value>,
}

impl PeerLink {
    /// Create a link in the negotiating state.
    #[must_use]
    pub fn new(remote_id: impl Into<String>, initiator: bool) -> Self {
        Self {
            remote_id: remote_id.into(),
            state: LinkState::Negotiating,
            initiator,
            remote_description_set: false,
            candidate_queue: VecDeque::new(),
        }
    }

    /// The remote participant this link negotiates with.
    #[must_use]
    pub fn remote_id(&self) -> &str {
        &self.remote_id
    }

    #[must_use]
    pub fn state(&self) -> LinkState {
        self.state
    }

    #[must_use]
    pub fn is_initiator(&self) -> bool {
        self.initiator
    }

    /// The local offer is ready; send it.
    pub fn start_offer(&mut self, offer: Value) -> Vec<LinkAction> {
        if self.state == LinkState::Closed {
            return Vec::new();
        }
        self.state = LinkState::Negotiating;
        self.initiator = true;
        vec![LinkAction::SendOffer { payload: offer }]
    }

    /// A remote offer arrived; apply it and release queued candidates.
    ///
    /// On a stable link this restarts negotiation in place (the remote
    /// changed its media), which is why a fresh exchange does not reset
    /// the candidate queue to empty-handed.
    pub fn accept_offer(&mut self, offer: Value) -> Vec<LinkAction> {
        if self.state == LinkState::Closed {
            return Vec::new();
        }
        self.state = LinkState::Negotiating;
        self.initiator = false;
        self.remote_description_set = true;

        let mut actions = vec![LinkAction::ApplyRemoteDescription { description: offer }];
        actions.extend(self.flush_candidates());
        actions
    }

    /// The local answer is ready; send it. The answerer is stable once
    /// the answer is on the wire.
    pub fn answer_ready(&mut self, answer: Value) -> Vec<LinkAction> {
        if self.state == LinkState::Closed {
            return Vec::new();
        }
        self.state = LinkState::Stable;
        vec![LinkAction::SendAnswer { payload: answer }]
    }

    /// The remote's answer arrived; apply it and release queued
    /// candidates. The offerer is stable once the answer is applied.
    pub fn accept_answer(&mut self, answer: Value) -> Vec<LinkAction> {
        if self.state == LinkState::Closed {
            return Vec::new();
        }
        self.state = LinkState::Stable;
        self.remote_description_set = true;

        let mut actions = vec![LinkAction::ApplyRemoteDescription {
            description: answer,
        }];
        actions.extend(self.flush_candidates());
        actions
    }

    /// A remote candidate arrived. Queued until the remote description
    /// is applied, immediate afterwards, discarded once closed.
    pub fn add_remote_candidate(&mut self, candidate: Value) -> Vec<LinkAction> {
        match self.state {
            LinkState::Closed => Vec::new(),
            _ if self.remote_description_set => {
                vec![LinkAction::ApplyCandidate { candidate }]
            }
            _ => {
                self.candidate_queue.push_back(candidate);
                debug!(
                    target: "huddle.peer.link",
                    remote_id = %self.remote_id,
                    queued = self.candidate_queue.len(),
                    "Candidate queued before remote description"
                );
                Vec::new()
            }
        }
    }

    /// Begin a fresh exchange on an open link (local media changed).
    pub fn restart(&mut self) {
        if self.state == LinkState::Closed {
            return;
        }
        self.state = LinkState::Negotiating;
        self.initiator = true;
        self.remote_description_set = false;
    }

    /// Tear the link down. Queued candidates are discarded.
    pub fn close(&mut self) {
        self.state = LinkState::Closed;
        self.candidate_queue.clear();
    }

    /// Drain the queue in arrival order, exactly once per candidate.
    fn flush_candidates(&mut self) -> Vec<LinkAction> {
        self.candidate_queue
            .drain(..)
            .map(|candidate| LinkAction::ApplyCandidate { candidate })
            .collect()
    }
}
