//! Huddle Peer Library
//!
//! Client-side negotiation logic for a Huddle session, kept free of any
//! WebRTC binding so it is testable on its own. The embedder (a native
//! client or a WASM shell) owns the actual peer connections and the
//! socket; this crate owns the decisions:
//!
//! - [`link::PeerLink`] - per-remote negotiation state machine with a
//!   FIFO candidate queue
//! - [`manager::PeerLinkManager`] - the roster-driven layer above the
//!   links: who to offer to, what to defer while media is not ready,
//!   and how to react to coordinator events
//! - [`media::MediaSource`] - async device acquisition seam
//!
//! Inputs are typed events; outputs are typed commands the embedder
//! executes against its WebRTC stack and its socket.

pub mod link;
pub mod manager;
pub mod media;

pub use link::{LinkAction, LinkState, PeerLink};
pub use manager::{Command, PeerLinkManager};
pub use media::{LocalStream, MediaConstraints, MediaSource};

use thiserror::Error;

/// Peer-side error type.
#[derive(Debug, Error)]
pub enum PeerError {
    /// Device or capture acquisition failed. The participant stays in
    /// the session without media links; other peers are unaffected.
    #[error("media acquisition failed: {0}")]
    MediaAcquisition(String),

    /// An operation referenced a remote with no link.
    #[error("no link for remote {0}")]
    UnknownLink(String),
}
