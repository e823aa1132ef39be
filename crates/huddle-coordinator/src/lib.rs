//! Huddle Coordinator Library
//!
//! The coordinator is a WebSocket signaling and session-lifecycle server
//! for small-group video conferences. Media flows peer to peer; the
//! coordinator is the control plane:
//!
//! - Session membership and presence (who is in which session)
//! - Targeted relay of connection-handshake messages between peers
//! - Join-time authorization against a session schedule
//! - Moderation (eviction) and lifecycle enforcement (window expiry,
//!   idle timeout, forced closure)
//!
//! # Architecture
//!
//! The coordinator uses an actor model hierarchy:
//!
//! ```text
//! RegistryActor (singleton per coordinator instance)
//! └── supervises N SessionActors
//!     └── SessionActor (one per live session)
//!         ├── owns membership, roles, and presence state
//!         └── supervises N ConnectionActors
//!             └── ConnectionActor (one per WebSocket connection)
//! ```
//!
//! A separate lifecycle monitor task sweeps sessions on an interval and
//! force-closes the expired ones through registry handles.
//!
//! # Key Design Decisions
//!
//! - **Connection-scoped ids**: a participant id lives exactly as long
//!   as its socket; reconnects are new participants
//! - **One session per participant**: joining a second session leaves
//!   the first
//! - **Single-writer sessions**: all state for a session is owned by its
//!   actor, so ordering needs no locks
//! - **Fail-closed admission**: a schedule outage denies joins rather
//!   than admitting blindly
//!
//! # Modules
//!
//! - [`actors`] - Actor model implementation
//! - [`config`] - Service configuration from environment
//! - [`errors`] - Error types with wire error codes
//! - [`lifecycle`] - Expiry sweep task
//! - [`schedule`] - Join-time authorization
//! - [`ws`] - WebSocket transport

pub mod actors;
pub mod config;
pub mod errors;
pub mod lifecycle;
pub mod observability;
pub mod recording;
pub mod schedule;
pub mod ws;
