//! Wire protocol for Huddle signaling.
//!
//! This crate defines the JSON messages exchanged between clients and the
//! coordinator. Tags are kebab-case and fields camelCase to stay
//! compatible with existing web clients.

#![warn(clippy::pedantic)]

pub mod messages;

pub use messages::{ClientMessage, HandshakeKind, MediaStatus, PeerInfo, ServerEvent};
