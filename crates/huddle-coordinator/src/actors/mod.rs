//! Actor hierarchy for the coordinator.
//!
//! One `RegistryActor` supervises a `SessionActor` per live session,
//! and each session owns a `ConnectionActor` per resident participant.
//! Cancellation tokens flow parent to child, so stopping the registry
//! stops everything underneath it.

pub mod connection;
pub mod messages;
pub mod metrics;
pub mod registry;
pub mod session;

pub use connection::{ConnectionActor, ConnectionActorHandle};
pub use messages::{JoinResult, RegistryStatus, SessionSnapshot};
pub use metrics::ActorMetrics;
pub use registry::{RegistryActor, RegistryActorHandle};
pub use session::{SessionActor, SessionActorHandle};
