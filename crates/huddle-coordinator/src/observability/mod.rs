//! Observability: health probes and operator status.

pub mod health;

pub use health::{health_router, HealthState};
