//! Health endpoints for the coordinator.
//!
//! Kubernetes-compatible probes plus a small operator endpoint:
//! - `GET /health` - liveness (is the process running?)
//! - `GET /ready`  - readiness (are we accepting new joins?)
//! - `GET /status` - session and participant counts
//!
//! Readiness goes false when draining starts, so a load balancer stops
//! routing new clients here while existing sessions wind down.

use crate::actors::RegistryActorHandle;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use axum::Router;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Health state for the coordinator.
#[derive(Debug)]
pub struct HealthState {
    /// Whether the process is running. Always true after startup.
    live: AtomicBool,
    /// Whether new joins are being accepted.
    ready: AtomicBool,
}

impl Default for HealthState {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthState {
    /// Create a new health state (live=true, ready=false).
    #[must_use]
    pub fn new() -> Self {
        Self {
            live: AtomicBool::new(true),
            ready: AtomicBool::new(false),
        }
    }

    /// Mark the service as ready to serve traffic.
    pub fn set_ready(&self) {
        self.ready.store(true, Ordering::SeqCst);
    }

    /// Mark the service as not ready (draining or shutting down).
    pub fn set_not_ready(&self) {
        self.ready.store(false, Ordering::SeqCst);
    }

    /// Check if the service is live.
    #[must_use]
    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }

    /// Check if the service is ready.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }
}

/// Shared state for the health routes.
#[derive(Clone)]
pub struct HealthRouterState {
    health: Arc<HealthState>,
    registry: RegistryActorHandle,
    instance_id: String,
}

#[derive(Debug, Serialize)]
struct StatusBody {
    instance_id: String,
    sessions: usize,
    participants: usize,
    draining: bool,
}

/// Create the health router.
pub fn health_router(
    health: Arc<HealthState>,
    registry: RegistryActorHandle,
    instance_id: String,
) -> Router {
    Router::new()
        .route("/health", get(liveness_handler))
        .route("/ready", get(readiness_handler))
        .route("/status", get(status_handler))
        .with_state(HealthRouterState {
            health,
            registry,
            instance_id,
        })
}

/// Liveness probe handler.
async fn liveness_handler(State(state): State<HealthRouterState>) -> StatusCode {
    if state.health.is_live() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

/// Readiness probe handler. 503 while draining or before startup
/// completes.
async fn readiness_handler(State(state): State<HealthRouterState>) -> StatusCode {
    if state.health.is_ready() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

/// Operator status: live session and participant counts.
async fn status_handler(State(state): State<HealthRouterState>) -> Response {
    match state.registry.status().await {
        Ok(status) => Json(StatusBody {
            instance_id: state.instance_id.clone(),
            sessions: status.session_count,
            participants: status.participant_count,
            draining: status.is_draining,
        })
        .into_response(),
        Err(_) => StatusCode::SERVICE_UNAVAILABLE.into_response(),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::actors::{ActorMetrics, RegistryActor};
    use crate::schedule::StaticSchedule;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;
    use tower::ServiceExt;

    fn test_router(health: Arc<HealthState>) -> Router {
        let (registry, _task) = RegistryActor::spawn(
            Arc::new(StaticSchedule::open()),
            Duration::from_secs(30),
            CancellationToken::new(),
            ActorMetrics::new(),
        );
        health_router(health, registry, "huddle-test-001".to_string())
    }

    #[test]
    fn test_health_state_default() {
        let state = HealthState::new();
        assert!(state.is_live());
        assert!(!state.is_ready());
    }

    #[test]
    fn test_health_state_toggles() {
        let state = HealthState::new();
        state.set_ready();
        assert!(state.is_ready());
        state.set_not_ready();
        assert!(!state.is_ready());
    }

    #[tokio::test]
    async fn test_liveness_returns_ok() {
        let router = test_router(Arc::new(HealthState::new()));
        let response = router
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_readiness_tracks_state() {
        let health = Arc::new(HealthState::new());
        let router = test_router(Arc::clone(&health));

        let response = router
            .clone()
            .oneshot(Request::get("/ready").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        health.set_ready();
        let response = router
            .oneshot(Request::get("/ready").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_status_reports_counts() {
        let router = test_router(Arc::new(HealthState::new()));
        let response = router
            .oneshot(Request::get("/status").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = response.into_body().collect().await.unwrap().to_bytes();
        let parsed: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(parsed["sessions"], 0);
        assert_eq!(parsed["participants"], 0);
        assert_eq!(parsed["draining"], false);
        assert_eq!(parsed["instance_id"], "huddle-test-001");
    }
}
