//! Huddle Coordinator Service Binary
//!
//! Startup sequence:
//!
//! 1. Initialize tracing
//! 2. Load configuration from environment
//! 3. Spawn the actor system (registry)
//! 4. Spawn the lifecycle monitor
//! 5. Serve the WebSocket endpoint and health routes on one listener
//! 6. On SIGINT/SIGTERM: mark not-ready, drain, cancel, bounded wait

use std::sync::Arc;
use std::time::Duration;

use huddle_coordinator::actors::{ActorMetrics, RegistryActor};
use huddle_coordinator::config::Config;
use huddle_coordinator::lifecycle::{LifecycleMonitor, LifecycleSettings};
use huddle_coordinator::observability::{health_router, HealthState};
use huddle_coordinator::recording::NoopRecording;
use huddle_coordinator::schedule::StaticSchedule;
use huddle_coordinator::ws::ws_router;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Bounded wait for in-flight work after cancellation.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "huddle_coordinator=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Huddle Coordinator");

    // Load configuration
    let config = Config::from_env().map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    info!(
        instance_id = %config.instance_id,
        bind_address = %config.bind_address,
        sweep_interval_secs = config.sweep_interval.as_secs(),
        idle_timeout_secs = config.idle_timeout.as_secs(),
        window_grace_secs = config.window_grace.as_secs(),
        "Configuration loaded successfully"
    );

    let shutdown_token = CancellationToken::new();
    let health_state = Arc::new(HealthState::new());
    let metrics = ActorMetrics::new();

    // The schedule provider and recording control are deployment seams;
    // the defaults are an open schedule and no recording pipeline.
    let schedule = Arc::new(StaticSchedule::open());
    let recording = Arc::new(NoopRecording);

    // Spawn the actor system
    let (registry, registry_task) = RegistryActor::spawn(
        schedule,
        config.window_grace,
        shutdown_token.child_token(),
        Arc::clone(&metrics),
    );
    info!("Registry actor started");

    // Spawn the lifecycle monitor
    let lifecycle_task = LifecycleMonitor::spawn(
        registry.clone(),
        recording,
        LifecycleSettings {
            sweep_interval: config.sweep_interval,
            idle_timeout: config.idle_timeout,
            window_grace: config.window_grace,
            recording_flush_timeout: config.recording_flush_timeout,
        },
        shutdown_token.child_token(),
    );
    info!("Lifecycle monitor started");

    // One listener serves both the signaling endpoint and the probes.
    let app = ws_router(registry.clone())
        .merge(health_router(
            Arc::clone(&health_state),
            registry.clone(),
            config.instance_id.clone(),
        ))
        .layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(&config.bind_address)
        .await
        .map_err(|e| {
            error!(error = %e, addr = %config.bind_address, "Failed to bind listener");
            format!("Failed to bind {}: {e}", config.bind_address)
        })?;
    info!(addr = %config.bind_address, "Listener bound successfully");

    let server_token = shutdown_token.child_token();
    let server_task = tokio::spawn(async move {
        let shutdown = async move { server_token.cancelled().await };
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await
        {
            error!(error = %e, "Server error");
        }
    });

    health_state.set_ready();
    info!("Huddle Coordinator running - press Ctrl+C to shutdown");

    shutdown_signal().await;
    info!("Shutdown signal received, initiating graceful shutdown...");

    // Stop admitting new joins before tearing anything down.
    health_state.set_not_ready();
    if let Err(e) = registry.drain().await {
        warn!(error = %e, "Drain request failed");
    }

    shutdown_token.cancel();

    if tokio::time::timeout(SHUTDOWN_GRACE, async {
        let _ = registry_task.await;
        let _ = lifecycle_task.await;
        let _ = server_task.await;
    })
    .await
    .is_err()
    {
        warn!("Shutdown grace period elapsed with tasks still running");
    }

    info!(
        sessions_force_closed = metrics.force_closes_total(),
        messages_relayed = metrics.messages_relayed_total(),
        "Huddle Coordinator shutdown complete"
    );
    Ok(())
}

/// Wait for SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        #[expect(
            clippy::expect_used,
            reason = "Signal handler installation is critical - panic is appropriate if it fails"
        )]
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        #[expect(
            clippy::expect_used,
            reason = "Signal handler installation is critical - panic is appropriate if it fails"
        )]
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
