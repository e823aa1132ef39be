//! Lifecycle monitor - periodic sweep that ends expired sessions.
//!
//! The monitor holds a registry handle and nothing else; it learns about
//! sessions only through the registry's `ListSessions`, so it never races
//! the registry on ownership of session state. Each sweep takes a
//! snapshot of every live session and force-closes the expired ones:
//! windowed sessions whose authorized window (plus grace) has elapsed,
//! regardless of how much traffic they are still carrying, and ad-hoc
//! sessions that have gone idle.
//!
//! Before a forced disconnect the monitor gives the recording pipeline a
//! bounded chance to stop and flush, so an in-flight recording is not
//! truncated. The disconnect proceeds either way.

use crate::actors::messages::SessionSnapshot;
use crate::actors::{RegistryActorHandle, SessionActorHandle};
use crate::recording::RecordingControl;

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Why a session is being force-closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ExpiryReason {
    WindowElapsed,
    IdleTimeout,
}

impl ExpiryReason {
    const fn as_str(self) -> &'static str {
        match self {
            ExpiryReason::WindowElapsed => "window elapsed",
            ExpiryReason::IdleTimeout => "idle timeout",
        }
    }
}

/// Tunables for the lifecycle sweep, taken from [`crate::config::Config`].
#[derive(Debug, Clone, Copy)]
pub struct LifecycleSettings {
    /// Time between sweeps.
    pub sweep_interval: Duration,
    /// Idle bound for ad-hoc sessions.
    pub idle_timeout: Duration,
    /// Grace margin applied at both edges of an authorized window.
    pub window_grace: Duration,
    /// Bound on the recording stop-and-flush wait.
    pub recording_flush_timeout: Duration,
}

/// The lifecycle monitor task.
pub struct LifecycleMonitor {
    registry: RegistryActorHandle,
    recording: Arc<dyn RecordingControl>,
    settings: LifecycleSettings,
    cancel_token: CancellationToken,
}

impl LifecycleMonitor {
    /// Spawn the monitor. It runs until the token is cancelled.
    pub fn spawn(
        registry: RegistryActorHandle,
        recording: Arc<dyn RecordingControl>,
        settings: LifecycleSettings,
        cancel_token: CancellationToken,
    ) -> JoinHandle<()> {
        let monitor = Self {
            registry,
            recording,
            settings,
            cancel_token,
        };
        tokio::spawn(monitor.run())
    }

    #[instrument(skip_all, name = "huddle.lifecycle")]
    async fn run(self) {
        info!(
            target: "huddle.lifecycle",
            sweep_interval_secs = self.settings.sweep_interval.as_secs(),
            idle_timeout_secs = self.settings.idle_timeout.as_secs(),
            "Lifecycle monitor started"
        );

        let mut sweep = tokio::time::interval(self.settings.sweep_interval);
        sweep.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // The immediate first tick would sweep before anything can exist.
        sweep.tick().await;

        loop {
            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    info!(target: "huddle.lifecycle", "Lifecycle monitor stopped");
                    break;
                }

                _ = sweep.tick() => {
                    self.sweep_sessions().await;
                }
            }
        }
    }

    async fn sweep_sessions(&self) {
        let sessions = match self.registry.list_sessions().await {
            Ok(sessions) => sessions,
            Err(e) => {
                warn!(target: "huddle.lifecycle", error = %e, "Session listing failed");
                return;
            }
        };

        debug!(
            target: "huddle.lifecycle",
            session_count = sessions.len(),
            "Sweeping sessions"
        );

        for session in sessions {
            // The session may have emptied out and exited since listing.
            let Ok(snapshot) = session.snapshot().await else {
                continue;
            };

            if let Some(reason) = self.expiry_reason(&snapshot) {
                self.close_session(&session, &snapshot, reason).await;
            }
        }
    }

    fn expiry_reason(&self, snapshot: &SessionSnapshot) -> Option<ExpiryReason> {
        if let Some(window) = snapshot.window {
            // Relay traffic does not extend a window; only the wall
            // clock matters here.
            if !window.contains_with_grace(Utc::now(), self.settings.window_grace) {
                return Some(ExpiryReason::WindowElapsed);
            }
            return None;
        }

        if snapshot.participant_count > 0 && snapshot.idle >= self.settings.idle_timeout {
            return Some(ExpiryReason::IdleTimeout);
        }
        None
    }

    async fn close_session(
        &self,
        session: &SessionActorHandle,
        snapshot: &SessionSnapshot,
        reason: ExpiryReason,
    ) {
        info!(
            target: "huddle.lifecycle",
            session_id = %snapshot.session_id,
            participant_count = snapshot.participant_count,
            reason = reason.as_str(),
            "Force-closing expired session"
        );

        // The recording pipeline is driven by a moderator's client, so
        // only a session holding one can have a recording to flush.
        if snapshot.has_moderator && self.recording.is_active(&snapshot.session_id).await {
            let flush = self.recording.stop_and_flush(&snapshot.session_id);
            match tokio::time::timeout(self.settings.recording_flush_timeout, flush).await {
                Ok(Ok(())) => {
                    debug!(
                        target: "huddle.lifecycle",
                        session_id = %snapshot.session_id,
                        "Recording flushed"
                    );
                }
                Ok(Err(e)) => {
                    warn!(
                        target: "huddle.lifecycle",
                        session_id = %snapshot.session_id,
                        error = %e,
                        "Recording flush failed, closing anyway"
                    );
                }
                Err(_) => {
                    warn!(
                        target: "huddle.lifecycle",
                        session_id = %snapshot.session_id,
                        "Recording flush timed out, closing anyway"
                    );
                }
            }
        }

        if let Err(e) = session.force_close().await {
            warn!(
                target: "huddle.lifecycle",
                session_id = %snapshot.session_id,
                error = %e,
                "Force-close failed"
            );
        }
    }
}
