//! Recording pipeline touchpoint.
//!
//! The recording pipeline is driven entirely by a moderator's client; the
//! coordinator's only obligation is ordering: before force-disconnecting a
//! session it attempts the pipeline's stop-and-flush, bounded by a
//! timeout, so an in-flight recording is not truncated mid-write. The
//! disconnect proceeds even if the flush fails or times out - a session
//! must never become unkillable.

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RecordingError {
    #[error("flush failed: {0}")]
    Flush(String),
}

/// Narrow interface onto the recording pipeline.
#[async_trait]
pub trait RecordingControl: Send + Sync {
    /// Whether a recording is active for the given session.
    async fn is_active(&self, session_id: &str) -> bool;

    /// Stop the pipeline for the session and flush buffered output.
    async fn stop_and_flush(&self, session_id: &str) -> Result<(), RecordingError>;
}

/// Default implementation for deployments without a recording pipeline.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopRecording;

#[async_trait]
impl RecordingControl for NoopRecording {
    async fn is_active(&self, _session_id: &str) -> bool {
        false
    }

    async fn stop_and_flush(&self, _session_id: &str) -> Result<(), RecordingError> {
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_noop_recording_is_never_active() {
        let recording = NoopRecording;
        assert!(!recording.is_active("s-1").await);
        assert!(recording.stop_and_flush("s-1").await.is_ok());
    }
}
