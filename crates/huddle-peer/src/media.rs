//! Local media acquisition seam.
//!
//! Device and capture acquisition is async and can fail (permission
//! denied, device unplugged, capture cancelled). The manager treats a
//! failure as "participant stays linkless": no retries, no effect on
//! other peers.

use crate::PeerError;

use async_trait::async_trait;
use huddle_protocol::MediaStatus;

/// What to acquire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MediaConstraints {
    pub video: bool,
    pub audio: bool,
    /// Capture the screen instead of the camera.
    pub screen: bool,
}

impl MediaConstraints {
    /// Camera plus microphone.
    #[must_use]
    pub const fn camera() -> Self {
        Self {
            video: true,
            audio: true,
            screen: false,
        }
    }

    /// Screen capture plus microphone.
    #[must_use]
    pub const fn screen_share() -> Self {
        Self {
            video: true,
            audio: true,
            screen: true,
        }
    }
}

/// An acquired local stream, reduced to what negotiation needs to know.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalStream {
    pub video_enabled: bool,
    pub audio_enabled: bool,
    pub screen_sharing: bool,
}

impl LocalStream {
    /// The presence payload announcing this stream.
    #[must_use]
    pub fn status(&self) -> MediaStatus {
        MediaStatus {
            camera_on: self.video_enabled && !self.screen_sharing,
            mic_on: self.audio_enabled,
            screen_sharing: self.screen_sharing,
        }
    }

    /// Toggle the outgoing video track.
    pub fn set_video_enabled(&mut self, enabled: bool) {
        self.video_enabled = enabled;
    }

    /// Toggle the outgoing audio track.
    pub fn set_audio_enabled(&mut self, enabled: bool) {
        self.audio_enabled = enabled;
    }
}

/// Async device acquisition.
#[async_trait]
pub trait MediaSource: Send + Sync {
    /// Acquire a local stream matching the constraints.
    async fn acquire(&self, constraints: MediaConstraints) -> Result<LocalStream, PeerError>;
}

/// Test and headless stand-in that always succeeds.
#[derive(Debug, Default, Clone, Copy)]
pub struct FixedMediaSource;

#[async_trait]
impl MediaSource for FixedMediaSource {
    async fn acquire(&self, constraints: MediaConstraints) -> Result<LocalStream, PeerError> {
        Ok(LocalStream {
            video_enabled: constraints.video,
            audio_enabled: constraints.audio,
            screen_sharing: constraints.screen,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fixed_source_mirrors_constraints() {
        let stream = FixedMediaSource
            .acquire(MediaConstraints::screen_share())
            .await
            .unwrap();
        assert!(stream.screen_sharing);

        let status = stream.status();
        assert!(status.screen_sharing);
        assert!(!status.camera_on);
        assert!(status.mic_on);
    }
}
