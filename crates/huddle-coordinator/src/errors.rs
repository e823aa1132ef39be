//! Coordinator error types.
//!
//! Error variants map to wire `error` codes for client responses. Internal
//! details are logged server-side but never exposed to clients.

use thiserror::Error;

/// Coordinator error type.
///
/// Wire code mapping:
/// - `JoinDenied`, `Schedule`: `UNAUTHORIZED` (2)
/// - `PermissionDenied`: `FORBIDDEN` (3)
/// - `SessionNotFound`, `NotResident`: `NOT_FOUND` (4)
/// - `Config`, `Internal`: `INTERNAL_ERROR` (6)
/// - `Draining`: `UNAVAILABLE` (7)
#[derive(Debug, Error)]
pub enum CoordinatorError {
    /// Join refused: outside the authorized window or not on the
    /// allow-list. Fail closed - no session state was created.
    #[error("Join denied: {0}")]
    JoinDenied(String),

    /// Schedule provider failed. Treated as a deny at join time.
    #[error("Schedule lookup failed: {0}")]
    Schedule(String),

    /// Requester lacks the moderator role for the operation.
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Session not found.
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    /// The participant is not resident in any session.
    #[error("Participant not resident")]
    NotResident,

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Coordinator is shutting down.
    #[error("Coordinator is draining")]
    Draining,

    /// Internal error (channel failures and the like).
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoordinatorError {
    /// Returns the wire error code for this error.
    #[must_use]
    pub fn error_code(&self) -> i32 {
        match self {
            CoordinatorError::JoinDenied(_) | CoordinatorError::Schedule(_) => 2,
            CoordinatorError::PermissionDenied(_) => 3,
            CoordinatorError::SessionNotFound(_) | CoordinatorError::NotResident => 4,
            CoordinatorError::Config(_) | CoordinatorError::Internal(_) => 6,
            CoordinatorError::Draining => 7,
        }
    }

    /// Returns a client-safe error message (no internal details).
    #[must_use]
    pub fn client_message(&self) -> String {
        match self {
            CoordinatorError::JoinDenied(reason) => reason.clone(),
            CoordinatorError::Schedule(_) => "Session is not available".to_string(),
            CoordinatorError::PermissionDenied(msg) => msg.clone(),
            CoordinatorError::SessionNotFound(_) => "Session not found".to_string(),
            CoordinatorError::NotResident => "Not in a session".to_string(),
            CoordinatorError::Config(_) | CoordinatorError::Internal(_) => {
                "An internal error occurred".to_string()
            }
            CoordinatorError::Draining => "Server is shutting down".to_string(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_mapping() {
        assert_eq!(
            CoordinatorError::JoinDenied("closed".to_string()).error_code(),
            2
        );
        assert_eq!(
            CoordinatorError::Schedule("timeout".to_string()).error_code(),
            2
        );
        assert_eq!(
            CoordinatorError::PermissionDenied("not a moderator".to_string()).error_code(),
            3
        );
        assert_eq!(
            CoordinatorError::SessionNotFound("s-1".to_string()).error_code(),
            4
        );
        assert_eq!(CoordinatorError::NotResident.error_code(), 4);
        assert_eq!(
            CoordinatorError::Internal("channel closed".to_string()).error_code(),
            6
        );
        assert_eq!(CoordinatorError::Draining.error_code(), 7);
    }

    #[test]
    fn test_client_messages_hide_internal_details() {
        let err = CoordinatorError::Internal("mpsc send failed at session s-42".to_string());
        assert!(!err.client_message().contains("s-42"));
        assert_eq!(err.client_message(), "An internal error occurred");

        let err = CoordinatorError::Schedule("db at 10.0.0.3 unreachable".to_string());
        assert!(!err.client_message().contains("10.0.0.3"));
    }

    #[test]
    fn test_display_formatting() {
        assert_eq!(
            format!(
                "{}",
                CoordinatorError::JoinDenied("outside authorized window".to_string())
            ),
            "Join denied: outside authorized window"
        );
    }
}
