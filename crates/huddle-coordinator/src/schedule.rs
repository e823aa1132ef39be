//! Authorization input: scheduled session windows and allow-lists.
//!
//! The scheduling service is an external collaborator. The coordinator
//! only ever sees it through [`ScheduleProvider`], and any failure to
//! validate against it is a hard deny (fail closed), never fail open.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::RwLock;

/// The `[start, end)` interval during which a scheduled session may run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccessWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl AccessWindow {
    #[must_use]
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    /// Whether `now` falls within `[start - grace, end + grace)`.
    #[must_use]
    pub fn contains_with_grace(&self, now: DateTime<Utc>, grace: Duration) -> bool {
        let grace = chrono::Duration::from_std(grace).unwrap_or_else(|_| chrono::Duration::zero());
        now >= self.start - grace && now < self.end + grace
    }
}

/// Role granted to a participant at join time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Regular participant.
    Ordinary,
    /// May evict participants and drive the recording pipeline.
    Moderator,
}

/// Outcome of a successful authorization lookup.
#[derive(Debug, Clone)]
pub struct Authorization {
    /// Authorized window, absent for ad-hoc sessions.
    pub window: Option<AccessWindow>,
    /// Role granted to this identity in this session.
    pub role: Role,
}

#[derive(Debug, Error)]
pub enum ScheduleError {
    /// The identity is not permitted in this session.
    #[error("denied: {0}")]
    Denied(String),

    /// The scheduling service could not be consulted. Callers must treat
    /// this the same as a deny.
    #[error("schedule unavailable: {0}")]
    Unavailable(String),
}

/// Authorization source for session joins.
#[async_trait]
pub trait ScheduleProvider: Send + Sync {
    /// Authorize `user_name` to join `session_id`, returning the session's
    /// window (if scheduled) and the role granted to this identity.
    async fn authorize(
        &self,
        session_id: &str,
        user_name: &str,
    ) -> Result<Authorization, ScheduleError>;
}

/// Per-session schedule entry for [`StaticSchedule`].
#[derive(Debug, Clone, Default)]
pub struct SessionSchedule {
    /// Authorized window; `None` makes the session ad-hoc.
    pub window: Option<AccessWindow>,
    /// Identities permitted to join; `None` admits everyone.
    pub allow_list: Option<Vec<String>>,
    /// Identities granted the moderator role.
    pub moderators: Vec<String>,
}

/// In-memory schedule, used for ad-hoc deployments and tests.
///
/// Sessions without an entry are ad-hoc: no window, everyone admitted as
/// ordinary participants.
#[derive(Debug, Default, Clone)]
pub struct StaticSchedule {
    entries: Arc<RwLock<HashMap<String, SessionSchedule>>>,
}

impl StaticSchedule {
    /// An open schedule: every session is ad-hoc.
    #[must_use]
    pub fn open() -> Self {
        Self::default()
    }

    /// Insert or replace the schedule entry for a session.
    pub async fn set(&self, session_id: impl Into<String>, schedule: SessionSchedule) {
        self.entries
            .write()
            .await
            .insert(session_id.into(), schedule);
    }
}

#[async_trait]
impl ScheduleProvider for StaticSchedule {
    async fn authorize(
        &self,
        session_id: &str,
        user_name: &str,
    ) -> Result<Authorization, ScheduleError> {
        let entries = self.entries.read().await;
        let Some(entry) = entries.get(session_id) else {
            return Ok(Authorization {
                window: None,
                role: Role::Ordinary,
            });
        };

        if let Some(allow) = &entry.allow_list {
            if !allow.iter().any(|name| name == user_name) {
                return Err(ScheduleError::Denied(
                    "not on the session allow-list".to_string(),
                ));
            }
        }

        let role = if entry.moderators.iter().any(|name| name == user_name) {
            Role::Moderator
        } else {
            Role::Ordinary
        };

        Ok(Authorization {
            window: entry.window,
            role,
        })
    }
}
