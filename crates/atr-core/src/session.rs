//! Attendance sessions: derived or self-certified activity intervals.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{CourseId, RegisterId, SessionId, UserId, ValidationError};

/// How a session came to exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SessionKind {
    /// Derived from the activity log by the segmentation engine.
    #[default]
    Online,
    /// Self-certified by the user (or a proxy) through the offline workflow.
    Offline,
}

impl SessionKind {
    /// Returns the string representation for storage.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Online => "online",
            Self::Offline => "offline",
        }
    }

    #[must_use]
    pub const fn is_online(&self) -> bool {
        matches!(self, Self::Online)
    }
}

impl std::fmt::Display for SessionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SessionKind {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "online" => Ok(Self::Online),
            "offline" => Ok(Self::Offline),
            _ => Err(ValidationError::InvalidSessionKind {
                value: s.to_string(),
            }),
        }
    }
}

/// A stored attendance session.
///
/// Immutable once written: recalculation deletes and re-derives online rows
/// rather than patching them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub register: RegisterId,
    pub user: UserId,
    pub login: DateTime<Utc>,
    pub logout: DateTime<Utc>,
    pub kind: SessionKind,
    /// Reference course named on an offline session, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ref_course: Option<CourseId>,
    /// Free-text comment on an offline session.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comments: Option<String>,
    /// Submitter, when an offline session was certified on the user's behalf.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub added_by: Option<UserId>,
}

impl Session {
    /// Session length in whole seconds.
    #[must_use]
    pub fn duration_secs(&self) -> i64 {
        self.logout.signed_duration_since(self.login).num_seconds()
    }
}

/// A session interval produced by segmentation or offline submission,
/// not yet persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionInterval {
    pub login: DateTime<Utc>,
    pub logout: DateTime<Utc>,
}

impl SessionInterval {
    /// Builds an interval, rejecting `logout < login`.
    ///
    /// `logout == login` is allowed: a single isolated activity timestamp
    /// yields a zero-duration session.
    pub fn new(login: DateTime<Utc>, logout: DateTime<Utc>) -> Result<Self, ValidationError> {
        if logout < login {
            return Err(ValidationError::LogoutBeforeLogin { login, logout });
        }
        Ok(Self { login, logout })
    }

    #[must_use]
    pub fn duration_secs(&self) -> i64 {
        self.logout.signed_duration_since(self.login).num_seconds()
    }
}
