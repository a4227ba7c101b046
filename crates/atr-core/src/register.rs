//! Register configuration: which courses are tracked and under what rules.

use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::types::{CategoryId, CourseId, RegisterId, ValidationError};

/// Average timeout between a user's requests to be considered part of the
/// same session, in minutes.
pub const DEFAULT_SESSION_TIMEOUT_MINS: u32 = 30;

/// Max number of days back a user may self-certify an offline session.
pub const DEFAULT_DAYS_CERTIFIABLE: u32 = 10;

/// Default completion threshold when completion tracking is enabled: 1h.
pub const DEFAULT_COMPLETION_TOTAL_DURATION_MINS: u32 = 60;

/// Which courses a register tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "snake_case")]
pub enum RegisterScope {
    /// A single course.
    Course(CourseId),
    /// Every course in a category.
    Category(CategoryId),
    /// A course plus all courses meta-linked into it.
    MetaLinked(CourseId),
    /// Every course on the site.
    Global,
}

impl RegisterScope {
    /// Returns the string representation for storage.
    #[must_use]
    pub const fn type_str(&self) -> &'static str {
        match self {
            Self::Course(_) => "course",
            Self::Category(_) => "category",
            Self::MetaLinked(_) => "meta",
            Self::Global => "global",
        }
    }

    /// Rebuilds a scope from its stored `(type, reference-id)` pair.
    pub fn from_parts(kind: &str, reference: Option<i64>) -> Result<Self, ValidationError> {
        match (kind, reference) {
            ("course", Some(id)) => Ok(Self::Course(CourseId::new(id)?)),
            ("category", Some(id)) => Ok(Self::Category(CategoryId::new(id)?)),
            ("meta", Some(id)) => Ok(Self::MetaLinked(CourseId::new(id)?)),
            ("global", _) => Ok(Self::Global),
            _ => Err(ValidationError::InvalidRegisterScope {
                value: kind.to_string(),
            }),
        }
    }

    /// The stored reference id, if the scope carries one.
    #[must_use]
    pub const fn reference(&self) -> Option<i64> {
        match self {
            Self::Course(id) | Self::MetaLinked(id) => Some(id.get()),
            Self::Category(id) => Some(id.get()),
            Self::Global => None,
        }
    }
}

/// A register instance: one tracked-attendance configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Register {
    pub id: RegisterId,
    pub name: String,
    pub scope: RegisterScope,
    /// Inactivity gap (minutes) that closes a session.
    pub session_timeout_mins: u32,
    /// How many days back an offline session may be certified.
    pub days_certifiable: u32,
    /// Whether self-certified offline sessions are accepted.
    pub offline_sessions: bool,
    /// Whether offline sessions may carry a free-text comment.
    pub offline_comments: bool,
    /// Whether the comment is mandatory.
    pub mandatory_offline_comments: bool,
    /// Whether offline sessions may name a reference course.
    pub offline_specify_course: bool,
    /// Whether the reference course is mandatory.
    pub mandatory_offline_course: bool,
    /// Total-duration completion threshold in minutes; `None` disables
    /// completion tracking.
    pub completion_total_duration_mins: Option<u32>,
    /// Set when a full recalculation has been scheduled for the next
    /// periodic run.
    pub pending_recalc: bool,
}

impl Register {
    /// The session timeout as a duration.
    #[must_use]
    pub fn session_timeout(&self) -> Duration {
        Duration::minutes(i64::from(self.session_timeout_mins))
    }

    /// Whether any completion condition is configured.
    ///
    /// Any completion check must go through this accessor: a zero threshold
    /// counts as disabled.
    #[must_use]
    pub fn completion_enabled(&self) -> bool {
        self.completion_total_duration_mins.is_some_and(|mins| mins > 0)
    }
}

/// Register settings as submitted on creation or edit, before an id exists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterSettings {
    pub name: String,
    pub scope: RegisterScope,
    pub session_timeout_mins: u32,
    pub days_certifiable: u32,
    pub offline_sessions: bool,
    pub offline_comments: bool,
    pub mandatory_offline_comments: bool,
    pub offline_specify_course: bool,
    pub mandatory_offline_course: bool,
    pub completion_total_duration_mins: Option<u32>,
}

impl RegisterSettings {
    /// New settings with the stock defaults for the given name and scope.
    #[must_use]
    pub fn new(name: impl Into<String>, scope: RegisterScope) -> Self {
        Self {
            name: name.into(),
            scope,
            session_timeout_mins: DEFAULT_SESSION_TIMEOUT_MINS,
            days_certifiable: DEFAULT_DAYS_CERTIFIABLE,
            offline_sessions: false,
            offline_comments: true,
            mandatory_offline_comments: false,
            offline_specify_course: false,
            mandatory_offline_course: false,
            completion_total_duration_mins: None,
        }
    }
}
