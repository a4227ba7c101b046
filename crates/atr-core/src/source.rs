//! Contracts for the external collaborators the engines depend on.
//!
//! The engines never touch the site's user directory or activity log
//! directly; they go through these traits so deployments can back them with
//! whatever log store and directory service they have.

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::register::Register;
use crate::types::{CourseId, GroupId, RegisterId, UserId};

/// Collaborator failures.
#[derive(Debug, Error)]
pub enum SourceError {
    /// The referenced user does not exist.
    #[error("user {user} not found")]
    UserNotFound { user: UserId },
    /// The collaborator could not be reached or answered malformed data.
    #[error("collaborator unavailable: {0}")]
    Unavailable(String),
}

/// A user record as the directory exposes it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserRecord {
    pub id: UserId,
    pub display_name: String,
    /// Most recent site activity, absent for users who never logged in.
    pub last_access: Option<DateTime<Utc>>,
    /// Start of the user's current (or most recent) login.
    pub current_login: Option<DateTime<Utc>>,
    pub group: Option<GroupId>,
}

/// Supplies raw activity timestamps for segmentation.
pub trait EventSource {
    /// Returns the user's activity timestamps within the given courses,
    /// ascending, strictly after `after` (`None` = from the beginning).
    fn activity_timestamps(
        &self,
        user: UserId,
        after: Option<DateTime<Utc>>,
        courses: &[CourseId],
    ) -> Result<Vec<DateTime<Utc>>, SourceError>;

    /// The user's oldest activity timestamp anywhere on the site, used to
    /// bound deletion during forced recalculation.
    fn oldest_activity(&self, user: UserId) -> Result<Option<DateTime<Utc>>, SourceError>;
}

/// User and course directory.
pub trait Directory {
    /// Loads a user record; fails with [`SourceError::UserNotFound`].
    fn user(&self, user: UserId) -> Result<UserRecord, SourceError>;

    /// Users eligible for tracking under the register, optionally restricted
    /// to one group. Eligibility rules live entirely on the directory side.
    fn tracked_users(
        &self,
        register: &Register,
        group: Option<GroupId>,
    ) -> Result<Vec<UserId>, SourceError>;

    /// Resolves the register's scope to the concrete set of tracked courses.
    fn tracked_course_ids(&self, register: &Register) -> Result<Vec<CourseId>, SourceError>;
}

/// Records completion state decided from aggregate totals. Must be
/// idempotent: repeated notifications with the same state are no-ops.
pub trait CompletionSink {
    fn notify(
        &self,
        register: RegisterId,
        user: UserId,
        complete: bool,
    ) -> Result<(), SourceError>;
}

/// Advisory progress reporting for long recalculations.
pub trait ProgressObserver {
    fn update(&mut self, done: usize, total: usize, message: &str);
}

/// A progress observer that discards updates.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoProgress;

impl ProgressObserver for NoProgress {
    fn update(&mut self, _done: usize, _total: usize, _message: &str) {}
}
