//! Admission rules for self-certified offline sessions.
//!
//! The submission form itself lives outside this crate; these are the
//! constraints any submission workflow must enforce before a session row may
//! be created. Overlap against already-stored sessions needs a store probe,
//! so the workflow runs [`validate_submission`] first and the overlap checks
//! with data it fetched itself.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::register::Register;
use crate::source::UserRecord;
use crate::types::CourseId;

/// The longest offline session that will be considered reasonable: 12h.
pub const MAX_REASONABLE_OFFLINE_SESSION_SECS: i64 = 12 * 3600;

/// Maximum length of an offline-session comment.
pub const MAX_OFFLINE_COMMENT_CHARS: usize = 255;

/// A candidate offline session as submitted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OfflineSubmission {
    pub login: DateTime<Utc>,
    pub logout: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ref_course: Option<CourseId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comments: Option<String>,
}

/// A rejected offline-session submission, with the field-level reason.
///
/// Rejections are surfaced to the submitter and never persisted.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum OfflineSessionError {
    #[error("offline sessions are not enabled for this register")]
    NotEnabled,
    #[error("logout must be after login")]
    LoginNotBeforeLogout,
    #[error("a session of {hours}h is longer than any reasonable offline session")]
    UnreasonablyLong { hours: i64 },
    #[error("login is more than {days} certifiable days in the past")]
    CertifiableWindowExceeded { days: u32 },
    #[error("logout is in the future")]
    LogoutInFuture,
    #[error("comment exceeds {MAX_OFFLINE_COMMENT_CHARS} characters")]
    CommentTooLong,
    #[error("a comment is required for offline sessions in this register")]
    CommentRequired,
    #[error("a reference course is required for offline sessions in this register")]
    RefCourseRequired,
    #[error("course {course} is not tracked by this register")]
    RefCourseNotTracked { course: CourseId },
    #[error("the interval overlaps a session already recorded for this user")]
    OverlapsStoredSession,
    #[error("the interval overlaps the user's current online session")]
    OverlapsLiveSession,
}

/// Runs every admission rule that needs no store access.
///
/// The workflow must additionally reject submissions that overlap a stored
/// session ([`OfflineSessionError::OverlapsStoredSession`], via a store
/// probe) or the live session window ([`overlaps_live_session`]), and verify
/// a named reference course is tracked by the register.
pub fn validate_submission(
    register: &Register,
    submission: &OfflineSubmission,
    now: DateTime<Utc>,
) -> Result<(), OfflineSessionError> {
    if !register.offline_sessions {
        return Err(OfflineSessionError::NotEnabled);
    }

    let duration_secs = submission
        .logout
        .signed_duration_since(submission.login)
        .num_seconds();
    if duration_secs <= 0 {
        return Err(OfflineSessionError::LoginNotBeforeLogout);
    }
    if duration_secs > MAX_REASONABLE_OFFLINE_SESSION_SECS {
        return Err(OfflineSessionError::UnreasonablyLong {
            hours: duration_secs / 3600,
        });
    }

    let certifiable = Duration::days(i64::from(register.days_certifiable));
    if now.signed_duration_since(submission.login) > certifiable {
        return Err(OfflineSessionError::CertifiableWindowExceeded {
            days: register.days_certifiable,
        });
    }
    if submission.logout > now {
        return Err(OfflineSessionError::LogoutInFuture);
    }

    if let Some(comment) = submission.comments.as_deref() {
        if comment.chars().count() > MAX_OFFLINE_COMMENT_CHARS {
            return Err(OfflineSessionError::CommentTooLong);
        }
    }
    let has_comment = submission
        .comments
        .as_deref()
        .is_some_and(|c| !c.trim().is_empty());
    if register.offline_comments && register.mandatory_offline_comments && !has_comment {
        return Err(OfflineSessionError::CommentRequired);
    }

    if register.offline_specify_course
        && register.mandatory_offline_course
        && submission.ref_course.is_none()
    {
        return Err(OfflineSessionError::RefCourseRequired);
    }

    Ok(())
}

/// Whether a candidate interval overlaps the subject's live online session.
///
/// For the submitting user themselves, any logout after their current login
/// overlaps. For another user, the check is skipped when they never logged
/// in, or when their last site activity is older than one timeout window
/// (they are presumed logged out by now).
#[must_use]
pub fn overlaps_live_session(
    subject: &UserRecord,
    is_self: bool,
    logout: DateTime<Utc>,
    session_timeout: Duration,
    now: DateTime<Utc>,
) -> bool {
    if !is_self {
        let Some(last_access) = subject.last_access else {
            return false;
        };
        if now.signed_duration_since(last_access) > session_timeout {
            return false;
        }
    }
    subject
        .current_login
        .is_some_and(|current_login| current_login < logout)
}
