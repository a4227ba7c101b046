//! Aggregate rows: precomputed summary durations for reporting and
//! completion checks.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::register::Register;
use crate::session::Session;
use crate::types::{CourseId, RegisterId, UserId};

/// A stored aggregate row whose flag combination matches none of the four
/// expected kinds. Should be unreachable for rows written by this crate.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error(
    "inconsistent aggregate row: online={online:?} total={total} grand_total={grand_total}"
)]
pub struct InconsistentAggregate {
    pub online: Option<bool>,
    pub total: bool,
    pub grand_total: bool,
}

/// Which summary an aggregate row carries.
///
/// The four kinds are mutually exclusive by construction; the stored flag
/// encoding only exists at the database boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "ref_course", rename_all = "snake_case")]
pub enum AggregateKind {
    /// Offline subtotal for one reference course (`None` = unspecified).
    OfflineRefCourse(Option<CourseId>),
    /// Total of all offline sessions.
    OfflineTotal,
    /// Total of all online sessions. Always present after a recomputation,
    /// even when zero.
    OnlineTotal,
    /// Total across all sessions, online and offline.
    GrandTotal,
}

impl AggregateKind {
    /// The stored `(online, total, grand_total, ref_course)` encoding.
    #[must_use]
    pub const fn to_flags(self) -> (Option<bool>, bool, bool, Option<CourseId>) {
        match self {
            Self::OfflineRefCourse(course) => (Some(false), false, false, course),
            Self::OfflineTotal => (Some(false), true, false, None),
            Self::OnlineTotal => (Some(true), true, false, None),
            Self::GrandTotal => (None, false, true, None),
        }
    }

    /// Decodes the stored flag encoding back into a kind.
    pub fn from_flags(
        online: Option<bool>,
        total: bool,
        grand_total: bool,
        ref_course: Option<CourseId>,
    ) -> Result<Self, InconsistentAggregate> {
        match (online, total, grand_total) {
            (None, false, true) => Ok(Self::GrandTotal),
            (Some(true), true, false) => Ok(Self::OnlineTotal),
            (Some(false), true, false) => Ok(Self::OfflineTotal),
            (Some(false), false, false) => Ok(Self::OfflineRefCourse(ref_course)),
            _ => Err(InconsistentAggregate {
                online,
                total,
                grand_total,
            }),
        }
    }
}

/// A computed aggregate row for one (register, user) pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Aggregate {
    pub register: RegisterId,
    pub user: UserId,
    pub kind: AggregateKind,
    pub duration_secs: i64,
    /// Logout of the most recent online session; carried on the grand-total
    /// row only, absent when the user has no online sessions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_session_logout: Option<DateTime<Utc>>,
}

/// Recomputes the full aggregate set for a user from their stored sessions.
///
/// Pure function of the session set: two calls over identical sessions
/// produce identical rows in identical order. The caller replaces all stored
/// rows with the result in one transaction.
#[must_use]
pub fn build_user_aggregates(
    register: &Register,
    user: UserId,
    sessions: &[Session],
) -> Vec<Aggregate> {
    let mut aggregates = Vec::new();

    if register.offline_sessions {
        let mut per_course: BTreeMap<Option<CourseId>, i64> = BTreeMap::new();
        for session in sessions.iter().filter(|s| !s.kind.is_online()) {
            *per_course.entry(session.ref_course).or_insert(0) += session.duration_secs();
        }

        for (&course, &duration_secs) in &per_course {
            aggregates.push(Aggregate {
                register: register.id,
                user,
                kind: AggregateKind::OfflineRefCourse(course),
                duration_secs,
                last_session_logout: None,
            });
        }

        if !per_course.is_empty() {
            aggregates.push(Aggregate {
                register: register.id,
                user,
                kind: AggregateKind::OfflineTotal,
                duration_secs: per_course.values().sum(),
                last_session_logout: None,
            });
        }
    }

    let online: Vec<&Session> = sessions.iter().filter(|s| s.kind.is_online()).collect();
    aggregates.push(Aggregate {
        register: register.id,
        user,
        kind: AggregateKind::OnlineTotal,
        duration_secs: online.iter().map(|s| s.duration_secs()).sum(),
        last_session_logout: None,
    });

    aggregates.push(Aggregate {
        register: register.id,
        user,
        kind: AggregateKind::GrandTotal,
        duration_secs: sessions.iter().map(Session::duration_secs).sum(),
        last_session_logout: online.iter().map(|s| s.logout).max(),
    });

    aggregates
}
