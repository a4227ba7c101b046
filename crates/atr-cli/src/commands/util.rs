//! Shared helpers for command implementations.

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Utc};

use atr_core::{CategoryId, CourseId, RegisterId, RegisterScope, RegisterSettings, UserId};

use crate::cli::RegisterOptions;

/// Parses an RFC 3339 timestamp from the command line.
pub fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|parsed| parsed.with_timezone(&Utc))
        .with_context(|| format!("invalid timestamp: {value} (expected RFC 3339)"))
}

pub fn user_id(id: i64) -> Result<UserId> {
    UserId::new(id).map_err(Into::into)
}

pub fn register_id(id: i64) -> Result<RegisterId> {
    RegisterId::new(id).map_err(Into::into)
}

/// Builds register settings from the shared create/edit options.
pub fn settings_from_options(options: &RegisterOptions) -> Result<RegisterSettings> {
    let scope = if options.global {
        RegisterScope::Global
    } else if let Some(course) = options.course {
        RegisterScope::Course(CourseId::new(course)?)
    } else if let Some(category) = options.category {
        RegisterScope::Category(CategoryId::new(category)?)
    } else if let Some(course) = options.meta {
        RegisterScope::MetaLinked(CourseId::new(course)?)
    } else {
        bail!("one of --course, --category, --meta, or --global is required");
    };

    Ok(RegisterSettings {
        name: options.name.clone(),
        scope,
        session_timeout_mins: options.session_timeout,
        days_certifiable: options.days_certifiable,
        offline_sessions: options.offline,
        offline_comments: true,
        mandatory_offline_comments: options.require_comment,
        offline_specify_course: options.offline,
        mandatory_offline_course: options.require_course,
        completion_total_duration_mins: options.completion_minutes,
    })
}
