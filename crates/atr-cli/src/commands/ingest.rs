//! Directory and activity-log ingest commands.

use anyhow::Result;

use atr_core::{CourseId, GroupId, UserRecord};
use atr_db::LogDirectory;

use crate::commands::util;

pub fn activity(directory: &LogDirectory, user: i64, course: i64, at: &str) -> Result<()> {
    let at = util::parse_timestamp(at)?;
    directory.record_activity(util::user_id(user)?, CourseId::new(course)?, at)?;
    tracing::debug!(user, course, %at, "activity recorded");
    Ok(())
}

pub fn user(directory: &LogDirectory, id: i64, name: &str, group: Option<i64>) -> Result<()> {
    let record = UserRecord {
        id: util::user_id(id)?,
        display_name: name.to_string(),
        last_access: None,
        current_login: None,
        group: group.map(GroupId::new).transpose()?,
    };
    directory.upsert_user(&record)?;
    println!("Registered user {id} ({name})");
    Ok(())
}

pub fn login(directory: &LogDirectory, user: i64, at: &str) -> Result<()> {
    let at = util::parse_timestamp(at)?;
    directory.set_current_login(util::user_id(user)?, at)?;
    Ok(())
}

pub fn course(directory: &LogDirectory, id: i64, category: i64) -> Result<()> {
    directory.add_course(CourseId::new(id)?, category)?;
    println!("Registered course {id} (category {category})");
    Ok(())
}

pub fn link(directory: &LogDirectory, course: i64, linked: i64) -> Result<()> {
    directory.link_course(CourseId::new(course)?, CourseId::new(linked)?)?;
    println!("Linked course {linked} into {course}");
    Ok(())
}
