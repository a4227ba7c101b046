//! Offline-session certification commands.

use anyhow::Result;
use chrono::Utc;

use atr_core::{CourseId, OfflineSubmission, RunContext, SessionId};
use atr_db::{Database, LogDirectory};
use atr_engine::Coordinator;

use crate::commands::util;

#[expect(
    clippy::too_many_arguments,
    reason = "mirrors the submission form's fields one-to-one"
)]
pub fn add(
    db: &mut Database,
    directory: &LogDirectory,
    register: i64,
    user: i64,
    login: &str,
    logout: &str,
    course: Option<i64>,
    comment: Option<String>,
    actor: Option<i64>,
) -> Result<()> {
    let register = db.register(util::register_id(register)?)?;
    let subject = util::user_id(user)?;
    let submission = OfflineSubmission {
        login: util::parse_timestamp(login)?,
        logout: util::parse_timestamp(logout)?,
        ref_course: course.map(CourseId::new).transpose()?,
        comments: comment,
    };

    let now = Utc::now();
    let ctx = match actor {
        Some(actor) => RunContext::for_actor(util::user_id(actor)?, now),
        None => RunContext::system(now),
    };

    let mut coordinator = Coordinator::new(db, directory, directory, directory);
    let session = coordinator.submit_offline_session(&register, subject, submission, &ctx)?;
    println!("Recorded offline session {session} for user {user}.");
    Ok(())
}

pub fn delete(
    db: &mut Database,
    directory: &LogDirectory,
    register: i64,
    user: i64,
    session: i64,
) -> Result<()> {
    let register = db.register(util::register_id(register)?)?;
    let mut coordinator = Coordinator::new(db, directory, directory, directory);
    coordinator.delete_offline_session(
        &register,
        util::user_id(user)?,
        SessionId::new(session)?,
    )?;
    println!("Deleted offline session {session} for user {user}.");
    Ok(())
}
