//! Session listing for one user.

use std::io::Write;

use anyhow::Result;

use atr_core::format::{format_duration, shorten_comment};
use atr_db::Database;

use crate::commands::util;

/// Comments longer than this are shortened in the listing.
const COMMENT_DISPLAY_LENGTH: usize = 25;

pub fn run<W: Write>(writer: &mut W, db: &Database, register: i64, user: i64) -> Result<()> {
    let register = db.register(util::register_id(register)?)?;
    let sessions = db.user_sessions(register.id, util::user_id(user)?)?;

    if sessions.is_empty() {
        writeln!(writer, "No sessions recorded for user {user}.")?;
        return Ok(());
    }

    // Newest first, as people look for their latest session.
    for session in sessions.iter().rev() {
        let comment = session
            .comments
            .as_deref()
            .map(|c| format!("  \"{}\"", shorten_comment(c, COMMENT_DISPLAY_LENGTH)))
            .unwrap_or_default();
        writeln!(
            writer,
            "{}  {} .. {}  {} ({}){comment}",
            session.id,
            session.login.format("%Y-%m-%d %H:%M"),
            session.logout.format("%Y-%m-%d %H:%M"),
            session.kind,
            format_duration(session.duration_secs()),
        )?;
    }
    Ok(())
}
