//! Per-user attendance totals for a register.

use std::collections::BTreeMap;
use std::io::Write;

use anyhow::Result;

use atr_core::{AggregateKind, Directory, SourceError, UserId, format::format_duration};
use atr_db::{Database, LogDirectory};

use crate::commands::util;

#[derive(Debug, Default, Clone, Copy)]
struct UserTotals {
    online_secs: i64,
    offline_secs: i64,
    grand_secs: i64,
}

pub fn run<W: Write>(
    writer: &mut W,
    db: &Database,
    directory: &LogDirectory,
    register: i64,
    json: bool,
) -> Result<()> {
    let register = db.register(util::register_id(register)?)?;
    let summaries = db.aggregate_summaries(register.id)?;

    if json {
        serde_json::to_writer_pretty(&mut *writer, &summaries)?;
        writeln!(writer)?;
        return Ok(());
    }

    writeln!(writer, "Attendance report: {}", register.name)?;
    if summaries.is_empty() {
        writeln!(writer, "No aggregates computed yet.")?;
        return Ok(());
    }

    let mut totals: BTreeMap<UserId, UserTotals> = BTreeMap::new();
    for aggregate in summaries {
        let entry = totals.entry(aggregate.user).or_default();
        match aggregate.kind {
            AggregateKind::OnlineTotal => entry.online_secs = aggregate.duration_secs,
            AggregateKind::OfflineTotal => entry.offline_secs = aggregate.duration_secs,
            AggregateKind::GrandTotal => entry.grand_secs = aggregate.duration_secs,
            AggregateKind::OfflineRefCourse(_) => {}
        }
    }

    for (user, user_totals) in totals {
        let name = match directory.user(user) {
            Ok(record) => record.display_name,
            Err(SourceError::UserNotFound { .. }) => format!("user {user}"),
            Err(e) => return Err(e.into()),
        };
        let completion = if register.completion_enabled() {
            match directory.completion_state(register.id, user)? {
                Some(true) => " [complete]",
                Some(false) => " [incomplete]",
                None => "",
            }
        } else {
            ""
        };
        writeln!(
            writer,
            "- {name}: online {}, offline {}, total {}{completion}",
            format_duration(user_totals.online_secs),
            format_duration(user_totals.offline_secs),
            format_duration(user_totals.grand_secs),
        )?;
    }
    Ok(())
}
