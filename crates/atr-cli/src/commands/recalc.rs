//! Forced full recalculation, immediate or scheduled.

use anyhow::Result;
use chrono::Utc;

use atr_core::RunContext;
use atr_db::{Database, LogDirectory};
use atr_engine::Coordinator;

use crate::commands::util;

pub fn run(
    db: &mut Database,
    directory: &LogDirectory,
    register: i64,
    user: Option<i64>,
    keep_sessions: bool,
    schedule: bool,
) -> Result<()> {
    let register = db.register(util::register_id(register)?)?;

    if schedule {
        db.set_pending_recalc(register.id, true)?;
        println!(
            "Scheduled a full recalculation of register {} for the next cron run.",
            register.id
        );
        return Ok(());
    }

    let ctx = RunContext::system(Utc::now());
    let mut coordinator = Coordinator::new(db, directory, directory, directory);

    match user {
        Some(id) => {
            let created = coordinator.force_recalc_user(
                &register,
                util::user_id(id)?,
                &ctx,
                None,
                !keep_sessions,
            )?;
            println!("Recalculated user {id}: {created} session(s) derived.");
        }
        None => {
            let recalculated = coordinator.force_recalc_all(&register, &ctx)?;
            println!("Recalculated {recalculated} user(s).");
        }
    }
    Ok(())
}
