//! Incremental session update for one user or all users needing it.

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
) -> Result<()> {
    let register = db.register(util::register_id(register)?)?;
    let ctx = RunContext::system(Utc::now());
    let mut coordinator = Coordinator::new(db, directory, directory, directory);

    match user {
        Some(id) => {
            let updated =
                coordinator.update_user_sessions(&register, util::user_id(id)?, &ctx, None, false)?;
            if updated {
                println!("New sessions found for user {id}.");
            } else {
                println!("User {id} is already up to date.");
            }
        }
        None => {
            let updated = coordinator.update_all_needing_recalculation(&register, &ctx)?;
            println!("{updated} user(s) updated.");
        }
    }
    Ok(())
}
