//! The periodic driver: one pass over every register.

use anyhow::Result;
use chrono::Utc;

use atr_core::RunContext;
use atr_db::{Database, LogDirectory};
use atr_engine::Coordinator;

pub fn run(db: &mut Database, directory: &LogDirectory) -> Result<()> {
    let ctx = RunContext::system(Utc::now());
    let mut coordinator = Coordinator::new(db, directory, directory, directory);
    let stats = coordinator.run_periodic(&ctx)?;

    println!(
        "Processed {} register(s): {} user(s) updated, {} orphaned lock(s) purged.",
        stats.registers, stats.users_updated, stats.purged_locks,
    );
    Ok(())
}
