//! Register management commands.

use std::io::Write;

use anyhow::Result;

use atr_db::Database;

use crate::cli::RegisterOptions;
use crate::commands::util;

pub fn create(db: &Database, options: &RegisterOptions) -> Result<()> {
    let settings = util::settings_from_options(options)?;
    let id = db.create_register(&settings)?;
    println!("Created register {id} ({})", settings.name);
    Ok(())
}

pub fn edit(db: &Database, id: i64, options: &RegisterOptions) -> Result<()> {
    let id = util::register_id(id)?;
    let settings = util::settings_from_options(options)?;
    db.update_register(id, &settings)?;

    let updated = db.register(id)?;
    println!("Updated register {id}");
    if updated.pending_recalc {
        println!("Session timeout changed: full recalculation scheduled for the next cron run.");
    }
    Ok(())
}

pub fn list<W: Write>(writer: &mut W, db: &Database) -> Result<()> {
    let registers = db.list_registers()?;
    if registers.is_empty() {
        writeln!(writer, "No registers configured.")?;
        return Ok(());
    }
    for register in registers {
        let offline = if register.offline_sessions {
            ", offline sessions"
        } else {
            ""
        };
        let pending = if register.pending_recalc {
            ", recalc pending"
        } else {
            ""
        };
        writeln!(
            writer,
            "{}: {} (scope {}, timeout {}m{offline}{pending})",
            register.id,
            register.name,
            register.scope.type_str(),
            register.session_timeout_mins,
        )?;
    }
    Ok(())
}

pub fn delete(db: &Database, id: i64) -> Result<()> {
    db.delete_register(util::register_id(id)?)?;
    println!("Deleted register {id} and all derived sessions, aggregates, and locks.");
    Ok(())
}
