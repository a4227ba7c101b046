//! Status command: database overview.

use std::io::Write;
use std::path::Path;

use anyhow::Result;

use atr_db::{Database, LogDirectory};

pub fn run<W: Write>(
    writer: &mut W,
    db: &Database,
    directory: &LogDirectory,
    database_path: &Path,
) -> Result<()> {
    writeln!(writer, "Attendance register status")?;
    writeln!(writer, "Database: {}", database_path.display())?;

    let users = directory.list_users()?;
    writeln!(writer, "Users: {}", users.len())?;

    let registers = db.list_registers()?;
    if registers.is_empty() {
        writeln!(writer, "No registers configured.")?;
        return Ok(());
    }

    writeln!(writer, "Registers:")?;
    for register in registers {
        let sessions: i64 = db.connection().query_row(
            "SELECT COUNT(*) FROM sessions WHERE register = ?",
            [register.id.get()],
            |row| row.get(0),
        )?;
        let locks: i64 = db.connection().query_row(
            "SELECT COUNT(*) FROM locks WHERE register = ?",
            [register.id.get()],
            |row| row.get(0),
        )?;
        let pending = if register.pending_recalc {
            ", recalc pending"
        } else {
            ""
        };
        writeln!(
            writer,
            "- {} {}: {sessions} session(s), {locks} live lock(s){pending}",
            register.id, register.name,
        )?;
    }
    Ok(())
}
