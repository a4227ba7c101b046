//! JSON export of a register's sessions and aggregates.

use std::io::Write;

use anyhow::Result;
use serde::Serialize;

use atr_core::{Aggregate, Register, Session};
use atr_db::Database;

use crate::commands::util;

#[derive(Debug, Serialize)]
struct ExportDump {
    register: Register,
    sessions: Vec<Session>,
    aggregates: Vec<Aggregate>,
}

pub fn run<W: Write>(writer: &mut W, db: &Database, register: i64) -> Result<()> {
    let register = db.register(util::register_id(register)?)?;
    let dump = ExportDump {
        sessions: db.register_sessions(register.id)?,
        aggregates: db.register_aggregates(register.id)?,
        register,
    };
    serde_json::to_writer_pretty(&mut *writer, &dump)?;
    writeln!(writer)?;
    Ok(())
}
