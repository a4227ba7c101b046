//! Storage layer for the attendance register.
//!
//! Provides persistence for registers, sessions, aggregates, and
//! recalculation locks using `rusqlite`. The activity-log/directory tables
//! backing the collaborator traits live in [`directory`].
//!
//! # Thread Safety
//!
//! The [`Database`] type wraps a `rusqlite::Connection`, which is `Send` but
//! not `Sync`. A `Database` instance can be moved between threads but cannot
//! be shared without external synchronization. Concurrent processes open
//! their own connections; the per-(register, user) lock table is what keeps
//! their recalculations from interleaving.
//!
//! # Schema
//!
//! Timestamps are stored as TEXT in RFC 3339 format with millisecond
//! precision (e.g., `2024-01-15T10:30:00.000Z`), so lexicographic ordering
//! matches chronological ordering. Durations are stored as whole seconds.
//!
//! Sessions, aggregates, and locks reference their register with
//! `ON DELETE CASCADE`: deleting a register removes every derived row.

pub mod directory;

use std::path::Path;

use chrono::{DateTime, Duration, SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use thiserror::Error;

use atr_core::{
    Aggregate, AggregateKind, CourseId, Register, RegisterId, RegisterScope, RegisterSettings,
    Session, SessionId, SessionInterval, SessionKind, UserId,
};

pub use directory::LogDirectory;

/// Locks older than this are considered abandoned by a crashed process and
/// are purged by the periodic driver.
pub const ORPHANED_LOCK_DELAY: Duration = Duration::minutes(30);

/// Database errors.
#[derive(Debug, Error)]
pub enum DbError {
    /// An error from the underlying database.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    /// The referenced register does not exist.
    #[error("register {register} not found")]
    RegisterNotFound { register: i64 },
    /// Failed to parse a stored timestamp.
    #[error("invalid timestamp in {table}: {value}")]
    TimestampParse {
        table: &'static str,
        value: String,
        #[source]
        source: chrono::ParseError,
    },
    /// A stored row failed domain validation on load.
    #[error("invalid row in {table}: {message}")]
    InvalidRow {
        table: &'static str,
        message: String,
    },
}

/// Database connection wrapper.
///
/// See the [module documentation](self) for thread safety considerations.
pub struct Database {
    conn: Connection,
}

/// The cached grand-total aggregate for a user, read without decoding the
/// full aggregate set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GrandTotal {
    pub duration_secs: i64,
    pub last_session_logout: Option<DateTime<Utc>>,
}

/// An offline session ready to be stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewOfflineSession {
    pub user: UserId,
    pub login: DateTime<Utc>,
    pub logout: DateTime<Utc>,
    pub ref_course: Option<CourseId>,
    pub comments: Option<String>,
    pub added_by: Option<UserId>,
}

impl Database {
    /// Opens a database at the given path, creating it if necessary.
    ///
    /// The schema is automatically initialized on first open.
    pub fn open(path: &Path) -> Result<Self, DbError> {
        let conn = Connection::open(path)?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    /// Opens an in-memory database.
    ///
    /// Useful for testing. The database is destroyed when the connection
    /// closes.
    pub fn open_in_memory() -> Result<Self, DbError> {
        let conn = Connection::open_in_memory()?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    /// Initializes the database schema.
    ///
    /// This is idempotent - safe to call on an already-initialized database.
    fn init(&self) -> Result<(), DbError> {
        self.conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        self.conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS registers (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                scope_type TEXT NOT NULL,
                scope_ref INTEGER,
                session_timeout_mins INTEGER NOT NULL,
                days_certifiable INTEGER NOT NULL,
                offline_sessions INTEGER NOT NULL DEFAULT 0,
                offline_comments INTEGER NOT NULL DEFAULT 1,
                mandatory_offline_comments INTEGER NOT NULL DEFAULT 0,
                offline_specify_course INTEGER NOT NULL DEFAULT 0,
                mandatory_offline_course INTEGER NOT NULL DEFAULT 0,
                completion_total_mins INTEGER,
                pending_recalc INTEGER NOT NULL DEFAULT 0
            );

            -- Sessions: derived (online) or self-certified (offline) intervals.
            -- login/logout: RFC 3339 TEXT; duration_secs = logout - login.
            CREATE TABLE IF NOT EXISTS sessions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                register INTEGER NOT NULL,
                userid INTEGER NOT NULL,
                login TEXT NOT NULL,
                logout TEXT NOT NULL,
                duration_secs INTEGER NOT NULL,
                online INTEGER NOT NULL,
                ref_course INTEGER,
                comments TEXT,
                added_by INTEGER,
                FOREIGN KEY (register) REFERENCES registers(id) ON DELETE CASCADE
            );

            CREATE INDEX IF NOT EXISTS idx_sessions_user ON sessions(register, userid, login);
            CREATE INDEX IF NOT EXISTS idx_sessions_online ON sessions(register, userid, online);

            -- Aggregates: flag-encoded kind (online/total/grand_total), see
            -- atr_core::AggregateKind for the four valid combinations.
            CREATE TABLE IF NOT EXISTS aggregates (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                register INTEGER NOT NULL,
                userid INTEGER NOT NULL,
                online INTEGER,
                total INTEGER NOT NULL DEFAULT 0,
                grand_total INTEGER NOT NULL DEFAULT 0,
                ref_course INTEGER,
                duration_secs INTEGER NOT NULL,
                last_session_logout TEXT,
                FOREIGN KEY (register) REFERENCES registers(id) ON DELETE CASCADE
            );

            CREATE INDEX IF NOT EXISTS idx_aggregates_user ON aggregates(register, userid);

            -- Locks: the primary key makes claiming atomic; a second claimant
            -- loses the INSERT instead of silently doubling up.
            CREATE TABLE IF NOT EXISTS locks (
                register INTEGER NOT NULL,
                userid INTEGER NOT NULL,
                taken_at TEXT NOT NULL,
                PRIMARY KEY (register, userid),
                FOREIGN KEY (register) REFERENCES registers(id) ON DELETE CASCADE
            );
            ",
        )?;
        Ok(())
    }

    /// Read-only access to the underlying connection, for callers that need
    /// ad-hoc queries (tests, status reporting).
    #[must_use]
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    // ===== Registers =====

    /// Creates a register with the given settings, returning its id.
    pub fn create_register(&self, settings: &RegisterSettings) -> Result<RegisterId, DbError> {
        self.conn.execute(
            "
            INSERT INTO registers
            (name, scope_type, scope_ref, session_timeout_mins, days_certifiable,
             offline_sessions, offline_comments, mandatory_offline_comments,
             offline_specify_course, mandatory_offline_course, completion_total_mins,
             pending_recalc)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 0)
            ",
            params![
                settings.name,
                settings.scope.type_str(),
                settings.scope.reference(),
                settings.session_timeout_mins,
                settings.days_certifiable,
                settings.offline_sessions,
                settings.offline_comments,
                settings.mandatory_offline_comments,
                settings.offline_specify_course,
                settings.mandatory_offline_course,
                settings.completion_total_duration_mins,
            ],
        )?;
        let id = self.conn.last_insert_rowid();
        RegisterId::new(id).map_err(|e| DbError::InvalidRow {
            table: "registers",
            message: e.to_string(),
        })
    }

    /// Updates a register's settings.
    ///
    /// Changing the session timeout invalidates every derived session, so it
    /// schedules a full recalculation for the next periodic run.
    pub fn update_register(
        &self,
        register: RegisterId,
        settings: &RegisterSettings,
    ) -> Result<(), DbError> {
        let old = self.register(register)?;
        let pending_recalc =
            old.pending_recalc || old.session_timeout_mins != settings.session_timeout_mins;
        self.conn.execute(
            "
            UPDATE registers SET
                name = ?, scope_type = ?, scope_ref = ?, session_timeout_mins = ?,
                days_certifiable = ?, offline_sessions = ?, offline_comments = ?,
                mandatory_offline_comments = ?, offline_specify_course = ?,
                mandatory_offline_course = ?, completion_total_mins = ?, pending_recalc = ?
            WHERE id = ?
            ",
            params![
                settings.name,
                settings.scope.type_str(),
                settings.scope.reference(),
                settings.session_timeout_mins,
                settings.days_certifiable,
                settings.offline_sessions,
                settings.offline_comments,
                settings.mandatory_offline_comments,
                settings.offline_specify_course,
                settings.mandatory_offline_course,
                settings.completion_total_duration_mins,
                pending_recalc,
                register.get(),
            ],
        )?;
        Ok(())
    }

    /// Loads a register by id.
    pub fn register(&self, register: RegisterId) -> Result<Register, DbError> {
        let row = self
            .conn
            .query_row(
                &format!("SELECT {REGISTER_COLUMNS} FROM registers WHERE id = ?"),
                [register.get()],
                register_row,
            )
            .optional()?;
        row.map_or(
            Err(DbError::RegisterNotFound {
                register: register.get(),
            }),
            decode_register,
        )
    }

    /// Lists all registers ordered by id.
    pub fn list_registers(&self) -> Result<Vec<Register>, DbError> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT {REGISTER_COLUMNS} FROM registers ORDER BY id ASC"))?;
        let rows = stmt.query_map([], register_row)?;
        let mut registers = Vec::new();
        for row in rows {
            registers.push(decode_register(row?)?);
        }
        Ok(registers)
    }

    /// Deletes a register and, via cascade, all of its sessions, aggregates,
    /// and locks.
    pub fn delete_register(&self, register: RegisterId) -> Result<(), DbError> {
        let deleted = self
            .conn
            .execute("DELETE FROM registers WHERE id = ?", [register.get()])?;
        if deleted == 0 {
            return Err(DbError::RegisterNotFound {
                register: register.get(),
            });
        }
        Ok(())
    }

    /// Sets or clears the pending-full-recalculation flag.
    pub fn set_pending_recalc(&self, register: RegisterId, pending: bool) -> Result<(), DbError> {
        self.conn.execute(
            "UPDATE registers SET pending_recalc = ? WHERE id = ?",
            params![pending, register.get()],
        )?;
        Ok(())
    }

    // ===== Sessions =====

    /// Inserts a batch of derived online sessions in one transaction.
    ///
    /// Returns the number of rows written. Either the whole batch lands or
    /// none of it does.
    pub fn insert_online_sessions(
        &mut self,
        register: RegisterId,
        user: UserId,
        intervals: &[SessionInterval],
    ) -> Result<usize, DbError> {
        if intervals.is_empty() {
            return Ok(0);
        }
        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "
                INSERT INTO sessions
                (register, userid, login, logout, duration_secs, online)
                VALUES (?, ?, ?, ?, ?, 1)
                ",
            )?;
            for interval in intervals {
                stmt.execute(params![
                    register.get(),
                    user.get(),
                    format_timestamp(interval.login),
                    format_timestamp(interval.logout),
                    interval.duration_secs(),
                ])?;
            }
        }
        tx.commit()?;
        Ok(intervals.len())
    }

    /// Inserts a self-certified offline session, returning its row id.
    pub fn insert_offline_session(
        &self,
        register: RegisterId,
        session: &NewOfflineSession,
    ) -> Result<SessionId, DbError> {
        self.conn.execute(
            "
            INSERT INTO sessions
            (register, userid, login, logout, duration_secs, online, ref_course, comments, added_by)
            VALUES (?, ?, ?, ?, ?, 0, ?, ?, ?)
            ",
            params![
                register.get(),
                session.user.get(),
                format_timestamp(session.login),
                format_timestamp(session.logout),
                session
                    .logout
                    .signed_duration_since(session.login)
                    .num_seconds(),
                session.ref_course.map(CourseId::get),
                session.comments,
                session.added_by.map(UserId::get),
            ],
        )?;
        SessionId::new(self.conn.last_insert_rowid()).map_err(|e| DbError::InvalidRow {
            table: "sessions",
            message: e.to_string(),
        })
    }

    /// Lists a user's sessions in a register, ordered by login ascending.
    pub fn user_sessions(
        &self,
        register: RegisterId,
        user: UserId,
    ) -> Result<Vec<Session>, DbError> {
        let mut stmt = self.conn.prepare(
            "
            SELECT id, register, userid, login, logout, online, ref_course, comments, added_by
            FROM sessions
            WHERE register = ? AND userid = ?
            ORDER BY login ASC, id ASC
            ",
        )?;
        let rows = stmt.query_map(params![register.get(), user.get()], session_row)?;
        let mut sessions = Vec::new();
        for row in rows {
            sessions.push(decode_session(row?)?);
        }
        Ok(sessions)
    }

    /// Lists every session in a register, ordered by user then login.
    pub fn register_sessions(&self, register: RegisterId) -> Result<Vec<Session>, DbError> {
        let mut stmt = self.conn.prepare(
            "
            SELECT id, register, userid, login, logout, online, ref_course, comments, added_by
            FROM sessions
            WHERE register = ?
            ORDER BY userid ASC, login ASC, id ASC
            ",
        )?;
        let rows = stmt.query_map([register.get()], session_row)?;
        let mut sessions = Vec::new();
        for row in rows {
            sessions.push(decode_session(row?)?);
        }
        Ok(sessions)
    }

    /// Deletes a user's online sessions, optionally only those with
    /// `login >= only_login_at_or_after`.
    ///
    /// The bound is used by forced recalculation to keep sessions older than
    /// the user's oldest surviving log entry.
    pub fn delete_online_sessions(
        &self,
        register: RegisterId,
        user: UserId,
        only_login_at_or_after: Option<DateTime<Utc>>,
    ) -> Result<usize, DbError> {
        let deleted = match only_login_at_or_after {
            Some(bound) => self.conn.execute(
                "DELETE FROM sessions WHERE register = ? AND userid = ? AND online = 1 AND login >= ?",
                params![register.get(), user.get(), format_timestamp(bound)],
            )?,
            None => self.conn.execute(
                "DELETE FROM sessions WHERE register = ? AND userid = ? AND online = 1",
                params![register.get(), user.get()],
            )?,
        };
        Ok(deleted)
    }

    /// Deletes one offline session. Online rows are never deleted this way.
    ///
    /// Returns whether a row was actually removed.
    pub fn delete_offline_session(
        &self,
        register: RegisterId,
        user: UserId,
        session: SessionId,
    ) -> Result<bool, DbError> {
        let deleted = self.conn.execute(
            "DELETE FROM sessions WHERE id = ? AND register = ? AND userid = ? AND online = 0",
            params![session.get(), register.get(), user.get()],
        )?;
        Ok(deleted > 0)
    }

    /// Whether the candidate interval overlaps any stored session for the
    /// user, with inclusive bounds (touching endpoints count as overlap).
    pub fn has_overlapping_session(
        &self,
        register: RegisterId,
        user: UserId,
        login: DateTime<Utc>,
        logout: DateTime<Utc>,
    ) -> Result<bool, DbError> {
        let count: i64 = self.conn.query_row(
            "
            SELECT COUNT(*) FROM sessions
            WHERE register = ? AND userid = ? AND login <= ? AND logout >= ?
            ",
            params![
                register.get(),
                user.get(),
                format_timestamp(logout),
                format_timestamp(login),
            ],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    // ===== Aggregates =====

    /// Replaces the user's aggregate rows with the given set in one
    /// transaction: either every new row lands or the old rows survive.
    pub fn replace_user_aggregates(
        &mut self,
        register: RegisterId,
        user: UserId,
        aggregates: &[Aggregate],
    ) -> Result<(), DbError> {
        let tx = self.conn.transaction()?;
        tx.execute(
            "DELETE FROM aggregates WHERE register = ? AND userid = ?",
            params![register.get(), user.get()],
        )?;
        {
            let mut stmt = tx.prepare(
                "
                INSERT INTO aggregates
                (register, userid, online, total, grand_total, ref_course, duration_secs,
                 last_session_logout)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                ",
            )?;
            for aggregate in aggregates {
                let (online, total, grand_total, ref_course) = aggregate.kind.to_flags();
                stmt.execute(params![
                    aggregate.register.get(),
                    aggregate.user.get(),
                    online,
                    total,
                    grand_total,
                    ref_course.map(CourseId::get),
                    aggregate.duration_secs,
                    aggregate.last_session_logout.map(format_timestamp),
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// Deletes all aggregate rows for a user.
    pub fn delete_user_aggregates(
        &self,
        register: RegisterId,
        user: UserId,
    ) -> Result<(), DbError> {
        self.conn.execute(
            "DELETE FROM aggregates WHERE register = ? AND userid = ?",
            params![register.get(), user.get()],
        )?;
        Ok(())
    }

    /// Lists a user's aggregate rows.
    ///
    /// Rows whose stored flags decode to no valid kind are skipped with a
    /// warning; they cannot be produced by this crate's writers.
    pub fn user_aggregates(
        &self,
        register: RegisterId,
        user: UserId,
    ) -> Result<Vec<Aggregate>, DbError> {
        self.query_aggregates(
            "
            SELECT register, userid, online, total, grand_total, ref_course, duration_secs,
                   last_session_logout
            FROM aggregates
            WHERE register = ? AND userid = ?
            ORDER BY id ASC
            ",
            params![register.get(), user.get()],
        )
    }

    /// Every aggregate row in a register, ordered by user then insert order.
    pub fn register_aggregates(&self, register: RegisterId) -> Result<Vec<Aggregate>, DbError> {
        self.query_aggregates(
            "
            SELECT register, userid, online, total, grand_total, ref_course, duration_secs,
                   last_session_logout
            FROM aggregates
            WHERE register = ?
            ORDER BY userid ASC, id ASC
            ",
            params![register.get()],
        )
    }

    /// Summary rows (totals and grand totals) for every user in a register.
    pub fn aggregate_summaries(&self, register: RegisterId) -> Result<Vec<Aggregate>, DbError> {
        self.query_aggregates(
            "
            SELECT register, userid, online, total, grand_total, ref_course, duration_secs,
                   last_session_logout
            FROM aggregates
            WHERE register = ? AND (total = 1 OR grand_total = 1)
            ORDER BY userid ASC, id ASC
            ",
            params![register.get()],
        )
    }

    fn query_aggregates(
        &self,
        sql: &str,
        params: impl rusqlite::Params,
    ) -> Result<Vec<Aggregate>, DbError> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt.query_map(params, aggregate_row)?;
        let mut aggregates = Vec::new();
        for row in rows {
            match decode_aggregate(row?) {
                Ok(aggregate) => aggregates.push(aggregate),
                Err(e) => tracing::warn!(error = %e, "skipping malformed aggregate row"),
            }
        }
        Ok(aggregates)
    }

    /// Reads the cached grand-total row for a user, if one exists.
    pub fn grand_total(
        &self,
        register: RegisterId,
        user: UserId,
    ) -> Result<Option<GrandTotal>, DbError> {
        let row: Option<(i64, Option<String>)> = self
            .conn
            .query_row(
                "
                SELECT duration_secs, last_session_logout FROM aggregates
                WHERE register = ? AND userid = ? AND grand_total = 1
                ",
                params![register.get(), user.get()],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        row.map(|(duration_secs, logout)| {
            Ok(GrandTotal {
                duration_secs,
                last_session_logout: logout
                    .map(|value| parse_timestamp(&value, "aggregates"))
                    .transpose()?,
            })
        })
        .transpose()
    }

    // ===== Locks =====

    /// Attempts to claim the recalculation lock for `(register, user)`.
    ///
    /// The claim is a single conditional insert against the table's primary
    /// key: exactly one of two concurrent claimants wins. Returns whether
    /// this caller now holds the lock.
    pub fn try_claim_lock(
        &self,
        register: RegisterId,
        user: UserId,
        now: DateTime<Utc>,
    ) -> Result<bool, DbError> {
        let inserted = self.conn.execute(
            "INSERT OR IGNORE INTO locks (register, userid, taken_at) VALUES (?, ?, ?)",
            params![register.get(), user.get(), format_timestamp(now)],
        )?;
        Ok(inserted > 0)
    }

    /// Releases the lock for `(register, user)`, tolerating an already
    /// released (or never claimed) lock.
    pub fn release_lock(&self, register: RegisterId, user: UserId) -> Result<(), DbError> {
        self.conn.execute(
            "DELETE FROM locks WHERE register = ? AND userid = ?",
            params![register.get(), user.get()],
        )?;
        Ok(())
    }

    /// Whether a live lock exists for `(register, user)`.
    pub fn lock_exists(&self, register: RegisterId, user: UserId) -> Result<bool, DbError> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM locks WHERE register = ? AND userid = ?",
            params![register.get(), user.get()],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// Deletes locks older than [`ORPHANED_LOCK_DELAY`], presumed abandoned
    /// by a crashed holder. Returns the number purged.
    pub fn purge_orphaned_locks(&self, now: DateTime<Utc>) -> Result<usize, DbError> {
        let cutoff = now - ORPHANED_LOCK_DELAY;
        let purged = self.conn.execute(
            "DELETE FROM locks WHERE taken_at < ?",
            [format_timestamp(cutoff)],
        )?;
        if purged > 0 {
            tracing::warn!(purged, "purged orphaned recalculation locks");
        }
        Ok(purged)
    }
}

const REGISTER_COLUMNS: &str = "id, name, scope_type, scope_ref, session_timeout_mins, \
     days_certifiable, offline_sessions, offline_comments, mandatory_offline_comments, \
     offline_specify_course, mandatory_offline_course, completion_total_mins, pending_recalc";

type RegisterRow = (
    i64,
    String,
    String,
    Option<i64>,
    u32,
    u32,
    bool,
    bool,
    bool,
    bool,
    bool,
    Option<u32>,
    bool,
);

fn register_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RegisterRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
        row.get(7)?,
        row.get(8)?,
        row.get(9)?,
        row.get(10)?,
        row.get(11)?,
        row.get(12)?,
    ))
}

fn decode_register(row: RegisterRow) -> Result<Register, DbError> {
    let (
        id,
        name,
        scope_type,
        scope_ref,
        session_timeout_mins,
        days_certifiable,
        offline_sessions,
        offline_comments,
        mandatory_offline_comments,
        offline_specify_course,
        mandatory_offline_course,
        completion_total_mins,
        pending_recalc,
    ) = row;
    let invalid = |message: String| DbError::InvalidRow {
        table: "registers",
        message,
    };
    Ok(Register {
        id: RegisterId::new(id).map_err(|e| invalid(e.to_string()))?,
        name,
        scope: RegisterScope::from_parts(&scope_type, scope_ref)
            .map_err(|e| invalid(e.to_string()))?,
        session_timeout_mins,
        days_certifiable,
        offline_sessions,
        offline_comments,
        mandatory_offline_comments,
        offline_specify_course,
        mandatory_offline_course,
        completion_total_duration_mins: completion_total_mins,
        pending_recalc,
    })
}

type SessionRow = (
    i64,
    i64,
    i64,
    String,
    String,
    bool,
    Option<i64>,
    Option<String>,
    Option<i64>,
);

fn session_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<SessionRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
        row.get(7)?,
        row.get(8)?,
    ))
}

fn decode_session(row: SessionRow) -> Result<Session, DbError> {
    let (id, register, userid, login, logout, online, ref_course, comments, added_by) = row;
    let invalid = |message: String| DbError::InvalidRow {
        table: "sessions",
        message,
    };
    Ok(Session {
        id: SessionId::new(id).map_err(|e| invalid(e.to_string()))?,
        register: RegisterId::new(register).map_err(|e| invalid(e.to_string()))?,
        user: UserId::new(userid).map_err(|e| invalid(e.to_string()))?,
        login: parse_timestamp(&login, "sessions")?,
        logout: parse_timestamp(&logout, "sessions")?,
        kind: if online {
            SessionKind::Online
        } else {
            SessionKind::Offline
        },
        ref_course: ref_course
            .map(|c| CourseId::new(c).map_err(|e| invalid(e.to_string())))
            .transpose()?,
        comments,
        added_by: added_by
            .map(|u| UserId::new(u).map_err(|e| invalid(e.to_string())))
            .transpose()?,
    })
}

type AggregateRow = (
    i64,
    i64,
    Option<bool>,
    bool,
    bool,
    Option<i64>,
    i64,
    Option<String>,
);

fn aggregate_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<AggregateRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
        row.get(7)?,
    ))
}

fn decode_aggregate(row: AggregateRow) -> Result<Aggregate, DbError> {
    let (register, userid, online, total, grand_total, ref_course, duration_secs, logout) = row;
    let invalid = |message: String| DbError::InvalidRow {
        table: "aggregates",
        message,
    };
    let ref_course = ref_course
        .map(|c| CourseId::new(c).map_err(|e| invalid(e.to_string())))
        .transpose()?;
    let kind = AggregateKind::from_flags(online, total, grand_total, ref_course)
        .map_err(|e| invalid(e.to_string()))?;
    Ok(Aggregate {
        register: RegisterId::new(register).map_err(|e| invalid(e.to_string()))?,
        user: UserId::new(userid).map_err(|e| invalid(e.to_string()))?,
        kind,
        duration_secs,
        last_session_logout: logout
            .map(|value| parse_timestamp(&value, "aggregates"))
            .transpose()?,
    })
}

pub(crate) fn parse_timestamp(
    value: &str,
    table: &'static str,
) -> Result<DateTime<Utc>, DbError> {
    DateTime::parse_from_rfc3339(value)
        .map(|parsed| parsed.with_timezone(&Utc))
        .map_err(|source| DbError::TimestampParse {
            table,
            value: value.to_string(),
            source,
        })
}

pub(crate) fn format_timestamp(timestamp: DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn user(id: i64) -> UserId {
        UserId::new(id).unwrap()
    }

    fn interval(login: i64, logout: i64) -> SessionInterval {
        SessionInterval::new(ts(login), ts(logout)).unwrap()
    }

    fn settings() -> RegisterSettings {
        let mut settings = RegisterSettings::new("Attendance", RegisterScope::Global);
        settings.offline_sessions = true;
        settings
    }

    fn open_with_register() -> (Database, RegisterId) {
        let db = Database::open_in_memory().expect("open in-memory db");
        let register = db.create_register(&settings()).unwrap();
        (db, register)
    }

    #[test]
    fn open_in_memory_database() {
        let db = Database::open_in_memory();
        assert!(db.is_ok());
    }

    #[test]
    fn schema_matches_data_model() {
        let db = Database::open_in_memory().expect("open in-memory db");

        let sessions_columns = table_columns(&db.conn, "sessions");
        assert_eq!(
            sessions_columns,
            vec![
                "id",
                "register",
                "userid",
                "login",
                "logout",
                "duration_secs",
                "online",
                "ref_course",
                "comments",
                "added_by",
            ]
        );

        let aggregates_columns = table_columns(&db.conn, "aggregates");
        assert_eq!(
            aggregates_columns,
            vec![
                "id",
                "register",
                "userid",
                "online",
                "total",
                "grand_total",
                "ref_course",
                "duration_secs",
                "last_session_logout",
            ]
        );

        let locks_columns = table_columns(&db.conn, "locks");
        assert_eq!(locks_columns, vec!["register", "userid", "taken_at"]);
    }

    fn table_columns(conn: &Connection, table: &str) -> Vec<String> {
        let mut stmt = conn
            .prepare(&format!("PRAGMA table_info({table})"))
            .expect("prepare table_info");
        let rows = stmt
            .query_map([], |row| row.get::<_, String>(1))
            .expect("query table_info");
        rows.map(|row| row.expect("table_info row")).collect()
    }

    #[test]
    fn register_roundtrip_preserves_settings() {
        let (db, register_id) = open_with_register();
        let register = db.register(register_id).unwrap();

        assert_eq!(register.id, register_id);
        assert_eq!(register.name, "Attendance");
        assert_eq!(register.scope, RegisterScope::Global);
        assert_eq!(register.session_timeout_mins, 30);
        assert!(register.offline_sessions);
        assert!(!register.pending_recalc);
    }

    #[test]
    fn register_lookup_fails_for_unknown_id() {
        let db = Database::open_in_memory().unwrap();
        let result = db.register(RegisterId::new(99).unwrap());
        assert!(matches!(result, Err(DbError::RegisterNotFound { register: 99 })));
    }

    #[test]
    fn changing_session_timeout_schedules_recalc() {
        let (db, register_id) = open_with_register();

        let mut updated = settings();
        updated.session_timeout_mins = 15;
        db.update_register(register_id, &updated).unwrap();

        assert!(db.register(register_id).unwrap().pending_recalc);
    }

    #[test]
    fn updating_without_timeout_change_keeps_flag_clear() {
        let (db, register_id) = open_with_register();

        let mut updated = settings();
        updated.name = "Renamed".into();
        db.update_register(register_id, &updated).unwrap();

        let register = db.register(register_id).unwrap();
        assert_eq!(register.name, "Renamed");
        assert!(!register.pending_recalc);
    }

    #[test]
    fn insert_online_sessions_is_batched() {
        let (mut db, register) = open_with_register();
        let written = db
            .insert_online_sessions(register, user(1), &[interval(0, 200), interval(2000, 2100)])
            .unwrap();
        assert_eq!(written, 2);

        let sessions = db.user_sessions(register, user(1)).unwrap();
        assert_eq!(sessions.len(), 2);
        assert_eq!(sessions[0].login, ts(0));
        assert_eq!(sessions[0].logout, ts(200));
        assert_eq!(sessions[0].duration_secs(), 200);
        assert!(sessions[0].kind.is_online());
    }

    #[test]
    fn offline_session_keeps_ref_course_and_submitter() {
        let (db, register) = open_with_register();
        let id = db
            .insert_offline_session(
                register,
                &NewOfflineSession {
                    user: user(1),
                    login: ts(100),
                    logout: ts(700),
                    ref_course: Some(CourseId::new(4).unwrap()),
                    comments: Some("lab work".into()),
                    added_by: Some(user(2)),
                },
            )
            .unwrap();

        let sessions = db.user_sessions(register, user(1)).unwrap();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].id, id);
        assert_eq!(sessions[0].kind, SessionKind::Offline);
        assert_eq!(sessions[0].ref_course, Some(CourseId::new(4).unwrap()));
        assert_eq!(sessions[0].comments.as_deref(), Some("lab work"));
        assert_eq!(sessions[0].added_by, Some(user(2)));
        assert_eq!(sessions[0].duration_secs(), 600);
    }

    #[test]
    fn delete_online_sessions_spares_offline_rows() {
        let (mut db, register) = open_with_register();
        db.insert_online_sessions(register, user(1), &[interval(0, 200)])
            .unwrap();
        db.insert_offline_session(
            register,
            &NewOfflineSession {
                user: user(1),
                login: ts(1000),
                logout: ts(1600),
                ref_course: None,
                comments: None,
                added_by: None,
            },
        )
        .unwrap();

        let deleted = db.delete_online_sessions(register, user(1), None).unwrap();
        assert_eq!(deleted, 1);

        let remaining = db.user_sessions(register, user(1)).unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].kind, SessionKind::Offline);
    }

    #[test]
    fn delete_online_sessions_honors_lower_bound() {
        let (mut db, register) = open_with_register();
        db.insert_online_sessions(
            register,
            user(1),
            &[interval(0, 200), interval(5000, 5200), interval(9000, 9100)],
        )
        .unwrap();

        let deleted = db
            .delete_online_sessions(register, user(1), Some(ts(5000)))
            .unwrap();
        assert_eq!(deleted, 2);

        let remaining = db.user_sessions(register, user(1)).unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].login, ts(0));
    }

    #[test]
    fn delete_offline_session_ignores_online_rows() {
        let (mut db, register) = open_with_register();
        db.insert_online_sessions(register, user(1), &[interval(0, 200)])
            .unwrap();
        let online_id = db.user_sessions(register, user(1)).unwrap()[0].id;

        let deleted = db.delete_offline_session(register, user(1), online_id).unwrap();
        assert!(!deleted);
        assert_eq!(db.user_sessions(register, user(1)).unwrap().len(), 1);
    }

    #[test]
    fn overlap_probe_uses_inclusive_bounds() {
        let (mut db, register) = open_with_register();
        db.insert_online_sessions(register, user(1), &[interval(1000, 2000)])
            .unwrap();

        // Overlapping from the left, right, inside, and around.
        assert!(db.has_overlapping_session(register, user(1), ts(500), ts(1500)).unwrap());
        assert!(db.has_overlapping_session(register, user(1), ts(1500), ts(2500)).unwrap());
        assert!(db.has_overlapping_session(register, user(1), ts(1200), ts(1300)).unwrap());
        assert!(db.has_overlapping_session(register, user(1), ts(500), ts(2500)).unwrap());
        // Touching an endpoint counts.
        assert!(db.has_overlapping_session(register, user(1), ts(2000), ts(2500)).unwrap());
        // Clear of the stored row.
        assert!(!db.has_overlapping_session(register, user(1), ts(2001), ts(2500)).unwrap());
        assert!(!db.has_overlapping_session(register, user(1), ts(0), ts(999)).unwrap());
        // Another user's sessions don't interfere.
        assert!(!db.has_overlapping_session(register, user(2), ts(1200), ts(1300)).unwrap());
    }

    #[test]
    fn replace_user_aggregates_swaps_the_full_set() {
        let (mut db, register) = open_with_register();
        let first = vec![Aggregate {
            register,
            user: user(1),
            kind: AggregateKind::OnlineTotal,
            duration_secs: 100,
            last_session_logout: None,
        }];
        db.replace_user_aggregates(register, user(1), &first).unwrap();

        let second = vec![
            Aggregate {
                register,
                user: user(1),
                kind: AggregateKind::OnlineTotal,
                duration_secs: 400,
                last_session_logout: None,
            },
            Aggregate {
                register,
                user: user(1),
                kind: AggregateKind::GrandTotal,
                duration_secs: 400,
                last_session_logout: Some(ts(5400)),
            },
        ];
        db.replace_user_aggregates(register, user(1), &second).unwrap();

        let stored = db.user_aggregates(register, user(1)).unwrap();
        assert_eq!(stored, second);

        let grand = db.grand_total(register, user(1)).unwrap().unwrap();
        assert_eq!(grand.duration_secs, 400);
        assert_eq!(grand.last_session_logout, Some(ts(5400)));
    }

    #[test]
    fn malformed_aggregate_rows_are_skipped() {
        let (db, register) = open_with_register();
        db.conn
            .execute(
                "
                INSERT INTO aggregates
                (register, userid, online, total, grand_total, ref_course, duration_secs)
                VALUES (?, 1, 1, 0, 0, NULL, 50)
                ",
                [register.get()],
            )
            .unwrap();

        let aggregates = db.user_aggregates(register, user(1)).unwrap();
        assert!(aggregates.is_empty());
    }

    #[test]
    fn aggregate_summaries_skip_per_course_rows() {
        let (mut db, register) = open_with_register();
        let rows = vec![
            Aggregate {
                register,
                user: user(1),
                kind: AggregateKind::OfflineRefCourse(Some(CourseId::new(3).unwrap())),
                duration_secs: 60,
                last_session_logout: None,
            },
            Aggregate {
                register,
                user: user(1),
                kind: AggregateKind::OfflineTotal,
                duration_secs: 60,
                last_session_logout: None,
            },
            Aggregate {
                register,
                user: user(1),
                kind: AggregateKind::OnlineTotal,
                duration_secs: 40,
                last_session_logout: None,
            },
            Aggregate {
                register,
                user: user(1),
                kind: AggregateKind::GrandTotal,
                duration_secs: 100,
                last_session_logout: None,
            },
        ];
        db.replace_user_aggregates(register, user(1), &rows).unwrap();

        let summaries = db.aggregate_summaries(register).unwrap();
        assert_eq!(summaries.len(), 3);
        assert!(
            summaries
                .iter()
                .all(|a| !matches!(a.kind, AggregateKind::OfflineRefCourse(_)))
        );
    }

    #[test]
    fn lock_claim_is_exclusive_until_released() {
        let (db, register) = open_with_register();

        assert!(db.try_claim_lock(register, user(1), ts(1000)).unwrap());
        assert!(!db.try_claim_lock(register, user(1), ts(1001)).unwrap());
        assert!(db.lock_exists(register, user(1)).unwrap());

        // A different user's lock is independent.
        assert!(db.try_claim_lock(register, user(2), ts(1000)).unwrap());

        db.release_lock(register, user(1)).unwrap();
        assert!(!db.lock_exists(register, user(1)).unwrap());
        assert!(db.try_claim_lock(register, user(1), ts(1002)).unwrap());
    }

    #[test]
    fn release_lock_tolerates_missing_lock() {
        let (db, register) = open_with_register();
        db.release_lock(register, user(1)).unwrap();
    }

    #[test]
    fn orphaned_locks_are_purged_after_the_staleness_window() {
        let (db, register) = open_with_register();
        db.try_claim_lock(register, user(1), ts(0)).unwrap();
        db.try_claim_lock(register, user(2), ts(1500)).unwrap();

        // 30 minutes after the first claim: only the first lock is stale.
        let purged = db.purge_orphaned_locks(ts(30 * 60 + 1)).unwrap();
        assert_eq!(purged, 1);
        assert!(!db.lock_exists(register, user(1)).unwrap());
        assert!(db.lock_exists(register, user(2)).unwrap());
    }

    #[test]
    fn deleting_a_register_cascades_to_derived_rows() {
        let (mut db, register) = open_with_register();
        db.insert_online_sessions(register, user(1), &[interval(0, 200)])
            .unwrap();
        db.replace_user_aggregates(
            register,
            user(1),
            &[Aggregate {
                register,
                user: user(1),
                kind: AggregateKind::GrandTotal,
                duration_secs: 200,
                last_session_logout: Some(ts(200)),
            }],
        )
        .unwrap();
        db.try_claim_lock(register, user(1), ts(0)).unwrap();

        db.delete_register(register).unwrap();

        for table in ["sessions", "aggregates", "locks"] {
            let count: i64 = db
                .conn
                .query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))
                .unwrap();
            assert_eq!(count, 0, "{table} should be empty after cascade");
        }
    }

    #[test]
    fn database_persists_across_reopen() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("atr.db");

        let register = {
            let db = Database::open(&path).unwrap();
            db.create_register(&settings()).unwrap()
        };

        let db = Database::open(&path).unwrap();
        assert_eq!(db.register(register).unwrap().name, "Attendance");
    }
}
