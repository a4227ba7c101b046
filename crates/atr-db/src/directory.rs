//! SQLite-backed collaborators: activity log, user/course directory, and
//! completion recording.
//!
//! These tables stand in for the site services the engines treat as
//! external. [`LogDirectory`] opens its own connection, so a deployment can
//! point it at the same database file as [`Database`](crate::Database) or at
//! a separate one.

use std::path::Path;

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params, params_from_iter};
use rusqlite::types::Value;

use atr_core::{
    CompletionSink, CourseId, Directory, EventSource, GroupId, Register, RegisterId,
    RegisterScope, SourceError, UserId, UserRecord,
};

use crate::{DbError, format_timestamp, parse_timestamp};

/// Activity log and directory tables behind the collaborator traits.
pub struct LogDirectory {
    conn: Connection,
}

impl LogDirectory {
    /// Opens (and initializes) the directory tables at the given path.
    pub fn open(path: &Path) -> Result<Self, DbError> {
        let conn = Connection::open(path)?;
        let directory = Self { conn };
        directory.init()?;
        Ok(directory)
    }

    /// Opens an in-memory directory, for testing.
    pub fn open_in_memory() -> Result<Self, DbError> {
        let conn = Connection::open_in_memory()?;
        let directory = Self { conn };
        directory.init()?;
        Ok(directory)
    }

    fn init(&self) -> Result<(), DbError> {
        self.conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS users (
                id INTEGER PRIMARY KEY,
                display_name TEXT NOT NULL,
                last_access TEXT,
                current_login TEXT,
                group_id INTEGER
            );

            CREATE TABLE IF NOT EXISTS courses (
                id INTEGER PRIMARY KEY,
                category INTEGER NOT NULL DEFAULT 0
            );

            -- Meta-enrolment links: `linked` feeds activity into `course`.
            CREATE TABLE IF NOT EXISTS course_links (
                course INTEGER NOT NULL,
                linked INTEGER NOT NULL,
                PRIMARY KEY (course, linked)
            );

            -- Append-only activity log: one row per tracked user action.
            CREATE TABLE IF NOT EXISTS activity_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                userid INTEGER NOT NULL,
                course INTEGER NOT NULL,
                at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_activity_user ON activity_log(userid, at);
            CREATE INDEX IF NOT EXISTS idx_activity_course ON activity_log(course);

            CREATE TABLE IF NOT EXISTS completion_state (
                register INTEGER NOT NULL,
                userid INTEGER NOT NULL,
                complete INTEGER NOT NULL,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (register, userid)
            );
            ",
        )?;
        Ok(())
    }

    /// Creates or updates a user record.
    pub fn upsert_user(&self, user: &UserRecord) -> Result<(), DbError> {
        self.conn.execute(
            "
            INSERT INTO users (id, display_name, last_access, current_login, group_id)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                display_name = excluded.display_name,
                last_access = excluded.last_access,
                current_login = excluded.current_login,
                group_id = excluded.group_id
            ",
            params![
                user.id.get(),
                user.display_name,
                user.last_access.map(format_timestamp),
                user.current_login.map(format_timestamp),
                user.group.map(GroupId::get),
            ],
        )?;
        Ok(())
    }

    /// Records the start of a login session for a user.
    pub fn set_current_login(&self, user: UserId, at: DateTime<Utc>) -> Result<(), DbError> {
        self.conn.execute(
            "UPDATE users SET current_login = ?, last_access = ? WHERE id = ?",
            params![format_timestamp(at), format_timestamp(at), user.get()],
        )?;
        Ok(())
    }

    /// Registers a course with its category.
    pub fn add_course(&self, course: CourseId, category: i64) -> Result<(), DbError> {
        self.conn.execute(
            "INSERT OR REPLACE INTO courses (id, category) VALUES (?, ?)",
            params![course.get(), category],
        )?;
        Ok(())
    }

    /// Links `linked` into `course` (meta enrolment).
    pub fn link_course(&self, course: CourseId, linked: CourseId) -> Result<(), DbError> {
        self.conn.execute(
            "INSERT OR IGNORE INTO course_links (course, linked) VALUES (?, ?)",
            params![course.get(), linked.get()],
        )?;
        Ok(())
    }

    /// Appends an activity-log entry and advances the user's last-access
    /// timestamp when the entry is newer.
    pub fn record_activity(
        &self,
        user: UserId,
        course: CourseId,
        at: DateTime<Utc>,
    ) -> Result<(), DbError> {
        let at = format_timestamp(at);
        self.conn.execute(
            "INSERT INTO activity_log (userid, course, at) VALUES (?, ?, ?)",
            params![user.get(), course.get(), at],
        )?;
        self.conn.execute(
            "UPDATE users SET last_access = ? WHERE id = ? AND (last_access IS NULL OR last_access < ?)",
            params![at, user.get(), at],
        )?;
        Ok(())
    }

    /// Lists all registered users ordered by id.
    pub fn list_users(&self) -> Result<Vec<UserRecord>, DbError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, display_name, last_access, current_login, group_id FROM users ORDER BY id ASC",
        )?;
        let rows = stmt.query_map([], user_row)?;
        let mut users = Vec::new();
        for row in rows {
            users.push(decode_user(row?)?);
        }
        Ok(users)
    }

    /// The recorded completion state for a user, if any.
    pub fn completion_state(
        &self,
        register: RegisterId,
        user: UserId,
    ) -> Result<Option<bool>, DbError> {
        let state = self
            .conn
            .query_row(
                "SELECT complete FROM completion_state WHERE register = ? AND userid = ?",
                params![register.get(), user.get()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(state)
    }

    fn load_user(&self, user: UserId) -> Result<Option<UserRecord>, DbError> {
        let row = self
            .conn
            .query_row(
                "SELECT id, display_name, last_access, current_login, group_id FROM users WHERE id = ?",
                [user.get()],
                user_row,
            )
            .optional()?;
        row.map(decode_user).transpose()
    }

    fn resolve_courses(&self, scope: RegisterScope) -> Result<Vec<CourseId>, DbError> {
        let ids: Vec<i64> = match scope {
            RegisterScope::Course(course) => vec![course.get()],
            RegisterScope::Category(category) => {
                let mut stmt = self
                    .conn
                    .prepare("SELECT id FROM courses WHERE category = ? ORDER BY id ASC")?;
                let rows = stmt.query_map([category.get()], |row| row.get(0))?;
                rows.collect::<Result<_, _>>()?
            }
            RegisterScope::MetaLinked(course) => {
                let mut ids = vec![course.get()];
                let mut stmt = self
                    .conn
                    .prepare("SELECT linked FROM course_links WHERE course = ? ORDER BY linked ASC")?;
                let rows = stmt.query_map([course.get()], |row| row.get(0))?;
                for row in rows {
                    ids.push(row?);
                }
                ids
            }
            RegisterScope::Global => {
                let mut stmt = self.conn.prepare("SELECT id FROM courses ORDER BY id ASC")?;
                let rows = stmt.query_map([], |row| row.get(0))?;
                rows.collect::<Result<_, _>>()?
            }
        };
        ids.into_iter()
            .map(|id| {
                CourseId::new(id).map_err(|e| DbError::InvalidRow {
                    table: "courses",
                    message: e.to_string(),
                })
            })
            .collect()
    }
}

type UserRow = (i64, String, Option<String>, Option<String>, Option<i64>);

fn user_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<UserRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
    ))
}

fn decode_user(row: UserRow) -> Result<UserRecord, DbError> {
    let (id, display_name, last_access, current_login, group) = row;
    let invalid = |message: String| DbError::InvalidRow {
        table: "users",
        message,
    };
    Ok(UserRecord {
        id: UserId::new(id).map_err(|e| invalid(e.to_string()))?,
        display_name,
        last_access: last_access
            .map(|value| parse_timestamp(&value, "users"))
            .transpose()?,
        current_login: current_login
            .map(|value| parse_timestamp(&value, "users"))
            .transpose()?,
        group: group
            .map(|g| GroupId::new(g).map_err(|e| invalid(e.to_string())))
            .transpose()?,
    })
}

fn unavailable(error: DbError) -> SourceError {
    SourceError::Unavailable(error.to_string())
}

impl EventSource for LogDirectory {
    fn activity_timestamps(
        &self,
        user: UserId,
        after: Option<DateTime<Utc>>,
        courses: &[CourseId],
    ) -> Result<Vec<DateTime<Utc>>, SourceError> {
        if courses.is_empty() {
            return Ok(Vec::new());
        }

        let placeholders = vec!["?"; courses.len()].join(", ");
        let mut sql = format!(
            "SELECT at FROM activity_log WHERE userid = ? AND course IN ({placeholders})"
        );
        let mut params: Vec<Value> = vec![Value::Integer(user.get())];
        params.extend(courses.iter().map(|c| Value::Integer(c.get())));
        // The lower bound is exclusive: entries at exactly `after` were
        // already consumed by the run that produced it.
        if let Some(after) = after {
            sql.push_str(" AND at > ?");
            params.push(Value::Text(format_timestamp(after)));
        }
        sql.push_str(" ORDER BY at ASC, id ASC");

        let mut stmt = self.conn.prepare(&sql).map_err(|e| unavailable(e.into()))?;
        let rows = stmt
            .query_map(params_from_iter(params), |row| row.get::<_, String>(0))
            .map_err(|e| unavailable(e.into()))?;

        let mut timestamps = Vec::new();
        for row in rows {
            let value = row.map_err(|e| unavailable(e.into()))?;
            timestamps
                .push(parse_timestamp(&value, "activity_log").map_err(unavailable)?);
        }
        Ok(timestamps)
    }

    fn oldest_activity(&self, user: UserId) -> Result<Option<DateTime<Utc>>, SourceError> {
        let oldest: Option<String> = self
            .conn
            .query_row(
                "SELECT MIN(at) FROM activity_log WHERE userid = ?",
                [user.get()],
                |row| row.get(0),
            )
            .map_err(|e| unavailable(e.into()))?;
        oldest
            .map(|value| parse_timestamp(&value, "activity_log").map_err(unavailable))
            .transpose()
    }
}

impl Directory for LogDirectory {
    fn user(&self, user: UserId) -> Result<UserRecord, SourceError> {
        self.load_user(user)
            .map_err(unavailable)?
            .ok_or(SourceError::UserNotFound { user })
    }

    fn tracked_users(
        &self,
        _register: &Register,
        group: Option<GroupId>,
    ) -> Result<Vec<UserId>, SourceError> {
        let users = self.list_users().map_err(unavailable)?;
        Ok(users
            .into_iter()
            .filter(|u| group.is_none() || u.group == group)
            .map(|u| u.id)
            .collect())
    }

    fn tracked_course_ids(&self, register: &Register) -> Result<Vec<CourseId>, SourceError> {
        self.resolve_courses(register.scope).map_err(unavailable)
    }
}

impl CompletionSink for LogDirectory {
    fn notify(
        &self,
        register: RegisterId,
        user: UserId,
        complete: bool,
    ) -> Result<(), SourceError> {
        self.conn
            .execute(
                "
                INSERT INTO completion_state (register, userid, complete, updated_at)
                VALUES (?, ?, ?, datetime('now'))
                ON CONFLICT(register, userid) DO UPDATE SET
                    complete = excluded.complete,
                    updated_at = excluded.updated_at
                ",
                params![register.get(), user.get(), complete],
            )
            .map_err(|e| unavailable(e.into()))?;
        Ok(())
    }
}
