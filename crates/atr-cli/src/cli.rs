//! Command-line argument definitions.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Attendance register.
///
/// Derives attendance sessions from raw activity logs, maintains aggregate
/// totals per user, and accepts self-certified offline sessions.
#[derive(Debug, Parser)]
#[command(name = "atr", version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to config file.
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available subcommands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Manage register configurations.
    Register {
        #[command(subcommand)]
        action: RegisterAction,
    },

    /// Feed directory records and activity-log entries.
    Ingest {
        #[command(subcommand)]
        event: IngestEvent,
    },

    /// Update derived sessions for one user, or all users needing it.
    Update {
        /// Register id.
        register: i64,

        /// Restrict the update to one user.
        #[arg(long)]
        user: Option<i64>,
    },

    /// Force a full recalculation.
    Recalc {
        /// Register id.
        register: i64,

        /// Recalculate one user instead of every tracked user.
        #[arg(long)]
        user: Option<i64>,

        /// Keep previously derived online sessions instead of deleting them.
        #[arg(long)]
        keep_sessions: bool,

        /// Schedule the recalculation for the next periodic run instead of
        /// running it now.
        #[arg(long, conflicts_with_all = ["user", "keep_sessions"])]
        schedule: bool,
    },

    /// Manage self-certified offline sessions.
    Offline {
        #[command(subcommand)]
        action: OfflineAction,
    },

    /// List a user's recorded sessions.
    Sessions {
        /// Register id.
        register: i64,

        /// User id.
        #[arg(long)]
        user: i64,
    },

    /// Per-user attendance totals for a register.
    Report {
        /// Register id.
        register: i64,

        /// Emit JSON instead of a table.
        #[arg(long)]
        json: bool,
    },

    /// Show database overview.
    Status,

    /// Run one periodic-driver pass over every register.
    Cron,

    /// Dump a register's sessions and aggregates as JSON.
    Export {
        /// Register id.
        register: i64,
    },
}

/// Register management actions.
#[derive(Debug, Subcommand)]
pub enum RegisterAction {
    /// Create a register.
    Create(RegisterOptions),

    /// Edit a register's settings.
    Edit {
        /// Register id.
        id: i64,

        #[command(flatten)]
        options: RegisterOptions,
    },

    /// List registers.
    List,

    /// Delete a register and all of its derived data.
    Delete {
        /// Register id.
        id: i64,
    },
}

/// Settings shared by register create/edit.
#[derive(Debug, clap::Args)]
pub struct RegisterOptions {
    /// Register name.
    #[arg(long)]
    pub name: String,

    /// Track a single course.
    #[arg(long, group = "scope")]
    pub course: Option<i64>,

    /// Track every course in a category.
    #[arg(long, group = "scope")]
    pub category: Option<i64>,

    /// Track a course plus everything meta-linked into it.
    #[arg(long, group = "scope")]
    pub meta: Option<i64>,

    /// Track every course on the site.
    #[arg(long, group = "scope")]
    pub global: bool,

    /// Inactivity gap (minutes) that closes a session.
    #[arg(long, default_value_t = atr_core::register::DEFAULT_SESSION_TIMEOUT_MINS)]
    pub session_timeout: u32,

    /// How many days back an offline session may be certified.
    #[arg(long, default_value_t = atr_core::register::DEFAULT_DAYS_CERTIFIABLE)]
    pub days_certifiable: u32,

    /// Accept self-certified offline sessions.
    #[arg(long)]
    pub offline: bool,

    /// Require a comment on offline sessions.
    #[arg(long)]
    pub require_comment: bool,

    /// Require a reference course on offline sessions.
    #[arg(long)]
    pub require_course: bool,

    /// Completion threshold in minutes of total duration.
    #[arg(long)]
    pub completion_minutes: Option<u32>,
}

/// Directory and activity-log ingest events.
#[derive(Debug, Subcommand)]
pub enum IngestEvent {
    /// Append an activity-log entry.
    Activity {
        /// User id.
        #[arg(long)]
        user: i64,

        /// Course id.
        #[arg(long)]
        course: i64,

        /// Timestamp (RFC 3339).
        #[arg(long)]
        at: String,
    },

    /// Create or update a user record.
    User {
        /// User id.
        #[arg(long)]
        id: i64,

        /// Display name.
        #[arg(long)]
        name: String,

        /// Group id, for group-filtered tracking.
        #[arg(long)]
        group: Option<i64>,
    },

    /// Record the start of a user's login session.
    Login {
        /// User id.
        #[arg(long)]
        user: i64,

        /// Timestamp (RFC 3339).
        #[arg(long)]
        at: String,
    },

    /// Register a course.
    Course {
        /// Course id.
        #[arg(long)]
        id: i64,

        /// Category id.
        #[arg(long, default_value_t = 0)]
        category: i64,
    },

    /// Meta-link a course into another.
    Link {
        /// The register-side course.
        #[arg(long)]
        course: i64,

        /// The course whose activity feeds into it.
        #[arg(long)]
        linked: i64,
    },
}

/// Offline-session actions.
#[derive(Debug, Subcommand)]
pub enum OfflineAction {
    /// Certify an offline session.
    Add {
        /// Register id.
        register: i64,

        /// Subject user id.
        #[arg(long)]
        user: i64,

        /// Session start (RFC 3339).
        #[arg(long)]
        login: String,

        /// Session end (RFC 3339).
        #[arg(long)]
        logout: String,

        /// Reference course id.
        #[arg(long)]
        course: Option<i64>,

        /// Free-text comment.
        #[arg(long)]
        comment: Option<String>,

        /// Submitting user, when certifying on the subject's behalf.
        #[arg(long)]
        actor: Option<i64>,
    },

    /// Delete an offline session.
    Delete {
        /// Register id.
        register: i64,

        /// Subject user id.
        #[arg(long)]
        user: i64,

        /// Session id.
        #[arg(long)]
        session: i64,
    },
}
