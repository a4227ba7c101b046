//! Recalculation engines for the attendance register.
//!
//! [`Coordinator`] orchestrates the full per-user flow: lock check,
//! needs-update detection, segmentation, aggregation, and lock release.
//! The segmentation and aggregation passes themselves live in their own
//! modules and are driven exclusively through the coordinator.

mod aggregation;
mod coordinator;
mod offline;
mod segmentation;

use thiserror::Error;

use atr_core::{OfflineSessionError, RegisterId, SessionId, SourceError, UserId};
use atr_db::DbError;

pub use coordinator::{Coordinator, PeriodicStats};

/// Engine failures.
#[derive(Debug, Error)]
pub enum EngineError {
    /// A persistence operation failed.
    #[error(transparent)]
    Db(#[from] DbError),
    /// A collaborator (event source, directory, completion sink) failed.
    #[error(transparent)]
    Source(#[from] SourceError),
    /// An offline-session submission violated an admission rule.
    #[error(transparent)]
    Rejected(#[from] OfflineSessionError),
    /// A forced recalculation found the user already locked.
    #[error("a recalculation is already in progress for user {user} in register {register}")]
    LockHeld { register: RegisterId, user: UserId },
    /// The referenced offline session does not exist for the user.
    #[error("offline session {session} not found for user {user}")]
    SessionNotFound { session: SessionId, user: UserId },
}
