//! Core type definitions with validation.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Validation errors for core types.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// The provided id was zero or negative.
    #[error("{field} must be positive, got {value}")]
    NonPositiveId { field: &'static str, value: i64 },

    /// A session interval ended before it started.
    #[error("session logout {logout} is before login {login}")]
    LogoutBeforeLogin {
        login: DateTime<Utc>,
        logout: DateTime<Utc>,
    },

    /// Invalid session kind value.
    #[error("invalid session kind: {value}")]
    InvalidSessionKind { value: String },

    /// Invalid register scope value.
    #[error("invalid register scope: {value}")]
    InvalidRegisterScope { value: String },
}

/// Generates a validated integer ID newtype with common trait implementations.
macro_rules! define_row_id {
    (
        $(#[$meta:meta])*
        $name:ident, $field_name:literal
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(try_from = "i64", into = "i64")]
        pub struct $name(i64);

        impl $name {
            /// Creates a new ID after validation.
            pub const fn new(id: i64) -> Result<Self, ValidationError> {
                if id <= 0 {
                    return Err(ValidationError::NonPositiveId {
                        field: $field_name,
                        value: id,
                    });
                }
                Ok(Self(id))
            }

            /// Returns the raw integer value.
            #[must_use]
            pub const fn get(self) -> i64 {
                self.0
            }
        }

        impl TryFrom<i64> for $name {
            type Error = ValidationError;

            fn try_from(value: i64) -> Result<Self, Self::Error> {
                Self::new(value)
            }
        }

        impl From<$name> for i64 {
            fn from(id: $name) -> Self {
                id.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

define_row_id!(
    /// A validated user identifier.
    UserId, "user ID"
);

define_row_id!(
    /// A validated course identifier.
    CourseId, "course ID"
);

define_row_id!(
    /// A validated course-category identifier.
    CategoryId, "category ID"
);

define_row_id!(
    /// A validated register identifier.
    RegisterId, "register ID"
);

define_row_id!(
    /// A validated session row identifier.
    SessionId, "session ID"
);

define_row_id!(
    /// A validated user-group identifier.
    GroupId, "group ID"
);

/// Explicit call context: who triggered the operation and when.
///
/// Every coordinator entry point receives one of these instead of reading
/// ambient clock or current-user state.
#[derive(Debug, Clone, Copy)]
pub struct RunContext {
    /// Wall-clock time of the invocation.
    pub now: DateTime<Utc>,
    /// The user performing the operation, if any (the periodic driver has none).
    pub actor: Option<UserId>,
}

impl RunContext {
    /// Context for an unattended run (cron, scheduled recalculation).
    #[must_use]
    pub const fn system(now: DateTime<Utc>) -> Self {
        Self { now, actor: None }
    }

    /// Context for an interactive operation performed by `actor`.
    #[must_use]
    pub const fn for_actor(actor: UserId, now: DateTime<Utc>) -> Self {
        Self {
            now,
            actor: Some(actor),
        }
    }
}
