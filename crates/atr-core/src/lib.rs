//! Core domain logic for the attendance register.
//!
//! This crate contains the fundamental types and algorithms for:
//! - Segmentation: splitting activity-timestamp streams into sessions
//! - Aggregation: deriving summary duration rows from stored sessions
//! - Completion: evaluating total duration against a register threshold
//! - Offline sessions: admission rules for self-certified intervals
//!
//! Storage and orchestration live in `atr-db` and `atr-engine`; the
//! collaborator seams (activity log, user directory, completion recording,
//! progress reporting) are traits in [`source`].

pub mod aggregate;
pub mod completion;
pub mod format;
pub mod offline;
pub mod register;
pub mod segment;
pub mod session;
pub mod source;
pub mod types;

pub use aggregate::{Aggregate, AggregateKind, InconsistentAggregate, build_user_aggregates};
pub use completion::completion_met;
pub use offline::{OfflineSessionError, OfflineSubmission};
pub use register::{Register, RegisterScope, RegisterSettings};
pub use segment::{SegmentedSession, segment_timestamps};
pub use session::{Session, SessionInterval, SessionKind};
pub use source::{
    CompletionSink, Directory, EventSource, NoProgress, ProgressObserver, SourceError, UserRecord,
};
pub use types::{
    CategoryId, CourseId, GroupId, RegisterId, RunContext, SessionId, UserId, ValidationError,
};
