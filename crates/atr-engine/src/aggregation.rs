//! Aggregation pass: recompute a user's summary rows from their sessions.

use atr_core::{
    AggregateKind, CompletionSink, Register, UserId, build_user_aggregates, completion_met,
};
use atr_db::Database;

use crate::EngineError;

/// Fully recomputes and replaces the user's aggregate rows, then notifies
/// the completion sink when the register tracks completion.
///
/// The replace happens in a single transaction: either the fresh row set
/// lands in full or the previous rows survive untouched.
pub(crate) fn update_user_aggregates(
    db: &mut Database,
    completion: &dyn CompletionSink,
    register: &Register,
    user: UserId,
) -> Result<(), EngineError> {
    let sessions = db.user_sessions(register.id, user)?;
    let aggregates = build_user_aggregates(register, user, &sessions);
    db.replace_user_aggregates(register.id, user, &aggregates)?;

    if register.completion_enabled() {
        let threshold = register.completion_total_duration_mins.unwrap_or_default();
        let grand_total_secs = aggregates
            .iter()
            .find(|a| a.kind == AggregateKind::GrandTotal)
            .map_or(0, |a| a.duration_secs);
        completion.notify(
            register.id,
            user,
            completion_met(threshold, grand_total_secs),
        )?;
    }

    Ok(())
}
