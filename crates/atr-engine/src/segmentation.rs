//! Segmentation pass: derive and persist new online sessions for one user.

use chrono::{DateTime, Utc};

use atr_core::{
    Directory, EventSource, ProgressObserver, Register, UserId, segment_timestamps,
};
use atr_db::Database;

use crate::EngineError;

/// Derives all new online sessions for a user from activity strictly after
/// `from`, persists them as one batch, and returns how many were created.
///
/// Event-source failure aborts the call before anything is written; the
/// batched insert means a storage failure leaves no partial sessions behind.
pub(crate) fn build_new_user_sessions(
    db: &mut Database,
    events: &dyn EventSource,
    directory: &dyn Directory,
    register: &Register,
    user: UserId,
    from: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    mut progress: Option<&mut dyn ProgressObserver>,
) -> Result<usize, EngineError> {
    let subject = directory.user(user)?;
    let courses = directory.tracked_course_ids(register)?;
    let timestamps = events.activity_timestamps(user, from, &courses)?;
    if timestamps.is_empty() {
        return Ok(0);
    }

    let segmented = segment_timestamps(&timestamps, register.session_timeout(), now);

    let mut processed = 0;
    let mut intervals = Vec::with_capacity(segmented.len());
    for session in &segmented {
        processed += session.entries;
        intervals.push(session.interval);
        if let Some(observer) = progress.as_mut() {
            observer.update(
                processed,
                timestamps.len(),
                &format!("Updating online sessions of {}", subject.display_name),
            );
        }
    }

    db.insert_online_sessions(register.id, user, &intervals)?;

    tracing::debug!(
        register = %register.id,
        user = %user,
        log_entries = timestamps.len(),
        new_sessions = intervals.len(),
        "segmentation pass complete"
    );
    Ok(intervals.len())
}

// Split/finalize semantics are covered by atr_core::segment; the tests here
// exercise persistence and the collaborator plumbing via the coordinator
// tests in `coordinator.rs`.

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinator::test_support::{FakeDirectory, FakeSource, register_with_timeout};
    use atr_core::{RegisterSettings, SessionKind};
    use chrono::TimeZone;

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn user(id: i64) -> UserId {
        UserId::new(id).unwrap()
    }

    #[test]
    fn persists_segmented_sessions_in_one_batch() {
        let mut db = Database::open_in_memory().unwrap();
        let register_id = db
            .create_register(&RegisterSettings::new("r", atr_core::RegisterScope::Global))
            .unwrap();
        let register = register_with_timeout(register_id, 5);
        let directory = FakeDirectory::with_user(user(1), "Alice");
        let events = FakeSource::new(&[0, 100, 200, 2000, 2100]);

        let created = build_new_user_sessions(
            &mut db,
            &events,
            &directory,
            &register,
            user(1),
            None,
            ts(100_000),
            None,
        )
        .unwrap();

        assert_eq!(created, 2);
        let sessions = db.user_sessions(register_id, user(1)).unwrap();
        assert_eq!(sessions.len(), 2);
        assert_eq!(sessions[0].login, ts(0));
        assert_eq!(sessions[0].logout, ts(200));
        assert_eq!(sessions[1].login, ts(2000));
        assert_eq!(sessions[1].logout, ts(2100));
        assert!(sessions.iter().all(|s| s.kind == SessionKind::Online));
    }

    #[test]
    fn no_activity_means_no_sessions() {
        let mut db = Database::open_in_memory().unwrap();
        let register_id = db
            .create_register(&RegisterSettings::new("r", atr_core::RegisterScope::Global))
            .unwrap();
        let register = register_with_timeout(register_id, 5);
        let directory = FakeDirectory::with_user(user(1), "Alice");
        let events = FakeSource::new(&[]);

        let created = build_new_user_sessions(
            &mut db,
            &events,
            &directory,
            &register,
            user(1),
            None,
            ts(100_000),
            None,
        )
        .unwrap();

        assert_eq!(created, 0);
        assert!(db.user_sessions(register_id, user(1)).unwrap().is_empty());
    }

    #[test]
    fn event_source_failure_is_fatal_and_writes_nothing() {
        let mut db = Database::open_in_memory().unwrap();
        let register_id = db
            .create_register(&RegisterSettings::new("r", atr_core::RegisterScope::Global))
            .unwrap();
        let register = register_with_timeout(register_id, 5);
        let directory = FakeDirectory::with_user(user(1), "Alice");
        let events = FakeSource::unavailable();

        let result = build_new_user_sessions(
            &mut db,
            &events,
            &directory,
            &register,
            user(1),
            None,
            ts(100_000),
            None,
        );

        assert!(matches!(result, Err(EngineError::Source(_))));
        assert!(db.user_sessions(register_id, user(1)).unwrap().is_empty());
    }

    #[test]
    fn progress_reports_entries_processed_per_session() {
        struct Recording(Vec<(usize, usize)>);
        impl ProgressObserver for Recording {
            fn update(&mut self, done: usize, total: usize, _message: &str) {
                self.0.push((done, total));
            }
        }

        let mut db = Database::open_in_memory().unwrap();
        let register_id = db
            .create_register(&RegisterSettings::new("r", atr_core::RegisterScope::Global))
            .unwrap();
        let register = register_with_timeout(register_id, 5);
        let directory = FakeDirectory::with_user(user(1), "Alice");
        let events = FakeSource::new(&[0, 100, 200, 2000, 2100]);
        let mut progress = Recording(Vec::new());

        build_new_user_sessions(
            &mut db,
            &events,
            &directory,
            &register,
            user(1),
            None,
            ts(100_000),
            Some(&mut progress),
        )
        .unwrap();

        assert_eq!(progress.0, vec![(3, 5), (5, 5)]);
    }
}
