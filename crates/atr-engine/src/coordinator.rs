//! Recalculation coordination: locking, needs-update detection, and the
//! incremental, forced, and batch recalculation paths.

use chrono::{DateTime, Utc};

use atr_core::{
    CompletionSink, Directory, EventSource, ProgressObserver, Register, RunContext, UserId,
};
use atr_db::Database;

use crate::{EngineError, aggregation, segmentation};

const ALREADY_UP_TO_DATE: &str = "online sessions already up to date";

/// Orchestrates per-user session recalculation.
///
/// Owns the lock discipline: a lock is claimed before segmenting, released
/// after aggregating (or on failure), and never held across users. All entry
/// points take an explicit [`RunContext`] instead of reading ambient
/// current-user or clock state.
pub struct Coordinator<'a> {
    pub(crate) db: &'a mut Database,
    pub(crate) events: &'a dyn EventSource,
    pub(crate) directory: &'a dyn Directory,
    pub(crate) completion: &'a dyn CompletionSink,
}

/// What the needs-update check decided for a user.
enum UpdateNeed {
    UpToDate,
    FromBeginning,
    Resume(DateTime<Utc>),
}

/// Outcome of one periodic-driver pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PeriodicStats {
    pub purged_locks: usize,
    pub registers: usize,
    pub users_updated: usize,
}

impl<'a> Coordinator<'a> {
    pub fn new(
        db: &'a mut Database,
        events: &'a dyn EventSource,
        directory: &'a dyn Directory,
        completion: &'a dyn CompletionSink,
    ) -> Self {
        Self {
            db,
            events,
            directory,
            completion,
        }
    }

    /// Updates a user's derived sessions if they are stale.
    ///
    /// The incremental path backs off silently when another run holds the
    /// lock (reporting "already up to date" to any progress observer) and
    /// resumes segmentation from the cached last online logout. With
    /// `forced`, the user is fully recalculated instead, deleting prior
    /// online sessions first.
    ///
    /// Returns whether any new sessions were found.
    pub fn update_user_sessions(
        &mut self,
        register: &Register,
        user: UserId,
        ctx: &RunContext,
        mut progress: Option<&mut dyn ProgressObserver>,
        forced: bool,
    ) -> Result<bool, EngineError> {
        if forced {
            return self
                .force_recalc_user(register, user, ctx, progress, true)
                .map(|created| created > 0);
        }

        if self.db.lock_exists(register.id, user)? {
            finalize(&mut progress, ALREADY_UP_TO_DATE);
            return Ok(false);
        }

        let from = match self.update_need(register, user)? {
            UpdateNeed::UpToDate => {
                finalize(&mut progress, ALREADY_UP_TO_DATE);
                return Ok(false);
            }
            UpdateNeed::FromBeginning => None,
            UpdateNeed::Resume(at) => Some(at),
        };

        if !self.db.try_claim_lock(register.id, user, ctx.now)? {
            // Lost the claim to a concurrent run; that run does the work.
            finalize(&mut progress, ALREADY_UP_TO_DATE);
            return Ok(false);
        }
        let result = self.segment_and_aggregate(register, user, from, ctx.now, progress);
        let released = self.db.release_lock(register.id, user);
        let created = result?;
        released?;
        Ok(created > 0)
    }

    /// Forces a full recalculation of one user, returning the number of
    /// sessions derived.
    ///
    /// With `delete_old`, prior online sessions newer than the user's
    /// oldest site activity are deleted first, along with all aggregates,
    /// guaranteeing a clean rebuild. Fails with [`EngineError::LockHeld`]
    /// when a concurrent recalculation holds the user's lock.
    pub fn force_recalc_user(
        &mut self,
        register: &Register,
        user: UserId,
        ctx: &RunContext,
        progress: Option<&mut dyn ProgressObserver>,
        delete_old: bool,
    ) -> Result<usize, EngineError> {
        if !self.db.try_claim_lock(register.id, user, ctx.now)? {
            return Err(EngineError::LockHeld {
                register: register.id,
                user,
            });
        }
        let result = self.rebuild_user(register, user, ctx.now, progress, delete_old);
        let released = self.db.release_lock(register.id, user);
        let created = result?;
        released?;
        Ok(created)
    }

    /// Forces a full recalculation of every tracked user.
    ///
    /// One user's failure never aborts the rest: it is logged and the batch
    /// moves on. Returns the number of users recalculated.
    pub fn force_recalc_all(
        &mut self,
        register: &Register,
        ctx: &RunContext,
    ) -> Result<usize, EngineError> {
        let users = self.directory.tracked_users(register, None)?;
        let mut recalculated = 0;
        for user in users {
            match self.force_recalc_user(register, user, ctx, None, true) {
                Ok(_) => recalculated += 1,
                Err(e) => tracing::warn!(
                    register = %register.id,
                    user = %user,
                    error = %e,
                    "forced recalculation failed, continuing with remaining users"
                ),
            }
        }
        Ok(recalculated)
    }

    /// Runs the incremental update for every tracked user that needs one.
    ///
    /// Per-user failures are logged and skipped. Returns the number of users
    /// for whom new sessions were found.
    pub fn update_all_needing_recalculation(
        &mut self,
        register: &Register,
        ctx: &RunContext,
    ) -> Result<usize, EngineError> {
        let users = self.directory.tracked_users(register, None)?;
        let mut updated = 0;
        for user in users {
            match self.update_user_sessions(register, user, ctx, None, false) {
                Ok(true) => updated += 1,
                Ok(false) => {}
                Err(e) => tracing::warn!(
                    register = %register.id,
                    user = %user,
                    error = %e,
                    "session update failed, continuing with remaining users"
                ),
            }
        }
        Ok(updated)
    }

    /// One pass of the periodic driver over every register.
    ///
    /// Purges orphaned locks once up front, then per register either runs
    /// the scheduled full recalculation (clearing the pending flag on
    /// success) or the conditional update of all tracked users.
    pub fn run_periodic(&mut self, ctx: &RunContext) -> Result<PeriodicStats, EngineError> {
        let purged_locks = self.db.purge_orphaned_locks(ctx.now)?;
        let registers = self.db.list_registers()?;
        let mut stats = PeriodicStats {
            purged_locks,
            registers: registers.len(),
            users_updated: 0,
        };

        for register in registers {
            if register.pending_recalc {
                match self.force_recalc_all(&register, ctx) {
                    Ok(recalculated) => {
                        stats.users_updated += recalculated;
                        self.db.set_pending_recalc(register.id, false)?;
                    }
                    Err(e) => tracing::warn!(
                        register = %register.id,
                        error = %e,
                        "scheduled full recalculation failed"
                    ),
                }
            } else {
                match self.update_all_needing_recalculation(&register, ctx) {
                    Ok(updated) => stats.users_updated += updated,
                    Err(e) => tracing::warn!(
                        register = %register.id,
                        error = %e,
                        "periodic session update failed"
                    ),
                }
            }
        }
        Ok(stats)
    }

    /// Decides whether a user's sessions are stale, comparing their last
    /// site activity against the cached grand-total logout.
    fn update_need(&self, register: &Register, user: UserId) -> Result<UpdateNeed, EngineError> {
        let subject = self.directory.user(user)?;
        let Some(last_access) = subject.last_access else {
            // Never logged in: nothing can have happened.
            return Ok(UpdateNeed::UpToDate);
        };
        match self.db.grand_total(register.id, user)? {
            None => Ok(UpdateNeed::FromBeginning),
            Some(grand) => match grand.last_session_logout {
                None => Ok(UpdateNeed::FromBeginning),
                Some(last_logout) if last_access > last_logout => {
                    Ok(UpdateNeed::Resume(last_logout))
                }
                Some(_) => Ok(UpdateNeed::UpToDate),
            },
        }
    }

    fn rebuild_user(
        &mut self,
        register: &Register,
        user: UserId,
        now: DateTime<Utc>,
        progress: Option<&mut dyn ProgressObserver>,
        delete_old: bool,
    ) -> Result<usize, EngineError> {
        if delete_old {
            let oldest = self.events.oldest_activity(user)?;
            self.db.delete_online_sessions(register.id, user, oldest)?;
            self.db.delete_user_aggregates(register.id, user)?;
        }
        self.segment_and_aggregate(register, user, None, now, progress)
    }

    /// Segmenting always precedes aggregating; the caller holds the lock.
    fn segment_and_aggregate(
        &mut self,
        register: &Register,
        user: UserId,
        from: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
        progress: Option<&mut dyn ProgressObserver>,
    ) -> Result<usize, EngineError> {
        let created = segmentation::build_new_user_sessions(
            self.db,
            self.events,
            self.directory,
            register,
            user,
            from,
            now,
            progress,
        )?;
        aggregation::update_user_aggregates(self.db, self.completion, register, user)?;
        Ok(created)
    }
}

fn finalize(progress: &mut Option<&mut dyn ProgressObserver>, message: &str) {
    if let Some(observer) = progress.as_mut() {
        observer.update(1, 1, message);
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::{
        FakeDirectory, FakeSource, RecordingSink, register_with_timeout, ts,
    };
    use super::*;
    use atr_core::{RegisterScope, RegisterSettings, SessionKind};
    use atr_db::NewOfflineSession;

    fn user(id: i64) -> UserId {
        UserId::new(id).unwrap()
    }

    fn open_register(db: &Database) -> atr_core::RegisterId {
        db.create_register(&RegisterSettings::new("r", RegisterScope::Global))
            .unwrap()
    }

    const FAR_FUTURE: i64 = 1_000_000;

    #[test]
    fn incremental_update_builds_then_resumes_without_duplicates() {
        let mut db = Database::open_in_memory().unwrap();
        let register_id = open_register(&db);
        let register = register_with_timeout(register_id, 5);
        let events = FakeSource::new(&[0, 100, 200, 2000, 2100]);
        let mut directory = FakeDirectory::new();
        directory.add_user(user(1), "Alice", Some(2100));
        let sink = RecordingSink::default();
        let ctx = RunContext::system(ts(FAR_FUTURE));

        let mut coordinator = Coordinator::new(&mut db, &events, &directory, &sink);
        assert!(
            coordinator
                .update_user_sessions(&register, user(1), &ctx, None, false)
                .unwrap()
        );
        // Re-running immediately: nothing new, nothing duplicated.
        assert!(
            !coordinator
                .update_user_sessions(&register, user(1), &ctx, None, false)
                .unwrap()
        );

        let sessions = db.user_sessions(register_id, user(1)).unwrap();
        assert_eq!(sessions.len(), 2);
        let grand = db.grand_total(register_id, user(1)).unwrap().unwrap();
        assert_eq!(grand.duration_secs, 300);
        assert_eq!(grand.last_session_logout, Some(ts(2100)));
    }

    #[test]
    fn resume_starts_from_the_cached_last_logout() {
        let mut db = Database::open_in_memory().unwrap();
        let register_id = open_register(&db);
        let register = register_with_timeout(register_id, 5);
        let events = FakeSource::new(&[0, 100, 200, 2000, 2100]);
        let mut directory = FakeDirectory::new();
        directory.add_user(user(1), "Alice", Some(2100));
        let sink = RecordingSink::default();
        let ctx = RunContext::system(ts(FAR_FUTURE));

        let mut coordinator = Coordinator::new(&mut db, &events, &directory, &sink);
        coordinator
            .update_user_sessions(&register, user(1), &ctx, None, false)
            .unwrap();

        // New activity arrives after the last derived logout.
        events.add(user(1), &[5000, 5100]);
        directory.set_last_access(user(1), 5100);
        let mut coordinator = Coordinator::new(&mut db, &events, &directory, &sink);
        assert!(
            coordinator
                .update_user_sessions(&register, user(1), &ctx, None, false)
                .unwrap()
        );

        let sessions = db.user_sessions(register_id, user(1)).unwrap();
        assert_eq!(sessions.len(), 3);
        assert_eq!(sessions[2].login, ts(5000));
        assert_eq!(sessions[2].logout, ts(5100));
        let grand = db.grand_total(register_id, user(1)).unwrap().unwrap();
        assert_eq!(grand.last_session_logout, Some(ts(5100)));
    }

    #[test]
    fn held_lock_turns_the_update_into_a_no_op() {
        let mut db = Database::open_in_memory().unwrap();
        let register_id = open_register(&db);
        let register = register_with_timeout(register_id, 5);
        db.try_claim_lock(register_id, user(1), ts(FAR_FUTURE)).unwrap();

        let events = FakeSource::new(&[0, 100, 200]);
        let mut directory = FakeDirectory::new();
        directory.add_user(user(1), "Alice", Some(200));
        let sink = RecordingSink::default();
        let ctx = RunContext::system(ts(FAR_FUTURE));

        let mut coordinator = Coordinator::new(&mut db, &events, &directory, &sink);
        let updated = coordinator
            .update_user_sessions(&register, user(1), &ctx, None, false)
            .unwrap();

        assert!(!updated);
        assert!(db.user_sessions(register_id, user(1)).unwrap().is_empty());
        assert!(db.user_aggregates(register_id, user(1)).unwrap().is_empty());
    }

    #[test]
    fn lock_is_released_after_a_successful_update() {
        let mut db = Database::open_in_memory().unwrap();
        let register_id = open_register(&db);
        let register = register_with_timeout(register_id, 5);
        let events = FakeSource::new(&[0, 100]);
        let mut directory = FakeDirectory::new();
        directory.add_user(user(1), "Alice", Some(100));
        let sink = RecordingSink::default();
        let ctx = RunContext::system(ts(FAR_FUTURE));

        let mut coordinator = Coordinator::new(&mut db, &events, &directory, &sink);
        coordinator
            .update_user_sessions(&register, user(1), &ctx, None, false)
            .unwrap();

        assert!(!db.lock_exists(register_id, user(1)).unwrap());
    }

    #[test]
    fn user_who_never_logged_in_needs_no_update() {
        let mut db = Database::open_in_memory().unwrap();
        let register_id = open_register(&db);
        let register = register_with_timeout(register_id, 5);
        let events = FakeSource::new(&[]);
        let directory = FakeDirectory::with_user(user(1), "Alice");
        let sink = RecordingSink::default();
        let ctx = RunContext::system(ts(FAR_FUTURE));

        let mut coordinator = Coordinator::new(&mut db, &events, &directory, &sink);
        let updated = coordinator
            .update_user_sessions(&register, user(1), &ctx, None, false)
            .unwrap();

        assert!(!updated);
        assert!(!db.lock_exists(register_id, user(1)).unwrap());
    }

    #[test]
    fn forced_recalc_rebuilds_online_sessions_and_keeps_offline() {
        let mut db = Database::open_in_memory().unwrap();
        let register_id = open_register(&db);
        let register = register_with_timeout(register_id, 5);
        let events = FakeSource::new(&[0, 100, 200, 2000, 2100]);
        let mut directory = FakeDirectory::new();
        directory.add_user(user(1), "Alice", Some(2100));
        let sink = RecordingSink::default();
        let ctx = RunContext::system(ts(FAR_FUTURE));

        let mut coordinator = Coordinator::new(&mut db, &events, &directory, &sink);
        coordinator
            .update_user_sessions(&register, user(1), &ctx, None, false)
            .unwrap();
        db.insert_offline_session(
            register_id,
            &NewOfflineSession {
                user: user(1),
                login: ts(50_000),
                logout: ts(53_600),
                ref_course: None,
                comments: None,
                added_by: None,
            },
        )
        .unwrap();

        let mut coordinator = Coordinator::new(&mut db, &events, &directory, &sink);
        let created = coordinator
            .force_recalc_user(&register, user(1), &ctx, None, true)
            .unwrap();
        assert_eq!(created, 2);

        let sessions = db.user_sessions(register_id, user(1)).unwrap();
        assert_eq!(sessions.len(), 3);
        assert_eq!(
            sessions.iter().filter(|s| s.kind == SessionKind::Offline).count(),
            1
        );

        // Fresh grand total: re-derived online durations plus the offline one.
        let grand = db.grand_total(register_id, user(1)).unwrap().unwrap();
        assert_eq!(grand.duration_secs, 300 + 3600);
        assert!(!db.lock_exists(register_id, user(1)).unwrap());
    }

    #[test]
    fn forced_recalc_fails_fast_when_locked() {
        let mut db = Database::open_in_memory().unwrap();
        let register_id = open_register(&db);
        let register = register_with_timeout(register_id, 5);
        db.try_claim_lock(register_id, user(1), ts(FAR_FUTURE)).unwrap();

        let events = FakeSource::new(&[0, 100]);
        let mut directory = FakeDirectory::new();
        directory.add_user(user(1), "Alice", Some(100));
        let sink = RecordingSink::default();
        let ctx = RunContext::system(ts(FAR_FUTURE));

        let mut coordinator = Coordinator::new(&mut db, &events, &directory, &sink);
        let result = coordinator.force_recalc_user(&register, user(1), &ctx, None, true);
        assert!(matches!(result, Err(EngineError::LockHeld { .. })));
    }

    #[test]
    fn batch_update_isolates_per_user_failures() {
        let mut db = Database::open_in_memory().unwrap();
        let register_id = open_register(&db);
        let register = register_with_timeout(register_id, 5);
        let events = FakeSource::new(&[0, 100]);
        events.add(user(3), &[500, 600]);
        let mut directory = FakeDirectory::new();
        directory.add_user(user(1), "Alice", Some(100));
        // User 2 is tracked but the directory has no record: lookup fails.
        directory.track_unknown(user(2));
        directory.add_user(user(3), "Carol", Some(600));
        let sink = RecordingSink::default();
        let ctx = RunContext::system(ts(FAR_FUTURE));

        let mut coordinator = Coordinator::new(&mut db, &events, &directory, &sink);
        let updated = coordinator
            .update_all_needing_recalculation(&register, &ctx)
            .unwrap();

        assert_eq!(updated, 2);
        assert_eq!(db.user_sessions(register_id, user(1)).unwrap().len(), 1);
        assert_eq!(db.user_sessions(register_id, user(3)).unwrap().len(), 1);
    }

    #[test]
    fn periodic_run_honors_the_pending_recalc_flag() {
        let mut db = Database::open_in_memory().unwrap();
        let register_id = open_register(&db);
        db.set_pending_recalc(register_id, true).unwrap();

        let events = FakeSource::new(&[0, 100]);
        let mut directory = FakeDirectory::new();
        directory.add_user(user(1), "Alice", Some(100));
        let sink = RecordingSink::default();
        let ctx = RunContext::system(ts(FAR_FUTURE));

        let mut coordinator = Coordinator::new(&mut db, &events, &directory, &sink);
        let stats = coordinator.run_periodic(&ctx).unwrap();

        assert_eq!(stats.registers, 1);
        assert_eq!(stats.users_updated, 1);
        assert!(!db.register(register_id).unwrap().pending_recalc);
        assert_eq!(db.user_sessions(register_id, user(1)).unwrap().len(), 1);
    }

    #[test]
    fn periodic_run_purges_orphaned_locks_first() {
        let mut db = Database::open_in_memory().unwrap();
        let register_id = open_register(&db);
        // Stale lock from a crashed run, far older than the purge window.
        db.try_claim_lock(register_id, user(1), ts(0)).unwrap();

        let events = FakeSource::new(&[0, 100]);
        let mut directory = FakeDirectory::new();
        directory.add_user(user(1), "Alice", Some(100));
        let sink = RecordingSink::default();
        let ctx = RunContext::system(ts(FAR_FUTURE));

        let mut coordinator = Coordinator::new(&mut db, &events, &directory, &sink);
        let stats = coordinator.run_periodic(&ctx).unwrap();

        assert_eq!(stats.purged_locks, 1);
        // With the orphan gone, the user's update went through.
        assert_eq!(stats.users_updated, 1);
        assert_eq!(db.user_sessions(register_id, user(1)).unwrap().len(), 1);
    }

    #[test]
    fn hot_trailing_activity_defers_but_reports_no_update() {
        let mut db = Database::open_in_memory().unwrap();
        let register_id = open_register(&db);
        let register = register_with_timeout(register_id, 5);
        // All activity within the timeout of "now": the session is still hot.
        let events = FakeSource::new(&[900, 1000, 1100]);
        let mut directory = FakeDirectory::new();
        directory.add_user(user(1), "Alice", Some(1100));
        let sink = RecordingSink::default();
        let ctx = RunContext::system(ts(1200));

        let mut coordinator = Coordinator::new(&mut db, &events, &directory, &sink);
        let updated = coordinator
            .update_user_sessions(&register, user(1), &ctx, None, false)
            .unwrap();

        assert!(!updated);
        assert!(db.user_sessions(register_id, user(1)).unwrap().is_empty());
        // Aggregation still ran, so the zero online-total row exists.
        assert_eq!(db.user_aggregates(register_id, user(1)).unwrap().len(), 2);
    }
}
