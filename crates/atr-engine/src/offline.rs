//! Offline-session submission and deletion workflow.
//!
//! Runs the full admission check chain: the pure rules from
//! `atr_core::offline`, the stored-session overlap probe, and the
//! live-session overlap check against the directory record, then persists
//! and re-aggregates.

use atr_core::{
    OfflineSessionError, OfflineSubmission, Register, RunContext, SessionId, UserId,
    offline::{overlaps_live_session, validate_submission},
};
use atr_db::NewOfflineSession;

use crate::coordinator::Coordinator;
use crate::{EngineError, aggregation};

impl Coordinator<'_> {
    /// Admits and stores a self-certified offline session for `subject`,
    /// then recomputes their aggregates. Returns the new session's id.
    ///
    /// When the context's actor differs from the subject, the session is
    /// recorded as submitted on their behalf; no actor means the subject
    /// certified it themselves.
    pub fn submit_offline_session(
        &mut self,
        register: &Register,
        subject: UserId,
        submission: OfflineSubmission,
        ctx: &RunContext,
    ) -> Result<SessionId, EngineError> {
        validate_submission(register, &submission, ctx.now)?;

        if let Some(course) = submission.ref_course {
            let tracked = self.directory.tracked_course_ids(register)?;
            if !tracked.contains(&course) {
                return Err(OfflineSessionError::RefCourseNotTracked { course }.into());
            }
        }

        if self.db.has_overlapping_session(
            register.id,
            subject,
            submission.login,
            submission.logout,
        )? {
            return Err(OfflineSessionError::OverlapsStoredSession.into());
        }

        let record = self.directory.user(subject)?;
        let is_self = ctx.actor.is_none_or(|actor| actor == subject);
        if overlaps_live_session(
            &record,
            is_self,
            submission.logout,
            register.session_timeout(),
            ctx.now,
        ) {
            return Err(OfflineSessionError::OverlapsLiveSession.into());
        }

        let comments = if register.offline_comments {
            submission.comments
        } else {
            None
        };
        let session = self.db.insert_offline_session(
            register.id,
            &NewOfflineSession {
                user: subject,
                login: submission.login,
                logout: submission.logout,
                ref_course: submission.ref_course,
                comments,
                added_by: ctx.actor.filter(|actor| *actor != subject),
            },
        )?;

        aggregation::update_user_aggregates(self.db, self.completion, register, subject)?;

        tracing::info!(
            register = %register.id,
            user = %subject,
            session = %session,
            "offline session certified"
        );
        Ok(session)
    }

    /// Deletes one of the user's offline sessions and recomputes their
    /// aggregates. Online sessions cannot be deleted this way.
    pub fn delete_offline_session(
        &mut self,
        register: &Register,
        user: UserId,
        session: SessionId,
    ) -> Result<(), EngineError> {
        if !self.db.delete_offline_session(register.id, user, session)? {
            return Err(EngineError::SessionNotFound { session, user });
        }
        aggregation::update_user_aggregates(self.db, self.completion, register, user)?;
        Ok(())
    }
}
