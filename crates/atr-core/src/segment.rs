//! Segmentation: splitting an activity-timestamp stream into sessions.

use chrono::{DateTime, Duration, Utc};

use crate::session::SessionInterval;

/// One session produced by segmentation, with the number of log entries it
/// covers (used for progress reporting).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentedSession {
    pub interval: SessionInterval,
    pub entries: usize,
}

/// Splits an ascending timestamp stream into session intervals.
///
/// A gap strictly greater than `timeout` between consecutive timestamps
/// closes the running session at the earlier timestamp; a gap exactly equal
/// to the timeout does not split. The logout of an emitted session is the
/// exact last-activity timestamp, with no padding.
///
/// The trailing session is only emitted once it has gone cold: if less than
/// `timeout` has elapsed between the final timestamp and `now`, the user may
/// still be active, and those entries are left for a later incremental run.
///
/// `timestamps` must be sorted ascending (the event source contract).
#[must_use]
pub fn segment_timestamps(
    timestamps: &[DateTime<Utc>],
    timeout: Duration,
    now: DateTime<Utc>,
) -> Vec<SegmentedSession> {
    let Some(&first) = timestamps.first() else {
        return Vec::new();
    };

    let mut sessions = Vec::new();
    let mut session_start = first;
    let mut start_index = 0;

    for (i, window) in timestamps.windows(2).enumerate() {
        let (prev, curr) = (window[0], window[1]);
        if curr.signed_duration_since(prev) > timeout {
            // The session ends on the previous entry.
            sessions.push(SegmentedSession {
                interval: SessionInterval {
                    login: session_start,
                    logout: prev,
                },
                entries: i + 1 - start_index,
            });
            session_start = curr;
            start_index = i + 1;
        }
    }

    let last = timestamps[timestamps.len() - 1];
    if now.signed_duration_since(last) > timeout {
        sessions.push(SegmentedSession {
            interval: SessionInterval {
                login: session_start,
                logout: last,
            },
            entries: timestamps.len() - start_index,
        });
    }

    sessions
}
