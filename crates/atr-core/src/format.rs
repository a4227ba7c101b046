//! Display helpers for durations and comments.

/// Formats a duration in seconds as `"3h 25m"`, or `"45m"` under an hour.
#[must_use]
pub fn format_duration(duration_secs: i64) -> String {
    let duration_secs = duration_secs.max(0);
    let hours = duration_secs / 3600;
    let minutes = (duration_secs % 3600) / 60;
    if hours > 0 {
        format!("{hours}h {minutes}m")
    } else {
        format!("{minutes}m")
    }
}

/// Shortens a comment for list display without truncating mid-word.
#[must_use]
pub fn shorten_comment(text: &str, max_len: usize) -> String {
    if text.chars().count() <= max_len {
        return text.to_string();
    }

    let prefix: String = text.chars().take(max_len).collect();
    let cut = prefix.rfind(' ').unwrap_or(prefix.len());
    format!("{}...", &prefix[..cut])
}
