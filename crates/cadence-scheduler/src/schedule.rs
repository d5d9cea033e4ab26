use chrono::{DateTime, NaiveDate, NaiveDateTime};
use tracing::debug;

use crate::cron::CronExpr;
use crate::types::Schedule;

/// Compute the next execution time (epoch ms) for `schedule`, strictly after
/// `after_ms`.
///
/// Total: malformed input (unparsable timestamp, non-positive interval, bad
/// cron expression) and exhausted schedules both yield `None`.
pub fn resolve_next(schedule: &Schedule, after_ms: i64) -> Option<i64> {
    match schedule {
        Schedule::At { timestamp } => {
            let at = parse_timestamp(timestamp)?;
            // A past or present instant is never re-offered.
            (at > after_ms).then_some(at)
        }

        Schedule::Every {
            interval_ms,
            anchor_ms,
        } => {
            if *interval_ms <= 0 {
                return None;
            }
            match anchor_ms {
                None => after_ms.checked_add(*interval_ms),
                Some(anchor) if after_ms < *anchor => Some(*anchor),
                Some(anchor) => {
                    let steps = after_ms.checked_sub(*anchor)? / interval_ms + 1;
                    steps
                        .checked_mul(*interval_ms)
                        .and_then(|offset| anchor.checked_add(offset))
                }
            }
        }

        Schedule::Cron { expression } => match CronExpr::parse(expression) {
            Ok(expr) => expr.next_after(after_ms),
            Err(e) => {
                debug!(%expression, error = %e, "rejecting cron expression");
                None
            }
        },
    }
}

/// Up to `count` successive occurrences after `after_ms`, for previewing a
/// schedule without creating a job. Stops early once the schedule runs out.
pub fn preview(schedule: &Schedule, after_ms: i64, count: usize) -> Vec<i64> {
    let mut out = Vec::with_capacity(count.min(1024));
    let mut cursor = after_ms;
    while out.len() < count {
        match resolve_next(schedule, cursor) {
            Some(next) => {
                out.push(next);
                cursor = next;
            }
            None => break,
        }
    }
    out
}

/// Parse an ISO-8601 instant into epoch milliseconds.
///
/// Accepts RFC 3339 with an offset, a naive `YYYY-MM-DDTHH:MM:SS[.fff]`
/// (read as UTC) and a bare `YYYY-MM-DD` (midnight UTC).
pub fn parse_timestamp(text: &str) -> Option<i64> {
    let text = text.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.timestamp_millis());
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(text, fmt) {
            return Some(naive.and_utc().timestamp_millis());
        }
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc().timestamp_millis())
}
