//! Classification by how recently a session record was updated.

use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::session::SessionRecord;

/// Updated this recently (seconds): working.
pub const RECENT_UPDATE_SECS: i64 = 90;
/// Quiet for longer than this (seconds) with a clean tree: stuck.
pub const STALE_UPDATE_SECS: i64 = 3 * 60;

const PLAIN_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecencyStatus {
    Working,
    Idle,
    Stuck,
    Unknown,
}

impl RecencyStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecencyStatus::Working => "working",
            RecencyStatus::Idle => "idle",
            RecencyStatus::Stuck => "stuck",
            RecencyStatus::Unknown => "unknown",
        }
    }
}

impl fmt::Display for RecencyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// RFC 3339 first, then `YYYY-MM-DD HH:MM:SS` read as UTC.
fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, PLAIN_FORMAT)
        .ok()
        .map(|naive| naive.and_utc())
}

/// Classify from the update timestamp, falling back to the creation
/// timestamp when the update timestamp does not parse.
pub fn classify_recency(
    updated_at: &str,
    created_at: &str,
    insertions: u32,
    deletions: u32,
    now: DateTime<Utc>,
) -> RecencyStatus {
    let Some(last) = parse_timestamp(updated_at).or_else(|| parse_timestamp(created_at)) else {
        return RecencyStatus::Unknown;
    };

    let has_diff = insertions > 0 || deletions > 0;
    let quiet = now - last;

    if quiet <= Duration::seconds(RECENT_UPDATE_SECS) || has_diff {
        RecencyStatus::Working
    } else if quiet > Duration::seconds(STALE_UPDATE_SECS) {
        RecencyStatus::Stuck
    } else {
        RecencyStatus::Idle
    }
}

pub fn classify_record(record: &SessionRecord, now: DateTime<Utc>) -> RecencyStatus {
    classify_recency(
        &record.updated_at,
        &record.created_at,
        record.insertions,
        record.deletions,
        now,
    )
}
