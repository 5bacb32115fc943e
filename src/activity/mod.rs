//! Working / idle / stuck classification of agent sessions.
//!
//! Two independent policies live here. [`classify`] looks at git: uncommitted
//! changes and the age of the last commit. [`recency::classify_recency`]
//! looks at when the session record was last touched. They use different
//! thresholds and are not expected to agree.

mod monitor;
pub mod recency;

pub use monitor::ActivityMonitor;
pub use recency::{classify_recency, RecencyStatus};

use chrono::{DateTime, Duration, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Commits up to this old (seconds) mean the agent is working.
pub const WORKING_COMMIT_SECS: i64 = 60 * 60;
/// Commits at least this old (seconds) mean the agent is stuck.
pub const STUCK_COMMIT_SECS: i64 = 2 * 60 * 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ActivityStatus {
    Working,
    #[default]
    Idle,
    Stuck,
}

impl ActivityStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActivityStatus::Working => "working",
            ActivityStatus::Idle => "idle",
            ActivityStatus::Stuck => "stuck",
        }
    }
}

impl fmt::Display for ActivityStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Git activity of one session's worktree.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ActivityMetrics {
    pub commit_count: u32,
    /// Uncommitted changes since the last commit.
    pub insertions: u32,
    pub deletions: u32,
    pub files_changed: u32,
    /// `None` when the branch has never been committed to.
    pub last_commit_at: Option<DateTime<Utc>>,
    pub status: ActivityStatus,
}

impl ActivityMetrics {
    pub fn has_uncommitted_changes(&self) -> bool {
        self.insertions != 0 || self.deletions != 0 || self.files_changed != 0
    }
}

/// Classify from git activity.
///
/// Uncommitted changes always count as working. Otherwise the last commit's
/// age decides: up to one hour working, under two hours idle, two hours or
/// more stuck. A session with no commit and no changes is idle.
pub fn classify(metrics: Option<&ActivityMetrics>, now: DateTime<Utc>) -> ActivityStatus {
    let Some(metrics) = metrics else {
        return ActivityStatus::Idle;
    };
    if metrics.has_uncommitted_changes() {
        return ActivityStatus::Working;
    }
    let Some(last_commit) = metrics.last_commit_at else {
        return ActivityStatus::Idle;
    };

    let age = now - last_commit;
    if age <= Duration::seconds(WORKING_COMMIT_SECS) {
        ActivityStatus::Working
    } else if age < Duration::seconds(STUCK_COMMIT_SECS) {
        ActivityStatus::Idle
    } else {
        ActivityStatus::Stuck
    }
}

/// Counts from a `git diff --shortstat` line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DiffStat {
    pub insertions: u32,
    pub deletions: u32,
    pub files_changed: u32,
}

static RE_FILES: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\d+) files? changed").unwrap());
static RE_INSERTIONS: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\d+) insertions?\(\+\)").unwrap());
static RE_DELETIONS: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\d+) deletions?\(-\)").unwrap());

fn capture_count(re: &Regex, text: &str) -> u32 {
    re.captures(text)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
        .unwrap_or(0)
}

/// Parse ` N files changed, M insertions(+), K deletions(-)`. Any clause may
/// be missing; missing clauses and unrecognised input read as zero.
pub fn parse_shortstat(text: &str) -> DiffStat {
    DiffStat {
        insertions: capture_count(&RE_INSERTIONS, text),
        deletions: capture_count(&RE_DELETIONS, text),
        files_changed: capture_count(&RE_FILES, text),
    }
}
