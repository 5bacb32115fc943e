use std::collections::HashMap;

use agent_fleet::activity::ActivityStatus;
use agent_fleet::SessionRecord;

/// Events handled by the `watch` loop
#[derive(Debug, Clone)]
pub enum Action {
    /// Sessions were re-read from state and tmux
    SessionsUpdated(Vec<SessionRecord>),
    /// Fresh commit-based classification from the activity monitor
    ActivityUpdated(HashMap<String, ActivityStatus>),
    /// An error occurred
    Error(String),
    /// Request to quit
    Quit,
}
