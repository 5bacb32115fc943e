use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Lifecycle status of a tracked agent session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    /// A client is attached to the session.
    Attached,
    /// The agent is working.
    Running,
    /// The agent is waiting at its prompt.
    Ready,
    /// Tracked in state but no live tmux session.
    Inactive,
    #[default]
    Unknown,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Attached => "attached",
            SessionStatus::Running => "running",
            SessionStatus::Ready => "ready",
            SessionStatus::Inactive => "inactive",
            SessionStatus::Unknown => "unknown",
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An agent session as presented to callers.
///
/// `name` is the join key between durable state and tmux and never changes
/// for the life of the session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub name: String,
    pub agent_name: String,
    pub model: String,
    pub prompt: String,
    pub status: SessionStatus,
    pub insertions: u32,
    pub deletions: u32,
    pub worktree_path: PathBuf,
    /// Dev-server port, 0 when none.
    pub port: u16,
    pub created_at: String,
    pub updated_at: String,
}

impl SessionRecord {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            agent_name: crate::agent::extract_agent_name(&name),
            name,
            model: String::new(),
            prompt: String::new(),
            status: SessionStatus::Unknown,
            insertions: 0,
            deletions: 0,
            worktree_path: PathBuf::new(),
            port: 0,
            created_at: String::new(),
            updated_at: String::new(),
        }
    }

    pub fn has_port(&self) -> bool {
        self.port != 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_derives_agent_name() {
        let record = SessionRecord::new("agent-widgets-a1b2c3d-claude-2");
        assert_eq!(record.agent_name, "claude-2");
        assert!(!record.has_port());
    }

    #[test]
    fn test_status_serializes_lowercase() {
        let json = serde_json::to_string(&SessionStatus::Running).unwrap();
        assert_eq!(json, "\"running\"");
        assert_eq!(SessionStatus::Inactive.to_string(), "inactive");
    }
}
