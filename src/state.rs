//! Durable per-session state, one JSON object keyed by session name.
//!
//! The file is read-modify-written without locking. Two fleet processes
//! spawning at the same moment can lose an entry; a single operator on a
//! single host is assumed.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedAgentState {
    pub branch_name: String,
    pub worktree_path: PathBuf,
    /// Agent command the session was started with.
    pub model: String,
    pub prompt: String,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub port: u16,
    #[serde(default)]
    pub created_at: String,
    #[serde(default)]
    pub updated_at: String,
}

fn is_zero(port: &u16) -> bool {
    *port == 0
}

/// What the orchestrator knows about a freshly spawned session.
#[derive(Debug, Clone)]
pub struct AgentEntry {
    pub branch_name: String,
    pub worktree_path: PathBuf,
    pub model: String,
    pub prompt: String,
}

pub trait StateStore: Send + Sync {
    fn get_state_path(&self) -> PathBuf;

    fn load(&self) -> Result<BTreeMap<String, PersistedAgentState>>;

    fn put(&self, session: &str, state: PersistedAgentState) -> Result<()>;

    fn remove_state(&self, session: &str) -> Result<()>;

    /// Tracked session names, sorted.
    fn get_active_sessions(&self) -> Result<Vec<String>> {
        Ok(self.load()?.into_keys().collect())
    }

    fn save_state(&self, session: &str, entry: AgentEntry) -> Result<()> {
        self.save_state_with_port(session, entry, 0)
    }

    /// Insert or update `session`. An existing entry keeps its creation time.
    fn save_state_with_port(&self, session: &str, entry: AgentEntry, port: u16) -> Result<()> {
        let now = chrono::Utc::now().to_rfc3339();
        let created_at = self
            .load()?
            .get(session)
            .map(|existing| existing.created_at.clone())
            .filter(|c| !c.is_empty())
            .unwrap_or_else(|| now.clone());

        self.put(
            session,
            PersistedAgentState {
                branch_name: entry.branch_name,
                worktree_path: entry.worktree_path,
                model: entry.model,
                prompt: entry.prompt,
                port,
                created_at,
                updated_at: now,
            },
        )
    }
}

/// [`StateStore`] backed by a JSON file.
pub struct JsonStateStore {
    path: PathBuf,
}

impl JsonStateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn write_all(&self, states: &BTreeMap<String, PersistedAgentState>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let json = serde_json::to_string_pretty(states).context("Failed to encode state")?;

        // Write beside the target and rename so readers never see a torn file.
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json).with_context(|| format!("Failed to write {}", tmp.display()))?;
        fs::rename(&tmp, &self.path)
            .with_context(|| format!("Failed to replace {}", self.path.display()))?;
        Ok(())
    }
}

impl StateStore for JsonStateStore {
    fn get_state_path(&self) -> PathBuf {
        self.path.clone()
    }

    fn load(&self) -> Result<BTreeMap<String, PersistedAgentState>> {
        read_state_file(&self.path)
    }

    fn put(&self, session: &str, state: PersistedAgentState) -> Result<()> {
        let mut states = self.load()?;
        states.insert(session.to_string(), state);
        self.write_all(&states)
    }

    fn remove_state(&self, session: &str) -> Result<()> {
        let mut states = self.load()?;
        if states.remove(session).is_some() {
            self.write_all(&states)?;
        }
        Ok(())
    }
}

fn read_state_file(path: &Path) -> Result<BTreeMap<String, PersistedAgentState>> {
    if !path.exists() {
        return Ok(BTreeMap::new());
    }
    let raw = fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    if raw.trim().is_empty() {
        return Ok(BTreeMap::new());
    }
    serde_json::from_str(&raw).with_context(|| format!("Failed to parse {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(prompt: &str) -> AgentEntry {
        AgentEntry {
            branch_name: "claude-widgets-a1b2c3d-1700000000".into(),
            worktree_path: PathBuf::from("/data/worktrees/claude-widgets-a1b2c3d-1700000000"),
            model: "claude".into(),
            prompt: prompt.into(),
        }
    }

    #[test]
    fn test_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonStateStore::new(dir.path().join("state.json"));
        assert!(store.load().unwrap().is_empty());
        assert!(store.get_active_sessions().unwrap().is_empty());
    }

    #[test]
    fn test_save_and_remove() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonStateStore::new(dir.path().join("nested").join("state.json"));

        store.save_state("agent-widgets-a1b2c3d-claude", entry("fix it")).unwrap();
        store
            .save_state_with_port("agent-widgets-a1b2c3d-codex", entry("test it"), 3001)
            .unwrap();

        let states = store.load().unwrap();
        assert_eq!(states.len(), 2);
        assert_eq!(states["agent-widgets-a1b2c3d-claude"].port, 0);
        assert_eq!(states["agent-widgets-a1b2c3d-codex"].port, 3001);
        assert_eq!(states["agent-widgets-a1b2c3d-claude"].prompt, "fix it");
        assert!(!states["agent-widgets-a1b2c3d-claude"].created_at.is_empty());

        store.remove_state("agent-widgets-a1b2c3d-claude").unwrap();
        assert_eq!(
            store.get_active_sessions().unwrap(),
            vec!["agent-widgets-a1b2c3d-codex".to_string()]
        );

        // Removing an absent entry is fine.
        store.remove_state("agent-widgets-a1b2c3d-claude").unwrap();
    }

    #[test]
    fn test_update_keeps_created_at() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonStateStore::new(dir.path().join("state.json"));

        store.save_state("s1", entry("one")).unwrap();
        let first = store.load().unwrap()["s1"].clone();
        store.save_state_with_port("s1", entry("two"), 3000).unwrap();
        let second = store.load().unwrap()["s1"].clone();

        assert_eq!(first.created_at, second.created_at);
        assert_eq!(second.prompt, "two");
        assert_eq!(second.port, 3000);
    }

    #[test]
    fn test_reads_entries_without_optional_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        fs::write(
            &path,
            r#"{"s1": {"branch_name": "b", "worktree_path": "/wt", "model": "claude", "prompt": "p"}}"#,
        )
        .unwrap();

        let states = JsonStateStore::new(&path).load().unwrap();
        assert_eq!(states["s1"].port, 0);
        assert_eq!(states["s1"].created_at, "");
    }

    #[test]
    fn test_port_zero_is_not_written() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonStateStore::new(dir.path().join("state.json"));
        store.save_state("s1", entry("p")).unwrap();

        let raw = fs::read_to_string(store.get_state_path()).unwrap();
        assert!(!raw.contains("\"port\""));
    }

    #[test]
    fn test_corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        fs::write(&path, "{not json").unwrap();
        assert!(JsonStateStore::new(&path).load().is_err());
    }
}
