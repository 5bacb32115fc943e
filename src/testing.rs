//! In-memory doubles for the transports and the state store.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use anyhow::{bail, Result};
use chrono::{DateTime, Utc};

use crate::error::ExecError;
use crate::exec::{BoxFuture, CommandRunner, Invocation};
use crate::git::VcsTransport;
use crate::state::{PersistedAgentState, StateStore};
use crate::tmux::MultiplexerTransport;

pub fn fake_error(op: &str) -> ExecError {
    ExecError::CommandFailed {
        op: op.to_string(),
        attempt: 1,
        attempts: 1,
        detail: "exit status: 1".to_string(),
        stderr: format!("{} failed", op),
    }
}

/// Replays canned outputs in order; `Ok("")` once they run out.
pub struct ScriptedRunner {
    responses: Mutex<VecDeque<Result<String, ExecError>>>,
    calls: Mutex<Vec<Invocation>>,
}

impl ScriptedRunner {
    pub fn new(responses: Vec<Result<String, ExecError>>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<Invocation> {
        self.calls.lock().unwrap().clone()
    }
}

impl CommandRunner for ScriptedRunner {
    fn run(&self, invocation: Invocation) -> BoxFuture<'_, Result<String, ExecError>> {
        self.calls.lock().unwrap().push(invocation);
        let next = self.responses.lock().unwrap().pop_front();
        Box::pin(async move { next.unwrap_or_else(|| Ok(String::new())) })
    }
}

#[derive(Default)]
struct MuxState {
    list_output: Option<String>,
    windows: HashMap<String, String>,
    panes: HashMap<String, String>,
    captures: HashMap<String, String>,
    failing: HashSet<String>,
    list_calls: usize,
    writes: Vec<String>,
}

/// Scriptable tmux. Operations are failed by their tmux subcommand name
/// (`list-windows`, `send-keys`, ...). Write operations are recorded as
/// one line each.
pub struct FakeMultiplexer {
    state: Mutex<MuxState>,
}

impl FakeMultiplexer {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MuxState {
                list_output: Some(String::new()),
                ..Default::default()
            }),
        }
    }

    /// `None` makes `list-sessions` fail.
    pub fn set_list_output(&self, output: Option<&str>) {
        self.state.lock().unwrap().list_output = output.map(String::from);
    }

    pub fn set_windows(&self, session: &str, output: &str) {
        self.state.lock().unwrap().windows.insert(session.into(), output.into());
    }

    pub fn set_panes(&self, session: &str, output: &str) {
        self.state.lock().unwrap().panes.insert(session.into(), output.into());
    }

    pub fn set_capture(&self, target: &str, content: &str) {
        self.state.lock().unwrap().captures.insert(target.into(), content.into());
    }

    pub fn fail(&self, op: &str) {
        self.state.lock().unwrap().failing.insert(op.into());
    }

    pub fn list_calls(&self) -> usize {
        self.state.lock().unwrap().list_calls
    }

    pub fn writes(&self) -> Vec<String> {
        self.state.lock().unwrap().writes.clone()
    }

    fn read(&self, op: &str, value: impl FnOnce(&MuxState) -> String) -> Result<String, ExecError> {
        let state = self.state.lock().unwrap();
        if state.failing.contains(op) {
            return Err(fake_error(&format!("tmux {}", op)));
        }
        Ok(value(&*state))
    }

    fn write(&self, op: &str, line: String) -> Result<(), ExecError> {
        let mut state = self.state.lock().unwrap();
        if state.failing.contains(op) {
            return Err(fake_error(&format!("tmux {}", op)));
        }
        state.writes.push(line);
        Ok(())
    }
}

impl MultiplexerTransport for FakeMultiplexer {
    fn list_sessions(&self) -> BoxFuture<'_, Result<String, ExecError>> {
        let result = {
            let mut state = self.state.lock().unwrap();
            state.list_calls += 1;
            match (&state.list_output, state.failing.contains("list-sessions")) {
                (Some(out), false) => Ok(out.clone()),
                _ => Err(fake_error("tmux list-sessions")),
            }
        };
        Box::pin(async move { result })
    }

    fn list_windows<'a>(&'a self, session: &'a str) -> BoxFuture<'a, Result<String, ExecError>> {
        let result = self.read("list-windows", |s| s.windows.get(session).cloned().unwrap_or_default());
        Box::pin(async move { result })
    }

    fn list_panes<'a>(&'a self, session: &'a str) -> BoxFuture<'a, Result<String, ExecError>> {
        let result = self.read("list-panes", |s| s.panes.get(session).cloned().unwrap_or_default());
        Box::pin(async move { result })
    }

    fn capture_pane<'a>(&'a self, target: &'a str) -> BoxFuture<'a, Result<String, ExecError>> {
        let result = self.read("capture-pane", |s| s.captures.get(target).cloned().unwrap_or_default());
        Box::pin(async move { result })
    }

    fn new_session<'a>(&'a self, name: &'a str, dir: &'a Path) -> BoxFuture<'a, Result<(), ExecError>> {
        let result = self.write("new-session", format!("new-session {} {}", name, dir.display()));
        Box::pin(async move { result })
    }

    fn rename_window<'a>(&'a self, session: &'a str, window: &'a str) -> BoxFuture<'a, Result<(), ExecError>> {
        let result = self.write("rename-window", format!("rename-window {} {}", session, window));
        Box::pin(async move { result })
    }

    fn new_window<'a>(
        &'a self,
        session: &'a str,
        window: &'a str,
        dir: &'a Path,
    ) -> BoxFuture<'a, Result<(), ExecError>> {
        let result = self.write(
            "new-window",
            format!("new-window {} {} {}", session, window, dir.display()),
        );
        Box::pin(async move { result })
    }

    /// Literal text is recorded as `send-keys`, named keys as `send-key`.
    fn send_keys<'a>(&'a self, target: &'a str, keys: &'a str, enter: bool) -> BoxFuture<'a, Result<(), ExecError>> {
        let mut result = self.write("send-keys", format!("send-keys {} {}", target, keys));
        if enter && result.is_ok() {
            result = self.write("send-keys", format!("send-key {} C-m", target));
        }
        Box::pin(async move { result })
    }

    fn send_key<'a>(&'a self, target: &'a str, key: &'a str) -> BoxFuture<'a, Result<(), ExecError>> {
        let result = self.write("send-keys", format!("send-key {} {}", target, key));
        Box::pin(async move { result })
    }

    fn kill_session<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Result<(), ExecError>> {
        let result = self.write("kill-session", format!("kill-session {}", name));
        Box::pin(async move { result })
    }

    fn attach_command(&self, name: &str) -> Vec<String> {
        vec!["tmux".into(), "attach-session".into(), "-t".into(), name.into()]
    }
}

struct VcsState {
    hash: String,
    remote: String,
    shortstats: HashMap<PathBuf, String>,
    last_commits: HashMap<PathBuf, DateTime<Utc>>,
    commit_counts: HashMap<PathBuf, u32>,
    failing: HashSet<String>,
    calls: Vec<String>,
}

/// Scriptable git for repository `acme/widgets` at `a1b2c3d`. Operations
/// are failed by method name (`create_worktree`, `shortstat`, ...).
pub struct FakeVcs {
    state: Mutex<VcsState>,
}

impl FakeVcs {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(VcsState {
                hash: "a1b2c3d".into(),
                remote: "https://github.com/acme/widgets.git".into(),
                shortstats: HashMap::new(),
                last_commits: HashMap::new(),
                commit_counts: HashMap::new(),
                failing: HashSet::new(),
                calls: Vec::new(),
            }),
        }
    }

    pub fn set_shortstat(&self, worktree: &str, stat: &str) {
        self.state.lock().unwrap().shortstats.insert(worktree.into(), stat.into());
    }

    pub fn set_last_commit(&self, worktree: &str, at: DateTime<Utc>) {
        self.state.lock().unwrap().last_commits.insert(worktree.into(), at);
    }

    pub fn set_commit_count(&self, worktree: &str, count: u32) {
        self.state.lock().unwrap().commit_counts.insert(worktree.into(), count);
    }

    pub fn fail(&self, op: &str) {
        self.state.lock().unwrap().failing.insert(op.into());
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    fn call<T>(&self, op: &str, line: String, value: impl FnOnce(&VcsState) -> T) -> Result<T, ExecError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(line);
        if state.failing.contains(op) {
            return Err(fake_error(&format!("git {}", op)));
        }
        Ok(value(&*state))
    }
}

impl VcsTransport for FakeVcs {
    fn short_hash(&self) -> BoxFuture<'_, Result<String, ExecError>> {
        let result = self.call("short_hash", "short_hash".into(), |s| s.hash.clone());
        Box::pin(async move { result })
    }

    fn remote_url(&self) -> BoxFuture<'_, Result<String, ExecError>> {
        let result = self.call("remote_url", "remote_url".into(), |s| s.remote.clone());
        Box::pin(async move { result })
    }

    fn create_worktree<'a>(&'a self, branch: &'a str, path: &'a Path) -> BoxFuture<'a, Result<(), ExecError>> {
        let line = format!("create_worktree {} {}", branch, path.display());
        let result = self.call("create_worktree", line, |_| ());
        Box::pin(async move { result })
    }

    fn remove_worktree<'a>(&'a self, path: &'a Path) -> BoxFuture<'a, Result<(), ExecError>> {
        let line = format!("remove_worktree {}", path.display());
        let result = self.call("remove_worktree", line, |_| ());
        Box::pin(async move { result })
    }

    fn delete_branch<'a>(&'a self, branch: &'a str) -> BoxFuture<'a, Result<(), ExecError>> {
        let result = self.call("delete_branch", format!("delete_branch {}", branch), |_| ());
        Box::pin(async move { result })
    }

    fn shortstat<'a>(&'a self, worktree: &'a Path) -> BoxFuture<'a, Result<String, ExecError>> {
        let line = format!("shortstat {}", worktree.display());
        let result = self.call("shortstat", line, |s| {
            s.shortstats.get(worktree).cloned().unwrap_or_default()
        });
        Box::pin(async move { result })
    }

    fn last_commit_time<'a>(
        &'a self,
        worktree: &'a Path,
    ) -> BoxFuture<'a, Result<Option<DateTime<Utc>>, ExecError>> {
        let line = format!("last_commit_time {}", worktree.display());
        let result = self.call("last_commit_time", line, |s| s.last_commits.get(worktree).copied());
        Box::pin(async move { result })
    }

    fn commit_count<'a>(&'a self, worktree: &'a Path) -> BoxFuture<'a, Result<u32, ExecError>> {
        let line = format!("commit_count {}", worktree.display());
        let result = self.call("commit_count", line, |s| {
            s.commit_counts.get(worktree).copied().unwrap_or(0)
        });
        Box::pin(async move { result })
    }
}

#[derive(Default)]
pub struct MemoryStateStore {
    states: Mutex<BTreeMap<String, PersistedAgentState>>,
    fail_saves: AtomicBool,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::SeqCst);
    }
}

impl StateStore for MemoryStateStore {
    fn get_state_path(&self) -> PathBuf {
        PathBuf::from(":memory:")
    }

    fn load(&self) -> Result<BTreeMap<String, PersistedAgentState>> {
        Ok(self.states.lock().unwrap().clone())
    }

    fn put(&self, session: &str, state: PersistedAgentState) -> Result<()> {
        if self.fail_saves.load(Ordering::SeqCst) {
            bail!("disk full");
        }
        self.states.lock().unwrap().insert(session.to_string(), state);
        Ok(())
    }

    fn remove_state(&self, session: &str) -> Result<()> {
        self.states.lock().unwrap().remove(session);
        Ok(())
    }
}
