mod client;
mod discovery;
mod heuristics;

pub use client::TmuxTransport;
pub use discovery::{
    is_known_session, match_score, parse_session_line, SessionCache, ACTIVE_WINDOW_SECS,
    CACHE_TTL, NOT_FOUND,
};
pub use heuristics::{PaneInspector, PaneState};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

use crate::error::ExecError;
use crate::exec::BoxFuture;

/// Name of the first window of every agent session.
pub const AGENT_WINDOW: &str = "agent";
/// Name of the optional dev-server window.
pub const DEV_WINDOW: &str = "fleet-dev";
/// Leading name component of every session this tool creates.
pub const SESSION_PREFIX: &str = "agent";

/// Liveness of a tmux session as seen at discovery time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SessionActivity {
    /// A client is attached.
    Attached,
    /// Not attached, but had activity within the last three minutes.
    Active,
    #[default]
    Inactive,
}

impl SessionActivity {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionActivity::Attached => "attached",
            SessionActivity::Active => "active",
            SessionActivity::Inactive => "inactive",
        }
    }
}

impl fmt::Display for SessionActivity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A tmux session as reported by one discovery pass. Rebuilt on every cache
/// refresh and never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TmuxSession {
    pub name: String,
    pub window_count: usize,
    pub pane_count: usize,
    /// Window names in tmux order.
    pub windows: Vec<String>,
    pub attached: bool,
    pub activity: SessionActivity,
    /// Unix timestamp when the session was created
    pub created_at: i64,
    /// Unix timestamp of the last activity tmux recorded
    pub last_activity: i64,
}

impl TmuxSession {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            window_count: 0,
            pane_count: 0,
            windows: Vec::new(),
            attached: false,
            activity: SessionActivity::Inactive,
            created_at: 0,
            last_activity: 0,
        }
    }
}

/// The multiplexer operations the fleet depends on.
///
/// Reads return raw tmux output; parsing happens in [`SessionCache`].
pub trait MultiplexerTransport: Send + Sync {
    /// One line per session: `name|windows|attached|created|activity`.
    fn list_sessions(&self) -> BoxFuture<'_, Result<String, ExecError>>;

    /// Newline-separated window names.
    fn list_windows<'a>(&'a self, session: &'a str) -> BoxFuture<'a, Result<String, ExecError>>;

    /// Newline-separated pane ids.
    fn list_panes<'a>(&'a self, session: &'a str) -> BoxFuture<'a, Result<String, ExecError>>;

    /// Visible text of the target pane.
    fn capture_pane<'a>(&'a self, target: &'a str) -> BoxFuture<'a, Result<String, ExecError>>;

    fn new_session<'a>(
        &'a self,
        name: &'a str,
        dir: &'a Path,
    ) -> BoxFuture<'a, Result<(), ExecError>>;

    /// Rename the current window of `session`.
    fn rename_window<'a>(
        &'a self,
        session: &'a str,
        window: &'a str,
    ) -> BoxFuture<'a, Result<(), ExecError>>;

    fn new_window<'a>(
        &'a self,
        session: &'a str,
        window: &'a str,
        dir: &'a Path,
    ) -> BoxFuture<'a, Result<(), ExecError>>;

    /// Type `keys` into `target` as literal text, followed by Enter when
    /// `enter` is set. Key names inside the text are not interpreted.
    fn send_keys<'a>(
        &'a self,
        target: &'a str,
        keys: &'a str,
        enter: bool,
    ) -> BoxFuture<'a, Result<(), ExecError>>;

    /// Press one named key (`C-m`, `Escape`, ...) in `target`.
    fn send_key<'a>(&'a self, target: &'a str, key: &'a str) -> BoxFuture<'a, Result<(), ExecError>>;

    fn kill_session<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Result<(), ExecError>>;

    /// Argv that attaches the current terminal to `name`.
    fn attach_command(&self, name: &str) -> Vec<String>;
}

/// `session:window` target string.
pub fn window_target(session: &str, window: &str) -> String {
    format!("{}:{}", session, window)
}
