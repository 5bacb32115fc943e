use std::path::Path;
use std::sync::Arc;

use super::MultiplexerTransport;
use crate::error::ExecError;
use crate::exec::{BoxFuture, CommandRunner, Invocation};

/// Format handed to `list-sessions -F`.
const SESSION_FORMAT: &str =
    "#{session_name}|#{session_windows}|#{session_attached}|#{session_created}|#{session_activity}";

/// Client for interacting with tmux via CLI
#[derive(Clone)]
pub struct TmuxTransport {
    /// Path to tmux binary
    tmux_path: String,
    runner: Arc<dyn CommandRunner>,
}

impl TmuxTransport {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            tmux_path: "tmux".to_string(),
            runner,
        }
    }

    pub fn with_binary(runner: Arc<dyn CommandRunner>, tmux_path: impl Into<String>) -> Self {
        Self {
            tmux_path: tmux_path.into(),
            runner,
        }
    }

    fn invocation<I, S>(&self, args: I) -> Invocation
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Invocation::new(self.tmux_path.clone()).args(args)
    }
}

impl MultiplexerTransport for TmuxTransport {
    fn list_sessions(&self) -> BoxFuture<'_, Result<String, ExecError>> {
        let inv = self.invocation(["list-sessions", "-F", SESSION_FORMAT]);
        self.runner.run(inv)
    }

    fn list_windows<'a>(&'a self, session: &'a str) -> BoxFuture<'a, Result<String, ExecError>> {
        let inv = self.invocation(["list-windows", "-t", session, "-F", "#{window_name}"]);
        self.runner.run(inv)
    }

    fn list_panes<'a>(&'a self, session: &'a str) -> BoxFuture<'a, Result<String, ExecError>> {
        let inv = self.invocation(["list-panes", "-s", "-t", session, "-F", "#{pane_id}"]);
        self.runner.run(inv)
    }

    fn capture_pane<'a>(&'a self, target: &'a str) -> BoxFuture<'a, Result<String, ExecError>> {
        let inv = self.invocation(["capture-pane", "-p", "-t", target]);
        self.runner.run(inv)
    }

    fn new_session<'a>(
        &'a self,
        name: &'a str,
        dir: &'a Path,
    ) -> BoxFuture<'a, Result<(), ExecError>> {
        let dir = dir.to_string_lossy().into_owned();
        let inv = self.invocation(["new-session", "-d", "-s", name, "-c", dir.as_str()]);
        Box::pin(async move { self.runner.run(inv).await.map(|_| ()) })
    }

    fn rename_window<'a>(
        &'a self,
        session: &'a str,
        window: &'a str,
    ) -> BoxFuture<'a, Result<(), ExecError>> {
        let inv = self.invocation(["rename-window", "-t", session, window]);
        Box::pin(async move { self.runner.run(inv).await.map(|_| ()) })
    }

    fn new_window<'a>(
        &'a self,
        session: &'a str,
        window: &'a str,
        dir: &'a Path,
    ) -> BoxFuture<'a, Result<(), ExecError>> {
        let dir = dir.to_string_lossy().into_owned();
        let inv = self.invocation(["new-window", "-t", session, "-n", window, "-c", dir.as_str()]);
        Box::pin(async move { self.runner.run(inv).await.map(|_| ()) })
    }

    fn send_keys<'a>(
        &'a self,
        target: &'a str,
        keys: &'a str,
        enter: bool,
    ) -> BoxFuture<'a, Result<(), ExecError>> {
        // `-l` stops tmux reading words as key names, `--` a leading dash as a flag.
        let inv = self.invocation(["send-keys", "-t", target, "-l", "--", keys]);
        Box::pin(async move {
            self.runner.run(inv).await?;
            if enter {
                self.send_key(target, "C-m").await?;
            }
            Ok(())
        })
    }

    fn send_key<'a>(&'a self, target: &'a str, key: &'a str) -> BoxFuture<'a, Result<(), ExecError>> {
        let inv = self.invocation(["send-keys", "-t", target, key]);
        Box::pin(async move { self.runner.run(inv).await.map(|_| ()) })
    }

    fn kill_session<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Result<(), ExecError>> {
        let inv = self.invocation(["kill-session", "-t", name]);
        Box::pin(async move { self.runner.run(inv).await.map(|_| ()) })
    }

    fn attach_command(&self, name: &str) -> Vec<String> {
        vec![
            self.tmux_path.clone(),
            "attach-session".to_string(),
            "-t".to_string(),
            name.to_string(),
        ]
    }
}
