//! External command execution.
//!
//! Everything that shells out (tmux, git) goes through a [`CommandRunner`].
//! The production runner is [`CommandProxy`], which adds timeout, retry and
//! error wrapping; tests substitute an in-memory runner.

mod proxy;

pub use proxy::CommandProxy;

use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::time::Duration;

use crate::error::ExecError;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// How loudly the proxy reports successful commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogLevel {
    /// Only failures are logged.
    #[default]
    Info,
    /// Successes are logged too.
    Debug,
}

#[derive(Debug, Clone)]
pub struct ExecConfig {
    pub timeout: Duration,
    pub retries: u32,
    pub log_level: LogLevel,
}

impl Default for ExecConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            retries: 2,
            log_level: LogLevel::Info,
        }
    }
}

/// A single external command to run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    pub dir: Option<PathBuf>,
    /// Extra environment variables on top of the inherited environment.
    pub env: Vec<(String, String)>,
    /// Overrides the runner's configured timeout.
    pub timeout: Option<Duration>,
}

impl Invocation {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            dir: None,
            env: Vec::new(),
            timeout: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.dir = Some(dir.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Name used in logs and error messages, e.g. `tmux new-session`.
    pub fn op_name(&self) -> String {
        match self.args.first() {
            Some(sub) => format!("{} {}", self.program, sub),
            None => self.program.clone(),
        }
    }
}

/// Capability to run an external command and collect its stdout.
pub trait CommandRunner: Send + Sync {
    fn run(&self, invocation: Invocation) -> BoxFuture<'_, Result<String, ExecError>>;
}
