use std::fmt;
use std::time::Duration;

/// Tag prepended to every error produced by the execution proxy.
pub const PROXY_TAG: &str = "[exec-proxy]";

/// Errors surfaced by the command execution proxy once its retries are spent.
#[derive(Debug, thiserror::Error)]
pub enum ExecError {
    #[error("{} {op}: command failed (attempt {attempt}/{attempts}): {detail}; stderr: {stderr}", PROXY_TAG)]
    CommandFailed {
        op: String,
        attempt: u32,
        attempts: u32,
        detail: String,
        stderr: String,
    },

    #[error("{} {op}: command timed out after {timeout:?} (attempt {attempt}/{attempts}); stderr: {stderr}", PROXY_TAG)]
    CommandTimedOut {
        op: String,
        timeout: Duration,
        attempt: u32,
        attempts: u32,
        stderr: String,
    },
}

impl ExecError {
    /// Operation name the failing command was registered under.
    pub fn op(&self) -> &str {
        match self {
            ExecError::CommandFailed { op, .. } | ExecError::CommandTimedOut { op, .. } => op,
        }
    }

    /// Captured stderr of the final attempt.
    pub fn stderr(&self) -> &str {
        match self {
            ExecError::CommandFailed { stderr, .. } | ExecError::CommandTimedOut { stderr, .. } => {
                stderr
            }
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, ExecError::CommandTimedOut { .. })
    }
}

/// The spawn workflow step that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpawnStep {
    ParseAgents,
    LoadPorts,
    ReadCommitHash,
    ReadRemoteUrl,
    CreateWorktree,
    CreateSession,
    RenameWindow,
    AllocatePort,
    StartDevServer,
    StartAgent,
}

impl fmt::Display for SpawnStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let step = match self {
            SpawnStep::ParseAgents => "parse agent specification",
            SpawnStep::LoadPorts => "load assigned ports",
            SpawnStep::ReadCommitHash => "get git hash",
            SpawnStep::ReadRemoteUrl => "get git remote url",
            SpawnStep::CreateWorktree => "create worktree",
            SpawnStep::CreateSession => "create tmux session",
            SpawnStep::RenameWindow => "rename agent window",
            SpawnStep::AllocatePort => "find available port",
            SpawnStep::StartDevServer => "start dev server",
            SpawnStep::StartAgent => "start agent",
        };
        f.write_str(step)
    }
}

/// Top-level error taxonomy of the fleet.
#[derive(Debug, thiserror::Error)]
pub enum FleetError {
    /// Rejected before any side effect happened.
    #[error("invalid configuration: {0}")]
    Configuration(String),

    #[error("failed to {step}: {cause:#}")]
    Spawn { step: SpawnStep, cause: anyhow::Error },

    #[error("session {0} is not running")]
    NotRunning(String),

    #[error(transparent)]
    Exec(#[from] ExecError),

    #[error("state store: {0:#}")]
    State(anyhow::Error),
}

impl FleetError {
    pub fn spawn(step: SpawnStep, cause: impl Into<anyhow::Error>) -> Self {
        FleetError::Spawn {
            step,
            cause: cause.into(),
        }
    }

    pub fn config(msg: impl Into<String>) -> Self {
        FleetError::Configuration(msg.into())
    }
}

pub type FleetResult<T> = std::result::Result<T, FleetError>;
