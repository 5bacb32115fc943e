use std::process::Stdio;
use std::time::{Duration, Instant};

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use super::{BoxFuture, CommandRunner, ExecConfig, Invocation, LogLevel};
use crate::error::ExecError;

/// Pause between a failed attempt and the next one.
pub const RETRY_BACKOFF: Duration = Duration::from_millis(500);

/// How long to keep draining pipes after the process is gone. A forked
/// grandchild can hold them open indefinitely.
const PIPE_DRAIN_GRACE: Duration = Duration::from_secs(2);

enum Attempt {
    Done(String),
    Failed { detail: String, stderr: String },
    TimedOut { stderr: String },
}

/// Subprocess runner with bounded timeout, bounded retries and uniform
/// error wrapping.
#[derive(Debug, Clone, Default)]
pub struct CommandProxy {
    config: ExecConfig,
}

impl CommandProxy {
    pub fn new(config: ExecConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ExecConfig {
        &self.config
    }

    /// Run `program args...` with the configured timeout.
    pub async fn execute<I, S>(&self, program: &str, args: I) -> Result<String, ExecError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.execute_invocation(Invocation::new(program).args(args))
            .await
    }

    /// Run `program args...` with an explicit timeout for this call only.
    pub async fn execute_with_timeout<I, S>(
        &self,
        timeout: Duration,
        program: &str,
        args: I,
    ) -> Result<String, ExecError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.execute_invocation(Invocation::new(program).args(args).timeout(timeout))
            .await
    }

    pub async fn execute_invocation(&self, invocation: Invocation) -> Result<String, ExecError> {
        let op = invocation.op_name();
        let timeout = invocation.timeout.unwrap_or(self.config.timeout);
        let attempts = self.config.retries + 1;

        let mut attempt = 1;
        loop {
            let started = Instant::now();
            let outcome = run_once(&invocation, timeout).await;
            let elapsed_ms = started.elapsed().as_millis() as u64;

            let err = match outcome {
                Attempt::Done(stdout) => {
                    if self.config.log_level == LogLevel::Debug {
                        info!(op = %op, attempt, elapsed_ms, "command succeeded");
                    }
                    return Ok(stdout);
                }
                Attempt::Failed { detail, stderr } => ExecError::CommandFailed {
                    op: op.clone(),
                    attempt,
                    attempts,
                    detail,
                    stderr,
                },
                Attempt::TimedOut { stderr } => ExecError::CommandTimedOut {
                    op: op.clone(),
                    timeout,
                    attempt,
                    attempts,
                    stderr,
                },
            };

            if attempt == attempts {
                warn!(op = %op, attempt, attempts, elapsed_ms, error = %err, "command gave up");
                return Err(err);
            }

            warn!(op = %op, attempt, attempts, elapsed_ms, error = %err, "command failed, retrying");
            tokio::time::sleep(RETRY_BACKOFF).await;
            attempt += 1;
        }
    }
}

impl CommandRunner for CommandProxy {
    fn run(&self, invocation: Invocation) -> BoxFuture<'_, Result<String, ExecError>> {
        Box::pin(self.execute_invocation(invocation))
    }
}

async fn run_once(invocation: &Invocation, timeout: Duration) -> Attempt {
    let mut cmd = Command::new(&invocation.program);
    cmd.args(&invocation.args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(dir) = &invocation.dir {
        cmd.current_dir(dir);
    }
    cmd.envs(invocation.env.iter().cloned());

    let mut child = match cmd.spawn() {
        Ok(child) => child,
        Err(e) => {
            return Attempt::Failed {
                detail: format!("failed to spawn {}: {}", invocation.program, e),
                stderr: String::new(),
            }
        }
    };

    let stdout_task = child.stdout.take().map(|out| tokio::spawn(read_all(out)));
    let stderr_task = child.stderr.take().map(|err| tokio::spawn(read_all(err)));

    match tokio::time::timeout(timeout, child.wait()).await {
        Ok(Ok(status)) => {
            let stdout = drain(stdout_task).await;
            let stderr = drain(stderr_task).await;
            if status.success() {
                Attempt::Done(stdout)
            } else {
                Attempt::Failed {
                    detail: status.to_string(),
                    stderr: stderr.trim().to_string(),
                }
            }
        }
        Ok(Err(e)) => Attempt::Failed {
            detail: e.to_string(),
            stderr: drain(stderr_task).await.trim().to_string(),
        },
        Err(_) => {
            let _ = child.kill().await;
            if let Some(task) = &stdout_task {
                task.abort();
            }
            Attempt::TimedOut {
                stderr: drain(stderr_task).await.trim().to_string(),
            }
        }
    }
}

async fn read_all<R: AsyncRead + Unpin>(mut reader: R) -> Vec<u8> {
    let mut buf = Vec::new();
    let _ = reader.read_to_end(&mut buf).await;
    buf
}

/// Collect a reader task's output, aborting it if the pipe is still open
/// after the grace period.
async fn drain(task: Option<JoinHandle<Vec<u8>>>) -> String {
    let Some(mut task) = task else {
        return String::new();
    };
    match tokio::time::timeout(PIPE_DRAIN_GRACE, &mut task).await {
        Ok(Ok(bytes)) => String::from_utf8_lossy(&bytes).into_owned(),
        Ok(Err(_)) => String::new(),
        Err(_) => {
            task.abort();
            String::new()
        }
    }
}
