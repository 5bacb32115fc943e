//! Git operations the fleet needs, via the git CLI.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use tracing::{debug, info};

use crate::error::ExecError;
use crate::exec::{BoxFuture, CommandRunner, Invocation};

/// Version-control operations, swappable for tests.
pub trait VcsTransport: Send + Sync {
    /// Abbreviated hash of `HEAD` in the main repository.
    fn short_hash(&self) -> BoxFuture<'_, Result<String, ExecError>>;

    /// URL of the `origin` remote.
    fn remote_url(&self) -> BoxFuture<'_, Result<String, ExecError>>;

    /// `git worktree add -b {branch} {path}`
    fn create_worktree<'a>(
        &'a self,
        branch: &'a str,
        path: &'a Path,
    ) -> BoxFuture<'a, Result<(), ExecError>>;

    fn remove_worktree<'a>(&'a self, path: &'a Path) -> BoxFuture<'a, Result<(), ExecError>>;

    fn delete_branch<'a>(&'a self, branch: &'a str) -> BoxFuture<'a, Result<(), ExecError>>;

    /// `--shortstat` summary of everything changed in the worktree since
    /// `HEAD`, untracked files included.
    fn shortstat<'a>(&'a self, worktree: &'a Path) -> BoxFuture<'a, Result<String, ExecError>>;

    /// Commit time of `HEAD`; `None` for a branch without commits.
    fn last_commit_time<'a>(
        &'a self,
        worktree: &'a Path,
    ) -> BoxFuture<'a, Result<Option<DateTime<Utc>>, ExecError>>;

    fn commit_count<'a>(&'a self, worktree: &'a Path) -> BoxFuture<'a, Result<u32, ExecError>>;
}

/// Points git at an alternate index file.
const INDEX_FILE_VAR: &str = "GIT_INDEX_FILE";

fn scratch_index_path() -> PathBuf {
    std::env::temp_dir().join(format!("fleet-index-{}", uuid::Uuid::new_v4().simple()))
}

/// Repository name from a remote URL: last path component without `.git`.
///
/// Handles both `https://host/owner/repo.git` and `git@host:owner/repo.git`.
pub fn repo_name_from_url(url: &str) -> String {
    let trimmed = url.trim().trim_end_matches('/');
    let base = trimmed
        .rsplit(|c: char| c == '/' || c == ':')
        .next()
        .unwrap_or(trimmed);
    base.strip_suffix(".git").unwrap_or(base).to_string()
}

#[derive(Clone)]
pub struct GitTransport {
    git_path: String,
    repo_dir: PathBuf,
    runner: Arc<dyn CommandRunner>,
}

impl GitTransport {
    pub fn new(runner: Arc<dyn CommandRunner>, repo_dir: impl Into<PathBuf>) -> Self {
        Self {
            git_path: "git".to_string(),
            repo_dir: repo_dir.into(),
            runner,
        }
    }

    pub fn repo_dir(&self) -> &Path {
        &self.repo_dir
    }

    fn git<I, S>(&self, dir: &Path, args: I) -> Invocation
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Invocation::new(self.git_path.clone())
            .args(args)
            .current_dir(dir)
    }
}

impl VcsTransport for GitTransport {
    fn short_hash(&self) -> BoxFuture<'_, Result<String, ExecError>> {
        let inv = self.git(&self.repo_dir, ["rev-parse", "--short", "HEAD"]);
        Box::pin(async move { Ok(self.runner.run(inv).await?.trim().to_string()) })
    }

    fn remote_url(&self) -> BoxFuture<'_, Result<String, ExecError>> {
        let inv = self.git(&self.repo_dir, ["remote", "get-url", "origin"]);
        Box::pin(async move { Ok(self.runner.run(inv).await?.trim().to_string()) })
    }

    fn create_worktree<'a>(
        &'a self,
        branch: &'a str,
        path: &'a Path,
    ) -> BoxFuture<'a, Result<(), ExecError>> {
        let path_str = path.to_string_lossy().into_owned();
        let inv = self.git(&self.repo_dir, ["worktree", "add", "-b", branch, path_str.as_str()]);
        Box::pin(async move {
            self.runner.run(inv).await?;
            info!(branch = %branch, path = %path.display(), "worktree created");
            Ok(())
        })
    }

    fn remove_worktree<'a>(&'a self, path: &'a Path) -> BoxFuture<'a, Result<(), ExecError>> {
        let path_str = path.to_string_lossy().into_owned();
        let inv = self.git(&self.repo_dir, ["worktree", "remove", "--force", path_str.as_str()]);
        Box::pin(async move { self.runner.run(inv).await.map(|_| ()) })
    }

    fn delete_branch<'a>(&'a self, branch: &'a str) -> BoxFuture<'a, Result<(), ExecError>> {
        let inv = self.git(&self.repo_dir, ["branch", "-D", branch]);
        Box::pin(async move { self.runner.run(inv).await.map(|_| ()) })
    }

    fn shortstat<'a>(&'a self, worktree: &'a Path) -> BoxFuture<'a, Result<String, ExecError>> {
        Box::pin(async move {
            // Stage into a scratch index so new files are counted without
            // touching the agent's own index.
            let index = scratch_index_path();
            let index_str = index.to_string_lossy().into_owned();
            let staged = |args: &[&str]| {
                self.git(worktree, args.iter().copied())
                    .env(INDEX_FILE_VAR, index_str.as_str())
            };

            let mut stat = self.runner.run(staged(&["read-tree", "HEAD"])).await;
            if stat.is_ok() {
                stat = self.runner.run(staged(&["add", "-A", "."])).await;
            }
            if stat.is_ok() {
                stat = self
                    .runner
                    .run(staged(&["diff", "--cached", "--shortstat", "HEAD"]))
                    .await;
            }

            if let Err(e) = tokio::fs::remove_file(&index).await {
                if e.kind() != std::io::ErrorKind::NotFound {
                    debug!(index = %index.display(), error = %e, "could not remove scratch index");
                }
            }
            Ok(stat?.trim().to_string())
        })
    }

    fn last_commit_time<'a>(
        &'a self,
        worktree: &'a Path,
    ) -> BoxFuture<'a, Result<Option<DateTime<Utc>>, ExecError>> {
        let inv = self.git(worktree, ["log", "-1", "--format=%ct"]);
        Box::pin(async move {
            let out = self.runner.run(inv).await?;
            Ok(out
                .trim()
                .parse::<i64>()
                .ok()
                .and_then(|secs| Utc.timestamp_opt(secs, 0).single()))
        })
    }

    fn commit_count<'a>(&'a self, worktree: &'a Path) -> BoxFuture<'a, Result<u32, ExecError>> {
        let inv = self.git(worktree, ["rev-list", "--count", "HEAD"]);
        Box::pin(async move { Ok(self.runner.run(inv).await?.trim().parse().unwrap_or(0)) })
    }
}
