//! The single entry point for frontends: listing, status, kill, broadcast,
//! spawn and attach over one set of transports.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::activity::{parse_shortstat, ActivityMonitor, ActivityStatus};
use crate::agent::{Orchestrator, SpawnCompletion, SpawnSettings};
use crate::config::FleetConfig;
use crate::error::{FleetError, FleetResult};
use crate::exec::{CommandProxy, CommandRunner};
use crate::git::{GitTransport, VcsTransport};
use crate::session::{SessionRecord, SessionStatus};
use crate::state::{JsonStateStore, StateStore};
use crate::tmux::{
    window_target, MultiplexerTransport, PaneInspector, SessionCache, TmuxSession, TmuxTransport,
    AGENT_WINDOW, NOT_FOUND,
};

/// Outcome of a broadcast, per session.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BroadcastReport {
    pub delivered: Vec<String>,
    /// Session name and error message.
    pub failed: Vec<(String, String)>,
    /// Tracked but not running.
    pub skipped: Vec<String>,
}

pub struct Fleet {
    cache: Arc<SessionCache>,
    vcs: Arc<dyn VcsTransport>,
    state: Arc<dyn StateStore>,
    orchestrator: Orchestrator,
    monitor: ActivityMonitor,
}

impl Fleet {
    /// Build a fleet over the real tmux and git binaries.
    pub fn new(config: &FleetConfig) -> FleetResult<Self> {
        config.validate()?;

        let runner: Arc<dyn CommandRunner> = Arc::new(CommandProxy::new(config.exec.clone()));
        let tmux = Arc::new(TmuxTransport::new(runner.clone()));
        let vcs = Arc::new(GitTransport::new(runner, &config.repo_dir));
        let state = Arc::new(JsonStateStore::new(config.state_path()));

        debug!(state = %config.state_path().display(), repo = %config.repo_dir.display(), "fleet configured");
        Ok(Self::from_parts(
            tmux,
            vcs,
            state,
            SpawnSettings::from_config(config),
            config.monitor_interval,
        ))
    }

    pub fn from_parts(
        tmux: Arc<dyn MultiplexerTransport>,
        vcs: Arc<dyn VcsTransport>,
        state: Arc<dyn StateStore>,
        settings: SpawnSettings,
        monitor_interval: Duration,
    ) -> Self {
        let cache = Arc::new(SessionCache::new(tmux));
        let orchestrator = Orchestrator::new(cache.clone(), vcs.clone(), state.clone(), settings);
        let monitor = ActivityMonitor::new(vcs.clone(), state.clone(), monitor_interval);
        Self {
            cache,
            vcs,
            state,
            orchestrator,
            monitor,
        }
    }

    /// Swap the session cache, e.g. for one with a different TTL.
    pub fn with_cache(mut self, cache: Arc<SessionCache>) -> Self {
        let settings = self.orchestrator.settings().clone();
        self.orchestrator = Orchestrator::new(cache.clone(), self.vcs.clone(), self.state.clone(), settings);
        self.cache = cache;
        self
    }

    pub fn cache(&self) -> &SessionCache {
        &self.cache
    }

    pub fn orchestrator(&self) -> &Orchestrator {
        &self.orchestrator
    }

    pub fn monitor(&self) -> &ActivityMonitor {
        &self.monitor
    }

    fn tmux(&self) -> &Arc<dyn MultiplexerTransport> {
        self.cache.transport()
    }

    /// Every tracked session joined with its live tmux session and the diff
    /// stats of its worktree. Sorted by name.
    ///
    /// Diff stats come from the activity monitor's latest sample. Only
    /// sessions it has not sampled yet are diffed here.
    pub async fn get_sessions(&self) -> FleetResult<Vec<SessionRecord>> {
        let tracked = self.state.load().map_err(FleetError::State)?;

        let mut records: Vec<SessionRecord> = tracked
            .into_iter()
            .map(|(name, saved)| {
                let mut record = SessionRecord::new(name);
                record.model = saved.model;
                record.prompt = saved.prompt;
                record.worktree_path = saved.worktree_path;
                record.port = saved.port;
                record.created_at = saved.created_at;
                record.updated_at = saved.updated_at;
                record
            })
            .collect();

        let live = self.cache.map_known_sessions_to_tmux(&records).await;
        let sampled = self.monitor.snapshot().await;

        for record in &mut records {
            record.status = self.lifecycle_status(live.get(&record.name)).await;
            if let Some(metrics) = sampled.get(&record.name) {
                record.insertions = metrics.insertions;
                record.deletions = metrics.deletions;
                continue;
            }
            match self.vcs.shortstat(&record.worktree_path).await {
                Ok(stat) => {
                    let diff = parse_shortstat(&stat);
                    record.insertions = diff.insertions;
                    record.deletions = diff.deletions;
                }
                Err(e) => debug!(session = %record.name, error = %e, "no diff stats"),
            }
        }

        Ok(records)
    }

    /// Lifecycle status of `name`, or `not_found` when it is neither live
    /// nor tracked.
    pub async fn get_session_status(&self, name: &str) -> String {
        let live = self.cache.get_all_sessions().await;
        if let Some(session) = live.get(name) {
            return self.lifecycle_status(Some(session)).await.to_string();
        }
        match self.state.load() {
            Ok(tracked) if tracked.contains_key(name) => SessionStatus::Inactive.to_string(),
            Ok(_) => NOT_FOUND.to_string(),
            Err(e) => {
                warn!(session = name, error = %e, "could not read state");
                NOT_FOUND.to_string()
            }
        }
    }

    async fn lifecycle_status(&self, live: Option<&TmuxSession>) -> SessionStatus {
        let Some(session) = live else {
            return SessionStatus::Inactive;
        };
        if session.attached {
            return SessionStatus::Attached;
        }
        match self
            .tmux()
            .capture_pane(&window_target(&session.name, AGENT_WINDOW))
            .await
        {
            Ok(content) if PaneInspector::analyze(&content).is_busy() => SessionStatus::Running,
            Ok(_) => SessionStatus::Ready,
            Err(e) => {
                debug!(session = %session.name, error = %e, "could not capture agent pane");
                SessionStatus::Unknown
            }
        }
    }

    /// Kill the tmux session, remove its worktree and branch, and forget it.
    ///
    /// Worktree and branch removal are best effort. A tmux failure aborts
    /// before any cleanup.
    pub async fn kill_session(&self, name: &str) -> FleetResult<()> {
        let tracked = self.state.load().map_err(FleetError::State)?;
        let saved = tracked.get(name);
        let live = self.cache.get_all_sessions().await.contains_key(name);

        if live || saved.is_none() {
            self.tmux().kill_session(name).await?;
        }

        if let Some(saved) = saved {
            if let Err(e) = self.vcs.remove_worktree(&saved.worktree_path).await {
                warn!(session = name, error = %e, "could not remove worktree");
            }
            if let Err(e) = self.vcs.delete_branch(&saved.branch_name).await {
                warn!(session = name, error = %e, "could not delete branch");
            }
            self.state.remove_state(name).map_err(FleetError::State)?;
        }

        self.cache.refresh_cache().await;
        info!(session = name, "session killed");
        Ok(())
    }

    /// Kill every tracked session. Keeps going past failures and reports the
    /// first one at the end.
    pub async fn kill_all(&self) -> FleetResult<Vec<String>> {
        let names = self.state.get_active_sessions().map_err(FleetError::State)?;
        let mut killed = Vec::with_capacity(names.len());
        let mut first_error = None;

        for name in names {
            match self.kill_session(&name).await {
                Ok(()) => killed.push(name),
                Err(e) => {
                    warn!(session = %name, error = %e, "kill failed");
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(killed),
        }
    }

    /// Type `message` and Enter into the agent window of every running
    /// tracked session.
    pub async fn run_broadcast(&self, message: &str) -> FleetResult<BroadcastReport> {
        if message.trim().is_empty() {
            return Err(FleetError::config("broadcast message must not be empty"));
        }

        let names = self.state.get_active_sessions().map_err(FleetError::State)?;
        let live = self.cache.get_all_sessions().await;
        let mut report = BroadcastReport::default();

        for name in names {
            if !live.contains_key(&name) {
                report.skipped.push(name);
                continue;
            }
            let target = window_target(&name, AGENT_WINDOW);
            match self.tmux().send_keys(&target, message, true).await {
                Ok(()) => report.delivered.push(name),
                Err(e) => {
                    warn!(session = %name, error = %e, "broadcast failed");
                    report.failed.push((name, e.to_string()));
                }
            }
        }

        info!(
            delivered = report.delivered.len(),
            failed = report.failed.len(),
            skipped = report.skipped.len(),
            "broadcast sent"
        );
        Ok(report)
    }

    pub async fn spawn(&self, prompt: &str, spec: &str) -> FleetResult<Vec<String>> {
        self.orchestrator.spawn(prompt, spec).await
    }

    pub async fn spawn_agent(&self, prompt: &str, model: &str) -> FleetResult<String> {
        self.orchestrator.spawn_agent(prompt, model).await
    }

    pub fn spawn_agent_interactive(&self, opts: &str) -> FleetResult<oneshot::Receiver<SpawnCompletion>> {
        self.orchestrator.spawn_agent_interactive(opts)
    }

    /// Argv that attaches the current terminal to a running session.
    pub async fn attach_command(&self, name: &str) -> FleetResult<Vec<String>> {
        if !self.cache.get_all_sessions().await.contains_key(name) {
            return Err(FleetError::NotRunning(name.to_string()));
        }
        Ok(self.tmux().attach_command(name))
    }

    pub async fn attached_session_count(&self) -> FleetResult<usize> {
        Ok(self.cache.get_attached_session_count().await?)
    }

    /// Latest commit-based classification per tracked session.
    pub async fn activity_statuses(&self) -> HashMap<String, ActivityStatus> {
        self.monitor
            .snapshot()
            .await
            .into_iter()
            .map(|(name, metrics)| (name, metrics.status))
            .collect()
    }

    /// Make the next listing query tmux again.
    pub async fn refresh(&self) {
        self.cache.refresh_cache().await;
    }
}
