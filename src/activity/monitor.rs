use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{classify, parse_shortstat, ActivityMetrics, ActivityStatus};
use crate::git::VcsTransport;
use crate::state::StateStore;

struct Running {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

/// Periodically samples git activity for every tracked session.
///
/// The metrics map is replaced wholesale on each refresh; readers get owned
/// copies and never see a half-updated map.
pub struct ActivityMonitor {
    vcs: Arc<dyn VcsTransport>,
    state: Arc<dyn StateStore>,
    interval: Duration,
    metrics: Arc<RwLock<HashMap<String, ActivityMetrics>>>,
    running: Mutex<Option<Running>>,
}

impl ActivityMonitor {
    pub fn new(vcs: Arc<dyn VcsTransport>, state: Arc<dyn StateStore>, interval: Duration) -> Self {
        Self {
            vcs,
            state,
            interval,
            metrics: Arc::new(RwLock::new(HashMap::new())),
            running: Mutex::new(None),
        }
    }

    /// Start the refresh loop. It ends when `cancel` (or the monitor's own
    /// child token) is cancelled. Starting a running monitor does nothing.
    pub fn start(&self, cancel: &CancellationToken) {
        let mut running = self.running.lock().unwrap_or_else(|e| e.into_inner());
        if running.as_ref().is_some_and(|r| !r.handle.is_finished()) {
            return;
        }

        let token = cancel.child_token();
        let sampler = Sampler {
            vcs: self.vcs.clone(),
            state: self.state.clone(),
            metrics: self.metrics.clone(),
        };
        let interval = self.interval;
        let loop_token = token.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = loop_token.cancelled() => break,
                    _ = ticker.tick() => sampler.refresh().await,
                }
            }
            debug!("activity monitor stopped");
        });

        info!(interval_ms = interval.as_millis() as u64, "activity monitor started");
        *running = Some(Running { token, handle });
    }

    /// Stop the refresh loop. Stopping a stopped monitor is a no-op.
    pub fn stop(&self) {
        let taken = self.running.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(running) = taken {
            running.token.cancel();
        }
    }

    pub fn is_running(&self) -> bool {
        self.running
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .is_some_and(|r| !r.token.is_cancelled() && !r.handle.is_finished())
    }

    /// Sample every tracked session now.
    pub async fn refresh(&self) {
        Sampler {
            vcs: self.vcs.clone(),
            state: self.state.clone(),
            metrics: self.metrics.clone(),
        }
        .refresh()
        .await;
    }

    /// Refresh, then return a deep copy of the metrics.
    pub async fn update_all(&self) -> HashMap<String, ActivityMetrics> {
        self.refresh().await;
        self.snapshot().await
    }

    /// Deep copy of the latest metrics without sampling.
    pub async fn snapshot(&self) -> HashMap<String, ActivityMetrics> {
        self.metrics.read().await.clone()
    }

    pub async fn status(&self, session: &str) -> ActivityStatus {
        self.metrics
            .read()
            .await
            .get(session)
            .map(|m| m.status)
            .unwrap_or_default()
    }
}

impl Drop for ActivityMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}

struct Sampler {
    vcs: Arc<dyn VcsTransport>,
    state: Arc<dyn StateStore>,
    metrics: Arc<RwLock<HashMap<String, ActivityMetrics>>>,
}

impl Sampler {
    async fn refresh(&self) {
        let tracked = match self.state.load() {
            Ok(tracked) => tracked,
            Err(e) => {
                warn!(error = %e, "activity monitor could not read state");
                return;
            }
        };

        let mut fresh = HashMap::with_capacity(tracked.len());
        for (name, entry) in tracked {
            let metrics = self.sample(&name, &entry.worktree_path).await;
            fresh.insert(name, metrics);
        }

        *self.metrics.write().await = fresh;
    }

    async fn sample(&self, session: &str, worktree: &Path) -> ActivityMetrics {
        let mut metrics = ActivityMetrics::default();

        match self.vcs.shortstat(worktree).await {
            Ok(stat) => {
                let diff = parse_shortstat(&stat);
                metrics.insertions = diff.insertions;
                metrics.deletions = diff.deletions;
                metrics.files_changed = diff.files_changed;
            }
            Err(e) => debug!(session, error = %e, "shortstat unavailable"),
        }
        match self.vcs.last_commit_time(worktree).await {
            Ok(at) => metrics.last_commit_at = at,
            Err(e) => debug!(session, error = %e, "last commit time unavailable"),
        }
        match self.vcs.commit_count(worktree).await {
            Ok(count) => metrics.commit_count = count,
            Err(e) => debug!(session, error = %e, "commit count unavailable"),
        }

        metrics.status = classify(Some(&metrics), chrono::Utc::now());
        metrics
    }
}
