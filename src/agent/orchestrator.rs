use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::anyhow;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use super::{
    branch_name, find_available_port, is_port_available, parse_agent_spec, random_agent_name,
    session_name, startup_command, AgentConfig, RANDOM_AGENT,
};
use crate::config::{FleetConfig, PortRange, PORT_PLACEHOLDER};
use crate::error::{FleetError, FleetResult, SpawnStep};
use crate::git::{repo_name_from_url, VcsTransport};
use crate::state::{AgentEntry, StateStore};
use crate::tmux::{window_target, MultiplexerTransport, SessionCache, AGENT_WINDOW, DEV_WINDOW};

/// Result delivered to callers of [`Orchestrator::spawn_agent_interactive`].
pub type SpawnCompletion = FleetResult<Vec<String>>;

#[derive(Debug, Clone)]
pub struct SpawnSettings {
    /// Parent directory of every agent worktree.
    pub worktree_root: PathBuf,
    pub dev_command: Option<String>,
    pub port_range: Option<PortRange>,
}

impl SpawnSettings {
    pub fn from_config(config: &FleetConfig) -> Self {
        Self {
            worktree_root: config.worktree_root(),
            dev_command: config.dev_command.clone(),
            port_range: config.port_range,
        }
    }
}

/// Ports and names already spoken for, seeded from state and live tmux and
/// extended by each instance of the current batch.
struct Claims {
    ports: HashSet<u16>,
    sessions: HashSet<String>,
}

/// Creates agent sessions: branch, worktree, tmux session, optional dev
/// server, agent process, durable state entry.
#[derive(Clone)]
pub struct Orchestrator {
    cache: Arc<SessionCache>,
    vcs: Arc<dyn VcsTransport>,
    state: Arc<dyn StateStore>,
    settings: Arc<SpawnSettings>,
    port_probe: Arc<dyn Fn(u16) -> bool + Send + Sync>,
}

impl Orchestrator {
    pub fn new(
        cache: Arc<SessionCache>,
        vcs: Arc<dyn VcsTransport>,
        state: Arc<dyn StateStore>,
        settings: SpawnSettings,
    ) -> Self {
        Self {
            cache,
            vcs,
            state,
            settings: Arc::new(settings),
            port_probe: Arc::new(is_port_available),
        }
    }

    /// Replace the live bind probe used when allocating dev-server ports.
    pub fn with_port_probe(mut self, probe: impl Fn(u16) -> bool + Send + Sync + 'static) -> Self {
        self.port_probe = Arc::new(probe);
        self
    }

    pub fn settings(&self) -> &SpawnSettings {
        &self.settings
    }

    fn tmux(&self) -> &Arc<dyn MultiplexerTransport> {
        self.cache.transport()
    }

    /// Spawn every instance requested by `spec` (`agent:count[,agent:count]`)
    /// on `prompt`, returning the new session names in spawn order.
    ///
    /// Instances are created one after another. The first failing step aborts
    /// the batch; steps already completed for that instance are left in place.
    pub async fn spawn(&self, prompt: &str, spec: &str) -> FleetResult<Vec<String>> {
        let configs = parse_agent_spec(spec)?;
        if prompt.trim().is_empty() {
            return Err(FleetError::config("prompt must not be empty"));
        }

        let tracked = self
            .state
            .load()
            .map_err(|e| FleetError::spawn(SpawnStep::LoadPorts, e))?;
        let live = self.cache.get_all_sessions().await;

        let mut claims = Claims {
            ports: tracked.values().map(|s| s.port).filter(|p| *p != 0).collect(),
            sessions: tracked.keys().cloned().chain(live.into_keys()).collect(),
        };

        let mut spawned = Vec::new();
        let mut result = Ok(());
        'batch: for config in &configs {
            for _ in 0..config.count {
                match self.spawn_one(config, prompt, &mut claims).await {
                    Ok(name) => spawned.push(name),
                    Err(e) => {
                        result = Err(e);
                        break 'batch;
                    }
                }
            }
        }

        self.cache.refresh_cache().await;
        result.map(|()| spawned)
    }

    /// Spawn a single `model` agent on `prompt`.
    pub async fn spawn_agent(&self, prompt: &str, model: &str) -> FleetResult<String> {
        self.spawn(prompt, &format!("{}:1", model))
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| FleetError::config("no agent was spawned"))
    }

    /// Start a spawn in the background from `"<agent-spec> <prompt...>"`.
    ///
    /// Malformed input is rejected before anything runs; everything after
    /// that is reported through the returned channel.
    pub fn spawn_agent_interactive(&self, opts: &str) -> FleetResult<oneshot::Receiver<SpawnCompletion>> {
        let (spec, prompt) = opts
            .trim()
            .split_once(char::is_whitespace)
            .map(|(spec, prompt)| (spec.to_string(), prompt.trim().to_string()))
            .ok_or_else(|| FleetError::config("expected \"<agent-spec> <prompt>\""))?;
        parse_agent_spec(&spec)?;
        if prompt.is_empty() {
            return Err(FleetError::config("prompt must not be empty"));
        }

        let (tx, rx) = oneshot::channel();
        let orchestrator = self.clone();
        tokio::spawn(async move {
            let result = orchestrator.spawn(&prompt, &spec).await;
            if let Err(e) = &result {
                warn!(error = %e, "background spawn failed");
            }
            if tx.send(result).is_err() {
                debug!("spawn completed with nobody waiting");
            }
        });
        Ok(rx)
    }

    async fn spawn_one(&self, config: &AgentConfig, prompt: &str, claims: &mut Claims) -> FleetResult<String> {
        let base_name = if config.agent == RANDOM_AGENT {
            random_agent_name()
        } else {
            config.agent.clone()
        };

        let hash = self
            .vcs
            .short_hash()
            .await
            .map_err(|e| FleetError::spawn(SpawnStep::ReadCommitHash, e))?;
        let remote = self
            .vcs
            .remote_url()
            .await
            .map_err(|e| FleetError::spawn(SpawnStep::ReadRemoteUrl, e))?;
        let repo = repo_name_from_url(&remote);

        let agent_name = unique_agent_name(&repo, &hash, &base_name, &claims.sessions);
        let session = session_name(&repo, &hash, &agent_name);
        let branch = branch_name(&agent_name, &repo, &hash, chrono::Utc::now().timestamp());
        let worktree = self.settings.worktree_root.join(&branch);
        claims.sessions.insert(session.clone());

        tokio::fs::create_dir_all(&self.settings.worktree_root)
            .await
            .map_err(|e| FleetError::spawn(SpawnStep::CreateWorktree, e))?;
        self.vcs
            .create_worktree(&branch, &worktree)
            .await
            .map_err(|e| FleetError::spawn(SpawnStep::CreateWorktree, e))?;

        self.tmux()
            .new_session(&session, &worktree)
            .await
            .map_err(|e| FleetError::spawn(SpawnStep::CreateSession, e))?;
        self.tmux()
            .rename_window(&session, AGENT_WINDOW)
            .await
            .map_err(|e| FleetError::spawn(SpawnStep::RenameWindow, e))?;

        let port = self.start_dev_server(&session, &worktree, &mut claims.ports).await?;

        let target = window_target(&session, AGENT_WINDOW);
        self.tmux()
            .send_key(&target, "C-m")
            .await
            .map_err(|e| FleetError::spawn(SpawnStep::StartAgent, e))?;
        self.tmux()
            .send_keys(&target, &startup_command(&config.command, prompt), true)
            .await
            .map_err(|e| FleetError::spawn(SpawnStep::StartAgent, e))?;

        let entry = AgentEntry {
            branch_name: branch,
            worktree_path: worktree,
            model: config.command.clone(),
            prompt: prompt.to_string(),
        };
        let saved = match port {
            Some(port) => self.state.save_state_with_port(&session, entry, port),
            None => self.state.save_state(&session, entry),
        };
        if let Err(e) = saved {
            warn!(session = %session, error = %e, "agent is running but could not be saved to state");
        }

        info!(session = %session, agent = %config.agent, port = port.unwrap_or(0), "agent spawned");
        Ok(session)
    }

    /// Open the dev-server window when both a command and a port range are
    /// configured. Returns the allocated port.
    async fn start_dev_server(
        &self,
        session: &str,
        worktree: &Path,
        claimed: &mut HashSet<u16>,
    ) -> FleetResult<Option<u16>> {
        let (Some(template), Some(range)) = (&self.settings.dev_command, self.settings.port_range) else {
            return Ok(None);
        };

        let probe = self.port_probe.clone();
        let port = find_available_port(range, claimed, |p| probe(p)).ok_or_else(|| {
            FleetError::spawn(SpawnStep::AllocatePort, anyhow!("no free port in {}", range))
        })?;
        let command = template.replace(PORT_PLACEHOLDER, &port.to_string());

        self.tmux()
            .new_window(session, DEV_WINDOW, worktree)
            .await
            .map_err(|e| FleetError::spawn(SpawnStep::StartDevServer, e))?;
        self.tmux()
            .send_keys(&window_target(session, DEV_WINDOW), &command, true)
            .await
            .map_err(|e| FleetError::spawn(SpawnStep::StartDevServer, e))?;

        claimed.insert(port);
        debug!(session, port, "dev server started");
        Ok(Some(port))
    }
}

/// `base`, or `base-2`, `base-3`, ... when the session name is taken.
fn unique_agent_name(repo: &str, hash: &str, base: &str, taken: &HashSet<String>) -> String {
    if !taken.contains(&session_name(repo, hash, base)) {
        return base.to_string();
    }
    let mut n = 2;
    loop {
        let candidate = format!("{}-{}", base, n);
        if !taken.contains(&session_name(repo, hash, &candidate)) {
            return candidate;
        }
        n += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeMultiplexer, FakeVcs, MemoryStateStore};
    use std::time::Duration;

    struct Harness {
        tmux: Arc<FakeMultiplexer>,
        vcs: Arc<FakeVcs>,
        state: Arc<MemoryStateStore>,
        orchestrator: Orchestrator,
    }

    fn harness(dev: Option<(&str, PortRange)>) -> Harness {
        let tmux = Arc::new(FakeMultiplexer::new());
        let vcs = Arc::new(FakeVcs::new());
        let state = Arc::new(MemoryStateStore::new());
        let root = std::env::temp_dir().join("agent-fleet-orchestrator-tests");
        let settings = SpawnSettings {
            worktree_root: root,
            dev_command: dev.map(|(cmd, _)| cmd.to_string()),
            port_range: dev.map(|(_, range)| range),
        };
        let cache = Arc::new(SessionCache::with_ttl(tmux.clone(), Duration::from_secs(60)));
        let orchestrator =
            Orchestrator::new(cache, vcs.clone(), state.clone(), settings).with_port_probe(|_| true);
        Harness { tmux, vcs, state, orchestrator }
    }

    #[tokio::test]
    async fn test_spawn_with_dev_server() {
        let h = harness(Some(("npm run dev -- --port $PORT", PortRange::new(3000, 3010))));

        let names = h.orchestrator.spawn("fix the login bug", "claude:1").await.unwrap();
        assert_eq!(names, vec!["agent-widgets-a1b2c3d-claude".to_string()]);

        let states = h.state.load().unwrap();
        let saved = &states["agent-widgets-a1b2c3d-claude"];
        assert_eq!(saved.port, 3000);
        assert_eq!(saved.model, "claude");
        assert_eq!(saved.prompt, "fix the login bug");
        assert!(saved.branch_name.starts_with("claude-widgets-a1b2c3d-"));
        assert!(saved.worktree_path.ends_with(&saved.branch_name));

        let writes = h.tmux.writes();
        assert!(writes[0].starts_with("new-session agent-widgets-a1b2c3d-claude "));
        assert_eq!(writes[1], "rename-window agent-widgets-a1b2c3d-claude agent");
        assert!(writes[2].starts_with("new-window agent-widgets-a1b2c3d-claude fleet-dev "));
        assert_eq!(
            writes[3..8],
            [
                "send-keys agent-widgets-a1b2c3d-claude:fleet-dev npm run dev -- --port 3000",
                "send-key agent-widgets-a1b2c3d-claude:fleet-dev C-m",
                "send-key agent-widgets-a1b2c3d-claude:agent C-m",
                "send-keys agent-widgets-a1b2c3d-claude:agent claude \"fix the login bug\"",
                "send-key agent-widgets-a1b2c3d-claude:agent C-m",
            ]
        );
    }

    #[tokio::test]
    async fn test_spawn_without_dev_server() {
        let h = harness(None);
        h.orchestrator.spawn("write tests", "cursor:1").await.unwrap();

        let writes = h.tmux.writes();
        assert!(!writes.iter().any(|w| w.starts_with("new-window")));
        assert!(writes[writes.len() - 2].ends_with("cursor-agent -p \"write tests\""));
        assert_eq!(writes.last().unwrap(), "send-key agent-widgets-a1b2c3d-cursor:agent C-m");
        assert_eq!(h.state.load().unwrap()["agent-widgets-a1b2c3d-cursor"].port, 0);
    }

    #[tokio::test]
    async fn test_batch_gets_unique_names_and_ports() {
        let h = harness(Some(("serve $PORT", PortRange::new(4000, 4010))));
        let names = h.orchestrator.spawn("p", "claude:2,codex:1").await.unwrap();
        assert_eq!(
            names,
            vec![
                "agent-widgets-a1b2c3d-claude",
                "agent-widgets-a1b2c3d-claude-2",
                "agent-widgets-a1b2c3d-codex",
            ]
        );

        let states = h.state.load().unwrap();
        let ports: HashSet<u16> = states.values().map(|s| s.port).collect();
        assert_eq!(ports, [4000, 4001, 4002].into_iter().collect());
    }

    #[tokio::test]
    async fn test_ports_in_state_are_skipped() {
        let h = harness(Some(("serve $PORT", PortRange::new(4000, 4010))));
        h.orchestrator.spawn("p", "claude:1").await.unwrap();
        h.orchestrator.spawn("p", "claude:1").await.unwrap();

        let states = h.state.load().unwrap();
        assert_eq!(states["agent-widgets-a1b2c3d-claude"].port, 4000);
        assert_eq!(states["agent-widgets-a1b2c3d-claude-2"].port, 4001);
    }

    #[tokio::test]
    async fn test_live_session_name_is_not_reused() {
        let h = harness(None);
        h.tmux
            .set_list_output(Some("agent-widgets-a1b2c3d-codex|1|0|1|1\n"));
        let name = h.orchestrator.spawn_agent("p", "codex").await.unwrap();
        assert_eq!(name, "agent-widgets-a1b2c3d-codex-2");
    }

    #[tokio::test]
    async fn test_port_exhaustion_fails_allocation() {
        let h = harness(Some(("serve $PORT", PortRange::new(5000, 5001))));
        let orchestrator = h.orchestrator.clone().with_port_probe(|port| port != 5001);

        orchestrator.spawn("p", "claude:1").await.unwrap();
        let err = orchestrator.spawn("p", "claude:1").await.unwrap_err();
        assert!(matches!(err, FleetError::Spawn { step: SpawnStep::AllocatePort, .. }));
        assert!(err.to_string().starts_with("failed to find available port"));
    }

    #[tokio::test]
    async fn test_failed_step_is_named_and_nothing_is_saved() {
        let h = harness(None);
        h.vcs.fail("create_worktree");

        let err = h.orchestrator.spawn("p", "claude:1").await.unwrap_err();
        assert!(err.to_string().starts_with("failed to create worktree:"), "{err}");
        assert!(h.tmux.writes().is_empty());
        assert!(h.state.load().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_tmux_failure_leaves_worktree() {
        let h = harness(None);
        h.tmux.fail("rename-window");

        let err = h.orchestrator.spawn("p", "claude:1").await.unwrap_err();
        assert!(matches!(err, FleetError::Spawn { step: SpawnStep::RenameWindow, .. }));
        assert!(h.vcs.calls().iter().any(|c| c.starts_with("create_worktree")));
        assert!(!h.vcs.calls().iter().any(|c| c.starts_with("remove_worktree")));
    }

    #[tokio::test]
    async fn test_save_failure_does_not_fail_spawn() {
        let h = harness(None);
        h.state.set_fail_saves(true);
        let names = h.orchestrator.spawn("p", "claude:1").await.unwrap();
        assert_eq!(names.len(), 1);
    }

    #[tokio::test]
    async fn test_bad_input_has_no_side_effects() {
        let h = harness(None);
        assert!(matches!(
            h.orchestrator.spawn("p", "claude:0").await,
            Err(FleetError::Configuration(_))
        ));
        assert!(matches!(
            h.orchestrator.spawn("  ", "claude:1").await,
            Err(FleetError::Configuration(_))
        ));
        assert!(h.vcs.calls().is_empty());
        assert!(h.tmux.writes().is_empty());
    }

    #[tokio::test]
    async fn test_random_agent_gets_display_name() {
        let h = harness(None);
        let name = h.orchestrator.spawn_agent("p", "random").await.unwrap();
        assert!(name.starts_with("agent-widgets-a1b2c3d-"));
        assert_ne!(name, "agent-widgets-a1b2c3d-random");
        assert!(h.tmux.writes().iter().any(|w| w.contains(":agent claude \"p\"")));
    }

    #[tokio::test]
    async fn test_interactive_spawn_reports_completion() {
        let h = harness(None);
        let rx = h
            .orchestrator
            .spawn_agent_interactive("codex:1 add a readme")
            .unwrap();
        let names = rx.await.unwrap().unwrap();
        assert_eq!(names, vec!["agent-widgets-a1b2c3d-codex".to_string()]);
        assert_eq!(
            h.state.load().unwrap()["agent-widgets-a1b2c3d-codex"].prompt,
            "add a readme"
        );
    }

    #[tokio::test]
    async fn test_interactive_spawn_rejects_bad_options() {
        let h = harness(None);
        assert!(h.orchestrator.spawn_agent_interactive("codex:1").is_err());
        assert!(h.orchestrator.spawn_agent_interactive("codex add a readme").is_err());
    }

    #[test]
    fn test_unique_agent_name() {
        let taken: HashSet<String> = ["agent-r-h-claude", "agent-r-h-claude-2"]
            .into_iter()
            .map(String::from)
            .collect();
        assert_eq!(unique_agent_name("r", "h", "claude", &taken), "claude-3");
        assert_eq!(unique_agent_name("r", "h", "codex", &taken), "codex");
    }
}
