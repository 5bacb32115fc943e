use std::fmt;
use std::ops::RangeInclusive;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{FleetError, FleetResult};
use crate::exec::{ExecConfig, LogLevel};

/// Replaced by the allocated port in the dev-server command.
pub const PORT_PLACEHOLDER: &str = "$PORT";

/// Inclusive range of dev-server ports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortRange {
    pub start: u16,
    pub end: u16,
}

impl PortRange {
    pub fn new(start: u16, end: u16) -> Self {
        Self { start, end }
    }

    /// Parse `start-end`.
    pub fn parse(s: &str) -> FleetResult<Self> {
        let (start, end) = s
            .trim()
            .split_once('-')
            .ok_or_else(|| FleetError::config(format!("invalid port range {:?}, expected start-end", s)))?;
        let parse = |v: &str| {
            v.trim()
                .parse::<u16>()
                .map_err(|_| FleetError::config(format!("invalid port {:?} in range {:?}", v, s)))
        };
        let range = Self::new(parse(start)?, parse(end)?);
        range.validate()?;
        Ok(range)
    }

    pub fn validate(&self) -> FleetResult<()> {
        if self.start == 0 {
            return Err(FleetError::config("port range cannot start at 0"));
        }
        if self.start > self.end {
            return Err(FleetError::config(format!(
                "port range {} is inverted",
                self
            )));
        }
        Ok(())
    }

    pub fn iter(&self) -> RangeInclusive<u16> {
        self.start..=self.end
    }
}

impl fmt::Display for PortRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

pub fn default_storage_root() -> PathBuf {
    dirs::data_local_dir()
        .or_else(|| dirs::home_dir().map(|h| h.join(".local").join("share")))
        .unwrap_or_default()
        .join("agent-fleet")
}

#[derive(Debug, Clone)]
pub struct FleetConfig {
    /// Repository the agents branch from.
    pub repo_dir: PathBuf,
    /// Holds `worktrees/` and `state.json`.
    pub storage_root: PathBuf,
    pub exec: ExecConfig,
    /// Dev-server command template containing [`PORT_PLACEHOLDER`].
    pub dev_command: Option<String>,
    pub port_range: Option<PortRange>,
    pub monitor_interval: Duration,
}

impl Default for FleetConfig {
    fn default() -> Self {
        Self {
            repo_dir: PathBuf::from("."),
            storage_root: default_storage_root(),
            exec: ExecConfig::default(),
            dev_command: None,
            port_range: None,
            monitor_interval: Duration::from_secs(2),
        }
    }
}

impl FleetConfig {
    /// Defaults overridden by `FLEET_*` environment variables.
    pub fn from_env() -> FleetResult<Self> {
        Self::default().apply_env(|key| std::env::var(key).ok())
    }

    pub fn apply_env(mut self, lookup: impl Fn(&str) -> Option<String>) -> FleetResult<Self> {
        if let Some(root) = lookup("FLEET_STORAGE_ROOT") {
            self.storage_root = PathBuf::from(root);
        }
        if let Some(cmd) = lookup("FLEET_DEV_COMMAND").filter(|c| !c.trim().is_empty()) {
            self.dev_command = Some(cmd);
        }
        if let Some(range) = lookup("FLEET_PORT_RANGE") {
            self.port_range = Some(PortRange::parse(&range)?);
        }
        if let Some(secs) = lookup("FLEET_TIMEOUT_SECS") {
            let secs: u64 = secs
                .trim()
                .parse()
                .map_err(|_| FleetError::config(format!("invalid FLEET_TIMEOUT_SECS {:?}", secs)))?;
            self.exec.timeout = Duration::from_secs(secs);
        }
        if let Some(retries) = lookup("FLEET_RETRIES") {
            self.exec.retries = retries
                .trim()
                .parse()
                .map_err(|_| FleetError::config(format!("invalid FLEET_RETRIES {:?}", retries)))?;
        }
        if let Some(verbose) = lookup("FLEET_VERBOSE") {
            if matches!(verbose.trim(), "1" | "true" | "yes") {
                self.exec.log_level = LogLevel::Debug;
            }
        }
        Ok(self)
    }

    pub fn validate(&self) -> FleetResult<()> {
        if self.exec.timeout.is_zero() {
            return Err(FleetError::config("command timeout must be positive"));
        }
        match (&self.dev_command, &self.port_range) {
            (Some(_), None) => Err(FleetError::config(
                "a dev command needs a port range",
            )),
            (None, Some(_)) => Err(FleetError::config(
                "a port range needs a dev command",
            )),
            (_, Some(range)) => range.validate(),
            (None, None) => Ok(()),
        }
    }

    pub fn worktree_root(&self) -> PathBuf {
        self.storage_root.join("worktrees")
    }

    pub fn state_path(&self) -> PathBuf {
        self.storage_root.join("state.json")
    }
}
