use clap::{Parser, Subcommand};
use std::path::PathBuf;

use agent_fleet::exec::LogLevel;
use agent_fleet::{FleetConfig, FleetResult, PortRange};

#[derive(Parser, Debug)]
#[command(name = "fleet", version, about = "Run AI coding agents in parallel worktrees")]
pub struct Cli {
    /// Log every command, not just failures
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Repository the agents branch from
    #[arg(long, global = true)]
    pub repo: Option<PathBuf>,

    /// Dev-server command; `$PORT` is replaced by the allocated port
    #[arg(long, global = true)]
    pub dev_command: Option<String>,

    /// Dev-server ports to allocate from, e.g. 3000-3100
    #[arg(long, global = true)]
    pub port_range: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// List tracked agent sessions
    Ls,
    /// Print the status of one session
    Status { name: String },
    /// Spawn agents on a prompt
    Spawn {
        /// Agents to start, e.g. "claude:2,codex:1"
        #[arg(short, long, default_value = "claude:1")]
        agents: String,

        #[arg(required = true, trailing_var_arg = true)]
        prompt: Vec<String>,
    },
    /// Kill a session and remove its worktree
    Kill {
        #[arg(required_unless_present = "all")]
        name: Option<String>,

        /// Kill every tracked session
        #[arg(long, conflicts_with = "name")]
        all: bool,
    },
    /// Attach this terminal to a session
    Attach { name: String },
    /// Send a message to every running agent
    Broadcast {
        #[arg(required = true, trailing_var_arg = true)]
        message: Vec<String>,
    },
    /// Print the session table every two seconds until Ctrl-C
    Watch,
}

impl Cli {
    /// Defaults, then `FLEET_*` variables, then flags.
    pub fn fleet_config(&self) -> FleetResult<FleetConfig> {
        let mut config = FleetConfig::from_env()?;
        if let Some(repo) = &self.repo {
            config.repo_dir = repo.clone();
        }
        if let Some(cmd) = &self.dev_command {
            config.dev_command = Some(cmd.clone());
        }
        if let Some(range) = &self.port_range {
            config.port_range = Some(PortRange::parse(range)?);
        }
        if self.verbose {
            config.exec.log_level = LogLevel::Debug;
        }
        Ok(config)
    }
}
