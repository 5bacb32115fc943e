//! Agent specifications and spawning.

mod naming;
mod orchestrator;
mod ports;

pub use naming::{branch_name, extract_agent_name, random_agent_name, session_name};
pub use orchestrator::{Orchestrator, SpawnCompletion, SpawnSettings};
pub use ports::{find_available_port, is_port_available};

use crate::error::{FleetError, FleetResult};

/// Placeholder agent that gets a random display name.
pub const RANDOM_AGENT: &str = "random";

/// The one agent CLI that takes its prompt through `-p`.
const PROMPT_FLAG_COMMAND: &str = "cursor-agent";

/// One `name:count` entry of an agent specification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentConfig {
    pub agent: String,
    /// Shell command that starts the agent.
    pub command: String,
    pub count: u32,
}

/// Map an agent name to the command that launches it. Unknown names are
/// used as the command verbatim.
pub fn resolve_command(agent: &str) -> String {
    match agent {
        "claude" | RANDOM_AGENT => "claude",
        "codex" => "codex",
        "cursor" => "cursor-agent",
        "gemini" => "gemini",
        "aider" => "aider",
        other => other,
    }
    .to_string()
}

/// Parse `agent:count[,agent:count...]`.
pub fn parse_agent_spec(spec: &str) -> FleetResult<Vec<AgentConfig>> {
    let mut configs = Vec::new();

    for pair in spec.split(',').map(str::trim) {
        let (agent, count) = pair.split_once(':').ok_or_else(|| {
            FleetError::config(format!("invalid agent format {:?}, expected agent:count", pair))
        })?;
        let agent = agent.trim();
        if agent.is_empty() {
            return Err(FleetError::config(format!("missing agent name in {:?}", pair)));
        }
        let count: i64 = count
            .trim()
            .parse()
            .map_err(|_| FleetError::config(format!("invalid count in {:?}", pair)))?;
        if count <= 0 {
            return Err(FleetError::config(format!(
                "count must be positive in {:?}",
                pair
            )));
        }
        let count = u32::try_from(count)
            .map_err(|_| FleetError::config(format!("count too large in {:?}", pair)))?;

        configs.push(AgentConfig {
            agent: agent.to_string(),
            command: resolve_command(agent),
            count,
        });
    }

    Ok(configs)
}

/// Quote `prompt` for use inside a double-quoted shell word.
fn shell_quote(prompt: &str) -> String {
    let mut out = String::with_capacity(prompt.len() + 2);
    out.push('"');
    for c in prompt.chars() {
        if matches!(c, '"' | '\\' | '$' | '`') {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('"');
    out
}

/// The line typed into the agent window to start the agent on `prompt`.
pub fn startup_command(command: &str, prompt: &str) -> String {
    if command == PROMPT_FLAG_COMMAND {
        format!("{} -p {}", command, shell_quote(prompt))
    } else {
        format!("{} {}", command, shell_quote(prompt))
    }
}
