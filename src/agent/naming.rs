use uuid::Uuid;

use crate::tmux::SESSION_PREFIX;

const RANDOM_NAMES: &[&str] = &[
    "ada", "babbage", "boole", "church", "dijkstra", "engelbart", "feynman", "gauss", "hamilton",
    "hopper", "kay", "knuth", "lamport", "liskov", "lovelace", "mccarthy", "minsky", "noether",
    "pike", "ritchie", "shannon", "thompson", "torvalds", "turing", "wirth",
];

/// Pick a display name for a `random` agent.
pub fn random_agent_name() -> String {
    let pick = (Uuid::new_v4().as_u128() % RANDOM_NAMES.len() as u128) as usize;
    RANDOM_NAMES[pick].to_string()
}

/// Tokens that look like an abbreviated commit hash: at least six ASCII
/// alphanumerics with at least one letter and one digit.
fn is_hash_like(token: &str) -> bool {
    token.len() >= 6
        && token.chars().all(|c| c.is_ascii_alphanumeric())
        && token.chars().any(|c| c.is_ascii_alphabetic())
        && token.chars().any(|c| c.is_ascii_digit())
}

/// Recover the agent name from `agent-<repo>-<hash>-<name...>`.
///
/// The repo and the agent name may both contain hyphens, so the hash is
/// located by scanning backwards. Names without the `agent-` shape come back
/// unchanged.
pub fn extract_agent_name(session_name: &str) -> String {
    let parts: Vec<&str> = session_name.split('-').collect();
    if parts.len() < 4 || parts[0] != SESSION_PREFIX {
        return session_name.to_string();
    }

    for i in (1..parts.len() - 1).rev() {
        if is_hash_like(parts[i]) {
            return parts[i + 1..].join("-");
        }
    }

    parts[3..].join("-")
}

/// `agent-{repo}-{hash}-{agent}`
pub fn session_name(repo: &str, hash: &str, agent: &str) -> String {
    format!("{}-{}-{}-{}", SESSION_PREFIX, repo, hash, agent)
}

/// `{agent}-{repo}-{hash}-{timestamp}`, used for both branch and worktree dir.
pub fn branch_name(agent: &str, repo: &str, hash: &str, timestamp: i64) -> String {
    format!("{}-{}-{}-{}", agent, repo, hash, timestamp)
}
