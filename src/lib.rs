//! Run a fleet of AI coding agents side by side, each in its own git
//! worktree and tmux session.

pub mod activity;
pub mod agent;
pub mod config;
pub mod error;
pub mod exec;
pub mod fleet;
pub mod git;
pub mod session;
pub mod state;
pub mod tmux;

#[cfg(test)]
mod testing;

pub use config::{FleetConfig, PortRange};
pub use error::{ExecError, FleetError, FleetResult};
pub use fleet::{BroadcastReport, Fleet};
pub use session::{SessionRecord, SessionStatus};
