use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// What an agent's pane appears to be doing, judged from its visible text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum PaneState {
    /// Agent is generating or running tools
    Busy,
    /// Agent is blocked on a confirmation prompt
    WaitingForInput,
    /// Agent printed an error as its latest output
    Error,
    /// Agent is sitting at its input box
    Idle,
    #[default]
    Unknown,
}

impl PaneState {
    pub fn is_busy(&self) -> bool {
        matches!(self, PaneState::Busy)
    }
}

/// Only the tail of the pane is considered; scrollback is history.
const TAIL_LINES: usize = 20;

static RE_BUSY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?mi)(esc to interrupt|ctrl\+c to interrupt|Thinking|Working\.\.\.|⠋|⠙|⠹|⠸|⠼|⠴|⠦|⠧|⠇|⠏|✻|✽)")
        .unwrap()
});

static RE_WAITING_INPUT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?mi)(Do you want to|\[y/n\]|\(y/N\)|\(Y/n\)|❯ 1\. Yes|Allow (once|always)|Press Enter to continue)")
        .unwrap()
});

static RE_ERROR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)(^\s*Error:|API Error|panicked at|^fatal:|command not found)").unwrap()
});

static RE_IDLE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)(^\s*>\s*$|^│\s*>\s|^\$\s*$|^❯\s*$|\? for shortcuts)").unwrap()
});

/// Classifies captured pane text.
pub struct PaneInspector;

impl PaneInspector {
    pub fn analyze(content: &str) -> PaneState {
        let lines: Vec<&str> = content
            .lines()
            .rev()
            .filter(|l| !l.trim().is_empty())
            .take(TAIL_LINES)
            .collect();
        let recent = lines.into_iter().rev().collect::<Vec<_>>().join("\n");

        // An agent that is busy often still shows its input box, so busy
        // wins over idle. A pending confirmation wins over both.
        if RE_WAITING_INPUT.is_match(&recent) {
            return PaneState::WaitingForInput;
        }
        if RE_BUSY.is_match(&recent) {
            return PaneState::Busy;
        }
        if RE_ERROR.is_match(&recent) {
            return PaneState::Error;
        }
        if RE_IDLE.is_match(&recent) {
            return PaneState::Idle;
        }
        PaneState::Unknown
    }
}
