//! Session discovery with a short-lived, whole-map cache.
//!
//! One refresh lists every tmux session, enriches each with its windows and
//! panes, and swaps the result in as a unit. Readers within the TTL share
//! that snapshot.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tracing::debug;

use super::{MultiplexerTransport, SessionActivity, TmuxSession, AGENT_WINDOW, DEV_WINDOW, SESSION_PREFIX};
use crate::agent::extract_agent_name;
use crate::error::ExecError;
use crate::session::SessionRecord;

pub const CACHE_TTL: Duration = Duration::from_secs(2);

/// Unattached sessions with activity this recent count as active.
pub const ACTIVE_WINDOW_SECS: i64 = 180;

/// Status reported for a session that is neither live nor tracked.
pub const NOT_FOUND: &str = "not_found";

const SESSION_FIELDS: usize = 5;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("session line has {found} fields, expected {}: {line:?}", SESSION_FIELDS)]
pub struct SessionLineError {
    pub found: usize,
    pub line: String,
}

/// Parse one `name|windows|attached|created|activity` line.
///
/// Numeric fields that fail to parse read as zero; only the field count is
/// enforced. The session counts as attached only when the attachment field
/// is exactly `1`.
pub fn parse_session_line(line: &str, now: i64) -> Result<TmuxSession, SessionLineError> {
    let parts: Vec<&str> = line.split('|').collect();
    if parts.len() != SESSION_FIELDS {
        return Err(SessionLineError {
            found: parts.len(),
            line: line.to_string(),
        });
    }

    let attached = parts[2].trim() == "1";
    let created_at = parts[3].trim().parse().unwrap_or(0);
    let last_activity: i64 = parts[4].trim().parse().unwrap_or(0);

    let activity = if attached {
        SessionActivity::Attached
    } else if now - last_activity <= ACTIVE_WINDOW_SECS {
        SessionActivity::Active
    } else {
        SessionActivity::Inactive
    };

    Ok(TmuxSession {
        name: parts[0].to_string(),
        window_count: parts[1].trim().parse().unwrap_or(0),
        pane_count: 0,
        windows: Vec::new(),
        attached,
        activity,
        created_at,
        last_activity,
    })
}

/// Whether a tmux session was created by this tool.
///
/// Either the name has the `agent-<repo>-<hash>-<name...>` shape or one of
/// the windows carries a fleet window name.
pub fn is_known_session(session: &TmuxSession) -> bool {
    let parts: Vec<&str> = session.name.split('-').collect();
    if parts.len() >= 4 && parts[0] == SESSION_PREFIX {
        return true;
    }
    session
        .windows
        .iter()
        .any(|w| w == AGENT_WINDOW || w == DEV_WINDOW)
}

/// How well a live tmux session name matches a tracked session name.
///
/// 100 for equality, 80 for the same agent name, 60 when one contains the
/// other, 0 otherwise.
pub fn match_score(tmux_name: &str, known_name: &str) -> u32 {
    if tmux_name == known_name {
        return 100;
    }
    if extract_agent_name(tmux_name) == extract_agent_name(known_name) {
        return 80;
    }
    if tmux_name.contains(known_name) || known_name.contains(tmux_name) {
        return 60;
    }
    0
}

fn non_empty_lines(output: &str) -> impl Iterator<Item = &str> {
    output.lines().map(str::trim).filter(|l| !l.is_empty())
}

struct CacheState {
    sessions: HashMap<String, TmuxSession>,
    /// `None` forces the next read to query tmux.
    last_update: Option<Instant>,
}

/// Cached view of the tmux server's sessions.
pub struct SessionCache {
    transport: Arc<dyn MultiplexerTransport>,
    ttl: Duration,
    state: Mutex<CacheState>,
}

impl SessionCache {
    pub fn new(transport: Arc<dyn MultiplexerTransport>) -> Self {
        Self::with_ttl(transport, CACHE_TTL)
    }

    pub fn with_ttl(transport: Arc<dyn MultiplexerTransport>, ttl: Duration) -> Self {
        Self {
            transport,
            ttl,
            state: Mutex::new(CacheState {
                sessions: HashMap::new(),
                last_update: None,
            }),
        }
    }

    pub fn transport(&self) -> &Arc<dyn MultiplexerTransport> {
        &self.transport
    }

    /// All live sessions keyed by name.
    ///
    /// A failing `list-sessions` (no server, no binary) yields an empty map.
    pub async fn get_all_sessions(&self) -> HashMap<String, TmuxSession> {
        let mut state = self.state.lock().await;
        if let Some(at) = state.last_update {
            if at.elapsed() < self.ttl {
                return state.sessions.clone();
            }
        }

        // The lock is held across the query so concurrent readers wait for
        // this refresh instead of issuing their own.
        state.sessions = self.discover().await;
        state.last_update = Some(Instant::now());
        state.sessions.clone()
    }

    /// Make the next read bypass the cache.
    pub async fn refresh_cache(&self) {
        self.state.lock().await.last_update = None;
    }

    /// `attached`, `active`, `inactive`, or [`NOT_FOUND`].
    pub async fn get_session_status(&self, name: &str) -> &'static str {
        self.get_all_sessions()
            .await
            .get(name)
            .map(|s| s.activity.as_str())
            .unwrap_or(NOT_FOUND)
    }

    pub async fn is_session_attached(&self, name: &str) -> bool {
        self.get_all_sessions()
            .await
            .get(name)
            .map(|s| s.attached)
            .unwrap_or(false)
    }

    /// Count attached sessions straight from tmux, uncached. Unlike the
    /// listing calls this reports a failing tmux as an error.
    pub async fn get_attached_session_count(&self) -> Result<usize, ExecError> {
        let output = self.transport.list_sessions().await?;
        let now = chrono::Utc::now().timestamp();
        Ok(non_empty_lines(&output)
            .filter_map(|line| parse_session_line(line, now).ok())
            .filter(|s| s.attached)
            .count())
    }

    /// Live sessions that belong to this tool.
    pub async fn get_known_sessions(&self) -> HashMap<String, TmuxSession> {
        self.get_all_sessions()
            .await
            .into_iter()
            .filter(|(_, s)| is_known_session(s))
            .collect()
    }

    /// Pair each tracked session with its live session, keyed by the tracked
    /// name. Tracked sessions with no match are absent.
    ///
    /// An exact name match always wins. A tracked session without one falls
    /// back to the best fuzzy match among live sessions that are neither
    /// tracked themselves nor already claimed by another record.
    pub async fn map_known_sessions_to_tmux(
        &self,
        known: &[SessionRecord],
    ) -> HashMap<String, TmuxSession> {
        let live = self.get_all_sessions().await;
        let mut mapped = HashMap::new();
        let mut claimed: HashSet<&str> = known.iter().map(|r| r.name.as_str()).collect();

        for record in known {
            if let Some(session) = live.get(&record.name) {
                mapped.insert(record.name.clone(), session.clone());
            }
        }

        for record in known.iter().filter(|r| !live.contains_key(&r.name)) {
            let best = live
                .values()
                .filter(|s| !claimed.contains(s.name.as_str()))
                .map(|s| (match_score(&s.name, &record.name), s))
                .filter(|(score, _)| *score > 0)
                .max_by(|(sa, a), (sb, b)| sa.cmp(sb).then_with(|| b.name.cmp(&a.name)));

            if let Some((score, session)) = best {
                debug!(known = %record.name, live = %session.name, score, "fuzzy session match");
                claimed.insert(session.name.as_str());
                mapped.insert(record.name.clone(), session.clone());
            }
        }
        mapped
    }

    async fn discover(&self) -> HashMap<String, TmuxSession> {
        let output = match self.transport.list_sessions().await {
            Ok(output) => output,
            Err(e) => {
                debug!(error = %e, "tmux unavailable, reporting no sessions");
                return HashMap::new();
            }
        };

        let now = chrono::Utc::now().timestamp();
        let mut sessions = HashMap::new();

        for line in non_empty_lines(&output) {
            let mut session = match parse_session_line(line, now) {
                Ok(session) => session,
                Err(e) => {
                    debug!(error = %e, "skipping malformed session line");
                    continue;
                }
            };

            match self.transport.list_windows(&session.name).await {
                Ok(out) => session.windows = non_empty_lines(&out).map(String::from).collect(),
                Err(e) => debug!(session = %session.name, error = %e, "could not list windows"),
            }
            match self.transport.list_panes(&session.name).await {
                Ok(out) => session.pane_count = non_empty_lines(&out).count(),
                Err(e) => debug!(session = %session.name, error = %e, "could not list panes"),
            }

            sessions.insert(session.name.clone(), session);
        }

        sessions
    }
}
