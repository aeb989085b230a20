// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Session tracking: maps the OS user reported by an agent onto a child,
//! detects parent accounts, and closes the prior session on user change.

use crate::model::{AgentRecord, SessionInfo, SessionPayload};

/// A session that just ended, with the child it was accruing time for.
#[derive(Debug, Clone)]
pub struct EndedSession {
    pub session: SessionInfo,
    pub child_id: Option<String>,
}

/// Result of applying one session telemetry to an agent record.
#[derive(Debug, Clone)]
pub struct SessionChange {
    pub session: SessionInfo,
    /// Present when the username changed; usage for the old child must flush.
    pub ended: Option<EndedSession>,
    /// Child the new session accrues to; `None` for parental or unmapped users.
    pub child_id: Option<String>,
    pub parental: bool,
    /// This telemetry opened a session (first report, or a new username)
    /// rather than updating the current one.
    pub started: bool,
}

/// Apply session telemetry to the agent record, replacing the current
/// session snapshot atomically. Exactly one session exists per agent.
pub fn apply_session(
    agent: &mut AgentRecord,
    payload: &SessionPayload,
    idle_threshold_ms: u64,
) -> SessionChange {
    let parental = agent.is_parent(&payload.username);
    let child_id = agent.child_for(&payload.username).map(str::to_owned);

    let ended = match agent.current_session.as_ref() {
        Some(prior) if prior.username != payload.username => Some(EndedSession {
            session: prior.clone(),
            child_id: agent.child_for(&prior.username).map(str::to_owned),
        }),
        _ => None,
    };
    let started = ended.is_some() || agent.current_session.is_none();

    let session = SessionInfo {
        username: payload.username.clone(),
        session_id: payload.session_id.clone(),
        login_time_ms: payload.login_time,
        last_report_ms: payload.timestamp,
        idle_ms: payload.idle_time,
        is_idle: payload.idle_time >= idle_threshold_ms,
        parental,
    };
    agent.current_session = Some(session.clone());
    agent.last_seen_ms = payload.timestamp;

    SessionChange { session, ended, child_id, parental, started }
}

#[cfg(test)]
#[path = "session_tests.rs"]
mod tests;
