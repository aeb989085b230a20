// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-agent timer table.
//!
//! Each agent holds at most one logout timer and one set of pre-logout
//! warning timers. Arming is always cancel-then-arm; cancellation is
//! idempotent and a cancelled timer never fires. Fired timers surface as
//! [`TimerFire`] events on the supervisor channel.

use std::collections::HashMap;
use std::sync::Mutex;

use tokio::sync::mpsc;
use tokio::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// What stage a logout timer is in when it fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogoutStage {
    /// Quota deadline pre-armed from a remaining-time estimate; the planner
    /// re-checks the oracle before enforcing.
    Quota,
    /// Grace period after the "time up" warning; firing executes the logout
    /// action.
    Grace,
}

/// A timer expiry, delivered to the supervisor loop.
#[derive(Debug, Clone)]
pub enum TimerFire {
    Logout { agent_id: String, reason: String, stage: LogoutStage },
    Warning { agent_id: String, threshold: u32 },
}

struct ArmedLogout {
    deadline: Instant,
    token: CancellationToken,
    stage: LogoutStage,
}

#[derive(Default)]
struct AgentTimers {
    logout: Option<ArmedLogout>,
    warnings: Vec<CancellationToken>,
}

/// Timer handle table, shared between the supervisor and command handlers.
pub struct TimerTable {
    agents: Mutex<HashMap<String, AgentTimers>>,
    fire_tx: mpsc::Sender<TimerFire>,
}

impl TimerTable {
    pub fn new(fire_tx: mpsc::Sender<TimerFire>) -> Self {
        Self { agents: Mutex::new(HashMap::new()), fire_tx }
    }

    /// Arm (or re-arm) the agent's single logout timer.
    ///
    /// A prior unfired timer is superseded: it is cancelled, and the earlier
    /// of the two deadlines wins. A quota-estimate timer never replaces an
    /// armed grace timer, since the grace countdown is already the enforcement.
    pub fn schedule_logout(
        &self,
        agent_id: &str,
        delay: Duration,
        reason: &str,
        stage: LogoutStage,
    ) {
        let mut deadline = Instant::now() + delay;
        let token = CancellationToken::new();

        {
            let Ok(mut agents) = self.agents.lock() else { return };
            let entry = agents.entry(agent_id.to_owned()).or_default();
            if entry
                .logout
                .as_ref()
                .is_some_and(|p| p.stage == LogoutStage::Grace && stage == LogoutStage::Quota)
            {
                return;
            }
            if let Some(prior) = entry.logout.take() {
                prior.token.cancel();
                if prior.deadline < deadline {
                    deadline = prior.deadline;
                }
            }
            entry.logout = Some(ArmedLogout { deadline, token: token.clone(), stage });
        }

        let fire_tx = self.fire_tx.clone();
        let agent = agent_id.to_owned();
        let reason = reason.to_owned();
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep_until(deadline) => {
                    let _ = fire_tx
                        .send(TimerFire::Logout { agent_id: agent, reason, stage })
                        .await;
                }
            }
        });
    }

    /// Replace the agent's warning timer set.
    ///
    /// `deadlines` pairs a ladder threshold (minutes) with its delay from now.
    pub fn schedule_warnings(&self, agent_id: &str, deadlines: &[(u32, Duration)]) {
        self.cancel_warnings(agent_id);
        let Ok(mut agents) = self.agents.lock() else { return };
        let entry = agents.entry(agent_id.to_owned()).or_default();
        for &(threshold, delay) in deadlines {
            let token = CancellationToken::new();
            entry.warnings.push(token.clone());
            let fire_tx = self.fire_tx.clone();
            let agent = agent_id.to_owned();
            tokio::spawn(async move {
                tokio::select! {
                    _ = token.cancelled() => {}
                    _ = tokio::time::sleep(delay) => {
                        let _ = fire_tx.send(TimerFire::Warning { agent_id: agent, threshold }).await;
                    }
                }
            });
        }
    }

    /// Cancel the agent's logout timer, if armed. Idempotent.
    pub fn cancel_logout(&self, agent_id: &str) {
        let Ok(mut agents) = self.agents.lock() else { return };
        if let Some(entry) = agents.get_mut(agent_id) {
            if let Some(armed) = entry.logout.take() {
                armed.token.cancel();
                debug!(agent_id, "logout timer cancelled");
            }
        }
    }

    /// Cancel the agent's logout timer only if it is in the given stage.
    pub fn cancel_logout_stage(&self, agent_id: &str, stage: LogoutStage) {
        let Ok(mut agents) = self.agents.lock() else { return };
        if let Some(entry) = agents.get_mut(agent_id) {
            if entry.logout.as_ref().is_some_and(|a| a.stage == stage) {
                if let Some(armed) = entry.logout.take() {
                    armed.token.cancel();
                }
            }
        }
    }

    /// Cancel the agent's warning timer set. Idempotent.
    pub fn cancel_warnings(&self, agent_id: &str) {
        let Ok(mut agents) = self.agents.lock() else { return };
        if let Some(entry) = agents.get_mut(agent_id) {
            for token in entry.warnings.drain(..) {
                token.cancel();
            }
        }
    }

    /// Cancel every timer the agent holds (unlink, disable, offline, shutdown).
    pub fn cancel_agent(&self, agent_id: &str) {
        self.cancel_logout(agent_id);
        self.cancel_warnings(agent_id);
    }

    /// Cancel all timers for all agents.
    pub fn cancel_all(&self) {
        let ids: Vec<String> = {
            let Ok(agents) = self.agents.lock() else { return };
            agents.keys().cloned().collect()
        };
        for id in ids {
            self.cancel_agent(&id);
        }
    }

    /// Clear the agent's logout slot without cancelling (the timer has fired).
    pub fn logout_fired(&self, agent_id: &str) {
        let Ok(mut agents) = self.agents.lock() else { return };
        if let Some(entry) = agents.get_mut(agent_id) {
            entry.logout = None;
        }
    }

    /// Whether a logout timer is currently armed for the agent.
    pub fn logout_armed(&self, agent_id: &str) -> bool {
        self.agents
            .lock()
            .map(|agents| agents.get(agent_id).is_some_and(|e| e.logout.is_some()))
            .unwrap_or(false)
    }

    /// Number of armed logout timers across all agents.
    pub fn armed_logout_count(&self) -> usize {
        self.agents
            .lock()
            .map(|agents| agents.values().filter(|e| e.logout.is_some()).count())
            .unwrap_or(0)
    }
}

#[cfg(test)]
#[path = "timers_tests.rs"]
mod tests;
