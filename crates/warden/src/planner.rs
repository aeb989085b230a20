// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Enforcement planner: the coherence point that fuses oracle verdicts,
//! usage accounting, rule matches, and overrides into a deduplicated intent
//! stream, tracking one enforcement state machine per agent.
//!
//! ```text
//! Idle ──(warn threshold)──▶ Warning ──(time ≤ 0 ∨ banned)──▶ GracePending
//! GracePending ──(grace elapses)──▶ LoggingOut ──(agent ack)──▶ Idle
//! GracePending ──(oracle grants time)──▶ Idle
//! ```

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use chrono::NaiveDate;
use tracing::{debug, info};

use crate::clock::{local_date, local_naive};
use crate::model::{Activity, Intent, Urgency, WarnScope};
use crate::oracle::{CacheOutcome, Oracle, VerdictCache};
use crate::rules;
use crate::state::Store;
use crate::timers::LogoutStage;

/// Suppression window for re-observed blocked processes.
const KILL_DEDUP_MS: u64 = 30_000;

/// Per-agent enforcement state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EnforceState {
    #[default]
    Idle,
    Warning,
    GracePending,
    LoggingOut,
}

#[derive(Debug, Default)]
struct AgentPlan {
    state: EnforceState,
    /// The pending logout was caused by quota (not bedtime or a manual
    /// override), so a fresh grant voids it.
    quota_pending: bool,
    /// pid → telemetry timestamp of the last kill intent.
    recent_kills: HashMap<u32, u64>,
    bedtime_fired: BTreeSet<u32>,
    bedtime_day: Option<NaiveDate>,
}

/// The enforcement planner. Owned by the supervisor loop; all methods run on
/// that single writer.
pub struct Planner {
    oracle: Arc<dyn Oracle>,
    cache: Arc<VerdictCache>,
    plans: HashMap<String, AgentPlan>,
}

impl Planner {
    pub fn new(oracle: Arc<dyn Oracle>, cache: Arc<VerdictCache>) -> Self {
        Self { oracle, cache, plans: HashMap::new() }
    }

    pub fn state(&self, agent_id: &str) -> EnforceState {
        self.plans.get(agent_id).map(|p| p.state).unwrap_or_default()
    }

    pub fn set_state(&mut self, agent_id: &str, state: EnforceState) {
        let plan = self.plans.entry(agent_id.to_owned()).or_default();
        plan.state = state;
        if state == EnforceState::Idle {
            plan.quota_pending = false;
        }
    }

    /// Drop all planner state for an agent (unlink, disable, offline).
    pub fn reset(&mut self, agent_id: &str) {
        self.plans.remove(agent_id);
    }

    /// Invalidate cached verdicts for a child (oracle state change).
    pub fn invalidate_child(&self, child_id: &str) {
        self.cache.invalidate_child(child_id);
    }

    /// Recompute intents for one agent at telemetry time `now_ms`.
    ///
    /// This is the single entry point for telemetry arrivals, oracle state
    /// changes, and timer fires; the caller dispatches whatever comes back.
    pub async fn evaluate(&mut self, store: &Store, agent_id: &str, now_ms: u64) -> Vec<Intent> {
        let Some(agent) = store.agent_snapshot(agent_id).await else {
            return Vec::new();
        };
        if !agent.enabled || !agent.online {
            return Vec::new();
        }

        // Parent sessions are tracked but never produce intents, and the
        // oracle is never consulted for them.
        let Some(session) = agent.current_session.as_ref() else {
            return Vec::new();
        };
        if session.parental {
            return Vec::new();
        }
        let Some(child_id) = agent.child_for(&session.username).map(str::to_owned) else {
            // No binding: online/hostname tracking only.
            return Vec::new();
        };

        let child = store.child_snapshot(&child_id).await.unwrap_or_default();
        let settings = store.settings_snapshot().await;
        let now_local = local_naive(now_ms);
        let plan = self.plans.entry(agent_id.to_owned()).or_default();

        let mut intents: Vec<Intent> = Vec::new();

        // -- Rule passes ------------------------------------------------------

        if let Some(ref snapshot) = agent.last_snapshot {
            let rule_intents = rules::evaluate_snapshot(
                agent_id,
                snapshot,
                &child,
                agent.focus.as_ref(),
                now_local,
            );
            // Suppress kills re-observed inside the dedup window.
            plan.recent_kills.retain(|_, t| now_ms.saturating_sub(*t) < KILL_DEDUP_MS);
            for intent in rule_intents {
                match intent {
                    Intent::BlockProcess { pid, .. } => {
                        if plan.recent_kills.contains_key(&pid) {
                            continue;
                        }
                        plan.recent_kills.insert(pid, now_ms);
                        intents.push(intent);
                    }
                    _ => intents.push(intent),
                }
            }
        }

        // Bedtime ladder state resets each local day.
        let today = local_date(now_ms);
        if plan.bedtime_day != Some(today) {
            plan.bedtime_day = Some(today);
            plan.bedtime_fired.clear();
        }
        let bedtime = rules::evaluate_bedtime(
            agent_id,
            &child,
            settings.grace_period_secs,
            now_local,
            &plan.bedtime_fired,
        );
        plan.bedtime_fired.extend(bedtime.newly_fired);
        intents.extend(bedtime.intents);

        // -- Quota evaluation -------------------------------------------------

        match self.cache.check(self.oracle.as_ref(), &child_id, Activity::Computer).await {
            CacheOutcome::Fresh(verdict) => {
                if verdict.banned || !verdict.allowed {
                    // The oracle is authoritative; local accumulators are
                    // irrelevant once it says no.
                    intents.push(Intent::Logout {
                        agent_id: agent_id.to_owned(),
                        reason: "access blocked".to_owned(),
                        grace_seconds: settings.grace_period_secs,
                    });
                } else {
                    let remaining = verdict.remaining_seconds;
                    {
                        let mut usage = store.usage.write().await;
                        for &threshold in &settings.warning_times {
                            let window = (i64::from(threshold - 1) * 60, i64::from(threshold) * 60);
                            if remaining > window.0
                                && remaining <= window.1
                                && usage.mark_warning(
                                    agent_id,
                                    &child_id,
                                    Activity::Computer,
                                    threshold,
                                )
                            {
                                intents.push(Intent::Warning {
                                    agent_id: agent_id.to_owned(),
                                    scope: WarnScope::Computer,
                                    minutes_remaining: threshold,
                                    urgency: if threshold <= 5 {
                                        Urgency::Critical
                                    } else {
                                        Urgency::Normal
                                    },
                                });
                            }
                        }
                    }

                    if remaining <= 0 {
                        intents.push(Intent::Logout {
                            agent_id: agent_id.to_owned(),
                            reason: "computer time exhausted".to_owned(),
                            grace_seconds: settings.grace_period_secs,
                        });
                    } else {
                        // Time was granted: a pending quota logout is void.
                        // Bedtime and manual logouts are untouched.
                        if matches!(plan.state, EnforceState::GracePending) && plan.quota_pending {
                            info!(agent_id, "oracle granted time, cancelling pending logout");
                            store.timers.cancel_logout(agent_id);
                            plan.state = EnforceState::Idle;
                            plan.quota_pending = false;
                        }
                        if remaining <= 3600 {
                            // Pre-arm the ladder and the deadline from the
                            // latest estimate so enforcement does not depend
                            // on further telemetry.
                            let deadlines: Vec<(u32, tokio::time::Duration)> = settings
                                .warning_times
                                .iter()
                                .filter_map(|&t| {
                                    let delay = remaining - i64::from(t) * 60;
                                    (delay > 0).then_some((
                                        t,
                                        tokio::time::Duration::from_secs(delay as u64),
                                    ))
                                })
                                .collect();
                            store.timers.schedule_warnings(agent_id, &deadlines);
                            store.timers.schedule_logout(
                                agent_id,
                                tokio::time::Duration::from_secs(remaining as u64),
                                "computer time exhausted",
                                LogoutStage::Quota,
                            );
                        } else {
                            // Over an hour left: any quota estimate timers
                            // are stale. A grace countdown stays armed.
                            store.timers.cancel_warnings(agent_id);
                            store.timers.cancel_logout_stage(agent_id, LogoutStage::Quota);
                        }
                    }
                }
            }
            CacheOutcome::Stale(_) | CacheOutcome::Unavailable => {
                // Enforcement defers on stale quota data; already-armed
                // timers still fire.
                debug!(agent_id, child_id, "oracle unavailable, deferring quota enforcement");
            }
        }

        // -- Internet gating --------------------------------------------------

        let browsers_open =
            agent.last_snapshot.as_ref().is_some_and(|s| !s.browsers.is_empty());
        if browsers_open {
            if let CacheOutcome::Fresh(verdict) =
                self.cache.check(self.oracle.as_ref(), &child_id, Activity::Internet).await
            {
                if verdict.banned || !verdict.allowed {
                    intents.push(Intent::BlockBrowsers { agent_id: agent_id.to_owned() });
                }
            }
        }

        self.finish(agent_id, intents)
    }

    /// Deduplicate against the state machine and order the final sequence.
    fn finish(&mut self, agent_id: &str, mut intents: Vec<Intent>) -> Vec<Intent> {
        let plan = self.plans.entry(agent_id.to_owned()).or_default();

        // A logout is already pending or running: further logout intents for
        // this agent are duplicates of the armed timer.
        if matches!(plan.state, EnforceState::GracePending | EnforceState::LoggingOut) {
            intents.retain(|i| !matches!(i, Intent::Logout { .. }));
        }

        let quota_logout = intents.iter().any(|i| {
            matches!(i, Intent::Logout { reason, .. }
                if reason == "access blocked" || reason == "computer time exhausted")
        });
        let has_logout = intents.iter().any(|i| matches!(i, Intent::Logout { .. }));
        let has_warning = intents.iter().any(|i| matches!(i, Intent::Warning { .. }));
        if has_logout {
            plan.state = EnforceState::GracePending;
            plan.quota_pending = quota_logout;
        } else if has_warning && plan.state == EnforceState::Idle {
            plan.state = EnforceState::Warning;
        }

        crate::model::sort_intents(&mut intents);
        intents
    }

    /// Manual override: any state moves to GracePending and the logout is
    /// emitted regardless of verdicts.
    pub fn force_logout(&mut self, agent_id: &str, grace_seconds: u64) -> Vec<Intent> {
        let plan = self.plans.entry(agent_id.to_owned()).or_default();
        plan.state = EnforceState::GracePending;
        plan.quota_pending = false;
        vec![Intent::Logout {
            agent_id: agent_id.to_owned(),
            reason: "manual logout".to_owned(),
            grace_seconds,
        }]
    }
}

#[cfg(test)]
#[path = "planner_tests.rs"]
mod tests;
