// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Rule evaluation: blocked-process patterns, time-of-day schedules, and the
//! bedtime warning ladder.
//!
//! All functions are pure over a caller-supplied local wall-clock instant so
//! the evaluator replays deterministically.

use std::collections::BTreeSet;

use chrono::{Datelike, NaiveDateTime, Timelike};

use crate::model::{Category, Intent, ProcessSnapshot, Urgency, WarnScope};
use crate::settings::{ChildConfig, FocusProfile};

/// Bedtime warning thresholds in minutes, largest first.
pub const BEDTIME_THRESHOLDS: [u32; 3] = [15, 5, 1];

/// Outcome of the bedtime pass for one tick.
#[derive(Debug, Default)]
pub struct BedtimeOutcome {
    pub intents: Vec<Intent>,
    /// Thresholds that fired this tick (caller records them for the day).
    pub newly_fired: Vec<u32>,
}

/// Effective blocked patterns: the child's list, extended by the focus
/// profile's blocked apps while focus is active.
pub fn effective_blocked_patterns(child: &ChildConfig, focus: Option<&FocusProfile>) -> Vec<String> {
    let mut patterns = child.blocked_processes.clone();
    if let Some(profile) = focus {
        patterns.extend(profile.blocked_apps.iter().cloned());
    }
    patterns
}

fn matches_any(name: &str, patterns: &[String]) -> Option<String> {
    let lower = name.to_lowercase();
    patterns.iter().find(|p| !p.is_empty() && lower.contains(&p.to_lowercase())).cloned()
}

/// Blocked-process and schedule passes over one snapshot.
///
/// First pattern match wins per process; a process already condemned by the
/// blocked pass is not re-reported by the schedule pass.
pub fn evaluate_snapshot(
    agent_id: &str,
    snapshot: &ProcessSnapshot,
    child: &ChildConfig,
    focus: Option<&FocusProfile>,
    now: NaiveDateTime,
) -> Vec<Intent> {
    let mut intents = Vec::new();
    let mut condemned: BTreeSet<u32> = BTreeSet::new();

    // 1. Blocked process pass. The dispatcher pairs every block with a
    // user-facing warning.
    let patterns = effective_blocked_patterns(child, focus);
    for p in &snapshot.processes {
        if let Some(pattern) = matches_any(&p.name, &patterns) {
            condemned.insert(p.pid);
            intents.push(Intent::BlockProcess {
                agent_id: agent_id.to_owned(),
                pid: p.pid,
                name: p.name.clone(),
                reason: format!("matches blocked pattern \"{pattern}\""),
            });
        }
    }

    // 1b. Focus category pass: while focus is active, processes in a blocked
    // category are condemned regardless of schedules.
    if let Some(profile) = focus {
        for p in &snapshot.processes {
            if condemned.contains(&p.pid) {
                continue;
            }
            if let Some(category) = p.category {
                if profile.blocked_categories.contains(&category) {
                    condemned.insert(p.pid);
                    intents.push(Intent::BlockProcess {
                        agent_id: agent_id.to_owned(),
                        pid: p.pid,
                        name: p.name.clone(),
                        reason: "blocked by focus mode".to_owned(),
                    });
                }
            }
        }
    }

    // 2. Schedule pass.
    let day = now.weekday();
    let time = now.time();
    for schedule in &child.schedules {
        if !schedule.active_at(day, time) {
            continue;
        }
        let allowed: Vec<Category> = match focus {
            Some(profile) => schedule
                .allowed_categories
                .iter()
                .copied()
                .filter(|c| !profile.blocked_categories.contains(c))
                .collect(),
            None => schedule.allowed_categories.clone(),
        };
        for p in &snapshot.processes {
            if condemned.contains(&p.pid) {
                continue;
            }
            if matches_any(&p.name, &schedule.blocked_patterns).is_none() {
                continue;
            }
            if p.category.is_some_and(|c| allowed.contains(&c)) {
                continue;
            }
            condemned.insert(p.pid);
            intents.push(Intent::BlockProcess {
                agent_id: agent_id.to_owned(),
                pid: p.pid,
                name: p.name.clone(),
                reason: format!("blocked by schedule \"{}\"", schedule.name),
            });
        }
    }

    intents
}

/// Bedtime pass: a logout once the deadline passes, otherwise ladder
/// warnings at the fixed thresholds.
///
/// `fired` holds thresholds already emitted today.
pub fn evaluate_bedtime(
    agent_id: &str,
    child: &ChildConfig,
    grace_seconds: u64,
    now: NaiveDateTime,
    fired: &BTreeSet<u32>,
) -> BedtimeOutcome {
    let mut outcome = BedtimeOutcome::default();
    let Some(ref bedtime) = child.bedtime else {
        return outcome;
    };
    if !bedtime.enabled || !bedtime.applies_on(now.weekday()) {
        return outcome;
    }

    let now_secs = i64::from(now.time().num_seconds_from_midnight());
    let deadline_secs = i64::from(bedtime.time.num_seconds_from_midnight());
    let remaining_secs = deadline_secs - now_secs;

    if remaining_secs <= 0 {
        outcome.intents.push(Intent::Logout {
            agent_id: agent_id.to_owned(),
            reason: "bedtime".to_owned(),
            grace_seconds,
        });
        return outcome;
    }

    // Every threshold at or past the remaining time is due; all of them are
    // marked fired but only one warning (with the actual Δ) is emitted.
    let minutes_remaining = ((remaining_secs + 59) / 60) as u32;
    for threshold in BEDTIME_THRESHOLDS {
        if minutes_remaining <= threshold && !fired.contains(&threshold) {
            outcome.newly_fired.push(threshold);
        }
    }
    if !outcome.newly_fired.is_empty() {
        outcome.intents.push(Intent::Warning {
            agent_id: agent_id.to_owned(),
            scope: WarnScope::Bedtime,
            minutes_remaining,
            urgency: if minutes_remaining <= 5 { Urgency::Critical } else { Urgency::Normal },
        });
    }

    outcome
}

#[cfg(test)]
#[path = "rules_tests.rs"]
mod tests;
