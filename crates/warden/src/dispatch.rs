// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Action dispatcher: turns planner intents into agent action invocations,
//! arms the grace timer for logouts, and journals outcomes.

use std::sync::Arc;

use serde_json::json;
use tracing::{info, warn};

use crate::clock::epoch_ms;
use crate::error::ErrorCode;
use crate::event::Command;
use crate::gateway::{Gateway, ACTION_KILL, ACTION_LOCK, ACTION_LOGOUT, ACTION_WARN};
use crate::journal::UiChannel;
use crate::model::{Intent, Urgency, Violation, ViolationKind, WarnScope};
use crate::state::Store;
use crate::timers::LogoutStage;

pub struct Dispatcher {
    gateway: Arc<dyn Gateway>,
    store: Arc<Store>,
}

fn urgency_str(urgency: Urgency) -> &'static str {
    match urgency {
        Urgency::Normal => "normal",
        Urgency::Critical => "critical",
    }
}

/// Classify a failure the agent itself reported (`success = false`).
///
/// Action scripts echo the OS error text; a privilege refusal maps to
/// `PermissionDenied` (recorded, never retried), anything else stays an
/// internal script failure.
pub fn classify_failure(detail: &str) -> ErrorCode {
    let lower = detail.to_lowercase();
    const DENIED: [&str; 4] =
        ["permission denied", "access denied", "not permitted", "eperm"];
    if DENIED.iter().any(|p| lower.contains(p)) {
        ErrorCode::PermissionDenied
    } else {
        ErrorCode::Internal
    }
}

impl Dispatcher {
    pub fn new(gateway: Arc<dyn Gateway>, store: Arc<Store>) -> Self {
        Self { gateway, store }
    }

    async fn hostname_of(&self, agent_id: &str) -> String {
        self.store
            .agent_snapshot(agent_id)
            .await
            .map(|a| a.hostname)
            .unwrap_or_default()
    }

    /// Journal a failed action with its taxonomy code.
    async fn record_action_failure(
        &self,
        agent_id: &str,
        action: &str,
        code: ErrorCode,
        detail: &str,
    ) {
        warn!(agent_id, action, code = %code, detail, "agent action failed");
        let kind = match code {
            ErrorCode::PermissionDenied => "action_denied",
            _ => "action_failed",
        };
        let entry = if detail.is_empty() {
            format!("{action}: {code}")
        } else {
            format!("{action}: {code}: {detail}")
        };
        self.store.journal.record_activity(kind, Some(agent_id), entry).await;
    }

    async fn warn(&self, agent_id: &str, title: &str, message: &str, urgency: Urgency) {
        let args = json!({ "title": title, "message": message, "urgency": urgency_str(urgency) });
        match self.gateway.trigger_action(agent_id, ACTION_WARN, args).await {
            Ok(response) if response.success => {}
            Ok(response) => {
                let detail = response.error.unwrap_or_default();
                let code = classify_failure(&detail);
                self.record_action_failure(agent_id, ACTION_WARN, code, &detail).await;
            }
            Err(code) => {
                self.record_action_failure(agent_id, ACTION_WARN, code, "").await;
            }
        }
    }

    async fn kill(&self, agent_id: &str, pid: u32, name: &str, reason: &str) {
        let args = json!({ "pid": pid, "name": name, "reason": reason });
        match self.gateway.trigger_action(agent_id, ACTION_KILL, args).await {
            Ok(response) if response.success => {
                self.store
                    .journal
                    .record_violation(Violation {
                        kind: ViolationKind::ProcessKilled,
                        agent_id: agent_id.to_owned(),
                        hostname: self.hostname_of(agent_id).await,
                        process_name: Some(name.to_owned()),
                        reason: reason.to_owned(),
                        timestamp_ms: epoch_ms(),
                    })
                    .await;
            }
            Ok(response) => {
                let detail = response.error.unwrap_or_default();
                let code = classify_failure(&detail);
                self.record_action_failure(agent_id, ACTION_KILL, code, &detail).await;
            }
            Err(code) => {
                self.record_action_failure(agent_id, ACTION_KILL, code, "").await;
            }
        }
    }

    /// Dispatch one tick's intent sequence (already deduplicated and ordered).
    pub async fn dispatch(&self, intents: Vec<Intent>) {
        for intent in intents {
            self.dispatch_one(intent).await;
        }
    }

    async fn dispatch_one(&self, intent: Intent) {
        match intent {
            Intent::Warning { agent_id, scope, minutes_remaining, urgency } => {
                let (title, message, channel) = match scope {
                    WarnScope::Computer => (
                        "Computer Time Warning",
                        format!("{minutes_remaining} minutes of computer time left today."),
                        UiChannel::QuotaWarning,
                    ),
                    WarnScope::Internet => (
                        "Internet Time Warning",
                        format!("{minutes_remaining} minutes of internet time left today."),
                        UiChannel::QuotaWarning,
                    ),
                    WarnScope::Bedtime => (
                        "Bedtime Soon",
                        format!("Bedtime in {minutes_remaining} minutes. Save your work."),
                        UiChannel::BedtimeWarning,
                    ),
                };
                self.store.journal.emit(
                    channel,
                    json!({
                        "agentId": agent_id,
                        "scope": scope,
                        "minutesRemaining": minutes_remaining,
                        "urgency": urgency_str(urgency),
                    }),
                );
                self.warn(&agent_id, title, &message, urgency).await;
            }

            Intent::BlockProcess { agent_id, pid, name, reason } => {
                self.store
                    .journal
                    .record_violation(Violation {
                        kind: ViolationKind::BlockedProcess,
                        agent_id: agent_id.clone(),
                        hostname: self.hostname_of(&agent_id).await,
                        process_name: Some(name.clone()),
                        reason: reason.clone(),
                        timestamp_ms: epoch_ms(),
                    })
                    .await;
                self.store.journal.emit(
                    UiChannel::BlockedProcessDetected,
                    json!({ "agentId": agent_id, "pid": pid, "name": name, "reason": reason }),
                );
                if self.store.settings_snapshot().await.kill_on_violation {
                    self.kill(&agent_id, pid, &name, &reason).await;
                }
                self.warn(
                    &agent_id,
                    "Application Blocked",
                    &format!("{name} is not allowed right now."),
                    Urgency::Normal,
                )
                .await;
            }

            Intent::BlockBrowsers { agent_id } => {
                let browsers = self
                    .store
                    .agent_snapshot(&agent_id)
                    .await
                    .and_then(|a| a.last_snapshot)
                    .map(|s| s.browsers)
                    .unwrap_or_default();
                for browser in &browsers {
                    self.kill(&agent_id, browser.pid, &browser.name, "internet time not allowed")
                        .await;
                }
                self.warn(
                    &agent_id,
                    "Internet Blocked",
                    "Internet time is used up for today.",
                    Urgency::Normal,
                )
                .await;
                self.store
                    .journal
                    .record_activity(
                        "browsers_blocked",
                        Some(&agent_id),
                        format!("{} browser process(es)", browsers.len()),
                    )
                    .await;
            }

            Intent::Lock { agent_id } => {
                match self.gateway.trigger_action(&agent_id, ACTION_LOCK, json!({})).await {
                    Ok(response) if response.success => {
                        self.store
                            .journal
                            .record_activity("session_locked", Some(&agent_id), "")
                            .await;
                    }
                    Ok(response) => {
                        let detail = response.error.unwrap_or_default();
                        let code = classify_failure(&detail);
                        self.record_action_failure(&agent_id, ACTION_LOCK, code, &detail).await;
                    }
                    Err(code) => {
                        self.record_action_failure(&agent_id, ACTION_LOCK, code, "").await;
                    }
                }
            }

            Intent::Logout { agent_id, reason, grace_seconds } => {
                info!(agent_id, reason, grace_seconds, "logout pending");
                self.warn(
                    &agent_id,
                    "Session Ending",
                    &format!("You will be logged out in {grace_seconds} seconds: {reason}."),
                    Urgency::Critical,
                )
                .await;
                if reason != "bedtime" && reason != "manual logout" {
                    self.store
                        .journal
                        .emit(UiChannel::QuotaExhausted, json!({ "agentId": agent_id, "reason": reason }));
                }
                self.store.timers.schedule_logout(
                    &agent_id,
                    tokio::time::Duration::from_secs(grace_seconds),
                    &reason,
                    LogoutStage::Grace,
                );
            }

            Intent::FocusApply { agent_id, profile } => {
                let mut registry = self.store.registry.write().await;
                if let Some(agent) = registry.get_mut(&agent_id) {
                    // Idempotent: reapplying the same profile is a no-op.
                    if agent.focus.as_ref() == Some(&profile) {
                        return;
                    }
                    agent.focus = Some(profile);
                }
                drop(registry);
                self.store.journal.record_activity("focus_applied", Some(&agent_id), "").await;
            }

            Intent::FocusClear { agent_id } => {
                let mut registry = self.store.registry.write().await;
                let was_active =
                    registry.get_mut(&agent_id).and_then(|a| a.focus.take()).is_some();
                drop(registry);
                if was_active {
                    self.store.journal.record_activity("focus_cleared", Some(&agent_id), "").await;
                }
            }
        }
    }

    /// The grace period elapsed: run the actual logout action.
    pub async fn execute_logout(&self, agent_id: &str, reason: &str) {
        let kind = if reason == "bedtime" {
            ViolationKind::Bedtime
        } else {
            ViolationKind::QuotaExhausted
        };

        match self.gateway.trigger_action(agent_id, ACTION_LOGOUT, json!({ "reason": reason })).await
        {
            Ok(response) if response.success => {
                info!(agent_id, reason, "logout executed");
                self.store
                    .journal
                    .record_violation(Violation {
                        kind,
                        agent_id: agent_id.to_owned(),
                        hostname: self.hostname_of(agent_id).await,
                        process_name: None,
                        reason: reason.to_owned(),
                        timestamp_ms: epoch_ms(),
                    })
                    .await;
            }
            Ok(response) => {
                let detail = response.error.unwrap_or_default();
                let code = classify_failure(&detail);
                self.record_action_failure(agent_id, ACTION_LOGOUT, code, &detail).await;
            }
            Err(code) => {
                self.record_action_failure(agent_id, ACTION_LOGOUT, code, "").await;
            }
        }

        // Either way the cycle is over; the planner re-evaluates on the next
        // telemetry if the session survived.
        self.store
            .send_command(Command::LogoutAcked { agent_id: agent_id.to_owned() })
            .await;
    }
}

#[cfg(test)]
#[path = "dispatch_tests.rs"]
mod tests;
