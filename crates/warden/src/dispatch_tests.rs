// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::Arc;

use tokio::sync::mpsc;

use super::*;
use crate::event::Event;
use crate::gateway::ACTION_WARN;
use crate::model::{
    AgentDescriptor, AgentRecord, BrowserProcess, CategoryCounts, Platform, ProcessSnapshot,
    ViolationKind,
};
use crate::settings::FocusProfile;
use crate::test_support::{RecordingGateway, StoreBuilder};
use crate::timers::TimerFire;

struct Fixture {
    store: Arc<Store>,
    gateway: Arc<RecordingGateway>,
    dispatcher: Dispatcher,
    events_rx: mpsc::Receiver<Event>,
    _fire_rx: mpsc::Receiver<TimerFire>,
}

async fn fixture() -> Fixture {
    let (store, events_rx, fire_rx) = StoreBuilder::new().build();
    {
        let mut registry = store.registry.write().await;
        registry.insert(
            "a1".into(),
            AgentRecord::new(
                AgentDescriptor {
                    id: "a1".into(),
                    hostname: "kids-pc".into(),
                    platform: Platform::Linux,
                },
                1000,
            ),
        );
    }
    let gateway = RecordingGateway::new();
    let dispatcher = Dispatcher::new(gateway.clone(), Arc::clone(&store));
    Fixture { store, gateway, dispatcher, events_rx, _fire_rx: fire_rx }
}

fn warning(scope: WarnScope, minutes: u32, urgency: Urgency) -> Intent {
    Intent::Warning {
        agent_id: "a1".into(),
        scope,
        minutes_remaining: minutes,
        urgency,
    }
}

#[tokio::test(start_paused = true)]
async fn warning_maps_to_warn_action() {
    let f = fixture().await;
    let mut ui_rx = f.store.journal.subscribe();

    f.dispatcher.dispatch(vec![warning(WarnScope::Computer, 15, Urgency::Normal)]).await;

    let calls = f.gateway.calls_for(ACTION_WARN);
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].args["title"], "Computer Time Warning");
    assert_eq!(calls[0].args["urgency"], "normal");
    assert!(calls[0].args["message"].as_str().is_some_and(|m| m.contains("15 minutes")));

    let event = ui_rx.recv().await;
    assert!(event.is_ok_and(|e| e.channel == UiChannel::QuotaWarning));
}

#[tokio::test(start_paused = true)]
async fn bedtime_warning_uses_bedtime_channel() {
    let f = fixture().await;
    let mut ui_rx = f.store.journal.subscribe();

    f.dispatcher.dispatch(vec![warning(WarnScope::Bedtime, 5, Urgency::Critical)]).await;

    let calls = f.gateway.calls_for(ACTION_WARN);
    assert_eq!(calls[0].args["urgency"], "critical");
    let event = ui_rx.recv().await;
    assert!(event.is_ok_and(|e| e.channel == UiChannel::BedtimeWarning));
}

#[tokio::test(start_paused = true)]
async fn block_process_kills_and_journals() {
    let f = fixture().await;
    f.dispatcher
        .dispatch(vec![Intent::BlockProcess {
            agent_id: "a1".into(),
            pid: 42,
            name: "Minecraft.exe".into(),
            reason: "matches blocked pattern \"minecraft\"".into(),
        }])
        .await;

    let kills = f.gateway.calls_for(ACTION_KILL);
    assert_eq!(kills.len(), 1);
    assert_eq!(kills[0].args["pid"], 42);

    // kill then warn, in that order.
    let calls = f.gateway.calls();
    assert_eq!(calls[0].action_id, ACTION_KILL);
    assert_eq!(calls[1].action_id, ACTION_WARN);
    assert_eq!(calls[1].args["title"], "Application Blocked");

    let violations = f.store.journal.violations(10).await;
    let kinds: Vec<ViolationKind> = violations.iter().map(|v| v.kind).collect();
    assert!(kinds.contains(&ViolationKind::BlockedProcess));
    assert!(kinds.contains(&ViolationKind::ProcessKilled));
}

#[tokio::test(start_paused = true)]
async fn kill_respects_settings_toggle() {
    let f = fixture().await;
    f.store.settings.write().await.kill_on_violation = false;

    f.dispatcher
        .dispatch(vec![Intent::BlockProcess {
            agent_id: "a1".into(),
            pid: 42,
            name: "x".into(),
            reason: "blocked".into(),
        }])
        .await;

    assert!(f.gateway.calls_for(ACTION_KILL).is_empty());
    // The violation and the user-facing warning still happen.
    assert_eq!(f.gateway.calls_for(ACTION_WARN).len(), 1);
    assert_eq!(f.store.journal.violations(10).await.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn failed_kill_journals_action_failure() {
    let f = fixture().await;
    f.gateway.fail_action(ACTION_KILL);

    f.dispatcher
        .dispatch(vec![Intent::BlockProcess {
            agent_id: "a1".into(),
            pid: 42,
            name: "x".into(),
            reason: "blocked".into(),
        }])
        .await;

    let violations = f.store.journal.violations(10).await;
    assert!(violations.iter().all(|v| v.kind != ViolationKind::ProcessKilled));
    let activity = f.store.journal.activity(10).await;
    assert!(activity.iter().any(|a| a.kind == "action_failed"));
}

#[test]
fn failure_classification() {
    assert_eq!(classify_failure("Stop-Process: Access denied"), ErrorCode::PermissionDenied);
    assert_eq!(classify_failure("kill: operation not permitted"), ErrorCode::PermissionDenied);
    assert_eq!(classify_failure("EPERM while signalling pid 42"), ErrorCode::PermissionDenied);
    assert_eq!(classify_failure("no such process"), ErrorCode::Internal);
    assert_eq!(classify_failure(""), ErrorCode::Internal);
}

#[tokio::test(start_paused = true)]
async fn denied_kill_is_recorded_as_permission_denied() {
    let f = fixture().await;
    f.gateway.fail_action_with(ACTION_KILL, "kill: permission denied");

    f.dispatcher
        .dispatch(vec![Intent::BlockProcess {
            agent_id: "a1".into(),
            pid: 42,
            name: "x".into(),
            reason: "blocked".into(),
        }])
        .await;

    let activity = f.store.journal.activity(10).await;
    let denied: Vec<_> = activity.iter().filter(|a| a.kind == "action_denied").collect();
    assert_eq!(denied.len(), 1);
    assert!(denied[0].detail.contains("PERMISSION_DENIED"));
    assert!(activity.iter().all(|a| a.kind != "action_failed"));
}

#[tokio::test(start_paused = true)]
async fn agent_reported_warn_failure_is_journaled() {
    let f = fixture().await;
    f.gateway.fail_action_with(ACTION_WARN, "notify-send missing");

    f.dispatcher.dispatch(vec![warning(WarnScope::Computer, 15, Urgency::Normal)]).await;

    let activity = f.store.journal.activity(10).await;
    assert!(activity
        .iter()
        .any(|a| a.kind == "action_failed" && a.detail.contains("notify-send missing")));
}

#[tokio::test(start_paused = true)]
async fn block_browsers_kills_each_browser_pid() {
    let f = fixture().await;
    {
        let mut registry = f.store.registry.write().await;
        if let Some(agent) = registry.get_mut("a1") {
            agent.last_snapshot = Some(ProcessSnapshot {
                timestamp_ms: 1000,
                processes: vec![],
                browsers: vec![
                    BrowserProcess { pid: 10, name: "chrome".into(), browser_name: None },
                    BrowserProcess { pid: 11, name: "firefox".into(), browser_name: None },
                ],
                summary: CategoryCounts::default(),
            });
        }
    }

    f.dispatcher.dispatch(vec![Intent::BlockBrowsers { agent_id: "a1".into() }]).await;

    let kills = f.gateway.calls_for(ACTION_KILL);
    let pids: Vec<u64> = kills.iter().filter_map(|c| c.args["pid"].as_u64()).collect();
    assert_eq!(pids, vec![10, 11]);
    assert_eq!(f.gateway.calls_for(ACTION_WARN).len(), 1);
}

#[tokio::test(start_paused = true)]
async fn logout_warns_and_arms_grace_timer() {
    let f = fixture().await;
    let mut ui_rx = f.store.journal.subscribe();

    f.dispatcher
        .dispatch(vec![Intent::Logout {
            agent_id: "a1".into(),
            reason: "computer time exhausted".into(),
            grace_seconds: 60,
        }])
        .await;

    let warns = f.gateway.calls_for(ACTION_WARN);
    assert_eq!(warns.len(), 1);
    assert_eq!(warns[0].args["urgency"], "critical");
    assert!(f.store.timers.logout_armed("a1"));
    // The logout action itself has not run yet.
    assert!(f.gateway.calls_for(ACTION_LOGOUT).is_empty());

    let event = ui_rx.recv().await;
    assert!(event.is_ok_and(|e| e.channel == UiChannel::QuotaExhausted));
}

#[tokio::test(start_paused = true)]
async fn execute_logout_journals_and_acks() {
    let mut f = fixture().await;
    f.dispatcher.execute_logout("a1", "bedtime").await;

    assert_eq!(f.gateway.calls_for(ACTION_LOGOUT).len(), 1);
    let violations = f.store.journal.violations(10).await;
    assert!(matches!(violations[..], [Violation { kind: ViolationKind::Bedtime, .. }]));

    let event = f.events_rx.recv().await;
    assert!(matches!(
        event,
        Some(Event::Command(Command::LogoutAcked { ref agent_id })) if agent_id == "a1"
    ));
}

#[tokio::test(start_paused = true)]
async fn focus_apply_is_idempotent() {
    let f = fixture().await;
    let profile = FocusProfile {
        hide_icons: vec![],
        blocked_categories: vec![],
        blocked_apps: vec!["discord".into()],
    };

    f.dispatcher
        .dispatch(vec![Intent::FocusApply { agent_id: "a1".into(), profile: profile.clone() }])
        .await;
    f.dispatcher
        .dispatch(vec![Intent::FocusApply { agent_id: "a1".into(), profile: profile.clone() }])
        .await;

    let activity = f.store.journal.activity(10).await;
    assert_eq!(activity.iter().filter(|a| a.kind == "focus_applied").count(), 1);
    assert!(f.store.agent_snapshot("a1").await.is_some_and(|a| a.focus == Some(profile)));

    f.dispatcher.dispatch(vec![Intent::FocusClear { agent_id: "a1".into() }]).await;
    assert!(f.store.agent_snapshot("a1").await.is_some_and(|a| a.focus.is_none()));
}
