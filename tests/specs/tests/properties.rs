// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Invariant checks over the running supervisor.

use tokio::time::Duration;

use warden::event::Command;
use warden::model::{Activity, Platform, ViolationKind};
use warden::oracle::Verdict;
use warden::persist;
use warden::settings::ChildConfig;

use warden_specs::{ts, Scenario};

async fn bound_agent(scenario: &Scenario, child: ChildConfig) {
    scenario.discover("a1", "kids-pc", Platform::Linux).await;
    scenario.store.children.write().await.insert("c1".into(), child);
    scenario.link("a1", "c1").await;
}

/// At most one scheduled-but-unfired logout timer per agent, no matter how
/// many sources demand one in the same window.
#[tokio::test(start_paused = true)]
async fn at_most_one_logout() {
    let scenario = Scenario::start();
    bound_agent(&scenario, ChildConfig::default()).await;
    scenario.oracle.set_remaining("c1", Activity::Computer, 0);

    let now = ts(2026, 3, 2, 10, 0, 0);
    scenario.session_tick("a1", "emma", now).await;
    assert_eq!(scenario.store.timers.armed_logout_count(), 1);

    // Pile on: manual logouts and more exhausted telemetry.
    scenario
        .store
        .send_command(Command::ForceLogout { agent_id: "a1".into() })
        .await;
    scenario.settle().await;
    scenario.session_tick("a1", "emma", now + 30_000).await;
    scenario
        .store
        .send_command(Command::ForceLogout { agent_id: "a1".into() })
        .await;
    scenario.settle().await;

    assert_eq!(scenario.store.timers.armed_logout_count(), 1);
}

/// A (agent, activity, threshold) warning fires at most once per local day.
#[tokio::test(start_paused = true)]
async fn warning_idempotence() {
    let scenario = Scenario::start();
    bound_agent(&scenario, ChildConfig::default()).await;
    scenario.oracle.set_remaining("c1", Activity::Computer, 890);
    scenario.clear_actions();

    let now = ts(2026, 3, 2, 10, 0, 0);
    for n in 0..4u64 {
        scenario.session_tick("a1", "emma", now + n * 30_000).await;
        scenario.advance(Duration::from_secs(30)).await;
    }

    // Remaining stays inside the 15-minute window; one warning total.
    assert_eq!(scenario.actions_of("warn").len(), 1);
}

/// First telemetry of a new local day resets the accumulators and the fired
/// warning set.
#[tokio::test(start_paused = true)]
async fn daily_reset() {
    let scenario = Scenario::start();
    bound_agent(&scenario, ChildConfig::default()).await;
    scenario.oracle.set_remaining("c1", Activity::Computer, 890);

    let evening = ts(2026, 3, 2, 23, 59, 0);
    scenario.session_tick("a1", "emma", evening).await;
    scenario.session_tick("a1", "emma", evening + 30_000).await;
    {
        let usage = scenario.store.usage.read().await;
        let cell = usage.cell("a1", "c1", Activity::Computer);
        assert!(cell.is_some_and(|c| c.accumulated_seconds == 30));
        assert!(cell.is_some_and(|c| !c.warnings_fired.is_empty()));
    }

    // 00:00:30 the next day, with ample quota so the new day's ladder does
    // not immediately re-mark a threshold.
    scenario.oracle.set_remaining("c1", Activity::Computer, 7200);
    scenario.session_tick("a1", "emma", evening + 90_000).await;
    let usage = scenario.store.usage.read().await;
    let cell = usage.cell("a1", "c1", Activity::Computer);
    assert!(cell.is_some_and(|c| c.accumulated_seconds == 0));
    assert!(cell.is_some_and(|c| c.warnings_fired.is_empty()));
}

/// A banned verdict makes the logout the first intent out, ahead of any
/// process enforcement observed in the same tick.
#[tokio::test(start_paused = true)]
async fn oracle_authority() {
    let scenario = Scenario::start();
    bound_agent(
        &scenario,
        ChildConfig { blocked_processes: vec!["minecraft".into()], ..Default::default() },
    )
    .await;
    scenario.oracle.set_verdict(
        "c1",
        Activity::Computer,
        Verdict { allowed: false, banned: true, remaining_seconds: 0, as_of_ms: 0 },
    );

    // Seed the snapshot before any session exists so the first evaluation
    // sees the banned verdict and the blocked process together.
    let now = ts(2026, 3, 2, 10, 0, 0);
    scenario.process_tick("a1", now, &[(42, "Minecraft.exe")], &[]).await;
    scenario.clear_actions();
    scenario.session_tick("a1", "emma", now).await;

    let calls = scenario.actions();
    assert!(calls.len() >= 2);
    // The logout's critical warning leads; kills follow.
    assert_eq!(calls[0].action_id, "warn");
    assert_eq!(calls[0].args["title"], "Session Ending");
    assert!(calls.iter().any(|c| c.action_id == "kill"));
}

/// After unlinking, no enforcement reaches the agent until rebound.
#[tokio::test(start_paused = true)]
async fn cancellation_after_unlink() {
    let scenario = Scenario::start();
    bound_agent(&scenario, ChildConfig::default()).await;
    scenario.oracle.set_remaining("c1", Activity::Computer, 0);

    let now = ts(2026, 3, 2, 10, 0, 0);
    scenario.session_tick("a1", "emma", now).await;
    assert_eq!(scenario.store.timers.armed_logout_count(), 1);

    // Unlink, as the control API does it.
    {
        let mut registry = scenario.store.registry.write().await;
        if let Some(agent) = registry.get_mut("a1") {
            agent.child_id = None;
            agent.user_mappings.clear();
        }
    }
    scenario.store.timers.cancel_agent("a1");
    scenario.store.send_command(Command::ResetAgent { agent_id: "a1".into() }).await;
    scenario.settle().await;
    scenario.clear_actions();

    for n in 1..5u64 {
        scenario.session_tick("a1", "emma", now + n * 30_000).await;
        scenario.advance(Duration::from_secs(30)).await;
    }
    assert!(scenario.actions().is_empty());
    assert_eq!(scenario.store.timers.armed_logout_count(), 0);

    // Rebinding restores enforcement.
    scenario.link("a1", "c1").await;
    scenario.session_tick("a1", "emma", now + 300_000).await;
    assert!(!scenario.actions().is_empty());
}

/// Telemetry for an unbound agent only tracks presence: no intents, no
/// oracle traffic, and one journaled missing-binding entry per session.
#[tokio::test(start_paused = true)]
async fn unbound_telemetry_is_presence_only() {
    let scenario = Scenario::start();
    scenario.discover("a1", "kids-pc", Platform::Linux).await;
    scenario.clear_actions();

    let now = ts(2026, 3, 2, 10, 0, 0);
    for n in 0..3u64 {
        scenario.session_tick("a1", "emma", now + n * 30_000).await;
        scenario.advance(Duration::from_secs(30)).await;
    }

    assert!(scenario.actions().is_empty());
    assert!(scenario.oracle.checks().is_empty());
    let activity = scenario.store.journal.activity(50).await;
    let missing = activity.iter().filter(|a| a.kind == "missing_binding").count();
    assert_eq!(missing, 1);

    // A second user on the same unbound agent journals its own entry.
    scenario.session_tick("a1", "liam", now + 120_000).await;
    let activity = scenario.store.journal.activity(50).await;
    assert_eq!(activity.iter().filter(|a| a.kind == "missing_binding").count(), 2);
}

/// Persisting and reloading reconstructs identical durable state.
#[tokio::test(start_paused = true)]
async fn config_round_trip() {
    let scenario = Scenario::start();
    bound_agent(
        &scenario,
        ChildConfig { blocked_processes: vec!["minecraft".into()], ..Default::default() },
    )
    .await;
    {
        let mut registry = scenario.store.registry.write().await;
        if let Some(agent) = registry.get_mut("a1") {
            agent.parent_accounts.push("dad".into());
            agent.user_mappings.insert("emma".into(), "c1".into());
        }
    }

    let state = persist::snapshot(&scenario.store).await;
    let restored = Scenario::start();
    persist::hydrate(&restored.store, state.clone()).await;
    let state2 = persist::snapshot(&restored.store).await;

    assert_eq!(state.user_mappings, state2.user_mappings);
    assert_eq!(state.parent_accounts, state2.parent_accounts);
    assert_eq!(state.children, state2.children);
    assert_eq!(state.settings, state2.settings);
    assert_eq!(
        serde_json::to_value(&state.agents).ok(),
        serde_json::to_value(&state2.agents).ok()
    );
}

/// Accumulated seconds are monotone non-decreasing across in-order telemetry.
#[tokio::test(start_paused = true)]
async fn ordering_monotone_accumulation() {
    let scenario = Scenario::start();
    bound_agent(&scenario, ChildConfig::default()).await;

    let now = ts(2026, 3, 2, 10, 0, 0);
    let mut prev = 0u64;
    for n in 0..10u64 {
        // Alternate idle and active reports.
        let idle = if n % 2 == 0 { 0 } else { 600_000 };
        scenario.session_tick_idle("a1", "emma", now + n * 30_000, idle).await;
        let usage = scenario.store.usage.read().await;
        let seconds = usage
            .cell("a1", "c1", Activity::Computer)
            .map(|c| c.accumulated_seconds)
            .unwrap_or(0);
        assert!(seconds >= prev);
        prev = seconds;
    }
    assert!(prev > 0);
}

/// S3 epilogue: a killed process is journaled with both violation kinds.
#[tokio::test(start_paused = true)]
async fn kill_ack_is_journaled() {
    let scenario = Scenario::start();
    bound_agent(
        &scenario,
        ChildConfig { blocked_processes: vec!["doom".into()], ..Default::default() },
    )
    .await;

    let now = ts(2026, 3, 2, 10, 0, 0);
    scenario.session_tick("a1", "emma", now).await;
    scenario.process_tick("a1", now, &[(9, "doom.exe")], &[]).await;

    let kinds: Vec<ViolationKind> = scenario
        .store
        .journal
        .violations(10)
        .await
        .iter()
        .map(|v| v.kind)
        .collect();
    assert!(kinds.contains(&ViolationKind::BlockedProcess));
    assert!(kinds.contains(&ViolationKind::ProcessKilled));
}
