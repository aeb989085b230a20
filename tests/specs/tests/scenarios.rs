// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! End-to-end enforcement replays against a fixed clock.

use tokio::time::Duration;

use warden::model::{Activity, Platform, ViolationKind};
use warden::oracle::Verdict;
use warden::settings::ChildConfig;

use warden_specs::{ts, Scenario};

const STEP: Duration = Duration::from_secs(30);

async fn bound_agent(scenario: &Scenario, child: ChildConfig) {
    scenario.discover("a1", "kids-pc", Platform::Linux).await;
    scenario.store.children.write().await.insert("c1".into(), child);
    scenario.link("a1", "c1").await;
}

/// S1 — the quota warning ladder ends in exactly one pending logout.
#[tokio::test(start_paused = true)]
async fn s1_quota_warning_ladder() {
    let scenario = Scenario::start();
    bound_agent(&scenario, ChildConfig::default()).await;

    let mut now = ts(2026, 3, 2, 10, 0, 0);
    for (tick, remaining) in [900i64, 300, 60, 0].into_iter().enumerate() {
        if tick > 0 {
            scenario.advance(STEP).await;
            now += 30_000;
        }
        scenario.oracle.set_remaining("c1", Activity::Computer, remaining);
        scenario.session_tick("a1", "emma", now).await;
    }

    let warns = scenario.actions_of("warn");
    let titles: Vec<&str> =
        warns.iter().filter_map(|c| c.args["title"].as_str()).collect();
    assert_eq!(
        titles,
        vec![
            "Computer Time Warning",
            "Computer Time Warning",
            "Computer Time Warning",
            "Session Ending"
        ]
    );
    let messages: Vec<&str> =
        warns.iter().filter_map(|c| c.args["message"].as_str()).collect();
    assert!(messages[0].contains("15 minutes"));
    assert!(messages[1].contains("5 minutes"));
    assert!(messages[2].contains("1 minutes"));
    assert_eq!(warns[3].args["urgency"], "critical");

    // Exactly one logout timer pending after tick 4.
    assert_eq!(scenario.store.timers.armed_logout_count(), 1);
    assert!(scenario.actions_of("logout").is_empty());

    // The deadline holds the earlier of the grace window and the estimate
    // armed at tick 3 (60 s of quota left at +60 s): the logout lands at
    // +120 s from the first tick, 30 s after exhaustion was observed.
    scenario.advance(Duration::from_secs(40)).await;
    assert_eq!(scenario.actions_of("logout").len(), 1);
    assert_eq!(scenario.store.timers.armed_logout_count(), 0);
}

/// S2 — a parent session produces nothing and never consults the oracle.
#[tokio::test(start_paused = true)]
async fn s2_parent_login_noop() {
    let scenario = Scenario::start();
    bound_agent(&scenario, ChildConfig::default()).await;
    {
        let mut registry = scenario.store.registry.write().await;
        if let Some(agent) = registry.get_mut("a1") {
            agent.parent_accounts.push("dad".into());
        }
    }
    scenario.oracle.set_remaining("c1", Activity::Computer, 0);
    scenario.oracle.set_verdict(
        "c1",
        Activity::Internet,
        Verdict { allowed: false, banned: false, remaining_seconds: 0, as_of_ms: 0 },
    );
    scenario.clear_actions();

    // Ten minutes of telemetry with browsers open.
    let mut now = ts(2026, 3, 2, 10, 0, 0);
    for _ in 0..20 {
        scenario.session_tick("a1", "dad", now).await;
        scenario.process_tick("a1", now, &[(7, "chrome")], &[7]).await;
        scenario.advance(STEP).await;
        now += 30_000;
    }

    assert!(scenario.actions().is_empty());
    assert!(scenario.oracle.checks().is_empty());
}

/// S3 — blocked process: kill then warn, one violation, duplicate suppressed.
#[tokio::test(start_paused = true)]
async fn s3_blocked_process() {
    let scenario = Scenario::start();
    bound_agent(
        &scenario,
        ChildConfig { blocked_processes: vec!["minecraft".into()], ..Default::default() },
    )
    .await;
    scenario.clear_actions();

    let now = ts(2026, 3, 2, 10, 0, 0);
    scenario.session_tick("a1", "emma", now).await;
    scenario.process_tick("a1", now, &[(42, "Minecraft.exe")], &[]).await;

    let calls = scenario.actions();
    let kill_idx = calls.iter().position(|c| c.action_id == "kill");
    assert!(kill_idx.is_some_and(|i| calls[i].args["pid"] == 42));
    let warn_idx = calls
        .iter()
        .position(|c| c.action_id == "warn" && c.args["title"] == "Application Blocked");
    assert!(kill_idx < warn_idx, "kill must precede the blocked-app warning");

    let violations = scenario.store.journal.violations(50).await;
    let blocked = violations
        .iter()
        .filter(|v| v.kind == ViolationKind::BlockedProcess)
        .count();
    assert_eq!(blocked, 1);

    // Re-observation 10 s later is suppressed.
    scenario.clear_actions();
    scenario.process_tick("a1", now + 10_000, &[(42, "Minecraft.exe")], &[]).await;
    assert!(scenario.actions_of("kill").is_empty());
}

/// S4 — bedtime ladder and logout, Friday 21:00 with 30 s telemetry.
#[tokio::test(start_paused = true)]
async fn s4_bedtime() {
    let scenario = Scenario::start();
    let child: ChildConfig = serde_json::from_str(
        r#"{"bedtime": {"enabled": true, "time": "21:00", "days": ["fri"]}}"#,
    )
    .unwrap_or_default();
    bound_agent(&scenario, child).await;
    scenario.clear_actions();

    // 2026-03-06 is a Friday. Tick every 30 s from 20:45:00 through 21:00:30.
    let start = ts(2026, 3, 6, 20, 45, 0);
    for step in 0..=31u64 {
        scenario.session_tick("a1", "emma", start + step * 30_000).await;
        scenario.advance(STEP).await;
    }

    let warns = scenario.actions_of("warn");
    let bedtime_warns: Vec<(&str, &str)> = warns
        .iter()
        .filter(|c| c.args["title"] == "Bedtime Soon")
        .filter_map(|c| {
            Some((c.args["message"].as_str()?, c.args["urgency"].as_str()?))
        })
        .collect();
    assert_eq!(bedtime_warns.len(), 3);
    assert!(bedtime_warns[0].0.contains("15 minutes") && bedtime_warns[0].1 == "normal");
    assert!(bedtime_warns[1].0.contains("5 minutes") && bedtime_warns[1].1 == "critical");
    assert!(bedtime_warns[2].0.contains("1 minutes") && bedtime_warns[2].1 == "critical");

    // The 21:00 tick raised the critical "Session Ending" warning, and the
    // logout action itself ran one grace period later, at 21:01.
    assert!(warns.iter().any(|c| c.args["title"] == "Session Ending"));
    let logouts = scenario.actions_of("logout");
    assert_eq!(logouts.len(), 1);
    assert_eq!(logouts[0].args["reason"], "bedtime");

    let violations = scenario.store.journal.violations(10).await;
    assert!(violations.iter().any(|v| v.kind == ViolationKind::Bedtime));
}

/// S5 — an oracle grant after exhaustion cancels the pending logout.
#[tokio::test(start_paused = true)]
async fn s5_override_cancels_logout() {
    let scenario = Scenario::start();
    bound_agent(&scenario, ChildConfig::default()).await;

    let mut now = ts(2026, 3, 2, 10, 0, 0);
    for (tick, remaining) in [900i64, 300, 60, 0].into_iter().enumerate() {
        if tick > 0 {
            scenario.advance(STEP).await;
            now += 30_000;
        }
        scenario.oracle.set_remaining("c1", Activity::Computer, remaining);
        scenario.session_tick("a1", "emma", now).await;
    }
    assert_eq!(scenario.store.timers.armed_logout_count(), 1);
    scenario.clear_actions();

    // Parent buys more time; the oracle pushes a state change.
    scenario.oracle.set_remaining("c1", Activity::Computer, 1800);
    scenario.oracle_change("c1").await;

    // The grace deadline passes without a logout, and no ladder warnings
    // re-fire at thresholds already crossed today.
    scenario.advance(Duration::from_secs(70)).await;
    assert!(scenario.actions_of("logout").is_empty());
    assert!(scenario.actions_of("warn").is_empty());
}

/// S6 — telemetry silence flags the agent offline and cancels its timers;
/// the next telemetry re-evaluates from a fresh verdict.
#[tokio::test(start_paused = true)]
async fn s6_agent_offline_online() {
    let scenario = Scenario::start();
    bound_agent(&scenario, ChildConfig::default()).await;
    scenario.oracle.set_remaining("c1", Activity::Computer, 900);

    let now = ts(2026, 3, 2, 10, 0, 0);
    scenario.session_tick("a1", "emma", now).await;
    assert!(scenario.store.timers.logout_armed("a1"));

    // Silence for three report intervals.
    scenario.advance(Duration::from_secs(90)).await;
    let agent = scenario.store.agent_snapshot("a1").await;
    assert!(agent.is_some_and(|a| !a.online));
    assert_eq!(scenario.store.timers.armed_logout_count(), 0);

    // Telemetry resumes: agent is back online and the planner re-checked the
    // oracle live.
    let checks_before = scenario.oracle.checks().len();
    scenario.session_tick("a1", "emma", now + 120_000).await;
    let agent = scenario.store.agent_snapshot("a1").await;
    assert!(agent.is_some_and(|a| a.online));
    assert!(scenario.oracle.checks().len() > checks_before);
    assert!(scenario.store.timers.logout_armed("a1"));
}
