// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Deterministic replay harness for end-to-end enforcement scenarios.
//!
//! Runs the real supervisor loop in-process against a recording gateway and
//! a scripted oracle, under tokio's paused clock. Tests feed telemetry
//! frames exactly as the WS hub would and assert on the actions the agent
//! would have received.

use std::sync::Arc;

use chrono::{Local, TimeZone};
use tokio::task::JoinHandle;
use tokio::time::Duration;

use warden::event::{Command, Event};
use warden::gateway::GatewayEvent;
use warden::model::{AgentDescriptor, Platform};
use warden::oracle::VerdictCache;
use warden::planner::Planner;
use warden::state::Store;
use warden::supervisor::Supervisor;
use warden::test_support::{ActionCall, RecordingGateway, ScriptedOracle, StoreBuilder};

/// Epoch millis for a local wall-clock instant.
pub fn ts(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> u64 {
    Local
        .with_ymd_and_hms(y, mo, d, h, mi, s)
        .single()
        .map(|dt| dt.timestamp_millis() as u64)
        .unwrap_or(0)
}

/// A running supervisor wired to mocks.
pub struct Scenario {
    pub store: Arc<Store>,
    pub gateway: Arc<RecordingGateway>,
    pub oracle: Arc<ScriptedOracle>,
    _supervisor: JoinHandle<()>,
}

impl Scenario {
    /// Build and start the supervisor loop.
    pub fn start() -> Self {
        let (store, events_rx, fire_rx) = StoreBuilder::new().build();
        let gateway = RecordingGateway::new();
        let oracle = ScriptedOracle::new();
        let cache = Arc::new(VerdictCache::default());
        let planner = Planner::new(oracle.clone(), cache);
        let supervisor =
            Supervisor::new(Arc::clone(&store), gateway.clone(), planner, events_rx, fire_rx);
        let handle = tokio::spawn(supervisor.run());
        Self { store, gateway, oracle, _supervisor: handle }
    }

    /// Let the supervisor drain everything currently queued.
    pub async fn settle(&self) {
        for _ in 0..64 {
            tokio::task::yield_now().await;
        }
    }

    async fn send(&self, event: Event) {
        let _ = self.store.events_tx.send(event).await;
        self.settle().await;
    }

    /// Announce an agent (as the WS hub would on `hello`).
    pub async fn discover(&self, agent_id: &str, hostname: &str, platform: Platform) {
        self.send(Event::Gateway(GatewayEvent::Discovered(AgentDescriptor {
            id: agent_id.to_owned(),
            hostname: hostname.to_owned(),
            platform,
        })))
        .await;
        self.send(Event::Gateway(GatewayEvent::Online { agent_id: agent_id.to_owned() })).await;
    }

    /// Bind an agent to a child (as the control API would).
    pub async fn link(&self, agent_id: &str, child_id: &str) {
        {
            let mut registry = self.store.registry.write().await;
            if let Some(agent) = registry.get_mut(agent_id) {
                agent.child_id = Some(child_id.to_owned());
            }
        }
        self.send(Event::Command(Command::Reevaluate { agent_id: agent_id.to_owned() })).await;
    }

    /// Feed one `session` telemetry frame.
    pub async fn session_tick(&self, agent_id: &str, username: &str, timestamp_ms: u64) {
        self.session_tick_idle(agent_id, username, timestamp_ms, 0).await;
    }

    pub async fn session_tick_idle(
        &self,
        agent_id: &str,
        username: &str,
        timestamp_ms: u64,
        idle_ms: u64,
    ) {
        let payload = serde_json::json!({
            "timestamp": timestamp_ms,
            "hostname": "kids-pc",
            "platform": "linux",
            "username": username,
            "sessionId": "console",
            "idleTime": idle_ms,
            "isIdle": false,
            "uptime": 3600,
            "systemUser": false,
        });
        self.send(Event::Gateway(GatewayEvent::Telemetry {
            agent_id: agent_id.to_owned(),
            monitor_id: "session".to_owned(),
            payload,
        }))
        .await;
    }

    /// Feed one `process` telemetry frame. `browsers` lists pids that are
    /// also present in `processes`.
    pub async fn process_tick(
        &self,
        agent_id: &str,
        timestamp_ms: u64,
        processes: &[(u32, &str)],
        browsers: &[u32],
    ) {
        let process_list: Vec<serde_json::Value> = processes
            .iter()
            .map(|(pid, name)| {
                serde_json::json!({
                    "pid": pid, "name": name, "type": "process", "category": "other"
                })
            })
            .collect();
        let browser_list: Vec<serde_json::Value> = processes
            .iter()
            .filter(|(pid, _)| browsers.contains(pid))
            .map(|(pid, name)| {
                serde_json::json!({ "pid": pid, "name": name, "browserName": name })
            })
            .collect();
        let payload = serde_json::json!({
            "timestamp": timestamp_ms,
            "hostname": "kids-pc",
            "platform": "linux",
            "processCount": processes.len(),
            "processes": process_list,
            "browsers": browser_list,
            "browserActive": !browsers.is_empty(),
            "summary": { "games": 0, "education": 0, "productivity": 0, "internet": 0, "other": processes.len() },
        });
        self.send(Event::Gateway(GatewayEvent::Telemetry {
            agent_id: agent_id.to_owned(),
            monitor_id: "process".to_owned(),
            payload,
        }))
        .await;
    }

    /// Push an oracle state-change notification.
    pub async fn oracle_change(&self, child_id: &str) {
        self.send(Event::OracleChanged { child_id: child_id.to_owned() }).await;
    }

    /// Advance the paused clock, letting timers fire and settle.
    pub async fn advance(&self, duration: Duration) {
        tokio::time::advance(duration).await;
        self.settle().await;
    }

    /// All recorded action calls.
    pub fn actions(&self) -> Vec<ActionCall> {
        self.gateway.calls()
    }

    /// Action calls of one kind.
    pub fn actions_of(&self, action_id: &str) -> Vec<ActionCall> {
        self.gateway.calls_for(action_id)
    }

    pub fn clear_actions(&self) {
        self.gateway.clear_calls();
    }
}
