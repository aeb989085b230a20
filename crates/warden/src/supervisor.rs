// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Supervisor loop: the single writer that fuses gateway telemetry, oracle
//! state changes, timer fires, and control commands into per-agent
//! enforcement, in arrival order per agent.

use std::sync::Arc;

use serde_json::json;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::clock::epoch_ms;
use crate::dispatch::Dispatcher;
use crate::error::ErrorCode;
use crate::event::{Command, Event};
use crate::gateway::{scripts, Gateway, GatewayEvent, MONITOR_PROCESS, MONITOR_SESSION};
use crate::journal::UiChannel;
use crate::model::{Activity, AgentRecord, Intent, ProcessPayload, ProcessSnapshot, SessionPayload};
use crate::persist;
use crate::planner::{EnforceState, Planner};
use crate::queue::Inbox;
use crate::session::apply_session;
use crate::state::Store;
use crate::timers::{LogoutStage, TimerFire};

/// How often the offline sweeper scans the registry.
const SWEEP_INTERVAL: tokio::time::Duration = tokio::time::Duration::from_secs(15);

pub struct Supervisor {
    store: Arc<Store>,
    gateway: Arc<dyn Gateway>,
    planner: Planner,
    dispatcher: Dispatcher,
    events_rx: mpsc::Receiver<Event>,
    timer_rx: mpsc::Receiver<TimerFire>,
}

impl Supervisor {
    pub fn new(
        store: Arc<Store>,
        gateway: Arc<dyn Gateway>,
        planner: Planner,
        events_rx: mpsc::Receiver<Event>,
        timer_rx: mpsc::Receiver<TimerFire>,
    ) -> Self {
        let dispatcher = Dispatcher::new(Arc::clone(&gateway), Arc::clone(&store));
        Self { store, gateway, planner, dispatcher, events_rx, timer_rx }
    }

    /// Run until shutdown. Events are drained through a per-agent coalescing
    /// inbox so a telemetry burst collapses to the newest report.
    pub async fn run(mut self) {
        let mut inbox = Inbox::new();
        let mut sweep = tokio::time::interval(SWEEP_INTERVAL);
        sweep.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = self.store.shutdown.cancelled() => {
                    info!("supervisor shutting down, cancelling all timers");
                    self.store.timers.cancel_all();
                    self.remove_deployments().await;
                    persist::save(&self.store).await;
                    break;
                }

                event = self.events_rx.recv() => {
                    let Some(event) = event else { break };
                    inbox.push(event);
                    // Drain whatever else is queued before processing so the
                    // coalescing window covers the whole burst.
                    while let Ok(event) = self.events_rx.try_recv() {
                        inbox.push(event);
                    }
                    while let Some(event) = inbox.pop() {
                        self.handle_event(event).await;
                    }
                }

                fire = self.timer_rx.recv() => {
                    let Some(fire) = fire else { break };
                    self.handle_timer(fire).await;
                }

                _ = sweep.tick() => {
                    self.sweep_offline().await;
                }
            }
        }
    }

    async fn evaluate_and_dispatch(&mut self, agent_id: &str, now_ms: u64) {
        let intents = self.planner.evaluate(&self.store, agent_id, now_ms).await;
        if !intents.is_empty() {
            debug!(agent_id, count = intents.len(), "dispatching intents");
            self.dispatcher.dispatch(intents).await;
        }
    }

    /// Re-evaluate using the agent's own telemetry timescale.
    async fn reevaluate(&mut self, agent_id: &str) {
        let Some(agent) = self.store.agent_snapshot(agent_id).await else { return };
        if agent.last_seen_ms == 0 {
            return;
        }
        let now_ms = agent.last_seen_ms;
        self.evaluate_and_dispatch(agent_id, now_ms).await;
    }

    async fn handle_event(&mut self, event: Event) {
        match event {
            Event::Gateway(gw) => self.handle_gateway_event(gw).await,
            Event::OracleChanged { child_id } => self.handle_oracle_change(&child_id).await,
            Event::Command(command) => self.handle_command(command).await,
        }
    }

    async fn handle_gateway_event(&mut self, event: GatewayEvent) {
        match event {
            GatewayEvent::Discovered(desc) => {
                let agent_id = desc.id.clone();
                let is_new = {
                    let mut registry = self.store.registry.write().await;
                    match registry.get_mut(&desc.id) {
                        Some(agent) => {
                            // Bindings persist across reconnects.
                            agent.hostname = desc.hostname.clone();
                            agent.platform = desc.platform;
                            agent.online = true;
                            agent.last_contact = Some(tokio::time::Instant::now());
                            false
                        }
                        None => {
                            registry.insert(desc.id.clone(), AgentRecord::new(desc.clone(), epoch_ms()));
                            true
                        }
                    }
                };
                if is_new {
                    self.store
                        .journal
                        .record_activity(
                            "agent_discovered",
                            Some(&agent_id),
                            format!("{} ({})", desc.hostname, desc.platform.as_str()),
                        )
                        .await;
                }
                self.deploy(&agent_id).await;
                persist::save(&self.store).await;
            }

            GatewayEvent::Online { agent_id } => {
                {
                    let mut registry = self.store.registry.write().await;
                    if let Some(agent) = registry.get_mut(&agent_id) {
                        agent.online = true;
                    }
                }
                self.store.journal.record_activity("agent_online", Some(&agent_id), "").await;
                // Fresh verdict on return.
                self.reevaluate(&agent_id).await;
            }

            GatewayEvent::Offline { agent_id } => {
                self.mark_offline(&agent_id).await;
            }

            GatewayEvent::Telemetry { agent_id, monitor_id, payload } => {
                match monitor_id.as_str() {
                    MONITOR_SESSION => self.handle_session_telemetry(&agent_id, payload).await,
                    MONITOR_PROCESS => self.handle_process_telemetry(&agent_id, payload).await,
                    other => debug!(agent_id, monitor_id = other, "unknown monitor telemetry"),
                }
            }

            GatewayEvent::ActionResponse { agent_id, response } => {
                // Solicited responses resolve inside the gateway; anything
                // surfacing here is unsolicited bookkeeping.
                debug!(
                    agent_id,
                    action_id = %response.action_id,
                    success = response.success,
                    "action response"
                );
            }
        }
    }

    async fn handle_session_telemetry(&mut self, agent_id: &str, payload: serde_json::Value) {
        let payload: SessionPayload = match serde_json::from_value(payload) {
            Ok(payload) => payload,
            Err(e) => {
                debug!(agent_id, err = %e, "bad session payload");
                return;
            }
        };
        let settings = self.store.settings_snapshot().await;

        let (change, came_back) = {
            let mut registry = self.store.registry.write().await;
            let Some(agent) = registry.get_mut(agent_id) else {
                debug!(agent_id, "session telemetry for unknown agent");
                return;
            };
            agent.last_contact = Some(tokio::time::Instant::now());
            let came_back = !agent.online;
            agent.online = true;
            (apply_session(agent, &payload, settings.idle_threshold_ms), came_back)
        };
        if came_back {
            self.store.journal.record_activity("agent_online", Some(agent_id), "").await;
        }

        if let Some(ended) = change.ended {
            info!(agent_id, username = %ended.session.username, "session ended");
            self.store
                .journal
                .record_activity("session_ended", Some(agent_id), ended.session.username.clone())
                .await;
            // Usage flushes to the old child; the next session starts from a
            // fresh advance marker.
            self.store.usage.write().await.flush_agent(agent_id);
            // A logout armed for the departed session is moot.
            self.store.timers.cancel_agent(agent_id);
            self.planner.reset(agent_id);
        }

        self.store.journal.emit(
            UiChannel::SessionUpdate,
            json!({ "agentId": agent_id, "session": change.session }),
        );

        // A session with no child binding counts toward online/hostname
        // tracking only. Journaled once per session, not per report.
        if change.started && !change.parental && change.child_id.is_none() {
            debug!(
                agent_id,
                username = %change.session.username,
                code = %ErrorCode::MissingBinding,
                "session has no child binding"
            );
            self.store
                .journal
                .record_activity(
                    "missing_binding",
                    Some(agent_id),
                    format!("{}: {}", ErrorCode::MissingBinding, change.session.username),
                )
                .await;
        }

        if !change.parental {
            if let Some(ref child_id) = change.child_id {
                let count = !(change.session.is_idle && settings.pause_on_idle);
                self.store.usage.write().await.advance(
                    agent_id,
                    child_id,
                    Activity::Computer,
                    payload.timestamp,
                    settings.monitor_interval_ms,
                    count,
                );
            }
        }

        self.evaluate_and_dispatch(agent_id, payload.timestamp).await;
    }

    async fn handle_process_telemetry(&mut self, agent_id: &str, payload: serde_json::Value) {
        let payload: ProcessPayload = match serde_json::from_value(payload) {
            Ok(payload) => payload,
            Err(e) => {
                debug!(agent_id, err = %e, "bad process payload");
                return;
            }
        };
        let timestamp = payload.timestamp;
        let snapshot = ProcessSnapshot::from_payload(payload);
        let browsers_open = !snapshot.browsers.is_empty();
        let settings = self.store.settings_snapshot().await;

        let (session_child, unbound) = {
            let mut registry = self.store.registry.write().await;
            let Some(agent) = registry.get_mut(agent_id) else {
                debug!(agent_id, "process telemetry for unknown agent");
                return;
            };
            agent.last_snapshot = Some(snapshot);
            agent.last_seen_ms = timestamp;
            agent.last_contact = Some(tokio::time::Instant::now());
            agent.online = true;
            match agent.current_session.as_ref() {
                Some(session) if !session.parental => {
                    let child = agent.child_for(&session.username).map(str::to_owned);
                    let unbound = child.is_none();
                    (child, unbound)
                }
                _ => (None, false),
            }
        };
        if unbound {
            debug!(
                agent_id,
                code = %ErrorCode::MissingBinding,
                "process telemetry without child binding"
            );
        }

        // Internet time accrues only while a browser is open.
        if let Some(ref child_id) = session_child {
            self.store.usage.write().await.advance(
                agent_id,
                child_id,
                Activity::Internet,
                timestamp,
                settings.monitor_interval_ms,
                browsers_open,
            );
        }

        self.evaluate_and_dispatch(agent_id, timestamp).await;
    }

    async fn handle_timer(&mut self, fire: TimerFire) {
        match fire {
            TimerFire::Warning { agent_id, threshold } => {
                debug!(agent_id, threshold, "warning timer fired");
                self.reevaluate(&agent_id).await;
            }
            TimerFire::Logout { agent_id, reason, stage } => {
                self.store.timers.logout_fired(&agent_id);
                match stage {
                    LogoutStage::Quota => {
                        // Deadline estimate reached; confirm against a fresh
                        // verdict before enforcing.
                        debug!(agent_id, "quota deadline timer fired");
                        self.reevaluate(&agent_id).await;
                    }
                    LogoutStage::Grace => {
                        self.planner.set_state(&agent_id, EnforceState::LoggingOut);
                        self.dispatcher.execute_logout(&agent_id, &reason).await;
                    }
                }
            }
        }
    }

    async fn handle_oracle_change(&mut self, child_id: &str) {
        info!(child_id, "oracle state change");
        self.planner.invalidate_child(child_id);
        for agent_id in self.store.agents_for_child(child_id).await {
            // Armed timers derive from the stale verdict; drop them and let
            // the re-evaluation arm fresh ones.
            self.store.timers.cancel_agent(&agent_id);
            if self.planner.state(&agent_id) == EnforceState::GracePending {
                self.planner.set_state(&agent_id, EnforceState::Idle);
            }
            self.reevaluate(&agent_id).await;
        }
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Reevaluate { agent_id } => {
                self.reevaluate(&agent_id).await;
            }
            Command::ForceLogout { agent_id } => {
                let grace = self.store.settings_snapshot().await.grace_period_secs;
                let intents = self.planner.force_logout(&agent_id, grace);
                self.dispatcher.dispatch(intents).await;
            }
            Command::Lock { agent_id } => {
                self.dispatcher.dispatch(vec![Intent::Lock { agent_id }]).await;
            }
            Command::Focus { agent_id, child_id, enabled } => {
                let intent = if enabled {
                    let Some(profile) =
                        self.store.child_snapshot(&child_id).await.and_then(|c| c.focus)
                    else {
                        warn!(agent_id, child_id, "focus requested without a profile");
                        return;
                    };
                    Intent::FocusApply { agent_id: agent_id.clone(), profile }
                } else {
                    Intent::FocusClear { agent_id: agent_id.clone() }
                };
                self.dispatcher.dispatch(vec![intent]).await;
                // Focus changes the effective blocklist immediately.
                self.reevaluate(&agent_id).await;
            }
            Command::ResetAgent { agent_id } => {
                self.planner.reset(&agent_id);
            }
            Command::MonitorIntervalChanged { interval_ms } => {
                self.push_monitor_interval(interval_ms).await;
            }
            Command::LogoutAcked { agent_id } => {
                self.planner.set_state(&agent_id, EnforceState::Idle);
                self.store.timers.cancel_agent(&agent_id);
            }
        }
    }

    /// Deploy the required monitors and actions to a newly seen agent.
    async fn deploy(&mut self, agent_id: &str) {
        let interval_ms = self.store.settings_snapshot().await.monitor_interval_ms;
        for spec in scripts::monitors(interval_ms) {
            let monitor_id = spec.monitor_id.clone();
            match self.gateway.deploy_monitor(agent_id, spec).await {
                Ok(()) => {
                    let mut registry = self.store.registry.write().await;
                    if let Some(agent) = registry.get_mut(agent_id) {
                        agent.deployed_monitors.insert(monitor_id, interval_ms);
                    }
                }
                Err(code) => {
                    warn!(agent_id, monitor_id, code = %code, "monitor deploy failed");
                }
            }
        }
        for spec in scripts::actions() {
            let action_id = spec.action_id.clone();
            if let Err(code) = self.gateway.deploy_action(agent_id, spec).await {
                warn!(agent_id, action_id, code = %code, "action deploy failed");
            }
        }
    }

    /// Best-effort removal of deployed monitors on shutdown.
    async fn remove_deployments(&mut self) {
        let deployments: Vec<(String, Vec<String>)> = {
            let registry = self.store.registry.read().await;
            registry
                .values()
                .filter(|a| a.online)
                .map(|a| (a.id.clone(), a.deployed_monitors.keys().cloned().collect()))
                .collect()
        };
        for (agent_id, monitors) in deployments {
            for monitor_id in monitors {
                let _ = self.gateway.remove_monitor(&agent_id, &monitor_id).await;
            }
        }
    }

    /// Push a changed report interval to every agent's deployed monitors.
    async fn push_monitor_interval(&mut self, interval_ms: u64) {
        let agent_ids: Vec<String> =
            { self.store.registry.read().await.keys().cloned().collect() };
        for agent_id in agent_ids {
            let monitors: Vec<String> = {
                let registry = self.store.registry.read().await;
                registry
                    .get(&agent_id)
                    .map(|a| a.deployed_monitors.keys().cloned().collect())
                    .unwrap_or_default()
            };
            for monitor_id in monitors {
                match self.gateway.update_monitor(&agent_id, &monitor_id, interval_ms).await {
                    Ok(()) => {
                        let mut registry = self.store.registry.write().await;
                        if let Some(agent) = registry.get_mut(&agent_id) {
                            agent.deployed_monitors.insert(monitor_id, interval_ms);
                        }
                    }
                    Err(code) => {
                        debug!(agent_id, monitor_id, code = %code, "monitor update failed");
                    }
                }
            }
        }
    }

    async fn mark_offline(&mut self, agent_id: &str) {
        let was_online = {
            let mut registry = self.store.registry.write().await;
            match registry.get_mut(agent_id) {
                Some(agent) if agent.online => {
                    agent.online = false;
                    true
                }
                _ => false,
            }
        };
        if was_online {
            info!(agent_id, "agent offline");
            self.store.timers.cancel_agent(agent_id);
            self.planner.reset(agent_id);
            self.store.journal.record_activity("agent_offline", Some(agent_id), "").await;
        }
    }

    /// Flag agents whose telemetry gap exceeds twice the report interval.
    async fn sweep_offline(&mut self) {
        let interval_ms = self.store.settings_snapshot().await.monitor_interval_ms;
        let gap = tokio::time::Duration::from_millis(2 * interval_ms);
        let now = tokio::time::Instant::now();
        let lapsed: Vec<String> = {
            let registry = self.store.registry.read().await;
            registry
                .values()
                .filter(|a| {
                    a.online
                        && a.last_contact.is_some_and(|t| now.saturating_duration_since(t) > gap)
                })
                .map(|a| a.id.clone())
                .collect()
        };
        for agent_id in lapsed {
            self.mark_offline(&agent_id).await;
        }
    }
}
