// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared fixtures for unit tests and the scenario suite: a [`Store`]
//! builder, a recording in-memory gateway, and a scriptable oracle.

use std::collections::HashMap;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::atomic::AtomicU64;
use std::sync::Mutex;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::ErrorCode;
use crate::event::Event;
use crate::gateway::{ActionResponse, ActionSpec, Gateway, MonitorSpec};
use crate::journal::Journal;
use crate::model::{Activity, AgentDescriptor};
use crate::oracle::{Oracle, Verdict};
use crate::settings::Settings;
use crate::state::{RuntimeSettings, Store};
use crate::timers::{TimerFire, TimerTable};
use crate::usage::UsageLedger;

/// Builder for a [`Store`] wired to fresh channels.
#[derive(Default)]
pub struct StoreBuilder {
    auth_token: Option<String>,
    state_path: Option<PathBuf>,
    settings: Option<Settings>,
}

impl StoreBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn auth_token(mut self, token: &str) -> Self {
        self.auth_token = Some(token.to_owned());
        self
    }

    pub fn state_path(mut self, path: PathBuf) -> Self {
        self.state_path = Some(path);
        self
    }

    pub fn settings(mut self, settings: Settings) -> Self {
        self.settings = Some(settings);
        self
    }

    /// Build the store plus the receivers the supervisor would consume.
    pub fn build(self) -> (Arc<Store>, mpsc::Receiver<Event>, mpsc::Receiver<TimerFire>) {
        let (events_tx, events_rx) = mpsc::channel(256);
        let (fire_tx, fire_rx) = mpsc::channel(64);
        let store = Arc::new(Store {
            registry: tokio::sync::RwLock::new(HashMap::new()),
            children: tokio::sync::RwLock::new(HashMap::new()),
            settings: tokio::sync::RwLock::new(self.settings.unwrap_or_default()),
            usage: tokio::sync::RwLock::new(UsageLedger::new()),
            journal: Journal::new(),
            timers: TimerTable::new(fire_tx),
            events_tx,
            ws_hub: None,
            shutdown: CancellationToken::new(),
            runtime: RuntimeSettings {
                auth_token: self.auth_token,
                state_path: self.state_path,
                started_at: Instant::now(),
            },
            last_sync_ms: AtomicU64::new(0),
        });
        (store, events_rx, fire_rx)
    }
}

// -- Recording gateway --------------------------------------------------------

/// One recorded `trigger_action` invocation.
#[derive(Debug, Clone)]
pub struct ActionCall {
    pub agent_id: String,
    pub action_id: String,
    pub args: serde_json::Value,
}

/// In-memory gateway that records every action call and answers success.
#[derive(Default)]
pub struct RecordingGateway {
    calls: Mutex<Vec<ActionCall>>,
    /// Action id → error text the scripted agent reports instead of success.
    failing: Mutex<HashMap<String, String>>,
    /// When set, every call errors as if the agent were unreachable.
    unreachable: AtomicBool,
}

impl RecordingGateway {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn calls(&self) -> Vec<ActionCall> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    /// Calls filtered to one action id.
    pub fn calls_for(&self, action_id: &str) -> Vec<ActionCall> {
        self.calls().into_iter().filter(|c| c.action_id == action_id).collect()
    }

    pub fn clear_calls(&self) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.clear();
        }
    }

    pub fn fail_action(&self, action_id: &str) {
        self.fail_action_with(action_id, "scripted failure");
    }

    /// Fail an action with a specific agent-reported error text.
    pub fn fail_action_with(&self, action_id: &str, error: &str) {
        if let Ok(mut failing) = self.failing.lock() {
            failing.insert(action_id.to_owned(), error.to_owned());
        }
    }

    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::Relaxed);
    }
}

impl Gateway for RecordingGateway {
    fn list_agents(&self) -> Pin<Box<dyn Future<Output = Vec<AgentDescriptor>> + Send + '_>> {
        Box::pin(async { Vec::new() })
    }

    fn deploy_monitor(
        &self,
        _agent_id: &str,
        _spec: MonitorSpec,
    ) -> Pin<Box<dyn Future<Output = Result<(), ErrorCode>> + Send + '_>> {
        Box::pin(async { Ok(()) })
    }

    fn update_monitor(
        &self,
        _agent_id: &str,
        _monitor_id: &str,
        _interval_ms: u64,
    ) -> Pin<Box<dyn Future<Output = Result<(), ErrorCode>> + Send + '_>> {
        Box::pin(async { Ok(()) })
    }

    fn remove_monitor(
        &self,
        _agent_id: &str,
        _monitor_id: &str,
    ) -> Pin<Box<dyn Future<Output = Result<(), ErrorCode>> + Send + '_>> {
        Box::pin(async { Ok(()) })
    }

    fn deploy_action(
        &self,
        _agent_id: &str,
        _spec: ActionSpec,
    ) -> Pin<Box<dyn Future<Output = Result<(), ErrorCode>> + Send + '_>> {
        Box::pin(async { Ok(()) })
    }

    fn trigger_action(
        &self,
        agent_id: &str,
        action_id: &str,
        args: serde_json::Value,
    ) -> Pin<Box<dyn Future<Output = Result<ActionResponse, ErrorCode>> + Send + '_>> {
        let agent_id = agent_id.to_owned();
        let action_id = action_id.to_owned();
        Box::pin(async move {
            if self.unreachable.load(Ordering::Relaxed) {
                return Err(ErrorCode::AgentUnavailable);
            }
            if let Ok(mut calls) = self.calls.lock() {
                calls.push(ActionCall {
                    agent_id,
                    action_id: action_id.clone(),
                    args: args.clone(),
                });
            }
            let error = self
                .failing
                .lock()
                .ok()
                .and_then(|f| f.get(&action_id).cloned());
            Ok(ActionResponse { action_id, success: error.is_none(), error, args })
        })
    }
}

// -- Scriptable oracle --------------------------------------------------------

/// Oracle with per-(child, activity) scripted verdicts and an outage switch.
#[derive(Default)]
pub struct ScriptedOracle {
    verdicts: Mutex<HashMap<(String, Activity), Verdict>>,
    calls: Mutex<Vec<(String, Activity)>>,
    down: AtomicBool,
}

impl ScriptedOracle {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_verdict(&self, child_id: &str, activity: Activity, verdict: Verdict) {
        if let Ok(mut verdicts) = self.verdicts.lock() {
            verdicts.insert((child_id.to_owned(), activity), verdict);
        }
    }

    /// Convenience: allowed with the given remaining seconds.
    pub fn set_remaining(&self, child_id: &str, activity: Activity, remaining_seconds: i64) {
        self.set_verdict(
            child_id,
            activity,
            Verdict { allowed: true, banned: false, remaining_seconds, as_of_ms: 0 },
        );
    }

    pub fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::Relaxed);
    }

    /// Every (child, activity) pair checked so far.
    pub fn checks(&self) -> Vec<(String, Activity)> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }
}

impl Oracle for ScriptedOracle {
    fn check(
        &self,
        child_id: &str,
        activity: Activity,
    ) -> Pin<Box<dyn Future<Output = Result<Verdict, ErrorCode>> + Send + '_>> {
        let child_id = child_id.to_owned();
        Box::pin(async move {
            if let Ok(mut calls) = self.calls.lock() {
                calls.push((child_id.clone(), activity));
            }
            if self.down.load(Ordering::Relaxed) {
                return Err(ErrorCode::OracleUnavailable);
            }
            let verdict = self
                .verdicts
                .lock()
                .ok()
                .and_then(|v| v.get(&(child_id, activity)).copied())
                .unwrap_or(Verdict {
                    allowed: true,
                    banned: false,
                    remaining_seconds: 24 * 3600,
                    as_of_ms: 0,
                });
            Ok(verdict)
        })
    }
}
