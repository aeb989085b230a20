// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Transport contract with the remote agent subsystem.
//!
//! The core requires exactly two monitors (`session`, `process`) and four
//! actions (`warn`, `kill`, `lock`, `logout`). Script payloads are opaque
//! per-platform blobs; the core never interprets their contents.

pub mod scripts;
pub mod ws;

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;

use serde::{Deserialize, Serialize};

use crate::error::ErrorCode;
use crate::model::{AgentDescriptor, Platform};

pub const MONITOR_SESSION: &str = "session";
pub const MONITOR_PROCESS: &str = "process";
pub const ACTION_WARN: &str = "warn";
pub const ACTION_KILL: &str = "kill";
pub const ACTION_LOCK: &str = "lock";
pub const ACTION_LOGOUT: &str = "logout";

/// Per-platform opaque script blobs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScriptSet(pub BTreeMap<Platform, String>);

impl ScriptSet {
    pub fn get(&self, platform: Platform) -> Option<&str> {
        self.0.get(&platform).map(String::as_str)
    }
}

/// A monitor deployment request.
#[derive(Debug, Clone)]
pub struct MonitorSpec {
    pub monitor_id: String,
    pub script: ScriptSet,
    pub interval_ms: u64,
}

/// An action deployment request.
#[derive(Debug, Clone)]
pub struct ActionSpec {
    pub action_id: String,
    pub script: ScriptSet,
}

/// Result of a triggered action, echoed back by the agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionResponse {
    pub action_id: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Echoed arguments plus any extra fields; treated as opaque.
    #[serde(default)]
    pub args: serde_json::Value,
}

/// Events flowing from the gateway into the supervisor.
#[derive(Debug, Clone)]
pub enum GatewayEvent {
    Discovered(AgentDescriptor),
    Telemetry { agent_id: String, monitor_id: String, payload: serde_json::Value },
    ActionResponse { agent_id: String, response: ActionResponse },
    Online { agent_id: String },
    Offline { agent_id: String },
}

impl GatewayEvent {
    /// The agent this event concerns.
    pub fn agent_id(&self) -> &str {
        match self {
            Self::Discovered(desc) => &desc.id,
            Self::Telemetry { agent_id, .. }
            | Self::ActionResponse { agent_id, .. }
            | Self::Online { agent_id }
            | Self::Offline { agent_id } => agent_id,
        }
    }
}

type GatewayFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, ErrorCode>> + Send + 'a>>;

/// Bi-directional transport to remote agents.
///
/// Object-safe for use as `Arc<dyn Gateway>`; the deterministic test harness
/// substitutes an in-memory implementation.
pub trait Gateway: Send + Sync + 'static {
    /// Descriptors of currently reachable agents.
    fn list_agents(&self) -> Pin<Box<dyn Future<Output = Vec<AgentDescriptor>> + Send + '_>>;

    /// Deploy (or re-deploy) a monitor. Idempotent; an existing monitor with
    /// the same id gets the new interval.
    fn deploy_monitor(&self, agent_id: &str, spec: MonitorSpec) -> GatewayFuture<'_, ()>;

    /// Update the report interval of a deployed monitor.
    fn update_monitor(
        &self,
        agent_id: &str,
        monitor_id: &str,
        interval_ms: u64,
    ) -> GatewayFuture<'_, ()>;

    /// Remove a deployed monitor.
    fn remove_monitor(&self, agent_id: &str, monitor_id: &str) -> GatewayFuture<'_, ()>;

    /// Deploy an action script.
    fn deploy_action(&self, agent_id: &str, spec: ActionSpec) -> GatewayFuture<'_, ()>;

    /// Invoke a deployed action and await the agent's response.
    fn trigger_action(
        &self,
        agent_id: &str,
        action_id: &str,
        args: serde_json::Value,
    ) -> GatewayFuture<'_, ActionResponse>;
}

#[cfg(test)]
#[path = "gateway_tests.rs"]
mod tests;
