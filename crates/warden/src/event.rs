// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Events consumed by the supervisor loop.
//!
//! Telemetry, oracle state changes, and commands all travel through one
//! queue so their effects apply in arrival order per agent. Timer expiries
//! use their own channel; they are wall-clock driven, not ordered input.

use crate::gateway::GatewayEvent;

/// Imperative commands forwarded into the supervisor from the control API
/// (and, for acks, from the dispatcher).
#[derive(Debug, Clone)]
pub enum Command {
    /// Re-run planning for one agent (binding or settings changed).
    Reevaluate { agent_id: String },
    /// Manual logout with the default grace period.
    ForceLogout { agent_id: String },
    /// Immediate lock.
    Lock { agent_id: String },
    /// Apply or clear focus mode.
    Focus { agent_id: String, child_id: String, enabled: bool },
    /// Agent was unlinked or disabled: drop planner state (timers are already
    /// cancelled by the command handler).
    ResetAgent { agent_id: String },
    /// The monitor interval changed: push it to every deployed monitor.
    MonitorIntervalChanged { interval_ms: u64 },
    /// The agent confirmed a logout action.
    LogoutAcked { agent_id: String },
}

/// Unified supervisor event stream.
#[derive(Debug, Clone)]
pub enum Event {
    Gateway(GatewayEvent),
    /// Push notification: cached verdicts for this child are invalid.
    OracleChanged { child_id: String },
    Command(Command),
}
