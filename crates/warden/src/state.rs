// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared application state.
//!
//! Mutation is confined to control-API command handlers and the supervisor
//! loop; readers observe point-in-time snapshots behind the locks.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::AtomicU64;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{mpsc, RwLock};
use tokio_util::sync::CancellationToken;

use crate::event::{Command, Event};
use crate::gateway::ws::WsGateway;
use crate::journal::Journal;
use crate::model::AgentRecord;
use crate::settings::{ChildConfig, Settings};
use crate::timers::TimerTable;
use crate::usage::UsageLedger;

/// Static runtime configuration (immutable after construction).
pub struct RuntimeSettings {
    pub auth_token: Option<String>,
    pub state_path: Option<PathBuf>,
    pub started_at: Instant,
}

/// Shared state passed to handlers via the axum `State` extractor and to the
/// supervisor loop.
pub struct Store {
    pub registry: RwLock<HashMap<String, AgentRecord>>,
    pub children: RwLock<HashMap<String, ChildConfig>>,
    pub settings: RwLock<Settings>,
    pub usage: RwLock<UsageLedger>,
    pub journal: Journal,
    pub timers: TimerTable,
    /// Inbound queue into the supervisor loop.
    pub events_tx: mpsc::Sender<Event>,
    /// The WS hub, when the production gateway is running (absent in tests).
    pub ws_hub: Option<Arc<WsGateway>>,
    pub shutdown: CancellationToken,
    pub runtime: RuntimeSettings,
    /// Epoch millis of the last persisted write.
    pub last_sync_ms: AtomicU64,
}

impl Store {
    pub async fn agent_snapshot(&self, agent_id: &str) -> Option<AgentRecord> {
        self.registry.read().await.get(agent_id).cloned()
    }

    pub async fn child_snapshot(&self, child_id: &str) -> Option<ChildConfig> {
        self.children.read().await.get(child_id).cloned()
    }

    pub async fn settings_snapshot(&self) -> Settings {
        self.settings.read().await.clone()
    }

    /// Forward a command into the supervisor loop.
    pub async fn send_command(&self, command: Command) {
        let _ = self.events_tx.send(Event::Command(command)).await;
    }

    /// Agents bound (directly or via user mapping) to a child.
    pub async fn agents_for_child(&self, child_id: &str) -> Vec<String> {
        self.registry
            .read()
            .await
            .values()
            .filter(|a| {
                a.child_id.as_deref() == Some(child_id)
                    || a.user_mappings.values().any(|c| c == child_id)
            })
            .map(|a| a.id.clone())
            .collect()
    }
}
