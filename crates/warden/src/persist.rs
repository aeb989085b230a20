// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Configuration blob persistence.
//!
//! One opaque JSON blob holds registrations, mappings, children, settings,
//! and the journals. It is rewritten after any state-affecting command;
//! missing sub-fields load as documented defaults. Usage cells and timers
//! are deliberately not persisted: accounting is best-effort in-memory and
//! timers are recomputed from fresh verdicts.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::Ordering;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::clock::epoch_ms;
use crate::model::{ActivityEntry, AgentDescriptor, AgentRecord, Platform, Violation};
use crate::settings::{ChildConfig, Settings};
use crate::state::Store;

/// Durable slice of an agent registration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedAgent {
    pub id: String,
    pub hostname: String,
    pub platform: Platform,
    #[serde(default)]
    pub child_id: Option<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_true() -> bool {
    true
}

/// The whole persisted blob.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistedState {
    pub agents: Vec<PersistedAgent>,
    /// agent id → (username → child id)
    pub user_mappings: HashMap<String, HashMap<String, String>>,
    /// agent id → parent usernames
    pub parent_accounts: HashMap<String, Vec<String>>,
    pub children: HashMap<String, ChildConfig>,
    pub settings: Settings,
    /// Newest-first.
    pub violations: Vec<Violation>,
    /// Newest-first.
    pub activity_log: Vec<ActivityEntry>,
    pub last_sync_ms: u64,
}

/// Load the blob from disk; a missing file yields defaults.
pub fn load(path: &Path) -> anyhow::Result<PersistedState> {
    if !path.exists() {
        return Ok(PersistedState::default());
    }
    let contents = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&contents)?)
}

/// Capture the store's durable state.
pub async fn snapshot(store: &Store) -> PersistedState {
    let registry = store.registry.read().await;
    let mut agents = Vec::with_capacity(registry.len());
    let mut user_mappings = HashMap::new();
    let mut parent_accounts = HashMap::new();
    for agent in registry.values() {
        agents.push(PersistedAgent {
            id: agent.id.clone(),
            hostname: agent.hostname.clone(),
            platform: agent.platform,
            child_id: agent.child_id.clone(),
            enabled: agent.enabled,
        });
        if !agent.user_mappings.is_empty() {
            user_mappings.insert(agent.id.clone(), agent.user_mappings.clone());
        }
        if !agent.parent_accounts.is_empty() {
            parent_accounts.insert(agent.id.clone(), agent.parent_accounts.clone());
        }
    }
    agents.sort_by(|a, b| a.id.cmp(&b.id));
    drop(registry);

    let (violations, activity_log) = store.journal.snapshot().await;

    PersistedState {
        agents,
        user_mappings,
        parent_accounts,
        children: store.children.read().await.clone(),
        settings: store.settings_snapshot().await,
        violations,
        activity_log,
        last_sync_ms: epoch_ms(),
    }
}

/// Rebuild runtime state from a loaded blob. Agents come back offline;
/// sessions, snapshots, and timers are reconstructed from live telemetry.
pub async fn hydrate(store: &Store, state: PersistedState) {
    {
        let mut registry = store.registry.write().await;
        for persisted in state.agents {
            let mut agent = AgentRecord::new(
                AgentDescriptor {
                    id: persisted.id.clone(),
                    hostname: persisted.hostname,
                    platform: persisted.platform,
                },
                0,
            );
            agent.online = false;
            agent.child_id = persisted.child_id;
            agent.enabled = persisted.enabled;
            if let Some(mappings) = state.user_mappings.get(&persisted.id) {
                agent.user_mappings = mappings.clone();
            }
            if let Some(parents) = state.parent_accounts.get(&persisted.id) {
                agent.parent_accounts = parents.clone();
            }
            registry.insert(persisted.id, agent);
        }
    }
    *store.children.write().await = state.children;
    *store.settings.write().await = state.settings;
    store.journal.hydrate(state.violations, state.activity_log).await;
    store.last_sync_ms.store(state.last_sync_ms, Ordering::Relaxed);
}

/// Persist the store to its configured path, if any. Best-effort.
pub async fn save(store: &Store) {
    let Some(ref path) = store.runtime.state_path else {
        return;
    };
    let state = snapshot(store).await;
    store.last_sync_ms.store(state.last_sync_ms, Ordering::Relaxed);
    let json = match serde_json::to_vec_pretty(&state) {
        Ok(json) => json,
        Err(e) => {
            warn!(err = %e, "state serialize failed");
            return;
        }
    };
    if let Some(dir) = path.parent() {
        let _ = std::fs::create_dir_all(dir);
    }
    match std::fs::write(path, json) {
        Ok(()) => debug!(path = %path.display(), "state persisted"),
        Err(e) => warn!(err = %e, path = %path.display(), "state write failed"),
    }
}

#[cfg(test)]
#[path = "persist_tests.rs"]
mod tests;
