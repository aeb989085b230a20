// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Bounded in-memory journals with fan-out to UI subscribers.
//!
//! Two rings: violations (cap 200) and activity (cap 500). Entries are
//! appended at the head and evicted at the tail; reads return newest-first.

use std::collections::VecDeque;

use serde::Serialize;
use tokio::sync::{broadcast, RwLock};

use crate::model::{ActivityEntry, Violation};

pub const VIOLATION_CAP: usize = 200;
pub const ACTIVITY_CAP: usize = 500;

/// Fixed-capacity newest-first ring.
#[derive(Debug)]
pub struct BoundedLog<T> {
    entries: VecDeque<T>,
    cap: usize,
}

impl<T: Clone> BoundedLog<T> {
    pub fn new(cap: usize) -> Self {
        Self { entries: VecDeque::with_capacity(cap), cap }
    }

    /// Append at the head, evicting the oldest entry when full.
    pub fn push(&mut self, entry: T) {
        if self.entries.len() == self.cap {
            self.entries.pop_back();
        }
        self.entries.push_front(entry);
    }

    /// Newest-first slice of up to `limit` entries.
    pub fn list(&self, limit: usize) -> Vec<T> {
        self.entries.iter().take(limit).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Replace contents from a newest-first list (persistence reload).
    pub fn replace(&mut self, entries: Vec<T>) {
        self.entries = entries.into_iter().take(self.cap).collect();
    }
}

// -- UI event bus -------------------------------------------------------------

/// Named outbound channels consumed by the parent UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum UiChannel {
    #[serde(rename = "osViolation")]
    Violation,
    #[serde(rename = "osSessionUpdate")]
    SessionUpdate,
    #[serde(rename = "osQuotaWarning")]
    QuotaWarning,
    #[serde(rename = "osQuotaExhausted")]
    QuotaExhausted,
    #[serde(rename = "osBedtimeWarning")]
    BedtimeWarning,
    #[serde(rename = "osBlockedProcessDetected")]
    BlockedProcessDetected,
}

impl UiChannel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Violation => "osViolation",
            Self::SessionUpdate => "osSessionUpdate",
            Self::QuotaWarning => "osQuotaWarning",
            Self::QuotaExhausted => "osQuotaExhausted",
            Self::BedtimeWarning => "osBedtimeWarning",
            Self::BlockedProcessDetected => "osBlockedProcessDetected",
        }
    }
}

/// One event on the UI bus.
#[derive(Debug, Clone, Serialize)]
pub struct UiEvent {
    pub channel: UiChannel,
    pub payload: serde_json::Value,
}

// -- Journal ------------------------------------------------------------------

/// Violation and activity rings plus the UI broadcast bus.
pub struct Journal {
    violations: RwLock<BoundedLog<Violation>>,
    activity: RwLock<BoundedLog<ActivityEntry>>,
    ui_tx: broadcast::Sender<UiEvent>,
}

impl Default for Journal {
    fn default() -> Self {
        Self::new()
    }
}

impl Journal {
    pub fn new() -> Self {
        let (ui_tx, _) = broadcast::channel(256);
        Self {
            violations: RwLock::new(BoundedLog::new(VIOLATION_CAP)),
            activity: RwLock::new(BoundedLog::new(ACTIVITY_CAP)),
            ui_tx,
        }
    }

    /// Subscribe to UI events.
    pub fn subscribe(&self) -> broadcast::Receiver<UiEvent> {
        self.ui_tx.subscribe()
    }

    /// Emit an event on a named UI channel without journaling it.
    pub fn emit(&self, channel: UiChannel, payload: serde_json::Value) {
        let _ = self.ui_tx.send(UiEvent { channel, payload });
    }

    /// Record a violation and fan it out on `osViolation`.
    pub async fn record_violation(&self, violation: Violation) {
        let payload = serde_json::to_value(&violation).unwrap_or_default();
        self.violations.write().await.push(violation);
        self.emit(UiChannel::Violation, payload);
    }

    /// Record an activity entry.
    pub async fn record_activity(&self, kind: &str, agent_id: Option<&str>, detail: impl Into<String>) {
        let entry = ActivityEntry {
            kind: kind.to_owned(),
            agent_id: agent_id.map(str::to_owned),
            detail: detail.into(),
            timestamp_ms: crate::clock::epoch_ms(),
        };
        self.activity.write().await.push(entry);
    }

    pub async fn violations(&self, limit: usize) -> Vec<Violation> {
        self.violations.read().await.list(limit)
    }

    pub async fn activity(&self, limit: usize) -> Vec<ActivityEntry> {
        self.activity.read().await.list(limit)
    }

    pub async fn clear_violations(&self) {
        self.violations.write().await.clear();
    }

    /// Restore ring contents from a persisted blob (newest-first lists).
    pub async fn hydrate(&self, violations: Vec<Violation>, activity: Vec<ActivityEntry>) {
        self.violations.write().await.replace(violations);
        self.activity.write().await.replace(activity);
    }

    /// Newest-first full contents, for persistence.
    pub async fn snapshot(&self) -> (Vec<Violation>, Vec<ActivityEntry>) {
        (
            self.violations.read().await.list(VIOLATION_CAP),
            self.activity.read().await.list(ACTIVITY_CAP),
        )
    }
}

#[cfg(test)]
#[path = "journal_tests.rs"]
mod tests;
