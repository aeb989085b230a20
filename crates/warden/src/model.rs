// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Core record types: agents, sessions, process snapshots, enforcement
//! intents, and journal entries.
//!
//! Telemetry payload structs mirror the agent script contract (camelCase
//! keys); unknown fields are ignored so older or richer agents keep working.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::settings::FocusProfile;

/// Platform tag reported by an agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Win32,
    Darwin,
    Linux,
}

impl Platform {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Win32 => "win32",
            Self::Darwin => "darwin",
            Self::Linux => "linux",
        }
    }
}

/// Which kind of time an accumulator or verdict refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Activity {
    Computer,
    Internet,
}

impl Activity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Computer => "computer",
            Self::Internet => "internet",
        }
    }
}

/// Process category as classified by the agent-side probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Games,
    Education,
    Productivity,
    Internet,
    Other,
}

// -- Agent registry -----------------------------------------------------------

/// Identity fields an agent announces when it first connects.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentDescriptor {
    pub id: String,
    pub hostname: String,
    pub platform: Platform,
}

/// Registry entry for one remote agent.
#[derive(Debug, Clone)]
pub struct AgentRecord {
    pub id: String,
    pub hostname: String,
    pub platform: Platform,
    pub online: bool,
    pub last_seen_ms: u64,
    pub enabled: bool,
    /// Currently bound child, if any.
    pub child_id: Option<String>,
    pub current_session: Option<SessionInfo>,
    /// OS username → child id.
    pub user_mappings: HashMap<String, String>,
    /// Usernames whose sessions are never monitored subjects.
    pub parent_accounts: Vec<String>,
    /// Deployed monitor id → interval in milliseconds.
    pub deployed_monitors: HashMap<String, u64>,
    /// Active focus profile, if focus mode is on.
    pub focus: Option<FocusProfile>,
    /// Most recent process snapshot (drives internet gating and browser kills).
    pub last_snapshot: Option<ProcessSnapshot>,
    /// Monotonic receive time of the last telemetry; drives offline sweeping
    /// independently of agent-reported clocks.
    pub last_contact: Option<tokio::time::Instant>,
}

impl AgentRecord {
    pub fn new(desc: AgentDescriptor, last_seen_ms: u64) -> Self {
        Self {
            id: desc.id,
            hostname: desc.hostname,
            platform: desc.platform,
            online: true,
            last_seen_ms,
            enabled: true,
            child_id: None,
            current_session: None,
            user_mappings: HashMap::new(),
            parent_accounts: Vec::new(),
            deployed_monitors: HashMap::new(),
            focus: None,
            last_snapshot: None,
            last_contact: None,
        }
    }

    /// Whether the given username is a listed parent account.
    pub fn is_parent(&self, username: &str) -> bool {
        self.parent_accounts.iter().any(|p| p.eq_ignore_ascii_case(username))
    }

    /// Resolve the child a username maps to, falling back to the bound child.
    pub fn child_for(&self, username: &str) -> Option<&str> {
        if self.is_parent(username) {
            return None;
        }
        self.user_mappings.get(username).map(String::as_str).or(self.child_id.as_deref())
    }
}

// -- Session telemetry --------------------------------------------------------

/// Raw `session` monitor payload (agent script contract, camelCase keys).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionPayload {
    pub timestamp: u64,
    #[serde(default)]
    pub hostname: Option<String>,
    pub username: String,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub login_time: Option<u64>,
    #[serde(default)]
    pub idle_time: u64,
    #[serde(default)]
    pub is_idle: bool,
}

/// Tracked session on an agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionInfo {
    pub username: String,
    pub session_id: Option<String>,
    pub login_time_ms: Option<u64>,
    pub last_report_ms: u64,
    pub idle_ms: u64,
    /// Derived: `idle_ms >= settings.idle_threshold_ms`.
    pub is_idle: bool,
    /// Session belongs to a listed parent account.
    pub parental: bool,
}

// -- Process telemetry --------------------------------------------------------

/// Raw `process` monitor payload (agent script contract, camelCase keys).
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessPayload {
    pub timestamp: u64,
    #[serde(default)]
    pub processes: Vec<RawProcess>,
    #[serde(default)]
    pub browsers: Vec<BrowserProcess>,
    #[serde(default)]
    pub summary: Option<CategoryCounts>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawProcess {
    pub pid: u32,
    pub name: String,
    #[serde(default)]
    pub category: Option<Category>,
    #[serde(default)]
    pub browser_name: Option<String>,
}

/// A running browser process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BrowserProcess {
    pub pid: u32,
    pub name: String,
    #[serde(default)]
    pub browser_name: Option<String>,
}

/// Per-category process counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CategoryCounts {
    pub games: u32,
    pub education: u32,
    pub productivity: u32,
    pub internet: u32,
    pub other: u32,
}

/// Categorized snapshot of processes on an agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessSnapshot {
    pub timestamp_ms: u64,
    pub processes: Vec<ProcessInfo>,
    pub browsers: Vec<BrowserProcess>,
    pub summary: CategoryCounts,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessInfo {
    pub pid: u32,
    pub name: String,
    pub category: Option<Category>,
}

/// Process name patterns recognized as browsers when the agent-side probe
/// did not pre-classify.
const BROWSER_PATTERNS: &[&str] =
    &["chrome", "chromium", "firefox", "safari", "msedge", "edge", "opera", "brave", "vivaldi"];

impl ProcessSnapshot {
    /// Build a snapshot from a raw payload, deriving `browsers` from the
    /// pattern table when the probe sent none.
    pub fn from_payload(payload: ProcessPayload) -> Self {
        let mut browsers = payload.browsers;
        if browsers.is_empty() {
            for p in &payload.processes {
                let lower = p.name.to_lowercase();
                if BROWSER_PATTERNS.iter().any(|b| lower.contains(b)) {
                    browsers.push(BrowserProcess {
                        pid: p.pid,
                        name: p.name.clone(),
                        browser_name: p.browser_name.clone(),
                    });
                }
            }
        }

        let summary = payload.summary.unwrap_or_else(|| {
            let mut counts = CategoryCounts::default();
            for p in &payload.processes {
                match p.category {
                    Some(Category::Games) => counts.games += 1,
                    Some(Category::Education) => counts.education += 1,
                    Some(Category::Productivity) => counts.productivity += 1,
                    Some(Category::Internet) => counts.internet += 1,
                    Some(Category::Other) | None => counts.other += 1,
                }
            }
            counts
        });

        Self {
            timestamp_ms: payload.timestamp,
            processes: payload
                .processes
                .into_iter()
                .map(|p| ProcessInfo { pid: p.pid, name: p.name, category: p.category })
                .collect(),
            browsers,
            summary,
        }
    }
}

// -- Enforcement intents ------------------------------------------------------

/// What a warning is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WarnScope {
    Computer,
    Internet,
    Bedtime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Urgency {
    Normal,
    Critical,
}

/// A typed enforcement command produced by the planner, prior to dispatch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "intent", rename_all = "snake_case")]
pub enum Intent {
    Warning {
        agent_id: String,
        scope: WarnScope,
        minutes_remaining: u32,
        urgency: Urgency,
    },
    BlockProcess {
        agent_id: String,
        pid: u32,
        name: String,
        reason: String,
    },
    BlockBrowsers {
        agent_id: String,
    },
    Lock {
        agent_id: String,
    },
    Logout {
        agent_id: String,
        reason: String,
        grace_seconds: u64,
    },
    FocusApply {
        agent_id: String,
        profile: FocusProfile,
    },
    FocusClear {
        agent_id: String,
    },
}

impl Intent {
    pub fn agent_id(&self) -> &str {
        match self {
            Self::Warning { agent_id, .. }
            | Self::BlockProcess { agent_id, .. }
            | Self::BlockBrowsers { agent_id }
            | Self::Lock { agent_id }
            | Self::Logout { agent_id, .. }
            | Self::FocusApply { agent_id, .. }
            | Self::FocusClear { agent_id } => agent_id,
        }
    }

    /// Tie-break rank within one tick: lower sorts first.
    /// Logout > BlockBrowsers > BlockProcess > Warning.
    pub fn rank(&self) -> u8 {
        match self {
            Self::Logout { .. } => 0,
            Self::Lock { .. } => 1,
            Self::BlockBrowsers { .. } => 2,
            Self::BlockProcess { .. } => 3,
            Self::FocusApply { .. } | Self::FocusClear { .. } => 4,
            Self::Warning { .. } => 5,
        }
    }
}

/// Order intents for one agent tick by enforcement priority.
pub fn sort_intents(intents: &mut [Intent]) {
    intents.sort_by_key(Intent::rank);
}

// -- Journal records ----------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    BlockedProcess,
    ProcessKilled,
    QuotaExhausted,
    Bedtime,
    ActionFailed,
}

/// A recorded enforcement violation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Violation {
    pub kind: ViolationKind,
    pub agent_id: String,
    pub hostname: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub process_name: Option<String>,
    pub reason: String,
    pub timestamp_ms: u64,
}

/// A recorded activity event (agent lifecycle, sessions, actions).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityEntry {
    pub kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    pub detail: String,
    pub timestamp_ms: u64,
}

#[cfg(test)]
#[path = "model_tests.rs"]
mod tests;
