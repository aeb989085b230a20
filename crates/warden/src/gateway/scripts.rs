// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Pre-built per-platform probe and action scripts.
//!
//! These blobs are handed to the gateway as opaque data; the agent runs them
//! with its own interpreter. The control plane never parses script contents,
//! only selects the blob matching the agent's platform tag.

use std::collections::BTreeMap;

use crate::model::Platform;

use super::{
    ActionSpec, MonitorSpec, ScriptSet, ACTION_KILL, ACTION_LOCK, ACTION_LOGOUT, ACTION_WARN,
    MONITOR_PROCESS, MONITOR_SESSION,
};

const SESSION_WIN32: &str = include_str!("blobs/session_win32.ps1");
const SESSION_DARWIN: &str = include_str!("blobs/session_darwin.sh");
const SESSION_LINUX: &str = include_str!("blobs/session_linux.sh");

const PROCESS_WIN32: &str = include_str!("blobs/process_win32.ps1");
const PROCESS_DARWIN: &str = include_str!("blobs/process_darwin.sh");
const PROCESS_LINUX: &str = include_str!("blobs/process_linux.sh");

const WARN_WIN32: &str = include_str!("blobs/warn_win32.ps1");
const WARN_DARWIN: &str = include_str!("blobs/warn_darwin.sh");
const WARN_LINUX: &str = include_str!("blobs/warn_linux.sh");

const KILL_WIN32: &str = include_str!("blobs/kill_win32.ps1");
const KILL_DARWIN: &str = include_str!("blobs/kill_unix.sh");
const KILL_LINUX: &str = include_str!("blobs/kill_unix.sh");

const LOCK_WIN32: &str = include_str!("blobs/lock_win32.ps1");
const LOCK_DARWIN: &str = include_str!("blobs/lock_darwin.sh");
const LOCK_LINUX: &str = include_str!("blobs/lock_linux.sh");

const LOGOUT_WIN32: &str = include_str!("blobs/logout_win32.ps1");
const LOGOUT_DARWIN: &str = include_str!("blobs/logout_darwin.sh");
const LOGOUT_LINUX: &str = include_str!("blobs/logout_linux.sh");

fn set(win32: &str, darwin: &str, linux: &str) -> ScriptSet {
    let mut blobs = BTreeMap::new();
    blobs.insert(Platform::Win32, win32.to_owned());
    blobs.insert(Platform::Darwin, darwin.to_owned());
    blobs.insert(Platform::Linux, linux.to_owned());
    ScriptSet(blobs)
}

/// The `session` monitor at the given report interval.
pub fn session_monitor(interval_ms: u64) -> MonitorSpec {
    MonitorSpec {
        monitor_id: MONITOR_SESSION.to_owned(),
        script: set(SESSION_WIN32, SESSION_DARWIN, SESSION_LINUX),
        interval_ms,
    }
}

/// The `process` monitor at the given report interval.
pub fn process_monitor(interval_ms: u64) -> MonitorSpec {
    MonitorSpec {
        monitor_id: MONITOR_PROCESS.to_owned(),
        script: set(PROCESS_WIN32, PROCESS_DARWIN, PROCESS_LINUX),
        interval_ms,
    }
}

/// Both required monitors.
pub fn monitors(interval_ms: u64) -> Vec<MonitorSpec> {
    vec![session_monitor(interval_ms), process_monitor(interval_ms)]
}

/// The four required actions.
pub fn actions() -> Vec<ActionSpec> {
    vec![
        ActionSpec {
            action_id: ACTION_WARN.to_owned(),
            script: set(WARN_WIN32, WARN_DARWIN, WARN_LINUX),
        },
        ActionSpec {
            action_id: ACTION_KILL.to_owned(),
            script: set(KILL_WIN32, KILL_DARWIN, KILL_LINUX),
        },
        ActionSpec {
            action_id: ACTION_LOCK.to_owned(),
            script: set(LOCK_WIN32, LOCK_DARWIN, LOCK_LINUX),
        },
        ActionSpec {
            action_id: ACTION_LOGOUT.to_owned(),
            script: set(LOGOUT_WIN32, LOGOUT_DARWIN, LOGOUT_LINUX),
        },
    ]
}
