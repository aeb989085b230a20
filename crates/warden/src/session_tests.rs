// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::model::{AgentDescriptor, Platform};

const IDLE_THRESHOLD: u64 = 300_000;

fn agent() -> AgentRecord {
    let mut agent = AgentRecord::new(
        AgentDescriptor { id: "a1".into(), hostname: "kids-pc".into(), platform: Platform::Win32 },
        0,
    );
    agent.child_id = Some("c1".into());
    agent.parent_accounts.push("dad".into());
    agent
}

fn payload(username: &str, timestamp: u64, idle: u64) -> SessionPayload {
    SessionPayload {
        timestamp,
        hostname: Some("kids-pc".into()),
        username: username.to_owned(),
        session_id: Some("console".into()),
        login_time: Some(timestamp.saturating_sub(60_000)),
        idle_time: idle,
        is_idle: false,
    }
}

#[test]
fn first_session_resolves_bound_child() {
    let mut agent = agent();
    let change = apply_session(&mut agent, &payload("emma", 1000, 0), IDLE_THRESHOLD);
    assert!(change.ended.is_none());
    assert!(change.started);
    assert!(!change.parental);
    assert_eq!(change.child_id.as_deref(), Some("c1"));
    assert_eq!(agent.current_session.as_ref().map(|s| s.username.as_str()), Some("emma"));
    assert_eq!(agent.last_seen_ms, 1000);
}

#[test]
fn user_change_closes_prior_session() {
    let mut agent = agent();
    agent.user_mappings.insert("emma".into(), "emma-child".into());
    apply_session(&mut agent, &payload("emma", 1000, 0), IDLE_THRESHOLD);

    let change = apply_session(&mut agent, &payload("liam", 2000, 0), IDLE_THRESHOLD);
    let ended = change.ended.as_ref();
    assert_eq!(ended.map(|e| e.session.username.as_str()), Some("emma"));
    // The closed session flushes to the child it was accruing for.
    assert_eq!(ended.and_then(|e| e.child_id.as_deref()), Some("emma-child"));
    assert_eq!(change.child_id.as_deref(), Some("c1"));
    assert!(change.started);
}

#[test]
fn same_user_report_is_an_update_not_a_restart() {
    let mut agent = agent();
    apply_session(&mut agent, &payload("emma", 1000, 0), IDLE_THRESHOLD);
    let change = apply_session(&mut agent, &payload("emma", 31_000, 400_000), IDLE_THRESHOLD);
    assert!(change.ended.is_none());
    assert!(!change.started);
    assert!(change.session.is_idle);
}

#[test]
fn parent_session_is_tracked_but_unmonitored() {
    let mut agent = agent();
    let change = apply_session(&mut agent, &payload("dad", 1000, 0), IDLE_THRESHOLD);
    assert!(change.parental);
    assert_eq!(change.child_id, None);
    // Session is still recorded.
    assert!(agent.current_session.as_ref().is_some_and(|s| s.parental));
}

#[test]
fn idle_is_derived_from_threshold() {
    let mut agent = agent();
    let change = apply_session(&mut agent, &payload("emma", 1000, 299_999), IDLE_THRESHOLD);
    assert!(!change.session.is_idle);
    let change = apply_session(&mut agent, &payload("emma", 2000, 300_000), IDLE_THRESHOLD);
    assert!(change.session.is_idle);
}
