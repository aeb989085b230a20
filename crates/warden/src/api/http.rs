// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP request/response types and axum handler implementations.

use std::collections::HashSet;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::error::ErrorCode;
use crate::event::Command;
use crate::model::{ActivityEntry, SessionInfo, Violation};
use crate::persist;
use crate::settings::{BedtimeRule, ChildPatch, ScheduleRule, Settings, SettingsPatch};
use crate::state::Store;

// -- Types --------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct AgentEntry {
    pub id: String,
    pub hostname: String,
    pub platform: &'static str,
    pub online: bool,
    pub child_id: Option<String>,
    pub enabled: bool,
    pub current_session: Option<SessionInfo>,
    pub focus_active: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusResponse {
    pub agent_count: usize,
    pub active_agents: usize,
    pub monitored_children: usize,
    pub recent_violations: Vec<Violation>,
    pub settings: Settings,
    pub last_sync_ms: u64,
}

#[derive(Debug, Deserialize)]
pub struct LinkRequest {
    pub child_id: String,
}

#[derive(Debug, Deserialize)]
pub struct MappingRequest {
    pub username: String,
    /// `null` clears the mapping.
    pub child_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ParentsRequest {
    pub usernames: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct EnabledRequest {
    pub enabled: bool,
}

#[derive(Debug, Deserialize)]
pub struct FocusRequest {
    pub enabled: bool,
    pub child_id: String,
}

#[derive(Debug, Deserialize)]
pub struct LimitQuery {
    pub limit: Option<usize>,
}

fn ok() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "ok": true }))
}

// -- Read handlers ------------------------------------------------------------

/// `GET /api/v1/health`
pub async fn health(State(store): State<Arc<Store>>) -> impl IntoResponse {
    let registry = store.registry.read().await;
    let online = registry.values().filter(|a| a.online).count();
    Json(serde_json::json!({
        "status": "running",
        "agents": registry.len(),
        "online": online,
        "uptime_secs": store.runtime.started_at.elapsed().as_secs(),
    }))
}

/// `GET /api/v1/status`
pub async fn status(State(store): State<Arc<Store>>) -> impl IntoResponse {
    let registry = store.registry.read().await;
    let agent_count = registry.len();
    let active_agents = registry.values().filter(|a| a.online).count();
    let monitored: HashSet<&str> = registry
        .values()
        .flat_map(|a| {
            a.child_id.as_deref().into_iter().chain(a.user_mappings.values().map(String::as_str))
        })
        .collect();
    let monitored_children = monitored.len();
    drop(registry);

    Json(StatusResponse {
        agent_count,
        active_agents,
        monitored_children,
        recent_violations: store.journal.violations(10).await,
        settings: store.settings_snapshot().await,
        last_sync_ms: store.last_sync_ms.load(Ordering::Relaxed),
    })
}

/// `GET /api/v1/agents`
pub async fn agents(State(store): State<Arc<Store>>) -> impl IntoResponse {
    let registry = store.registry.read().await;
    let mut entries: Vec<AgentEntry> = registry
        .values()
        .map(|a| AgentEntry {
            id: a.id.clone(),
            hostname: a.hostname.clone(),
            platform: a.platform.as_str(),
            online: a.online,
            child_id: a.child_id.clone(),
            enabled: a.enabled,
            current_session: a.current_session.clone(),
            focus_active: a.focus.is_some(),
        })
        .collect();
    entries.sort_by(|a, b| a.id.cmp(&b.id));
    Json(entries)
}

/// `GET /api/v1/violations`
pub async fn get_violations(
    State(store): State<Arc<Store>>,
    Query(query): Query<LimitQuery>,
) -> Json<Vec<Violation>> {
    Json(store.journal.violations(query.limit.unwrap_or(50)).await)
}

/// `POST /api/v1/violations/clear`
pub async fn clear_violations(State(store): State<Arc<Store>>) -> impl IntoResponse {
    store.journal.clear_violations().await;
    persist::save(&store).await;
    ok()
}

/// `GET /api/v1/activity`
pub async fn get_activity(
    State(store): State<Arc<Store>>,
    Query(query): Query<LimitQuery>,
) -> Json<Vec<ActivityEntry>> {
    Json(store.journal.activity(query.limit.unwrap_or(50)).await)
}

/// `GET /api/v1/settings`
pub async fn get_settings(State(store): State<Arc<Store>>) -> Json<Settings> {
    Json(store.settings_snapshot().await)
}

// -- Command handlers ---------------------------------------------------------

/// `POST /api/v1/settings`
pub async fn update_settings(
    State(store): State<Arc<Store>>,
    Json(patch): Json<SettingsPatch>,
) -> impl IntoResponse {
    if patch.warning_times.as_ref().is_some_and(|t| t.is_empty() || t.contains(&0)) {
        return ErrorCode::InvalidConfig
            .to_http_response("warning_times must be non-empty positive minutes")
            .into_response();
    }
    if patch.monitor_interval_ms.is_some_and(|v| v < 1000) {
        return ErrorCode::InvalidConfig
            .to_http_response("monitor_interval_ms must be at least 1000")
            .into_response();
    }

    let (settings, interval_changed) = {
        let mut settings = store.settings.write().await;
        let changed = settings.apply(patch);
        (settings.clone(), changed)
    };
    if interval_changed {
        store
            .send_command(Command::MonitorIntervalChanged {
                interval_ms: settings.monitor_interval_ms,
            })
            .await;
    }
    persist::save(&store).await;
    Json(settings).into_response()
}

/// `POST /api/v1/agents/{id}/link`
pub async fn link_agent(
    State(store): State<Arc<Store>>,
    Path(agent_id): Path<String>,
    Json(req): Json<LinkRequest>,
) -> impl IntoResponse {
    if req.child_id.is_empty() {
        return ErrorCode::InvalidConfig.to_http_response("child_id is empty").into_response();
    }
    {
        let mut registry = store.registry.write().await;
        let Some(agent) = registry.get_mut(&agent_id) else {
            return ErrorCode::NotFound.to_http_response("no such agent").into_response();
        };
        agent.child_id = Some(req.child_id.clone());
        // Linking without an explicit mapping implicitly maps the current
        // username to the child.
        if let Some(session) = agent.current_session.clone() {
            if !agent.is_parent(&session.username) {
                agent.user_mappings.insert(session.username, req.child_id.clone());
            }
        }
    }
    store
        .journal
        .record_activity("agent_linked", Some(&agent_id), req.child_id.clone())
        .await;
    persist::save(&store).await;
    store.send_command(Command::Reevaluate { agent_id }).await;
    ok().into_response()
}

/// `POST /api/v1/agents/{id}/unlink`
pub async fn unlink_agent(
    State(store): State<Arc<Store>>,
    Path(agent_id): Path<String>,
) -> impl IntoResponse {
    {
        let mut registry = store.registry.write().await;
        let Some(agent) = registry.get_mut(&agent_id) else {
            return ErrorCode::NotFound.to_http_response("no such agent").into_response();
        };
        agent.child_id = None;
        agent.user_mappings.clear();
        agent.focus = None;
    }
    // Unlinking cancels any pending logout.
    store.timers.cancel_agent(&agent_id);
    store.send_command(Command::ResetAgent { agent_id: agent_id.clone() }).await;
    store.journal.record_activity("agent_unlinked", Some(&agent_id), "").await;
    persist::save(&store).await;
    ok().into_response()
}

/// `POST /api/v1/agents/{id}/mappings`
pub async fn set_user_mapping(
    State(store): State<Arc<Store>>,
    Path(agent_id): Path<String>,
    Json(req): Json<MappingRequest>,
) -> impl IntoResponse {
    if req.username.is_empty() {
        return ErrorCode::InvalidConfig.to_http_response("username is empty").into_response();
    }
    {
        let mut registry = store.registry.write().await;
        let Some(agent) = registry.get_mut(&agent_id) else {
            return ErrorCode::NotFound.to_http_response("no such agent").into_response();
        };
        match req.child_id {
            Some(child_id) => {
                agent.user_mappings.insert(req.username, child_id);
            }
            None => {
                agent.user_mappings.remove(&req.username);
            }
        }
    }
    persist::save(&store).await;
    store.send_command(Command::Reevaluate { agent_id }).await;
    ok().into_response()
}

/// `POST /api/v1/agents/{id}/parents`
pub async fn set_parent_accounts(
    State(store): State<Arc<Store>>,
    Path(agent_id): Path<String>,
    Json(req): Json<ParentsRequest>,
) -> impl IntoResponse {
    {
        let mut registry = store.registry.write().await;
        let Some(agent) = registry.get_mut(&agent_id) else {
            return ErrorCode::NotFound.to_http_response("no such agent").into_response();
        };
        agent.parent_accounts = req.usernames;
    }
    persist::save(&store).await;
    store.send_command(Command::Reevaluate { agent_id }).await;
    ok().into_response()
}

/// `POST /api/v1/agents/{id}/enabled`
pub async fn set_agent_enabled(
    State(store): State<Arc<Store>>,
    Path(agent_id): Path<String>,
    Json(req): Json<EnabledRequest>,
) -> impl IntoResponse {
    {
        let mut registry = store.registry.write().await;
        let Some(agent) = registry.get_mut(&agent_id) else {
            return ErrorCode::NotFound.to_http_response("no such agent").into_response();
        };
        agent.enabled = req.enabled;
    }
    if !req.enabled {
        store.timers.cancel_agent(&agent_id);
        store.send_command(Command::ResetAgent { agent_id: agent_id.clone() }).await;
    } else {
        store.send_command(Command::Reevaluate { agent_id: agent_id.clone() }).await;
    }
    persist::save(&store).await;
    ok().into_response()
}

/// `PUT /api/v1/children/{id}`
pub async fn update_child_settings(
    State(store): State<Arc<Store>>,
    Path(child_id): Path<String>,
    Json(patch): Json<ChildPatch>,
) -> impl IntoResponse {
    if let Some(Some(ref bedtime)) = patch.bedtime {
        if let Err(message) = validate_bedtime(bedtime) {
            return ErrorCode::InvalidConfig.to_http_response(message).into_response();
        }
    }
    if let Some(ref schedules) = patch.schedules {
        for schedule in schedules {
            if let Err(message) = validate_schedule(schedule) {
                return ErrorCode::InvalidConfig.to_http_response(message).into_response();
            }
        }
    }

    {
        let mut children = store.children.write().await;
        children.entry(child_id.clone()).or_default().apply(patch);
    }
    persist::save(&store).await;
    for agent_id in store.agents_for_child(&child_id).await {
        store.send_command(Command::Reevaluate { agent_id }).await;
    }
    ok().into_response()
}

fn validate_bedtime(bedtime: &BedtimeRule) -> Result<(), String> {
    if bedtime.enabled && bedtime.days.is_empty() {
        return Err("bedtime is enabled but has no days".to_owned());
    }
    for day in &bedtime.days {
        if crate::settings::parse_day(day).is_none() {
            return Err(format!("unknown day name: {day}"));
        }
    }
    Ok(())
}

fn validate_schedule(schedule: &ScheduleRule) -> Result<(), String> {
    if schedule.start >= schedule.end {
        return Err(format!("schedule \"{}\" has start >= end", schedule.name));
    }
    for day in &schedule.days {
        if crate::settings::parse_day(day).is_none() {
            return Err(format!("unknown day name: {day}"));
        }
    }
    Ok(())
}

/// `POST /api/v1/agents/{id}/logout`
pub async fn force_logout(
    State(store): State<Arc<Store>>,
    Path(agent_id): Path<String>,
) -> impl IntoResponse {
    if store.agent_snapshot(&agent_id).await.is_none() {
        return ErrorCode::NotFound.to_http_response("no such agent").into_response();
    }
    store.journal.record_activity("manual_logout", Some(&agent_id), "").await;
    store.send_command(Command::ForceLogout { agent_id }).await;
    ok().into_response()
}

/// `POST /api/v1/agents/{id}/lock`
pub async fn lock_session(
    State(store): State<Arc<Store>>,
    Path(agent_id): Path<String>,
) -> impl IntoResponse {
    if store.agent_snapshot(&agent_id).await.is_none() {
        return ErrorCode::NotFound.to_http_response("no such agent").into_response();
    }
    store.journal.record_activity("manual_lock", Some(&agent_id), "").await;
    store.send_command(Command::Lock { agent_id }).await;
    ok().into_response()
}

/// `POST /api/v1/agents/{id}/focus`
pub async fn trigger_focus_mode(
    State(store): State<Arc<Store>>,
    Path(agent_id): Path<String>,
    Json(req): Json<FocusRequest>,
) -> impl IntoResponse {
    if store.agent_snapshot(&agent_id).await.is_none() {
        return ErrorCode::NotFound.to_http_response("no such agent").into_response();
    }
    if req.enabled {
        let has_profile = store
            .child_snapshot(&req.child_id)
            .await
            .is_some_and(|c| c.focus.is_some());
        if !has_profile {
            return ErrorCode::InvalidConfig
                .to_http_response("child has no focus profile")
                .into_response();
        }
    }
    store
        .send_command(Command::Focus { agent_id, child_id: req.child_id, enabled: req.enabled })
        .await;
    ok().into_response()
}
