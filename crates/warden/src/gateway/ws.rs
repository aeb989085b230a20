// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! WebSocket hub implementation of the agent gateway.
//!
//! Each agent holds one persistent WS connection. The first frame must be
//! `hello`; after that the hub pushes deployment and action frames down and
//! receives telemetry and action responses. Action triggers are stamped with
//! a `request_id` so responses route back to the awaiting caller.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot, Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::error::ErrorCode;
use crate::model::{AgentDescriptor, Platform};
use crate::state::Store;

use super::{ActionResponse, ActionSpec, Gateway, GatewayEvent, MonitorSpec};

/// How long a triggered action may take before the agent counts as unavailable.
const ACTION_TIMEOUT: Duration = Duration::from_secs(10);

// -- Wire frames --------------------------------------------------------------

/// Frames pushed from the control plane to an agent.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event")]
pub enum ServerFrame {
    #[serde(rename = "monitor:deploy")]
    MonitorDeploy { monitor_id: String, interval_ms: u64, script: String },
    #[serde(rename = "monitor:update")]
    MonitorUpdate { monitor_id: String, interval_ms: u64 },
    #[serde(rename = "monitor:remove")]
    MonitorRemove { monitor_id: String },
    #[serde(rename = "action:deploy")]
    ActionDeploy { action_id: String, script: String },
    #[serde(rename = "action:trigger")]
    ActionTrigger { request_id: u64, action_id: String, args: serde_json::Value },
}

/// Frames received from an agent.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "event")]
pub enum AgentFrame {
    #[serde(rename = "hello")]
    Hello { agent_id: String, hostname: String, platform: Platform },
    #[serde(rename = "telemetry")]
    Telemetry { monitor_id: String, payload: serde_json::Value },
    #[serde(rename = "action:response")]
    ActionResponse {
        #[serde(default)]
        request_id: Option<u64>,
        action_id: String,
        success: bool,
        #[serde(default)]
        error: Option<String>,
        #[serde(default)]
        args: serde_json::Value,
    },
}

// -- Hub state ----------------------------------------------------------------

struct AgentConn {
    /// Distinguishes this connection from a replacement after reconnect.
    conn_seq: u64,
    descriptor: AgentDescriptor,
    tx: mpsc::UnboundedSender<String>,
}

/// WebSocket gateway hub.
pub struct WsGateway {
    conns: RwLock<HashMap<String, AgentConn>>,
    pending: Mutex<HashMap<u64, oneshot::Sender<ActionResponse>>>,
    next_rid: AtomicU64,
    next_conn_seq: AtomicU64,
    event_tx: mpsc::Sender<GatewayEvent>,
    action_timeout: Duration,
}

impl WsGateway {
    pub fn new(event_tx: mpsc::Sender<GatewayEvent>) -> Arc<Self> {
        Arc::new(Self {
            conns: RwLock::new(HashMap::new()),
            pending: Mutex::new(HashMap::new()),
            next_rid: AtomicU64::new(1),
            next_conn_seq: AtomicU64::new(1),
            event_tx,
            action_timeout: ACTION_TIMEOUT,
        })
    }

    async fn send_frame(&self, agent_id: &str, frame: &ServerFrame) -> Result<(), ErrorCode> {
        let conns = self.conns.read().await;
        let conn = conns.get(agent_id).ok_or(ErrorCode::AgentUnavailable)?;
        let text = serde_json::to_string(frame).map_err(|_| ErrorCode::Internal)?;
        conn.tx.send(text).map_err(|_| ErrorCode::AgentUnavailable)
    }

    async fn platform_of(&self, agent_id: &str) -> Result<Platform, ErrorCode> {
        let conns = self.conns.read().await;
        conns
            .get(agent_id)
            .map(|c| c.descriptor.platform)
            .ok_or(ErrorCode::AgentUnavailable)
    }

    /// Run one agent connection to completion.
    async fn handle_socket(self: Arc<Self>, socket: WebSocket) {
        let (mut ws_tx, mut ws_rx) = socket.split();

        // First frame must be a hello.
        let descriptor = loop {
            match ws_rx.next().await {
                Some(Ok(Message::Text(text))) => {
                    match serde_json::from_str::<AgentFrame>(&text) {
                        Ok(AgentFrame::Hello { agent_id, hostname, platform }) => {
                            break AgentDescriptor { id: agent_id, hostname, platform };
                        }
                        _ => {
                            debug!("agent ws: expected hello, closing");
                            return;
                        }
                    }
                }
                Some(Ok(Message::Ping(_) | Message::Pong(_))) => continue,
                _ => return,
            }
        };

        let agent_id = descriptor.id.clone();
        let conn_seq = self.next_conn_seq.fetch_add(1, Ordering::Relaxed);
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();

        {
            let mut conns = self.conns.write().await;
            if conns
                .insert(
                    agent_id.clone(),
                    AgentConn { conn_seq, descriptor: descriptor.clone(), tx: out_tx },
                )
                .is_some()
            {
                debug!(agent_id, "agent reconnected, replacing prior connection");
            }
        }
        info!(agent_id, hostname = %descriptor.hostname, platform = descriptor.platform.as_str(), "agent connected");
        let _ = self.event_tx.send(GatewayEvent::Discovered(descriptor)).await;
        let _ = self.event_tx.send(GatewayEvent::Online { agent_id: agent_id.clone() }).await;

        loop {
            tokio::select! {
                // Outbound frames → agent.
                frame = out_rx.recv() => {
                    match frame {
                        Some(text) => {
                            if ws_tx.send(Message::Text(text.into())).await.is_err() {
                                debug!(agent_id, "agent ws write failed");
                                break;
                            }
                        }
                        None => break, // connection replaced
                    }
                }

                // Inbound frames ← agent.
                msg = ws_rx.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            self.handle_frame(&agent_id, &text).await;
                        }
                        Some(Ok(Message::Close(_))) | None => {
                            debug!(agent_id, "agent ws closed");
                            break;
                        }
                        Some(Err(e)) => {
                            debug!(agent_id, err = %e, "agent ws error");
                            break;
                        }
                        _ => {} // ping/pong/binary ignored
                    }
                }
            }
        }

        // Only deregister if the map still holds this connection (a reconnect
        // may have replaced it already).
        let removed = {
            let mut conns = self.conns.write().await;
            match conns.get(&agent_id) {
                Some(conn) if conn.conn_seq == conn_seq => {
                    conns.remove(&agent_id);
                    true
                }
                _ => false,
            }
        };
        if removed {
            info!(agent_id, "agent disconnected");
            let _ = self.event_tx.send(GatewayEvent::Offline { agent_id }).await;
        }
    }

    async fn handle_frame(&self, agent_id: &str, text: &str) {
        let frame = match serde_json::from_str::<AgentFrame>(text) {
            Ok(frame) => frame,
            Err(e) => {
                debug!(agent_id, err = %e, "unparseable agent frame");
                return;
            }
        };
        match frame {
            AgentFrame::Hello { .. } => {
                debug!(agent_id, "duplicate hello ignored");
            }
            AgentFrame::Telemetry { monitor_id, payload } => {
                let _ = self
                    .event_tx
                    .send(GatewayEvent::Telemetry {
                        agent_id: agent_id.to_owned(),
                        monitor_id,
                        payload,
                    })
                    .await;
            }
            AgentFrame::ActionResponse { request_id, action_id, success, error, args } => {
                let response = ActionResponse { action_id, success, error, args };
                if let Some(rid) = request_id {
                    if let Some(waiter) = self.pending.lock().await.remove(&rid) {
                        let _ = waiter.send(response.clone());
                    }
                }
                let _ = self
                    .event_tx
                    .send(GatewayEvent::ActionResponse {
                        agent_id: agent_id.to_owned(),
                        response,
                    })
                    .await;
            }
        }
    }
}

impl Gateway for WsGateway {
    fn list_agents(&self) -> Pin<Box<dyn Future<Output = Vec<AgentDescriptor>> + Send + '_>> {
        Box::pin(async move {
            self.conns.read().await.values().map(|c| c.descriptor.clone()).collect()
        })
    }

    fn deploy_monitor(
        &self,
        agent_id: &str,
        spec: MonitorSpec,
    ) -> Pin<Box<dyn Future<Output = Result<(), ErrorCode>> + Send + '_>> {
        let agent_id = agent_id.to_owned();
        Box::pin(async move {
            let platform = self.platform_of(&agent_id).await?;
            let script =
                spec.script.get(platform).ok_or(ErrorCode::InvalidConfig)?.to_owned();
            self.send_frame(
                &agent_id,
                &ServerFrame::MonitorDeploy {
                    monitor_id: spec.monitor_id,
                    interval_ms: spec.interval_ms,
                    script,
                },
            )
            .await
        })
    }

    fn update_monitor(
        &self,
        agent_id: &str,
        monitor_id: &str,
        interval_ms: u64,
    ) -> Pin<Box<dyn Future<Output = Result<(), ErrorCode>> + Send + '_>> {
        let agent_id = agent_id.to_owned();
        let monitor_id = monitor_id.to_owned();
        Box::pin(async move {
            self.send_frame(&agent_id, &ServerFrame::MonitorUpdate { monitor_id, interval_ms })
                .await
        })
    }

    fn remove_monitor(
        &self,
        agent_id: &str,
        monitor_id: &str,
    ) -> Pin<Box<dyn Future<Output = Result<(), ErrorCode>> + Send + '_>> {
        let agent_id = agent_id.to_owned();
        let monitor_id = monitor_id.to_owned();
        Box::pin(async move {
            self.send_frame(&agent_id, &ServerFrame::MonitorRemove { monitor_id }).await
        })
    }

    fn deploy_action(
        &self,
        agent_id: &str,
        spec: ActionSpec,
    ) -> Pin<Box<dyn Future<Output = Result<(), ErrorCode>> + Send + '_>> {
        let agent_id = agent_id.to_owned();
        Box::pin(async move {
            let platform = self.platform_of(&agent_id).await?;
            let script =
                spec.script.get(platform).ok_or(ErrorCode::InvalidConfig)?.to_owned();
            self.send_frame(
                &agent_id,
                &ServerFrame::ActionDeploy { action_id: spec.action_id, script },
            )
            .await
        })
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
            let request_id = self.next_rid.fetch_add(1, Ordering::Relaxed);
            let (tx, rx) = oneshot::channel();
            self.pending.lock().await.insert(request_id, tx);

            let sent = self
                .send_frame(
                    &agent_id,
                    &ServerFrame::ActionTrigger {
                        request_id,
                        action_id: action_id.clone(),
                        args,
                    },
                )
                .await;
            if let Err(code) = sent {
                self.pending.lock().await.remove(&request_id);
                return Err(code);
            }

            match tokio::time::timeout(self.action_timeout, rx).await {
                Ok(Ok(response)) => Ok(response),
                Ok(Err(_)) | Err(_) => {
                    self.pending.lock().await.remove(&request_id);
                    warn!(agent_id, action_id, "action timed out or channel dropped");
                    Err(ErrorCode::AgentUnavailable)
                }
            }
        })
    }
}

// -- axum handler -------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct AgentWsQuery {
    pub token: Option<String>,
}

/// `GET /ws/agent`: upgrade an agent connection into the hub.
pub async fn agent_ws_handler(
    State(store): State<Arc<Store>>,
    Query(query): Query<AgentWsQuery>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    if let Some(ref required) = store.runtime.auth_token {
        if query.token.as_deref() != Some(required.as_str()) {
            return ErrorCode::Unauthorized.to_http_response("invalid token").into_response();
        }
    }
    let Some(hub) = store.ws_hub.clone() else {
        return ErrorCode::Internal.to_http_response("gateway not running").into_response();
    };
    ws.on_upgrade(move |socket| hub.handle_socket(socket)).into_response()
}

#[cfg(test)]
#[path = "ws_tests.rs"]
mod tests;
