// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! UI event WebSocket: a read-only subscription bus fanning journal events
//! out to parent-UI clients on their named channels.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;

use crate::error::ErrorCode;
use crate::journal::UiEvent;
use crate::state::Store;

#[derive(Debug, Deserialize)]
pub struct EventsQuery {
    pub token: Option<String>,
    /// Comma-separated channel names; absent or `"all"` forwards everything.
    pub channels: Option<String>,
}

/// Channel filter parsed from the query string.
struct ChannelFilter {
    all: bool,
    names: Vec<String>,
}

impl ChannelFilter {
    fn new(channels: Option<&str>) -> Self {
        match channels {
            None | Some("all") | Some("") => Self { all: true, names: vec![] },
            Some(csv) => Self {
                all: false,
                names: csv.split(',').map(|s| s.trim().to_owned()).collect(),
            },
        }
    }

    fn wants(&self, event: &UiEvent) -> bool {
        self.all || self.names.iter().any(|n| n == event.channel.as_str())
    }
}

#[derive(Debug, Serialize)]
struct WireEvent<'a> {
    channel: &'static str,
    payload: &'a serde_json::Value,
}

/// `GET /ws/events`: stream journal events to a UI client.
pub async fn events_ws_handler(
    State(store): State<Arc<Store>>,
    Query(query): Query<EventsQuery>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    if let Some(ref required) = store.runtime.auth_token {
        if query.token.as_deref() != Some(required.as_str()) {
            return ErrorCode::Unauthorized.to_http_response("invalid token").into_response();
        }
    }
    let filter = ChannelFilter::new(query.channels.as_deref());
    ws.on_upgrade(move |socket| handle_connection(store, filter, socket)).into_response()
}

async fn handle_connection(store: Arc<Store>, filter: ChannelFilter, socket: WebSocket) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let mut events = store.journal.subscribe();

    loop {
        tokio::select! {
            _ = store.shutdown.cancelled() => break,

            event = events.recv() => {
                match event {
                    Ok(event) => {
                        if !filter.wants(&event) {
                            continue;
                        }
                        let wire = WireEvent {
                            channel: event.channel.as_str(),
                            payload: &event.payload,
                        };
                        let Ok(text) = serde_json::to_string(&wire) else { continue };
                        if ws_tx.send(Message::Text(text.into())).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        debug!("ui events subscriber lagged by {n}");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }

            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(_)) => break,
                    _ => {} // inbound frames ignored; this bus is read-only
                }
            }
        }
    }
}

#[cfg(test)]
#[path = "ws_tests.rs"]
mod tests;
