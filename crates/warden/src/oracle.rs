// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Client for the external quota/permission oracle.
//!
//! `check` is non-mutating (`check_only`); the oracle decrements quota on its
//! own side. A verdict cache fronts the transport: on outage the prior
//! verdict stays authoritative for the TTL, after which read surfaces flag it
//! stale and enforcement defers.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::ErrorCode;
use crate::model::Activity;

/// How long a cached verdict may stand in for an unreachable oracle.
pub const VERDICT_TTL: Duration = Duration::from_secs(60);

/// Oracle answer for one (child, activity) pair.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Verdict {
    pub allowed: bool,
    #[serde(default)]
    pub banned: bool,
    #[serde(default)]
    pub remaining_seconds: i64,
    #[serde(default)]
    pub as_of_ms: u64,
}

type OracleFuture<'a> = Pin<Box<dyn Future<Output = Result<Verdict, ErrorCode>> + Send + 'a>>;

/// Quota/permission authority. Object-safe so tests can script it.
pub trait Oracle: Send + Sync + 'static {
    fn check(&self, child_id: &str, activity: Activity) -> OracleFuture<'_>;
}

// -- HTTP client --------------------------------------------------------------

/// JSON-over-HTTP oracle client.
pub struct HttpOracle {
    base_url: String,
    auth_token: Option<String>,
    client: reqwest::Client,
}

impl HttpOracle {
    pub fn new(base_url: String, auth_token: Option<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();
        Self { base_url, auth_token, client }
    }
}

impl Oracle for HttpOracle {
    fn check(&self, child_id: &str, activity: Activity) -> OracleFuture<'_> {
        let url = format!(
            "{}/api/v1/check?child={}&activity={}&check_only=true",
            self.base_url,
            child_id,
            activity.as_str()
        );
        Box::pin(async move {
            let mut req = self.client.get(&url);
            if let Some(ref token) = self.auth_token {
                req = req.bearer_auth(token);
            }
            let resp = req.send().await.map_err(|e| {
                debug!(err = %e, "oracle check transport error");
                ErrorCode::OracleUnavailable
            })?;
            let resp = resp.error_for_status().map_err(|e| {
                debug!(err = %e, "oracle check http error");
                ErrorCode::OracleUnavailable
            })?;
            resp.json::<Verdict>().await.map_err(|e| {
                debug!(err = %e, "oracle check bad body");
                ErrorCode::OracleUnavailable
            })
        })
    }
}

// -- Verdict cache ------------------------------------------------------------

/// Result of a cache-fronted check.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CacheOutcome {
    /// A live verdict, or a cached one still inside the TTL.
    Fresh(Verdict),
    /// The oracle is down and the cached verdict has outlived the TTL.
    /// Read surfaces may show it; enforcement must defer.
    Stale(Verdict),
    /// The oracle is down and nothing is cached.
    Unavailable,
}

struct CachedVerdict {
    verdict: Verdict,
    fetched_at: Instant,
}

/// TTL cache over an [`Oracle`].
pub struct VerdictCache {
    entries: Mutex<HashMap<(String, Activity), CachedVerdict>>,
    ttl: Duration,
}

impl Default for VerdictCache {
    fn default() -> Self {
        Self::new(VERDICT_TTL)
    }
}

impl VerdictCache {
    pub fn new(ttl: Duration) -> Self {
        Self { entries: Mutex::new(HashMap::new()), ttl }
    }

    /// Check via the oracle, falling back to the cache on outage.
    pub async fn check(
        &self,
        oracle: &dyn Oracle,
        child_id: &str,
        activity: Activity,
    ) -> CacheOutcome {
        match oracle.check(child_id, activity).await {
            Ok(verdict) => {
                if let Ok(mut entries) = self.entries.lock() {
                    entries.insert(
                        (child_id.to_owned(), activity),
                        CachedVerdict { verdict, fetched_at: Instant::now() },
                    );
                }
                CacheOutcome::Fresh(verdict)
            }
            Err(_) => {
                let Ok(entries) = self.entries.lock() else {
                    return CacheOutcome::Unavailable;
                };
                match entries.get(&(child_id.to_owned(), activity)) {
                    Some(cached) if cached.fetched_at.elapsed() <= self.ttl => {
                        CacheOutcome::Fresh(cached.verdict)
                    }
                    Some(cached) => CacheOutcome::Stale(cached.verdict),
                    None => CacheOutcome::Unavailable,
                }
            }
        }
    }

    /// Drop every cached verdict for a child (oracle state change).
    pub fn invalidate_child(&self, child_id: &str) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.retain(|(c, _), _| c != child_id);
        }
    }
}

// -- State-change watcher -----------------------------------------------------

#[derive(Debug, Deserialize)]
struct StateChangeFrame {
    #[serde(default)]
    event: String,
    #[serde(default)]
    child_id: String,
}

/// Spawn the push-subscription task: connects to the oracle's event WS and
/// forwards `state_change` notifications, reconnecting with exponential
/// backoff.
pub fn spawn_state_watcher(
    ws_url: String,
    change_tx: mpsc::Sender<String>,
    cancel: CancellationToken,
) {
    tokio::spawn(async move {
        let mut backoff_ms = 100u64;
        let max_backoff_ms = 5000u64;

        loop {
            if cancel.is_cancelled() {
                break;
            }

            match tokio_tungstenite::connect_async(&ws_url).await {
                Ok((ws_stream, _)) => {
                    backoff_ms = 100;
                    debug!("oracle event stream connected");
                    let (_, mut read) = ws_stream.split();

                    loop {
                        tokio::select! {
                            _ = cancel.cancelled() => return,
                            msg = read.next() => {
                                match msg {
                                    Some(Ok(Message::Text(text))) => {
                                        if let Ok(frame) = serde_json::from_str::<StateChangeFrame>(&text) {
                                            if frame.event == "state_change" && !frame.child_id.is_empty() {
                                                let _ = change_tx.send(frame.child_id).await;
                                            }
                                        }
                                    }
                                    Some(Ok(Message::Close(_))) | None => {
                                        debug!("oracle event stream closed");
                                        break;
                                    }
                                    Some(Err(e)) => {
                                        debug!(err = %e, "oracle event stream error");
                                        break;
                                    }
                                    _ => {}
                                }
                            }
                        }
                    }
                }
                Err(e) => {
                    warn!(err = %e, backoff_ms, "oracle event stream connect failed, retrying");
                }
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(Duration::from_millis(backoff_ms)) => {}
            }
            backoff_ms = (backoff_ms * 2).min(max_backoff_ms);
        }
    });
}

#[cfg(test)]
#[path = "oracle_tests.rs"]
mod tests;
