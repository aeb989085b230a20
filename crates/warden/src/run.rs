// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Top-level wiring: build the store, gateway, oracle, and supervisor, then
//! serve until shutdown.

use std::collections::HashMap;
use std::sync::atomic::AtomicU64;
use std::sync::Arc;
use std::time::Instant;

use tokio::net::TcpListener;
use tokio::sync::{mpsc, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::api::build_router;
use crate::config::Config;
use crate::event::Event;
use crate::gateway::ws::WsGateway;
use crate::gateway::Gateway;
use crate::journal::Journal;
use crate::oracle::{self, HttpOracle, VerdictCache};
use crate::persist;
use crate::planner::Planner;
use crate::state::{RuntimeSettings, Store};
use crate::supervisor::Supervisor;
use crate::timers::TimerTable;
use crate::usage::UsageLedger;

/// Initialize tracing/logging from config.
///
/// Uses `try_init` so it's safe to call multiple times (e.g. from tests).
pub fn init_tracing(config: &Config) {
    use tracing_subscriber::fmt;

    // Priority: --log-level / WARDEN_LOG_LEVEL > RUST_LOG > default ("info").
    let filter = if std::env::var("WARDEN_LOG_LEVEL").is_err() && config.log_level == "info" {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level))
    } else {
        EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"))
    };

    let result = match config.log_format.as_str() {
        "json" => fmt::fmt().with_env_filter(filter).json().try_init(),
        _ => fmt::fmt().with_env_filter(filter).try_init(),
    };
    drop(result);
}

/// Install the ring crypto provider for reqwest/rustls.
/// Safe to call multiple times; only the first call has effect.
fn ensure_crypto() {
    static CRYPTO_INIT: std::sync::Once = std::sync::Once::new();
    CRYPTO_INIT.call_once(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}

/// Run the control plane until shutdown.
pub async fn run(config: Config) -> anyhow::Result<()> {
    init_tracing(&config);
    ensure_crypto();

    let shutdown = CancellationToken::new();

    // Channels: gateway events, unified supervisor events, timer fires,
    // oracle state changes.
    let (gw_tx, mut gw_rx) = mpsc::channel(256);
    let (events_tx, events_rx) = mpsc::channel(256);
    let (fire_tx, fire_rx) = mpsc::channel(64);
    let (change_tx, change_rx) = mpsc::channel(64);

    let hub = WsGateway::new(gw_tx);
    let gateway: Arc<dyn Gateway> = hub.clone();

    let state_path = (!config.no_persist).then(|| config.state_path.clone());
    let store = Arc::new(Store {
        registry: RwLock::new(HashMap::new()),
        children: RwLock::new(HashMap::new()),
        settings: RwLock::new(Default::default()),
        usage: RwLock::new(UsageLedger::new()),
        journal: Journal::new(),
        timers: TimerTable::new(fire_tx),
        events_tx: events_tx.clone(),
        ws_hub: Some(hub),
        shutdown: shutdown.clone(),
        runtime: RuntimeSettings {
            auth_token: config.auth_token.clone(),
            state_path,
            started_at: Instant::now(),
        },
        last_sync_ms: AtomicU64::new(0),
    });

    // Reload the persisted blob; missing fields come back as defaults.
    if let Some(ref path) = store.runtime.state_path {
        match persist::load(path) {
            Ok(state) => {
                persist::hydrate(&store, state).await;
                info!(path = %path.display(), "state loaded");
            }
            Err(e) => {
                error!(err = %e, path = %path.display(), "state load failed, starting fresh");
            }
        }
    }

    // Bridge gateway events into the unified supervisor stream.
    {
        let events_tx = events_tx.clone();
        let sd = shutdown.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = sd.cancelled() => break,
                    event = gw_rx.recv() => {
                        match event {
                            Some(event) => {
                                let _ = events_tx.send(Event::Gateway(event)).await;
                            }
                            None => break,
                        }
                    }
                }
            }
        });
    }

    // Oracle client, cache, and state-change subscription. Pushed changes
    // join the ordered event stream.
    let oracle_client =
        Arc::new(HttpOracle::new(config.oracle_url.clone(), config.oracle_token.clone()));
    let cache = Arc::new(VerdictCache::default());
    oracle::spawn_state_watcher(config.effective_oracle_ws_url(), change_tx, shutdown.clone());
    {
        let events_tx = events_tx.clone();
        let sd = shutdown.clone();
        let mut change_rx = change_rx;
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = sd.cancelled() => break,
                    child_id = change_rx.recv() => {
                        match child_id {
                            Some(child_id) => {
                                let _ = events_tx.send(Event::OracleChanged { child_id }).await;
                            }
                            None => break,
                        }
                    }
                }
            }
        });
    }

    // Supervisor loop.
    let planner = Planner::new(oracle_client, Arc::clone(&cache));
    let supervisor = Supervisor::new(Arc::clone(&store), gateway, planner, events_rx, fire_rx);
    tokio::spawn(supervisor.run());

    // HTTP/WS server. A failed bind is fatal: without the gateway listener
    // there is nothing to supervise.
    let addr = format!("{}:{}", config.host, config.port);
    let listener = TcpListener::bind(&addr).await.map_err(|e| {
        anyhow::anyhow!("cannot bind gateway listener on {addr}: {e}")
    })?;
    info!("listening on {}", listener.local_addr()?);

    // Signal handler: first signal drains gracefully, second forces exit.
    {
        let sd = shutdown.clone();
        tokio::spawn(async move {
            let mut sigterm =
                tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()).ok();
            let mut sigint =
                tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt()).ok();

            tokio::select! {
                _ = async {
                    if let Some(ref mut s) = sigterm { s.recv().await } else { std::future::pending().await }
                } => {
                    info!("received SIGTERM");
                }
                _ = async {
                    if let Some(ref mut s) = sigint { s.recv().await } else { std::future::pending().await }
                } => {
                    info!("received SIGINT");
                }
            }
            sd.cancel();

            tokio::select! {
                _ = async {
                    if let Some(ref mut s) = sigterm { s.recv().await } else { std::future::pending().await }
                } => {
                    info!("received SIGTERM again, forcing exit");
                }
                _ = async {
                    if let Some(ref mut s) = sigint { s.recv().await } else { std::future::pending().await }
                } => {
                    info!("received SIGINT again, forcing exit");
                }
            }
            std::process::exit(130);
        });
    }

    let router = build_router(Arc::clone(&store));
    axum::serve(listener, router).with_graceful_shutdown(shutdown.cancelled_owned()).await?;

    // Final persist after the server drains.
    persist::save(&store).await;
    Ok(())
}
