// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::path::PathBuf;

use clap::Parser;

/// Parental-controls fleet control plane.
#[derive(Debug, Clone, Parser)]
#[command(name = "warden", version, about)]
pub struct Config {
    /// Host address to bind to.
    #[arg(long, env = "WARDEN_HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// HTTP/WebSocket port to listen on.
    #[arg(long, env = "WARDEN_PORT", default_value = "7310")]
    pub port: u16,

    /// Base URL of the quota/permission oracle.
    #[arg(long, env = "WARDEN_ORACLE_URL")]
    pub oracle_url: String,

    /// WebSocket URL for oracle state-change events.
    /// Defaults to `<oracle_url>/ws/events` with the scheme swapped.
    #[arg(long, env = "WARDEN_ORACLE_WS_URL")]
    pub oracle_ws_url: Option<String>,

    /// Bearer token for oracle requests.
    #[arg(long, env = "WARDEN_ORACLE_TOKEN")]
    pub oracle_token: Option<String>,

    /// Bearer token required from API and WebSocket clients.
    #[arg(long, env = "WARDEN_AUTH_TOKEN")]
    pub auth_token: Option<String>,

    /// Path of the persisted configuration blob.
    #[arg(long, env = "WARDEN_STATE_PATH", default_value = "warden-state.json")]
    pub state_path: PathBuf,

    /// Disable persistence (state lives in memory only).
    #[arg(long, env = "WARDEN_NO_PERSIST", default_value = "false")]
    pub no_persist: bool,

    /// Log format (json or text).
    #[arg(long, env = "WARDEN_LOG_FORMAT", default_value = "json")]
    pub log_format: String,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, env = "WARDEN_LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

impl Config {
    /// Validate the configuration after parsing.
    pub fn validate(&self) -> anyhow::Result<()> {
        if !self.oracle_url.starts_with("http://") && !self.oracle_url.starts_with("https://") {
            anyhow::bail!("--oracle-url must be an http(s) URL");
        }
        if let Some(ref ws) = self.oracle_ws_url {
            if !ws.starts_with("ws://") && !ws.starts_with("wss://") {
                anyhow::bail!("--oracle-ws-url must be a ws(s) URL");
            }
        }
        match self.log_format.as_str() {
            "json" | "text" => {}
            other => anyhow::bail!("invalid log format: {other}"),
        }
        Ok(())
    }

    /// Resolve the oracle event-stream URL.
    pub fn effective_oracle_ws_url(&self) -> String {
        match self.oracle_ws_url {
            Some(ref url) => url.clone(),
            None => {
                let ws_base = if self.oracle_url.starts_with("https://") {
                    self.oracle_url.replacen("https://", "wss://", 1)
                } else {
                    self.oracle_url.replacen("http://", "ws://", 1)
                };
                format!("{ws_base}/ws/events")
            }
        }
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
