//! Client configuration.
//!
//! Defaults match the stock relay (`ws://localhost:8000`). Values can be
//! layered from a JSON document or from `LIVESHARE_*` environment variables.

use serde::Deserialize;
use std::time::Duration;

use liveshare_core::{Capabilities, ValidationError};

pub const ENV_SERVER_URL: &str = "LIVESHARE_SERVER_URL";
pub const ENV_DISPLAY_NAME: &str = "LIVESHARE_DISPLAY_NAME";
pub const ENV_MAX_RECONNECTS: &str = "LIVESHARE_MAX_RECONNECTS";
pub const ENV_DEBOUNCE_MS: &str = "LIVESHARE_DEBOUNCE_MS";
pub const ENV_THROTTLE_MS: &str = "LIVESHARE_THROTTLE_MS";

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SyncConfig {
    /// Relay server URL
    pub server_url: String,
    /// Name shown to other participants
    pub display_name: String,
    /// Reconnect attempts after an unexpected close before giving up
    pub max_reconnect_attempts: u32,
    /// Backoff unit: attempt `n` waits `base * 2^n`
    pub reconnect_base_ms: u64,
    /// Bound on opening the connection (and on waiting for the join ack)
    pub connect_timeout_ms: u64,
    /// Quiet window for batching local edits
    pub debounce_ms: u64,
    /// Minimum gap between outgoing cursor updates
    pub cursor_throttle_ms: u64,
    /// How many applied operation ids are remembered for dedup
    pub seen_operation_capacity: usize,
    pub capabilities: Capabilities,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            server_url: "ws://localhost:8000".to_string(),
            display_name: default_display_name(),
            max_reconnect_attempts: 5,
            reconnect_base_ms: 1_000,
            connect_timeout_ms: 10_000,
            debounce_ms: 50,
            cursor_throttle_ms: 100,
            seen_operation_capacity: 4_096,
            capabilities: Capabilities::default(),
        }
    }
}

impl SyncConfig {
    /// Parse a (possibly partial) JSON config; missing keys keep defaults.
    pub fn from_json_str(json: &str) -> Result<Self, ValidationError> {
        serde_json::from_str(json).map_err(|e| ValidationError::InvalidSetting {
            key: "config".to_string(),
            value: e.to_string(),
        })
    }

    /// Defaults overridden by `LIVESHARE_*` environment variables.
    pub fn from_env() -> Result<Self, ValidationError> {
        Self::default().with_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from any key/value source.
    pub fn with_overrides(
        mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ValidationError> {
        if let Some(url) = lookup(ENV_SERVER_URL) {
            self.server_url = url;
        }
        if let Some(name) = lookup(ENV_DISPLAY_NAME).filter(|n| !n.trim().is_empty()) {
            self.display_name = name;
        }
        if let Some(raw) = lookup(ENV_MAX_RECONNECTS) {
            self.max_reconnect_attempts = parse_number(ENV_MAX_RECONNECTS, &raw)?;
        }
        if let Some(raw) = lookup(ENV_DEBOUNCE_MS) {
            self.debounce_ms = parse_number(ENV_DEBOUNCE_MS, &raw)?;
        }
        if let Some(raw) = lookup(ENV_THROTTLE_MS) {
            self.cursor_throttle_ms = parse_number(ENV_THROTTLE_MS, &raw)?;
        }
        Ok(self)
    }

    pub fn reconnect_base(&self) -> Duration {
        Duration::from_millis(self.reconnect_base_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn cursor_throttle(&self) -> Duration {
        Duration::from_millis(self.cursor_throttle_ms)
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T, ValidationError> {
    raw.trim().parse().map_err(|_| ValidationError::InvalidSetting {
        key: key.to_string(),
        value: raw.to_string(),
    })
}

fn default_display_name() -> String {
    std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .ok()
        .filter(|n| !n.trim().is_empty())
        .unwrap_or_else(|| "Anonymous".to_string())
}
