// =============================================================================
// Runtime Configuration — console endpoints, backoff and API settings
// =============================================================================
//
// Loaded from a JSON file with every field carrying `#[serde(default)]`, so an
// older file missing new fields still loads. Secrets (upstream token) are read
// from the environment only and never written back to disk.
//
// Persistence uses an atomic tmp + rename pattern to prevent corruption on
// crash.
// =============================================================================

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::types::ChannelName;

// =============================================================================
// Default-value helpers (required by serde `default = "..."` attribute)
// =============================================================================

fn default_api_base_url() -> String {
    "http://localhost:8000".to_string()
}

fn default_ws_host() -> String {
    "ws://localhost:8000".to_string()
}

fn default_bind_addr() -> String {
    "127.0.0.1:3001".to_string()
}

fn default_connect_timeout_ms() -> u64 {
    10_000
}

fn default_request_timeout_ms() -> u64 {
    10_000
}

fn default_base_delay_ms() -> u64 {
    500
}

fn default_max_delay_ms() -> u64 {
    30_000
}

fn default_multiplier() -> f64 {
    2.0
}

// =============================================================================
// BackoffParams
// =============================================================================

/// Reconnection backoff curve: `base * multiplier^n`, capped at `max`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackoffParams {
    /// Delay before the first retry after an unintended close.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Upper bound for any single retry delay.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Growth factor between consecutive failures. Values below 1.0 are
    /// treated as 1.0 so the curve never shrinks.
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
}

impl Default for BackoffParams {
    fn default() -> Self {
        Self {
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            multiplier: default_multiplier(),
        }
    }
}

// =============================================================================
// RuntimeConfig
// =============================================================================

/// Top-level configuration of the console process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    // --- Upstream peer ------------------------------------------------------

    /// Base URL of the REST endpoints serving initial snapshots.
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,

    /// Scheme + host of the streaming endpoints (`ws://host:port`).
    #[serde(default = "default_ws_host")]
    pub ws_host: String,

    /// Bearer token attached to REST calls and, as `?token=`, to channel
    /// endpoints. Environment only.
    #[serde(skip)]
    pub upstream_token: Option<String>,

    // --- Channels -----------------------------------------------------------

    /// Time allowed for a channel transport to open before the attempt counts
    /// as a failure.
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Timeout applied to each REST snapshot request.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    #[serde(default)]
    pub backoff: BackoffParams,

    // --- Downstream API -----------------------------------------------------

    /// Address the local view API binds to.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            api_base_url: default_api_base_url(),
            ws_host: default_ws_host(),
            upstream_token: None,
            connect_timeout_ms: default_connect_timeout_ms(),
            request_timeout_ms: default_request_timeout_ms(),
            backoff: BackoffParams::default(),
            bind_addr: default_bind_addr(),
        }
    }
}

impl RuntimeConfig {
    /// Load configuration from a JSON file at `path`.
    ///
    /// If the file does not exist, returns an error so the caller can fall
    /// back to defaults with a warning.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read runtime config from {}", path.display()))?;

        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse runtime config from {}", path.display()))?;

        info!(
            path = %path.display(),
            api_base_url = %config.api_base_url,
            ws_host = %config.ws_host,
            "runtime config loaded"
        );

        Ok(config)
    }

    /// Persist the current configuration to `path` using an atomic write
    /// (write to `.tmp`, then rename).
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        let content = serde_json::to_string_pretty(self)
            .context("failed to serialise runtime config to JSON")?;

        let tmp_path = path.with_extension("json.tmp");

        std::fs::write(&tmp_path, &content)
            .with_context(|| format!("failed to write tmp config to {}", tmp_path.display()))?;

        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("failed to rename tmp config to {}", path.display()))?;

        info!(path = %path.display(), "runtime config saved (atomic)");
        Ok(())
    }

    /// Apply `CONSOLE_*` environment overrides on top of the file values.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let non_empty = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        if let Some(url) = non_empty("CONSOLE_API_BASE_URL") {
            self.api_base_url = url;
        }
        if let Some(host) = non_empty("CONSOLE_WS_HOST") {
            self.ws_host = host;
        }
        if let Some(addr) = non_empty("CONSOLE_BIND_ADDR") {
            self.bind_addr = addr;
        }
        self.upstream_token = non_empty("CONSOLE_UPSTREAM_TOKEN");
    }

    /// Streaming endpoint for `channel`, e.g. `ws://host/ws/ticks`.
    pub fn channel_endpoint(&self, channel: ChannelName) -> String {
        let host = self.ws_host.trim_end_matches('/');
        let base = format!("{host}/ws/{}", channel.as_str());
        let Some(token) = &self.upstream_token else {
            return base;
        };
        match reqwest::Url::parse(&base) {
            Ok(mut url) => {
                url.query_pairs_mut().append_pair("token", token);
                url.to_string()
            }
            Err(e) => {
                warn!(endpoint = %base, error = %e, "invalid channel endpoint; token not attached");
                base
            }
        }
    }

    /// REST collection URL, e.g. `http://host/positions`.
    pub fn rest_endpoint(&self, collection: &str) -> String {
        format!("{}/{}", self.api_base_url.trim_end_matches('/'), collection)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_expected_values() {
        let cfg = RuntimeConfig::default();
        assert_eq!(cfg.bind_addr, "127.0.0.1:3001");
        assert_eq!(cfg.backoff.base_delay_ms, 500);
        assert_eq!(cfg.backoff.max_delay_ms, 30_000);
        assert!((cfg.backoff.multiplier - 2.0).abs() < f64::EPSILON);
        assert!(cfg.upstream_token.is_none());
    }

    #[test]
    fn deserialise_partial_json_fills_defaults() {
        let json = r#"{ "ws_host": "wss://feed.example", "backoff": { "max_delay_ms": 5000 } }"#;
        let cfg: RuntimeConfig = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.ws_host, "wss://feed.example");
        assert_eq!(cfg.backoff.max_delay_ms, 5000);
        assert_eq!(cfg.backoff.base_delay_ms, 500);
        assert_eq!(cfg.connect_timeout_ms, 10_000);
    }

    #[test]
    fn channel_endpoints_derive_from_host() {
        let mut cfg = RuntimeConfig::default();
        cfg.ws_host = "ws://feed.local:9000/".into();
        assert_eq!(cfg.channel_endpoint(ChannelName::Ticks), "ws://feed.local:9000/ws/ticks");
        assert_eq!(cfg.channel_endpoint(ChannelName::Orders), "ws://feed.local:9000/ws/orders");

        cfg.upstream_token = Some("abc".into());
        assert_eq!(
            cfg.channel_endpoint(ChannelName::Ticks),
            "ws://feed.local:9000/ws/ticks?token=abc"
        );
    }

    #[test]
    fn channel_token_is_percent_encoded() {
        let mut cfg = RuntimeConfig::default();
        cfg.ws_host = "ws://feed.local:9000".into();
        cfg.upstream_token = Some("a&b#c+d e".into());

        let endpoint = cfg.channel_endpoint(ChannelName::Orders);
        let url = reqwest::Url::parse(&endpoint).unwrap();
        assert_eq!(url.path(), "/ws/orders");
        assert!(url.fragment().is_none());
        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert_eq!(pairs, vec![("token".to_string(), "a&b#c+d e".to_string())]);
    }

    #[test]
    fn env_overrides_ignore_blank_values() {
        let mut cfg = RuntimeConfig::default();
        cfg.apply_overrides(|key| match key {
            "CONSOLE_WS_HOST" => Some("ws://other".into()),
            "CONSOLE_API_BASE_URL" => Some("   ".into()),
            "CONSOLE_UPSTREAM_TOKEN" => Some("secret".into()),
            _ => None,
        });
        assert_eq!(cfg.ws_host, "ws://other");
        assert_eq!(cfg.api_base_url, "http://localhost:8000");
        assert_eq!(cfg.upstream_token.as_deref(), Some("secret"));
    }

    #[test]
    fn token_is_never_serialised() {
        let mut cfg = RuntimeConfig::default();
        cfg.upstream_token = Some("secret".into());
        let json = serde_json::to_string(&cfg).unwrap();
        assert!(!json.contains("secret"));
    }
}
