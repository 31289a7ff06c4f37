/// Configuration management for the geoflow engine
///
/// Handles server configuration, runtime tuning for HTTP nodes and event
/// streaming, and process-level secrets available to header templates.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Environment variable prefix for secrets exposed to header templates
const SECRET_PREFIX: &str = "GEOFLOW_SECRET_";

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Server configuration
    pub server: ServerConfig,
    /// Pipeline runtime configuration
    pub runtime: RuntimeConfig,
    /// Secrets by lower-cased name (from GEOFLOW_SECRET_<NAME>)
    /// Never serialized back out.
    #[serde(skip_serializing, default)]
    pub secrets: BTreeMap<String, String>,
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Server bind address (e.g., "0.0.0.0")
    pub host: String,
    /// Server port number
    pub port: u16,
}

/// Runtime knobs for the execution engine and HTTP node runner
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Use canned API responses when a run request doesn't say otherwise
    pub default_use_mocks: bool,
    /// Per-call timeout when a node declares no `timeout_ms`
    pub http_timeout_ms: u64,
    /// Polite gap between consecutive fan-out dispatches
    pub fanout_dispatch_delay_ms: u64,
    /// Simulated latency of a mocked call
    pub mock_delay_ms: u64,
    /// Per-run broadcast buffer size
    pub event_buffer: usize,
    /// How long an idle run channel may live before it is swept
    pub subscriber_ttl_secs: u64,
    /// User-Agent sent on every outbound request
    pub user_agent: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            default_use_mocks: false,
            http_timeout_ms: 10_000,
            fanout_dispatch_delay_ms: 50,
            mock_delay_ms: 120,
            event_buffer: 256,
            subscriber_ttl_secs: 600,
            user_agent: format!("geoflow/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl Default for Config {
    /// Default configuration with ENV_VAR support for k8s/container deployment
    fn default() -> Self {
        let defaults = RuntimeConfig::default();

        Self {
            server: ServerConfig {
                host: std::env::var("GEOFLOW_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                port: env_parse("GEOFLOW_PORT", 3004),
            },
            runtime: RuntimeConfig {
                default_use_mocks: env_flag("GEOFLOW_USE_MOCKS", defaults.default_use_mocks),
                http_timeout_ms: env_parse("GEOFLOW_HTTP_TIMEOUT_MS", defaults.http_timeout_ms),
                fanout_dispatch_delay_ms: env_parse("GEOFLOW_FANOUT_DELAY_MS", defaults.fanout_dispatch_delay_ms),
                mock_delay_ms: env_parse("GEOFLOW_MOCK_DELAY_MS", defaults.mock_delay_ms),
                event_buffer: env_parse("GEOFLOW_EVENT_BUFFER", defaults.event_buffer),
                subscriber_ttl_secs: env_parse("GEOFLOW_SUBSCRIBER_TTL_SECS", defaults.subscriber_ttl_secs),
                user_agent: std::env::var("GEOFLOW_USER_AGENT").unwrap_or(defaults.user_agent),
            },
            secrets: secrets_from_env(std::env::vars()),
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, fallback: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|raw| raw.trim().parse().ok())
        .unwrap_or(fallback)
}

fn env_flag(key: &str, fallback: bool) -> bool {
    match std::env::var(key) {
        Ok(raw) => matches!(raw.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"),
        Err(_) => fallback,
    }
}

/// Collect GEOFLOW_SECRET_* variables, keyed by lower-cased suffix
fn secrets_from_env(vars: impl Iterator<Item = (String, String)>) -> BTreeMap<String, String> {
    vars.filter_map(|(key, value)| {
        key.strip_prefix(SECRET_PREFIX)
            .filter(|name| !name.is_empty())
            .map(|name| (name.to_ascii_lowercase(), value))
    })
    .collect()
}
