use anyhow::Context;
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

/// Engine-wide defaults. Targets that omit a value fall back to these.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineConfig {
    /// Seconds between two ticks when a target does not set its own
    /// polling interval.
    pub default_polling_interval_secs: u64,
    /// Seconds after the last activity before scale-to-zero is allowed.
    pub default_cooldown_period_secs: u64,
    /// Per-trigger HTTP timeout handed to adapters.
    pub default_http_timeout_ms: u64,
    /// Capacity of the bounded per-adapter push activation channel.
    pub push_channel_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            default_polling_interval_secs: 30,
            default_cooldown_period_secs: 300,
            default_http_timeout_ms: 3000,
            push_channel_capacity: 16,
        }
    }
}

impl EngineConfig {
    /// Layer the optional config file under environment overrides.
    pub fn load() -> Self {
        Config::builder()
            .add_source(File::with_name("/etc/scaling/engine.yaml").required(false))
            .add_source(Environment::default())
            .build()
            .unwrap_or_default()
            .try_deserialize::<EngineConfig>()
            .with_context(|| "Failed to parse engine config".to_string())
            .unwrap_or_default()
    }
}
