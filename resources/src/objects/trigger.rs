use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::metrics::MetricType;

/// User-declared source of scale input, bound to one adapter instance.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TriggerSpec {
    /// Adapter kind, e.g. "rabbitmq" or "prometheus".
    #[serde(rename = "type")]
    pub type_: String,
    /// Name referenced by a scaling formula. May be empty when no formula
    /// is declared on the target.
    #[serde(default)]
    pub name: String,
    /// Adapter-specific settings, passed through unparsed.
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    #[serde(default)]
    pub auth_ref: Option<AuthRef>,
    /// Serve on-demand metric queries from the most recent tick's result
    /// instead of sampling the source again.
    #[serde(default)]
    pub use_cached_metrics: bool,
    #[serde(default)]
    pub metric_type: MetricType,
}

impl TriggerSpec {
    /// Cpu/memory triggers are served by the cluster itself and never
    /// alone justify scaling to zero.
    pub fn is_resource_type(&self) -> bool {
        self.type_.eq_ignore_ascii_case("cpu") || self.type_.eq_ignore_ascii_case("memory")
    }
}

/// Reference to an authentication object resolved by the auth resolver.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct AuthRef {
    pub name: String,
}

/// When a formula is declared, every trigger must carry a unique,
/// non-empty name so it can be addressed from the expression.
pub fn validate_trigger_names(triggers: &[TriggerSpec]) -> anyhow::Result<()> {
    let mut seen = std::collections::HashSet::new();
    for trigger in triggers {
        if trigger.name.is_empty() {
            anyhow::bail!("trigger of type {} has no name", trigger.type_);
        }
        if !seen.insert(trigger.name.as_str()) {
            anyhow::bail!("trigger name {} is declared twice", trigger.name);
        }
    }
    Ok(())
}
