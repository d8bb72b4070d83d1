use std::collections::HashMap;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use super::{
    fallback::FallbackSpec,
    metrics::{Condition, HealthStatus},
    modifiers::ScalingModifiers,
    trigger::{validate_trigger_names, TriggerSpec},
    Metadata, Object, TargetKind, WorkloadReference,
};

/// A deployment-style scaling target. The workload it points at may be
/// scaled to zero and back based on the declared triggers.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ScaledWorkload {
    pub metadata: Metadata,
    pub spec: ScaledWorkloadSpec,
    pub status: Option<ScaledWorkloadStatus>,
}

impl Object for ScaledWorkload {
    fn kind(&self) -> TargetKind {
        TargetKind::Workload
    }

    fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    fn name(&self) -> &String {
        &self.metadata.name
    }

    fn namespace(&self) -> &String {
        &self.metadata.namespace
    }

    fn generation(&self) -> i64 {
        self.metadata.generation
    }

    fn triggers(&self) -> &[TriggerSpec] {
        &self.spec.triggers
    }

    fn polling_interval_secs(&self) -> Option<u32> {
        self.spec.polling_interval_secs
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.spec.triggers.is_empty() {
            anyhow::bail!("scaled workload {} declares no triggers", self.metadata.name);
        }
        if let Some(modifiers) = &self.spec.scaling_modifiers {
            if modifiers.formula.trim().is_empty() {
                anyhow::bail!(
                    "scaled workload {} sets scaling modifiers without a formula",
                    self.metadata.name
                );
            }
            modifiers.parsed_target()?;
            modifiers.parsed_activation_target()?;
            validate_trigger_names(&self.spec.triggers)?;
        }
        Ok(())
    }
}

impl ScaledWorkload {
    /// Status with defaults filled in, so callers can patch over it.
    pub fn status_or_default(&self) -> ScaledWorkloadStatus {
        self.status.clone().unwrap_or_default()
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ScaledWorkloadSpec {
    /// The workload whose replica count this target drives.
    pub scale_target_ref: WorkloadReference,
    /// Seconds between two evaluation ticks.
    /// Defaults to the engine-wide polling interval.
    #[serde(default)]
    pub polling_interval_secs: Option<u32>,
    /// Seconds after the last activity before scale-to-zero is allowed.
    /// Defaults to the engine-wide cooldown period.
    #[serde(default)]
    pub cooldown_period_secs: Option<u32>,
    /// The lower replica bound. May be zero.
    #[serde(default)]
    pub min_replicas: Option<u32>,
    /// The upper replica bound.
    #[serde(default = "default_max_replicas")]
    pub max_replicas: u32,
    /// Scale input sources, processed in declaration order.
    pub triggers: Vec<TriggerSpec>,
    /// Substitution policy for failing triggers.
    #[serde(default)]
    pub fallback: Option<FallbackSpec>,
    /// Arithmetic aggregation across triggers.
    #[serde(default)]
    pub scaling_modifiers: Option<ScalingModifiers>,
}

fn default_max_replicas() -> u32 {
    100
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct ScaledWorkloadStatus {
    /// External metric names currently exposed for this target.
    pub external_metric_names: Vec<String>,
    /// Sampling health per exposed metric name.
    pub health: HashMap<String, HealthStatus>,
    pub conditions: Vec<Condition>,
    pub last_active_time: Option<NaiveDateTime>,
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::objects::metrics::MetricType;

    fn from_yaml(yaml: &str) -> ScaledWorkload {
        serde_yaml::from_str(yaml).unwrap()
    }

    const PLAIN: &str = r#"
        metadata:
          name: frontend
          namespace: default
          generation: 1
        spec:
          scaleTargetRef:
            kind: Deployment
            name: frontend
          triggers:
            - type: rabbitmq
              metadata:
                queueName: orders
        status: ~
    "#;

    #[test]
    fn parses_with_defaults() {
        let workload = from_yaml(PLAIN);
        assert_eq!(workload.spec.max_replicas, 100);
        assert_eq!(workload.spec.min_replicas, None);
        assert!(workload.spec.fallback.is_none());
        assert!(workload.validate().is_ok());
    }

    #[test]
    fn rejects_empty_trigger_list() {
        let mut workload = from_yaml(PLAIN);
        workload.spec.triggers.clear();
        assert!(workload.validate().is_err());
    }

    #[test]
    fn formula_requires_named_triggers() {
        let mut workload = from_yaml(PLAIN);
        workload.spec.scaling_modifiers = Some(ScalingModifiers {
            formula: "a + b".to_string(),
            target: "5".to_string(),
            activation_target: None,
            metric_type: MetricType::AverageValue,
        });
        assert!(workload.validate().is_err());

        workload.spec.triggers[0].name = "a".to_string();
        assert!(workload.validate().is_ok());
    }

    #[test]
    fn rejects_modifiers_without_formula() {
        let mut workload = from_yaml(PLAIN);
        workload.spec.triggers[0].name = "a".to_string();
        workload.spec.scaling_modifiers = Some(ScalingModifiers {
            formula: "  ".to_string(),
            target: "5".to_string(),
            activation_target: None,
            metric_type: MetricType::Value,
        });
        assert!(workload.validate().is_err());
    }

    #[test]
    fn rejects_non_numeric_modifier_target() {
        let mut workload = from_yaml(PLAIN);
        workload.spec.triggers[0].name = "a".to_string();
        workload.spec.scaling_modifiers = Some(ScalingModifiers {
            formula: "a".to_string(),
            target: "lots".to_string(),
            activation_target: None,
            metric_type: MetricType::AverageValue,
        });
        assert!(workload.validate().is_err());
    }
}
