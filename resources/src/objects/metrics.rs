use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use strum::Display;

/// How a metric value relates to the consumer's scaling target.
#[derive(Debug, Serialize, Deserialize, Hash, Clone, Copy, Eq, PartialEq, Display)]
pub enum MetricType {
    /// Divide the value by the current replica count before comparing.
    AverageValue,
    /// Compare the value as-is.
    Value,
}

impl Default for MetricType {
    fn default() -> Self {
        MetricType::AverageValue
    }
}

/// One observed metric value, in milli-units.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct MetricSample {
    pub name: String,
    pub value_milli: i64,
    pub timestamp: NaiveDateTime,
}

impl MetricSample {
    pub fn new(name: &str, value_milli: i64) -> Self {
        Self {
            name: name.to_owned(),
            value_milli,
            timestamp: chrono::Local::now().naive_utc(),
        }
    }

    /// Value in plain units.
    pub fn value(&self) -> f64 {
        self.value_milli as f64 / 1000.0
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MetricTargetSpec {
    #[serde(default)]
    pub metric_type: MetricType,
    pub value_milli: i64,
}

/// Declaration of one externally sampled metric.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ExternalMetricSpec {
    pub name: String,
    pub target: MetricTargetSpec,
}

/// Declaration of a cpu/memory style resource metric.
/// Resource metrics are served by the cluster itself and never alone
/// justify scaling to zero.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ResourceMetricSpec {
    pub name: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Default)]
pub struct MetricSpec {
    pub external: Option<ExternalMetricSpec>,
    pub resource: Option<ResourceMetricSpec>,
}

impl MetricSpec {
    pub fn external(name: &str, metric_type: MetricType, value_milli: i64) -> Self {
        Self {
            external: Some(ExternalMetricSpec {
                name: name.to_owned(),
                target: MetricTargetSpec {
                    metric_type,
                    value_milli,
                },
            }),
            resource: None,
        }
    }

    pub fn resource(name: &str) -> Self {
        Self {
            external: None,
            resource: Some(ResourceMetricSpec {
                name: name.to_owned(),
            }),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Hash, Clone, Copy, Eq, PartialEq, Display)]
pub enum HealthState {
    Happy,
    Failing,
}

/// Per (target, metric) sampling health.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct HealthStatus {
    pub consecutive_failures: u32,
    pub status: HealthState,
}

impl Default for HealthStatus {
    fn default() -> Self {
        HealthStatus {
            consecutive_failures: 0,
            status: HealthState::Happy,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Hash, Clone, Copy, Eq, PartialEq, Display)]
pub enum ConditionType {
    FallbackActive,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Condition {
    #[serde(rename = "type")]
    pub type_: ConditionType,
    pub status: bool,
    pub reason: String,
    pub message: String,
}

/// Replace the condition of the same type, or append it.
pub fn set_condition(conditions: &mut Vec<Condition>, condition: Condition) {
    match conditions.iter_mut().find(|c| c.type_ == condition.type_) {
        Some(existing) => *existing = condition,
        None => conditions.push(condition),
    }
}
