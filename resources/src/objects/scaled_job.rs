use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::{
    metrics::{Condition, HealthStatus},
    trigger::TriggerSpec,
    Metadata, Object, TargetKind, WorkloadReference,
};

/// A job-style scaling target. Instead of steering a replica count the
/// engine reports how many parallel job instances to launch.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ScaledJob {
    pub metadata: Metadata,
    pub spec: ScaledJobSpec,
    pub status: Option<ScaledJobStatus>,
}

impl Object for ScaledJob {
    fn kind(&self) -> TargetKind {
        TargetKind::Job
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
            anyhow::bail!("scaled job {} declares no triggers", self.metadata.name);
        }
        Ok(())
    }
}

impl ScaledJob {
    pub fn status_or_default(&self) -> ScaledJobStatus {
        self.status.clone().unwrap_or_default()
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ScaledJobSpec {
    /// Template of the job launched for each unit of work.
    pub job_target_ref: WorkloadReference,
    /// Seconds between two evaluation ticks.
    /// Defaults to the engine-wide polling interval.
    #[serde(default)]
    pub polling_interval_secs: Option<u32>,
    /// Number of job instances kept around even when no trigger is active.
    #[serde(default)]
    pub min_replicas: u32,
    /// Hard cap on parallelism.
    #[serde(default = "default_max_replicas")]
    pub max_replicas: u32,
    /// Scale input sources, processed in declaration order.
    pub triggers: Vec<TriggerSpec>,
    #[serde(default)]
    pub scaling_strategy: ScalingStrategy,
}

fn default_max_replicas() -> u32 {
    100
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct ScalingStrategy {
    pub multiple_scalers_calculation: ScalersCalculation,
}

/// How queue lengths from several triggers combine into one decision.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub enum ScalersCalculation {
    /// The largest queue among active triggers wins.
    Max,
    /// The smallest queue among active triggers wins.
    Min,
    /// Ceiling-average across active triggers.
    Avg,
    /// Sum across active triggers.
    Sum,
}

impl Default for ScalersCalculation {
    fn default() -> Self {
        ScalersCalculation::Max
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct ScaledJobStatus {
    pub external_metric_names: Vec<String>,
    pub health: HashMap<String, HealthStatus>,
    pub conditions: Vec<Condition>,
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn strategy_defaults_to_max() {
        let job: ScaledJob = serde_yaml::from_str(
            r#"
            metadata:
              name: loader
              namespace: batch
            spec:
              jobTargetRef:
                kind: Job
                name: loader
              maxReplicas: 20
              triggers:
                - type: sqs
            "#,
        )
        .unwrap();
        assert_eq!(
            job.spec.scaling_strategy.multiple_scalers_calculation,
            ScalersCalculation::Max
        );
        assert_eq!(job.spec.min_replicas, 0);
        assert_eq!(job.spec.max_replicas, 20);
        assert!(job.validate().is_ok());
    }
}
