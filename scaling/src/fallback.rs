//! Substitution of failing triggers. Once a trigger has failed more
//! consecutive ticks than the declared threshold, its metric is replaced
//! by a computed value (or suppressed into a formula null) so one broken
//! source does not park the whole target.

use resources::{
    client::ClusterClient,
    objects::{
        fallback::FallbackBehavior,
        metrics::{MetricSample, MetricType},
        scaled_workload::ScaledWorkload,
        Object,
    },
};

#[derive(Debug, PartialEq)]
pub enum FallbackDecision {
    /// No valid fallback, or the trigger has not failed long enough:
    /// the error stands and the trigger contributes nothing.
    Propagate,
    /// Trigger-scoped fallback under a formula: the trigger contributes
    /// null to the formula environment.
    NullValue,
    /// Synthetic samples replacing the failed read.
    Substituted(Vec<MetricSample>),
}

/// Apply the target's fallback policy to one failed metric read.
/// `metric_target_milli` is the metric's declared average-value target;
/// `failures` is the consecutive-failure count after this tick's update.
pub async fn decide(
    client: &dyn ClusterClient,
    workload: &ScaledWorkload,
    metric_name: &str,
    metric_target_milli: i64,
    trigger_metric_type: MetricType,
    failures: u32,
) -> FallbackDecision {
    let fallback = match &workload.spec.fallback {
        Some(fallback) => fallback,
        None => return FallbackDecision::Propagate,
    };
    let modifiers = workload.spec.scaling_modifiers.as_ref();

    if !fallback.is_valid() {
        tracing::debug!(
            "Ignoring invalid fallback on {}: threshold {}, replicas {}",
            workload.metadata.name,
            fallback.failure_threshold,
            fallback.replicas
        );
        return FallbackDecision::Propagate;
    }
    let formula_target = match modifiers {
        Some(modifiers) => match modifiers.parsed_target() {
            Ok(target) => Some(target),
            Err(e) => {
                tracing::debug!(
                    "Ignoring fallback on {}: {:#}",
                    workload.metadata.name,
                    e
                );
                return FallbackDecision::Propagate;
            },
        },
        None => None,
    };

    if failures as i64 <= fallback.failure_threshold as i64 {
        return FallbackDecision::Propagate;
    }

    if fallback.behavior == FallbackBehavior::TriggerScoped {
        return match modifiers {
            Some(_) => FallbackDecision::NullValue,
            // Without a formula there is no environment to suppress the
            // trigger from; a zero placeholder keeps the metric present.
            None => FallbackDecision::Substituted(vec![MetricSample::new(metric_name, 0)]),
        };
    }

    let metric_type = modifiers
        .map(|modifiers| modifiers.metric_type)
        .unwrap_or(trigger_metric_type);
    let needs_snapshot =
        fallback.behavior != FallbackBehavior::Static || metric_type == MetricType::Value;
    let snapshot = if needs_snapshot {
        match client
            .scale_snapshot(workload.namespace(), &workload.spec.scale_target_ref)
            .await
        {
            Ok(snapshot) => Some(snapshot),
            Err(e) => {
                tracing::warn!(
                    "Refusing fallback for {} of {}: failed to read current scale: {:#}",
                    metric_name,
                    workload.metadata.name,
                    anyhow::Error::from(e)
                );
                return FallbackDecision::Propagate;
            },
        }
    } else {
        None
    };

    let replicas = match fallback.behavior {
        FallbackBehavior::Static => fallback.replicas as i64,
        FallbackBehavior::CurrentReplicas => snapshot.unwrap().replicas as i64,
        FallbackBehavior::CurrentReplicasIfHigher => {
            (snapshot.unwrap().replicas as i64).max(fallback.replicas as i64)
        },
        FallbackBehavior::CurrentReplicasIfLower => {
            (snapshot.unwrap().replicas as i64).min(fallback.replicas as i64)
        },
        FallbackBehavior::TriggerScoped => unreachable!(),
    };

    let replicas = match metric_type {
        MetricType::AverageValue => replicas as f64,
        MetricType::Value => {
            let ready = snapshot.unwrap().ready_replicas;
            if ready == 0 {
                tracing::warn!(
                    "Refusing fallback for {} of {}: no ready replicas to divide by",
                    metric_name,
                    workload.metadata.name
                );
                return FallbackDecision::Propagate;
            }
            replicas as f64 / ready as f64
        },
    };

    let target = match formula_target {
        Some(target) => target,
        None => metric_target_milli as f64 / 1000.0,
    };
    let value_milli = (target * replicas * 1000.0).round() as i64;
    FallbackDecision::Substituted(vec![MetricSample::new(metric_name, value_milli)])
}
