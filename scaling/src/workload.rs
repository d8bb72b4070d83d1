//! One evaluation pass over a workload target: sample every trigger,
//! track health, substitute fallbacks, aggregate through the formula and
//! hand the decision to the scale executor.

use std::{collections::HashMap, sync::Arc};

use resources::objects::{
    metrics::{ExternalMetricSpec, MetricSample},
    scaled_workload::ScaledWorkload,
    trigger::TriggerSpec,
    ScalingTarget, TargetRef,
};

use crate::{
    cache::{metrics_cache::MetricsRecord, ScalersCache},
    error::ScalingError,
    fallback::{self, FallbackDecision},
    handler::ScaleHandler,
    recorder::{reason, EventSeverity},
};

/// Reserved name of the single metric synthesized by the formula engine.
pub const COMPOSITE_METRIC_NAME: &str = "s0-composite-metric";

/// What one external metric of one trigger contributed this pass.
pub(crate) struct TriggerOutcome {
    pub index: usize,
    pub samples: Vec<MetricSample>,
    pub active: bool,
    pub failed: bool,
    pub fallback_applied: bool,
}

pub(crate) struct Collected {
    pub outcomes: Vec<TriggerOutcome>,
    pub error_seen: bool,
}

/// §4.3 steps 2-3: walk the builders in declaration order, sampling every
/// external metric and recording health as we go.
pub(crate) async fn collect(
    handler: &ScaleHandler,
    target: &ScalingTarget,
    workload: &ScaledWorkload,
    cache: &mut ScalersCache,
) -> Collected {
    let mut outcomes = Vec::new();
    let mut error_seen = false;

    for index in 0..cache.builder_count() {
        let trigger = match cache.trigger(index) {
            Some(trigger) => trigger.clone(),
            None => continue,
        };
        let specs = match cache.metric_specs(index).await {
            Ok(specs) => specs,
            Err(e) => {
                error_seen = true;
                tracing::error!(
                    "Failed to read metric specs of trigger {} for {}: {}",
                    index,
                    target.id(),
                    e
                );
                cache.recorder().record(
                    &target.target_ref(),
                    EventSeverity::Warning,
                    reason::SCALER_FAILED,
                    &format!("Failed to read metric specs of trigger {}: {}", index, e),
                );
                continue;
            },
        };
        for spec in specs {
            let external = match spec.external {
                Some(external) => external,
                None => continue,
            };
            let outcome =
                sample_one(handler, target, workload, cache, index, &trigger, &external).await;
            error_seen |= outcome.failed;
            outcomes.push(outcome);
        }
    }

    Collected {
        outcomes,
        error_seen,
    }
}

/// Sample one metric, update its health record and apply the fallback
/// policy on failure.
pub(crate) async fn sample_one(
    handler: &ScaleHandler,
    target: &ScalingTarget,
    workload: &ScaledWorkload,
    cache: &mut ScalersCache,
    index: usize,
    trigger: &TriggerSpec,
    external: &ExternalMetricSpec,
) -> TriggerOutcome {
    let metric_name = external.name.as_str();
    let report = cache.sample(index, metric_name).await;
    if report.latency_micros >= 0 {
        handler.observability.record_sample_latency(
            &target.target_ref(),
            metric_name,
            report.latency_micros,
        );
    }

    match report.result {
        Ok(sampled) => {
            handler.health.record(target, metric_name, true).await;
            if trigger.use_cached_metrics {
                handler.metrics_cache.store(
                    &target.id(),
                    MetricsRecord::new(metric_name, sampled.samples.clone(), sampled.active),
                );
            }
            TriggerOutcome {
                index,
                samples: sampled.samples,
                active: sampled.active,
                failed: false,
                fallback_applied: false,
            }
        },
        Err(e) => {
            let status = handler.health.record(target, metric_name, false).await;
            tracing::error!(
                "Trigger {} of {} failed to sample {}: {:#}",
                index,
                target.id(),
                metric_name,
                e
            );
            cache.recorder().record(
                &target.target_ref(),
                EventSeverity::Warning,
                reason::SCALER_FAILED,
                &format!("Failed to sample {}: {:#}", metric_name, e),
            );
            if trigger.use_cached_metrics {
                handler
                    .metrics_cache
                    .store(&target.id(), MetricsRecord::failed(metric_name, &format!("{:#}", e)));
            }

            let decision = fallback::decide(
                handler.client.as_ref(),
                workload,
                metric_name,
                external.target.value_milli,
                trigger.metric_type,
                status.consecutive_failures,
            )
            .await;
            match decision {
                FallbackDecision::Propagate | FallbackDecision::NullValue => TriggerOutcome {
                    index,
                    samples: Vec::new(),
                    active: false,
                    failed: true,
                    fallback_applied: false,
                },
                FallbackDecision::Substituted(samples) => TriggerOutcome {
                    index,
                    samples,
                    active: false,
                    failed: true,
                    fallback_applied: true,
                },
            }
        },
    }
}

pub(crate) enum CompositeOutcome {
    /// No formula on this target.
    NotConfigured,
    /// Formula present but the result was null or failed to evaluate.
    Omitted,
    Value { raw: f64, sample: MetricSample },
}

/// §4.3 step 4: build the formula environment from the first external
/// metric of each trigger and synthesize the composite sample.
pub(crate) fn compose(
    workload: &ScaledWorkload,
    cache: &ScalersCache,
    collected: &Collected,
    error_seen: &mut bool,
) -> CompositeOutcome {
    let modifiers = match &workload.spec.scaling_modifiers {
        Some(modifiers) => modifiers,
        None => return CompositeOutcome::NotConfigured,
    };
    let compiled = match cache.compiled_formula() {
        Some(compiled) => compiled,
        None => {
            tracing::error!(
                "{}",
                ScalingError::InternalInvariantViolation(format!(
                    "cache for {} was promoted without a compiled formula",
                    workload.metadata.name
                ))
            );
            *error_seen = true;
            return CompositeOutcome::Omitted;
        },
    };

    let mut env: HashMap<String, Option<f64>> = HashMap::new();
    for (index, trigger) in workload.spec.triggers.iter().enumerate() {
        let outcome = collected.outcomes.iter().find(|o| o.index == index);
        let value = match outcome {
            Some(outcome) if !outcome.samples.is_empty() => {
                Some(outcome.samples[0].value())
            },
            _ => None,
        };
        env.insert(trigger.name.to_owned(), value);
    }

    let result = match compiled.evaluate(&env) {
        Ok(result) => result,
        Err(e) => {
            tracing::error!("Formula of {} failed: {}", workload.metadata.name, e);
            *error_seen = true;
            return CompositeOutcome::Omitted;
        },
    };
    let raw = match result {
        Some(raw) => raw,
        None => return CompositeOutcome::Omitted,
    };
    let target = match modifiers.parsed_target() {
        Ok(target) => target,
        Err(e) => {
            tracing::error!("Modifier target of {} invalid: {:#}", workload.metadata.name, e);
            *error_seen = true;
            return CompositeOutcome::Omitted;
        },
    };
    let value_milli = (raw * target * 1000.0).round() as i64;
    CompositeOutcome::Value {
        raw,
        sample: MetricSample::new(COMPOSITE_METRIC_NAME, value_milli),
    }
}

/// §4.3 step 5: decide whether the target counts as active.
pub(crate) fn determine_activity(
    workload: &ScaledWorkload,
    collected: &Collected,
    composite: &CompositeOutcome,
) -> bool {
    let any_active = collected.outcomes.iter().any(|outcome| outcome.active);
    let any_fallback = collected
        .outcomes
        .iter()
        .any(|outcome| outcome.fallback_applied);
    let external_triggers = workload
        .spec
        .triggers
        .iter()
        .filter(|trigger| !trigger.is_resource_type())
        .count();

    match composite {
        CompositeOutcome::Value { raw, .. } => {
            let activation = workload
                .spec
                .scaling_modifiers
                .as_ref()
                .and_then(|modifiers| modifiers.parsed_activation_target().ok())
                .unwrap_or(0.0);
            *raw > activation
        },
        // Resource-only targets are treated as always active.
        _ => any_active || any_fallback || external_triggers == 0,
    }
}

/// One full §4.3 tick of a workload target.
pub(crate) async fn tick(handler: &Arc<ScaleHandler>, target_ref: &TargetRef) {
    // Re-read the target so manual edits are picked up; the next tick
    // retries on failure.
    let target = match handler.client.get(target_ref).await {
        Ok(target) => target,
        Err(e) => {
            tracing::warn!("Skipping tick for {}: {:#}", target_ref.id(), anyhow::Error::from(e));
            return;
        },
    };
    let workload = match &target {
        ScalingTarget::Workload(workload) => workload.clone(),
        ScalingTarget::Job(_) => {
            tracing::error!(
                "{}",
                ScalingError::InternalInvariantViolation(format!(
                    "workload tick invoked for job target {}",
                    target_ref.id()
                ))
            );
            return;
        },
    };
    let entry = match handler.get_scalers_cache(&target).await {
        Ok(entry) => entry,
        Err(e) => {
            tracing::error!("Failed to build scalers for {}: {}", target_ref.id(), e);
            return;
        },
    };

    let mut error_seen = false;
    let (collected, composite) = {
        let mut cache = entry.lock().await;
        let collected = collect(handler, &target, &workload, &mut cache).await;
        error_seen |= collected.error_seen;
        let composite = compose(&workload, &cache, &collected, &mut error_seen);
        (collected, composite)
    };
    let active = determine_activity(&workload, &collected, &composite);

    handler
        .executor
        .request_scale(&workload, active, error_seen)
        .await;

    if active {
        handler.mark_active(&target, &workload).await;
    }
    if error_seen {
        handler.invalidate_cache(&target.id()).await;
    }
}

/// Serve the composite metric on demand.
pub(crate) async fn query_composite(
    handler: &ScaleHandler,
    target: &ScalingTarget,
    workload: &ScaledWorkload,
    cache: &mut ScalersCache,
) -> Result<Vec<MetricSample>, ScalingError> {
    let collected = collect(handler, target, workload, cache).await;
    let mut error_seen = false;
    match compose(workload, cache, &collected, &mut error_seen) {
        CompositeOutcome::Value { sample, .. } => Ok(vec![sample]),
        _ => Err(ScalingError::NotFound(COMPOSITE_METRIC_NAME.to_owned())),
    }
}

/// Serve one per-trigger metric on demand, preferring a fresh cached
/// record when the trigger opted in.
pub(crate) async fn query_single(
    handler: &ScaleHandler,
    target: &ScalingTarget,
    workload: &ScaledWorkload,
    cache: &mut ScalersCache,
    metric_name: &str,
) -> Result<Vec<MetricSample>, ScalingError> {
    let ttl = handler.polling_interval(target);
    let mut samples = Vec::new();

    for index in 0..cache.builder_count() {
        let trigger = match cache.trigger(index) {
            Some(trigger) => trigger.clone(),
            None => continue,
        };
        let specs = match cache.metric_specs(index).await {
            Ok(specs) => specs,
            Err(e) => {
                tracing::error!(
                    "Failed to read metric specs of trigger {} for {}: {}",
                    index,
                    target.id(),
                    e
                );
                continue;
            },
        };
        for spec in specs {
            let external = match spec.external {
                Some(external) => external,
                None => continue,
            };
            if !external.name.eq_ignore_ascii_case(metric_name) {
                continue;
            }

            if trigger.use_cached_metrics {
                if let Some(record) = handler.metrics_cache.read(&target.id(), &external.name, ttl)
                {
                    match record.error {
                        Some(error) => {
                            return Err(ScalingError::AdapterSampleFailure {
                                target: target.id(),
                                metric: external.name.to_owned(),
                                source: anyhow::anyhow!(error),
                            })
                        },
                        None => {
                            samples.extend(record.samples);
                            continue;
                        },
                    }
                }
            }

            let outcome =
                sample_one(handler, target, workload, cache, index, &trigger, &external).await;
            if outcome.failed && !outcome.fallback_applied {
                return Err(ScalingError::AdapterSampleFailure {
                    target: target.id(),
                    metric: external.name.to_owned(),
                    source: anyhow::anyhow!("trigger failed and no fallback applied"),
                });
            }
            samples.extend(outcome.samples);
        }
    }

    if samples.is_empty() {
        Err(ScalingError::NotFound(metric_name.to_owned()))
    } else {
        Ok(samples)
    }
}
