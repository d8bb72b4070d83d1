//! One evaluation pass over a job target: collect per-trigger queue
//! lengths, combine them per the declared strategy and report the target
//! parallelism to the scale executor.

use std::sync::Arc;

use resources::objects::{
    scaled_job::{ScaledJob, ScalersCalculation},
    ScalingTarget, TargetRef,
};

use crate::{
    cache::{metrics_cache::MetricsRecord, ScalersCache},
    error::ScalingError,
    handler::ScaleHandler,
    recorder::{reason, EventSeverity},
};

#[derive(Debug, Clone, Copy)]
struct QueueObservation {
    queue_length: f64,
    max_parallel: i64,
    active: bool,
}

/// One full §4.4 tick of a job target.
pub(crate) async fn tick(handler: &Arc<ScaleHandler>, target_ref: &TargetRef) {
    let target = match handler.client.get(target_ref).await {
        Ok(target) => target,
        Err(e) => {
            tracing::warn!("Skipping tick for {}: {:#}", target_ref.id(), anyhow::Error::from(e));
            return;
        },
    };
    let job = match &target {
        ScalingTarget::Job(job) => job.clone(),
        ScalingTarget::Workload(_) => {
            tracing::error!(
                "{}",
                ScalingError::InternalInvariantViolation(format!(
                    "job tick invoked for workload target {}",
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
    let observations = {
        let mut cache = entry.lock().await;
        collect(handler, &target, &job, &mut cache, &mut error_seen).await
    };
    let (active, queue_length, max_parallel) = combine(&job, &observations);

    handler
        .executor
        .request_job_scale(&job, active, queue_length, max_parallel)
        .await;

    if error_seen {
        handler.invalidate_cache(&target.id()).await;
    }
}

async fn collect(
    handler: &ScaleHandler,
    target: &ScalingTarget,
    job: &ScaledJob,
    cache: &mut ScalersCache,
    error_seen: &mut bool,
) -> Vec<QueueObservation> {
    let mut observations = Vec::new();

    for index in 0..cache.builder_count() {
        let trigger = match cache.trigger(index) {
            Some(trigger) => trigger.clone(),
            None => continue,
        };
        let specs = match cache.metric_specs(index).await {
            Ok(specs) => specs,
            Err(e) => {
                *error_seen = true;
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
            let report = cache.sample(index, &external.name).await;
            if report.latency_micros >= 0 {
                handler.observability.record_sample_latency(
                    &target.target_ref(),
                    &external.name,
                    report.latency_micros,
                );
            }
            match report.result {
                Ok(sampled) => {
                    handler.health.record(target, &external.name, true).await;
                    if trigger.use_cached_metrics {
                        handler.metrics_cache.store(
                            &target.id(),
                            MetricsRecord::new(
                                &external.name,
                                sampled.samples.clone(),
                                sampled.active,
                            ),
                        );
                    }
                    let queue_length: f64 =
                        sampled.samples.iter().map(|sample| sample.value()).sum();
                    let average_target = external.target.value_milli as f64 / 1000.0;
                    let max_parallel = if average_target > 0.0 {
                        (job.spec.max_replicas as i64)
                            .min((queue_length / average_target).ceil() as i64)
                    } else {
                        0
                    };
                    observations.push(QueueObservation {
                        queue_length,
                        max_parallel,
                        active: sampled.active,
                    });
                },
                Err(e) => {
                    *error_seen = true;
                    handler.health.record(target, &external.name, false).await;
                    tracing::error!(
                        "Trigger {} of {} failed to sample {}: {:#}",
                        index,
                        target.id(),
                        external.name,
                        e
                    );
                    cache.recorder().record(
                        &target.target_ref(),
                        EventSeverity::Warning,
                        reason::SCALER_FAILED,
                        &format!("Failed to sample {}: {:#}", external.name, e),
                    );
                    if trigger.use_cached_metrics {
                        handler.metrics_cache.store(
                            &target.id(),
                            MetricsRecord::failed(&external.name, &format!("{:#}", e)),
                        );
                    }
                },
            }
        }
    }

    observations
}

/// Combine per-trigger queue lengths across active triggers. Ties favor
/// the first declaration.
fn combine(job: &ScaledJob, observations: &[QueueObservation]) -> (bool, i64, i64) {
    let active: Vec<&QueueObservation> = observations
        .iter()
        .filter(|observation| observation.active)
        .collect();
    if active.is_empty() {
        // The executor still reconciles toward min_replicas.
        if job.spec.min_replicas > 0 {
            return (true, 0, 0);
        }
        return (false, 0, 0);
    }

    let (queue_length, max_parallel) = match job.spec.scaling_strategy.multiple_scalers_calculation
    {
        ScalersCalculation::Max => {
            let mut chosen = active[0];
            for observation in &active[1..] {
                if observation.queue_length > chosen.queue_length {
                    chosen = observation;
                }
            }
            (chosen.queue_length, chosen.max_parallel)
        },
        ScalersCalculation::Min => {
            let mut chosen = active[0];
            for observation in &active[1..] {
                if observation.queue_length < chosen.queue_length {
                    chosen = observation;
                }
            }
            (chosen.queue_length, chosen.max_parallel)
        },
        ScalersCalculation::Avg => {
            let count = active.len() as f64;
            let queue_sum: f64 = active.iter().map(|o| o.queue_length).sum();
            let parallel_sum: i64 = active.iter().map(|o| o.max_parallel).sum();
            (
                (queue_sum / count).ceil(),
                (parallel_sum as f64 / count).ceil() as i64,
            )
        },
        ScalersCalculation::Sum => (
            active.iter().map(|o| o.queue_length).sum(),
            active.iter().map(|o| o.max_parallel).sum(),
        ),
    };

    let max_parallel = (job.spec.max_replicas as i64).min(max_parallel);
    (true, queue_length.ceil() as i64, max_parallel)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::test_util::job_from_yaml;

    fn job(strategy: &str, min_replicas: u32, max_replicas: u32) -> ScaledJob {
        let yaml = format!(
            r#"
            metadata:
              name: loader
              namespace: batch
              generation: 1
            spec:
              jobTargetRef: {{kind: Job, name: loader}}
              minReplicas: {}
              maxReplicas: {}
              scalingStrategy:
                multipleScalersCalculation: {}
              triggers:
                - {{type: sqs}}
            status: ~
            "#,
            min_replicas, max_replicas, strategy
        );
        match job_from_yaml(&yaml) {
            ScalingTarget::Job(job) => job,
            _ => unreachable!(),
        }
    }

    fn observation(queue_length: f64, max_parallel: i64, active: bool) -> QueueObservation {
        QueueObservation {
            queue_length,
            max_parallel,
            active,
        }
    }

    #[test]
    fn sum_adds_queues_and_parallelism() {
        let job = job("Sum", 0, 100);
        let observations = [observation(30.0, 6, true), observation(20.0, 2, true)];
        assert_eq!(combine(&job, &observations), (true, 50, 8));
    }

    #[test]
    fn max_picks_the_largest_active_queue() {
        let job = job("Max", 0, 100);
        let observations = [
            observation(30.0, 6, true),
            observation(80.0, 1, false),
            observation(20.0, 2, true),
        ];
        assert_eq!(combine(&job, &observations), (true, 30, 6));
    }

    #[test]
    fn max_ties_favor_first_declaration() {
        let job = job("Max", 0, 100);
        let observations = [observation(30.0, 6, true), observation(30.0, 2, true)];
        assert_eq!(combine(&job, &observations), (true, 30, 6));
    }

    #[test]
    fn min_picks_the_smallest_active_queue() {
        let job = job("Min", 0, 100);
        let observations = [observation(30.0, 6, true), observation(20.0, 2, true)];
        assert_eq!(combine(&job, &observations), (true, 20, 2));
    }

    #[test]
    fn avg_ceiling_divides_by_active_count() {
        let job = job("Avg", 0, 100);
        let observations = [observation(30.0, 6, true), observation(21.0, 3, true)];
        assert_eq!(combine(&job, &observations), (true, 26, 5));
    }

    #[test]
    fn parallelism_is_capped_by_max_replicas() {
        let job = job("Sum", 0, 5);
        let observations = [observation(30.0, 5, true), observation(20.0, 4, true)];
        assert_eq!(combine(&job, &observations), (true, 50, 5));
    }

    #[test]
    fn inactive_with_min_replicas_reports_active_zero() {
        let job = job("Max", 2, 100);
        let observations = [observation(30.0, 6, false)];
        assert_eq!(combine(&job, &observations), (true, 0, 0));
    }

    #[test]
    fn inactive_without_min_replicas_reports_inactive() {
        let job = job("Max", 0, 100);
        assert_eq!(combine(&job, &[]), (false, 0, 0));
    }
}
