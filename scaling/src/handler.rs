//! The façade owning the live control loops and the per-target scalers
//! caches, and answering on-demand metric queries from the
//! external-metrics consumer.

use std::{collections::HashMap, sync::Arc, time::Duration};

use dashmap::DashMap;
use resources::{
    client::{ClusterClient, ClusterError},
    config::EngineConfig,
    objects::{
        metrics::MetricSample, scaled_workload::ScaledWorkload, Object, ScalingTarget, TargetKind,
        TargetRef,
    },
};
use tokio::sync::{watch, Mutex, RwLock};

use crate::{
    adapter::{AdapterProvider, AuthResolver},
    cache::{self, metrics_cache::MetricsResultCache, ScalersCache},
    control_loop,
    error::ScalingError,
    executor::ScaleExecutor,
    formula::CompiledFormula,
    health::HealthTracker,
    observability::Observability,
    recorder::{reason, EventRecorder, EventSeverity},
    workload::{self, COMPOSITE_METRIC_NAME},
};

pub struct ScaleHandler {
    pub(crate) config: EngineConfig,
    pub(crate) client: Arc<dyn ClusterClient>,
    pub(crate) resolver: Arc<dyn AuthResolver>,
    pub(crate) provider: Arc<dyn AdapterProvider>,
    pub(crate) executor: Arc<dyn ScaleExecutor>,
    pub(crate) recorder: Arc<dyn EventRecorder>,
    pub(crate) observability: Arc<dyn Observability>,
    pub(crate) health: HealthTracker,
    pub(crate) metrics_cache: MetricsResultCache,
    caches: RwLock<HashMap<String, Arc<Mutex<ScalersCache>>>>,
    loops: DashMap<String, watch::Sender<bool>>,
    target_locks: DashMap<String, Arc<Mutex<()>>>,
}

impl ScaleHandler {
    pub fn new(
        config: EngineConfig,
        client: Arc<dyn ClusterClient>,
        resolver: Arc<dyn AuthResolver>,
        provider: Arc<dyn AdapterProvider>,
        executor: Arc<dyn ScaleExecutor>,
        recorder: Arc<dyn EventRecorder>,
        observability: Arc<dyn Observability>,
    ) -> Self {
        Self {
            config,
            client: client.clone(),
            resolver,
            provider,
            executor,
            recorder,
            observability,
            health: HealthTracker::new(client),
            metrics_cache: MetricsResultCache::new(),
            caches: RwLock::new(HashMap::new()),
            loops: DashMap::new(),
            target_locks: DashMap::new(),
        }
    }

    /// Start (or restart) the control loops for a declared target. The
    /// previous loop for the same target id, if any, is cancelled first,
    /// so at most one loop per target exists at any instant.
    pub fn observe(self: Arc<Self>, target: &ScalingTarget) -> Result<(), ScalingError> {
        target.validate().map_err(|e| ScalingError::InvalidTarget {
            target: target.id(),
            reason: format!("{:#}", e),
        })?;

        let id = target.id();
        let (cancel_tx, cancel_rx) = watch::channel(false);
        if let Some(previous) = self.loops.insert(id.to_owned(), cancel_tx) {
            tracing::info!("Replacing scale loop for {}", id);
            previous.send(true).ok();
        }

        let handler = self.clone();
        let periodic_target = target.clone();
        let periodic_cancel = cancel_rx.clone();
        tokio::spawn(async move {
            control_loop::run_periodic(handler, periodic_target, periodic_cancel).await;
        });

        let handler = self.clone();
        let push_target = target.clone();
        tokio::spawn(async move {
            control_loop::run_push(handler, push_target, cancel_rx).await;
        });
        Ok(())
    }

    /// Tear down everything held for a deleted target.
    pub async fn forget(&self, target: &TargetRef) {
        let id = target.id();
        if let Some((_, cancel)) = self.loops.remove(&id) {
            cancel.send(true).ok();
        }
        self.invalidate_cache(&id).await;
        self.health.forget(&id);
        self.target_locks.remove(&id);
        self.recorder.record(
            target,
            EventSeverity::Normal,
            reason::SCALERS_STOPPED,
            "Stopped scalers watch",
        );
        tracing::info!("Forgot scaling target {}", id);
    }

    /// Number of live control loops, one per observed target.
    pub fn loop_count(&self) -> usize {
        self.loops.len()
    }

    /// The cache entry for a target, rebuilt when absent or built from an
    /// older generation. The read-locked fast path covers steady state; a
    /// miss promotes to the write-locked build path, which re-checks and
    /// closes any stale entry before replacing it.
    pub async fn get_scalers_cache(
        &self,
        target: &ScalingTarget,
    ) -> Result<Arc<Mutex<ScalersCache>>, ScalingError> {
        let id = target.id();
        {
            let caches = self.caches.read().await;
            if let Some(entry) = caches.get(&id) {
                if entry.lock().await.observed_generation() == target.generation() {
                    return Ok(entry.clone());
                }
            }
        }

        let mut caches = self.caches.write().await;
        if let Some(entry) = caches.get(&id).cloned() {
            let mut stale = entry.lock().await;
            if stale.observed_generation() == target.generation() {
                drop(stale);
                return Ok(entry);
            }
            tracing::info!(
                "Generation of {} moved from {} to {}, rebuilding scalers",
                id,
                stale.observed_generation(),
                target.generation()
            );
            stale.close().await;
            drop(stale);
            caches.remove(&id);
        }

        let compiled = match target.modifiers() {
            Some(modifiers) => {
                let names: Vec<String> = target
                    .triggers()
                    .iter()
                    .map(|trigger| trigger.name.to_owned())
                    .collect();
                Some(CompiledFormula::compile(&modifiers.formula, &names)?)
            },
            None => None,
        };
        let builders = cache::build_builders(
            target,
            &self.resolver,
            &self.provider,
            Duration::from_millis(self.config.default_http_timeout_ms),
        )
        .await?;
        let entry = Arc::new(Mutex::new(ScalersCache::new(
            target.clone(),
            builders,
            compiled,
            self.recorder.clone(),
        )));
        caches.insert(id, entry.clone());
        drop(caches);

        self.publish_metric_names(target, &entry).await;
        Ok(entry)
    }

    /// Drop and close the cache entry for a target, along with its cached
    /// metric records. The next tick rebuilds from scratch.
    pub async fn invalidate_cache(&self, target_id: &str) {
        let entry = { self.caches.write().await.remove(target_id) };
        if let Some(entry) = entry {
            entry.lock().await.close().await;
        }
        self.metrics_cache.evict(target_id);
    }

    /// Answer one external-metrics query. `NotFound` maps to the
    /// consumer's 404.
    pub async fn query_metric(
        &self,
        namespace: &str,
        name: &str,
        metric_name: &str,
    ) -> Result<Vec<MetricSample>, ScalingError> {
        let target_ref = TargetRef::new(TargetKind::Workload, namespace, name);
        let target = self.client.get(&target_ref).await.map_err(|e| match e {
            ClusterError::NotFound(what) => ScalingError::NotFound(what),
            ClusterError::Api(source) => ScalingError::AdapterSampleFailure {
                target: target_ref.id(),
                metric: metric_name.to_owned(),
                source,
            },
        })?;
        let workload = match &target {
            ScalingTarget::Workload(workload) => workload.clone(),
            ScalingTarget::Job(_) => return Err(ScalingError::NotFound(target_ref.id())),
        };

        let entry = self.get_scalers_cache(&target).await?;
        let mut cache = entry.lock().await;
        if workload.spec.scaling_modifiers.is_some()
            && metric_name.eq_ignore_ascii_case(COMPOSITE_METRIC_NAME)
        {
            workload::query_composite(self, &target, &workload, &mut cache).await
        } else {
            workload::query_single(self, &target, &workload, &mut cache, metric_name).await
        }
    }

    /// Effective tick interval of one target.
    pub(crate) fn polling_interval(&self, target: &ScalingTarget) -> Duration {
        Duration::from_secs(
            target
                .polling_interval_secs()
                .map(u64::from)
                .unwrap_or(self.config.default_polling_interval_secs),
        )
    }

    /// Serializing lock for one target: ticks and push activations never
    /// interleave.
    pub(crate) fn target_lock(&self, target_id: &str) -> Arc<Mutex<()>> {
        self.target_locks
            .entry(target_id.to_owned())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Record the tick as active on the target's status.
    pub(crate) async fn mark_active(&self, target: &ScalingTarget, workload: &ScaledWorkload) {
        let mut updated = workload.clone();
        let mut status = updated.status_or_default();
        status.last_active_time = Some(chrono::Local::now().naive_utc());
        updated.status = Some(status);
        if let Err(e) = self
            .client
            .patch_status(&ScalingTarget::Workload(updated), target)
            .await
        {
            tracing::warn!(
                "Failed to record last active time of {}: {:#}",
                target.id(),
                anyhow::Error::from(e)
            );
        }
    }

    /// Mirror the currently exposed metric names onto the target status.
    async fn publish_metric_names(
        &self,
        target: &ScalingTarget,
        entry: &Arc<Mutex<ScalersCache>>,
    ) {
        let mut names = Vec::new();
        {
            let cache = entry.lock().await;
            for index in 0..cache.builder_count() {
                match cache.metric_specs(index).await {
                    Ok(specs) => {
                        for spec in specs {
                            if let Some(external) = spec.external {
                                names.push(external.name);
                            }
                        }
                    },
                    Err(e) => {
                        tracing::debug!(
                            "Skipping metric name publication for {}: {}",
                            target.id(),
                            e
                        );
                        return;
                    },
                }
            }
        }
        if target.modifiers().is_some() {
            names.push(COMPOSITE_METRIC_NAME.to_owned());
        }

        let updated = match target.clone() {
            ScalingTarget::Workload(mut workload) => {
                let mut status = workload.status_or_default();
                status.external_metric_names = names;
                workload.status = Some(status);
                ScalingTarget::Workload(workload)
            },
            ScalingTarget::Job(mut job) => {
                let mut status = job.status_or_default();
                status.external_metric_names = names;
                job.status = Some(status);
                ScalingTarget::Job(job)
            },
        };
        if let Err(e) = self.client.patch_status(&updated, target).await {
            tracing::warn!(
                "Failed to publish metric names of {}: {:#}",
                target.id(),
                anyhow::Error::from(e)
            );
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::test_util::{harness, job_from_yaml, workload_from_yaml, MockAdapter};

    fn simple_workload() -> ScalingTarget {
        workload_from_yaml(
            r#"
            metadata:
              name: frontend
              namespace: default
              generation: 1
            spec:
              scaleTargetRef: {kind: Deployment, name: frontend}
              triggers:
                - {type: rabbitmq}
            status: ~
            "#,
        )
    }

    // Scenario: one queue trigger, no formula, no fallback.
    #[tokio::test]
    async fn queue_trigger_scales_from_zero() {
        let fixture = harness();
        let target = simple_workload();
        fixture.client.put(&target);
        fixture
            .provider
            .set("rabbitmq", MockAdapter::healthy("queueLength", 10, 50000, true));

        crate::workload::tick(&fixture.handler, &target.target_ref()).await;
        assert_eq!(fixture.executor.last_scale(), Some((true, false)));

        let samples = fixture
            .handler
            .query_metric("default", "frontend", "s0-queueLength")
            .await
            .unwrap();
        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].value_milli, 50000);
    }

    #[tokio::test]
    async fn unknown_metric_is_not_found() {
        let fixture = harness();
        let target = simple_workload();
        fixture.client.put(&target);
        fixture
            .provider
            .set("rabbitmq", MockAdapter::healthy("queueLength", 10, 50000, true));

        let result = fixture
            .handler
            .query_metric("default", "frontend", "s0-other")
            .await;
        assert!(matches!(result, Err(ScalingError::NotFound(_))));

        let result = fixture
            .handler
            .query_metric("default", "missing", "s0-queueLength")
            .await;
        assert!(matches!(result, Err(ScalingError::NotFound(_))));
    }

    // Scenario: fallback Static kicks in after the failure threshold.
    #[tokio::test]
    async fn static_fallback_kicks_in_after_threshold() {
        let fixture = harness();
        let target = workload_from_yaml(
            r#"
            metadata:
              name: frontend
              namespace: default
              generation: 1
            spec:
              scaleTargetRef: {kind: Deployment, name: frontend}
              fallback:
                failureThreshold: 3
                replicas: 4
              triggers:
                - {type: rabbitmq}
            status: ~
            "#,
        );
        fixture.client.put(&target);
        fixture
            .provider
            .set("rabbitmq", MockAdapter::failing("queueLength", 10));

        for _ in 0..4 {
            crate::workload::tick(&fixture.handler, &target.target_ref()).await;
        }
        assert_eq!(
            fixture.handler.health.failures_for(&target.id(), "s0-queueLength"),
            4
        );
        // Below the threshold the tick stays inactive; past it the
        // substituted metric keeps the target active while errored.
        let calls = fixture.executor.scale_calls();
        assert_eq!(calls.len(), 4);
        assert_eq!(calls[2], (false, true));
        assert_eq!(calls[3], (true, true));

        // A live query now substitutes target x replicas = 10 x 4.
        let samples = fixture
            .handler
            .query_metric("default", "frontend", "s0-queueLength")
            .await
            .unwrap();
        assert_eq!(samples[0].value_milli, 40000);
    }

    fn formula_workload(fallback: &str, formula: &str) -> ScalingTarget {
        workload_from_yaml(&format!(
            r#"
            metadata:
              name: frontend
              namespace: default
              generation: 1
            spec:
              scaleTargetRef: {{kind: Deployment, name: frontend}}
              {}
              scalingModifiers:
                formula: "{}"
                target: "5"
              triggers:
                - {{type: rabbitmq, name: a}}
                - {{type: rabbitmq, name: b}}
            status: ~
            "#,
            fallback, formula
        ))
    }

    // Scenario: formula over two triggers, one failing with TriggerScoped
    // fallback contributing null.
    #[tokio::test]
    async fn trigger_scoped_fallback_nulls_the_formula() {
        let fixture = harness();
        let target = formula_workload(
            "fallback: {failureThreshold: 2, behavior: TriggerScoped}",
            "a + b",
        );
        fixture.client.put(&target);
        fixture
            .provider
            .set("a", MockAdapter::healthy("queueLength", 10, 10000, true));
        fixture
            .provider
            .set("b", MockAdapter::failing("queueLength", 10));

        for _ in 0..3 {
            crate::workload::tick(&fixture.handler, &target.target_ref()).await;
        }
        assert_eq!(
            fixture.handler.health.failures_for(&target.id(), "s1-queueLength"),
            3
        );
        // Null formula result: composite omitted, activity falls back to
        // the union of trigger activity, errors still reported.
        assert_eq!(fixture.executor.last_scale(), Some((true, true)));

        let result = fixture
            .handler
            .query_metric("default", "frontend", COMPOSITE_METRIC_NAME)
            .await;
        assert!(matches!(result, Err(ScalingError::NotFound(_))));
    }

    // Scenario: formula happy path.
    #[tokio::test]
    async fn formula_composes_both_triggers() {
        let fixture = harness();
        let target = formula_workload("", "a * 2 + b");
        fixture.client.put(&target);
        fixture
            .provider
            .set("a", MockAdapter::healthy("queueLength", 10, 10000, true));
        fixture
            .provider
            .set("b", MockAdapter::healthy("queueLength", 10, 6000, true));

        crate::workload::tick(&fixture.handler, &target.target_ref()).await;
        assert_eq!(fixture.executor.last_scale(), Some((true, false)));

        let samples = fixture
            .handler
            .query_metric("default", "frontend", COMPOSITE_METRIC_NAME)
            .await
            .unwrap();
        // (10 * 2 + 6) * target 5, in milli-units.
        assert_eq!(samples[0].value_milli, 130000);
        assert_eq!(samples[0].name, COMPOSITE_METRIC_NAME);
    }

    // Scenario: job target with the Sum strategy.
    #[tokio::test]
    async fn job_sum_strategy_adds_queues() {
        let fixture = harness();
        let target = job_from_yaml(
            r#"
            metadata:
              name: loader
              namespace: batch
              generation: 1
            spec:
              jobTargetRef: {kind: Job, name: loader}
              maxReplicas: 100
              scalingStrategy:
                multipleScalersCalculation: Sum
              triggers:
                - {type: sqs, name: first}
                - {type: sqs, name: second}
            status: ~
            "#,
        );
        fixture.client.put(&target);
        fixture
            .provider
            .set("first", MockAdapter::healthy("queueLength", 5, 30000, true));
        fixture
            .provider
            .set("second", MockAdapter::healthy("queueLength", 10, 20000, true));

        crate::job::tick(&fixture.handler, &target.target_ref()).await;
        assert_eq!(fixture.executor.job_calls(), vec![(true, 50, 8)]);
    }

    // Scenario: a generation bump closes the old adapters exactly once
    // and installs a fresh entry.
    #[tokio::test]
    async fn generation_bump_rebuilds_the_cache() {
        let fixture = harness();
        let target = simple_workload();
        fixture.client.put(&target);
        let adapter = MockAdapter::healthy("queueLength", 10, 50000, true);
        let close_count = adapter.close_count();
        fixture.provider.set("rabbitmq", adapter);

        let entry = fixture.handler.get_scalers_cache(&target).await.unwrap();
        assert_eq!(entry.lock().await.observed_generation(), 1);

        let mut bumped = target.clone();
        if let ScalingTarget::Workload(workload) = &mut bumped {
            workload.metadata.generation = 8;
        }
        let entry = fixture.handler.get_scalers_cache(&bumped).await.unwrap();
        assert_eq!(entry.lock().await.observed_generation(), 8);
        assert_eq!(close_count.load(std::sync::atomic::Ordering::SeqCst), 1);
        assert_eq!(fixture.provider.build_count(), 2);

        // Same generation is served from the read-locked fast path.
        let again = fixture.handler.get_scalers_cache(&bumped).await.unwrap();
        assert!(Arc::ptr_eq(&entry, &again));
        assert_eq!(fixture.provider.build_count(), 2);
    }

    #[tokio::test]
    async fn sample_error_invalidates_the_cache_for_the_next_tick() {
        let fixture = harness();
        let target = simple_workload();
        fixture.client.put(&target);
        let adapter = MockAdapter::healthy("queueLength", 10, 50000, true);
        // Both the sample and the rebuild-retry fail this tick.
        adapter.set_always_fail(true);
        fixture.provider.set("rabbitmq", adapter.clone());

        crate::workload::tick(&fixture.handler, &target.target_ref()).await;
        adapter.set_always_fail(false);
        assert_eq!(fixture.executor.last_scale(), Some((false, true)));
        assert_eq!(
            fixture.handler.health.failures_for(&target.id(), "s0-queueLength"),
            1
        );

        // The entry was dropped, so the next tick rebuilds and succeeds,
        // resetting the failure counter within one tick.
        crate::workload::tick(&fixture.handler, &target.target_ref()).await;
        assert_eq!(fixture.executor.last_scale(), Some((true, false)));
        assert_eq!(
            fixture.handler.health.failures_for(&target.id(), "s0-queueLength"),
            0
        );
    }

    #[tokio::test]
    async fn cached_metrics_serve_queries_without_resampling() {
        let fixture = harness();
        let target = workload_from_yaml(
            r#"
            metadata:
              name: frontend
              namespace: default
              generation: 1
            spec:
              scaleTargetRef: {kind: Deployment, name: frontend}
              triggers:
                - {type: rabbitmq, useCachedMetrics: true}
            status: ~
            "#,
        );
        fixture.client.put(&target);
        let adapter = MockAdapter::healthy("queueLength", 10, 50000, true);
        fixture.provider.set("rabbitmq", adapter.clone());

        crate::workload::tick(&fixture.handler, &target.target_ref()).await;
        let sampled_during_tick = adapter.sample_count();

        // The source moved, but the query is answered from the record
        // stored by the tick.
        adapter.set_value(70000);
        let samples = fixture
            .handler
            .query_metric("default", "frontend", "s0-queueLength")
            .await
            .unwrap();
        assert_eq!(samples[0].value_milli, 50000);
        assert_eq!(adapter.sample_count(), sampled_during_tick);
    }

    #[tokio::test]
    async fn observe_rejects_invalid_targets() {
        let fixture = harness();
        let mut target = simple_workload();
        if let ScalingTarget::Workload(workload) = &mut target {
            workload.spec.triggers.clear();
        }
        let result = fixture.handler.clone().observe(&target);
        assert!(matches!(result, Err(ScalingError::InvalidTarget { .. })));
        assert_eq!(fixture.handler.loop_count(), 0);
    }

    #[tokio::test]
    async fn resolve_failure_aborts_the_cache_build() {
        let fixture = harness();
        let target = simple_workload();
        fixture.client.put(&target);
        fixture.resolver.set_fail(true);

        let result = fixture.handler.get_scalers_cache(&target).await;
        assert!(matches!(result, Err(ScalingError::ResolveFailure { .. })));
        assert_eq!(fixture.resolver.resolution_count(), 0);

        // The next attempt retries the resolution.
        fixture.resolver.set_fail(false);
        fixture
            .provider
            .set("rabbitmq", MockAdapter::healthy("queueLength", 10, 50000, true));
        assert!(fixture.handler.get_scalers_cache(&target).await.is_ok());
        assert_eq!(fixture.resolver.resolution_count(), 1);
    }

    #[tokio::test]
    async fn adapter_build_failure_aborts_the_cache_build() {
        let fixture = harness();
        let target = simple_workload();
        fixture.client.put(&target);
        fixture
            .provider
            .set("rabbitmq", MockAdapter::healthy("queueLength", 10, 50000, true));
        fixture.provider.set_fail_builds(true);

        let result = fixture.handler.get_scalers_cache(&target).await;
        assert!(matches!(
            result,
            Err(ScalingError::AdapterBuildFailure { .. })
        ));

        fixture.provider.set_fail_builds(false);
        assert!(fixture.handler.get_scalers_cache(&target).await.is_ok());
    }

    #[tokio::test]
    async fn tick_is_skipped_when_the_target_cannot_be_read() {
        let fixture = harness();
        let target = simple_workload();
        fixture.client.put(&target);
        fixture
            .provider
            .set("rabbitmq", MockAdapter::healthy("queueLength", 10, 50000, true));

        fixture.client.set_fail_gets(true);
        crate::workload::tick(&fixture.handler, &target.target_ref()).await;
        assert!(fixture.executor.scale_calls().is_empty());

        fixture.client.set_fail_gets(false);
        crate::workload::tick(&fixture.handler, &target.target_ref()).await;
        assert_eq!(fixture.executor.last_scale(), Some((true, false)));
    }

    #[tokio::test]
    async fn resource_only_targets_count_as_active() {
        let fixture = harness();
        let target = workload_from_yaml(
            r#"
            metadata:
              name: frontend
              namespace: default
              generation: 1
            spec:
              scaleTargetRef: {kind: Deployment, name: frontend}
              triggers:
                - {type: cpu}
            status: ~
            "#,
        );
        fixture.client.put(&target);
        fixture.provider.set("cpu", MockAdapter::resource("cpu"));

        crate::workload::tick(&fixture.handler, &target.target_ref()).await;
        assert_eq!(fixture.executor.last_scale(), Some((true, false)));
    }

    #[tokio::test]
    async fn activity_is_the_union_of_trigger_activity() {
        let fixture = harness();
        let target = workload_from_yaml(
            r#"
            metadata:
              name: frontend
              namespace: default
              generation: 1
            spec:
              scaleTargetRef: {kind: Deployment, name: frontend}
              triggers:
                - {type: rabbitmq, name: a}
                - {type: rabbitmq, name: b}
            status: ~
            "#,
        );
        fixture.client.put(&target);
        let first = MockAdapter::healthy("queueLength", 10, 0, false);
        let second = MockAdapter::healthy("queueLength", 10, 0, false);
        fixture.provider.set("a", first.clone());
        fixture.provider.set("b", second.clone());

        crate::workload::tick(&fixture.handler, &target.target_ref()).await;
        assert_eq!(fixture.executor.last_scale(), Some((false, false)));

        second.set_active(true);
        second.set_value(5000);
        crate::workload::tick(&fixture.handler, &target.target_ref()).await;
        assert_eq!(fixture.executor.last_scale(), Some((true, false)));
    }

    #[tokio::test]
    async fn sample_latency_is_recorded_unless_unmeasured() {
        let fixture = harness();
        let target = simple_workload();
        fixture.client.put(&target);
        let adapter = MockAdapter::healthy("queueLength", 10, 50000, true);
        adapter.set_latency(2500);
        fixture.provider.set("rabbitmq", adapter.clone());

        crate::workload::tick(&fixture.handler, &target.target_ref()).await;
        let counter = fixture
            .observability
            .latency(&target.target_ref(), "s0-queueLength")
            .unwrap();
        assert_eq!(counter.observations, 1);
        assert_eq!(counter.total_micros, 2500);

        adapter.set_latency(-1);
        crate::workload::tick(&fixture.handler, &target.target_ref()).await;
        let counter = fixture
            .observability
            .latency(&target.target_ref(), "s0-queueLength")
            .unwrap();
        assert_eq!(counter.observations, 1);
    }

    #[tokio::test]
    async fn formula_compile_failure_surfaces_from_the_cache_build() {
        let fixture = harness();
        let target = formula_workload("", "a + unknown");
        fixture.client.put(&target);
        fixture
            .provider
            .set("a", MockAdapter::healthy("queueLength", 10, 10000, true));
        fixture
            .provider
            .set("b", MockAdapter::healthy("queueLength", 10, 6000, true));

        let result = fixture.handler.get_scalers_cache(&target).await;
        assert!(matches!(
            result,
            Err(ScalingError::FormulaCompileFailure { .. })
        ));
    }

    #[tokio::test]
    async fn published_status_lists_exposed_metric_names() {
        let fixture = harness();
        let target = formula_workload("", "a + b");
        fixture.client.put(&target);
        fixture
            .provider
            .set("a", MockAdapter::healthy("queueLength", 10, 10000, true));
        fixture
            .provider
            .set("b", MockAdapter::healthy("queueLength", 10, 6000, true));

        fixture.handler.get_scalers_cache(&target).await.unwrap();
        let patched = fixture.client.last_patched().unwrap();
        let status = patched.as_workload().unwrap().status.clone().unwrap();
        assert_eq!(
            status.external_metric_names,
            vec![
                "s0-queueLength".to_string(),
                "s1-queueLength".to_string(),
                COMPOSITE_METRIC_NAME.to_string()
            ]
        );
    }
}
