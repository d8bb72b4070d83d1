//! Mock collaborators for the crate's tests.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};

use async_trait::async_trait;
use parking_lot::Mutex;
use resources::{
    client::{ClusterClient, ClusterError, ScaleSnapshot},
    config::EngineConfig,
    objects::{
        metrics::{MetricSample, MetricSpec, MetricType},
        scaled_job::ScaledJob,
        scaled_workload::ScaledWorkload,
        trigger::TriggerSpec,
        ScalingTarget, TargetRef, WorkloadReference,
    },
};
use tokio::sync::mpsc;

use crate::{
    adapter::{
        AdapterProvider, AuthResolver, ResolvedAuth, SampleReport, ScalerConfig, TriggerAdapter,
        TriggerSample,
    },
    executor::ScaleExecutor,
    handler::ScaleHandler,
    observability::CountingObservability,
    recorder::{EventRecorder, EventSeverity},
};

pub(crate) fn workload_from_yaml(yaml: &str) -> ScalingTarget {
    let workload: ScaledWorkload = serde_yaml::from_str(yaml).unwrap();
    ScalingTarget::Workload(workload)
}

pub(crate) fn job_from_yaml(yaml: &str) -> ScalingTarget {
    let job: ScaledJob = serde_yaml::from_str(yaml).unwrap();
    ScalingTarget::Job(job)
}

/// Scripted in-memory adapter.
pub(crate) struct MockAdapter {
    specs: Mutex<Vec<MetricSpec>>,
    value_milli: Mutex<i64>,
    active: Mutex<bool>,
    latency_micros: Mutex<i64>,
    fail_next: AtomicUsize,
    always_fail: Mutex<bool>,
    fail_specs: Mutex<bool>,
    sample_count: Arc<AtomicUsize>,
    close_count: Arc<AtomicUsize>,
    push_script: Mutex<Vec<bool>>,
    supports_push: Mutex<bool>,
}

impl MockAdapter {
    pub fn healthy(metric: &str, target_units: i64, value_milli: i64, active: bool) -> Arc<Self> {
        Arc::new(Self {
            specs: Mutex::new(vec![MetricSpec::external(
                metric,
                MetricType::AverageValue,
                target_units * 1000,
            )]),
            value_milli: Mutex::new(value_milli),
            active: Mutex::new(active),
            latency_micros: Mutex::new(1500),
            fail_next: AtomicUsize::new(0),
            always_fail: Mutex::new(false),
            fail_specs: Mutex::new(false),
            sample_count: Arc::new(AtomicUsize::new(0)),
            close_count: Arc::new(AtomicUsize::new(0)),
            push_script: Mutex::new(Vec::new()),
            supports_push: Mutex::new(false),
        })
    }

    pub fn failing(metric: &str, target_units: i64) -> Arc<Self> {
        let adapter = Self::healthy(metric, target_units, 0, false);
        *adapter.always_fail.lock() = true;
        adapter
    }

    pub fn resource(name: &str) -> Arc<Self> {
        let adapter = Self::healthy(name, 1, 0, false);
        *adapter.specs.lock() = vec![MetricSpec::resource(name)];
        adapter
    }

    pub fn enable_push(&self, activations: &[bool]) {
        *self.supports_push.lock() = true;
        *self.push_script.lock() = activations.to_vec();
    }

    pub fn fail_next_samples(&self, count: usize) {
        self.fail_next.store(count, Ordering::SeqCst);
    }

    pub fn set_always_fail(&self, fail: bool) {
        *self.always_fail.lock() = fail;
    }

    pub fn set_value(&self, value_milli: i64) {
        *self.value_milli.lock() = value_milli;
    }

    pub fn set_active(&self, active: bool) {
        *self.active.lock() = active;
    }

    pub fn set_latency(&self, micros: i64) {
        *self.latency_micros.lock() = micros;
    }

    pub fn close_count(&self) -> Arc<AtomicUsize> {
        self.close_count.clone()
    }

    pub fn sample_count(&self) -> usize {
        self.sample_count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TriggerAdapter for MockAdapter {
    async fn metric_specs(&self) -> anyhow::Result<Vec<MetricSpec>> {
        if *self.fail_specs.lock() {
            anyhow::bail!("metric specs unavailable");
        }
        Ok(self.specs.lock().clone())
    }

    async fn sample(&self, metric_name: &str) -> SampleReport {
        self.sample_count.fetch_add(1, Ordering::SeqCst);
        let should_fail = *self.always_fail.lock()
            || self
                .fail_next
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
        let result = if should_fail {
            Err(anyhow::anyhow!("source unreachable"))
        } else {
            Ok(TriggerSample {
                samples: vec![MetricSample::new(metric_name, *self.value_milli.lock())],
                active: *self.active.lock(),
            })
        };
        SampleReport {
            result,
            latency_micros: *self.latency_micros.lock(),
        }
    }

    fn supports_push(&self) -> bool {
        *self.supports_push.lock()
    }

    async fn run_push(&self, activations: mpsc::Sender<bool>) {
        let script = self.push_script.lock().clone();
        for activation in script {
            if activations.send(activation).await.is_err() {
                return;
            }
        }
        activations.closed().await;
    }

    async fn close(&self) {
        self.close_count.fetch_add(1, Ordering::SeqCst);
    }
}

/// Hands out preconfigured adapters by trigger name (or type when the
/// trigger is unnamed).
pub(crate) struct MockProvider {
    adapters: Mutex<HashMap<String, Arc<MockAdapter>>>,
    builds: AtomicUsize,
    fail_builds: Mutex<bool>,
}

impl MockProvider {
    pub fn new() -> Self {
        Self {
            adapters: Mutex::new(HashMap::new()),
            builds: AtomicUsize::new(0),
            fail_builds: Mutex::new(false),
        }
    }

    pub fn set(&self, key: &str, adapter: Arc<MockAdapter>) {
        self.adapters.lock().insert(key.to_owned(), adapter);
    }

    pub fn build_count(&self) -> usize {
        self.builds.load(Ordering::SeqCst)
    }

    pub fn set_fail_builds(&self, fail: bool) {
        *self.fail_builds.lock() = fail;
    }
}

#[async_trait]
impl AdapterProvider for MockProvider {
    async fn build(&self, config: ScalerConfig) -> anyhow::Result<Arc<dyn TriggerAdapter>> {
        if *self.fail_builds.lock() {
            anyhow::bail!("adapter build refused");
        }
        let key = if config.trigger_name.is_empty() {
            config.trigger_type.to_owned()
        } else {
            config.trigger_name.to_owned()
        };
        let adapter = self
            .adapters
            .lock()
            .get(&key)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("no adapter configured for {}", key))?;
        self.builds.fetch_add(1, Ordering::SeqCst);
        Ok(adapter)
    }
}

pub(crate) struct MockResolver {
    fail: Mutex<bool>,
    resolutions: AtomicUsize,
}

impl MockResolver {
    pub fn new() -> Self {
        Self {
            fail: Mutex::new(false),
            resolutions: AtomicUsize::new(0),
        }
    }

    pub fn set_fail(&self, fail: bool) {
        *self.fail.lock() = fail;
    }

    pub fn resolution_count(&self) -> usize {
        self.resolutions.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AuthResolver for MockResolver {
    async fn resolve(
        &self,
        _target: &ScalingTarget,
        trigger: &TriggerSpec,
    ) -> anyhow::Result<ResolvedAuth> {
        if *self.fail.lock() {
            anyhow::bail!("no auth for trigger {}", trigger.type_);
        }
        self.resolutions.fetch_add(1, Ordering::SeqCst);
        Ok(ResolvedAuth::default())
    }
}

pub(crate) struct MockClient {
    targets: Mutex<HashMap<String, ScalingTarget>>,
    scale: Mutex<ScaleSnapshot>,
    fail_scale: Mutex<bool>,
    fail_gets: Mutex<bool>,
    patches: Mutex<Vec<ScalingTarget>>,
}

impl MockClient {
    pub fn new() -> Self {
        Self {
            targets: Mutex::new(HashMap::new()),
            scale: Mutex::new(ScaleSnapshot::default()),
            fail_scale: Mutex::new(false),
            fail_gets: Mutex::new(false),
            patches: Mutex::new(Vec::new()),
        }
    }

    pub fn put(&self, target: &ScalingTarget) {
        self.targets.lock().insert(target.id(), target.clone());
    }

    pub fn set_scale(&self, scale: ScaleSnapshot) {
        *self.scale.lock() = scale;
    }

    pub fn fail_scale_reads(&self) {
        *self.fail_scale.lock() = true;
    }

    pub fn set_fail_gets(&self, fail: bool) {
        *self.fail_gets.lock() = fail;
    }

    pub fn last_patched(&self) -> Option<ScalingTarget> {
        self.patches.lock().last().cloned()
    }

    pub fn patch_count(&self) -> usize {
        self.patches.lock().len()
    }
}

#[async_trait]
impl ClusterClient for MockClient {
    async fn get(&self, target: &TargetRef) -> Result<ScalingTarget, ClusterError> {
        if *self.fail_gets.lock() {
            return Err(ClusterError::Api(anyhow::anyhow!("api server unavailable")));
        }
        self.targets
            .lock()
            .get(&target.id())
            .cloned()
            .ok_or_else(|| ClusterError::NotFound(target.id()))
    }

    async fn scale_snapshot(
        &self,
        _namespace: &str,
        _workload: &WorkloadReference,
    ) -> Result<ScaleSnapshot, ClusterError> {
        if *self.fail_scale.lock() {
            return Err(ClusterError::Api(anyhow::anyhow!("scale read refused")));
        }
        Ok(*self.scale.lock())
    }

    async fn patch_status(
        &self,
        updated: &ScalingTarget,
        _from: &ScalingTarget,
    ) -> Result<(), ClusterError> {
        self.patches.lock().push(updated.clone());
        Ok(())
    }
}

pub(crate) struct MockExecutor {
    scale_calls: Mutex<Vec<(bool, bool)>>,
    job_calls: Mutex<Vec<(bool, i64, i64)>>,
}

impl MockExecutor {
    pub fn new() -> Self {
        Self {
            scale_calls: Mutex::new(Vec::new()),
            job_calls: Mutex::new(Vec::new()),
        }
    }

    pub fn scale_calls(&self) -> Vec<(bool, bool)> {
        self.scale_calls.lock().clone()
    }

    pub fn last_scale(&self) -> Option<(bool, bool)> {
        self.scale_calls.lock().last().copied()
    }

    pub fn job_calls(&self) -> Vec<(bool, i64, i64)> {
        self.job_calls.lock().clone()
    }
}

#[async_trait]
impl ScaleExecutor for MockExecutor {
    async fn request_scale(&self, _target: &ScaledWorkload, active: bool, errored: bool) {
        self.scale_calls.lock().push((active, errored));
    }

    async fn request_job_scale(
        &self,
        _target: &ScaledJob,
        active: bool,
        queue_length: i64,
        max_parallel: i64,
    ) {
        self.job_calls.lock().push((active, queue_length, max_parallel));
    }
}

pub(crate) struct MockRecorder {
    events: Mutex<Vec<(EventSeverity, String, String)>>,
}

impl MockRecorder {
    pub fn new() -> Self {
        Self {
            events: Mutex::new(Vec::new()),
        }
    }

    pub fn reasons(&self) -> Vec<String> {
        self.events
            .lock()
            .iter()
            .map(|(_, reason, _)| reason.to_owned())
            .collect()
    }
}

impl EventRecorder for MockRecorder {
    fn record(&self, _target: &TargetRef, severity: EventSeverity, reason: &str, message: &str) {
        self.events
            .lock()
            .push((severity, reason.to_owned(), message.to_owned()));
    }
}

/// A handler wired to mocks, plus handles on every mock.
pub(crate) struct Harness {
    pub handler: Arc<ScaleHandler>,
    pub client: Arc<MockClient>,
    pub resolver: Arc<MockResolver>,
    pub provider: Arc<MockProvider>,
    pub executor: Arc<MockExecutor>,
    pub recorder: Arc<MockRecorder>,
    pub observability: Arc<CountingObservability>,
}

pub(crate) fn harness() -> Harness {
    harness_with_config(EngineConfig::default())
}

pub(crate) fn harness_with_config(config: EngineConfig) -> Harness {
    let client = Arc::new(MockClient::new());
    let resolver = Arc::new(MockResolver::new());
    let provider = Arc::new(MockProvider::new());
    let executor = Arc::new(MockExecutor::new());
    let recorder = Arc::new(MockRecorder::new());
    let observability = Arc::new(CountingObservability::new());
    let handler = Arc::new(ScaleHandler::new(
        config,
        client.clone(),
        resolver.clone(),
        provider.clone(),
        executor.clone(),
        recorder.clone(),
        observability.clone(),
    ));
    Harness {
        handler,
        client,
        resolver,
        provider,
        executor,
        recorder,
        observability,
    }
}
