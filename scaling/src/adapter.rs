//! Contracts between the control core and the per-trigger adapters.
//! Concrete adapters (message queues, metric stores, cloud APIs) live
//! outside the core; the engine only sees these traits.

use std::{collections::HashMap, sync::Arc, time::Duration};

use async_trait::async_trait;
use futures_util::future::BoxFuture;
use resources::objects::{
    metrics::{MetricSample, MetricSpec, MetricType},
    trigger::TriggerSpec,
    ScalingTarget, TargetRef,
};
use tokio::sync::mpsc;

use crate::error::ScalingError;

/// Trigger metadata key overriding the engine-wide HTTP timeout.
pub const HTTP_TIMEOUT_METADATA_KEY: &str = "httpTimeoutMs";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PodIdentity {
    None,
    AwsEks,
    AzureWorkload,
    GcpWorkload,
}

impl Default for PodIdentity {
    fn default() -> Self {
        PodIdentity::None
    }
}

/// Auth material produced by the resolver for one trigger.
#[derive(Debug, Clone, Default)]
pub struct ResolvedAuth {
    pub env: HashMap<String, String>,
    pub auth_params: HashMap<String, String>,
    pub pod_identity: PodIdentity,
}

/// Resolves a trigger's auth reference into adapter inputs. The core
/// never parses secrets itself.
#[async_trait]
pub trait AuthResolver: Send + Sync {
    async fn resolve(
        &self,
        target: &ScalingTarget,
        trigger: &TriggerSpec,
    ) -> anyhow::Result<ResolvedAuth>;
}

/// Final inputs handed to one adapter instance.
#[derive(Debug, Clone)]
pub struct ScalerConfig {
    /// The scaling target owning this trigger.
    pub target: TargetRef,
    /// Position of the trigger in the target's declaration order.
    pub trigger_index: usize,
    pub trigger_type: String,
    pub trigger_name: String,
    pub trigger_metadata: HashMap<String, String>,
    pub env: HashMap<String, String>,
    pub auth_params: HashMap<String, String>,
    pub pod_identity: PodIdentity,
    pub http_timeout: Duration,
    pub metric_type: MetricType,
    /// Unique for the lifetime of one adapter instance.
    pub key: String,
}

impl ScalerConfig {
    pub fn new(
        target: &ScalingTarget,
        trigger_index: usize,
        trigger: &TriggerSpec,
        auth: ResolvedAuth,
        default_http_timeout: Duration,
    ) -> Self {
        let http_timeout = trigger
            .metadata
            .get(HTTP_TIMEOUT_METADATA_KEY)
            .and_then(|raw| raw.parse::<u64>().ok())
            .map(Duration::from_millis)
            .unwrap_or(default_http_timeout);
        Self {
            target: target.target_ref(),
            trigger_index,
            trigger_type: trigger.type_.to_owned(),
            trigger_name: trigger.name.to_owned(),
            trigger_metadata: trigger.metadata.clone(),
            env: auth.env,
            auth_params: auth.auth_params,
            pod_identity: auth.pod_identity,
            http_timeout,
            metric_type: trigger.metric_type,
            key: uuid::Uuid::new_v4().to_string(),
        }
    }
}

/// One successful read from an external source.
#[derive(Debug, Clone, Default)]
pub struct TriggerSample {
    pub samples: Vec<MetricSample>,
    pub active: bool,
}

/// Outcome of one `sample` call, with the observed source latency.
#[derive(Debug)]
pub struct SampleReport {
    pub result: anyhow::Result<TriggerSample>,
    /// Microseconds spent talking to the source, or -1 when unmeasured.
    pub latency_micros: i64,
}

impl SampleReport {
    pub fn unmeasured(result: anyhow::Result<TriggerSample>) -> Self {
        Self {
            result,
            latency_micros: -1,
        }
    }
}

/// The per-trigger adapter the engine polls. One instance per declared
/// trigger; instances are rebuilt through their factory whenever the
/// cache entry is invalidated.
#[async_trait]
pub trait TriggerAdapter: Send + Sync {
    /// Metric declarations for this trigger. Pure; may be called many
    /// times per tick.
    async fn metric_specs(&self) -> anyhow::Result<Vec<MetricSpec>>;

    /// Sample the external source. May block on the network; must honor
    /// the configured timeout.
    async fn sample(&self, metric_name: &str) -> SampleReport;

    /// Whether `run_push` delivers activation events.
    fn supports_push(&self) -> bool {
        false
    }

    /// Long-running producer of activation events. Send on every observed
    /// state change, drop events on backpressure rather than block, and
    /// return once the channel closes.
    async fn run_push(&self, _activations: mpsc::Sender<bool>) {}

    /// Release network resources. Called exactly once when the owning
    /// cache entry is evicted.
    async fn close(&self) {}
}

/// Builds concrete adapters from resolved configs.
#[async_trait]
pub trait AdapterProvider: Send + Sync {
    async fn build(&self, config: ScalerConfig) -> anyhow::Result<Arc<dyn TriggerAdapter>>;
}

/// Rebuilds one adapter from scratch, capturing everything needed so the
/// cache can recover from credential or config drift without re-walking
/// the target.
pub type AdapterFactory = Box<
    dyn Fn() -> BoxFuture<'static, Result<(Arc<dyn TriggerAdapter>, ScalerConfig), ScalingError>>
        + Send
        + Sync,
>;
