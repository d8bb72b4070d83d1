//! Per-target collection of built scalers. Entries are keyed by target
//! id, remember the generation they were built from, and carry the
//! factories needed to rebuild any adapter from scratch.

use std::{sync::Arc, time::Duration};

use resources::objects::{
    metrics::MetricSpec, trigger::TriggerSpec, Object, ScalingTarget,
};

use crate::{
    adapter::{
        AdapterFactory, AdapterProvider, AuthResolver, SampleReport, ScalerConfig, TriggerAdapter,
    },
    error::ScalingError,
    formula::CompiledFormula,
    recorder::EventRecorder,
};

pub mod metrics_cache;

/// Metric names surfaced outside the core carry this per-trigger prefix
/// so two triggers on one target never collide.
pub fn ensure_trigger_prefix(index: usize, name: &str) -> String {
    let prefix = format!("s{}-", index);
    if name.starts_with(&prefix) {
        name.to_owned()
    } else {
        format!("{}{}", prefix, name)
    }
}

/// A built adapter together with its resolved config and the closure
/// that rebuilds it after an auth or config change.
pub struct ScalerBuilder {
    pub adapter: Arc<dyn TriggerAdapter>,
    pub config: ScalerConfig,
    pub factory: AdapterFactory,
}

pub struct ScalersCache {
    target: ScalingTarget,
    builders: Vec<ScalerBuilder>,
    observed_generation: i64,
    compiled_formula: Option<CompiledFormula>,
    recorder: Arc<dyn EventRecorder>,
}

impl ScalersCache {
    pub fn new(
        target: ScalingTarget,
        builders: Vec<ScalerBuilder>,
        compiled_formula: Option<CompiledFormula>,
        recorder: Arc<dyn EventRecorder>,
    ) -> Self {
        let observed_generation = target.generation();
        Self {
            target,
            builders,
            observed_generation,
            compiled_formula,
            recorder,
        }
    }

    pub fn target(&self) -> &ScalingTarget {
        &self.target
    }

    pub fn observed_generation(&self) -> i64 {
        self.observed_generation
    }

    pub fn compiled_formula(&self) -> Option<&CompiledFormula> {
        self.compiled_formula.as_ref()
    }

    pub fn builder_count(&self) -> usize {
        self.builders.len()
    }

    pub fn trigger(&self, index: usize) -> Option<&TriggerSpec> {
        self.target.triggers().get(index)
    }

    /// Adapters advertising push capability, for the push loop.
    pub fn push_adapters(&self) -> Vec<(usize, Arc<dyn TriggerAdapter>)> {
        self.builders
            .iter()
            .enumerate()
            .filter(|(_, builder)| builder.adapter.supports_push())
            .map(|(index, builder)| (index, builder.adapter.clone()))
            .collect()
    }

    /// Metric declarations of one trigger, with external names normalized
    /// to their `s{index}-` prefix.
    pub async fn metric_specs(&self, index: usize) -> Result<Vec<MetricSpec>, ScalingError> {
        let builder = self.builders.get(index).ok_or_else(|| {
            ScalingError::InternalInvariantViolation(format!(
                "no builder at index {} for {}",
                index,
                self.target.id()
            ))
        })?;
        let mut specs =
            builder
                .adapter
                .metric_specs()
                .await
                .map_err(|source| ScalingError::AdapterSampleFailure {
                    target: self.target.id(),
                    metric: builder.config.trigger_type.to_owned(),
                    source,
                })?;
        for spec in &mut specs {
            if let Some(external) = spec.external.as_mut() {
                external.name = ensure_trigger_prefix(index, &external.name);
            }
        }
        Ok(specs)
    }

    /// Sample one metric. A failing adapter is rebuilt through its
    /// factory and retried once before the error is reported.
    pub async fn sample(&mut self, index: usize, metric_name: &str) -> SampleReport {
        let builder = match self.builders.get(index) {
            Some(builder) => builder,
            None => {
                return SampleReport::unmeasured(Err(anyhow::anyhow!(
                    "no builder at index {} for {}",
                    index,
                    self.target.id()
                )))
            },
        };
        let report = builder.adapter.sample(metric_name).await;
        if report.result.is_ok() {
            return report;
        }

        tracing::info!(
            "Trigger {} of {} failed to sample {}, rebuilding adapter",
            index,
            self.target.id(),
            metric_name
        );
        match self.refresh(index).await {
            Ok(()) => self.builders[index].adapter.sample(metric_name).await,
            Err(e) => {
                tracing::error!(
                    "Failed to rebuild adapter {} of {}: {:#}",
                    index,
                    self.target.id(),
                    anyhow::Error::from(e)
                );
                report
            },
        }
    }

    /// Rebuild one adapter from its factory, closing the old instance.
    pub async fn refresh(&mut self, index: usize) -> Result<(), ScalingError> {
        let builder = self.builders.get_mut(index).ok_or_else(|| {
            ScalingError::InternalInvariantViolation(format!(
                "no builder at index {} for {}",
                index,
                self.target.id()
            ))
        })?;
        let (adapter, config) = (builder.factory)().await?;
        let old = std::mem::replace(&mut builder.adapter, adapter);
        old.close().await;
        builder.config = config;
        Ok(())
    }

    /// Close every adapter. Draining the builder list makes a second
    /// close a no-op, so any eviction path may call this.
    pub async fn close(&mut self) {
        for builder in self.builders.drain(..) {
            builder.adapter.close().await;
        }
    }

    pub fn recorder(&self) -> &Arc<dyn EventRecorder> {
        &self.recorder
    }
}

/// Build one adapter and its resolved config.
pub async fn build_adapter(
    target: &ScalingTarget,
    index: usize,
    resolver: &Arc<dyn AuthResolver>,
    provider: &Arc<dyn AdapterProvider>,
    default_http_timeout: Duration,
) -> Result<(Arc<dyn TriggerAdapter>, ScalerConfig), ScalingError> {
    let trigger = target.triggers().get(index).ok_or_else(|| {
        ScalingError::InternalInvariantViolation(format!(
            "no trigger at index {} for {}",
            index,
            target.id()
        ))
    })?;
    let auth =
        resolver
            .resolve(target, trigger)
            .await
            .map_err(|source| ScalingError::ResolveFailure {
                target: target.id(),
                trigger: trigger.type_.to_owned(),
                source,
            })?;
    let config = ScalerConfig::new(target, index, trigger, auth, default_http_timeout);
    let adapter = provider.build(config.clone()).await.map_err(|source| {
        ScalingError::AdapterBuildFailure {
            target: target.id(),
            trigger: trigger.type_.to_owned(),
            source,
        }
    })?;
    Ok((adapter, config))
}

/// Build the full builder list for a target, one entry per declared
/// trigger, each carrying a rebuild factory.
pub async fn build_builders(
    target: &ScalingTarget,
    resolver: &Arc<dyn AuthResolver>,
    provider: &Arc<dyn AdapterProvider>,
    default_http_timeout: Duration,
) -> Result<Vec<ScalerBuilder>, ScalingError> {
    let mut builders = Vec::with_capacity(target.triggers().len());
    for index in 0..target.triggers().len() {
        let (adapter, config) =
            build_adapter(target, index, resolver, provider, default_http_timeout).await?;
        let factory = make_factory(
            target.clone(),
            index,
            resolver.clone(),
            provider.clone(),
            default_http_timeout,
        );
        builders.push(ScalerBuilder {
            adapter,
            config,
            factory,
        });
    }
    Ok(builders)
}

fn make_factory(
    target: ScalingTarget,
    index: usize,
    resolver: Arc<dyn AuthResolver>,
    provider: Arc<dyn AdapterProvider>,
    default_http_timeout: Duration,
) -> AdapterFactory {
    Box::new(move || {
        let target = target.clone();
        let resolver = resolver.clone();
        let provider = provider.clone();
        Box::pin(async move {
            build_adapter(&target, index, &resolver, &provider, default_http_timeout).await
        })
    })
}
