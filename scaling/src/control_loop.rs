//! Per-target loops: the periodic evaluation loop and the push
//! activation loop. Both honor the target-scoped cancellation signal and
//! serialize against each other through the target's lock.

use std::sync::Arc;

use resources::objects::{Object, ScalingTarget, TargetKind};
use tokio::{
    select,
    sync::{mpsc, watch},
    time::Instant,
};

use crate::{handler::ScaleHandler, job, workload};

pub(crate) async fn run_periodic(
    handler: Arc<ScaleHandler>,
    target: ScalingTarget,
    mut cancel: watch::Receiver<bool>,
) {
    let id = target.id();
    let target_ref = target.target_ref();
    let interval = handler.polling_interval(&target);
    tracing::info!("Started scale loop for {}, polling every {:?}", id, interval);

    let mut next_wake = Instant::now();
    loop {
        let now = Instant::now();
        let lag = now.saturating_duration_since(next_wake);
        handler.observability.record_loop_lag(&target_ref, lag);
        next_wake = now + interval;

        {
            let lock = handler.target_lock(&id);
            let _guard = lock.lock().await;
            match target.kind() {
                TargetKind::Workload => workload::tick(&handler, &target_ref).await,
                TargetKind::Job => job::tick(&handler, &target_ref).await,
            }
        }

        select! {
            _ = tokio::time::sleep_until(next_wake) => {},
            changed = cancel.changed() => {
                if changed.is_err() || *cancel.borrow() {
                    break;
                }
            },
        }
    }

    handler.invalidate_cache(&id).await;
    tracing::info!("Scale loop for {} exited", id);
}

/// Wire one producer/consumer pair per push-capable adapter. Producers
/// write into a bounded channel and are expected to drop activations on
/// backpressure rather than block.
pub(crate) async fn run_push(
    handler: Arc<ScaleHandler>,
    target: ScalingTarget,
    cancel: watch::Receiver<bool>,
) {
    let entry = match handler.get_scalers_cache(&target).await {
        Ok(entry) => entry,
        Err(e) => {
            tracing::error!("Failed to build scalers for push loop of {}: {}", target.id(), e);
            return;
        },
    };
    let adapters = entry.lock().await.push_adapters();
    if adapters.is_empty() {
        return;
    }
    tracing::info!(
        "Started push loop for {} with {} push-capable triggers",
        target.id(),
        adapters.len()
    );

    for (index, adapter) in adapters {
        let (activations_tx, activations_rx) =
            mpsc::channel::<bool>(handler.config.push_channel_capacity);
        tokio::spawn(async move {
            adapter.run_push(activations_tx).await;
        });
        tokio::spawn(consume_push(
            handler.clone(),
            target.clone(),
            index,
            activations_rx,
            cancel.clone(),
        ));
    }
}

async fn consume_push(
    handler: Arc<ScaleHandler>,
    target: ScalingTarget,
    index: usize,
    mut activations: mpsc::Receiver<bool>,
    mut cancel: watch::Receiver<bool>,
) {
    let id = target.id();
    loop {
        select! {
            maybe = activations.recv() => {
                let active = match maybe {
                    Some(active) => active,
                    None => break,
                };
                match &target {
                    ScalingTarget::Workload(workload) => {
                        let lock = handler.target_lock(&id);
                        let _guard = lock.lock().await;
                        tracing::info!(
                            "Push activation from trigger {} of {}: active={}",
                            index,
                            id,
                            active
                        );
                        handler.executor.request_scale(workload, active, false).await;
                    },
                    ScalingTarget::Job(_) => {
                        tracing::debug!(
                            "Ignoring push activation from trigger {} of job {}",
                            index,
                            id
                        );
                    },
                }
            },
            changed = cancel.changed() => {
                if changed.is_err() || *cancel.borrow() {
                    break;
                }
            },
        }
    }
    tracing::debug!("Push consumer for trigger {} of {} exited", index, id);
}
