//! Consecutive-failure tracking per `(target, metric)`, mirrored onto the
//! target's status record.

use std::{collections::HashMap, sync::Arc};

use parking_lot::Mutex;
use resources::{
    client::ClusterClient,
    objects::{
        metrics::{set_condition, Condition, ConditionType, HealthState, HealthStatus},
        ScalingTarget,
    },
};

pub struct HealthTracker {
    client: Arc<dyn ClusterClient>,
    state: Mutex<HashMap<String, HashMap<String, HealthStatus>>>,
}

impl HealthTracker {
    pub fn new(client: Arc<dyn ClusterClient>) -> Self {
        Self {
            client,
            state: Mutex::new(HashMap::new()),
        }
    }

    /// Record one sample outcome and persist the updated health map on
    /// the target's status. Patch errors are logged and ignored; the next
    /// tick retries.
    pub async fn record(
        &self,
        target: &ScalingTarget,
        metric_name: &str,
        success: bool,
    ) -> HealthStatus {
        let (status, snapshot) = {
            let mut state = self.state.lock();
            let health = state.entry(target.id()).or_default();
            let entry = health.entry(metric_name.to_owned()).or_default();
            if success {
                entry.consecutive_failures = 0;
                entry.status = HealthState::Happy;
            } else {
                entry.consecutive_failures += 1;
                entry.status = HealthState::Failing;
            }
            (entry.clone(), health.clone())
        };

        let updated = with_health_status(target, snapshot);
        if let Err(e) = self.client.patch_status(&updated, target).await {
            tracing::warn!(
                "Failed to patch health status of {}: {:#}",
                target.id(),
                anyhow::Error::from(e)
            );
        }
        status
    }

    /// Current consecutive failure count for one metric.
    pub fn failures_for(&self, target_id: &str, metric_name: &str) -> u32 {
        self.state
            .lock()
            .get(target_id)
            .and_then(|health| health.get(metric_name))
            .map(|status| status.consecutive_failures)
            .unwrap_or(0)
    }

    pub fn snapshot(&self, target_id: &str) -> HashMap<String, HealthStatus> {
        self.state.lock().get(target_id).cloned().unwrap_or_default()
    }

    /// Drop all tracked state for a deleted target.
    pub fn forget(&self, target_id: &str) {
        self.state.lock().remove(target_id);
    }
}

/// The target with its status health map replaced and the FallbackActive
/// condition recomputed.
fn with_health_status(
    target: &ScalingTarget,
    health: HashMap<String, HealthStatus>,
) -> ScalingTarget {
    let mut updated = target.clone();
    match &mut updated {
        ScalingTarget::Workload(workload) => {
            let fallback_active = workload
                .spec
                .fallback
                .as_ref()
                .filter(|fallback| fallback.is_valid())
                .map(|fallback| {
                    health.values().any(|status| {
                        status.consecutive_failures as i64 > fallback.failure_threshold as i64
                    })
                })
                .unwrap_or(false);
            let mut status = workload.status_or_default();
            status.health = health;
            set_condition(&mut status.conditions, fallback_condition(fallback_active));
            workload.status = Some(status);
        },
        ScalingTarget::Job(job) => {
            let mut status = job.status_or_default();
            status.health = health;
            set_condition(&mut status.conditions, fallback_condition(false));
            job.status = Some(status);
        },
    }
    updated
}

fn fallback_condition(active: bool) -> Condition {
    if active {
        Condition {
            type_: ConditionType::FallbackActive,
            status: true,
            reason: "FallbackExists".to_string(),
            message: "At least one trigger is falling back on this scaling target".to_string(),
        }
    } else {
        Condition {
            type_: ConditionType::FallbackActive,
            status: false,
            reason: "NoFallbackFound".to_string(),
            message: "No fallbacks are active on this scaling target".to_string(),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::test_util::{workload_from_yaml, MockClient};

    const TARGET: &str = r#"
        metadata:
          name: frontend
          namespace: default
          generation: 1
        spec:
          scaleTargetRef: {kind: Deployment, name: frontend}
          fallback:
            failureThreshold: 2
            replicas: 4
          triggers:
            - {type: rabbitmq, name: a}
        status: ~
    "#;

    #[tokio::test]
    async fn failures_accumulate_and_reset() {
        let target = workload_from_yaml(TARGET);
        let client = Arc::new(MockClient::new());
        let tracker = HealthTracker::new(client.clone());

        for expected in 1..=3u32 {
            let status = tracker.record(&target, "s0-queueLength", false).await;
            assert_eq!(status.consecutive_failures, expected);
            assert_eq!(status.status, HealthState::Failing);
        }
        assert_eq!(tracker.failures_for(&target.id(), "s0-queueLength"), 3);

        let status = tracker.record(&target, "s0-queueLength", true).await;
        assert_eq!(status.consecutive_failures, 0);
        assert_eq!(status.status, HealthState::Happy);
        // Every update was persisted through the cluster client.
        assert_eq!(client.patch_count(), 4);
    }

    #[tokio::test]
    async fn patched_status_carries_fallback_condition() {
        let target = workload_from_yaml(TARGET);
        let client = Arc::new(MockClient::new());
        let tracker = HealthTracker::new(client.clone());

        // threshold is 2: two failures keep the condition false
        tracker.record(&target, "s0-queueLength", false).await;
        tracker.record(&target, "s0-queueLength", false).await;
        let patched = client.last_patched().unwrap();
        let status = patched.as_workload().unwrap().status.clone().unwrap();
        assert!(!status.conditions[0].status);

        tracker.record(&target, "s0-queueLength", false).await;
        let patched = client.last_patched().unwrap();
        let status = patched.as_workload().unwrap().status.clone().unwrap();
        assert!(status.conditions[0].status);
        assert_eq!(
            status.health.get("s0-queueLength").unwrap().consecutive_failures,
            3
        );
    }

    #[tokio::test]
    async fn forget_clears_counters() {
        let target = workload_from_yaml(TARGET);
        let tracker = HealthTracker::new(Arc::new(MockClient::new()));
        tracker.record(&target, "s0-queueLength", false).await;
        tracker.forget(&target.id());
        assert_eq!(tracker.failures_for(&target.id(), "s0-queueLength"), 0);
    }
}
