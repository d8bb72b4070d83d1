use async_trait::async_trait;
use resources::objects::{scaled_job::ScaledJob, scaled_workload::ScaledWorkload};

/// Applies scaling decisions to the cluster. Fire-and-forget from the
/// tick's point of view; retries and rate limiting are the executor's
/// concern.
#[async_trait]
pub trait ScaleExecutor: Send + Sync {
    /// Reconcile a workload target toward `active`, taking its bounds and
    /// cooldown into account. `errored` is set when any trigger failed
    /// this tick.
    async fn request_scale(&self, target: &ScaledWorkload, active: bool, errored: bool);

    /// Reconcile a job target: launch up to `max_parallel` instances to
    /// drain `queue_length` pending units.
    async fn request_job_scale(
        &self,
        target: &ScaledJob,
        active: bool,
        queue_length: i64,
        max_parallel: i64,
    );
}
