use async_trait::async_trait;
use thiserror::Error;

use crate::objects::{ScalingTarget, TargetRef, WorkloadReference};

#[derive(Debug, Error)]
pub enum ClusterError {
    #[error("{0} not found")]
    NotFound(String),
    #[error("cluster api error: {0}")]
    Api(#[from] anyhow::Error),
}

/// Replica counts of the workload a target drives, as last observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ScaleSnapshot {
    pub replicas: u32,
    pub ready_replicas: u32,
}

/// Read/update access to declared targets and their workloads.
/// The engine never talks to the cluster API directly.
#[async_trait]
pub trait ClusterClient: Send + Sync {
    /// Fetch the current spec of a declared scaling target.
    async fn get(&self, target: &TargetRef) -> Result<ScalingTarget, ClusterError>;

    /// Fetch the replica counts of the workload a target points at.
    async fn scale_snapshot(
        &self,
        namespace: &str,
        workload: &WorkloadReference,
    ) -> Result<ScaleSnapshot, ClusterError>;

    /// Patch the target's status record, merging over the previously
    /// observed copy.
    async fn patch_status(
        &self,
        updated: &ScalingTarget,
        from: &ScalingTarget,
    ) -> Result<(), ClusterError>;
}
