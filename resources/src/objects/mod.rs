use enum_dispatch::enum_dispatch;
use serde::{Deserialize, Serialize};
use strum::Display;
use uuid::Uuid;

pub mod fallback;
pub mod metrics;
pub mod modifiers;
pub mod scaled_job;
pub mod scaled_workload;
pub mod trigger;

use scaled_job::ScaledJob;
use scaled_workload::ScaledWorkload;
use trigger::TriggerSpec;

/// Standard object's metadata.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Metadata {
    pub name: String,
    #[serde(default)]
    pub namespace: String,
    #[serde(default)]
    pub uid: Option<Uuid>,
    /// Monotonically increasing integer bumped on every spec change.
    #[serde(default)]
    pub generation: i64,
}

#[derive(Debug, Serialize, Deserialize, Hash, Clone, Copy, Eq, PartialEq, Display)]
pub enum TargetKind {
    Workload,
    Job,
}

/// Reference to a workload (deployment-equivalent or job template)
/// that a scaling target drives.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct WorkloadReference {
    /// Kind of the referent.
    pub kind: String,
    /// Name of the referent.
    pub name: String,
}

/// Identity of one declared scaling target.
#[derive(Debug, Serialize, Deserialize, Hash, Clone, Eq, PartialEq)]
pub struct TargetRef {
    pub kind: TargetKind,
    pub namespace: String,
    pub name: String,
}

impl TargetRef {
    pub fn new(kind: TargetKind, namespace: &str, name: &str) -> Self {
        Self {
            kind,
            namespace: namespace.to_owned(),
            name: name.to_owned(),
        }
    }

    /// Key under which caches and loops for this target are stored.
    pub fn id(&self) -> String {
        format!("{}|{}|{}", self.kind, self.namespace, self.name)
    }
}

impl std::fmt::Display for TargetRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

#[enum_dispatch]
pub trait Object {
    fn kind(&self) -> TargetKind;

    fn metadata(&self) -> &Metadata;

    fn name(&self) -> &String;

    fn namespace(&self) -> &String;

    fn generation(&self) -> i64;

    fn triggers(&self) -> &[TriggerSpec];

    fn polling_interval_secs(&self) -> Option<u32>;

    /// Check that the object converts to the internal triggers-bearing
    /// shape the control core operates on.
    fn validate(&self) -> anyhow::Result<()>;
}

/// A user-declared scaling target of either kind.
#[enum_dispatch(Object)]
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(tag = "kind")]
pub enum ScalingTarget {
    Workload(ScaledWorkload),
    Job(ScaledJob),
}

impl ScalingTarget {
    pub fn target_ref(&self) -> TargetRef {
        TargetRef::new(self.kind(), self.namespace(), self.name())
    }

    /// Key under which caches and loops for this target are stored.
    pub fn id(&self) -> String {
        self.target_ref().id()
    }

    pub fn as_workload(&self) -> Option<&ScaledWorkload> {
        match self {
            ScalingTarget::Workload(workload) => Some(workload),
            ScalingTarget::Job(_) => None,
        }
    }

    pub fn as_job(&self) -> Option<&ScaledJob> {
        match self {
            ScalingTarget::Job(job) => Some(job),
            ScalingTarget::Workload(_) => None,
        }
    }

    pub fn modifiers(&self) -> Option<&modifiers::ScalingModifiers> {
        match self {
            ScalingTarget::Workload(workload) => workload.spec.scaling_modifiers.as_ref(),
            ScalingTarget::Job(_) => None,
        }
    }
}
