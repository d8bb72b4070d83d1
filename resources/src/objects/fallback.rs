use serde::{Deserialize, Serialize};

/// Substitution policy applied when a trigger has failed more than
/// `failure_threshold` consecutive ticks.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FallbackSpec {
    /// Number of consecutive failures tolerated before substitution.
    pub failure_threshold: i32,
    /// Replica count used by the Static behavior and as the pivot of the
    /// IfHigher/IfLower behaviors.
    #[serde(default)]
    pub replicas: i32,
    #[serde(default)]
    pub behavior: FallbackBehavior,
}

impl FallbackSpec {
    /// An invalid fallback is ignored and the trigger error propagates
    /// unchanged.
    pub fn is_valid(&self) -> bool {
        self.failure_threshold >= 0 && self.replicas >= 0
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub enum FallbackBehavior {
    /// Substitute `replicas` as-is.
    Static,
    /// Substitute the target's current replica count.
    CurrentReplicas,
    /// Substitute the current replica count when it exceeds `replicas`.
    CurrentReplicasIfHigher,
    /// Substitute the current replica count when it is below `replicas`.
    CurrentReplicasIfLower,
    /// Contribute a null value to the formula environment instead of a
    /// replacement number.
    TriggerScoped,
}

impl Default for FallbackBehavior {
    fn default() -> Self {
        FallbackBehavior::Static
    }
}
