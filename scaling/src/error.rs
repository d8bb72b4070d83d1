use thiserror::Error;

/// Errors produced by the control core. Collaborator failures are carried
/// as opaque sources.
#[derive(Debug, Error)]
pub enum ScalingError {
    #[error("invalid scaling target {target}: {reason}")]
    InvalidTarget { target: String, reason: String },

    #[error("failed to resolve auth for trigger {trigger} of {target}")]
    ResolveFailure {
        target: String,
        trigger: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("failed to build adapter for trigger {trigger} of {target}")]
    AdapterBuildFailure {
        target: String,
        trigger: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("failed to sample {metric} of {target}")]
    AdapterSampleFailure {
        target: String,
        metric: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("{0} not found")]
    NotFound(String),

    #[error("failed to compile formula {formula}: {reason}")]
    FormulaCompileFailure { formula: String, reason: String },

    #[error("failed to evaluate formula: {0}")]
    FormulaEvaluationFailure(String),

    #[error("internal invariant violated: {0}")]
    InternalInvariantViolation(String),
}
