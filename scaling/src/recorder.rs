use resources::objects::TargetRef;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventSeverity {
    Normal,
    Warning,
}

pub mod reason {
    pub const SCALER_FAILED: &str = "ScalerFailed";
    pub const SCALERS_STOPPED: &str = "ScalersStopped";
}

/// Sink for user-visible events about a target. The transport (cluster
/// events, audit log, ...) is the embedder's concern.
pub trait EventRecorder: Send + Sync {
    fn record(&self, target: &TargetRef, severity: EventSeverity, reason: &str, message: &str);
}

/// Records events to the log only.
pub struct LogRecorder;

impl EventRecorder for LogRecorder {
    fn record(&self, target: &TargetRef, severity: EventSeverity, reason: &str, message: &str) {
        match severity {
            EventSeverity::Normal => {
                tracing::info!("Event for {}: {}: {}", target, reason, message)
            },
            EventSeverity::Warning => {
                tracing::warn!("Event for {}: {}: {}", target, reason, message)
            },
        }
    }
}
