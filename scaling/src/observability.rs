use std::{collections::HashMap, time::Duration};

use parking_lot::Mutex;
use resources::objects::TargetRef;

/// Sink for engine-internal measurements. Counters behind this trait are
/// the only mutable state intentionally shared across targets.
pub trait Observability: Send + Sync {
    /// How late a loop iteration started relative to its schedule.
    fn record_loop_lag(&self, target: &TargetRef, lag: Duration);

    /// Source latency of one sample call, in microseconds.
    fn record_sample_latency(&self, target: &TargetRef, metric: &str, latency_micros: i64);
}

pub struct NoopObservability;

impl Observability for NoopObservability {
    fn record_loop_lag(&self, _target: &TargetRef, _lag: Duration) {}

    fn record_sample_latency(&self, _target: &TargetRef, _metric: &str, _latency_micros: i64) {}
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LatencyCounter {
    pub observations: u64,
    pub total_micros: i64,
}

/// In-memory aggregation, usable as-is by embedders that scrape rather
/// than stream.
#[derive(Default)]
pub struct CountingObservability {
    loop_lags: Mutex<HashMap<String, (u64, Duration)>>,
    latencies: Mutex<HashMap<String, LatencyCounter>>,
}

impl CountingObservability {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn loop_lag(&self, target: &TargetRef) -> Option<(u64, Duration)> {
        self.loop_lags.lock().get(&target.id()).copied()
    }

    pub fn latency(&self, target: &TargetRef, metric: &str) -> Option<LatencyCounter> {
        self.latencies
            .lock()
            .get(&latency_key(target, metric))
            .copied()
    }
}

fn latency_key(target: &TargetRef, metric: &str) -> String {
    format!("{}|{}", target.id(), metric)
}

impl Observability for CountingObservability {
    fn record_loop_lag(&self, target: &TargetRef, lag: Duration) {
        let mut lags = self.loop_lags.lock();
        let entry = lags.entry(target.id()).or_insert((0, Duration::ZERO));
        entry.0 += 1;
        entry.1 += lag;
    }

    fn record_sample_latency(&self, target: &TargetRef, metric: &str, latency_micros: i64) {
        let mut latencies = self.latencies.lock();
        let entry = latencies.entry(latency_key(target, metric)).or_default();
        entry.observations += 1;
        entry.total_micros += latency_micros;
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use resources::objects::TargetKind;

    #[test]
    fn counting_sink_aggregates() {
        let sink = CountingObservability::new();
        let target = TargetRef::new(TargetKind::Workload, "default", "frontend");

        sink.record_loop_lag(&target, Duration::from_millis(5));
        sink.record_loop_lag(&target, Duration::from_millis(7));
        assert_eq!(
            sink.loop_lag(&target),
            Some((2, Duration::from_millis(12)))
        );

        sink.record_sample_latency(&target, "s0-queueLength", 100);
        sink.record_sample_latency(&target, "s0-queueLength", 250);
        let counter = sink.latency(&target, "s0-queueLength").unwrap();
        assert_eq!(counter.observations, 2);
        assert_eq!(counter.total_micros, 350);
    }
}
