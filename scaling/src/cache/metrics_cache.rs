//! Short-lived memoization of the most recent sample per
//! `(target, metric)`, used when a trigger opts into cached metrics.

use std::{collections::HashMap, time::Duration};

use chrono::NaiveDateTime;
use dashmap::DashMap;
use resources::objects::metrics::MetricSample;

#[derive(Debug, Clone)]
pub struct MetricsRecord {
    pub metric_name: String,
    pub samples: Vec<MetricSample>,
    pub active: bool,
    pub error: Option<String>,
    pub stored_at: NaiveDateTime,
}

impl MetricsRecord {
    pub fn new(metric_name: &str, samples: Vec<MetricSample>, active: bool) -> Self {
        Self {
            metric_name: metric_name.to_owned(),
            samples,
            active,
            error: None,
            stored_at: chrono::Local::now().naive_utc(),
        }
    }

    pub fn failed(metric_name: &str, error: &str) -> Self {
        Self {
            metric_name: metric_name.to_owned(),
            samples: Vec::new(),
            active: false,
            error: Some(error.to_owned()),
            stored_at: chrono::Local::now().naive_utc(),
        }
    }
}

#[derive(Default)]
pub struct MetricsResultCache {
    records: DashMap<String, HashMap<String, MetricsRecord>>,
}

impl MetricsResultCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn store(&self, target_id: &str, record: MetricsRecord) {
        self.records
            .entry(target_id.to_owned())
            .or_default()
            .insert(record.metric_name.to_owned(), record);
    }

    /// The freshest record for `(target, metric)`, or nothing when the
    /// record is older than `ttl` (the target's polling interval, so one
    /// record serves at most one tick).
    pub fn read(&self, target_id: &str, metric_name: &str, ttl: Duration) -> Option<MetricsRecord> {
        let records = self.records.get(target_id)?;
        let record = records.get(metric_name)?;
        let age = chrono::Local::now().naive_utc() - record.stored_at;
        if age > chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::max_value()) {
            return None;
        }
        Some(record.clone())
    }

    pub fn evict(&self, target_id: &str) {
        self.records.remove(target_id);
    }
}
