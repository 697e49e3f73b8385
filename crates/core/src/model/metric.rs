use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Accumulated timing for one metric name. Times are in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricData {
    pub count: u64,
    pub total: f64,
    pub exclusive: f64,
    pub min: f64,
    pub max: f64,
    pub sum_of_squares: f64,
}

impl MetricData {
    pub fn from_times(total: Duration, exclusive: Duration) -> Self {
        let total = total.as_secs_f64();
        Self {
            count: 1,
            total,
            exclusive: exclusive.as_secs_f64(),
            min: total,
            max: total,
            sum_of_squares: total * total,
        }
    }

    pub fn from_time(total: Duration) -> Self {
        Self::from_times(total, total)
    }

    pub fn count_only(count: u64) -> Self {
        Self {
            count,
            total: 0.0,
            exclusive: 0.0,
            min: 0.0,
            max: 0.0,
            sum_of_squares: 0.0,
        }
    }

    /// Apdex layout: count = satisfying, total = tolerating, exclusive = frustrating,
    /// min = max = apdex threshold.
    pub fn apdex(satisfying: u64, tolerating: u64, frustrating: u64, apdex_t: Duration) -> Self {
        let t = apdex_t.as_secs_f64();
        Self {
            count: satisfying,
            total: tolerating as f64,
            exclusive: frustrating as f64,
            min: t,
            max: t,
            sum_of_squares: 0.0,
        }
    }

    pub fn merge(&mut self, other: &MetricData) {
        self.count += other.count;
        self.total += other.total;
        self.exclusive += other.exclusive;
        self.min = self.min.min(other.min);
        self.max = self.max.max(other.max);
        self.sum_of_squares += other.sum_of_squares;
    }
}

/// Scoped and unscoped stats produced by one transaction.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TransactionMetricStatsCollection {
    pub scope: String,
    pub scoped: BTreeMap<String, MetricData>,
    pub unscoped: BTreeMap<String, MetricData>,
}

impl TransactionMetricStatsCollection {
    pub fn new(scope: impl Into<String>) -> Self {
        Self {
            scope: scope.into(),
            ..Self::default()
        }
    }

    pub fn merge_scoped(&mut self, name: impl Into<String>, data: MetricData) {
        merge_into(&mut self.scoped, name.into(), data);
    }

    pub fn merge_unscoped(&mut self, name: impl Into<String>, data: MetricData) {
        merge_into(&mut self.unscoped, name.into(), data);
    }

    pub fn get_scoped(&self, name: &str) -> Option<&MetricData> {
        self.scoped.get(name)
    }

    pub fn get_unscoped(&self, name: &str) -> Option<&MetricData> {
        self.unscoped.get(name)
    }

    pub fn merge(&mut self, other: &TransactionMetricStatsCollection) {
        for (name, data) in &other.scoped {
            merge_into(&mut self.scoped, name.clone(), *data);
        }
        for (name, data) in &other.unscoped {
            merge_into(&mut self.unscoped, name.clone(), *data);
        }
    }
}

fn merge_into(map: &mut BTreeMap<String, MetricData>, name: String, data: MetricData) {
    map.entry(name)
        .and_modify(|existing| existing.merge(&data))
        .or_insert(data);
}
