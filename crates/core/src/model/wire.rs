//! Output records handed to aggregators.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::attributes::{AttributeBuckets, AttributeValue};
use crate::ids::Guid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionEventWireModel {
    pub attributes: AttributeBuckets,
    pub priority: f32,
    pub is_synthetics: bool,
}

impl TransactionEventWireModel {
    pub fn is_synthetics(&self) -> bool {
        self.is_synthetics
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorEventWireModel {
    pub attributes: AttributeBuckets,
    pub priority: f32,
    pub is_synthetics: bool,
}

impl ErrorEventWireModel {
    pub fn is_synthetics(&self) -> bool {
        self.is_synthetics
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorTraceWireModel {
    pub timestamp: DateTime<Utc>,
    pub path: String,
    pub message: String,
    pub exception_class_name: String,
    pub guid: Option<Guid>,
    pub attributes: AttributeBuckets,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpanEventWireModel {
    pub intrinsics: BTreeMap<String, AttributeValue>,
    pub agent: BTreeMap<String, AttributeValue>,
    pub user: BTreeMap<String, AttributeValue>,
}

impl SpanEventWireModel {
    pub fn intrinsic(&self, key: &str) -> Option<&AttributeValue> {
        self.intrinsics.get(key)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SqlTraceWireModel {
    pub transaction_name: String,
    pub uri: String,
    pub sql_id: u64,
    pub sql: String,
    pub datastore_metric_name: String,
    pub call_count: u64,
    pub total_call_time: f64,
    pub min_call_time: f64,
    pub max_call_time: f64,
    pub parameter_data: BTreeMap<String, AttributeValue>,
}

impl SqlTraceWireModel {
    /// Folds another sample of the same statement into this one. The first
    /// sample's text and parameters are kept.
    pub fn merge(&mut self, other: &SqlTraceWireModel) {
        self.call_count += other.call_count;
        self.total_call_time += other.total_call_time;
        self.min_call_time = self.min_call_time.min(other.min_call_time);
        self.max_call_time = self.max_call_time.max(other.max_call_time);
    }
}

/// SQL traces keyed by statement id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SqlTraceStatsCollection {
    pub traces: BTreeMap<u64, SqlTraceWireModel>,
}

impl SqlTraceStatsCollection {
    pub fn insert(&mut self, trace: SqlTraceWireModel) {
        match self.traces.get_mut(&trace.sql_id) {
            Some(existing) => existing.merge(&trace),
            None => {
                self.traces.insert(trace.sql_id, trace);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.traces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.traces.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceNode {
    /// Offsets from the transaction start, in milliseconds.
    pub start_ms: f64,
    pub end_ms: f64,
    pub name: String,
    pub class_name: String,
    pub method_name: String,
    pub parameters: BTreeMap<String, AttributeValue>,
    pub children: Vec<TraceNode>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionTraceWireModel {
    pub start_time: DateTime<Utc>,
    pub duration_ms: f64,
    pub transaction_name: String,
    pub uri: Option<String>,
    pub guid: Guid,
    pub root: TraceNode,
    pub attributes: AttributeBuckets,
    pub synthetics_resource_id: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sql_trace(id: u64, time: f64) -> SqlTraceWireModel {
        SqlTraceWireModel {
            transaction_name: "WebTransaction/foo/bar".to_string(),
            uri: "/x".to_string(),
            sql_id: id,
            sql: "SELECT ?".to_string(),
            datastore_metric_name: "Datastore/statement/MSSQL/t/select".to_string(),
            call_count: 1,
            total_call_time: time,
            min_call_time: time,
            max_call_time: time,
            parameter_data: BTreeMap::new(),
        }
    }

    #[test]
    fn sql_traces_with_equal_ids_merge() {
        let mut stats = SqlTraceStatsCollection::default();
        stats.insert(sql_trace(1, 2.0));
        stats.insert(sql_trace(1, 1.0));
        stats.insert(sql_trace(2, 3.0));

        assert_eq!(stats.len(), 2);
        let merged = &stats.traces[&1];
        assert_eq!(merged.call_count, 2);
        assert_eq!(merged.total_call_time, 3.0);
        assert_eq!(merged.min_call_time, 1.0);
        assert_eq!(merged.max_call_time, 2.0);
    }
}
