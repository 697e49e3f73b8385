use std::collections::BTreeMap;
use std::time::Duration;

use apmx_core::attributes::{AttributeValue, Attributes, Destinations};
use apmx_core::config::AgentConfig;
use apmx_core::model::segment::SegmentData;
use apmx_core::model::transaction::{ImmutableTransaction, TransactionMetricName};
use apmx_core::model::wire::{TraceNode, TransactionTraceWireModel};

use super::sql_trace::connection_parameters;
use crate::error::{Result, TransformError};
use crate::segment_tree::SegmentTreeNode;
use crate::sql::{SqlObfuscator, prepare_sql};

const ROOT_NODE: &str = "ROOT";
const TRANSACTION_NODE: &str = "Transaction";

pub struct TransactionTraceMaker<'c> {
    config: &'c AgentConfig,
    obfuscator: &'c dyn SqlObfuscator,
}

impl<'c> TransactionTraceMaker<'c> {
    pub fn new(config: &'c AgentConfig, obfuscator: &'c dyn SqlObfuscator) -> Self {
        Self { config, obfuscator }
    }

    /// Wraps the forest in a `ROOT` node and a `Transaction` node that both
    /// span the whole transaction.
    pub fn get_transaction_trace(
        &self,
        tx: &ImmutableTransaction,
        forest: &[SegmentTreeNode<'_>],
        metric_name: &TransactionMetricName,
        attributes: &Attributes,
    ) -> Result<TransactionTraceWireModel> {
        if forest.is_empty() {
            return Err(TransformError::Maker {
                maker: "transaction_trace",
                reason: "segment forest is empty".to_string(),
            });
        }

        let end_ms = millis(tx.duration);
        let children = forest
            .iter()
            .map(|node| self.trace_node(node))
            .collect::<Result<Vec<_>>>()?;
        let transaction = synthetic_node(TRANSACTION_NODE, end_ms, children);
        let root = synthetic_node(ROOT_NODE, end_ms, vec![transaction]);

        Ok(TransactionTraceWireModel {
            start_time: tx.start_time,
            duration_ms: millis(tx.response_time_or_duration()),
            transaction_name: metric_name.prefixed_name(),
            uri: tx.metadata.uri.clone(),
            guid: tx.guid.clone(),
            root,
            attributes: attributes.buckets(Destinations::TRANSACTION_TRACE),
            synthetics_resource_id: tx
                .metadata
                .synthetics
                .as_ref()
                .map(|s| s.resource_id.clone()),
        })
    }

    fn trace_node(&self, node: &SegmentTreeNode<'_>) -> Result<TraceNode> {
        let segment = node.segment();
        let mut parameters = BTreeMap::new();
        parameters.insert(
            "exclusive_duration_millis".to_string(),
            AttributeValue::Float(millis(node.exclusive_duration())),
        );
        match &segment.data {
            SegmentData::Simple { .. } => {}
            SegmentData::Datastore(ds) => {
                let sql = match ds.raw_text.as_deref() {
                    Some(raw) => {
                        prepare_sql(self.obfuscator, raw, self.config.transaction_tracer_record_sql)?
                    }
                    None => None,
                };
                if let Some(sql) = sql {
                    parameters.insert("sql".to_string(), sql.into());
                }
                parameters.extend(connection_parameters(self.config, ds));
            }
            SegmentData::External(ext) => {
                parameters.insert("uri".to_string(), ext.uri.as_str().into());
            }
        }

        let children = node
            .children()
            .iter()
            .map(|c| self.trace_node(c))
            .collect::<Result<Vec<_>>>()?;
        Ok(TraceNode {
            start_ms: millis(segment.relative_start),
            end_ms: millis(segment.relative_end()),
            name: segment.name(),
            class_name: segment.method_call.type_name.clone(),
            method_name: segment.method_call.method_name.clone(),
            parameters,
            children,
        })
    }
}

fn synthetic_node(name: &str, end_ms: f64, children: Vec<TraceNode>) -> TraceNode {
    TraceNode {
        start_ms: 0.0,
        end_ms,
        name: name.to_string(),
        class_name: String::new(),
        method_name: String::new(),
        parameters: BTreeMap::new(),
        children,
    }
}

fn millis(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}
