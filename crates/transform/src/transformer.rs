//! Turns one finished transaction into every record the agent reports for it.

use std::sync::Arc;

use apmx_core::attributes::Attributes;
use apmx_core::config::AgentConfig;
use apmx_core::model::error_data::ErrorData;
use apmx_core::model::segment::SegmentData;
use apmx_core::model::transaction::{ImmutableTransaction, TransactionMetricName};
use apmx_core::model::wire::SqlTraceStatsCollection;
use tracing::{debug, warn};

use crate::aggregator::Aggregators;
use crate::attribute_engine::TransactionAttributeEngine;
use crate::error::{Result, TransformError};
use crate::makers::{
    ErrorEventMaker, ErrorTraceMaker, SpanEventMaker, SqlTraceMaker, TransactionEventMaker,
    TransactionTraceMaker,
};
use crate::metrics::{MetricRollupEngine, RollupInput};
use crate::segment_tree::{SegmentTreeNode, build_forest, total_time, walk};
use crate::sql::{RegexObfuscator, SqlObfuscator};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransformOutcome {
    /// The transaction or its metric name is ignored; nothing was submitted.
    Ignored,
    /// Records were submitted. `failed_makers` counts makers that errored and
    /// were skipped.
    Transformed { failed_makers: usize },
}

#[derive(Clone)]
pub struct TransactionTransformer {
    aggregators: Aggregators,
    obfuscator: Arc<dyn SqlObfuscator>,
}

impl TransactionTransformer {
    pub fn new(aggregators: Aggregators) -> Result<Self> {
        Ok(Self::with_obfuscator(aggregators, Arc::new(RegexObfuscator::new()?)))
    }

    pub fn with_obfuscator(aggregators: Aggregators, obfuscator: Arc<dyn SqlObfuscator>) -> Self {
        Self {
            aggregators,
            obfuscator,
        }
    }

    /// Runs every enabled maker over `tx` and hands the results to the
    /// aggregators. A failing maker is logged and skipped; the others still run.
    pub fn transform(
        &self,
        config: &AgentConfig,
        tx: &ImmutableTransaction,
    ) -> Result<TransformOutcome> {
        let metric_name = tx.metric_name();
        let prefixed = metric_name.prefixed_name();
        if metric_name.ignored || config.is_metric_ignored(&prefixed) {
            debug!(guid = %tx.guid, name = %prefixed, "transaction ignored; skipping");
            return Ok(TransformOutcome::Ignored);
        }
        if tx.segments.is_empty() {
            return Err(TransformError::EmptyTransaction {
                guid: tx.guid.to_string(),
            });
        }

        let forest = build_forest(&tx.segments);
        let total_time = total_time(&forest);
        let apdex_t = config.apdex_t_for(&prefixed, tx.is_web());
        let error = tx.error_data(config.strip_exception_messages);
        let mut failed_makers = 0;

        let stats = MetricRollupEngine::new(config).rollup(&RollupInput {
            transaction: tx,
            forest: &forest,
            metric_name: &metric_name,
            apdex_t,
            total_time,
            error: error.as_ref(),
        });

        if config.slow_sql_enabled {
            match self.sql_traces(config, tx, &forest, &metric_name) {
                Ok(traces) if !traces.is_empty() => self.aggregators.sql_traces.collect(traces),
                Ok(_) => {}
                Err(e) => failed_makers += isolate("sql_trace", tx, e),
            }
        }

        let attributes = TransactionAttributeEngine::new(config).get_attributes(
            tx,
            &metric_name,
            apdex_t,
            total_time,
            error.as_ref().filter(|_| config.error_collector_enabled),
            &stats,
        );
        self.aggregators.metrics.collect(stats);

        if let Some(error) = error.as_ref().filter(|_| config.error_collector_enabled) {
            self.report_error(config, tx, &attributes, &metric_name, error);
        }

        if config.transaction_events_enabled {
            self.aggregators
                .transaction_events
                .collect(TransactionEventMaker.get_transaction_event(tx, &attributes));
        }

        if config.transaction_tracer_enabled {
            match TransactionTraceMaker::new(config, self.obfuscator.as_ref())
                .get_transaction_trace(tx, &forest, &metric_name, &attributes)
            {
                Ok(trace) => self.aggregators.transaction_traces.collect(trace),
                Err(e) => failed_makers += isolate("transaction_trace", tx, e),
            }
        }

        if config.distributed_tracing_enabled && config.span_events_enabled && tx.sampled {
            match SpanEventMaker::new(config, self.obfuscator.as_ref())
                .get_span_events(tx, &forest, &prefixed)
            {
                Ok(spans) => self.aggregators.span_events.collect(spans),
                Err(e) => failed_makers += isolate("span_event", tx, e),
            }
        }

        Ok(TransformOutcome::Transformed { failed_makers })
    }

    /// Reports an error noticed outside any transaction as an error event.
    pub fn report_standalone_error(
        &self,
        config: &AgentConfig,
        error: &ErrorData,
        attributes: &Attributes,
        priority: f32,
    ) {
        if config.error_collector_enabled && config.error_collector_capture_events {
            self.aggregators
                .error_events
                .collect(ErrorEventMaker.standalone(error, attributes, priority));
        }
    }

    fn report_error(
        &self,
        config: &AgentConfig,
        tx: &ImmutableTransaction,
        attributes: &Attributes,
        metric_name: &TransactionMetricName,
        error: &ErrorData,
    ) {
        self.aggregators
            .error_traces
            .collect(ErrorTraceMaker.get_error_trace(tx, attributes, metric_name, error));
        if config.error_collector_capture_events {
            self.aggregators
                .error_events
                .collect(ErrorEventMaker.with_transaction(tx, attributes));
        }
    }

    /// Slow datastore calls, merged by statement.
    fn sql_traces(
        &self,
        config: &AgentConfig,
        tx: &ImmutableTransaction,
        forest: &[SegmentTreeNode<'_>],
        metric_name: &TransactionMetricName,
    ) -> Result<SqlTraceStatsCollection> {
        let maker = SqlTraceMaker::new(config, self.obfuscator.as_ref());
        let mut traces = SqlTraceStatsCollection::default();
        for (node, _) in walk(forest) {
            let segment = node.segment();
            let SegmentData::Datastore(datastore) = &segment.data else {
                continue;
            };
            if segment.duration_or_zero() < config.sql_explain_threshold {
                continue;
            }
            if let Some(trace) = maker.try_get_sql_trace(tx, metric_name, segment, datastore)? {
                traces.insert(trace);
            }
        }
        Ok(traces)
    }
}

fn isolate(maker: &'static str, tx: &ImmutableTransaction, e: TransformError) -> usize {
    warn!(error = ?e, maker, guid = %tx.guid, "maker failed; continuing with the rest");
    1
}
