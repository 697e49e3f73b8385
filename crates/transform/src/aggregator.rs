//! Sinks for transformer output. Each feature gets its own aggregator and one
//! `collect` call per transaction.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use apmx_core::model::metric::TransactionMetricStatsCollection;
use apmx_core::model::wire::{
    ErrorEventWireModel, ErrorTraceWireModel, SpanEventWireModel, SqlTraceStatsCollection,
    TransactionEventWireModel, TransactionTraceWireModel,
};
use tokio::sync::mpsc;
use tracing::warn;

/// Must be thread-safe and must not block the caller.
pub trait Aggregator<T>: Send + Sync {
    fn collect(&self, item: T);
}

#[derive(Clone)]
pub struct Aggregators {
    pub transaction_events: Arc<dyn Aggregator<TransactionEventWireModel>>,
    pub error_traces: Arc<dyn Aggregator<ErrorTraceWireModel>>,
    pub error_events: Arc<dyn Aggregator<ErrorEventWireModel>>,
    pub sql_traces: Arc<dyn Aggregator<SqlTraceStatsCollection>>,
    pub span_events: Arc<dyn Aggregator<Vec<SpanEventWireModel>>>,
    pub metrics: Arc<dyn Aggregator<TransactionMetricStatsCollection>>,
    pub transaction_traces: Arc<dyn Aggregator<TransactionTraceWireModel>>,
}

/// Forwards items into a bounded channel. Items are dropped with a warning
/// when the channel is full or its receiver is gone.
pub struct ChannelAggregator<T> {
    name: &'static str,
    tx: mpsc::Sender<T>,
}

impl<T> ChannelAggregator<T> {
    pub fn new(name: &'static str, capacity: usize) -> (Self, mpsc::Receiver<T>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { name, tx }, rx)
    }
}

impl<T: Send> Aggregator<T> for ChannelAggregator<T> {
    fn collect(&self, item: T) {
        match self.tx.try_send(item) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(aggregator = self.name, "aggregator channel full; dropping item");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                warn!(aggregator = self.name, "aggregator receiver closed; dropping item");
            }
        }
    }
}

/// Keeps everything it is given.
pub struct RecordingAggregator<T> {
    items: Mutex<Vec<T>>,
}

impl<T> Default for RecordingAggregator<T> {
    fn default() -> Self {
        Self {
            items: Mutex::new(Vec::new()),
        }
    }
}

impl<T> RecordingAggregator<T> {
    fn lock(&self) -> MutexGuard<'_, Vec<T>> {
        self.items.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn take(&self) -> Vec<T> {
        std::mem::take(&mut *self.lock())
    }
}

impl<T: Clone> RecordingAggregator<T> {
    pub fn items(&self) -> Vec<T> {
        self.lock().clone()
    }
}

impl<T: Send> Aggregator<T> for RecordingAggregator<T> {
    fn collect(&self, item: T) {
        self.lock().push(item);
    }
}

/// One [`RecordingAggregator`] per feature.
#[derive(Default, Clone)]
pub struct RecordingAggregators {
    pub transaction_events: Arc<RecordingAggregator<TransactionEventWireModel>>,
    pub error_traces: Arc<RecordingAggregator<ErrorTraceWireModel>>,
    pub error_events: Arc<RecordingAggregator<ErrorEventWireModel>>,
    pub sql_traces: Arc<RecordingAggregator<SqlTraceStatsCollection>>,
    pub span_events: Arc<RecordingAggregator<Vec<SpanEventWireModel>>>,
    pub metrics: Arc<RecordingAggregator<TransactionMetricStatsCollection>>,
    pub transaction_traces: Arc<RecordingAggregator<TransactionTraceWireModel>>,
}

impl RecordingAggregators {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn aggregators(&self) -> Aggregators {
        Aggregators {
            transaction_events: self.transaction_events.clone(),
            error_traces: self.error_traces.clone(),
            error_events: self.error_events.clone(),
            sql_traces: self.sql_traces.clone(),
            span_events: self.span_events.clone(),
            metrics: self.metrics.clone(),
            transaction_traces: self.transaction_traces.clone(),
        }
    }

    /// Total submissions across every feature.
    pub fn total(&self) -> usize {
        self.transaction_events.len()
            + self.error_traces.len()
            + self.error_events.len()
            + self.sql_traces.len()
            + self.span_events.len()
            + self.metrics.len()
            + self.transaction_traces.len()
    }
}
