use apmx_core::attributes::{Attributes, Destinations};
use apmx_core::model::error_data::ErrorData;
use apmx_core::model::transaction::{ImmutableTransaction, TransactionMetricName};
use apmx_core::model::wire::ErrorTraceWireModel;

#[derive(Debug, Default, Clone, Copy)]
pub struct ErrorTraceMaker;

impl ErrorTraceMaker {
    /// `error` is the transaction's reported error, already resolved by
    /// precedence and with its message policy applied.
    pub fn get_error_trace(
        &self,
        tx: &ImmutableTransaction,
        attributes: &Attributes,
        metric_name: &TransactionMetricName,
        error: &ErrorData,
    ) -> ErrorTraceWireModel {
        ErrorTraceWireModel {
            timestamp: error.noticed_at,
            path: metric_name.prefixed_name(),
            message: error.reported_message().to_string(),
            exception_class_name: error.class_name.clone(),
            guid: Some(tx.guid.clone()),
            attributes: attributes.buckets(Destinations::ERROR_TRACE),
        }
    }
}
