//! Builders for the wire records submitted to aggregators.

mod error_event;
mod error_trace;
mod span_event;
mod sql_trace;
mod transaction_event;
mod transaction_trace;

pub use error_event::ErrorEventMaker;
pub use error_trace::ErrorTraceMaker;
pub use span_event::SpanEventMaker;
pub use sql_trace::{SqlTraceMaker, UNKNOWN_URI};
pub use transaction_event::TransactionEventMaker;
pub use transaction_trace::TransactionTraceMaker;

use apmx_core::attributes::Attributes;

/// Key whose presence on an event marks it as synthetics traffic.
pub(crate) const SYNTHETICS_RESOURCE_ID: &str = "nr.syntheticsResourceId";

pub(crate) fn carries_synthetics(attributes: &Attributes) -> bool {
    attributes.contains_key(SYNTHETICS_RESOURCE_ID)
}
