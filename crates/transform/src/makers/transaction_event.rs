use apmx_core::attributes::{Attributes, Destinations};
use apmx_core::model::transaction::ImmutableTransaction;
use apmx_core::model::wire::TransactionEventWireModel;

use super::carries_synthetics;

#[derive(Debug, Default, Clone, Copy)]
pub struct TransactionEventMaker;

impl TransactionEventMaker {
    pub fn get_transaction_event(
        &self,
        tx: &ImmutableTransaction,
        attributes: &Attributes,
    ) -> TransactionEventWireModel {
        let filtered = attributes.filter(Destinations::TRANSACTION_EVENT);
        TransactionEventWireModel {
            is_synthetics: carries_synthetics(&filtered),
            attributes: filtered.buckets(Destinations::TRANSACTION_EVENT),
            priority: tx.priority,
        }
    }
}
