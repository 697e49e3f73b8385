use apmx_core::attributes::{Attribute, Attributes, Destinations};
use apmx_core::model::error_data::ErrorData;
use apmx_core::model::transaction::ImmutableTransaction;
use apmx_core::model::wire::ErrorEventWireModel;
use apmx_core::time::epoch_millis;

use super::carries_synthetics;

const EE: Destinations = Destinations::ERROR_EVENT;

#[derive(Debug, Default, Clone, Copy)]
pub struct ErrorEventMaker;

impl ErrorEventMaker {
    /// Event for an error inside a transaction whose attributes were already computed.
    pub fn with_transaction(
        &self,
        tx: &ImmutableTransaction,
        attributes: &Attributes,
    ) -> ErrorEventWireModel {
        package(attributes, tx.priority)
    }

    /// Event for an error noticed outside any transaction.
    pub fn standalone(
        &self,
        error: &ErrorData,
        attributes: &Attributes,
        priority: f32,
    ) -> ErrorEventWireModel {
        let mut all = Attributes::new();
        all.add(Attribute::intrinsic("type", "TransactionError", EE));
        all.add(Attribute::intrinsic("timestamp", epoch_millis(error.noticed_at), EE));
        all.add(Attribute::intrinsic("error.class", error.class_name.as_str(), EE));
        all.add(Attribute::intrinsic("error.message", error.reported_message(), EE));
        all.add_all(attributes.iter().cloned());
        all.add_all(
            error
                .custom_attributes
                .iter()
                .map(|(k, v)| Attribute::user_error(k, v.clone())),
        );
        package(&all, priority)
    }
}

fn package(attributes: &Attributes, priority: f32) -> ErrorEventWireModel {
    let filtered = attributes.filter(EE);
    ErrorEventWireModel {
        is_synthetics: carries_synthetics(&filtered),
        attributes: filtered.buckets(EE),
        priority,
    }
}

#[cfg(test)]
mod tests {
    use apmx_core::attributes::AttributeValue;

    use super::*;

    #[test]
    fn transaction_errors_use_precomputed_attributes() {
        let tx = testkit::sample_web_transaction();
        let mut attributes = Attributes::new();
        attributes.add(Attribute::intrinsic(
            "type",
            "Transaction",
            Destinations::TRANSACTION_EVENT,
        ));
        attributes.add(Attribute::intrinsic("type", "TransactionError", EE));
        attributes.add(Attribute::intrinsic("nr.syntheticsResourceId", "r", EE));

        let event = ErrorEventMaker.with_transaction(&tx, &attributes);
        assert_eq!(
            event.attributes.intrinsics.get("type"),
            Some(&AttributeValue::from("TransactionError"))
        );
        assert!(event.is_synthetics());
        assert_eq!(event.priority, tx.priority);
    }

    #[test]
    fn standalone_errors_build_their_own_intrinsics() {
        let ts = testkit::start_time();
        let mut error = ErrorData::new("boom", "Boom", ts);
        error
            .custom_attributes
            .push(("order".to_string(), AttributeValue::Int(7)));
        let mut attributes = Attributes::new();
        attributes.add(Attribute::agent(
            "host.displayName",
            "test-host",
            Destinations::ALL,
        ));
        attributes.add(Attribute::agent("hidden", "x", Destinations::TRANSACTION_TRACE));

        let event = ErrorEventMaker.standalone(&error, &attributes, 0.25);
        let intrinsics = &event.attributes.intrinsics;
        assert_eq!(intrinsics.get("error.class"), Some(&AttributeValue::from("Boom")));
        assert_eq!(intrinsics.get("error.message"), Some(&AttributeValue::from("boom")));
        assert_eq!(intrinsics.get("timestamp"), Some(&AttributeValue::Int(1531897200000)));
        assert_eq!(event.attributes.agent.len(), 1);
        assert_eq!(event.attributes.user.get("order"), Some(&AttributeValue::Int(7)));
        assert_eq!(event.priority, 0.25);
        assert!(!event.is_synthetics());
    }
}
