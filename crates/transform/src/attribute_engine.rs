//! Derives the intrinsic, agent and user attributes of a finished transaction
//! and routes each one to the outputs allowed to carry it.

use std::time::Duration;

use apmx_core::attributes::{
    Attribute, Attributes, Destinations, MAX_ATTRIBUTE_BYTES, truncate_to_bytes,
};
use apmx_core::config::AgentConfig;
use apmx_core::model::error_data::ErrorData;
use apmx_core::model::metric::TransactionMetricStatsCollection;
use apmx_core::model::transaction::{
    ImmutableTransaction, TransactionMetadata, TransactionMetricName,
};
use apmx_core::time::epoch_millis;

use crate::metrics::{ApdexZone, names};

const TE: Destinations = Destinations::TRANSACTION_EVENT;
const TT: Destinations = Destinations::TRANSACTION_TRACE;
const EE: Destinations = Destinations::ERROR_EVENT;
const ET: Destinations = Destinations::ERROR_TRACE;
const ST: Destinations = Destinations::SQL_TRACE;
const TRACES_AND_EVENTS: Destinations = Destinations::ALL_TRACES_AND_EVENTS;

const UNKNOWN_URI: &str = "/Unknown";

pub struct TransactionAttributeEngine<'c> {
    config: &'c AgentConfig,
}

impl<'c> TransactionAttributeEngine<'c> {
    pub fn new(config: &'c AgentConfig) -> Self {
        Self { config }
    }

    /// Full attribute set for one transaction. Pure: the same inputs always
    /// produce the same attributes in the same order.
    pub fn get_attributes(
        &self,
        tx: &ImmutableTransaction,
        metric_name: &TransactionMetricName,
        apdex_t: Option<Duration>,
        total_time: Duration,
        error: Option<&ErrorData>,
        tx_stats: &TransactionMetricStatsCollection,
    ) -> Attributes {
        let mut attrs = Attributes::new();
        self.add_basic(&mut attrs, tx, metric_name, total_time, tx_stats);
        if let Some(apdex_t) = apdex_t {
            let zone = ApdexZone::classify(tx.response_time_or_duration(), apdex_t, error.is_some());
            attrs.add(Attribute::intrinsic("nr.apdexPerfZone", zone.as_str(), TE));
        }
        if let Some(error) = error {
            add_error(&mut attrs, error);
        }
        self.add_cat(&mut attrs, tx);
        self.add_distributed_trace(&mut attrs, tx);
        add_synthetics(&mut attrs, tx);

        attrs.add_all(self.get_user_and_agent_attributes(&tx.metadata).iter().cloned());
        if let Some(error) = error {
            attrs.add_all(
                error
                    .custom_attributes
                    .iter()
                    .map(|(k, v)| Attribute::user_error(k, v.clone())),
            );
        }
        attrs
    }

    /// Agent attributes from request metadata plus the user's custom attributes.
    pub fn get_user_and_agent_attributes(&self, metadata: &TransactionMetadata) -> Attributes {
        let mut attrs = Attributes::new();

        if let Some(original) = &metadata.original_uri {
            if metadata.uri.as_deref() != Some(original.as_str()) {
                attrs.add(Attribute::agent("original_url", original.as_str(), ET | TT | EE));
            }
        }
        attrs.add(Attribute::agent(
            "request.uri",
            metadata.uri.as_deref().unwrap_or(UNKNOWN_URI),
            TE | EE | ET | TT | ST,
        ));
        if let Some(referer) = &metadata.referrer_uri {
            attrs.add(Attribute::agent("request.referer", referer.as_str(), ET | TT | EE));
        }
        if let Some(queue_time) = metadata.queue_time {
            attrs.add(Attribute::agent(
                "queue_wait_time_ms",
                queue_time.as_millis().to_string(),
                ET | TT | EE,
            ));
        }
        if let Some(status) = metadata.http_status_code {
            attrs.add(Attribute::agent("response.status", status.to_string(), ET | TT | TE | EE));
            attrs.add(Attribute::agent("http.statusCode", status, ET | TT | TE | EE));
        }
        // Tracked but routed nowhere until a destination filter opts them in.
        if self.config.capture_request_parameters {
            for (key, value) in &metadata.request_parameters {
                attrs.add(Attribute::agent(
                    format!("request.parameters.{}", truncate_to_bytes(key, MAX_ATTRIBUTE_BYTES)),
                    truncate_to_bytes(value, MAX_ATTRIBUTE_BYTES),
                    Destinations::NONE,
                ));
            }
        }
        if let Some(host) = &self.config.process_host_display_name {
            attrs.add(Attribute::agent("host.displayName", host.as_str(), TT | TE | ET | EE));
        }

        attrs.add_all(
            metadata
                .user_attributes
                .iter()
                .map(|(k, v)| Attribute::user(k, v.clone())),
        );
        attrs
    }

    fn add_basic(
        &self,
        attrs: &mut Attributes,
        tx: &ImmutableTransaction,
        metric_name: &TransactionMetricName,
        total_time: Duration,
        tx_stats: &TransactionMetricStatsCollection,
    ) {
        let prefixed = metric_name.prefixed_name();
        attrs.add(Attribute::intrinsic("type", "Transaction", TE));
        attrs.add(Attribute::intrinsic("timestamp", epoch_millis(tx.start_time), TE));
        attrs.add(Attribute::intrinsic("name", prefixed.as_str(), TE));
        attrs.add(Attribute::intrinsic("transactionName", prefixed, EE));
        let duration = tx.response_time_or_duration().as_secs_f64();
        attrs.add(Attribute::intrinsic("duration", duration, TE | EE));
        attrs.add(Attribute::intrinsic("totalTime", total_time.as_secs_f64(), TE | TT));
        if tx.is_web() {
            attrs.add(Attribute::intrinsic("webDuration", duration, TE));
        }
        if let Some(queue_time) = tx.metadata.queue_time {
            attrs.add(Attribute::intrinsic("queueDuration", queue_time.as_secs_f64(), TE | EE));
        }
        if let Some(db) = tx_stats.get_unscoped(names::DATASTORE_ALL) {
            attrs.add(Attribute::intrinsic("databaseDuration", db.total, TE | EE));
            attrs.add(Attribute::intrinsic("databaseCallCount", db.count, TE | EE));
        }
        if let Some(ext) = tx_stats.get_unscoped(names::EXTERNAL_ALL) {
            attrs.add(Attribute::intrinsic("externalDuration", ext.total, TE | EE));
            attrs.add(Attribute::intrinsic("externalCallCount", ext.count, TE | EE));
        }
        if !self.config.distributed_tracing_enabled {
            let trip_id = tx
                .metadata
                .cat
                .referrer_trip_id
                .clone()
                .unwrap_or_else(|| tx.guid.to_string());
            attrs.add(Attribute::intrinsic("trip_id", trip_id.as_str(), ET | TT));
            attrs.add(Attribute::intrinsic("nr.tripId", trip_id, TE));
        }
    }

    fn cat_enabled(&self) -> bool {
        self.config.cross_application_tracing_enabled && !self.config.distributed_tracing_enabled
    }

    fn add_cat(&self, attrs: &mut Attributes, tx: &ImmutableTransaction) {
        let cat = &tx.metadata.cat;
        let participant = self.cat_enabled() && cat.is_participant();
        if participant || tx.is_synthetics() {
            attrs.add(Attribute::intrinsic("nr.guid", tx.guid.to_string(), TE | EE));
        }
        if !participant {
            return;
        }
        if let Some(hash) = &cat.referrer_path_hash {
            attrs.add(Attribute::intrinsic("nr.referringPathHash", hash.as_str(), TE));
        }
        if let Some(hash) = cat.path_hash() {
            attrs.add(Attribute::intrinsic("path_hash", hash, ET | TT));
            attrs.add(Attribute::intrinsic("nr.pathHash", hash, TE));
        }
        if let Some(process_id) = &cat.referrer_process_id {
            attrs.add(Attribute::intrinsic("client_cross_process_id", process_id.as_str(), ET | TT));
        }
        if let Some(guid) = &cat.referrer_transaction_guid {
            attrs.add(Attribute::intrinsic("referring_transaction_guid", guid.as_str(), ET | TT));
            attrs.add(Attribute::intrinsic("nr.referringTransactionGuid", guid.as_str(), TE | EE));
        }
        if let Some(alternates) = cat.alternate_path_hashes() {
            attrs.add(Attribute::intrinsic("nr.alternatePathHashes", alternates, TE));
        }
    }

    fn add_distributed_trace(&self, attrs: &mut Attributes, tx: &ImmutableTransaction) {
        if !self.config.distributed_tracing_enabled {
            return;
        }
        let Some(state) = &tx.tracing_state else {
            return;
        };
        let optional = [
            ("parent.type", &state.parent_type),
            ("parent.app", &state.app_id),
            ("parent.account", &state.account_id),
            ("parent.transportType", &state.transport_type),
        ];
        for (key, value) in optional {
            if let Some(value) = value {
                attrs.add(Attribute::intrinsic(key, value.as_str(), TRACES_AND_EVENTS));
            }
        }
        if let Some(transport) = state.transport_duration {
            attrs.add(Attribute::intrinsic(
                "parent.transportDuration",
                transport.as_secs_f64(),
                TRACES_AND_EVENTS,
            ));
        }
        if let Some(parent_tx) = &state.transaction_id {
            attrs.add(Attribute::intrinsic("parentId", parent_tx.as_str(), TE));
        }
        if let Some(parent_span) = &state.guid {
            attrs.add(Attribute::intrinsic("parentSpanId", parent_span.as_str(), TE));
        }
        attrs.add(Attribute::intrinsic("guid", tx.guid.to_string(), TRACES_AND_EVENTS));
        attrs.add(Attribute::intrinsic("traceId", tx.trace_id.as_str(), TRACES_AND_EVENTS));
        attrs.add(Attribute::intrinsic("priority", tx.priority, TRACES_AND_EVENTS));
        attrs.add(Attribute::intrinsic("sampled", tx.sampled, TRACES_AND_EVENTS));
    }
}

fn add_error(attrs: &mut Attributes, error: &ErrorData) {
    let message = error.reported_message();
    attrs.add(Attribute::intrinsic("type", "TransactionError", EE));
    attrs.add(Attribute::intrinsic("timestamp", epoch_millis(error.noticed_at), EE));
    attrs.add(Attribute::intrinsic("error.class", error.class_name.as_str(), EE));
    attrs.add(Attribute::intrinsic("error.message", message, EE));
    attrs.add(Attribute::intrinsic("errorType", error.class_name.as_str(), TE));
    attrs.add(Attribute::intrinsic("errorMessage", message, TE));
    attrs.add(Attribute::intrinsic("error", true, TE));
}

fn add_synthetics(attrs: &mut Attributes, tx: &ImmutableTransaction) {
    let Some(synthetics) = &tx.metadata.synthetics else {
        return;
    };
    let pairs = [
        ("nr.syntheticsResourceId", "synthetics_resource_id", &synthetics.resource_id),
        ("nr.syntheticsJobId", "synthetics_job_id", &synthetics.job_id),
        ("nr.syntheticsMonitorId", "synthetics_monitor_id", &synthetics.monitor_id),
    ];
    for (event_key, trace_key, value) in pairs {
        attrs.add(Attribute::intrinsic(event_key, value.as_str(), TE | EE));
        attrs.add(Attribute::intrinsic(trace_key, value.as_str(), TT));
    }
}
