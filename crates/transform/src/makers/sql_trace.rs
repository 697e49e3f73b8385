use std::collections::BTreeMap;

use apmx_core::attributes::AttributeValue;
use apmx_core::config::AgentConfig;
use apmx_core::model::segment::{DatastoreData, Segment};
use apmx_core::model::transaction::{ImmutableTransaction, TransactionMetricName};
use apmx_core::model::wire::SqlTraceWireModel;

use crate::error::Result;
use crate::sql::{SqlObfuscator, prepare_sql, sql_id};

/// URI reported when the request URI is unknown or may not be shared.
pub const UNKNOWN_URI: &str = "<unknown>";

pub struct SqlTraceMaker<'c> {
    config: &'c AgentConfig,
    obfuscator: &'c dyn SqlObfuscator,
}

impl<'c> SqlTraceMaker<'c> {
    pub fn new(config: &'c AgentConfig, obfuscator: &'c dyn SqlObfuscator) -> Self {
        Self { config, obfuscator }
    }

    /// `Ok(None)` when the segment never finished, carries no statement, or
    /// SQL recording is off.
    pub fn try_get_sql_trace(
        &self,
        tx: &ImmutableTransaction,
        metric_name: &TransactionMetricName,
        segment: &Segment,
        datastore: &DatastoreData,
    ) -> Result<Option<SqlTraceWireModel>> {
        let Some(duration) = segment.duration else {
            return Ok(None);
        };
        let Some(raw) = datastore.raw_text.as_deref() else {
            return Ok(None);
        };
        let Some(sql) = prepare_sql(
            self.obfuscator,
            raw,
            self.config.transaction_tracer_record_sql,
        )?
        else {
            return Ok(None);
        };
        let duration = duration.as_secs_f64();
        let datastore_metric_name = datastore.metric_name();

        let uri = if self.config.allow_request_uri {
            tx.metadata.uri.as_deref().unwrap_or(UNKNOWN_URI)
        } else {
            UNKNOWN_URI
        };

        Ok(Some(SqlTraceWireModel {
            transaction_name: metric_name.prefixed_name(),
            uri: uri.to_string(),
            sql_id: sql_id(datastore.vendor(), &sql, &datastore_metric_name),
            sql,
            datastore_metric_name,
            call_count: 1,
            total_call_time: duration,
            min_call_time: duration,
            max_call_time: duration,
            parameter_data: connection_parameters(self.config, datastore),
        }))
    }
}

/// `host`, `port_path_or_id` and `database_name`, each gated by its reporting flag.
pub(crate) fn connection_parameters(
    config: &AgentConfig,
    datastore: &DatastoreData,
) -> BTreeMap<String, AttributeValue> {
    let mut params = BTreeMap::new();
    let Some(conn) = &datastore.connection else {
        return params;
    };
    if config.instance_reporting_enabled {
        if let Some(host) = &conn.host {
            params.insert("host".to_string(), host.as_str().into());
        }
        if let Some(port) = &conn.port_path_or_id {
            params.insert("port_path_or_id".to_string(), port.as_str().into());
        }
    }
    if config.database_name_reporting_enabled {
        if let Some(db) = &conn.database_name {
            params.insert("database_name".to_string(), db.as_str().into());
        }
    }
    params
}
