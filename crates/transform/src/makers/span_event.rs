use std::collections::BTreeMap;

use apmx_core::attributes::AttributeValue;
use apmx_core::config::AgentConfig;
use apmx_core::ids::Guid;
use apmx_core::model::segment::{DatastoreData, ExternalData, Segment, SegmentData};
use apmx_core::model::transaction::ImmutableTransaction;
use apmx_core::model::wire::SpanEventWireModel;
use apmx_core::time::{epoch_millis, offset_from};

use crate::error::Result;
use crate::segment_tree::{SegmentTreeNode, walk};
use crate::sql::{MAX_SQL_STATEMENT_BYTES, SqlObfuscator, prepare_sql, truncate_with_ellipsis};

const CATEGORY_GENERIC: &str = "generic";
const CATEGORY_DATASTORE: &str = "datastore";
const CATEGORY_HTTP: &str = "http";
const SPAN_KIND_CLIENT: &str = "client";

type SpanAttributes = BTreeMap<String, AttributeValue>;

pub struct SpanEventMaker<'c> {
    config: &'c AgentConfig,
    obfuscator: &'c dyn SqlObfuscator,
}

impl<'c> SpanEventMaker<'c> {
    pub fn new(config: &'c AgentConfig, obfuscator: &'c dyn SqlObfuscator) -> Self {
        Self { config, obfuscator }
    }

    /// One synthetic entry-point span for the transaction, then one span per
    /// segment in tree order.
    pub fn get_span_events(
        &self,
        tx: &ImmutableTransaction,
        forest: &[SegmentTreeNode<'_>],
        transaction_name: &str,
    ) -> Result<Vec<SpanEventWireModel>> {
        let root_guid = Guid::generate();
        let mut spans = Vec::with_capacity(tx.segments.len() + 1);
        spans.push(root_span(tx, transaction_name, &root_guid));
        for (node, parent) in walk(forest) {
            let parent_id = parent
                .map(|p| p.segment().span_id.as_str())
                .unwrap_or(root_guid.as_str());
            spans.push(self.segment_span(tx, node.segment(), parent_id)?);
        }
        Ok(spans)
    }

    fn segment_span(
        &self,
        tx: &ImmutableTransaction,
        segment: &Segment,
        parent_id: &str,
    ) -> Result<SpanEventWireModel> {
        let mut intrinsics = common_intrinsics(tx);
        intrinsics.insert("guid".into(), segment.span_id.as_str().into());
        intrinsics.insert("parentId".into(), parent_id.into());
        intrinsics.insert(
            "timestamp".into(),
            epoch_millis(offset_from(tx.start_time, segment.relative_start)).into(),
        );
        intrinsics.insert("duration".into(), segment.duration_or_zero().as_secs_f64().into());
        intrinsics.insert("name".into(), segment.name().into());

        let mut agent = SpanAttributes::new();
        let category = match &segment.data {
            SegmentData::Simple { .. } => CATEGORY_GENERIC,
            SegmentData::Datastore(ds) => {
                self.datastore_attributes(ds, &mut intrinsics, &mut agent)?;
                CATEGORY_DATASTORE
            }
            SegmentData::External(ext) => {
                external_attributes(ext, segment, &mut intrinsics, &mut agent);
                CATEGORY_HTTP
            }
        };
        intrinsics.insert("category".into(), category.into());

        Ok(SpanEventWireModel {
            intrinsics,
            agent,
            user: SpanAttributes::new(),
        })
    }

    fn datastore_attributes(
        &self,
        ds: &DatastoreData,
        intrinsics: &mut SpanAttributes,
        agent: &mut SpanAttributes,
    ) -> Result<()> {
        intrinsics.insert("component".into(), ds.vendor().as_str().into());
        intrinsics.insert("span.kind".into(), SPAN_KIND_CLIENT.into());

        let statement = match ds.raw_text.as_deref().filter(|s| !s.trim().is_empty()) {
            Some(raw) => {
                prepare_sql(self.obfuscator, raw, self.config.transaction_tracer_record_sql)?
            }
            None => None,
        };
        if let Some(statement) = statement {
            agent.insert(
                "db.statement".into(),
                truncate_with_ellipsis(&statement, MAX_SQL_STATEMENT_BYTES).into(),
            );
        }

        let Some(conn) = &ds.connection else {
            return Ok(());
        };
        if let Some(db) = &conn.database_name {
            agent.insert("db.instance".into(), db.as_str().into());
        }
        if let Some(host) = &conn.host {
            let port = conn.port_path_or_id.as_deref().unwrap_or("unknown");
            agent.insert("peer.address".into(), format!("{host}:{port}").into());
            agent.insert("peer.hostname".into(), host.as_str().into());
        }
        Ok(())
    }
}

fn external_attributes(
    ext: &ExternalData,
    segment: &Segment,
    intrinsics: &mut SpanAttributes,
    agent: &mut SpanAttributes,
) {
    intrinsics.insert("component".into(), segment.method_call.type_name.as_str().into());
    intrinsics.insert("span.kind".into(), SPAN_KIND_CLIENT.into());
    agent.insert("http.url".into(), clean_uri(&ext.uri).into());
    agent.insert("http.method".into(), ext.method.as_str().into());
}

/// Drops the query string and fragment.
fn clean_uri(uri: &str) -> &str {
    let end = uri.find(['?', '#']).unwrap_or(uri.len());
    &uri[..end]
}

fn common_intrinsics(tx: &ImmutableTransaction) -> SpanAttributes {
    let mut intrinsics = SpanAttributes::new();
    intrinsics.insert("type".into(), "Span".into());
    intrinsics.insert("traceId".into(), tx.trace_id.as_str().into());
    intrinsics.insert("transactionId".into(), tx.guid.as_str().into());
    intrinsics.insert("sampled".into(), tx.sampled.into());
    intrinsics.insert("priority".into(), tx.priority.into());
    intrinsics
}

fn root_span(tx: &ImmutableTransaction, transaction_name: &str, guid: &Guid) -> SpanEventWireModel {
    let mut intrinsics = common_intrinsics(tx);
    intrinsics.insert("guid".into(), guid.as_str().into());
    if let Some(parent) = tx.tracing_state.as_ref().and_then(|s| s.guid.as_deref()) {
        intrinsics.insert("parentId".into(), parent.into());
    }
    intrinsics.insert("timestamp".into(), epoch_millis(tx.start_time).into());
    intrinsics.insert("duration".into(), tx.duration.as_secs_f64().into());
    intrinsics.insert("name".into(), transaction_name.into());
    intrinsics.insert("category".into(), CATEGORY_GENERIC.into());
    intrinsics.insert("nr.entryPoint".into(), true.into());
    SpanEventWireModel {
        intrinsics,
        agent: SpanAttributes::new(),
        user: SpanAttributes::new(),
    }
}
