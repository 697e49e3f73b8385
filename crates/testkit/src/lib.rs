use std::time::Duration;

use apmx_core::config::AgentConfig;
use apmx_core::ids::Guid;
use apmx_core::model::segment::{
    ConnectionInfo, DatastoreData, DatastoreVendor, ExternalData, MethodCall, ParsedStatement,
    Segment, SegmentData, SegmentId,
};
use apmx_core::model::transaction::{
    ImmutableTransaction, TracingState, TransactionMetadata, TransactionName,
};
use chrono::{DateTime, TimeZone, Utc};

pub const TX_GUID: &str = "b4a07c3e1a3d4f11";
pub const TRACE_ID: &str = "distributedtraceid";
pub const HOST_NAME: &str = "test-host";

/// 2018-07-18T07:00:00Z, epoch ms 1531897200000.
pub fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2018, 7, 18, 7, 0, 0).unwrap()
}

pub fn test_config() -> AgentConfig {
    AgentConfig {
        apdex_t: None,
        process_host_display_name: Some(HOST_NAME.to_string()),
        ..AgentConfig::default()
    }
}

pub fn segment(
    id: SegmentId,
    parent_id: Option<SegmentId>,
    start_ms: u64,
    duration_ms: Option<u64>,
    data: SegmentData,
) -> Segment {
    Segment {
        id,
        parent_id,
        span_id: Guid::parse(&format!("{:016x}", 0xa000 + id)).unwrap(),
        relative_start: Duration::from_millis(start_ms),
        duration: duration_ms.map(Duration::from_millis),
        data,
        method_call: MethodCall::new("type", "method"),
    }
}

pub fn simple_segment(
    id: SegmentId,
    parent_id: Option<SegmentId>,
    start_ms: u64,
    duration_ms: u64,
    name: &str,
) -> Segment {
    segment(
        id,
        parent_id,
        start_ms,
        Some(duration_ms),
        SegmentData::Simple {
            name: name.to_string(),
        },
    )
}

pub fn datastore_data(sql: &str) -> DatastoreData {
    DatastoreData {
        parsed: ParsedStatement {
            vendor: DatastoreVendor::MSSQL,
            model: Some("users".to_string()),
            operation: "select".to_string(),
        },
        raw_text: Some(sql.to_string()),
        connection: Some(ConnectionInfo {
            host: Some("localhost".to_string()),
            port_path_or_id: Some("1234".to_string()),
            database_name: Some("default".to_string()),
        }),
    }
}

pub fn datastore_segment(
    id: SegmentId,
    parent_id: Option<SegmentId>,
    start_ms: u64,
    duration_ms: u64,
    sql: &str,
) -> Segment {
    segment(
        id,
        parent_id,
        start_ms,
        Some(duration_ms),
        SegmentData::Datastore(datastore_data(sql)),
    )
}

pub fn external_segment(
    id: SegmentId,
    parent_id: Option<SegmentId>,
    start_ms: u64,
    duration_ms: u64,
    uri: &str,
) -> Segment {
    segment(
        id,
        parent_id,
        start_ms,
        Some(duration_ms),
        SegmentData::External(ExternalData {
            uri: uri.to_string(),
            method: "GET".to_string(),
        }),
    )
}

pub fn transaction(name: TransactionName, segments: Vec<Segment>) -> ImmutableTransaction {
    ImmutableTransaction {
        guid: Guid::parse(TX_GUID).unwrap(),
        name,
        metadata: TransactionMetadata::default(),
        start_time: start_time(),
        duration: Duration::from_secs(1),
        response_time: None,
        priority: 0.5,
        sampled: true,
        trace_id: TRACE_ID.to_string(),
        tracing_state: None,
        segments,
        ignored: false,
    }
}

/// Web transaction with one root segment and a datastore and external child.
pub fn sample_web_transaction() -> ImmutableTransaction {
    let mut tx = transaction(
        TransactionName::web("foo", "bar"),
        vec![
            simple_segment(0, None, 0, 900, "MyController.Index"),
            datastore_segment(1, Some(0), 100, 600, "SELECT * FROM users WHERE ssn = 433871122"),
            external_segment(2, Some(0), 750, 100, "http://localhost:80/api/test"),
        ],
    );
    tx.response_time = Some(Duration::from_millis(900));
    tx.metadata.uri = Some("/foo/bar".to_string());
    tx.metadata.http_status_code = Some(200);
    tx
}

pub fn sample_other_transaction() -> ImmutableTransaction {
    transaction(
        TransactionName::other("foo", "bar"),
        vec![simple_segment(0, None, 0, 1000, "Worker.Run")],
    )
}

pub fn inbound_tracing_state() -> TracingState {
    TracingState {
        parent_type: Some("App".to_string()),
        app_id: Some("appId".to_string()),
        account_id: Some("accountId".to_string()),
        transport_type: Some("HTTP".to_string()),
        transport_duration: Some(Duration::from_secs(1)),
        guid: Some("inboundguid".to_string()),
        transaction_id: Some("inboundtxid".to_string()),
    }
}
