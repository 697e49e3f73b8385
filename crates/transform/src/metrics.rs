//! Metric rollups for a finished transaction: one scoped/unscoped pair per
//! segment plus transaction-level totals, apdex, error and caller rollups.

use std::time::Duration;

use apmx_core::config::AgentConfig;
use apmx_core::model::error_data::ErrorData;
use apmx_core::model::metric::{MetricData, TransactionMetricStatsCollection};
use apmx_core::model::segment::SegmentData;
use apmx_core::model::transaction::{ImmutableTransaction, TransactionMetricName};

use crate::segment_tree::{SegmentTreeNode, walk};

pub mod names {
    pub const WEB_TRANSACTION: &str = "WebTransaction";
    pub const OTHER_TRANSACTION_ALL: &str = "OtherTransaction/all";
    pub const HTTP_DISPATCHER: &str = "HttpDispatcher";
    pub const WEB_TOTAL_TIME: &str = "WebTransactionTotalTime";
    pub const OTHER_TOTAL_TIME: &str = "OtherTransactionTotalTime";
    pub const QUEUE_TIME: &str = "WebFrontend/QueueTime";
    pub const APDEX_ALL: &str = "ApdexAll";
    pub const APDEX_WEB: &str = "Apdex";
    pub const APDEX_OTHER: &str = "ApdexOther";
    pub const ERRORS_ALL: &str = "Errors/all";
    pub const ERRORS_ALL_WEB: &str = "Errors/allWeb";
    pub const ERRORS_ALL_OTHER: &str = "Errors/allOther";
    pub const DATASTORE_ALL: &str = "Datastore/all";
    pub const EXTERNAL_ALL: &str = "External/all";
    pub const UNKNOWN: &str = "Unknown";

    pub fn web_or_other(is_web: bool) -> &'static str {
        if is_web { "allWeb" } else { "allOther" }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApdexZone {
    Satisfying,
    Tolerating,
    Frustrating,
}

impl ApdexZone {
    /// Errors are always frustrating.
    pub fn classify(value: Duration, apdex_t: Duration, is_error: bool) -> Self {
        if is_error {
            Self::Frustrating
        } else if value <= apdex_t {
            Self::Satisfying
        } else if value <= apdex_t * 4 {
            Self::Tolerating
        } else {
            Self::Frustrating
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Satisfying => "S",
            Self::Tolerating => "T",
            Self::Frustrating => "F",
        }
    }

    fn metric_data(self, apdex_t: Duration) -> MetricData {
        match self {
            Self::Satisfying => MetricData::apdex(1, 0, 0, apdex_t),
            Self::Tolerating => MetricData::apdex(0, 1, 0, apdex_t),
            Self::Frustrating => MetricData::apdex(0, 0, 1, apdex_t),
        }
    }
}

/// Everything the rollup needs about one transaction.
pub struct RollupInput<'t, 'a> {
    pub transaction: &'t ImmutableTransaction,
    pub forest: &'t [SegmentTreeNode<'a>],
    pub metric_name: &'t TransactionMetricName,
    pub apdex_t: Option<Duration>,
    pub total_time: Duration,
    pub error: Option<&'t ErrorData>,
}

pub struct MetricRollupEngine<'c> {
    config: &'c AgentConfig,
}

impl<'c> MetricRollupEngine<'c> {
    pub fn new(config: &'c AgentConfig) -> Self {
        Self { config }
    }

    pub fn rollup(&self, input: &RollupInput<'_, '_>) -> TransactionMetricStatsCollection {
        let mut stats = TransactionMetricStatsCollection::new(input.metric_name.prefixed_name());
        self.segment_metrics(input, &mut stats);
        self.transaction_metrics(input, &mut stats);
        self.apdex_metrics(input, &mut stats);
        self.error_metrics(input, &mut stats);
        self.caller_metrics(input, &mut stats);
        stats
    }

    fn segment_metrics(&self, input: &RollupInput<'_, '_>, stats: &mut TransactionMetricStatsCollection) {
        let is_web = input.transaction.is_web();
        for (node, _) in walk(input.forest) {
            let data = MetricData::from_times(node.duration(), node.exclusive_duration());
            match &node.segment().data {
                SegmentData::Simple { name } => {
                    let metric = format!("DotNet/{name}");
                    stats.merge_scoped(metric.clone(), data);
                    stats.merge_unscoped(metric, data);
                }
                SegmentData::Datastore(ds) => {
                    let vendor = ds.vendor();
                    let primary = ds.metric_name();
                    stats.merge_scoped(primary.clone(), data);
                    stats.merge_unscoped(primary.clone(), data);
                    stats.merge_unscoped(names::DATASTORE_ALL, data);
                    stats.merge_unscoped(
                        format!("Datastore/{}", names::web_or_other(is_web)),
                        data,
                    );
                    stats.merge_unscoped(format!("Datastore/{vendor}/all"), data);
                    stats.merge_unscoped(
                        format!("Datastore/{vendor}/{}", names::web_or_other(is_web)),
                        data,
                    );
                    let operation = ds.operation_metric_name();
                    if operation != primary {
                        stats.merge_unscoped(operation, data);
                    }
                    if self.config.instance_reporting_enabled {
                        if let Some(conn) = &ds.connection {
                            if let Some(host) = &conn.host {
                                let port = conn.port_path_or_id.as_deref().unwrap_or(names::UNKNOWN);
                                stats.merge_unscoped(
                                    format!("Datastore/instance/{vendor}/{host}/{port}"),
                                    data,
                                );
                            }
                        }
                    }
                }
                SegmentData::External(ext) => {
                    let host = ext.host();
                    let primary = ext.metric_name();
                    stats.merge_scoped(primary.clone(), data);
                    stats.merge_unscoped(primary, data);
                    stats.merge_unscoped(names::EXTERNAL_ALL, data);
                    stats.merge_unscoped(
                        format!("External/{}", names::web_or_other(is_web)),
                        data,
                    );
                    stats.merge_unscoped(format!("External/{host}/all"), data);
                }
            }
        }
    }

    fn transaction_metrics(&self, input: &RollupInput<'_, '_>, stats: &mut TransactionMetricStatsCollection) {
        let tx = input.transaction;
        let name = input.metric_name;
        let timing = MetricData::from_time(tx.response_time_or_duration());
        let total_time = MetricData::from_time(input.total_time);

        stats.merge_unscoped(name.prefixed_name(), timing);
        if tx.is_web() {
            stats.merge_unscoped(names::WEB_TRANSACTION, timing);
            stats.merge_unscoped(names::HTTP_DISPATCHER, timing);
            stats.merge_unscoped(names::WEB_TOTAL_TIME, total_time);
            stats.merge_unscoped(format!("{}/{}", names::WEB_TOTAL_TIME, name.name), total_time);
        } else {
            stats.merge_unscoped(names::OTHER_TRANSACTION_ALL, timing);
            stats.merge_unscoped(names::OTHER_TOTAL_TIME, total_time);
            stats.merge_unscoped(format!("{}/{}", names::OTHER_TOTAL_TIME, name.name), total_time);
        }

        if let Some(queue_time) = tx.metadata.queue_time {
            stats.merge_unscoped(names::QUEUE_TIME, MetricData::from_time(queue_time));
        }

        if self.config.cross_application_tracing_enabled
            && !self.config.distributed_tracing_enabled
        {
            if let Some(process_id) = &tx.metadata.cat.referrer_process_id {
                let response_time = tx.metadata.cat.response_time.unwrap_or(Duration::ZERO);
                stats.merge_unscoped(
                    format!("ClientApplication/{process_id}/all"),
                    MetricData::from_time(response_time),
                );
            }
        }
    }

    fn apdex_metrics(&self, input: &RollupInput<'_, '_>, stats: &mut TransactionMetricStatsCollection) {
        let Some(apdex_t) = input.apdex_t else {
            return;
        };
        let tx = input.transaction;
        let zone = ApdexZone::classify(tx.response_time_or_duration(), apdex_t, input.error.is_some());
        let data = zone.metric_data(apdex_t);

        stats.merge_unscoped(names::APDEX_ALL, data);
        if tx.is_web() {
            stats.merge_unscoped(names::APDEX_WEB, data);
            stats.merge_unscoped(format!("{}/{}", names::APDEX_WEB, input.metric_name.name), data);
        } else {
            stats.merge_unscoped(names::APDEX_OTHER, data);
            stats.merge_unscoped(
                format!("{}/Transaction/{}", names::APDEX_OTHER, input.metric_name.name),
                data,
            );
        }
    }

    fn error_metrics(&self, input: &RollupInput<'_, '_>, stats: &mut TransactionMetricStatsCollection) {
        if input.error.is_none() || !self.config.error_collector_enabled {
            return;
        }
        let one = MetricData::count_only(1);
        stats.merge_unscoped(names::ERRORS_ALL, one);
        stats.merge_unscoped(
            if input.transaction.is_web() {
                names::ERRORS_ALL_WEB
            } else {
                names::ERRORS_ALL_OTHER
            },
            one,
        );
        stats.merge_unscoped(format!("Errors/{}", input.metric_name.prefixed_name()), one);
    }

    fn caller_metrics(&self, input: &RollupInput<'_, '_>, stats: &mut TransactionMetricStatsCollection) {
        if !self.config.distributed_tracing_enabled {
            return;
        }
        let tx = input.transaction;
        let state = tx.tracing_state.as_ref();
        let field = |f: Option<&Option<String>>| {
            f.and_then(|v| v.as_deref())
                .unwrap_or(names::UNKNOWN)
                .to_string()
        };
        let caller = format!(
            "{}/{}/{}/{}",
            field(state.map(|s| &s.parent_type)),
            field(state.map(|s| &s.account_id)),
            field(state.map(|s| &s.app_id)),
            field(state.map(|s| &s.transport_type)),
        );
        let suffixes = ["all", names::web_or_other(tx.is_web())];

        let duration = MetricData::from_time(tx.duration);
        for suffix in suffixes {
            stats.merge_unscoped(format!("DurationByCaller/{caller}/{suffix}"), duration);
        }

        if let Some(transport) = state.and_then(|s| s.transport_duration) {
            let data = MetricData::from_time(transport);
            for suffix in suffixes {
                stats.merge_unscoped(format!("TransportDuration/{caller}/{suffix}"), data);
            }
        }

        if input.error.is_some() && self.config.error_collector_enabled {
            for suffix in suffixes {
                stats.merge_unscoped(
                    format!("ErrorsByCaller/{caller}/{suffix}"),
                    MetricData::count_only(1),
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use apmx_core::model::error_data::ErrorData;
    use apmx_core::model::transaction::TransactionName;
    use testkit::{
        datastore_segment, external_segment, inbound_tracing_state, simple_segment, test_config,
        transaction,
    };

    use super::*;
    use crate::segment_tree::{build_forest, total_time};

    fn rollup(
        config: &AgentConfig,
        tx: &ImmutableTransaction,
        apdex_t: Option<Duration>,
        error: Option<&ErrorData>,
    ) -> TransactionMetricStatsCollection {
        let forest = build_forest(&tx.segments);
        let metric_name = tx.metric_name();
        MetricRollupEngine::new(config).rollup(&RollupInput {
            transaction: tx,
            forest: &forest,
            metric_name: &metric_name,
            apdex_t,
            total_time: total_time(&forest),
            error,
        })
    }

    #[test]
    fn apdex_zone_boundaries() {
        let t = Duration::from_secs(1);
        assert_eq!(ApdexZone::classify(t, t, false), ApdexZone::Satisfying);
        assert_eq!(
            ApdexZone::classify(Duration::from_millis(1001), t, false),
            ApdexZone::Tolerating
        );
        assert_eq!(ApdexZone::classify(t * 4, t, false), ApdexZone::Tolerating);
        assert_eq!(
            ApdexZone::classify(Duration::from_millis(4001), t, false),
            ApdexZone::Frustrating
        );
        assert_eq!(
            ApdexZone::classify(Duration::ZERO, t, true),
            ApdexZone::Frustrating
        );
    }

    #[test]
    fn every_segment_contributes_a_scoped_pair() {
        let tx = transaction(
            TransactionName::web("foo", "bar"),
            vec![
                simple_segment(0, None, 0, 5, "root"),
                simple_segment(1, Some(0), 0, 2, "child"),
            ],
        );
        let stats = rollup(&test_config(), &tx, None, None);
        let root = stats.get_scoped("DotNet/root").unwrap();
        assert_eq!(root.count, 1);
        assert!((root.total - 0.005).abs() < 1e-9);
        assert!((root.exclusive - 0.003).abs() < 1e-9);
        assert!(stats.get_unscoped("DotNet/child").is_some());
        assert_eq!(stats.scope, "WebTransaction/foo/bar");
    }

    #[test]
    fn web_rollups() {
        let mut tx = transaction(
            TransactionName::web("foo", "bar"),
            vec![simple_segment(0, None, 0, 5, "root")],
        );
        tx.duration = Duration::from_secs(10);
        tx.response_time = Some(Duration::from_secs(5));
        tx.metadata.queue_time = Some(Duration::from_secs(1));

        let stats = rollup(&test_config(), &tx, Some(Duration::from_secs(7)), None);
        assert_eq!(stats.get_unscoped("WebTransaction").unwrap().total, 5.0);
        assert!(stats.get_unscoped("WebTransaction/foo/bar").is_some());
        assert!(stats.get_unscoped("HttpDispatcher").is_some());
        assert!(stats.get_unscoped("WebTransactionTotalTime").is_some());
        assert!(stats.get_unscoped("WebTransactionTotalTime/foo/bar").is_some());
        assert!(stats.get_unscoped("WebFrontend/QueueTime").is_some());
        assert_eq!(stats.get_unscoped("Apdex/foo/bar").unwrap().count, 1);
        assert_eq!(stats.get_unscoped("ApdexAll").unwrap().min, 7.0);
        assert!(stats.get_unscoped("OtherTransaction/all").is_none());
    }

    #[test]
    fn other_rollups() {
        let tx = transaction(
            TransactionName::other("foo", "bar"),
            vec![simple_segment(0, None, 0, 5, "root")],
        );
        let stats = rollup(&test_config(), &tx, Some(Duration::from_millis(100)), None);
        assert!(stats.get_unscoped("OtherTransaction/all").is_some());
        assert!(stats.get_unscoped("OtherTransaction/foo/bar").is_some());
        assert!(stats.get_unscoped("OtherTransactionTotalTime/foo/bar").is_some());
        let apdex = stats.get_unscoped("ApdexOther/Transaction/foo/bar").unwrap();
        assert_eq!(apdex.exclusive, 1.0);
        assert!(stats.get_unscoped("HttpDispatcher").is_none());
    }

    #[test]
    fn no_apdex_without_threshold() {
        let tx = testkit::sample_other_transaction();
        let stats = rollup(&test_config(), &tx, None, None);
        assert!(stats.get_unscoped("ApdexAll").is_none());
    }

    #[test]
    fn errors_force_frustrating_and_emit_error_metrics() {
        let tx = testkit::sample_web_transaction();
        let error = ErrorData::new("boom", "Boom", tx.start_time);
        let stats = rollup(&test_config(), &tx, Some(Duration::from_secs(10)), Some(&error));
        assert_eq!(stats.get_unscoped("Apdex").unwrap().exclusive, 1.0);
        assert_eq!(stats.get_unscoped("Errors/all").unwrap().count, 1);
        assert!(stats.get_unscoped("Errors/allWeb").is_some());
        assert!(stats.get_unscoped("Errors/WebTransaction/foo/bar").is_some());
    }

    #[test]
    fn datastore_and_external_rollups_sum() {
        let tx = transaction(
            TransactionName::web("foo", "bar"),
            vec![
                simple_segment(0, None, 0, 20, "root"),
                datastore_segment(1, Some(0), 0, 5, "SELECT 1"),
                datastore_segment(2, Some(0), 5, 4, "SELECT 2"),
                datastore_segment(3, Some(0), 9, 2, "SELECT 3"),
                external_segment(4, Some(0), 11, 3, "http://example.com/x"),
            ],
        );
        let stats = rollup(&test_config(), &tx, None, None);
        let all = stats.get_unscoped("Datastore/all").unwrap();
        assert_eq!(all.count, 3);
        assert!((all.total - 0.011).abs() < 1e-9);
        assert!(stats.get_unscoped("Datastore/allWeb").is_some());
        assert!(stats.get_unscoped("Datastore/MSSQL/all").is_some());
        assert!(stats.get_unscoped("Datastore/operation/MSSQL/select").is_some());
        assert_eq!(
            stats
                .get_scoped("Datastore/statement/MSSQL/users/select")
                .unwrap()
                .count,
            3
        );
        assert!(stats.get_unscoped("Datastore/instance/MSSQL/localhost/1234").is_some());
        assert_eq!(stats.get_unscoped("External/all").unwrap().count, 1);
        assert!(stats.get_scoped("External/example.com/Stream/GET").is_some());
        assert!(stats.get_unscoped("External/example.com/all").is_some());
    }

    #[test]
    fn instance_metric_respects_reporting_flag() {
        let config = AgentConfig {
            instance_reporting_enabled: false,
            ..test_config()
        };
        let tx = testkit::sample_web_transaction();
        let stats = rollup(&config, &tx, None, None);
        assert!(
            !stats
                .unscoped
                .keys()
                .any(|k| k.starts_with("Datastore/instance/"))
        );
    }

    #[test]
    fn caller_metrics_default_to_unknown() {
        let config = AgentConfig {
            distributed_tracing_enabled: true,
            ..test_config()
        };
        let tx = testkit::sample_web_transaction();
        let stats = rollup(&config, &tx, None, None);
        assert!(stats
            .get_unscoped("DurationByCaller/Unknown/Unknown/Unknown/Unknown/all")
            .is_some());
        assert!(stats
            .get_unscoped("DurationByCaller/Unknown/Unknown/Unknown/Unknown/allWeb")
            .is_some());
        assert!(!stats.unscoped.keys().any(|k| k.starts_with("TransportDuration/")));
        assert!(!stats.unscoped.keys().any(|k| k.starts_with("ErrorsByCaller/")));
    }

    #[test]
    fn caller_metrics_with_inbound_payload_and_error() {
        let config = AgentConfig {
            distributed_tracing_enabled: true,
            ..test_config()
        };
        let mut tx = testkit::sample_other_transaction();
        tx.tracing_state = Some(inbound_tracing_state());
        let error = ErrorData::new("boom", "Boom", tx.start_time);
        let stats = rollup(&config, &tx, None, Some(&error));
        assert!(stats
            .get_unscoped("TransportDuration/App/accountId/appId/HTTP/allOther")
            .is_some());
        assert!(stats
            .get_unscoped("ErrorsByCaller/App/accountId/appId/HTTP/all")
            .is_some());
    }

    #[test]
    fn caller_metrics_require_distributed_tracing() {
        let mut tx = testkit::sample_other_transaction();
        tx.tracing_state = Some(inbound_tracing_state());
        let stats = rollup(&test_config(), &tx, None, None);
        assert!(!stats.unscoped.keys().any(|k| k.contains("ByCaller")));
    }

    #[test]
    fn client_application_metric_for_cat_referrer() {
        let mut tx = testkit::sample_web_transaction();
        tx.metadata.cat.referrer_process_id = Some("123#456".to_string());
        tx.metadata.cat.response_time = Some(Duration::from_millis(250));
        let stats = rollup(&test_config(), &tx, None, None);
        let client = stats.get_unscoped("ClientApplication/123#456/all").unwrap();
        assert_eq!(client.count, 1);
        assert!((client.total - 0.25).abs() < 1e-9);
    }

    #[test]
    fn errors_by_caller_need_error_collection() {
        let config = AgentConfig {
            distributed_tracing_enabled: true,
            error_collector_enabled: false,
            ..test_config()
        };
        let mut tx = testkit::sample_other_transaction();
        tx.tracing_state = Some(inbound_tracing_state());
        let error = ErrorData::new("boom", "Boom", tx.start_time);
        let stats = rollup(&config, &tx, None, Some(&error));
        assert!(stats
            .get_unscoped("DurationByCaller/App/accountId/appId/HTTP/all")
            .is_some());
        assert!(!stats.unscoped.keys().any(|k| k.starts_with("ErrorsByCaller/")));
    }
}
