use std::collections::BTreeMap;
use std::time::Duration;

use apmx_core::attributes::{AttributeBuckets, AttributeValue};
use apmx_core::config::AgentConfig;
use apmx_core::model::metric::{MetricData, TransactionMetricStatsCollection};
use apmx_core::model::wire::{
    ErrorEventWireModel, ErrorTraceWireModel, SpanEventWireModel, SqlTraceStatsCollection,
    TraceNode, TransactionEventWireModel, TransactionTraceWireModel,
};
use apmx_transform::{PipelineStats, RecordingAggregators};
use chrono::SecondsFormat;
use owo_colors::OwoColorize;
use serde::Serialize;

/// Everything the transformer submitted for one CLI run.
#[derive(Debug, Serialize)]
pub struct TransformReport {
    pub stats: PipelineStats,
    pub metrics: Vec<TransactionMetricStatsCollection>,
    pub transaction_events: Vec<TransactionEventWireModel>,
    pub error_traces: Vec<ErrorTraceWireModel>,
    pub error_events: Vec<ErrorEventWireModel>,
    pub sql_traces: Vec<SqlTraceStatsCollection>,
    pub span_events: Vec<SpanEventWireModel>,
    pub transaction_traces: Vec<TransactionTraceWireModel>,
}

impl TransformReport {
    pub fn drain(stats: PipelineStats, recorded: &RecordingAggregators) -> Self {
        Self {
            stats,
            metrics: recorded.metrics.take(),
            transaction_events: recorded.transaction_events.take(),
            error_traces: recorded.error_traces.take(),
            error_events: recorded.error_events.take(),
            sql_traces: recorded.sql_traces.take(),
            span_events: recorded.span_events.take().into_iter().flatten().collect(),
            transaction_traces: recorded.transaction_traces.take(),
        }
    }
}

pub fn print_report_human(v: &TransformReport) {
    let s = &v.stats;
    println!(
        "transformed={} ignored={} failed={} failed_makers={}",
        s.transformed, s.ignored, s.failed, s.failed_makers
    );

    for stats in &v.metrics {
        heading(&format!("metrics scope={}", stats.scope));
        print_metric_table("scoped", &stats.scoped);
        print_metric_table("unscoped", &stats.unscoped);
    }

    for event in &v.transaction_events {
        heading(&format!(
            "transaction event priority={} synthetics={}",
            event.priority, event.is_synthetics
        ));
        print_buckets(&event.attributes);
    }

    for trace in &v.error_traces {
        heading(&format!(
            "error trace {} path={}",
            trace.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true),
            trace.path
        ));
        println!("  {}: {}", trace.exception_class_name.red(), trace.message);
        print_buckets(&trace.attributes);
    }

    for event in &v.error_events {
        heading(&format!("error event priority={}", event.priority));
        print_buckets(&event.attributes);
    }

    for collection in &v.sql_traces {
        for trace in collection.traces.values() {
            heading(&format!("sql trace id={}", trace.sql_id));
            println!(
                "  {} calls={} total={:.3}s min={:.3}s max={:.3}s uri={}",
                trace.datastore_metric_name,
                trace.call_count,
                trace.total_call_time,
                trace.min_call_time,
                trace.max_call_time,
                trace.uri
            );
            println!("  {}", trace.sql);
        }
    }

    if !v.span_events.is_empty() {
        heading(&format!("span events ({})", v.span_events.len()));
        for span in &v.span_events {
            println!(
                "  guid={} parent={} {} ({})",
                intrinsic(span, "guid"),
                intrinsic(span, "parentId"),
                intrinsic(span, "name"),
                intrinsic(span, "category"),
            );
        }
    }

    for trace in &v.transaction_traces {
        heading(&format!(
            "transaction trace {} duration={}ms",
            trace.transaction_name, trace.duration_ms
        ));
        print_trace_node(&trace.root, 1);
    }
}

pub fn print_config_human(cfg: &AgentConfig) {
    println!("version={}", cfg.version);
    println!("error_collector_enabled={}", cfg.error_collector_enabled);
    println!(
        "error_collector_capture_events={}",
        cfg.error_collector_capture_events
    );
    println!(
        "distributed_tracing_enabled={}",
        cfg.distributed_tracing_enabled
    );
    println!("span_events_enabled={}", cfg.span_events_enabled);
    println!(
        "cross_application_tracing_enabled={}",
        cfg.cross_application_tracing_enabled
    );
    println!(
        "transaction_events_enabled={}",
        cfg.transaction_events_enabled
    );
    println!(
        "transaction_tracer_enabled={}",
        cfg.transaction_tracer_enabled
    );
    println!(
        "transaction_tracer_record_sql={:?}",
        cfg.transaction_tracer_record_sql
    );
    println!("slow_sql_enabled={}", cfg.slow_sql_enabled);
    println!(
        "sql_explain_threshold={}",
        humantime::format_duration(cfg.sql_explain_threshold)
    );
    println!("apdex_t={}", optional_duration(cfg.apdex_t));
    for (name, t) in &cfg.web_transactions_apdex {
        println!("apdex_t[{name}]={}", humantime::format_duration(*t));
    }
    println!("strip_exception_messages={}", cfg.strip_exception_messages);
    println!(
        "capture_request_parameters={}",
        cfg.capture_request_parameters
    );
    println!(
        "process_host_display_name={}",
        cfg.process_host_display_name.as_deref().unwrap_or("-")
    );
    println!("ignored_metric_names={:?}", cfg.ignored_metric_names);
}

fn heading(text: &str) {
    println!("{}", format!("== {text} ==").bold().cyan());
}

fn print_metric_table(label: &str, metrics: &BTreeMap<String, MetricData>) {
    for (name, data) in metrics {
        println!(
            "  [{label}] {name} count={} total={:.3}s exclusive={:.3}s",
            data.count, data.total, data.exclusive
        );
    }
}

fn print_buckets(buckets: &AttributeBuckets) {
    for (bucket, attrs) in [
        ("intrinsic", &buckets.intrinsics),
        ("agent", &buckets.agent),
        ("user", &buckets.user),
    ] {
        for (key, value) in attrs {
            println!("  {} {key}={}", bucket.dimmed(), render(value));
        }
    }
}

fn print_trace_node(node: &TraceNode, depth: usize) {
    let indent = "  ".repeat(depth);
    println!(
        "{indent}{} [{:.1}ms..{:.1}ms]",
        node.name, node.start_ms, node.end_ms
    );
    for child in &node.children {
        print_trace_node(child, depth + 1);
    }
}

fn intrinsic(span: &SpanEventWireModel, key: &str) -> String {
    span.intrinsic(key).map(render).unwrap_or_else(|| "-".to_string())
}

fn render(value: &AttributeValue) -> String {
    match value {
        AttributeValue::Bool(b) => b.to_string(),
        AttributeValue::Int(i) => i.to_string(),
        AttributeValue::Float(f) => f.to_string(),
        AttributeValue::String(s) => s.clone(),
    }
}

fn optional_duration(d: Option<Duration>) -> String {
    d.map(|d| humantime::format_duration(d).to_string())
        .unwrap_or_else(|| "-".to_string())
}
