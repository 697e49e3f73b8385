use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::error::{ApmError, Result};
use crate::host;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordSql {
    Obfuscated,
    Raw,
    Off,
}

impl FromStr for RecordSql {
    type Err = ApmError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "obfuscated" => Ok(Self::Obfuscated),
            "raw" => Ok(Self::Raw),
            "off" => Ok(Self::Off),
            other => Err(ApmError::Config(format!(
                "record_sql must be obfuscated, raw or off (got {other})"
            ))),
        }
    }
}

/// Resolved agent configuration. Snapshots are immutable; newer ones carry a
/// higher `version`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentConfig {
    pub version: u64,
    pub error_collector_enabled: bool,
    pub error_collector_capture_events: bool,
    pub distributed_tracing_enabled: bool,
    pub span_events_enabled: bool,
    pub cross_application_tracing_enabled: bool,
    pub transaction_events_enabled: bool,
    pub transaction_tracer_enabled: bool,
    pub transaction_tracer_record_sql: RecordSql,
    pub slow_sql_enabled: bool,
    pub sql_explain_threshold: Duration,
    pub instance_reporting_enabled: bool,
    pub database_name_reporting_enabled: bool,
    pub apdex_t: Option<Duration>,
    pub web_transactions_apdex: BTreeMap<String, Duration>,
    pub strip_exception_messages: bool,
    pub capture_request_parameters: bool,
    pub allow_request_uri: bool,
    pub process_host_display_name: Option<String>,
    pub ignored_metric_names: Vec<String>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            version: 0,
            error_collector_enabled: true,
            error_collector_capture_events: true,
            distributed_tracing_enabled: false,
            span_events_enabled: true,
            cross_application_tracing_enabled: true,
            transaction_events_enabled: true,
            transaction_tracer_enabled: true,
            transaction_tracer_record_sql: RecordSql::Obfuscated,
            slow_sql_enabled: true,
            sql_explain_threshold: Duration::from_millis(500),
            instance_reporting_enabled: true,
            database_name_reporting_enabled: true,
            apdex_t: Some(Duration::from_millis(500)),
            web_transactions_apdex: BTreeMap::new(),
            strip_exception_messages: false,
            capture_request_parameters: false,
            allow_request_uri: true,
            process_host_display_name: None,
            ignored_metric_names: Vec::new(),
        }
    }
}

impl AgentConfig {
    pub fn load() -> Result<Self> {
        let mut cfg = Self::default();
        let config_path = config_file_path();
        if let Some(file_overrides) = load_file_overrides(&config_path)? {
            apply_overrides(&mut cfg, file_overrides, "config file")?;
        }
        let env_overrides = load_env_overrides()?;
        apply_overrides(&mut cfg, env_overrides, "environment")?;
        cfg.process_host_display_name = Some(host::resolve_display_name(
            cfg.process_host_display_name.as_deref(),
        ));
        Ok(cfg)
    }

    /// Apdex threshold for a transaction. Per-name thresholds win; the default
    /// only applies to web transactions.
    pub fn apdex_t_for(&self, prefixed_name: &str, is_web: bool) -> Option<Duration> {
        if let Some(t) = self.web_transactions_apdex.get(prefixed_name) {
            return Some(*t);
        }
        if is_web { self.apdex_t } else { None }
    }

    pub fn is_metric_ignored(&self, prefixed_name: &str) -> bool {
        self.ignored_metric_names.iter().any(|n| n == prefixed_name)
    }
}

#[derive(Debug, Default, Deserialize)]
struct ConfigOverrides {
    version: Option<u64>,
    error_collector_enabled: Option<bool>,
    error_collector_capture_events: Option<bool>,
    distributed_tracing_enabled: Option<bool>,
    span_events_enabled: Option<bool>,
    cross_application_tracing_enabled: Option<bool>,
    transaction_events_enabled: Option<bool>,
    transaction_tracer_enabled: Option<bool>,
    transaction_tracer_record_sql: Option<String>,
    slow_sql_enabled: Option<bool>,
    sql_explain_threshold: Option<String>,
    instance_reporting_enabled: Option<bool>,
    database_name_reporting_enabled: Option<bool>,
    apdex_t: Option<String>,
    web_transactions_apdex: Option<BTreeMap<String, String>>,
    strip_exception_messages: Option<bool>,
    capture_request_parameters: Option<bool>,
    allow_request_uri: Option<bool>,
    process_host_display_name: Option<String>,
    ignored_metric_names: Option<Vec<String>>,
}

fn config_file_path() -> PathBuf {
    if let Ok(path) = env::var("APMX_CONFIG") {
        return PathBuf::from(path);
    }

    let home = env::var("HOME").unwrap_or_else(|_| ".".to_string());
    let config_home = env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(home).join(".config"));
    config_home.join("apmx/config.toml")
}

fn load_file_overrides(path: &PathBuf) -> Result<Option<ConfigOverrides>> {
    if !path.exists() {
        return Ok(None);
    }

    let raw = fs::read_to_string(path)
        .map_err(|e| ApmError::Config(format!("failed reading {}: {e}", path.display())))?;
    let parsed: ConfigOverrides = toml::from_str(&raw)
        .map_err(|e| ApmError::Config(format!("failed parsing {}: {e}", path.display())))?;
    debug!(path = %path.display(), "loaded config file");
    Ok(Some(parsed))
}

fn env_bool(name: &str) -> Result<Option<bool>> {
    match env::var(name) {
        Ok(v) => match v.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(Some(true)),
            "0" | "false" | "no" | "off" => Ok(Some(false)),
            other => Err(ApmError::Config(format!(
                "bad {name} in environment: expected a boolean, got {other}"
            ))),
        },
        Err(_) => Ok(None),
    }
}

fn load_env_overrides() -> Result<ConfigOverrides> {
    let version = match env::var("APMX_CONFIG_VERSION") {
        Ok(v) => Some(v.parse::<u64>().map_err(|e| {
            ApmError::Config(format!("bad APMX_CONFIG_VERSION in environment: {e}"))
        })?),
        Err(_) => None,
    };

    Ok(ConfigOverrides {
        version,
        error_collector_enabled: env_bool("APMX_ERROR_COLLECTOR_ENABLED")?,
        error_collector_capture_events: env_bool("APMX_ERROR_COLLECTOR_CAPTURE_EVENTS")?,
        distributed_tracing_enabled: env_bool("APMX_DISTRIBUTED_TRACING_ENABLED")?,
        span_events_enabled: env_bool("APMX_SPAN_EVENTS_ENABLED")?,
        cross_application_tracing_enabled: env_bool("APMX_CROSS_APPLICATION_TRACING_ENABLED")?,
        transaction_events_enabled: env_bool("APMX_TRANSACTION_EVENTS_ENABLED")?,
        transaction_tracer_enabled: env_bool("APMX_TRANSACTION_TRACER_ENABLED")?,
        transaction_tracer_record_sql: env::var("APMX_TRANSACTION_TRACER_RECORD_SQL").ok(),
        slow_sql_enabled: env_bool("APMX_SLOW_SQL_ENABLED")?,
        sql_explain_threshold: env::var("APMX_SQL_EXPLAIN_THRESHOLD").ok(),
        instance_reporting_enabled: env_bool("APMX_INSTANCE_REPORTING_ENABLED")?,
        database_name_reporting_enabled: env_bool("APMX_DATABASE_NAME_REPORTING_ENABLED")?,
        apdex_t: env::var("APMX_APDEX_T").ok(),
        web_transactions_apdex: None,
        strip_exception_messages: env_bool("APMX_STRIP_EXCEPTION_MESSAGES")?,
        capture_request_parameters: env_bool("APMX_CAPTURE_REQUEST_PARAMETERS")?,
        allow_request_uri: env_bool("APMX_ALLOW_REQUEST_URI")?,
        process_host_display_name: None,
        ignored_metric_names: None,
    })
}

fn parse_config_duration(value: &str, field: &str, source: &str) -> Result<Duration> {
    humantime::parse_duration(value).map_err(|e| {
        ApmError::Config(format!("bad {field} in {source}: {e} (value={value})"))
    })
}

fn apply_overrides(cfg: &mut AgentConfig, overrides: ConfigOverrides, source: &str) -> Result<()> {
    if let Some(v) = overrides.version {
        cfg.version = v;
    }
    if let Some(v) = overrides.error_collector_enabled {
        cfg.error_collector_enabled = v;
    }
    if let Some(v) = overrides.error_collector_capture_events {
        cfg.error_collector_capture_events = v;
    }
    if let Some(v) = overrides.distributed_tracing_enabled {
        cfg.distributed_tracing_enabled = v;
    }
    if let Some(v) = overrides.span_events_enabled {
        cfg.span_events_enabled = v;
    }
    if let Some(v) = overrides.cross_application_tracing_enabled {
        cfg.cross_application_tracing_enabled = v;
    }
    if let Some(v) = overrides.transaction_events_enabled {
        cfg.transaction_events_enabled = v;
    }
    if let Some(v) = overrides.transaction_tracer_enabled {
        cfg.transaction_tracer_enabled = v;
    }
    if let Some(v) = overrides.transaction_tracer_record_sql {
        cfg.transaction_tracer_record_sql = v.parse().map_err(|e| {
            ApmError::Config(format!("bad transaction_tracer_record_sql in {source}: {e}"))
        })?;
    }
    if let Some(v) = overrides.slow_sql_enabled {
        cfg.slow_sql_enabled = v;
    }
    if let Some(v) = overrides.sql_explain_threshold {
        cfg.sql_explain_threshold = parse_config_duration(&v, "sql_explain_threshold", source)?;
    }
    if let Some(v) = overrides.instance_reporting_enabled {
        cfg.instance_reporting_enabled = v;
    }
    if let Some(v) = overrides.database_name_reporting_enabled {
        cfg.database_name_reporting_enabled = v;
    }
    if let Some(v) = overrides.apdex_t {
        cfg.apdex_t = Some(parse_config_duration(&v, "apdex_t", source)?);
    }
    if let Some(map) = overrides.web_transactions_apdex {
        for (name, v) in map {
            let t = parse_config_duration(&v, "web_transactions_apdex", source)?;
            cfg.web_transactions_apdex.insert(name, t);
        }
    }
    if let Some(v) = overrides.strip_exception_messages {
        cfg.strip_exception_messages = v;
    }
    if let Some(v) = overrides.capture_request_parameters {
        cfg.capture_request_parameters = v;
    }
    if let Some(v) = overrides.allow_request_uri {
        cfg.allow_request_uri = v;
    }
    if let Some(v) = overrides.process_host_display_name {
        cfg.process_host_display_name = Some(v);
    }
    if let Some(v) = overrides.ignored_metric_names {
        cfg.ignored_metric_names = v;
    }
    Ok(())
}

/// Holds the newest config snapshot seen. Older or equal versions are ignored.
#[derive(Debug, Clone)]
pub struct ConfigWatcher {
    current: Arc<RwLock<Arc<AgentConfig>>>,
}

impl ConfigWatcher {
    pub fn new(initial: AgentConfig) -> Self {
        Self {
            current: Arc::new(RwLock::new(Arc::new(initial))),
        }
    }

    pub fn current(&self) -> Arc<AgentConfig> {
        let guard = self.current.read().unwrap_or_else(|e| e.into_inner());
        Arc::clone(&guard)
    }

    /// Returns whether the snapshot replaced the current one.
    pub fn apply(&self, snapshot: Arc<AgentConfig>) -> bool {
        let mut guard = self.current.write().unwrap_or_else(|e| e.into_inner());
        if snapshot.version <= guard.version {
            debug!(
                current = guard.version,
                offered = snapshot.version,
                "ignoring stale config snapshot"
            );
            return false;
        }
        *guard = snapshot;
        true
    }

    /// Applies snapshots from `rx` until every sender is dropped.
    pub async fn run(self, mut rx: broadcast::Receiver<Arc<AgentConfig>>) {
        loop {
            match rx.recv().await {
                Ok(snapshot) => {
                    self.apply(snapshot);
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "config subscriber lagged behind");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_enables_collectors() {
        let cfg = AgentConfig::default();
        assert!(cfg.error_collector_enabled);
        assert!(cfg.transaction_events_enabled);
        assert!(!cfg.distributed_tracing_enabled);
        assert_eq!(cfg.transaction_tracer_record_sql, RecordSql::Obfuscated);
    }

    #[test]
    fn apdex_default_only_applies_to_web() {
        let mut cfg = AgentConfig::default();
        cfg.apdex_t = Some(Duration::from_secs(7));
        assert_eq!(
            cfg.apdex_t_for("WebTransaction/foo/bar", true),
            Some(Duration::from_secs(7))
        );
        assert_eq!(cfg.apdex_t_for("OtherTransaction/foo/bar", false), None);

        cfg.web_transactions_apdex
            .insert("OtherTransaction/foo/bar".to_string(), Duration::from_secs(2));
        assert_eq!(
            cfg.apdex_t_for("OtherTransaction/foo/bar", false),
            Some(Duration::from_secs(2))
        );
    }

    #[test]
    fn record_sql_parses() {
        assert_eq!("RAW".parse::<RecordSql>().unwrap(), RecordSql::Raw);
        assert!("maybe".parse::<RecordSql>().is_err());
    }

    #[test]
    fn apply_file_overrides_updates_fields() {
        let mut cfg = AgentConfig::default();
        let file: ConfigOverrides = toml::from_str(
            r#"
            version = 4
            distributed_tracing_enabled = true
            transaction_tracer_record_sql = "raw"
            sql_explain_threshold = "2s"
            apdex_t = "7s"
            ignored_metric_names = ["WebTransaction/health/check"]

            [web_transactions_apdex]
            "WebTransaction/foo/bar" = "250ms"
            "#,
        )
        .unwrap();

        apply_overrides(&mut cfg, file, "config file").unwrap();

        assert_eq!(cfg.version, 4);
        assert!(cfg.distributed_tracing_enabled);
        assert_eq!(cfg.transaction_tracer_record_sql, RecordSql::Raw);
        assert_eq!(cfg.sql_explain_threshold, Duration::from_secs(2));
        assert_eq!(cfg.apdex_t, Some(Duration::from_secs(7)));
        assert_eq!(
            cfg.web_transactions_apdex.get("WebTransaction/foo/bar"),
            Some(&Duration::from_millis(250))
        );
        assert!(cfg.is_metric_ignored("WebTransaction/health/check"));
    }

    #[test]
    fn apply_overrides_rejects_bad_durations() {
        let mut cfg = AgentConfig::default();
        let file = ConfigOverrides {
            apdex_t: Some("soon".to_string()),
            ..ConfigOverrides::default()
        };
        assert!(apply_overrides(&mut cfg, file, "config file").is_err());
    }

    #[test]
    fn watcher_ignores_older_versions() {
        let watcher = ConfigWatcher::new(AgentConfig {
            version: 5,
            ..AgentConfig::default()
        });

        let stale = AgentConfig {
            version: 3,
            distributed_tracing_enabled: true,
            ..AgentConfig::default()
        };
        assert!(!watcher.apply(Arc::new(stale)));
        assert!(!watcher.current().distributed_tracing_enabled);

        let newer = AgentConfig {
            version: 6,
            distributed_tracing_enabled: true,
            ..AgentConfig::default()
        };
        assert!(watcher.apply(Arc::new(newer)));
        assert_eq!(watcher.current().version, 6);
    }

    #[tokio::test]
    async fn watcher_follows_broadcast_channel() {
        let watcher = ConfigWatcher::new(AgentConfig::default());
        let (tx, rx) = broadcast::channel(4);
        let task = tokio::spawn(watcher.clone().run(rx));

        for version in [2, 1, 3] {
            tx.send(Arc::new(AgentConfig {
                version,
                ..AgentConfig::default()
            }))
            .unwrap();
        }
        drop(tx);
        task.await.unwrap();

        assert_eq!(watcher.current().version, 3);
    }
}
