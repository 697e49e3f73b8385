use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::attributes::AttributeValue;
use crate::ids::Guid;
use crate::model::error_data::ErrorData;
use crate::model::segment::Segment;
use crate::time::offset_from;

pub const WEB_PREFIX: &str = "WebTransaction";
pub const OTHER_PREFIX: &str = "OtherTransaction";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionName {
    pub is_web: bool,
    pub category: String,
    pub name: String,
}

impl TransactionName {
    pub fn web(category: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            is_web: true,
            category: category.into(),
            name: name.into(),
        }
    }

    pub fn other(category: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            is_web: false,
            category: category.into(),
            name: name.into(),
        }
    }

    pub fn metric_name(&self) -> TransactionMetricName {
        let prefix = if self.is_web { WEB_PREFIX } else { OTHER_PREFIX };
        TransactionMetricName::new(prefix, format!("{}/{}", self.category, self.name))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionMetricName {
    pub prefix: String,
    pub name: String,
    pub ignored: bool,
}

impl TransactionMetricName {
    pub fn new(prefix: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            name: name.into(),
            ignored: false,
        }
    }

    pub fn prefixed_name(&self) -> String {
        format!("{}/{}", self.prefix, self.name)
    }
}

/// Cross-application tracing state recorded from inbound and outbound headers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CatMetadata {
    pub referrer_process_id: Option<String>,
    pub referrer_trip_id: Option<String>,
    pub referrer_path_hash: Option<String>,
    pub referrer_transaction_guid: Option<String>,
    /// Response time reported back to the calling application.
    pub response_time: Option<Duration>,
    /// Path hashes in the order they were computed; the last is current.
    pub path_hashes: Vec<String>,
    pub has_response_headers: bool,
}

impl CatMetadata {
    pub fn is_participant(&self) -> bool {
        self.referrer_process_id.is_some() || self.has_response_headers
    }

    pub fn path_hash(&self) -> Option<&str> {
        self.path_hashes.last().map(String::as_str)
    }

    /// Earlier distinct path hashes, sorted and comma-joined.
    pub fn alternate_path_hashes(&self) -> Option<String> {
        let current = self.path_hash()?;
        let mut others: Vec<&str> = self
            .path_hashes
            .iter()
            .map(String::as_str)
            .filter(|h| *h != current)
            .collect();
        if others.is_empty() {
            return None;
        }
        others.sort_unstable();
        others.dedup();
        Some(others.join(","))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyntheticsMetadata {
    pub resource_id: String,
    pub job_id: String,
    pub monitor_id: String,
}

/// Inbound distributed-trace payload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TracingState {
    pub parent_type: Option<String>,
    pub app_id: Option<String>,
    pub account_id: Option<String>,
    pub transport_type: Option<String>,
    pub transport_duration: Option<Duration>,
    pub guid: Option<String>,
    pub transaction_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransactionMetadata {
    pub uri: Option<String>,
    pub original_uri: Option<String>,
    pub referrer_uri: Option<String>,
    pub queue_time: Option<Duration>,
    pub http_status_code: Option<u16>,
    pub request_parameters: Vec<(String, String)>,
    pub user_attributes: Vec<(String, AttributeValue)>,
    pub user_error_attributes: Vec<(String, AttributeValue)>,
    pub noticed_errors: Vec<ErrorData>,
    pub cat: CatMetadata,
    pub synthetics: Option<SyntheticsMetadata>,
}

impl TransactionMetadata {
    /// The reportable error, if any: the first noticed exception, else one derived
    /// from the response status. User error attributes are attached to it.
    pub fn error_data(&self, fallback_noticed_at: DateTime<Utc>) -> Option<ErrorData> {
        let mut error = self.noticed_errors.first().cloned().or_else(|| {
            self.http_status_code
                .and_then(|code| ErrorData::from_status_code(code, fallback_noticed_at))
        })?;
        error
            .custom_attributes
            .extend(self.user_error_attributes.iter().cloned());
        Some(error)
    }
}

/// Finalized transaction snapshot. Produced once by [`crate::model::builder::TransactionBuilder::freeze`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImmutableTransaction {
    pub guid: Guid,
    pub name: TransactionName,
    #[serde(default)]
    pub metadata: TransactionMetadata,
    pub start_time: DateTime<Utc>,
    pub duration: Duration,
    #[serde(default)]
    pub response_time: Option<Duration>,
    pub priority: f32,
    pub sampled: bool,
    pub trace_id: String,
    #[serde(default)]
    pub tracing_state: Option<TracingState>,
    pub segments: Vec<Segment>,
    #[serde(default)]
    pub ignored: bool,
}

impl ImmutableTransaction {
    pub fn is_web(&self) -> bool {
        self.name.is_web
    }

    /// Response time for web transactions that recorded one, wall duration otherwise.
    pub fn response_time_or_duration(&self) -> Duration {
        match self.response_time {
            Some(rt) if self.is_web() => rt,
            _ => self.duration,
        }
    }

    pub fn end_time(&self) -> DateTime<Utc> {
        offset_from(self.start_time, self.duration)
    }

    pub fn metric_name(&self) -> TransactionMetricName {
        let mut name = self.name.metric_name();
        name.ignored = self.ignored;
        name
    }

    /// Reportable error with the message policy applied.
    pub fn error_data(&self, strip_exception_messages: bool) -> Option<ErrorData> {
        let explicit = !self.metadata.noticed_errors.is_empty();
        let mut error = self.metadata.error_data(self.end_time())?;
        if explicit && strip_exception_messages {
            error.strip_message = true;
        }
        Some(error)
    }

    pub fn is_synthetics(&self) -> bool {
        self.metadata.synthetics.is_some()
    }
}
