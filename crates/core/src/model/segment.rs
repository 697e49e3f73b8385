use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::ids::Guid;

pub type SegmentId = u64;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodCall {
    pub type_name: String,
    pub method_name: String,
}

impl MethodCall {
    pub fn new(type_name: impl Into<String>, method_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            method_name: method_name.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DatastoreVendor {
    MSSQL,
    MySQL,
    Postgres,
    Oracle,
    SQLite,
    Redis,
    MongoDB,
    Other,
}

impl DatastoreVendor {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::MSSQL => "MSSQL",
            Self::MySQL => "MySQL",
            Self::Postgres => "Postgres",
            Self::Oracle => "Oracle",
            Self::SQLite => "SQLite",
            Self::Redis => "Redis",
            Self::MongoDB => "MongoDB",
            Self::Other => "Other",
        }
    }
}

impl fmt::Display for DatastoreVendor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of the (external) SQL parser: the table or collection touched and the operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedStatement {
    pub vendor: DatastoreVendor,
    pub model: Option<String>,
    pub operation: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ConnectionInfo {
    pub host: Option<String>,
    pub port_path_or_id: Option<String>,
    pub database_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatastoreData {
    pub parsed: ParsedStatement,
    pub raw_text: Option<String>,
    pub connection: Option<ConnectionInfo>,
}

impl DatastoreData {
    pub fn vendor(&self) -> DatastoreVendor {
        self.parsed.vendor
    }

    /// `Datastore/statement/<vendor>/<model>/<op>`, or the operation metric when no model was parsed.
    pub fn metric_name(&self) -> String {
        match &self.parsed.model {
            Some(model) => format!(
                "Datastore/statement/{}/{}/{}",
                self.parsed.vendor, model, self.parsed.operation
            ),
            None => self.operation_metric_name(),
        }
    }

    pub fn operation_metric_name(&self) -> String {
        format!(
            "Datastore/operation/{}/{}",
            self.parsed.vendor, self.parsed.operation
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExternalData {
    pub uri: String,
    pub method: String,
}

impl ExternalData {
    pub fn host(&self) -> String {
        url::Url::parse(&self.uri)
            .ok()
            .and_then(|u| u.host_str().map(str::to_string))
            .unwrap_or_else(|| "UnknownHost".to_string())
    }

    pub fn metric_name(&self) -> String {
        format!("External/{}/Stream/{}", self.host(), self.method)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SegmentData {
    Simple { name: String },
    Datastore(DatastoreData),
    External(ExternalData),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub id: SegmentId,
    pub parent_id: Option<SegmentId>,
    pub span_id: Guid,
    pub relative_start: Duration,
    pub duration: Option<Duration>,
    pub data: SegmentData,
    pub method_call: MethodCall,
}

impl Segment {
    pub fn name(&self) -> String {
        match &self.data {
            SegmentData::Simple { name } => name.clone(),
            SegmentData::Datastore(ds) => ds.metric_name(),
            SegmentData::External(ext) => ext.metric_name(),
        }
    }

    pub fn duration_or_zero(&self) -> Duration {
        self.duration.unwrap_or_default()
    }

    pub fn relative_end(&self) -> Duration {
        self.relative_start + self.duration_or_zero()
    }

    pub fn is_finished(&self) -> bool {
        self.duration.is_some()
    }
}
