use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::attributes::AttributeValue;

/// Replacement text for error messages under a strip-messages security policy.
pub const STRIPPED_MESSAGE: &str =
    "Message removed by New Relic based on your currently enabled security settings.";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorData {
    pub message: String,
    /// Exception type name, or the status code for status-derived errors.
    pub class_name: String,
    pub noticed_at: DateTime<Utc>,
    #[serde(default)]
    pub strip_message: bool,
    #[serde(default)]
    pub custom_attributes: Vec<(String, AttributeValue)>,
}

impl ErrorData {
    pub fn new(
        message: impl Into<String>,
        class_name: impl Into<String>,
        noticed_at: DateTime<Utc>,
    ) -> Self {
        Self {
            message: message.into(),
            class_name: class_name.into(),
            noticed_at,
            strip_message: false,
            custom_attributes: Vec::new(),
        }
    }

    /// Synthetic error for an HTTP status of 400 or above.
    pub fn from_status_code(status: u16, noticed_at: DateTime<Utc>) -> Option<Self> {
        if status < 400 {
            return None;
        }
        let reason = http::StatusCode::from_u16(status)
            .ok()
            .and_then(|s| s.canonical_reason())
            .unwrap_or("Unknown Status");
        Some(Self::new(reason, status.to_string(), noticed_at))
    }

    /// Message as it may be reported.
    pub fn reported_message(&self) -> &str {
        if self.strip_message {
            STRIPPED_MESSAGE
        } else {
            &self.message
        }
    }
}
