use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{ApmError, Result};

/// 16 lowercase hex characters, used for transaction guids and span ids.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Guid(String);

impl Guid {
    pub fn generate() -> Self {
        let raw = uuid::Uuid::new_v4().simple().to_string();
        Self(raw[..16].to_string())
    }

    pub fn parse(input: &str) -> Result<Self> {
        if input.is_empty() || input.len() > 32 || !input.chars().all(|c| c.is_ascii_hexdigit())
        {
            return Err(ApmError::Parse(format!("invalid guid: {input}")));
        }
        Ok(Self(input.to_ascii_lowercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Guid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
