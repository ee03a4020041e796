// crates/server-jobs/src/request.rs
//! Inbound job requests and their validation.

use std::sync::OnceLock;

use regex_lite::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::types::JobKind;

/// Longest accepted `business_id`.
pub const MAX_BUSINESS_ID_LEN: usize = 128;

/// Default cap on the serialized size of `data`.
pub const DEFAULT_MAX_PAYLOAD_BYTES: usize = 1024 * 1024;

fn business_id_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_.-]*$").expect("valid business id regex")
    })
}

/// A field-level validation failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }

    fn required(field: &'static str) -> Self {
        Self::new(field, format!("{field} is required"))
    }
}

/// Request body shared by the create-job and synchronous endpoints.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct JobRequestBody {
    #[serde(default)]
    pub business_id: Option<String>,
    #[serde(default, rename = "type")]
    pub operation: Option<String>,
    #[serde(default)]
    pub data: Option<serde_json::Value>,
    #[serde(default)]
    pub options: Option<serde_json::Value>,
}

/// A request that passed validation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobRequest {
    pub kind: JobKind,
    pub business_id: String,
    pub operation: String,
    pub data: serde_json::Value,
    pub options: serde_json::Value,
}

#[derive(Debug, Clone, Copy)]
pub struct ValidationLimits {
    pub max_payload_bytes: usize,
}

impl Default for ValidationLimits {
    fn default() -> Self {
        Self {
            max_payload_bytes: DEFAULT_MAX_PAYLOAD_BYTES,
        }
    }
}

impl JobRequestBody {
    /// Check required fields and limits for `kind`.
    pub fn validate(self, kind: JobKind, limits: &ValidationLimits) -> Result<JobRequest, ValidationError> {
        let business_id = self
            .business_id
            .filter(|b| !b.trim().is_empty())
            .ok_or_else(|| ValidationError::required("business_id"))?;
        if business_id.len() > MAX_BUSINESS_ID_LEN {
            return Err(ValidationError::new(
                "business_id",
                format!("business_id must be at most {MAX_BUSINESS_ID_LEN} characters"),
            ));
        }
        if !business_id_pattern().is_match(&business_id) {
            return Err(ValidationError::new(
                "business_id",
                "business_id may only contain letters, digits, '_', '-' and '.'",
            ));
        }

        let operation = self
            .operation
            .filter(|op| !op.trim().is_empty())
            .ok_or_else(|| ValidationError::required("type"))?;
        let allowed = kind.operations();
        if !allowed.contains(&operation.as_str()) {
            return Err(ValidationError::new(
                "type",
                format!(
                    "invalid {kind} type '{operation}', expected one of: {}",
                    allowed.join(", ")
                ),
            ));
        }

        let data = match self.data {
            None | Some(serde_json::Value::Null) => return Err(ValidationError::required("data")),
            Some(data) => data,
        };
        let empty = match &data {
            serde_json::Value::Object(map) => map.is_empty(),
            serde_json::Value::Array(items) => items.is_empty(),
            _ => {
                return Err(ValidationError::new(
                    "data",
                    "data must be a JSON object or array",
                ))
            }
        };
        if empty {
            return Err(ValidationError::new("data", "data must not be empty"));
        }
        let size = serde_json::to_vec(&data).map(|v| v.len()).unwrap_or(usize::MAX);
        if size > limits.max_payload_bytes {
            return Err(ValidationError::new(
                "data",
                format!(
                    "data is too large ({size} bytes, limit {} bytes)",
                    limits.max_payload_bytes
                ),
            ));
        }

        Ok(JobRequest {
            kind,
            business_id,
            operation,
            data,
            options: self.options.unwrap_or(serde_json::Value::Null),
        })
    }
}
