//! Request and response payload records.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::epoch_seconds;

/// Why a payload failed to parse.
///
/// Variants distinguish the cases a server treats differently: syntactically
/// broken JSON versus a well-formed document missing or mistyping a required
/// field.
#[derive(Debug, thiserror::Error)]
pub enum PayloadError {
    /// The payload is not valid JSON at all.
    #[error("payload is not valid JSON: {0}")]
    Syntax(#[from] serde_json::Error),

    /// The payload parsed but is not a JSON object.
    #[error("payload is not a JSON object")]
    NotAnObject,

    /// A required field is absent.
    #[error("missing required field `{0}`")]
    MissingField(&'static str),

    /// A field is present but has the wrong type or an invalid value.
    #[error("invalid field `{field}`: {reason}")]
    InvalidField {
        field: &'static str,
        reason: String,
    },
}

/// A request envelope payload.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SkillRequest {
    /// Caller-chosen id, echoed verbatim in the response.
    pub request_id: String,
    /// Topic prefix the response must be published on. Opaque to the server.
    pub reply_to: String,
    /// The intent string; see [`crate::Intent`] for its recognized shapes.
    pub intent: String,
    /// Informational submission time, seconds since epoch.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<f64>,
}

impl SkillRequest {
    /// Parse a request from raw payload bytes.
    pub fn from_payload(payload: &[u8]) -> Result<Self, PayloadError> {
        let value: Value = serde_json::from_slice(payload)?;
        let obj = value.as_object().ok_or(PayloadError::NotAnObject)?;

        let request_id = required_string(obj, "request_id")?;
        let reply_to = required_string(obj, "reply_to")?;
        if reply_to.is_empty() {
            return Err(PayloadError::InvalidField {
                field: "reply_to",
                reason: "must be a non-empty topic prefix".into(),
            });
        }
        let intent = required_string(obj, "intent")?;

        let timestamp = match obj.get("timestamp") {
            None | Some(Value::Null) => None,
            Some(v) => Some(v.as_f64().ok_or_else(|| PayloadError::InvalidField {
                field: "timestamp",
                reason: "must be a number".into(),
            })?),
        };

        Ok(Self {
            request_id,
            reply_to,
            intent,
            timestamp,
        })
    }

    /// Serialize to payload bytes.
    #[must_use]
    pub fn to_payload(&self) -> Vec<u8> {
        // Serialization of a plain record cannot fail.
        serde_json::to_vec(self).unwrap_or_default()
    }
}

fn required_string(
    obj: &serde_json::Map<String, Value>,
    field: &'static str,
) -> Result<String, PayloadError> {
    match obj.get(field) {
        None => Err(PayloadError::MissingField(field)),
        Some(Value::String(s)) => Ok(s.clone()),
        Some(_) => Err(PayloadError::InvalidField {
            field,
            reason: "must be a string".into(),
        }),
    }
}

/// Outcome of a dispatched request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseStatus {
    Success,
    Error,
    Timeout,
}

/// A response envelope payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkillResponse {
    /// Mirror of the request's `request_id`.
    pub request_id: String,
    pub status: ResponseStatus,
    /// Child process stdout on success, empty otherwise.
    pub content: String,
    /// Human-readable cause on non-success, empty otherwise.
    pub error: String,
    /// Emission time, seconds since epoch.
    pub timestamp: f64,
}

impl SkillResponse {
    /// A successful response carrying the child's stdout.
    #[must_use]
    pub fn success(request_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            status: ResponseStatus::Success,
            content: content.into(),
            error: String::new(),
            timestamp: epoch_seconds(),
        }
    }

    /// An error response with a human-readable cause.
    #[must_use]
    pub fn error(request_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            status: ResponseStatus::Error,
            content: String::new(),
            error: error.into(),
            timestamp: epoch_seconds(),
        }
    }

    /// A timeout response.
    #[must_use]
    pub fn timeout(request_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            status: ResponseStatus::Timeout,
            content: String::new(),
            error: error.into(),
            timestamp: epoch_seconds(),
        }
    }

    /// Serialize to payload bytes.
    #[must_use]
    pub fn to_payload(&self) -> Vec<u8> {
        serde_json::to_vec(self).unwrap_or_default()
    }

    /// Parse a response from raw payload bytes.
    pub fn from_payload(payload: &[u8]) -> Result<Self, PayloadError> {
        Ok(serde_json::from_slice(payload)?)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
