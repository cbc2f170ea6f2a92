//! Envelope payload records for the SkillScale fabric.
//!
//! The wire payload (frame 1 of an envelope) is JSON. Requests carry
//! `request_id`, `reply_to`, `intent`, and an optional `timestamp`; responses
//! mirror the `request_id` and carry `status` (`success` | `error` |
//! `timeout`), `content`, `error`, and `timestamp`. Correlation is entirely
//! end-to-end: the fabric never looks inside a payload.
//!
//! Parsing never panics. A malformed payload surfaces as a typed
//! [`PayloadError`] so the receiver can decide between log-and-drop and an
//! error response.

mod intent;
mod payload;

pub use intent::Intent;
pub use payload::{PayloadError, ResponseStatus, SkillRequest, SkillResponse};

/// Seconds since the Unix epoch, as carried in payload `timestamp` fields.
#[must_use]
pub fn epoch_seconds() -> f64 {
    let now = chrono::Utc::now();
    now.timestamp() as f64 + f64::from(now.timestamp_subsec_micros()) / 1_000_000.0
}
