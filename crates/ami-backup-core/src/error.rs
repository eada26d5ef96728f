//! Errors from the deterministic domain layer.

use chrono::{DateTime, Utc};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CoreError {
    #[error("Invalid expiry expression '{expr}': {reason}")]
    InvalidExpiry { expr: String, reason: String },

    #[error("Expiry '{expr}' resolves to {at}, which is not in the future")]
    ExpiryInPast { expr: String, at: DateTime<Utc> },

    #[error("Tag key '{0}' is reserved for backup provenance")]
    ReservedTag(String),

    #[error("Invalid tag: {0}")]
    InvalidTag(String),
}
