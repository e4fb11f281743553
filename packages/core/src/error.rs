//! Error types for the notification and matching engines.

use thiserror::Error;

/// Errors surfaced synchronously to callers of the core operations.
///
/// Channel-level failures never appear here; they are captured into the
/// per-channel result payloads so a partial failure cannot abort the rest
/// of a dispatch, batch, or background scan.
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Validation error: {message}")]
    Validation { message: String },

    #[error("Not found: {message}")]
    NotFound { message: String },

    #[error("Conflict: {message}")]
    Conflict { message: String },

    #[error("Unauthorized: {message}")]
    Unauthorized { message: String },

    #[error("Storage error: {source}")]
    Storage {
        #[from]
        source: sqlx::Error,
    },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl CoreError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation { message: message.into() }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound { message: message.into() }
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict { message: message.into() }
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::Unauthorized { message: message.into() }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal { message: message.into() }
    }

    /// True when the error is the "already exists" signal produced by a
    /// unique constraint (duplicate match pair, duplicate reminder tag,
    /// duplicate geofence).
    pub fn is_conflict(&self) -> bool {
        matches!(self, CoreError::Conflict { .. })
    }
}

/// Errors from channel providers (push, email, realtime).
///
/// Always non-fatal to the surrounding operation: the dispatcher records
/// them per channel and carries on.
#[derive(Error, Debug)]
pub enum ChannelError {
    #[error("Network error: {message}")]
    Network { message: String },

    #[error("Provider rejected the payload: {message}")]
    Rejected { message: String },

    #[error("Rate limit exceeded")]
    RateLimitExceeded,

    #[error("Service unavailable")]
    ServiceUnavailable,
}

impl ChannelError {
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network { message: message.into() }
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self::Rejected { message: message.into() }
    }
}
