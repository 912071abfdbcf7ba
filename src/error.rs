//! Error types for the Lustre Access Operator
//!
//! Provides structured error types for the reconciliation engine, the access
//! provisioner, the conversion layer, and the resource store adapters.

use std::time::Duration;
use thiserror::Error;

/// Unified error type for the operator
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Internal Errors
    // =========================================================================
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    // =========================================================================
    // Kubernetes / Store Errors
    // =========================================================================
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    #[error("Resource not found: {kind}/{name}")]
    ResourceNotFound { kind: String, name: String },

    #[error("Resource already exists: {kind}/{name}")]
    ResourceExists { kind: String, name: String },

    #[error("Write conflict on {kind}/{name}: resource version is stale")]
    Conflict { kind: String, name: String },

    // =========================================================================
    // Conversion Errors
    // =========================================================================
    #[error("Malformed conversion data on {name}: {reason}")]
    MalformedConversionData { name: String, reason: String },

    #[error("Conversion not supported: {kind}.{method}")]
    ConversionNotSupported { kind: String, method: String },

    // =========================================================================
    // Parse Errors
    // =========================================================================
    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("YAML parse error: {0}")]
    YamlParse(#[from] serde_yaml::Error),
}

/// Action to take on error during reconciliation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorAction {
    /// Requeue with exponential backoff
    RequeueWithBackoff,
    /// Requeue after specific duration
    RequeueAfter(Duration),
    /// Don't requeue, wait for changes
    NoRequeue,
}

impl Error {
    /// Determine what action to take for this error
    pub fn action(&self) -> ErrorAction {
        match self {
            // Transient errors - retry with backoff
            Error::Kube(_) | Error::Conflict { .. } => ErrorAction::RequeueWithBackoff,

            // A missing or duplicate object usually means a racing writer;
            // re-reading on the next pass resolves it
            Error::ResourceNotFound { .. } | Error::ResourceExists { .. } => {
                ErrorAction::RequeueAfter(Duration::from_secs(10))
            }

            // Conversion and configuration errors - don't retry automatically
            Error::Configuration(_)
            | Error::MalformedConversionData { .. }
            | Error::ConversionNotSupported { .. }
            | Error::JsonParse(_)
            | Error::YamlParse(_) => ErrorAction::NoRequeue,

            // All other errors - retry with backoff
            _ => ErrorAction::RequeueWithBackoff,
        }
    }

    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        !matches!(self.action(), ErrorAction::NoRequeue)
    }

    /// Check if this error is an optimistic-concurrency conflict
    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::Conflict { .. })
    }
}

/// Result type alias for the operator
pub type Result<T> = std::result::Result<T, Error>;
