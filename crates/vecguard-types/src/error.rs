//! Error taxonomy for the isolation service.
//!
//! Every operation exposed to application code returns one of these kinds.
//! Messages never contain vector content, foreign payloads or raw engine text.

use thiserror::Error;

/// Unified error type for isolation-service operations.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum IsolationError {
    /// The request context is missing or malformed.
    #[error("Invalid isolation context: {field}: {reason}")]
    InvalidIsolationContext { field: String, reason: String },

    /// A point payload failed validation.
    #[error("Invalid payload: {field}: {reason}")]
    InvalidPayload { field: String, reason: String },

    /// A vector does not have the configured dimensionality.
    #[error("Invalid dimension: expected {expected}, got {actual}")]
    InvalidDimension { expected: usize, actual: usize },

    /// Query parameters (vector values, refinements) are unusable.
    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    /// The search exceeded its hard timeout and was cancelled.
    #[error("Search timed out after {timeout_ms}ms")]
    SearchTimeout { timeout_ms: u64 },

    /// The circuit breaker is open.
    #[error("Index engine unavailable, retry after {retry_after_ms}ms")]
    ServiceUnavailable { retry_after_ms: u64 },

    /// No engine connection became free within the pool wait.
    #[error("Connection pool exhausted after waiting {waited_ms}ms")]
    ResourceExhausted { waited_ms: u64 },

    /// Transient engine failures outlasted the retry budget.
    #[error("Index engine unreachable during {operation} after {attempts} attempts")]
    EngineUnavailable { operation: String, attempts: u32 },

    /// The engine rejected a request for a non-transient reason.
    #[error("Index engine rejected {operation} (status {status})")]
    Engine { operation: String, status: u16 },

    /// The existing collection does not match configuration.
    #[error("Collection {collection} is incompatible: {reason}")]
    SchemaIncompatible { collection: String, reason: String },

    /// The operation is not supported (e.g. changing a project's language).
    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

impl IsolationError {
    /// Build an `InvalidIsolationContext` error.
    pub fn context(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidIsolationContext {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Build an `InvalidPayload` error.
    pub fn payload(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidPayload {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Whether the caller may retry the same request later.
    ///
    /// Validation and schema errors are permanent; capacity and availability
    /// errors are not.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::SearchTimeout { .. }
                | Self::ServiceUnavailable { .. }
                | Self::ResourceExhausted { .. }
                | Self::EngineUnavailable { .. }
        )
    }

    /// Stable label used for metrics and logs.
    pub fn category(&self) -> &'static str {
        match self {
            Self::InvalidIsolationContext { .. } => "invalid_isolation_context",
            Self::InvalidPayload { .. } => "invalid_payload",
            Self::InvalidDimension { .. } => "invalid_dimension",
            Self::InvalidQuery(_) => "invalid_query",
            Self::SearchTimeout { .. } => "search_timeout",
            Self::ServiceUnavailable { .. } => "service_unavailable",
            Self::ResourceExhausted { .. } => "resource_exhausted",
            Self::EngineUnavailable { .. } => "engine_unavailable",
            Self::Engine { .. } => "engine",
            Self::SchemaIncompatible { .. } => "schema_incompatible",
            Self::UnsupportedOperation(_) => "unsupported_operation",
            Self::Config(_) => "config",
        }
    }

    /// Machine-readable field name for validation errors.
    pub fn field(&self) -> Option<&str> {
        match self {
            Self::InvalidIsolationContext { field, .. } | Self::InvalidPayload { field, .. } => {
                Some(field)
            }
            Self::InvalidDimension { .. } => Some("vector"),
            _ => None,
        }
    }

    /// True for the validation family, which is never retried.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::InvalidIsolationContext { .. }
                | Self::InvalidPayload { .. }
                | Self::InvalidDimension { .. }
                | Self::InvalidQuery(_)
        )
    }
}
