//! Engine-level errors.
//!
//! These carry raw transport detail for logs. They are converted into the
//! caller-facing `IsolationError` before leaving the service.

use thiserror::Error;
use vecguard_types::IsolationError;

/// Status reported to callers when the engine returned an unparseable body.
pub const MALFORMED_RESPONSE_STATUS: u16 = 502;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Connection failed: {0}")]
    Connect(String),

    #[error("Request timed out after {0}ms")]
    Timeout(u64),

    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("Malformed engine response: {0}")]
    Decode(String),

    #[error("Connection pool exhausted after {waited_ms}ms")]
    PoolExhausted { waited_ms: u64 },

    #[error("Circuit open, retry after {retry_after_ms}ms")]
    CircuitOpen { retry_after_ms: u64 },

    #[error("Client configuration error: {0}")]
    Config(String),
}

impl EngineError {
    pub fn from_reqwest(err: reqwest::Error, timeout_ms: u64) -> Self {
        if err.is_timeout() {
            Self::Timeout(timeout_ms)
        } else if err.is_decode() {
            Self::Decode(err.to_string())
        } else {
            Self::Connect(err.to_string())
        }
    }

    /// Transport failures, timeouts, 429 and 5xx. Only these are retried and
    /// counted by the circuit breaker.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Connect(_) | Self::Timeout(_) => true,
            Self::Http { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }

    /// Convert to the caller-facing taxonomy, dropping engine text.
    pub fn into_isolation(self, operation: &str, attempts: u32) -> IsolationError {
        match self {
            Self::PoolExhausted { waited_ms } => IsolationError::ResourceExhausted { waited_ms },
            Self::CircuitOpen { retry_after_ms } => {
                IsolationError::ServiceUnavailable { retry_after_ms }
            }
            Self::Config(reason) => IsolationError::Config(reason),
            Self::Decode(_) => IsolationError::Engine {
                operation: operation.to_string(),
                status: MALFORMED_RESPONSE_STATUS,
            },
            Self::Http { status, .. } if !(status == 429 || status >= 500) => {
                IsolationError::Engine {
                    operation: operation.to_string(),
                    status,
                }
            }
            Self::Connect(_) | Self::Timeout(_) | Self::Http { .. } => {
                IsolationError::EngineUnavailable {
                    operation: operation.to_string(),
                    attempts,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(EngineError::Connect("refused".into()).is_transient());
        assert!(EngineError::Timeout(100).is_transient());
        assert!(EngineError::Http {
            status: 503,
            body: String::new()
        }
        .is_transient());
        assert!(EngineError::Http {
            status: 429,
            body: String::new()
        }
        .is_transient());
        assert!(!EngineError::Http {
            status: 400,
            body: String::new()
        }
        .is_transient());
        assert!(!EngineError::Decode("eof".into()).is_transient());
        assert!(!EngineError::CircuitOpen { retry_after_ms: 1 }.is_transient());
    }

    #[test]
    fn test_conversion_hides_engine_text() {
        let err = EngineError::Http {
            status: 400,
            body: "Wrong input: tenant acme vector [0.1, ...]".into(),
        }
        .into_isolation("search", 1);
        assert_eq!(
            err,
            IsolationError::Engine {
                operation: "search".into(),
                status: 400
            }
        );
        assert!(!err.to_string().contains("acme"));
    }

    #[test]
    fn test_conversion_of_exhausted_retries() {
        let err = EngineError::Connect("refused".into()).into_isolation("upsert", 3);
        assert_eq!(
            err,
            IsolationError::EngineUnavailable {
                operation: "upsert".into(),
                attempts: 3
            }
        );
    }
}
