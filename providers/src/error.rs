//! Error types for provider calls

use thiserror::Error;

/// Result type for provider operations
pub type Result<T> = std::result::Result<T, Error>;

/// Provider errors
#[derive(Error, Debug)]
pub enum Error {
    /// Transient failure worth retrying (network, rate limit, 5xx)
    #[error("Transient provider error: {0}")]
    Transient(String),

    /// Permanent failure; retrying cannot help (rejected, invalid request)
    #[error("Permanent provider error: {0}")]
    Permanent(String),

    /// Circuit breaker is rejecting calls to this provider
    #[error("Circuit breaker open for {provider}: {reason}")]
    CircuitBreakerOpen {
        /// Provider name
        provider: String,
        /// Why the call was rejected
        reason: String,
    },

    /// Call exceeded its deadline
    #[error("Provider call timed out after {0}s")]
    Timeout(u64),

    /// All retry attempts were exhausted
    #[error("Retries exhausted for {operation}: {last_error}")]
    RetryExhausted {
        /// Operation that kept failing
        operation: String,
        /// Error from the final attempt
        last_error: String,
    },

    /// Referenced transfer unknown to the provider
    #[error("Transfer not found: {0}")]
    TransferNotFound(String),
}

impl Error {
    /// Whether a retry could plausibly succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Transient(_) | Error::Timeout(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(Error::Transient("503".to_string()).is_transient());
        assert!(Error::Timeout(30).is_transient());
        assert!(!Error::Permanent("rejected".to_string()).is_transient());
        assert!(!Error::CircuitBreakerOpen {
            provider: "wallet".to_string(),
            reason: "open".to_string(),
        }
        .is_transient());
    }
}
