//! Error types for the bulwark library.
//!
//! Each component has its own structured error enum. Pool and circuit
//! errors are returned directly to the caller; health and recovery errors
//! are mostly absorbed into queryable state (results, issues, executions)
//! and only surface from management operations.

use std::time::Duration;
use thiserror::Error;

/// A boxed error returned by caller-supplied collaborators.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Error type for resource pool operations.
#[derive(Debug, Error)]
pub enum PoolError {
    /// The pool is at capacity and no waiter slot is available.
    #[error("pool exhausted: {borrowed} of {max_size} resources borrowed, {waiters} waiting")]
    PoolExhausted {
        /// Resources currently borrowed.
        borrowed: usize,
        /// Configured maximum pool size.
        max_size: usize,
        /// Acquisitions currently queued.
        waiters: usize,
    },

    /// The acquire deadline elapsed while waiting for a resource.
    #[error("timed out after {waited:?} waiting for a pooled resource")]
    AcquireTimeout {
        /// How long the caller waited.
        waited: Duration,
    },

    /// The pool has been closed.
    #[error("pool is closed")]
    PoolClosed,

    /// The released resource does not belong to this pool.
    #[error("resource {id} is not borrowed from this pool")]
    UnknownResource {
        /// Identifier of the foreign resource.
        id: u64,
    },

    /// The resource factory failed to construct a resource.
    #[error("failed to create resource: {0}")]
    CreateFailed(#[source] BoxError),

    /// Configuration error.
    #[error("configuration error: {message}")]
    Configuration {
        /// Description of the configuration error.
        message: String,
    },
}

impl PoolError {
    /// Returns `true` if the caller may reasonably retry the acquisition.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::PoolExhausted { .. } | Self::AcquireTimeout { .. } | Self::CreateFailed(_)
        )
    }

    /// Creates a `Configuration` error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }
}

/// Error type for circuit breaker executions.
///
/// `E` is the error type of the wrapped operation.
#[derive(Debug, Error)]
pub enum CircuitError<E> {
    /// The circuit is open; the operation was not attempted.
    #[error("circuit '{name}' is open; retry in {retry_after:?}")]
    Open {
        /// Name of the circuit.
        name: String,
        /// Time remaining until a trial call is admitted.
        retry_after: Duration,
    },

    /// The circuit is half-open and its trial budget is spent.
    #[error("circuit '{name}' is half-open and its trial call budget is exhausted")]
    HalfOpenLimitExceeded {
        /// Name of the circuit.
        name: String,
    },

    /// The operation exceeded the configured call timeout.
    #[error("call through circuit '{name}' timed out after {elapsed:?}")]
    Timeout {
        /// Name of the circuit.
        name: String,
        /// How long the call ran.
        elapsed: Duration,
    },

    /// The operation ran and failed.
    #[error("operation failed: {0}")]
    Operation(E),
}

impl<E> CircuitError<E> {
    /// Returns `true` if the operation was never invoked.
    pub fn is_rejected(&self) -> bool {
        matches!(self, Self::Open { .. } | Self::HalfOpenLimitExceeded { .. })
    }

    /// Returns the wrapped operation error, if the operation ran and failed.
    pub fn into_operation_error(self) -> Option<E> {
        match self {
            Self::Operation(e) => Some(e),
            _ => None,
        }
    }
}

/// Error type for health checks.
#[derive(Debug, Error)]
pub enum HealthError {
    /// The probe did not answer within its timeout.
    #[error("health check '{check}' timed out after {timeout:?}")]
    Timeout {
        /// Identifier of the check.
        check: String,
        /// The configured timeout.
        timeout: Duration,
    },

    /// The probe raised an error.
    #[error("health probe failed: {message}")]
    ProbeFailed {
        /// Description of the failure.
        message: String,
    },

    /// A check with the same id is already registered.
    #[error("health check '{0}' is already registered")]
    DuplicateCheck(String),

    /// No check with this id is registered.
    #[error("health check '{0}' is not registered")]
    UnknownCheck(String),

    /// Configuration error.
    #[error("configuration error: {message}")]
    Configuration {
        /// Description of the configuration error.
        message: String,
    },
}

impl HealthError {
    /// Creates a `ProbeFailed` error.
    pub fn probe_failed(message: impl Into<String>) -> Self {
        Self::ProbeFailed {
            message: message.into(),
        }
    }

    /// Creates a `Configuration` error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }
}

/// Error type for the recovery orchestrator.
#[derive(Debug, Error)]
pub enum RecoveryError {
    /// A recovery action handler returned an error.
    #[error("recovery action '{action}' failed: {source}")]
    ActionFailed {
        /// The action kind.
        action: String,
        /// The handler's error.
        #[source]
        source: BoxError,
    },

    /// A recovery action exceeded its timeout.
    #[error("recovery action '{action}' timed out after {timeout:?}")]
    ActionTimeout {
        /// The action kind.
        action: String,
        /// The configured timeout.
        timeout: Duration,
    },

    /// No handler is registered for the action kind.
    #[error("no handler registered for recovery action '{0}'")]
    NoHandler(String),

    /// A strategy with the same id is already registered.
    #[error("recovery strategy '{0}' is already registered")]
    DuplicateStrategy(String),

    /// No strategy with this id is registered.
    #[error("recovery strategy '{0}' is not registered")]
    UnknownStrategy(String),

    /// No issue with this id is tracked.
    #[error("issue '{0}' is not tracked")]
    UnknownIssue(String),

    /// Configuration error.
    #[error("configuration error: {message}")]
    Configuration {
        /// Description of the configuration error.
        message: String,
    },
}

impl RecoveryError {
    /// Creates a `Configuration` error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }
}

/// A specialized `Result` type for pool operations.
pub type PoolResult<T> = Result<T, PoolError>;

/// A specialized `Result` type for health check operations.
pub type HealthResult<T> = Result<T, HealthError>;

/// A specialized `Result` type for recovery operations.
pub type RecoveryResult<T> = Result<T, RecoveryError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_error_is_recoverable() {
        let timeout = PoolError::AcquireTimeout {
            waited: Duration::from_millis(100),
        };
        assert!(timeout.is_recoverable());
        assert!(!PoolError::PoolClosed.is_recoverable());
    }

    #[test]
    fn test_circuit_error_rejected() {
        let open: CircuitError<std::io::Error> = CircuitError::Open {
            name: "db".into(),
            retry_after: Duration::from_secs(1),
        };
        assert!(open.is_rejected());

        let failed = CircuitError::Operation(std::io::Error::new(
            std::io::ErrorKind::Other,
            "boom",
        ));
        assert!(!failed.is_rejected());
        assert_eq!(failed.into_operation_error().unwrap().to_string(), "boom");
    }

    #[test]
    fn test_error_display() {
        let err = PoolError::PoolExhausted {
            borrowed: 5,
            max_size: 5,
            waiters: 3,
        };
        assert!(err.to_string().contains("5 of 5"));

        let err = HealthError::Timeout {
            check: "db".into(),
            timeout: Duration::from_secs(5),
        };
        assert!(err.to_string().contains("'db'"));
    }
}
