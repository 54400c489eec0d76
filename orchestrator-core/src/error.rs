use thiserror::Error;

/// Typed outcome of every public control-plane operation.
///
/// No operation panics; callers always receive one of these variants or a
/// success value.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum OrchestratorError {
    /// Missing required field, enum out of range, malformed id.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Unknown node or task id.
    #[error("unknown entity: {0}")]
    UnknownEntity(String),

    /// Duplicate registration with a differing spec, or an illegal state
    /// transition (e.g. completing a non-active task).
    #[error("conflict: {0}")]
    Conflict(String),

    /// Node reachable but refused or timed out the dispatch call.
    #[error("transient dispatch failure: {0}")]
    TransientDispatch(String),

    /// Node returned a structured "cannot execute" after eligibility
    /// already passed; should be rare.
    #[error("permanent dispatch failure: {0}")]
    PermanentDispatch(String),

    /// Detected via heartbeat timeout; triggers bulk recovery.
    #[error("node failure: {0}")]
    NodeFailure(String),

    /// Task exceeded its timeout_sec.
    #[error("timeout: {0}")]
    Timeout(String),

    /// Task exceeded its deadline (takes precedence over timeout).
    #[error("deadline exceeded: {0}")]
    DeadlineExceeded(String),

    /// Soft cap on the pending queue reached; task was not enqueued.
    #[error("queue full: {0}")]
    QueueFull(String),

    /// Unexpected internal condition. Registry/store are left untouched.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Result type alias using [`OrchestratorError`].
pub type Result<T> = std::result::Result<T, OrchestratorError>;

impl From<String> for OrchestratorError {
    fn from(s: String) -> Self {
        OrchestratorError::Internal(s)
    }
}

impl From<&str> for OrchestratorError {
    fn from(s: &str) -> Self {
        OrchestratorError::Internal(s.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = OrchestratorError::UnknownEntity("node-1".to_string());
        assert_eq!(err.to_string(), "unknown entity: node-1");
    }

    #[test]
    fn test_error_from_str() {
        let err: OrchestratorError = "boom".into();
        assert!(matches!(err, OrchestratorError::Internal(_)));
    }
}
