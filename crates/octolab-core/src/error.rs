//! The error taxonomy shared by the lab service, the runtime abstraction,
//! and netd's client. Callers match on `CoreError` to pick an HTTP status
//! or a retry policy; `anyhow::Error` carries the lower-level chain for
//! logging and is never itself shown to a user.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("not found")]
    NotFound,

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("preflight failed")]
    PreflightFailed,

    #[error("unauthenticated")]
    Unauthenticated,

    #[error("forbidden")]
    Forbidden,

    #[error("timed out: {0}")]
    Timeout(String),

    #[error("external failure in {component}: {detail}")]
    ExternalFailure { component: String, detail: String },

    #[error("cancelled")]
    Cancelled,

    #[error("internal error")]
    Internal(#[source] anyhow::Error),
}

impl CoreError {
    /// Whether this error should ever be retried automatically (by the
    /// teardown worker on its next tick, for instance).
    pub fn is_retryable(&self) -> bool {
        matches!(self, CoreError::Timeout(_) | CoreError::ExternalFailure { .. })
    }

    /// Text safe to persist as a lab's `FAILED` reason or return to a user.
    /// Never includes the inner `anyhow` chain, which may carry paths,
    /// stderr output, or other operational detail.
    pub fn sanitized_reason(&self) -> String {
        match self {
            CoreError::Validation(msg) => format!("validation failed: {msg}"),
            CoreError::NotFound => "not found".to_string(),
            CoreError::Conflict(msg) => format!("conflict: {msg}"),
            CoreError::PreflightFailed => "preflight failed".to_string(),
            CoreError::Unauthenticated => "unauthenticated".to_string(),
            CoreError::Forbidden => "forbidden".to_string(),
            CoreError::Timeout(phase) => format!("timed out during {phase}"),
            CoreError::ExternalFailure { component, .. } => {
                format!("external failure in {component}")
            }
            CoreError::Cancelled => "cancelled".to_string(),
            CoreError::Internal(_) => "internal error".to_string(),
        }
    }
}

pub type CoreResult<T> = std::result::Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitized_reason_hides_internal_detail() {
        let err = CoreError::ExternalFailure {
            component: "firecracker".to_string(),
            detail: "/etc/secret-path leaked in stderr".to_string(),
        };
        let reason = err.sanitized_reason();
        assert!(!reason.contains("secret-path"));
        assert!(reason.contains("firecracker"));
    }

    #[test]
    fn test_retryable_kinds() {
        assert!(CoreError::Timeout("boot".into()).is_retryable());
        assert!(
            CoreError::ExternalFailure {
                component: "netd".into(),
                detail: "x".into()
            }
            .is_retryable()
        );
        assert!(!CoreError::Validation("bad".into()).is_retryable());
        assert!(!CoreError::Cancelled.is_retryable());
    }

    #[test]
    fn test_cancelled_never_marks_failed_is_caller_responsibility() {
        // CoreError itself has no notion of lab status; this just pins
        // that Cancelled is distinct from the other terminal-ish kinds so
        // callers can special-case it.
        assert!(!matches!(CoreError::Cancelled, CoreError::Internal(_)));
    }
}
