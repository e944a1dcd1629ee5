//! Error types for circuit breaker operations

use crate::circuit::CircuitState;
use thiserror::Error;

/// Why a protected call did not produce a value
#[derive(Debug, Error)]
pub enum CircuitError<E = Box<dyn std::error::Error + Send + Sync>> {
    /// The breaker refused the call; the work unit never ran
    ///
    /// Raised while Open, or while HalfOpen once every trial slot is taken.
    #[error("Circuit '{circuit}' rejected the call (state: {state})")]
    Rejected { circuit: String, state: CircuitState },
    /// The work unit ran and returned an error
    #[error("Circuit execution failed: {0}")]
    WorkFailed(#[source] E),
}

impl<E> CircuitError<E> {
    /// True when the breaker refused the call
    pub fn is_rejected(&self) -> bool {
        matches!(self, CircuitError::Rejected { .. })
    }

    /// The underlying work error, if the call actually ran
    pub fn into_work_error(self) -> Option<E> {
        match self {
            CircuitError::WorkFailed(e) => Some(e),
            CircuitError::Rejected { .. } => None,
        }
    }
}

/// Invalid breaker configuration, reported at registration time
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("sliding_window_size must be at least 1")]
    EmptyWindow,
    #[error("minimum_calls must be between 1 and sliding_window_size ({window_size}), got {minimum_calls}")]
    MinimumCalls {
        minimum_calls: usize,
        window_size: usize,
    },
    #[error("{field} must be a percentage in (0, 100], got {value}")]
    RateThreshold { field: &'static str, value: f64 },
    #[error("{field} is not a usable duration in seconds: {value}")]
    Duration { field: &'static str, value: f64 },
    #[error("permitted_calls_half_open must be at least 1")]
    NoTrialCalls,
    #[error("jitter_factor must be in [0, 1], got {0}")]
    Jitter(f64),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[derive(Debug, Error)]
    #[error("upstream timed out")]
    struct UpstreamError;

    #[test]
    fn test_rejected_display() {
        let err: CircuitError<UpstreamError> = CircuitError::Rejected {
            circuit: "payments".to_string(),
            state: CircuitState::Open,
        };

        assert_eq!(
            err.to_string(),
            "Circuit 'payments' rejected the call (state: Open)"
        );
        assert!(err.is_rejected());
        assert!(err.source().is_none());
    }

    #[test]
    fn test_work_failed_keeps_source() {
        let err = CircuitError::WorkFailed(UpstreamError);

        assert_eq!(err.to_string(), "Circuit execution failed: upstream timed out");
        assert!(!err.is_rejected());
        assert_eq!(
            err.source().map(|s| s.to_string()),
            Some("upstream timed out".to_string())
        );
        assert!(err.into_work_error().is_some());
    }

    #[test]
    fn test_config_error_display() {
        let err = ConfigError::MinimumCalls {
            minimum_calls: 20,
            window_size: 10,
        };
        assert_eq!(
            err.to_string(),
            "minimum_calls must be between 1 and sliding_window_size (10), got 20"
        );
    }
}
