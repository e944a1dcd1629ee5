//! Failure classification for error filtering
//!
//! Decides which work errors count as failures in the outcome window.
//! An ignored error is still handed back to the caller as
//! `CircuitError::WorkFailed`; it just leaves the breaker's statistics alone.

use std::any::Any;

/// Context provided to failure classifiers for error evaluation
#[derive(Debug)]
pub struct FailureContext<'a> {
    /// Circuit name
    pub circuit_name: &'a str,
    /// The error that occurred (can be downcast to specific types)
    pub error: &'a dyn Any,
    /// Duration of the failed call in seconds
    pub duration: f64,
}

/// Determines if an error should be recorded as a failure
///
/// # Examples
///
/// ```rust
/// use circuit_gate::{FailureClassifier, FailureContext};
///
/// #[derive(Debug)]
/// struct ServerErrorClassifier;
///
/// impl FailureClassifier for ServerErrorClassifier {
///     fn should_record(&self, ctx: &FailureContext<'_>) -> bool {
///         // Only count 5xx responses; 4xx are the caller's fault
///         ctx.error
///             .downcast_ref::<u16>()
///             .map_or(true, |status| *status >= 500)
///     }
/// }
/// ```
pub trait FailureClassifier: Send + Sync + std::fmt::Debug {
    /// `true` records the error as a failure, `false` ignores it
    fn should_record(&self, ctx: &FailureContext<'_>) -> bool;
}

/// Default classifier that records every error
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultClassifier;

impl FailureClassifier for DefaultClassifier {
    fn should_record(&self, _ctx: &FailureContext<'_>) -> bool {
        true
    }
}

/// Predicate-based classifier using a closure
pub struct PredicateClassifier<F>
where
    F: Fn(&FailureContext<'_>) -> bool + Send + Sync,
{
    predicate: F,
}

impl<F> PredicateClassifier<F>
where
    F: Fn(&FailureContext<'_>) -> bool + Send + Sync,
{
    pub fn new(predicate: F) -> Self {
        Self { predicate }
    }
}

impl<F> FailureClassifier for PredicateClassifier<F>
where
    F: Fn(&FailureContext<'_>) -> bool + Send + Sync,
{
    fn should_record(&self, ctx: &FailureContext<'_>) -> bool {
        (self.predicate)(ctx)
    }
}

impl<F> std::fmt::Debug for PredicateClassifier<F>
where
    F: Fn(&FailureContext<'_>) -> bool + Send + Sync,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PredicateClassifier")
            .field("predicate", &"<closure>")
            .finish()
    }
}
