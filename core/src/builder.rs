//! Builder API for ergonomic circuit breaker configuration

use crate::{
    callbacks::{Callbacks, StateTransition, TransitionListeners},
    circuit::{CircuitBreaker, Config},
    classifier::FailureClassifier,
    clock::{Clock, MonotonicClock},
    errors::ConfigError,
};
use std::sync::Arc;

/// Builder for creating circuit breakers with fluent API
pub struct CircuitBuilder {
    name: String,
    config: Config,
    clock: Option<Arc<dyn Clock>>,
    failure_classifier: Option<Arc<dyn FailureClassifier>>,
    callbacks: Callbacks,
}

impl CircuitBuilder {
    /// Create a new builder for a circuit with the given name
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            config: Config::default(),
            clock: None,
            failure_classifier: None,
            callbacks: Callbacks::new(),
        }
    }

    /// Replace the whole configuration
    pub fn config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    /// Number of most recent calls kept in the sliding window
    pub fn sliding_window_size(mut self, size: usize) -> Self {
        self.config.sliding_window_size = size;
        self
    }

    /// Set minimum number of calls before rate-based thresholds are evaluated
    pub fn minimum_calls(mut self, calls: usize) -> Self {
        self.config.minimum_calls = calls;
        self
    }

    /// Failure percentage (0, 100] that opens the circuit
    pub fn failure_rate_threshold(mut self, percent: f64) -> Self {
        self.config.failure_rate_threshold = percent;
        self
    }

    /// Slow-call percentage (0, 100] that opens the circuit
    pub fn slow_call_rate_threshold(mut self, percent: f64) -> Self {
        self.config.slow_call_rate_threshold = percent;
        self
    }

    /// Calls lasting at least this many seconds count as slow
    pub fn slow_call_duration_threshold_secs(mut self, seconds: f64) -> Self {
        self.config.slow_call_duration_threshold_secs = seconds;
        self
    }

    /// Seconds to stay Open before admitting trial calls
    pub fn wait_duration_open_secs(mut self, seconds: f64) -> Self {
        self.config.wait_duration_open_secs = seconds;
        self
    }

    /// Number of trial calls admitted while HalfOpen
    pub fn permitted_calls_half_open(mut self, calls: usize) -> Self {
        self.config.permitted_calls_half_open = calls;
        self
    }

    /// Set the jitter factor (0.0 = no jitter, 1.0 = full jitter)
    /// Uses chrono-machines formula: wait * (1 - jitter + rand * jitter)
    pub fn jitter_factor(mut self, factor: f64) -> Self {
        self.config.jitter_factor = factor;
        self
    }

    /// Set the time source (defaults to a fresh `MonotonicClock`)
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Set a failure classifier to filter which errors are recorded
    ///
    /// Use this to ignore "expected" errors like validation failures or
    /// client errors (4xx), while still counting server errors (5xx).
    ///
    /// # Examples
    ///
    /// ```rust
    /// use circuit_gate::{CircuitBreaker, PredicateClassifier};
    /// use std::sync::Arc;
    ///
    /// let circuit = CircuitBreaker::builder("api")
    ///     .failure_classifier(Arc::new(PredicateClassifier::new(|ctx| {
    ///         // Only count slow errors
    ///         ctx.duration > 1.0
    ///     })))
    ///     .build()
    ///     .unwrap();
    /// ```
    pub fn failure_classifier(mut self, classifier: Arc<dyn FailureClassifier>) -> Self {
        self.failure_classifier = Some(classifier);
        self
    }

    /// Set callback for when circuit opens
    pub fn on_open<F>(mut self, f: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.callbacks.on_open = Some(Arc::new(f));
        self
    }

    /// Set callback for when circuit closes
    pub fn on_close<F>(mut self, f: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.callbacks.on_close = Some(Arc::new(f));
        self
    }

    /// Set callback for when circuit enters half-open
    pub fn on_half_open<F>(mut self, f: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.callbacks.on_half_open = Some(Arc::new(f));
        self
    }

    /// Subscribe to every state transition
    pub fn on_transition<F>(self, f: F) -> Self
    where
        F: Fn(&StateTransition) + Send + Sync + 'static,
    {
        self.callbacks.listeners.subscribe(f);
        self
    }

    /// Share a listener list, e.g. the one a registry notifies
    pub(crate) fn listeners(mut self, listeners: TransitionListeners) -> Self {
        self.callbacks.listeners = listeners;
        self
    }

    /// Validate the configuration and build the circuit breaker
    pub fn build(self) -> Result<CircuitBreaker, ConfigError> {
        self.config.validate()?;
        Ok(self.build_unchecked())
    }

    pub(crate) fn build_unchecked(self) -> CircuitBreaker {
        let clock = self
            .clock
            .unwrap_or_else(|| Arc::new(MonotonicClock::new()));

        CircuitBreaker::from_parts(
            self.name,
            self.config,
            clock,
            self.callbacks,
            self.failure_classifier,
        )
    }
}
