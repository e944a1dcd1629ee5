//! circuit-gate - count-based circuit breakers with a named registry
//!
//! This crate provides:
//! - A fixed-size sliding window of recent call outcomes (failures and slow calls)
//! - A state machine for the breaker lifecycle (Closed → Open → HalfOpen)
//! - Atomic admission of a fixed quota of trial calls while HalfOpen
//! - A registry of named breakers created lazily from registered configs
//! - A tagged call outcome that folds into a fallback only on rejection
//!
//! # Example
//!
//! ```rust
//! use circuit_gate::{BreakerRegistry, Config, Fallback};
//!
//! let registry = BreakerRegistry::new();
//! registry
//!     .register(
//!         "inventory",
//!         Config {
//!             sliding_window_size: 10,
//!             minimum_calls: 10,
//!             failure_rate_threshold: 50.0,
//!             ..Default::default()
//!         },
//!     )
//!     .expect("valid config");
//!
//! registry.on_state_transition(|t| println!("{} went {} -> {}", t.circuit, t.from, t.to));
//!
//! let stock = registry
//!     .execute("inventory", || Ok::<_, std::io::Error>(42))
//!     .fold(|| 0);
//!
//! assert_eq!(stock.unwrap(), 42);
//! ```

pub mod builder;
pub mod callbacks;
pub mod circuit;
pub mod classifier;
pub mod clock;
pub mod errors;
pub mod fallback;
pub mod registry;
pub mod window;

pub use builder::CircuitBuilder;
pub use callbacks::{StateTransition, TransitionListeners};
pub use circuit::{CircuitBreaker, CircuitState, Config, HalfOpenData, Permit};
pub use classifier::{DefaultClassifier, FailureClassifier, FailureContext, PredicateClassifier};
pub use clock::{Clock, ManualClock, MonotonicClock};
pub use errors::{CircuitError, ConfigError};
pub use fallback::{Fallback, FallbackContext, Outcome};
pub use registry::{BreakerRegistry, RegistryBuilder};
pub use window::{MetricsSnapshot, OutcomeWindow};

/// One completed call as seen by the sliding window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallRecord {
    pub succeeded: bool,
    /// Took at least the configured slow-call duration
    pub slow: bool,
}

impl CallRecord {
    pub fn new(succeeded: bool, slow: bool) -> Self {
        Self { succeeded, slow }
    }
}
