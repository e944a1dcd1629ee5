//! Folding call outcomes into fallback values
//!
//! Only a breaker rejection is replaced by the fallback. A work error always
//! reaches the caller, so a fallback can never hide a broken dependency that
//! the breaker has not yet given up on.

use crate::{circuit::CircuitState, errors::CircuitError};

/// Result of a protected call
pub type Outcome<T, E> = Result<T, CircuitError<E>>;

/// Context provided to fallback closures when the call was rejected
#[derive(Debug, Clone, PartialEq)]
pub struct FallbackContext {
    /// Circuit name
    pub circuit_name: String,
    /// State that caused the rejection (Open or HalfOpen)
    pub state: CircuitState,
}

/// Fallback folding for [`Outcome`]
///
/// # Example
///
/// ```rust
/// use circuit_gate::{CircuitError, CircuitState, Fallback, Outcome};
///
/// let rejected: Outcome<&str, std::io::Error> = Err(CircuitError::Rejected {
///     circuit: "recommendations".to_string(),
///     state: CircuitState::Open,
/// });
///
/// assert_eq!(rejected.fold(|| "cached").unwrap(), "cached");
/// ```
pub trait Fallback<T, E> {
    /// The value, the fallback on rejection, or the work error
    fn fold<F>(self, fallback: F) -> Result<T, E>
    where
        F: FnOnce() -> T;

    /// Like [`fold`](Self::fold), with access to the rejecting circuit
    fn fold_with<F>(self, fallback: F) -> Result<T, E>
    where
        F: FnOnce(&FallbackContext) -> T;
}

impl<T, E> Fallback<T, E> for Outcome<T, E> {
    fn fold<F>(self, fallback: F) -> Result<T, E>
    where
        F: FnOnce() -> T,
    {
        self.fold_with(|_| fallback())
    }

    fn fold_with<F>(self, fallback: F) -> Result<T, E>
    where
        F: FnOnce(&FallbackContext) -> T,
    {
        match self {
            Ok(value) => Ok(value),
            Err(CircuitError::Rejected { circuit, state }) => {
                tracing::debug!(circuit = %circuit, %state, "serving fallback");
                Ok(fallback(&FallbackContext {
                    circuit_name: circuit,
                    state,
                }))
            }
            Err(CircuitError::WorkFailed(e)) => Err(e),
        }
    }
}
