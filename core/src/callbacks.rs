//! Callback system for circuit breaker state transitions

use crate::circuit::CircuitState;
use parking_lot::RwLock;
use std::sync::Arc;

/// A state change of one named breaker
#[derive(Debug, Clone, PartialEq)]
pub struct StateTransition {
    pub circuit: String,
    pub from: CircuitState,
    pub to: CircuitState,
    /// Monotonic time of the transition, in seconds
    pub at: f64,
}

pub type TransitionHook = Arc<dyn Fn(&StateTransition) + Send + Sync>;

/// Shared, growable list of transition subscribers
///
/// Cloning shares the list, so a registry can hand the same listeners to
/// every breaker it creates and still accept subscribers later on.
#[derive(Clone, Default)]
pub struct TransitionListeners {
    hooks: Arc<RwLock<Vec<TransitionHook>>>,
}

impl TransitionListeners {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&self, f: F)
    where
        F: Fn(&StateTransition) + Send + Sync + 'static,
    {
        self.hooks.write().push(Arc::new(f));
    }

    pub fn len(&self) -> usize {
        self.hooks.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn notify(&self, transition: &StateTransition) {
        // Snapshot so a hook may subscribe without deadlocking
        let hooks = self.hooks.read().clone();
        for hook in hooks {
            hook(transition);
        }
    }
}

impl std::fmt::Debug for TransitionListeners {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransitionListeners")
            .field("hooks", &self.len())
            .finish()
    }
}

/// Callbacks for circuit breaker events
#[derive(Clone)]
pub struct Callbacks {
    pub on_open: Option<Arc<dyn Fn(&str) + Send + Sync>>,
    pub on_close: Option<Arc<dyn Fn(&str) + Send + Sync>>,
    pub on_half_open: Option<Arc<dyn Fn(&str) + Send + Sync>>,
    pub listeners: TransitionListeners,
}

impl Callbacks {
    pub fn new() -> Self {
        Self {
            on_open: None,
            on_close: None,
            on_half_open: None,
            listeners: TransitionListeners::new(),
        }
    }

    /// Run the per-state callback for `transition.to`, then every listener
    pub fn dispatch(&self, transition: &StateTransition) {
        let callback = match transition.to {
            CircuitState::Open => &self.on_open,
            CircuitState::Closed => &self.on_close,
            CircuitState::HalfOpen => &self.on_half_open,
        };
        if let Some(callback) = callback {
            callback(&transition.circuit);
        }
        self.listeners.notify(transition);
    }
}

impl Default for Callbacks {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Callbacks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Callbacks")
            .field("on_open", &self.on_open.is_some())
            .field("on_close", &self.on_close.is_some())
            .field("on_half_open", &self.on_half_open.is_some())
            .field("listeners", &self.listeners)
            .finish()
    }
}
