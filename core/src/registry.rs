//! Named circuit breakers
//!
//! A `BreakerRegistry` maps names to configurations and lazily builds one
//! `CircuitBreaker` per name on first use. It is an ordinary value: build it at
//! startup, wrap it in an `Arc` and hand it to whatever needs protection.

use crate::{
    builder::CircuitBuilder,
    callbacks::{StateTransition, TransitionListeners},
    circuit::{CircuitBreaker, Config},
    classifier::FailureClassifier,
    clock::{Clock, MonotonicClock},
    errors::ConfigError,
    fallback::Outcome,
};
use dashmap::DashMap;
use std::future::Future;
use std::sync::Arc;

/// Registry of named circuit breakers
pub struct BreakerRegistry {
    breakers: DashMap<String, Arc<CircuitBreaker>>,
    configs: DashMap<String, Config>,
    /// Used for names that were never registered
    default_config: Config,
    clock: Arc<dyn Clock>,
    failure_classifier: Option<Arc<dyn FailureClassifier>>,
    listeners: TransitionListeners,
}

impl BreakerRegistry {
    /// Empty registry with `Config::default()` as the fallback config
    pub fn new() -> Self {
        Self {
            breakers: DashMap::new(),
            configs: DashMap::new(),
            default_config: Config::default(),
            clock: Arc::new(MonotonicClock::new()),
            failure_classifier: None,
            listeners: TransitionListeners::new(),
        }
    }

    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::new()
    }

    /// Register (or replace) the configuration for `name`
    ///
    /// An invalid config is rejected and leaves any existing breaker and config
    /// under that name untouched. A valid one replaces the breaker, since a
    /// breaker's config is fixed for its lifetime; callers still holding the
    /// old `Arc` keep using the old instance.
    pub fn register(&self, name: impl Into<String>, config: Config) -> Result<(), ConfigError> {
        let name = name.into();
        if let Err(e) = config.validate() {
            tracing::warn!(circuit = %name, error = %e, "rejected circuit configuration");
            return Err(e);
        }

        self.configs.insert(name.clone(), config.clone());
        if let Some(mut existing) = self.breakers.get_mut(&name) {
            tracing::debug!(circuit = %name, "replacing circuit after re-registration");
            *existing = Arc::new(self.assemble(&name, config));
        }
        Ok(())
    }

    /// The breaker for `name`, created on first use
    ///
    /// Concurrent first calls for the same name all receive the same instance.
    pub fn get_or_create(&self, name: &str) -> Arc<CircuitBreaker> {
        if let Some(breaker) = self.breakers.get(name) {
            return Arc::clone(breaker.value());
        }

        let breaker = self
            .breakers
            .entry(name.to_string())
            .or_insert_with(|| {
                let config = self.config_for(name);
                tracing::debug!(circuit = %name, "creating circuit");
                Arc::new(self.assemble(name, config))
            });
        Arc::clone(breaker.value())
    }

    /// The breaker for `name`, if one was created already
    pub fn get(&self, name: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers
            .get(name)
            .map(|breaker| Arc::clone(breaker.value()))
    }

    /// The registered configuration for `name`
    pub fn get_config(&self, name: &str) -> Option<Config> {
        self.configs.get(name).map(|config| config.value().clone())
    }

    /// Registered config for `name`, or the default one
    pub fn config_for(&self, name: &str) -> Config {
        self.get_config(name)
            .unwrap_or_else(|| self.default_config.clone())
    }

    pub fn default_config(&self) -> &Config {
        &self.default_config
    }

    /// Names of all breakers created so far, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .breakers
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        names.sort();
        names
    }

    /// Subscribe to transitions of every breaker in this registry,
    /// including breakers created later
    pub fn on_state_transition<F>(&self, f: F)
    where
        F: Fn(&StateTransition) + Send + Sync + 'static,
    {
        self.listeners.subscribe(f);
    }

    /// Run `f` through the breaker named `name`
    pub fn execute<T, E, F>(&self, name: &str, f: F) -> Outcome<T, E>
    where
        F: FnOnce() -> Result<T, E>,
        E: 'static,
    {
        self.get_or_create(name).call(f)
    }

    /// Async variant of [`execute`](Self::execute)
    pub async fn execute_async<T, E, F, Fut>(&self, name: &str, f: F) -> Outcome<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: 'static,
    {
        let breaker = self.get_or_create(name);
        breaker.call_async(f).await
    }

    fn assemble(&self, name: &str, config: Config) -> CircuitBreaker {
        let mut builder = CircuitBuilder::new(name)
            .config(config)
            .clock(Arc::clone(&self.clock))
            .listeners(self.listeners.clone());
        if let Some(classifier) = &self.failure_classifier {
            builder = builder.failure_classifier(Arc::clone(classifier));
        }
        // Every config reaching this point was validated on the way in
        builder.build_unchecked()
    }
}

impl Default for BreakerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for BreakerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BreakerRegistry")
            .field("breakers", &self.names())
            .field("configs", &self.configs.len())
            .field("default_config", &self.default_config)
            .field("listeners", &self.listeners)
            .finish()
    }
}

/// Builder for a registry with a custom default config, clock or initial configs
pub struct RegistryBuilder {
    default_config: Config,
    clock: Option<Arc<dyn Clock>>,
    failure_classifier: Option<Arc<dyn FailureClassifier>>,
    configs: Vec<(String, Config)>,
    eager: bool,
}

impl RegistryBuilder {
    pub fn new() -> Self {
        Self {
            default_config: Config::default(),
            clock: None,
            failure_classifier: None,
            configs: Vec::new(),
            eager: false,
        }
    }

    /// Config used for names that were never registered
    pub fn default_config(mut self, config: Config) -> Self {
        self.default_config = config;
        self
    }

    /// Time source shared by every breaker of the registry
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Classifier shared by every breaker of the registry
    pub fn failure_classifier(mut self, classifier: Arc<dyn FailureClassifier>) -> Self {
        self.failure_classifier = Some(classifier);
        self
    }

    /// Register a named configuration at build time
    pub fn register(mut self, name: impl Into<String>, config: Config) -> Self {
        self.configs.push((name.into(), config));
        self
    }

    /// Create the breakers for registered names right away instead of on first use
    pub fn eager(mut self, eager: bool) -> Self {
        self.eager = eager;
        self
    }

    /// Validate every config and build the registry
    pub fn build(self) -> Result<BreakerRegistry, ConfigError> {
        self.default_config.validate()?;

        let registry = BreakerRegistry {
            default_config: self.default_config,
            clock: self
                .clock
                .unwrap_or_else(|| Arc::new(MonotonicClock::new())),
            failure_classifier: self.failure_classifier,
            ..BreakerRegistry::new()
        };

        for (name, config) in self.configs {
            registry.register(name.as_str(), config)?;
            if self.eager {
                registry.get_or_create(&name);
            }
        }
        Ok(registry)
    }
}

impl Default for RegistryBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{CircuitError, CircuitState, ManualClock};
    use std::sync::Barrier;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn small() -> Config {
        Config {
            sliding_window_size: 2,
            minimum_calls: 2,
            wait_duration_open_secs: 5.0,
            permitted_calls_half_open: 1,
            ..Default::default()
        }
    }

    #[test]
    fn test_get_or_create_is_idempotent() {
        let registry = BreakerRegistry::new();

        let first = registry.get_or_create("payments");
        let second = registry.get_or_create("payments");

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(registry.names(), vec!["payments".to_string()]);
    }

    #[test]
    fn test_concurrent_get_or_create_yields_one_instance() {
        let registry = Arc::new(BreakerRegistry::new());
        let barrier = Arc::new(Barrier::new(32));

        let handles: Vec<_> = (0..32)
            .map(|_| {
                let registry = Arc::clone(&registry);
                let barrier = Arc::clone(&barrier);
                std::thread::spawn(move || {
                    barrier.wait();
                    registry.get_or_create("shared")
                })
            })
            .collect();

        let breakers: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        for breaker in &breakers {
            assert!(Arc::ptr_eq(breaker, &breakers[0]));
        }
        assert_eq!(registry.names().len(), 1);
    }

    #[test]
    fn test_unknown_name_uses_default_config() {
        let registry = BreakerRegistry::builder()
            .default_config(small())
            .build()
            .unwrap();

        assert_eq!(registry.get_config("unknown"), None);
        assert_eq!(registry.get_or_create("unknown").config(), &small());
    }

    #[test]
    fn test_register_uses_named_config() {
        let registry = BreakerRegistry::new();
        registry.register("search", small()).unwrap();

        assert_eq!(registry.get_config("search"), Some(small()));
        assert_eq!(registry.get_or_create("search").config(), &small());
        assert_eq!(
            registry.get_or_create("other").config(),
            &Config::default()
        );
    }

    #[test]
    fn test_invalid_registration_keeps_previous_breaker() {
        let registry = BreakerRegistry::new();
        registry.register("search", small()).unwrap();
        let before = registry.get_or_create("search");

        let invalid = Config {
            minimum_calls: 3,
            ..small()
        };
        assert!(matches!(
            registry.register("search", invalid),
            Err(ConfigError::MinimumCalls { .. })
        ));

        assert_eq!(registry.get_config("search"), Some(small()));
        assert!(Arc::ptr_eq(&before, &registry.get_or_create("search")));
    }

    #[test]
    fn test_reregistration_replaces_breaker() {
        let registry = BreakerRegistry::new();
        registry.register("search", small()).unwrap();
        let before = registry.get_or_create("search");

        let wider = Config {
            sliding_window_size: 4,
            ..small()
        };
        registry.register("search", wider.clone()).unwrap();

        let after = registry.get_or_create("search");
        assert!(!Arc::ptr_eq(&before, &after));
        assert_eq!(after.config(), &wider);
    }

    #[test]
    fn test_builder_validates_configs() {
        let result = BreakerRegistry::builder()
            .register("bad", Config {
                failure_rate_threshold: 0.0,
                ..small()
            })
            .build();
        assert!(matches!(result, Err(ConfigError::RateThreshold { .. })));

        let result = BreakerRegistry::builder()
            .default_config(Config {
                sliding_window_size: 0,
                ..small()
            })
            .build();
        assert!(matches!(result, Err(ConfigError::EmptyWindow)));
    }

    #[test]
    fn test_eager_creation() {
        let registry = BreakerRegistry::builder()
            .register("a", small())
            .register("b", small())
            .eager(true)
            .build()
            .unwrap();

        assert_eq!(registry.names(), vec!["a".to_string(), "b".to_string()]);
        assert!(registry.get("a").is_some());
        assert!(registry.get("c").is_none());
    }

    #[test]
    fn test_execute_rejects_once_open() {
        let clock = Arc::new(ManualClock::new());
        let registry = BreakerRegistry::builder()
            .clock(clock.clone())
            .register("ledger", small())
            .build()
            .unwrap();

        for _ in 0..2 {
            let result = registry.execute("ledger", || Err::<(), _>("down"));
            assert!(matches!(result, Err(CircuitError::WorkFailed("down"))));
        }

        let calls = AtomicUsize::new(0);
        let result = registry.execute("ledger", || {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok::<_, &str>(())
        });
        assert!(matches!(
            result,
            Err(CircuitError::Rejected {
                state: CircuitState::Open,
                ..
            })
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        clock.advance(5.0);
        assert!(registry.execute("ledger", || Ok::<_, &str>(())).is_ok());
        assert!(registry.get_or_create("ledger").is_closed());
    }

    #[test]
    fn test_registry_listeners_see_every_breaker() {
        let registry = BreakerRegistry::builder()
            .default_config(small())
            .clock(Arc::new(ManualClock::new()))
            .build()
            .unwrap();

        let opened = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let opened_clone = opened.clone();
        registry.on_state_transition(move |t| {
            if t.to == CircuitState::Open {
                opened_clone.lock().push(t.circuit.clone());
            }
        });

        for name in ["alpha", "beta"] {
            for _ in 0..2 {
                let _ = registry.execute(name, || Err::<(), _>("down"));
            }
        }

        assert_eq!(
            *opened.lock(),
            vec!["alpha".to_string(), "beta".to_string()]
        );
    }
}
