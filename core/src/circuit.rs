//! Circuit breaker implementation using state machines
//!
//! The lifecycle is declared with `state_machine!` in dynamic mode. Guards read
//! the shared outcome window (Closed), the trial counters (HalfOpen) or the
//! clock (Open); the breaker drives the machine from two places only:
//! admission (`try_acquire`) and completion (`Permit::record`). Both run under
//! one mutex per breaker, the protected work itself never does.

use crate::{
    CallRecord,
    callbacks::{Callbacks, StateTransition},
    classifier::{FailureClassifier, FailureContext},
    clock::{Clock, MonotonicClock},
    errors::{CircuitError, ConfigError},
    window::{MetricsSnapshot, OutcomeWindow},
};
use parking_lot::{Mutex, RwLock};
use state_machines::state_machine;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

/// Circuit breaker configuration
///
/// Fixed for the lifetime of a breaker. Rates are percentages, durations are
/// seconds.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(default)
)]
pub struct Config {
    /// Number of most recent calls the rates are computed over
    pub sliding_window_size: usize,

    /// Calls needed in the window before rates are evaluated (1..=window size)
    pub minimum_calls: usize,

    /// Failure percentage (0, 100] at or above which the circuit opens
    pub failure_rate_threshold: f64,

    /// Slow-call percentage (0, 100] at or above which the circuit opens
    pub slow_call_rate_threshold: f64,

    /// Calls taking at least this long are slow, whatever their result
    pub slow_call_duration_threshold_secs: f64,

    /// Time spent Open before trial calls are let through
    pub wait_duration_open_secs: f64,

    /// Trial calls admitted while HalfOpen
    pub permitted_calls_half_open: usize,

    /// Jitter factor for the open wait (0.0 = no jitter, 1.0 = full jitter)
    /// Uses chrono-machines formula: wait * (1 - jitter + rand * jitter)
    pub jitter_factor: f64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            sliding_window_size: 100,
            minimum_calls: 100,
            failure_rate_threshold: 50.0,
            slow_call_rate_threshold: 100.0,
            slow_call_duration_threshold_secs: 60.0,
            wait_duration_open_secs: 60.0,
            permitted_calls_half_open: 10,
            jitter_factor: 0.0,
        }
    }
}

impl Config {
    /// Check every threshold and count
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sliding_window_size == 0 {
            return Err(ConfigError::EmptyWindow);
        }
        if self.minimum_calls == 0 || self.minimum_calls > self.sliding_window_size {
            return Err(ConfigError::MinimumCalls {
                minimum_calls: self.minimum_calls,
                window_size: self.sliding_window_size,
            });
        }

        for (field, value) in [
            ("failure_rate_threshold", self.failure_rate_threshold),
            ("slow_call_rate_threshold", self.slow_call_rate_threshold),
        ] {
            if !(value > 0.0 && value <= 100.0) {
                return Err(ConfigError::RateThreshold { field, value });
            }
        }

        let slow = self.slow_call_duration_threshold_secs;
        if !(slow.is_finite() && slow > 0.0) {
            return Err(ConfigError::Duration {
                field: "slow_call_duration_threshold_secs",
                value: slow,
            });
        }
        let wait = self.wait_duration_open_secs;
        if !(wait.is_finite() && wait >= 0.0) {
            return Err(ConfigError::Duration {
                field: "wait_duration_open_secs",
                value: wait,
            });
        }

        if self.permitted_calls_half_open == 0 {
            return Err(ConfigError::NoTrialCalls);
        }
        if !(0.0..=1.0).contains(&self.jitter_factor) {
            return Err(ConfigError::Jitter(self.jitter_factor));
        }

        Ok(())
    }
}

/// Protective state of a breaker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum CircuitState {
    /// Calls flow through and are recorded
    Closed,
    /// Calls are rejected until the open wait elapses
    Open,
    /// A fixed number of trial calls decide between Closed and Open
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "Closed",
            CircuitState::Open => "Open",
            CircuitState::HalfOpen => "HalfOpen",
        }
    }

    fn from_name(name: &str) -> Self {
        match name {
            "Open" => CircuitState::Open,
            "HalfOpen" => CircuitState::HalfOpen,
            _ => CircuitState::Closed,
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Circuit breaker context - shared data across all states
#[derive(Clone)]
pub struct CircuitContext {
    pub name: String,
    pub config: Config,
    pub window: Arc<RwLock<OutcomeWindow>>,
    pub clock: Arc<dyn Clock>,
}

impl CircuitContext {
    fn new(name: String, config: Config, clock: Arc<dyn Clock>) -> Self {
        let window = Arc::new(RwLock::new(OutcomeWindow::new(config.sliding_window_size)));
        Self {
            name,
            config,
            window,
            clock,
        }
    }
}

impl Default for CircuitContext {
    fn default() -> Self {
        Self::new(String::new(), Config::default(), Arc::new(MonotonicClock::new()))
    }
}

impl fmt::Debug for CircuitContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitContext")
            .field("name", &self.name)
            .field("config", &self.config)
            .field("window", &self.window.read().filled())
            .field("clock", &self.clock)
            .finish()
    }
}

/// Data specific to the Open state
#[derive(Debug, Clone, Default)]
pub struct OpenData {
    pub opened_at: f64,
    /// Effective wait for this open period, jitter applied
    pub wait_secs: f64,
}

/// Trial-call bookkeeping for the HalfOpen state
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HalfOpenData {
    /// Trial permits handed out, including calls still in flight
    pub calls_issued: usize,
    pub successes: usize,
    pub failures: usize,
    pub slow_calls: usize,
}

impl HalfOpenData {
    /// Trial calls that have reported an outcome
    pub fn completed(&self) -> usize {
        self.successes + self.failures
    }

    /// Trial rates, undefined until all `permitted` trial calls completed
    pub fn snapshot(&self, permitted: usize) -> MetricsSnapshot {
        MetricsSnapshot::from_counts(self.completed(), self.failures, self.slow_calls, permitted)
    }
}

// Named `Breaker` so the generated types stay clear of the public
// `CircuitState`/`CircuitBreaker` names
state_machine! {
    name: Breaker,
    context: CircuitContext,
    dynamic: true,

    initial: Closed,
    states: [
        Closed,
        Open(OpenData),
        HalfOpen(HalfOpenData),
    ],
    events {
        trip {
            guards: [should_open],
            transition: { from: [Closed, HalfOpen], to: Open }
        }
        attempt_reset {
            guards: [timeout_elapsed],
            transition: { from: Open, to: HalfOpen }
        }
        close {
            guards: [should_close],
            transition: { from: HalfOpen, to: Closed }
        }
    }
}

impl Breaker<Closed> {
    /// Either window rate at or above its threshold, once minimum_calls is reached
    fn should_open(&self, ctx: &CircuitContext) -> bool {
        ctx.window
            .read()
            .snapshot(ctx.config.minimum_calls)
            .exceeds(ctx.config.failure_rate_threshold, ctx.config.slow_call_rate_threshold)
    }
}

impl Breaker<HalfOpen> {
    /// All trial calls completed and either trial rate reached its threshold
    fn should_open(&self, ctx: &CircuitContext) -> bool {
        let Some(data) = self.state_data_half_open() else {
            return false;
        };
        data.snapshot(ctx.config.permitted_calls_half_open)
            .exceeds(ctx.config.failure_rate_threshold, ctx.config.slow_call_rate_threshold)
    }

    /// All trial calls completed and both trial rates stayed below threshold
    fn should_close(&self, ctx: &CircuitContext) -> bool {
        let Some(data) = self.state_data_half_open() else {
            return false;
        };
        let snapshot = data.snapshot(ctx.config.permitted_calls_half_open);
        snapshot.failure_rate.is_some()
            && !snapshot.exceeds(ctx.config.failure_rate_threshold, ctx.config.slow_call_rate_threshold)
    }
}

impl Breaker<Open> {
    /// Check if the open wait has elapsed for Open -> HalfOpen transition
    fn timeout_elapsed(&self, ctx: &CircuitContext) -> bool {
        let Some(data) = self.state_data_open() else {
            return false;
        };
        ctx.clock.monotonic_time() - data.opened_at >= data.wait_secs
    }
}

/// State guarded by the breaker mutex
struct Core {
    machine: DynamicBreaker,
    state_entered_at: f64,
    /// Bumped on every transition; permits remember the epoch they were issued in
    epoch: u64,
}

/// Circuit breaker public API
///
/// Shareable across threads (`Arc<CircuitBreaker>`); every method takes `&self`.
pub struct CircuitBreaker {
    context: CircuitContext,
    core: Mutex<Core>,
    callbacks: Callbacks,
    failure_classifier: Option<Arc<dyn FailureClassifier>>,
}

impl CircuitBreaker {
    /// Create a breaker on the monotonic clock (use builder() for more options)
    pub fn new(name: impl Into<String>, config: Config) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self::from_parts(
            name.into(),
            config,
            Arc::new(MonotonicClock::new()),
            Callbacks::new(),
            None,
        ))
    }

    /// Assemble a breaker from an already validated config
    pub(crate) fn from_parts(
        name: String,
        config: Config,
        clock: Arc<dyn Clock>,
        callbacks: Callbacks,
        failure_classifier: Option<Arc<dyn FailureClassifier>>,
    ) -> Self {
        let context = CircuitContext::new(name, config, clock);
        let core = Core {
            machine: DynamicBreaker::new(context.clone()),
            state_entered_at: context.clock.monotonic_time(),
            epoch: 0,
        };

        Self {
            context,
            core: Mutex::new(core),
            callbacks,
            failure_classifier,
        }
    }

    /// Create a new circuit breaker builder
    pub fn builder(name: impl Into<String>) -> crate::builder::CircuitBuilder {
        crate::builder::CircuitBuilder::new(name)
    }

    pub fn name(&self) -> &str {
        &self.context.name
    }

    pub fn config(&self) -> &Config {
        &self.context.config
    }

    /// Ask for permission to run one call
    ///
    /// Returns `None` while Open (unless the open wait just elapsed, in which
    /// case the breaker moves to HalfOpen and this becomes a trial call) or
    /// once every HalfOpen trial slot is taken.
    pub fn try_acquire(&self) -> Option<Permit<'_>> {
        self.acquire().ok()
    }

    fn acquire(&self) -> Result<Permit<'_>, CircuitState> {
        let mut transitions = Vec::new();
        let admitted = {
            let mut core = self.core.lock();
            let now = self.now();
            self.attempt_reset(&mut core, now, &mut transitions);

            let state = CircuitState::from_name(core.machine.current_state());
            let permitted = self.context.config.permitted_calls_half_open;
            match state {
                CircuitState::Closed => Ok((core.epoch, false)),
                CircuitState::HalfOpen => match core.machine.half_open_data_mut() {
                    Some(data) if data.calls_issued < permitted => {
                        data.calls_issued += 1;
                        Ok((core.epoch, true))
                    }
                    _ => Err(state),
                },
                CircuitState::Open => Err(state),
            }
        };
        self.publish(&transitions);

        match admitted {
            Ok((epoch, trial)) => Ok(Permit {
                breaker: self,
                epoch,
                trial,
                started_at: self.now(),
                settled: false,
            }),
            Err(state) => {
                tracing::debug!(circuit = %self.context.name, %state, "call rejected");
                Err(state)
            }
        }
    }

    /// Execute a fallible operation with circuit breaker protection
    ///
    /// The work closure is never invoked when the breaker rejects the call.
    pub fn call<T, E, F>(&self, f: F) -> Result<T, CircuitError<E>>
    where
        F: FnOnce() -> Result<T, E>,
        E: 'static,
    {
        let permit = match self.acquire() {
            Ok(permit) => permit,
            Err(state) => return Err(self.rejection(state)),
        };
        let result = f();
        let duration = permit.elapsed();
        self.settle(permit, result, duration)
    }

    /// Async variant of [`call`](Self::call); the duration spans the await
    pub async fn call_async<T, E, F, Fut>(&self, f: F) -> Result<T, CircuitError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: 'static,
    {
        let permit = match self.acquire() {
            Ok(permit) => permit,
            Err(state) => return Err(self.rejection(state)),
        };
        let result = f().await;
        let duration = permit.elapsed();
        self.settle(permit, result, duration)
    }

    fn rejection<E>(&self, state: CircuitState) -> CircuitError<E> {
        CircuitError::Rejected {
            circuit: self.context.name.clone(),
            state,
        }
    }

    fn settle<T, E: 'static>(
        &self,
        permit: Permit<'_>,
        result: Result<T, E>,
        duration: f64,
    ) -> Result<T, CircuitError<E>> {
        match result {
            Ok(val) => {
                permit.record_success(duration);
                Ok(val)
            }
            Err(e) => {
                let should_record = match &self.failure_classifier {
                    Some(classifier) => classifier.should_record(&FailureContext {
                        circuit_name: &self.context.name,
                        error: &e as &dyn std::any::Any,
                        duration,
                    }),
                    None => true,
                };

                if should_record {
                    permit.record_failure(duration);
                } else {
                    permit.release();
                }

                Err(CircuitError::WorkFailed(e))
            }
        }
    }

    /// Record an outcome and re-evaluate transitions (rules applied in order:
    /// Open wait elapsed, Closed trip check, HalfOpen trial verdict)
    fn complete(&self, epoch: u64, trial: bool, succeeded: bool, duration: f64) {
        let slow = duration >= self.context.config.slow_call_duration_threshold_secs;

        let mut transitions = Vec::new();
        {
            let mut core = self.core.lock();
            self.context
                .window
                .write()
                .push(CallRecord::new(succeeded, slow));

            let now = self.now();
            self.attempt_reset(&mut core, now, &mut transitions);

            match CircuitState::from_name(core.machine.current_state()) {
                CircuitState::Closed => {
                    self.fire(&mut core, BreakerEvent::Trip, now, &mut transitions);
                }
                CircuitState::HalfOpen if trial && epoch == core.epoch => {
                    if let Some(data) = core.machine.half_open_data_mut() {
                        if succeeded {
                            data.successes += 1;
                        } else {
                            data.failures += 1;
                        }
                        if slow {
                            data.slow_calls += 1;
                        }
                    }
                    if !self.fire(&mut core, BreakerEvent::Trip, now, &mut transitions) {
                        self.fire(&mut core, BreakerEvent::Close, now, &mut transitions);
                    }
                }
                _ => {}
            }
        }
        self.publish(&transitions);
    }

    /// Give back a trial slot that will never report an outcome
    fn release_trial(&self, epoch: u64) {
        let mut core = self.core.lock();
        if core.epoch != epoch {
            return;
        }
        if let Some(data) = core.machine.half_open_data_mut() {
            data.calls_issued = data.calls_issued.saturating_sub(1);
        }
    }

    fn attempt_reset(&self, core: &mut Core, now: f64, out: &mut Vec<StateTransition>) {
        if core.machine.current_state() == "Open" {
            self.fire(core, BreakerEvent::AttemptReset, now, out);
        }
    }

    /// Handle an event; on success apply entry bookkeeping and queue the transition
    fn fire(
        &self,
        core: &mut Core,
        event: BreakerEvent,
        now: f64,
        out: &mut Vec<StateTransition>,
    ) -> bool {
        let from = CircuitState::from_name(core.machine.current_state());
        if core.machine.handle(event).is_err() {
            return false;
        }
        let to = CircuitState::from_name(core.machine.current_state());

        core.state_entered_at = now;
        core.epoch += 1;
        match to {
            CircuitState::Open => {
                let wait_secs = self.open_wait_secs();
                if let Some(data) = core.machine.open_data_mut() {
                    data.opened_at = now;
                    data.wait_secs = wait_secs;
                }
            }
            CircuitState::Closed => self.context.window.write().clear(),
            CircuitState::HalfOpen => {}
        }

        out.push(StateTransition {
            circuit: self.context.name.clone(),
            from,
            to,
            at: now,
        });
        true
    }

    /// Effective open wait, jittered when configured
    fn open_wait_secs(&self) -> f64 {
        let config = &self.context.config;
        if config.jitter_factor > 0.0 {
            let wait_ms = (config.wait_duration_open_secs * 1000.0) as u64;
            let policy = chrono_machines::Policy {
                max_attempts: 1,
                base_delay_ms: wait_ms,
                multiplier: 1.0,
                max_delay_ms: wait_ms,
            };
            let jittered_ms = policy.calculate_delay(1, config.jitter_factor);
            (jittered_ms as f64) / 1000.0
        } else {
            config.wait_duration_open_secs
        }
    }

    /// Log and dispatch transitions; called with the breaker lock released
    fn publish(&self, transitions: &[StateTransition]) {
        for transition in transitions {
            if transition.to == CircuitState::Open {
                tracing::warn!(
                    circuit = %transition.circuit,
                    from = %transition.from,
                    to = %transition.to,
                    "circuit opened"
                );
            } else {
                tracing::info!(
                    circuit = %transition.circuit,
                    from = %transition.from,
                    to = %transition.to,
                    "circuit state changed"
                );
            }
            self.callbacks.dispatch(transition);
        }
    }

    fn now(&self) -> f64 {
        self.context.clock.monotonic_time()
    }

    /// Current state; does not itself apply the open-wait transition
    pub fn state(&self) -> CircuitState {
        CircuitState::from_name(self.core.lock().machine.current_state())
    }

    /// Get current state name
    pub fn state_name(&self) -> &'static str {
        self.state().as_str()
    }

    pub fn is_open(&self) -> bool {
        self.state() == CircuitState::Open
    }

    pub fn is_closed(&self) -> bool {
        self.state() == CircuitState::Closed
    }

    pub fn is_half_open(&self) -> bool {
        self.state() == CircuitState::HalfOpen
    }

    /// Monotonic time at which the current state was entered
    pub fn state_entered_at(&self) -> f64 {
        self.core.lock().state_entered_at
    }

    /// Failure and slow-call rates over the sliding window
    pub fn metrics(&self) -> MetricsSnapshot {
        self.context
            .window
            .read()
            .snapshot(self.context.config.minimum_calls)
    }

    /// Trial counters, only while HalfOpen
    pub fn half_open_status(&self) -> Option<HalfOpenData> {
        self.core.lock().machine.half_open_data().cloned()
    }

    /// The most recent `limit` recorded calls, oldest first
    pub fn recent_calls(&self, limit: usize) -> Vec<CallRecord> {
        self.context.window.read().recent(limit)
    }

    /// Clear all recorded calls and force the circuit back to Closed
    pub fn reset(&self) {
        let mut transitions = Vec::new();
        {
            let mut core = self.core.lock();
            let from = CircuitState::from_name(core.machine.current_state());
            self.context.window.write().clear();

            if from != CircuitState::Closed {
                let now = self.now();
                core.machine = DynamicBreaker::new(self.context.clone());
                core.state_entered_at = now;
                core.epoch += 1;
                transitions.push(StateTransition {
                    circuit: self.context.name.clone(),
                    from,
                    to: CircuitState::Closed,
                    at: now,
                });
            }
        }
        self.publish(&transitions);
    }
}

impl fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.context.name)
            .field("state", &self.state())
            .field("config", &self.context.config)
            .field("callbacks", &self.callbacks)
            .finish()
    }
}

/// Permission to run one call through a breaker
///
/// Report the outcome with [`record`](Self::record). A permit dropped without
/// an outcome (panicking work, abandoned call) returns its trial slot.
#[must_use = "an unused permit holds a trial slot until dropped"]
pub struct Permit<'a> {
    breaker: &'a CircuitBreaker,
    epoch: u64,
    trial: bool,
    started_at: f64,
    settled: bool,
}

impl Permit<'_> {
    /// Issued while HalfOpen, counted against the trial quota
    pub fn is_trial(&self) -> bool {
        self.trial
    }

    /// Seconds since the permit was issued, on the breaker's clock
    pub fn elapsed(&self) -> f64 {
        (self.breaker.now() - self.started_at).max(0.0)
    }

    /// Record the call outcome and its duration in seconds
    pub fn record(mut self, succeeded: bool, duration: f64) {
        self.settled = true;
        self.breaker
            .complete(self.epoch, self.trial, succeeded, duration);
    }

    pub fn record_success(self, duration: f64) {
        self.record(true, duration);
    }

    pub fn record_failure(self, duration: f64) {
        self.record(false, duration);
    }

    /// Drop the call without recording it
    pub fn release(self) {}
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        if !self.settled && self.trial {
            self.breaker.release_trial(self.epoch);
        }
    }
}

impl fmt::Debug for Permit<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Permit")
            .field("circuit", &self.breaker.name())
            .field("trial", &self.trial)
            .field("started_at", &self.started_at)
            .finish()
    }
}
