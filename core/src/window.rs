//! Count-based sliding window of call outcomes
//!
//! `OutcomeWindow` keeps the last `capacity` call records in a ring buffer.
//! Running failure and slow-call counts are maintained on every push so that
//! computing a `MetricsSnapshot` is O(1) no matter how large the window is.

use crate::CallRecord;

/// Fixed-capacity ring buffer of call outcomes
#[derive(Debug, Clone)]
pub struct OutcomeWindow {
    records: Vec<CallRecord>,
    capacity: usize,
    /// Slot the next record is written to once the buffer is full
    head: usize,
    failures: usize,
    slow_calls: usize,
}

impl OutcomeWindow {
    /// Create an empty window holding at most `capacity` records
    ///
    /// A zero capacity is bumped to 1; `Config::validate` rejects it before
    /// a breaker is ever built.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            records: Vec::with_capacity(capacity),
            capacity,
            head: 0,
            failures: 0,
            slow_calls: 0,
        }
    }

    /// Record one completed call, evicting the oldest record when full
    pub fn push(&mut self, record: CallRecord) {
        if self.records.len() < self.capacity {
            self.records.push(record);
        } else {
            let evicted = std::mem::replace(&mut self.records[self.head], record);
            self.forget(evicted);
            self.head = (self.head + 1) % self.capacity;
        }

        if !record.succeeded {
            self.failures += 1;
        }
        if record.slow {
            self.slow_calls += 1;
        }
    }

    fn forget(&mut self, record: CallRecord) {
        if !record.succeeded {
            self.failures -= 1;
        }
        if record.slow {
            self.slow_calls -= 1;
        }
    }

    /// Number of valid records (never more than the capacity)
    pub fn filled(&self) -> usize {
        self.records.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn failures(&self) -> usize {
        self.failures
    }

    pub fn slow_calls(&self) -> usize {
        self.slow_calls
    }

    /// Drop every record
    pub fn clear(&mut self) {
        self.records.clear();
        self.head = 0;
        self.failures = 0;
        self.slow_calls = 0;
    }

    /// The most recent `limit` records, oldest first
    pub fn recent(&self, limit: usize) -> Vec<CallRecord> {
        let ordered = self.records[self.head..]
            .iter()
            .chain(self.records[..self.head].iter())
            .copied()
            .collect::<Vec<_>>();
        let start = ordered.len().saturating_sub(limit);
        ordered[start..].to_vec()
    }

    /// Rates over the current contents; undefined below `minimum_calls`
    pub fn snapshot(&self, minimum_calls: usize) -> MetricsSnapshot {
        MetricsSnapshot::from_counts(self.filled(), self.failures, self.slow_calls, minimum_calls)
    }
}

/// Point-in-time view of a window's health
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MetricsSnapshot {
    /// Number of calls the rates are computed over
    pub filled: usize,
    pub failures: usize,
    pub slow_calls: usize,
    /// Failure percentage in `[0, 100]`, `None` until enough calls were seen
    pub failure_rate: Option<f64>,
    /// Slow-call percentage in `[0, 100]`, `None` until enough calls were seen
    pub slow_call_rate: Option<f64>,
}

impl MetricsSnapshot {
    pub fn from_counts(
        filled: usize,
        failures: usize,
        slow_calls: usize,
        minimum_calls: usize,
    ) -> Self {
        let (failure_rate, slow_call_rate) = if filled == 0 || filled < minimum_calls {
            (None, None)
        } else {
            let total = filled as f64;
            (
                Some(100.0 * failures as f64 / total),
                Some(100.0 * slow_calls as f64 / total),
            )
        };

        Self {
            filled,
            failures,
            slow_calls,
            failure_rate,
            slow_call_rate,
        }
    }

    /// Whether either rate meets its threshold (both in percent)
    ///
    /// The two thresholds are independent: a slow failure counts toward both
    /// rates, and either one alone is enough.
    pub fn exceeds(&self, failure_rate_threshold: f64, slow_call_rate_threshold: f64) -> bool {
        let failing = self
            .failure_rate
            .is_some_and(|rate| rate >= failure_rate_threshold);
        let slow = self
            .slow_call_rate
            .is_some_and(|rate| rate >= slow_call_rate_threshold);
        failing || slow
    }
}
