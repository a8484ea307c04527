//! Circuit Breaker Pattern
//!
//! Tracks consecutive tool-execution failures for one gate and temporarily
//! rejects calls once a threshold is exceeded.
//!
//! Once the recovery timeout elapses, exactly one caller receives a trial
//! permit. Everyone else keeps getting rejected until that trial settles.
//! All transitions happen under a single mutex, so the Open -> HalfOpen move
//! and the permit hand-out are one atomic step.

use serde::{Deserialize, Serialize};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// Circuit breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Normal operation - requests pass through
    Closed,
    /// Circuit open - requests are rejected
    Open,
    /// Testing if the dependency recovered
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Circuit breaker configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitBreakerConfig {
    /// Number of consecutive failures before opening circuit
    pub failure_threshold: u32,
    /// Time to wait before allowing a trial call
    pub recovery_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            recovery_timeout: Duration::from_secs(30),
        }
    }
}

impl CircuitBreakerConfig {
    /// Create a sensitive config (opens quickly). Used for third-party agents.
    pub fn sensitive() -> Self {
        Self {
            failure_threshold: 2,
            recovery_timeout: Duration::from_secs(30),
        }
    }

    /// Create a tolerant config (takes more failures to open)
    pub fn tolerant() -> Self {
        Self {
            failure_threshold: 10,
            recovery_timeout: Duration::from_secs(60),
        }
    }

    /// Builder: set failure threshold (clamped to at least 1)
    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold.max(1);
        self
    }

    /// Builder: set recovery timeout
    pub fn with_recovery_timeout(mut self, timeout: Duration) -> Self {
        self.recovery_timeout = timeout;
        self
    }
}

/// How a caller was let through
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Breaker closed, ordinary call
    Normal,
    /// The single trial call allowed while half-open
    Trial,
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    trial_permit: bool,
}

impl BreakerInner {
    fn open(&mut self, now: Instant) {
        self.state = CircuitState::Open;
        self.opened_at = Some(now);
        self.trial_permit = false;
    }

    fn close(&mut self) {
        self.state = CircuitState::Closed;
        self.consecutive_failures = 0;
        self.opened_at = None;
        self.trial_permit = false;
    }
}

/// Circuit breaker owned by a single gate
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    /// Create a new circuit breaker
    pub fn new(config: CircuitBreakerConfig) -> Self {
        let config = CircuitBreakerConfig {
            failure_threshold: config.failure_threshold.max(1),
            ..config
        };
        Self {
            config,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                opened_at: None,
                trial_permit: false,
            }),
        }
    }

    /// Create with default config
    pub fn default_config() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }

    fn lock(&self) -> MutexGuard<'_, BreakerInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Get current state
    ///
    /// Reading the state never transitions the breaker; only admission does.
    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    /// Get consecutive failure count
    pub fn consecutive_failures(&self) -> u32 {
        self.lock().consecutive_failures
    }

    /// When the breaker last opened, if it is open
    pub fn opened_at(&self) -> Option<Instant> {
        self.lock().opened_at
    }

    /// Whether the half-open trial permit is currently handed out
    pub fn trial_in_flight(&self) -> bool {
        let inner = self.lock();
        inner.state == CircuitState::HalfOpen && inner.trial_permit
    }

    /// Check if a call may proceed
    ///
    /// A `true` while the breaker is open or half-open means the caller now
    /// holds the trial permit and must report back through
    /// [`record_success`](Self::record_success) or
    /// [`record_failure`](Self::record_failure).
    pub fn admit(&self) -> bool {
        self.admit_at(Instant::now()).is_some()
    }

    /// Acquire a permit that records its outcome and releases an unused trial on drop
    pub fn try_acquire(&self) -> Option<BreakerPermit<'_>> {
        self.try_acquire_at(Instant::now())
    }

    pub(crate) fn try_acquire_at(&self, now: Instant) -> Option<BreakerPermit<'_>> {
        self.admit_at(now).map(|admission| BreakerPermit {
            breaker: self,
            admission,
            settled: false,
        })
    }

    pub(crate) fn admit_at(&self, now: Instant) -> Option<Admission> {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::Closed => Some(Admission::Normal),
            CircuitState::Open => {
                let elapsed = inner.opened_at.is_none_or(|opened_at| {
                    now.saturating_duration_since(opened_at) >= self.config.recovery_timeout
                });
                if !elapsed {
                    return None;
                }
                inner.state = CircuitState::HalfOpen;
                inner.opened_at = None;
                inner.trial_permit = true;
                tracing::info!("Circuit breaker half-open, issuing trial permit");
                Some(Admission::Trial)
            }
            CircuitState::HalfOpen => {
                if inner.trial_permit {
                    None
                } else {
                    inner.trial_permit = true;
                    Some(Admission::Trial)
                }
            }
        }
    }

    /// Record a successful call
    pub fn record_success(&self) {
        self.settle(None, true, Instant::now());
    }

    /// Record a failed call
    pub fn record_failure(&self) {
        self.settle(None, false, Instant::now());
    }

    /// Apply an outcome. `admission` is `None` for outcomes reported by hand,
    /// which are interpreted against the current state.
    fn settle(&self, admission: Option<Admission>, success: bool, now: Instant) -> CircuitState {
        let mut inner = self.lock();
        match (inner.state, admission) {
            (CircuitState::Closed, _) => {
                if success {
                    inner.consecutive_failures = 0;
                } else {
                    inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);
                    if inner.consecutive_failures >= self.config.failure_threshold {
                        inner.open(now);
                        tracing::warn!(
                            failures = inner.consecutive_failures,
                            "Circuit breaker opened"
                        );
                    }
                }
            }
            (CircuitState::HalfOpen, None | Some(Admission::Trial)) => {
                if success {
                    inner.close();
                    tracing::info!("Circuit breaker closed after successful trial");
                } else {
                    inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);
                    inner.open(now);
                    tracing::warn!("Circuit breaker re-opened after failed trial");
                }
            }
            // Results of calls admitted before the breaker tripped are stale.
            (CircuitState::HalfOpen, Some(Admission::Normal)) | (CircuitState::Open, _) => {}
        }
        inner.state
    }

    fn release_trial(&self) {
        let mut inner = self.lock();
        if inner.state == CircuitState::HalfOpen {
            inner.trial_permit = false;
        }
    }

    /// Manually reset the circuit breaker
    pub fn reset(&self) {
        self.lock().close();
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::default_config()
    }
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.lock();
        f.debug_struct("CircuitBreaker")
            .field("state", &inner.state)
            .field("consecutive_failures", &inner.consecutive_failures)
            .field("trial_permit", &inner.trial_permit)
            .field("config", &self.config)
            .finish()
    }
}

/// Proof of admission handed out by [`CircuitBreaker::try_acquire`]
///
/// Dropping a trial permit without recording an outcome gives the permit
/// back, so a trial that was denied later in the pipeline (or cancelled)
/// does not leave the breaker half-open forever.
#[must_use = "dropping a permit without recording an outcome discards it"]
pub struct BreakerPermit<'a> {
    breaker: &'a CircuitBreaker,
    admission: Admission,
    settled: bool,
}

impl BreakerPermit<'_> {
    pub fn admission(&self) -> Admission {
        self.admission
    }

    pub fn is_trial(&self) -> bool {
        self.admission == Admission::Trial
    }

    /// Record success; returns the breaker state afterwards
    pub fn succeed(mut self) -> CircuitState {
        self.settled = true;
        self.breaker
            .settle(Some(self.admission), true, Instant::now())
    }

    /// Record failure; returns the breaker state afterwards
    pub fn fail(mut self) -> CircuitState {
        self.settled = true;
        self.breaker
            .settle(Some(self.admission), false, Instant::now())
    }
}

impl Drop for BreakerPermit<'_> {
    fn drop(&mut self) {
        if !self.settled && self.admission == Admission::Trial {
            self.breaker.release_trial();
        }
    }
}

impl std::fmt::Debug for BreakerPermit<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BreakerPermit")
            .field("admission", &self.admission)
            .field("settled", &self.settled)
            .finish()
    }
}
