use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};

/// How long a probe result is reused without re-checking.
pub const CACHE_TTL: Duration = Duration::from_secs(5);

/// Probe that answers whether a dependency is reachable.
pub type AvailabilityCheck = Arc<dyn Fn() -> BoxFuture<'static, Result<bool>> + Send + Sync>;

/// Wraps an async closure as an [`AvailabilityCheck`].
pub fn availability_check<F, Fut>(check: F) -> AvailabilityCheck
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<bool>> + Send + 'static,
{
    Arc::new(move || Box::pin(check()))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half_open"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub reset_timeout: Duration,
    pub half_open_timeout: Duration,
    pub success_threshold: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            reset_timeout: Duration::from_secs(60),
            half_open_timeout: Duration::from_secs(5),
            success_threshold: 1,
        }
    }
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    // Also marks when HALF_OPEN was entered.
    last_failure_at: Option<Instant>,
    last_success_at: Option<Instant>,
    cached: Option<(bool, Instant)>,
}

/// Availability gate for one named dependency.
///
/// Probing is serialized: concurrent callers of [`CircuitBreaker::is_available`]
/// queue on an async lock so a state transition is never counted twice.
pub struct CircuitBreaker {
    name: String,
    check: AvailabilityCheck,
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerInner>,
    probe_lock: tokio::sync::Mutex<()>,
}

impl fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("config", &self.config)
            .field("inner", &*self.inner.lock())
            .finish()
    }
}

impl CircuitBreaker {
    pub fn new(
        name: impl Into<String>,
        check: AvailabilityCheck,
        config: CircuitBreakerConfig,
    ) -> Self {
        let name = name.into();
        info!(
            "Creating circuit breaker '{}' with threshold {} and reset timeout {:?}",
            name, config.failure_threshold, config.reset_timeout
        );

        Self {
            name,
            check,
            config,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                failure_count: 0,
                success_count: 0,
                last_failure_at: None,
                last_success_at: None,
                cached: None,
            }),
            probe_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Answers whether the dependency is usable, probing it only when the
    /// cached answer is stale and the circuit allows it.
    pub async fn is_available(&self) -> bool {
        let _probe = self.probe_lock.lock().await;
        let now = Instant::now();

        {
            let mut inner = self.inner.lock();

            if let Some((result, at)) = inner.cached {
                if now.duration_since(at) < CACHE_TTL {
                    return result;
                }
            }

            if !self.admits(&mut inner, now) {
                return false;
            }
        }

        match (self.check)().await {
            Ok(result) => {
                self.inner.lock().cached = Some((result, now));
                if result {
                    self.record_success();
                } else {
                    self.record_failure();
                }
                result
            }
            Err(e) => {
                warn!("Error checking '{}' availability: {}", self.name, e);
                self.record_failure();
                false
            }
        }
    }

    /// Applies the open/half-open timing rules; `false` means the call is blocked.
    fn admits(&self, inner: &mut BreakerInner, now: Instant) -> bool {
        if inner.state == CircuitState::Open {
            match inner.last_failure_at {
                Some(at) if now.duration_since(at) < self.config.reset_timeout => {
                    debug!("Circuit '{}' is open, blocking request", self.name);
                    return false;
                }
                _ => {
                    info!("Circuit '{}' reset timeout passed, moving to half-open", self.name);
                    inner.state = CircuitState::HalfOpen;
                    inner.last_failure_at = Some(now);
                }
            }
        }

        if inner.state == CircuitState::HalfOpen {
            if let Some(at) = inner.last_failure_at {
                if now.duration_since(at) < self.config.half_open_timeout {
                    debug!("Circuit '{}' is half-open, blocking request", self.name);
                    return false;
                }
            }
        }

        true
    }

    /// Runs `operation` through the breaker without probing, recording its
    /// outcome.
    pub async fn call<F, Fut, T>(&self, operation: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let admitted = {
            let mut inner = self.inner.lock();
            self.admits(&mut inner, Instant::now())
        };
        if !admitted {
            return Err(Error::CircuitOpen(self.name.clone()));
        }

        match operation().await {
            Ok(value) => {
                self.record_success();
                Ok(value)
            }
            Err(e) => {
                self.record_failure();
                Err(e)
            }
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        inner.last_success_at = Some(Instant::now());
        inner.success_count += 1;
        inner.failure_count = 0;

        if inner.state == CircuitState::HalfOpen
            && inner.success_count >= self.config.success_threshold
        {
            info!("Circuit '{}' recovered, transitioning to closed", self.name);
            inner.state = CircuitState::Closed;
            inner.success_count = 0;
        }
    }

    pub fn record_failure(&self) {
        let mut inner = self.inner.lock();
        inner.failure_count += 1;
        inner.last_failure_at = Some(Instant::now());
        inner.success_count = 0;

        match inner.state {
            CircuitState::Closed if inner.failure_count >= self.config.failure_threshold => {
                warn!(
                    "Circuit '{}' opened after {} consecutive failures",
                    self.name, inner.failure_count
                );
                inner.state = CircuitState::Open;
            }
            CircuitState::HalfOpen => {
                warn!("Circuit '{}' re-opened during half-open probe", self.name);
                inner.state = CircuitState::Open;
            }
            _ => {
                debug!(
                    "Circuit '{}' failure count: {}/{}",
                    self.name, inner.failure_count, self.config.failure_threshold
                );
            }
        }
    }

    /// Forces the circuit closed and forgets counters and the cached probe.
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.state = CircuitState::Closed;
        inner.failure_count = 0;
        inner.success_count = 0;
        inner.cached = None;
        info!("Circuit '{}' has been manually reset", self.name);
    }

    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    pub fn failure_count(&self) -> u32 {
        self.inner.lock().failure_count
    }

    pub fn success_count(&self) -> u32 {
        self.inner.lock().success_count
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

    pub fn stats(&self) -> CircuitBreakerStats {
        let inner = self.inner.lock();
        let now = Instant::now();

        CircuitBreakerStats {
            name: self.name.clone(),
            state: inner.state,
            failure_count: inner.failure_count,
            success_count: inner.success_count,
            failure_threshold: self.config.failure_threshold,
            since_last_failure: inner.last_failure_at.map(|at| now.duration_since(at)),
            since_last_success: inner.last_success_at.map(|at| now.duration_since(at)),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CircuitBreakerStats {
    pub name: String,
    pub state: CircuitState,
    pub failure_count: u32,
    pub success_count: u32,
    pub failure_threshold: u32,
    pub since_last_failure: Option<Duration>,
    pub since_last_success: Option<Duration>,
}

/// One breaker per dependency name, created on first use and kept for the
/// lifetime of the registry.
#[derive(Debug, Default)]
pub struct BreakerRegistry {
    config: CircuitBreakerConfig,
    breakers: RwLock<HashMap<String, Arc<CircuitBreaker>>>,
}

impl BreakerRegistry {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            breakers: RwLock::new(HashMap::new()),
        }
    }

    /// Returns the breaker for `name`, building it with `make_check` only if it
    /// does not exist yet.
    pub fn get_or_create<F>(&self, name: &str, make_check: F) -> Arc<CircuitBreaker>
    where
        F: FnOnce() -> AvailabilityCheck,
    {
        if let Some(breaker) = self.breakers.read().get(name) {
            return Arc::clone(breaker);
        }

        let mut breakers = self.breakers.write();
        Arc::clone(breakers.entry(name.to_string()).or_insert_with(|| {
            Arc::new(CircuitBreaker::new(name, make_check(), self.config.clone()))
        }))
    }

    pub fn len(&self) -> usize {
        self.breakers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.breakers.read().is_empty()
    }

    pub fn reset_all(&self) {
        for breaker in self.breakers.read().values() {
            breaker.reset();
        }
    }

    pub fn stats(&self) -> Vec<CircuitBreakerStats> {
        let mut stats: Vec<_> = self.breakers.read().values().map(|b| b.stats()).collect();
        stats.sort_by(|a, b| a.name.cmp(&b.name));
        stats
    }
}
