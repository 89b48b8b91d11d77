//! # Adaptive Rate Limiter
//!
//! Per-operation-class throttling driven by observed request and error
//! history. Enforces a hard hourly cap and a per-minute cap with burst
//! allowance, and adapts the inter-request delay with a simple
//! additive/multiplicative controller rather than a fixed-refill token
//! bucket: the delay grows ×1.5 (capped at 3× base) while the windowed
//! success rate is unhealthy and decays ×0.9 (floored at base) while it
//! is healthy.
//!
//! Error bursts take priority over the caps: three or more errors inside a
//! trailing five-minute window force an exponential backoff sleep of
//! `min(2^error_count, 60)` seconds before any further grant.

use dashmap::DashMap;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::config::RateLimitConfig;

const HOUR_WINDOW: Duration = Duration::from_secs(3600);
const MINUTE_WINDOW: Duration = Duration::from_secs(60);
const ERROR_WINDOW: Duration = Duration::from_secs(300);
const HEALTHY_SUCCESS_RATE: f64 = 0.95;
const MAX_BACKOFF_SECS: u64 = 60;

/// What the limiter decided for one acquisition attempt
enum Gate {
    /// Under all caps; grant immediately
    Ready,
    /// A hard cap or error backoff is in effect; sleep and re-evaluate
    Wait(Duration),
    /// Approaching the per-minute cap; sleep the adaptive delay, then grant
    Throttle(Duration),
}

/// Sliding-window state for one operation class
struct OperationState {
    config: RateLimitConfig,
    /// Request timestamps, trailing one hour
    requests: VecDeque<Instant>,
    /// Error timestamps, trailing one hour (backoff looks at the last 5 min)
    errors: VecDeque<Instant>,
    /// Adaptive inter-request delay, bounded to [base_delay, 3 * base_delay]
    current_delay: Duration,
    base_delay: Duration,
}

impl OperationState {
    fn new(config: RateLimitConfig) -> Self {
        let base_delay =
            Duration::from_secs_f64(60.0 / config.requests_per_minute.max(1) as f64);
        Self {
            config,
            requests: VecDeque::new(),
            errors: VecDeque::new(),
            current_delay: base_delay,
            base_delay,
        }
    }

    fn prune(&mut self, now: Instant) {
        while let Some(front) = self.requests.front() {
            if now.duration_since(*front) > HOUR_WINDOW {
                self.requests.pop_front();
            } else {
                break;
            }
        }
        while let Some(front) = self.errors.front() {
            if now.duration_since(*front) > HOUR_WINDOW {
                self.errors.pop_front();
            } else {
                break;
            }
        }
    }

    fn minute_count(&self, now: Instant) -> usize {
        self.requests
            .iter()
            .rev()
            .take_while(|t| now.duration_since(**t) <= MINUTE_WINDOW)
            .count()
    }

    fn recent_errors(&self, now: Instant) -> usize {
        self.errors
            .iter()
            .rev()
            .take_while(|t| now.duration_since(**t) <= ERROR_WINDOW)
            .count()
    }

    /// Windowed success rate over the trailing hour
    fn success_rate(&self) -> f64 {
        if self.requests.is_empty() {
            return 1.0;
        }
        let errors = self.errors.len().min(self.requests.len());
        1.0 - (errors as f64 / self.requests.len() as f64)
    }

    /// Multiplicative increase / multiplicative decay of the adaptive delay
    fn adapt_delay(&mut self) {
        if self.success_rate() < HEALTHY_SUCCESS_RATE {
            self.current_delay = self.current_delay.mul_f64(1.5).min(self.base_delay * 3);
        } else {
            self.current_delay = self.current_delay.mul_f64(0.9).max(self.base_delay);
        }
    }

    fn evaluate(&mut self, now: Instant) -> Gate {
        self.prune(now);

        // Error backoff overrides the caps entirely
        let recent_errors = self.recent_errors(now);
        if recent_errors >= 3 {
            let backoff_secs = 2u64
                .saturating_pow(recent_errors.min(32) as u32)
                .min(MAX_BACKOFF_SECS);
            let backoff = Duration::from_secs(backoff_secs);
            if let Some(last_error) = self.errors.back() {
                let release = *last_error + backoff;
                if release > now {
                    return Gate::Wait(release - now);
                }
            }
        }

        // Hard hourly cap
        if self.requests.len() >= self.config.requests_per_hour as usize {
            if let Some(oldest) = self.requests.front() {
                let release = *oldest + HOUR_WINDOW;
                return Gate::Wait(release.saturating_duration_since(now).max(
                    Duration::from_millis(10),
                ));
            }
        }

        // Per-minute cap with burst allowance
        let minute_count = self.minute_count(now);
        let per_minute = self.config.requests_per_minute as usize;
        let burst_limit = per_minute + self.config.burst_allowance as usize;

        if minute_count >= burst_limit {
            // Burst exhausted: wait for the oldest in-minute request to age out
            let in_minute_oldest = self
                .requests
                .iter()
                .rev()
                .take(minute_count)
                .last()
                .copied();
            if let Some(oldest) = in_minute_oldest {
                let release = oldest + MINUTE_WINDOW;
                return Gate::Wait(release.saturating_duration_since(now).max(
                    Duration::from_millis(10),
                ));
            }
        }

        self.adapt_delay();
        if minute_count >= per_minute {
            Gate::Throttle(self.current_delay)
        } else {
            Gate::Ready
        }
    }

    fn grant(&mut self, now: Instant) {
        self.requests.push_back(now);
    }
}

/// Adaptive, per-operation-class rate limiter. One instance is owned per
/// batch context; there are no process-wide singletons.
pub struct AdaptiveRateLimiter {
    states: DashMap<String, Arc<Mutex<OperationState>>>,
    limits: DashMap<String, RateLimitConfig>,
    default_limit: RateLimitConfig,
}

impl AdaptiveRateLimiter {
    pub fn new(
        limits: impl IntoIterator<Item = (String, RateLimitConfig)>,
        default_limit: RateLimitConfig,
    ) -> Self {
        let limit_map = DashMap::new();
        for (op, config) in limits {
            limit_map.insert(op, config);
        }
        Self {
            states: DashMap::new(),
            limits: limit_map,
            default_limit,
        }
    }

    fn state_for(&self, operation: &str) -> Arc<Mutex<OperationState>> {
        self.states
            .entry(operation.to_string())
            .or_insert_with(|| {
                let config = self
                    .limits
                    .get(operation)
                    .map(|c| c.clone())
                    .unwrap_or_else(|| self.default_limit.clone());
                Arc::new(Mutex::new(OperationState::new(config)))
            })
            .clone()
    }

    /// Suspend until a request for this operation class is permitted.
    /// The lock is never held across a sleep.
    pub async fn acquire(&self, operation: &str) {
        let state = self.state_for(operation);
        loop {
            let gate = {
                let mut s = state.lock().await;
                let now = Instant::now();
                match s.evaluate(now) {
                    Gate::Ready => {
                        s.grant(now);
                        return;
                    }
                    other => other,
                }
            };

            match gate {
                Gate::Wait(delay) => {
                    warn!(
                        operation = %operation,
                        delay_ms = delay.as_millis() as u64,
                        "⏳ RATE_LIMIT: Waiting before re-evaluating"
                    );
                    tokio::time::sleep(delay).await;
                }
                Gate::Throttle(delay) => {
                    debug!(
                        operation = %operation,
                        delay_ms = delay.as_millis() as u64,
                        "RATE_LIMIT: Throttling near per-minute cap"
                    );
                    tokio::time::sleep(delay).await;
                    let mut s = state.lock().await;
                    s.grant(Instant::now());
                    return;
                }
                Gate::Ready => unreachable!("Ready is handled under the lock"),
            }
        }
    }

    /// Record an error outcome for an operation class. Feeds both the
    /// adaptive delay controller and the exponential error backoff.
    pub async fn record_error(&self, operation: &str) {
        let state = self.state_for(operation);
        let mut s = state.lock().await;
        let now = Instant::now();
        s.errors.push_back(now);
        s.prune(now);
        debug!(
            operation = %operation,
            recent_errors = s.recent_errors(now),
            "RATE_LIMIT: Error recorded"
        );
    }

    /// Current adaptive delay for an operation class (diagnostics)
    pub async fn current_delay(&self, operation: &str) -> Duration {
        let state = self.state_for(operation);
        let s = state.lock().await;
        s.current_delay
    }
}
