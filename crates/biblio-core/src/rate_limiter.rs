//! C5 — Rate Limiter: one instance per external endpoint, shared across
//! every worker in the process (§4.5).
//!
//! Generalizes the teacher's per-domain [`DomainState`]/`RateLimiter` pair
//! (`download::rate_limiter`) from a fixed inter-request delay to a sliding
//! window of request (and optionally token) timestamps, because an external
//! API quota is a budget over a minute, not a flat per-request delay.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use rand::Rng;
use tokio::sync::{Mutex, Semaphore};
use tokio::time::Instant;
use tracing::{debug, instrument};

/// Minimum jitter applied after a saturated window ages out (§4.5).
const MIN_JITTER: Duration = Duration::from_millis(100);
const MAX_JITTER: Duration = Duration::from_millis(250);

#[derive(Debug, Clone, Copy)]
pub struct RateLimitConfig {
    pub requests_per_minute: u32,
    pub input_tokens_per_minute: Option<u32>,
    pub max_concurrent: usize,
}

impl RateLimitConfig {
    #[must_use]
    pub fn new(requests_per_minute: u32) -> Self {
        Self {
            requests_per_minute,
            input_tokens_per_minute: None,
            max_concurrent: usize::MAX,
        }
    }

    /// The concurrency cap a single window can sustain: half the per-minute
    /// budget, floored, and never above the caller's own configured maximum.
    fn effective_concurrency(&self) -> usize {
        let half_rpm = (self.requests_per_minute as f64 * 0.5).floor() as usize;
        self.max_concurrent.min(half_rpm.max(1))
    }
}

struct EndpointState {
    request_times: Mutex<VecDeque<Instant>>,
    token_times: Mutex<VecDeque<(Instant, u32)>>,
    semaphore: Arc<Semaphore>,
}

/// A held slot. Dropping it releases the concurrency permit; it does not by
/// itself record token usage — call [`RateLimiter::record`] once the actual
/// cost is known. Owns its permit (rather than borrowing `&RateLimiter`) so
/// it can outlive the `acquire` call that produced it.
pub struct Permit {
    _inner: tokio::sync::OwnedSemaphorePermit,
}

/// Per-endpoint request/token budget enforcement.
#[derive(Debug)]
pub struct RateLimiter {
    configs: DashMap<String, RateLimitConfig>,
    endpoints: DashMap<String, Arc<EndpointState>>,
}

impl std::fmt::Debug for EndpointState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EndpointState").finish_non_exhaustive()
    }
}

impl RateLimiter {
    #[must_use]
    pub fn new() -> Self {
        Self {
            configs: DashMap::new(),
            endpoints: DashMap::new(),
        }
    }

    pub fn configure(&self, endpoint: &str, config: RateLimitConfig) {
        self.configs.insert(endpoint.to_string(), config);
    }

    fn config_for(&self, endpoint: &str) -> RateLimitConfig {
        self.configs
            .get(endpoint)
            .map(|c| *c)
            .unwrap_or_else(|| RateLimitConfig::new(60))
    }

    fn state_for(&self, endpoint: &str) -> Arc<EndpointState> {
        let config = self.config_for(endpoint);
        self.endpoints
            .entry(endpoint.to_string())
            .or_insert_with(|| {
                Arc::new(EndpointState {
                    request_times: Mutex::new(VecDeque::new()),
                    token_times: Mutex::new(VecDeque::new()),
                    semaphore: Arc::new(Semaphore::new(config.effective_concurrency())),
                })
            })
            .clone()
    }

    /// Blocks until a request slot is available for `endpoint`, honoring
    /// `cancel`. Returns `None` if cancelled while waiting, surrendering any
    /// reservation made so far.
    #[instrument(skip(self, cancel), fields(endpoint))]
    pub async fn acquire(
        &self,
        endpoint: &str,
        estimated_tokens: u32,
        cancel: &tokio_util::sync::CancellationToken,
    ) -> Option<Permit> {
        let config = self.config_for(endpoint);
        let state = self.state_for(endpoint);

        let permit = tokio::select! {
            biased;
            () = cancel.cancelled() => return None,
            permit = Arc::clone(&state.semaphore).acquire_owned() => permit.ok()?,
        };

        loop {
            if cancel.is_cancelled() {
                return None;
            }

            let wait = {
                let mut requests = state.request_times.lock().await;
                trim_window(&mut requests, Duration::from_secs(60));

                let mut token_wait = None;
                if let Some(token_cap) = config.input_tokens_per_minute {
                    let mut tokens = state.token_times.lock().await;
                    trim_token_window(&mut tokens, Duration::from_secs(60));
                    let used: u32 = tokens.iter().map(|(_, n)| *n).sum();
                    if used + estimated_tokens > token_cap {
                        token_wait = tokens.front().map(|(t, _)| {
                            Duration::from_secs(60).saturating_sub(t.elapsed())
                        });
                    }
                }

                let request_wait = if requests.len() as u32 >= config.requests_per_minute {
                    requests.front().map(|t| Duration::from_secs(60).saturating_sub(t.elapsed()))
                } else {
                    None
                };

                match (request_wait, token_wait) {
                    (None, None) => {
                        requests.push_back(Instant::now());
                        None
                    }
                    (a, b) => Some(a.into_iter().chain(b).max().unwrap_or(Duration::ZERO)),
                }
            };

            match wait {
                None => break,
                Some(delay) => {
                    let jitter = Duration::from_millis(
                        rand::thread_rng().gen_range(MIN_JITTER.as_millis() as u64..=MAX_JITTER.as_millis() as u64),
                    );
                    let total = delay + jitter;
                    debug!(endpoint, delay_ms = total.as_millis(), "rate limit window saturated");
                    tokio::select! {
                        biased;
                        () = cancel.cancelled() => return None,
                        () = tokio::time::sleep(total) => {}
                    }
                }
            }
        }

        Some(Permit { _inner: permit })
    }

    /// Records the actual token cost of a completed request. A no-op for
    /// endpoints with no configured token budget.
    pub async fn record(&self, endpoint: &str, actual_tokens: u32) {
        if actual_tokens == 0 {
            return;
        }
        let state = self.state_for(endpoint);
        let mut tokens = state.token_times.lock().await;
        tokens.push_back((Instant::now(), actual_tokens));
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

fn trim_window(window: &mut VecDeque<Instant>, horizon: Duration) {
    while let Some(front) = window.front() {
        if front.elapsed() > horizon {
            window.pop_front();
        } else {
            break;
        }
    }
}

fn trim_token_window(window: &mut VecDeque<(Instant, u32)>, horizon: Duration) {
    while let Some((front, _)) = window.front() {
        if front.elapsed() > horizon {
            window.pop_front();
        } else {
            break;
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn acquire_is_immediate_below_budget() {
        tokio::time::pause();
        let limiter = RateLimiter::new();
        limiter.configure("openalex", RateLimitConfig::new(600));
        let cancel = tokio_util::sync::CancellationToken::new();

        let start = Instant::now();
        limiter.acquire("openalex", 0, &cancel).await.unwrap();
        assert!(start.elapsed() < Duration::from_millis(10));
    }

    #[tokio::test]
    async fn acquire_respects_cancellation() {
        let limiter = RateLimiter::new();
        limiter.configure("crossref", RateLimitConfig::new(1));
        let cancel = tokio_util::sync::CancellationToken::new();

        limiter.acquire("crossref", 0, &cancel).await.unwrap();
        cancel.cancel();
        let second = limiter.acquire("crossref", 0, &cancel).await;
        assert!(second.is_none());
    }

    #[tokio::test]
    async fn saturated_window_delays_next_acquire() {
        tokio::time::pause();
        let limiter = RateLimiter::new();
        limiter.configure("openalex", RateLimitConfig::new(2));
        let cancel = tokio_util::sync::CancellationToken::new();

        limiter.acquire("openalex", 0, &cancel).await.unwrap();
        limiter.acquire("openalex", 0, &cancel).await.unwrap();

        let start = Instant::now();
        limiter.acquire("openalex", 0, &cancel).await.unwrap();
        assert!(start.elapsed() >= Duration::from_secs(59));
    }
}
