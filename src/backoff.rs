use std::time::{Duration, SystemTime};

use rand::Rng;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{Response, StatusCode};

/// Computes how long to wait before the next attempt.
///
/// `attempt` is the 1-based number of the attempt that just failed.
/// Implementations must not exceed `max` and must not keep mutable state, so
/// one policy can serve many concurrent requests.
pub trait BackoffPolicy: Send + Sync {
    fn delay(
        &self,
        min: Duration,
        max: Duration,
        attempt: u32,
        response: Option<&Response>,
    ) -> Duration;
}

/// `min * 2^(attempt - 1)`, capped at `max`.
#[derive(Clone, Copy, Debug, Default)]
pub struct ExponentialBackoff;

impl BackoffPolicy for ExponentialBackoff {
    fn delay(
        &self,
        min: Duration,
        max: Duration,
        attempt: u32,
        _response: Option<&Response>,
    ) -> Duration {
        let min = min.min(max);
        let exponent = attempt.saturating_sub(1).min(63);
        let multiplier = 1u64 << exponent;
        let multiplier = u32::try_from(multiplier).unwrap_or(u32::MAX);
        min.checked_mul(multiplier).unwrap_or(max).min(max)
    }
}

/// Honors `Retry-After` on 429 and 503 responses, otherwise defers to
/// `fallback`. The server value is still capped at `max`.
#[derive(Clone, Copy, Debug, Default)]
pub struct RetryAfterBackoff<B = ExponentialBackoff> {
    fallback: B,
}

impl<B: BackoffPolicy> RetryAfterBackoff<B> {
    pub fn new(fallback: B) -> Self {
        Self { fallback }
    }
}

impl<B: BackoffPolicy> BackoffPolicy for RetryAfterBackoff<B> {
    fn delay(
        &self,
        min: Duration,
        max: Duration,
        attempt: u32,
        response: Option<&Response>,
    ) -> Duration {
        let server_delay = response
            .filter(|response| {
                matches!(
                    response.status(),
                    StatusCode::TOO_MANY_REQUESTS | StatusCode::SERVICE_UNAVAILABLE
                )
            })
            .and_then(|response| parse_retry_after(response.headers(), SystemTime::now()));

        match server_delay {
            Some(delay) => delay.min(max),
            None => self.fallback.delay(min, max, attempt, response),
        }
    }
}

/// Random wait in `[min, max]` scaled linearly by the attempt number.
///
/// Spreads retries of many clients apart. Degenerates to `max` when
/// `max <= min`.
#[derive(Clone, Copy, Debug, Default)]
pub struct LinearJitterBackoff;

impl BackoffPolicy for LinearJitterBackoff {
    fn delay(
        &self,
        min: Duration,
        max: Duration,
        attempt: u32,
        _response: Option<&Response>,
    ) -> Duration {
        let attempt = attempt.max(1);
        if max <= min {
            return max;
        }
        let jittered = rand::thread_rng().gen_range(min..=max);
        jittered.saturating_mul(attempt).min(max)
    }
}

/// Adapter returned by [`backoff_fn`].
#[derive(Clone, Copy, Debug)]
pub struct BackoffFn<F>(F);

/// Uses a closure as a [`BackoffPolicy`].
pub fn backoff_fn<F>(f: F) -> BackoffFn<F>
where
    F: Fn(Duration, Duration, u32, Option<&Response>) -> Duration + Send + Sync,
{
    BackoffFn(f)
}

impl<F> BackoffPolicy for BackoffFn<F>
where
    F: Fn(Duration, Duration, u32, Option<&Response>) -> Duration + Send + Sync,
{
    fn delay(
        &self,
        min: Duration,
        max: Duration,
        attempt: u32,
        response: Option<&Response>,
    ) -> Duration {
        (self.0)(min, max, attempt, response)
    }
}

/// Parses `Retry-After` as delta-seconds or an HTTP date relative to `now`.
///
/// Dates in the past yield a zero delay.
pub fn parse_retry_after(headers: &HeaderMap, now: SystemTime) -> Option<Duration> {
    let value = headers.get(RETRY_AFTER)?;
    let raw_value = value.to_str().ok()?.trim();
    if let Ok(seconds) = raw_value.parse::<u64>() {
        return Some(Duration::from_secs(seconds));
    }

    let date = httpdate::parse_http_date(raw_value).ok()?;
    match date.duration_since(now) {
        Ok(duration) => Some(duration),
        Err(_) => Some(Duration::ZERO),
    }
}
