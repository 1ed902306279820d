use std::error::Error as StdError;

use reqwest::{Response, StatusCode};

use crate::{Context, Error};

/// Outcome of a retry policy check.
#[derive(Clone, Debug)]
pub enum RetryDecision {
    /// Send the request again, subject to the attempt limit.
    Retry,
    /// Stop and report the current outcome.
    Stop,
    /// Stop immediately and report this error instead of the outcome.
    Abort(Error),
}

impl RetryDecision {
    /// Builds a decision from a `(should_retry, override_error)` pair.
    ///
    /// A present override always stops retrying.
    pub fn from_parts(should_retry: bool, override_error: Option<Error>) -> Self {
        match (should_retry, override_error) {
            (_, Some(err)) => Self::Abort(err),
            (true, None) => Self::Retry,
            (false, None) => Self::Stop,
        }
    }

    pub fn should_retry(&self) -> bool {
        matches!(self, Self::Retry)
    }
}

/// Decides after every attempt whether the request is sent again.
///
/// `response` and `error` are never both set; both are `None` only when a
/// transport produced no response and no error, which is treated like a
/// missing status. `attempt` is 1-based.
pub trait RetryPolicy: Send + Sync {
    fn check(
        &self,
        ctx: &Context,
        response: Option<&Response>,
        error: Option<&Error>,
        attempt: u32,
    ) -> RetryDecision;
}

/// Retries transient failures: retryable transport errors, 429, and 5xx
/// except 501.
#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultRetryPolicy;

impl RetryPolicy for DefaultRetryPolicy {
    fn check(
        &self,
        ctx: &Context,
        response: Option<&Response>,
        error: Option<&Error>,
        _attempt: u32,
    ) -> RetryDecision {
        if let Some(err) = ctx.error() {
            return RetryDecision::Abort(err);
        }

        if let Some(err) = error {
            if is_permanent_error(err) {
                return RetryDecision::Abort(err.clone());
            }
            return RetryDecision::Retry;
        }

        match response {
            Some(response) if is_retryable_status(response.status()) => RetryDecision::Retry,
            Some(_) => RetryDecision::Stop,
            None => RetryDecision::Retry,
        }
    }
}

/// Adapter returned by [`retry_fn`].
#[derive(Clone, Copy, Debug)]
pub struct RetryFn<F>(F);

/// Uses a closure as a [`RetryPolicy`].
///
/// ```
/// use retryable_http::{retry_fn, RetryDecision};
///
/// let only_404 = retry_fn(|_ctx, response, _error, _attempt| {
///     let retry = response.is_some_and(|r| r.status() == 404);
///     RetryDecision::from_parts(retry, None)
/// });
/// # let _ = only_404;
/// ```
pub fn retry_fn<F>(f: F) -> RetryFn<F>
where
    F: Fn(&Context, Option<&Response>, Option<&Error>, u32) -> RetryDecision + Send + Sync,
{
    RetryFn(f)
}

impl<F> RetryPolicy for RetryFn<F>
where
    F: Fn(&Context, Option<&Response>, Option<&Error>, u32) -> RetryDecision + Send + Sync,
{
    fn check(
        &self,
        ctx: &Context,
        response: Option<&Response>,
        error: Option<&Error>,
        attempt: u32,
    ) -> RetryDecision {
        (self.0)(ctx, response, error, attempt)
    }
}

/// 429 and every 5xx except 501 Not Implemented.
pub fn is_retryable_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS
        || (status.is_server_error() && status != StatusCode::NOT_IMPLEMENTED)
}

/// Whether retrying `err` can never succeed.
///
/// Construction and cancellation errors are permanent. Transport errors are
/// permanent when their source chain shows a malformed request, a redirect
/// failure, an unsupported scheme, or a certificate verification failure.
pub fn is_permanent_error(err: &Error) -> bool {
    match err {
        Error::Transport(inner) => is_permanent_transport_error(inner.as_ref()),
        Error::Custom(_) | Error::RetriesExhausted { .. } => false,
        Error::InvalidUrl { .. }
        | Error::BodyRead(_)
        | Error::BodyTooLarge { .. }
        | Error::BodyNotReplayable
        | Error::BodyOpen(_)
        | Error::Json(_)
        | Error::Canceled
        | Error::DeadlineExceeded
        | Error::Config(_) => true,
    }
}

/// Walks the source chain of a transport error looking for a permanent cause.
pub fn is_permanent_transport_error(err: &(dyn StdError + 'static)) -> bool {
    let mut current = Some(err);
    while let Some(err) = current {
        if let Some(reqwest_err) = err.downcast_ref::<reqwest::Error>() {
            if reqwest_err.is_builder() || reqwest_err.is_redirect() {
                return true;
            }
        }
        if err.downcast_ref::<http::uri::InvalidUri>().is_some()
            || err.downcast_ref::<http::header::InvalidHeaderValue>().is_some()
            || err.downcast_ref::<http::header::InvalidHeaderName>().is_some()
        {
            return true;
        }
        if let Some(inner) = err.downcast_ref::<Error>() {
            if is_permanent_error(inner) {
                return true;
            }
        }
        if is_permanent_message(&err.to_string()) {
            return true;
        }
        current = err.source();
    }
    false
}

fn is_permanent_message(message: &str) -> bool {
    let message = message.to_ascii_lowercase();
    (message.contains("stopped after") && message.contains("redirects"))
        || message.contains("too many redirects")
        || message.contains("unsupported protocol scheme")
        || message.contains("url scheme is not allowed")
        || message.contains("invalid header")
        || message.contains("certificate is not trusted")
        || message.contains("invalid peer certificate")
        || message.contains("certificate verify failed")
}
