use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use reqwest::Response;
use tokio::time::{sleep, Instant};

use crate::{
    BackoffPolicy, ClientOptions, Context, DefaultRetryPolicy, Error, ErrorMode,
    ExponentialBackoff, ReplayableBody, Request, Result, RetryDecision, RetryPolicy,
    RetryTransport, Transport,
};

type RequestHook = Arc<dyn Fn(&reqwest::Request, u32) + Send + Sync>;
type ResponseHook = Arc<dyn Fn(&Response) + Send + Sync>;

/// HTTP client that retries requests over an underlying [`Transport`].
///
/// Cloning is cheap; clones share the transport and policies.
#[derive(Clone)]
pub struct Client {
    transport: Arc<dyn Transport>,
    options: ClientOptions,
    retry_policy: Arc<dyn RetryPolicy>,
    backoff: Arc<dyn BackoffPolicy>,
    request_hook: Option<RequestHook>,
    response_hook: Option<ResponseHook>,
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("options", &self.options)
            .field("request_hook", &self.request_hook.is_some())
            .field("response_hook", &self.response_hook.is_some())
            .finish_non_exhaustive()
    }
}

impl Default for Client {
    fn default() -> Self {
        Self::new()
    }
}

impl Client {
    /// Creates a client over a fresh `reqwest::Client` with default policies.
    pub fn new() -> Self {
        Self::with_transport(reqwest::Client::new())
    }

    /// Creates a client over any single-shot transport.
    pub fn with_transport(transport: impl Transport + 'static) -> Self {
        Self {
            transport: Arc::new(transport),
            options: ClientOptions::default(),
            retry_policy: Arc::new(DefaultRetryPolicy),
            backoff: Arc::new(ExponentialBackoff),
            request_hook: None,
            response_hook: None,
        }
    }

    /// Applies client options such as attempt limit and backoff bounds.
    pub fn with_options(mut self, opts: ClientOptions) -> Self {
        self.options = opts;
        self
    }

    pub fn with_retry_policy(mut self, policy: impl RetryPolicy + 'static) -> Self {
        self.retry_policy = Arc::new(policy);
        self
    }

    pub fn with_backoff(mut self, backoff: impl BackoffPolicy + 'static) -> Self {
        self.backoff = Arc::new(backoff);
        self
    }

    /// Registers a hook called with every outbound request and its attempt
    /// number, right before it is sent.
    pub fn with_request_hook<F>(mut self, hook: F) -> Self
    where
        F: Fn(&reqwest::Request, u32) + Send + Sync + 'static,
    {
        self.request_hook = Some(Arc::new(hook));
        self
    }

    /// Registers a hook called with every response received, before the
    /// retry policy sees it.
    pub fn with_response_hook<F>(mut self, hook: F) -> Self
    where
        F: Fn(&Response) + Send + Sync + 'static,
    {
        self.response_hook = Some(Arc::new(hook));
        self
    }

    pub fn options(&self) -> &ClientOptions {
        &self.options
    }

    /// Wraps this client in a [`RetryTransport`] so it can be used wherever a
    /// plain [`Transport`] is expected.
    pub fn into_transport(self) -> RetryTransport {
        RetryTransport::with_client(self)
    }

    /// Sends `request` without a cancellation scope.
    pub async fn send(&self, request: Request) -> Result<Response> {
        self.execute(&Context::new(), request).await
    }

    pub async fn get(&self, url: impl AsRef<str>) -> Result<Response> {
        self.send(Request::get(url)?).await
    }

    pub async fn head(&self, url: impl AsRef<str>) -> Result<Response> {
        self.send(Request::head(url)?).await
    }

    pub async fn post(
        &self,
        url: impl AsRef<str>,
        body: impl Into<ReplayableBody>,
    ) -> Result<Response> {
        self.send(Request::post(url)?.body(body)).await
    }

    /// Sends `request`, retrying per the configured policies until it
    /// succeeds, the policy gives up, attempts run out, or `ctx` is done.
    ///
    /// Returns exactly one response or one error. Every response that is not
    /// returned is drained and dropped before the next attempt.
    pub async fn execute(&self, ctx: &Context, request: Request) -> Result<Response> {
        let max_attempts = self.options.effective_max_attempts();
        let started = Instant::now();
        let mut attempt = 0u32;

        loop {
            attempt += 1;

            let outbound = request.to_outbound()?;
            if let Some(hook) = &self.request_hook {
                hook(&outbound, attempt);
            }

            let outcome = tokio::select! {
                biased;
                err = ctx.done() => return Err(err),
                result = self.transport.send(outbound) => result,
            };

            let (response, error) = match outcome {
                Ok(response) => {
                    if let Some(hook) = &self.response_hook {
                        hook(&response);
                    }
                    (Some(response), None)
                }
                Err(err) => (None, Some(Error::Transport(err))),
            };

            let decision =
                self.retry_policy
                    .check(ctx, response.as_ref(), error.as_ref(), attempt);

            match decision {
                RetryDecision::Abort(err) => {
                    if let Some(response) = response {
                        self.discard(response).await;
                    }
                    return Err(err);
                }
                RetryDecision::Stop => {
                    return self.finish(&request, attempt, response, error);
                }
                RetryDecision::Retry if attempt >= max_attempts => {
                    return self.exhausted(&request, attempt, response, error).await;
                }
                RetryDecision::Retry => {
                    let delay = self.backoff.delay(
                        self.options.retry_wait_min(),
                        self.options.retry_wait_max(),
                        attempt,
                        response.as_ref(),
                    );
                    self.log_retry(&request, attempt, delay, response.as_ref(), error.as_ref(), started);

                    if let Some(response) = response {
                        self.discard(response).await;
                    }
                    self.wait_before_retry(ctx, delay).await?;
                }
            }
        }
    }

    /// The policy stopped retrying: hand over the response, or report the
    /// error per the error mode.
    fn finish(
        &self,
        request: &Request,
        attempts: u32,
        response: Option<Response>,
        error: Option<Error>,
    ) -> Result<Response> {
        match (response, error) {
            (Some(response), _) => Ok(response),
            (None, Some(err)) if self.options.error_mode == ErrorMode::Passthrough => Err(err),
            (None, error) => Err(Self::give_up(request, attempts, None, error)),
        }
    }

    /// The policy still wanted to retry but no attempts are left.
    async fn exhausted(
        &self,
        request: &Request,
        attempts: u32,
        response: Option<Response>,
        error: Option<Error>,
    ) -> Result<Response> {
        #[cfg(feature = "tracing")]
        tracing::debug!(
            method = %request.method(),
            url = %request.redacted_url(),
            attempts,
            "giving up after exhausting retries"
        );

        match (self.options.error_mode, response, error) {
            (ErrorMode::Passthrough, Some(response), _) => Ok(response),
            (ErrorMode::Passthrough, None, Some(err)) => Err(err),
            (_, Some(response), error) => {
                let status = response.status();
                self.discard(response).await;
                Err(Self::give_up(request, attempts, Some(status), error))
            }
            (_, None, error) => Err(Self::give_up(request, attempts, None, error)),
        }
    }

    fn give_up(
        request: &Request,
        attempts: u32,
        last_status: Option<reqwest::StatusCode>,
        cause: Option<Error>,
    ) -> Error {
        Error::RetriesExhausted {
            method: request.method().clone(),
            url: request.redacted_url(),
            attempts,
            last_status,
            cause: cause.map(Box::new),
        }
    }

    /// Reads up to `drain_limit_bytes` of a discarded body so the connection
    /// can be reused, then drops it.
    async fn discard(&self, mut response: Response) {
        let limit = self.options.drain_limit_bytes;
        let mut drained = 0usize;
        while drained < limit {
            match response.chunk().await {
                Ok(Some(chunk)) => drained += chunk.len(),
                Ok(None) => break,
                Err(_err) => {
                    #[cfg(feature = "tracing")]
                    tracing::debug!(error = %_err, "failed to drain discarded response body");
                    break;
                }
            }
        }
    }

    /// Waits `delay` before the next attempt, aborting as soon as `ctx` is
    /// canceled or its deadline passes.
    async fn wait_before_retry(&self, ctx: &Context, delay: Duration) -> Result<()> {
        tokio::select! {
            biased;
            err = ctx.done() => Err(err),
            () = sleep(delay) => Ok(()),
        }
    }

    #[allow(unused_variables)]
    fn log_retry(
        &self,
        request: &Request,
        attempt: u32,
        delay: Duration,
        response: Option<&Response>,
        error: Option<&Error>,
        started: Instant,
    ) {
        #[cfg(feature = "tracing")]
        tracing::debug!(
            method = %request.method(),
            url = %request.redacted_url(),
            attempt,
            delay_ms = delay.as_millis() as u64,
            status = response.map(|response| response.status().as_u16()),
            error = error.map(tracing::field::display),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "retrying request"
        );
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use reqwest::StatusCode;

    use super::Client;
    use crate::{
        backoff_fn, retry_fn, BoxFuture, ClientOptions, Context, Error, ErrorMode, Request,
        RetryDecision, SharedError, Transport,
    };

    enum Scripted {
        Status(u16),
        Fail(&'static str),
        Hang,
    }

    /// Replays a fixed script of outcomes and records what it was sent.
    #[derive(Clone)]
    struct ScriptedTransport {
        script: Arc<Mutex<VecDeque<Scripted>>>,
        bodies: Arc<Mutex<Vec<Vec<u8>>>>,
        hits: Arc<AtomicUsize>,
    }

    impl ScriptedTransport {
        fn new(script: Vec<Scripted>) -> Self {
            Self {
                script: Arc::new(Mutex::new(script.into())),
                bodies: Arc::new(Mutex::new(Vec::new())),
                hits: Arc::new(AtomicUsize::new(0)),
            }
        }

        fn hits(&self) -> usize {
            self.hits.load(Ordering::SeqCst)
        }
    }

    impl Transport for ScriptedTransport {
        fn send(
            &self,
            request: reqwest::Request,
        ) -> BoxFuture<'_, Result<reqwest::Response, SharedError>> {
            Box::pin(async move {
                self.hits.fetch_add(1, Ordering::SeqCst);
                let body = request
                    .body()
                    .and_then(|body| body.as_bytes())
                    .unwrap_or_default()
                    .to_vec();
                self.bodies.lock().expect("bodies lock").push(body);

                let next = self
                    .script
                    .lock()
                    .expect("script lock")
                    .pop_front()
                    .unwrap_or(Scripted::Status(500));
                match next {
                    Scripted::Status(status) => {
                        let response = http::Response::builder()
                            .status(status)
                            .body(format!("status {status}"))
                            .expect("valid response");
                        Ok(reqwest::Response::from(response))
                    }
                    Scripted::Fail(message) => {
                        Err(Arc::new(std::io::Error::other(message)) as SharedError)
                    }
                    Scripted::Hang => {
                        std::future::pending::<()>().await;
                        unreachable!("pending never resolves")
                    }
                }
            })
        }
    }

    fn fast_options(max_attempts: u32, error_mode: ErrorMode) -> ClientOptions {
        ClientOptions {
            max_attempts,
            retry_wait_min_ms: 1,
            retry_wait_max_ms: 5,
            error_mode,
            ..ClientOptions::default()
        }
    }

    fn get() -> Request {
        Request::get("http://example.test/resource").expect("valid url")
    }

    #[tokio::test]
    async fn attempt_cap_counts_every_exchange() {
        for (max_attempts, expected_hits) in [(0, 1), (1, 1), (2, 2), (3, 3), (5, 5)] {
            let transport = ScriptedTransport::new(Vec::new());
            let client = Client::with_transport(transport.clone())
                .with_options(fast_options(max_attempts, ErrorMode::Synthesize));

            let err = client.send(get()).await.expect_err("always 500");
            assert_eq!(transport.hits(), expected_hits, "max_attempts={max_attempts}");
            assert_eq!(err.attempts(), Some(expected_hits as u32));
        }
    }

    #[tokio::test]
    async fn passthrough_exhaustion_returns_last_response() {
        let transport = ScriptedTransport::new(vec![
            Scripted::Status(500),
            Scripted::Status(502),
            Scripted::Status(503),
        ]);
        let client = Client::with_transport(transport.clone())
            .with_options(fast_options(3, ErrorMode::Passthrough));

        let response = client.send(get()).await.expect("last response is returned");
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(response.text().await.expect("body"), "status 503");
        assert_eq!(transport.hits(), 3);
    }

    #[tokio::test]
    async fn synthesize_exhaustion_reports_last_status() {
        let transport = ScriptedTransport::new(vec![Scripted::Status(429), Scripted::Status(504)]);
        let client = Client::with_transport(transport.clone())
            .with_options(fast_options(2, ErrorMode::Synthesize));

        match client.send(get()).await.expect_err("must give up") {
            Error::RetriesExhausted {
                attempts,
                last_status,
                cause,
                ..
            } => {
                assert_eq!(attempts, 2);
                assert_eq!(last_status, Some(StatusCode::GATEWAY_TIMEOUT));
                assert!(cause.is_none());
            }
            other => panic!("expected exhaustion, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn transient_errors_are_retried_until_success() {
        let transport = ScriptedTransport::new(vec![
            Scripted::Fail("connection reset by peer"),
            Scripted::Fail("connection refused"),
            Scripted::Status(200),
        ]);
        let client = Client::with_transport(transport.clone())
            .with_options(fast_options(5, ErrorMode::Synthesize));

        let response = client.send(get()).await.expect("third attempt succeeds");
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(transport.hits(), 3);
    }

    #[tokio::test]
    async fn permanent_error_is_attempted_once() {
        let transport = ScriptedTransport::new(vec![Scripted::Fail("stopped after 10 redirects")]);
        let client = Client::with_transport(transport.clone())
            .with_options(fast_options(5, ErrorMode::Synthesize));

        let err = client.send(get()).await.expect_err("permanent");
        assert!(matches!(err, Error::Transport(_)));
        assert_eq!(transport.hits(), 1);
    }

    #[tokio::test]
    async fn exhausted_transport_error_is_cause_in_synthesize_mode() {
        let transport = ScriptedTransport::new(vec![
            Scripted::Fail("connection refused"),
            Scripted::Fail("connection refused"),
        ]);
        let client = Client::with_transport(transport.clone())
            .with_options(fast_options(2, ErrorMode::Synthesize));

        let err = client.send(get()).await.expect_err("must give up");
        assert_eq!(
            err.to_string(),
            "GET http://example.test/resource giving up after 2 attempt(s): transport error: connection refused"
        );
    }

    #[tokio::test]
    async fn exhausted_transport_error_passes_through_unwrapped() {
        let transport = ScriptedTransport::new(vec![
            Scripted::Fail("connection refused"),
            Scripted::Fail("connection refused"),
        ]);
        let client = Client::with_transport(transport)
            .with_options(fast_options(2, ErrorMode::Passthrough));

        let err = client.send(get()).await.expect_err("must fail");
        let inner = err.transport_error().expect("transport error");
        assert!(inner.downcast_ref::<std::io::Error>().is_some());
    }

    #[tokio::test]
    async fn declined_error_respects_error_mode() {
        let decline_all = || retry_fn(|_, _, _, _| RetryDecision::Stop);

        let transport = ScriptedTransport::new(vec![Scripted::Fail("connection refused")]);
        let client = Client::with_transport(transport)
            .with_retry_policy(decline_all())
            .with_options(fast_options(3, ErrorMode::Synthesize));
        let err = client.send(get()).await.expect_err("must fail");
        assert_eq!(err.attempts(), Some(1));

        let transport = ScriptedTransport::new(vec![Scripted::Fail("connection refused")]);
        let client = Client::with_transport(transport)
            .with_retry_policy(decline_all())
            .with_options(fast_options(3, ErrorMode::Passthrough));
        let err = client.send(get()).await.expect_err("must fail");
        assert!(matches!(err, Error::Transport(_)));
    }

    #[tokio::test]
    async fn override_error_stops_even_when_retry_is_requested() {
        let transport = ScriptedTransport::new(vec![Scripted::Status(500)]);
        let client = Client::with_transport(transport.clone())
            .with_retry_policy(retry_fn(|_, _, _, _| {
                RetryDecision::from_parts(
                    true,
                    Some(Error::custom(std::io::Error::other("policy says no"))),
                )
            }))
            .with_options(fast_options(5, ErrorMode::Passthrough));

        let err = client.send(get()).await.expect_err("override error");
        assert!(matches!(err, Error::Custom(_)));
        assert_eq!(err.to_string(), "policy says no");
        assert_eq!(transport.hits(), 1);
    }

    #[tokio::test]
    async fn body_is_identical_on_every_attempt() {
        let transport = ScriptedTransport::new(vec![
            Scripted::Status(500),
            Scripted::Fail("connection reset"),
            Scripted::Status(200),
        ]);
        let client = Client::with_transport(transport.clone())
            .with_options(fast_options(5, ErrorMode::Synthesize));

        let payload = b"\x00binary\xffpayload".to_vec();
        let request = Request::post("http://example.test/upload")
            .expect("valid url")
            .body(payload.clone());
        client.send(request).await.expect("succeeds on third attempt");

        let bodies = transport.bodies.lock().expect("bodies lock");
        assert_eq!(bodies.len(), 3);
        assert!(bodies.iter().all(|body| *body == payload));
    }

    #[tokio::test]
    async fn backoff_receives_attempt_numbers_and_bounds() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let recorder = seen.clone();
        let transport = ScriptedTransport::new(Vec::new());
        let client = Client::with_transport(transport)
            .with_options(fast_options(4, ErrorMode::Synthesize))
            .with_backoff(backoff_fn(move |min, max, attempt, response| {
                recorder.lock().expect("seen lock").push((
                    min,
                    max,
                    attempt,
                    response.map(|r| r.status().as_u16()),
                ));
                Duration::ZERO
            }));

        client.send(get()).await.expect_err("always 500");
        let seen = seen.lock().expect("seen lock");
        let attempts: Vec<u32> = seen.iter().map(|(_, _, attempt, _)| *attempt).collect();
        assert_eq!(attempts, vec![1, 2, 3]);
        assert!(seen.iter().all(|(min, max, _, status)| {
            *min == Duration::from_millis(1)
                && *max == Duration::from_millis(5)
                && *status == Some(500)
        }));
    }

    #[tokio::test]
    async fn cancel_during_backoff_aborts_before_next_attempt() {
        let transport = ScriptedTransport::new(Vec::new());
        let client = Client::with_transport(transport.clone()).with_options(ClientOptions {
            max_attempts: 5,
            retry_wait_min_ms: 60_000,
            retry_wait_max_ms: 60_000,
            ..ClientOptions::default()
        });

        let ctx = Context::new();
        let canceller = ctx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            canceller.cancel();
        });

        let err = tokio::time::timeout(Duration::from_secs(5), client.execute(&ctx, get()))
            .await
            .expect("cancellation must interrupt backoff")
            .expect_err("canceled");
        assert!(matches!(err, Error::Canceled));
        assert_eq!(transport.hits(), 1);
    }

    #[tokio::test]
    async fn deadline_during_exchange_is_terminal() {
        let transport = ScriptedTransport::new(vec![Scripted::Hang]);
        let client = Client::with_transport(transport.clone())
            .with_options(fast_options(5, ErrorMode::Synthesize));

        let ctx = Context::new().timeout(Duration::from_millis(30));
        let err = client.execute(&ctx, get()).await.expect_err("deadline");
        assert!(matches!(err, Error::DeadlineExceeded));
        assert_eq!(transport.hits(), 1);
    }

    #[tokio::test]
    async fn canceled_context_sends_nothing() {
        let transport = ScriptedTransport::new(Vec::new());
        let client = Client::with_transport(transport.clone());

        let ctx = Context::new();
        ctx.cancel();
        let err = client.execute(&ctx, get()).await.expect_err("canceled");
        assert!(err.is_cancellation());
        assert_eq!(transport.hits(), 0);
    }

    #[tokio::test]
    async fn hooks_observe_every_attempt() {
        let requests = Arc::new(AtomicUsize::new(0));
        let responses = Arc::new(AtomicUsize::new(0));
        let (req_counter, resp_counter) = (requests.clone(), responses.clone());

        let transport = ScriptedTransport::new(vec![Scripted::Status(503), Scripted::Status(200)]);
        let client = Client::with_transport(transport)
            .with_options(fast_options(3, ErrorMode::Synthesize))
            .with_request_hook(move |request, attempt| {
                assert_eq!(request.url().path(), "/resource");
                req_counter.fetch_add(1, Ordering::SeqCst);
                assert_eq!(req_counter.load(Ordering::SeqCst), attempt as usize);
            })
            .with_response_hook(move |_| {
                resp_counter.fetch_add(1, Ordering::SeqCst);
            });

        client.send(get()).await.expect("second attempt succeeds");
        assert_eq!(requests.load(Ordering::SeqCst), 2);
        assert_eq!(responses.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn body_open_failure_is_fatal_before_any_exchange() {
        let transport = ScriptedTransport::new(Vec::new());
        let client = Client::with_transport(transport.clone());
        let request = Request::put("http://example.test/blob")
            .expect("valid url")
            .body(crate::ReplayableBody::from_fn(None, || {
                Err::<reqwest::Body, _>(std::io::Error::other("file vanished"))
            }));

        let err = client.send(request).await.expect_err("open failure");
        assert!(matches!(err, Error::BodyOpen(_)));
        assert_eq!(transport.hits(), 0);
    }
}
