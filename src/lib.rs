//! `retryable-http` is an async HTTP client that retries transient failures.
//!
//! A [`Client`] sends a [`Request`] over a single-shot [`Transport`]
//! (by default a `reqwest::Client`) and re-sends it while its
//! [`RetryPolicy`] asks for it, waiting between attempts as the
//! [`BackoffPolicy`] dictates:
//! - [`Client::execute`] runs one logical request under a [`Context`]
//! - [`Client::send`], [`Client::get`], [`Client::head`], [`Client::post`]
//!   are shortcuts without a cancellation scope
//! - [`RetryTransport`] plugs the retrying client back in wherever a plain
//!   [`Transport`] is expected
//!
//! ```no_run
//! # async fn demo() -> retryable_http::Result<()> {
//! use retryable_http::{Client, ClientOptions};
//!
//! let client = Client::new().with_options(ClientOptions {
//!     max_attempts: 3,
//!     ..ClientOptions::default()
//! });
//! let response = client.get("https://example.com/").await?;
//! println!("{}", response.status());
//! # Ok(())
//! # }
//! ```

mod adapter;
mod backoff;
mod body;
mod client;
mod context;
mod error;
mod options;
mod policy;
mod request;
mod transport;

pub use adapter::RetryTransport;
pub use backoff::{
    backoff_fn, parse_retry_after, BackoffFn, BackoffPolicy, ExponentialBackoff,
    LinearJitterBackoff, RetryAfterBackoff,
};
pub use body::{ReplayableBody, DEFAULT_MAX_BUFFERED_BODY_BYTES};
pub use client::Client;
pub use context::Context;
pub use error::{Error, SharedError};
pub use options::{ClientOptions, ErrorMode};
pub use policy::{
    is_permanent_error, is_permanent_transport_error, is_retryable_status, retry_fn,
    DefaultRetryPolicy, RetryDecision, RetryFn, RetryPolicy,
};
pub use request::Request;
pub use transport::{BoxFuture, Transport};

pub use tokio_util::sync::CancellationToken;

pub type Result<T> = std::result::Result<T, Error>;
