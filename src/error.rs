use std::error::Error as StdError;
use std::sync::Arc;

use reqwest::{Method, StatusCode};

/// Type-erased error shared between the orchestrator, policies, and callers.
///
/// Transport errors are kept behind an `Arc` so a retry policy can hand the
/// attempt's own error back as an override without taking ownership of it.
pub type SharedError = Arc<dyn StdError + Send + Sync>;

/// Error type returned by this crate.
#[derive(Clone, Debug, thiserror::Error)]
pub enum Error {
    /// Request URL could not be parsed.
    #[error("invalid request url '{url}': {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: SharedError,
    },
    /// Reading a one-shot body into the replay buffer failed.
    #[error("failed to buffer request body: {0}")]
    BodyRead(#[source] Arc<std::io::Error>),
    /// A one-shot body was larger than the replay buffer allows.
    #[error("request body exceeds replay buffer limit of {limit} bytes")]
    BodyTooLarge { limit: usize },
    /// Request carries a streaming body that cannot be re-sent.
    #[error("request body is a stream and cannot be replayed")]
    BodyNotReplayable,
    /// A re-openable body source failed to produce a body for an attempt.
    #[error("failed to open request body: {0}")]
    BodyOpen(#[source] SharedError),
    /// Serializing a JSON request body failed.
    #[error("failed to serialize json body: {0}")]
    Json(#[source] Arc<serde_json::Error>),
    /// The underlying transport failed to complete an exchange.
    #[error("transport error: {0}")]
    Transport(#[source] SharedError),
    /// The request context was canceled.
    #[error("request canceled")]
    Canceled,
    /// The request context deadline elapsed.
    #[error("request deadline exceeded")]
    DeadlineExceeded,
    /// Retrying stopped without an acceptable outcome.
    #[error(
        "{method} {url} giving up after {attempts} attempt(s){}",
        cause_suffix(.cause, .last_status)
    )]
    RetriesExhausted {
        method: Method,
        /// Target URL with any password redacted.
        url: String,
        attempts: u32,
        /// Status of the last discarded response, if the last attempt got one.
        last_status: Option<StatusCode>,
        #[source]
        cause: Option<Box<Error>>,
    },
    /// Error supplied by a custom retry policy.
    #[error("{0}")]
    Custom(#[source] SharedError),
    /// Invalid client configuration.
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl Error {
    /// Wraps an arbitrary error, typically as a retry policy override.
    pub fn custom<E>(error: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Self::Custom(Arc::new(error))
    }

    pub(crate) fn transport<E>(error: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Self::Transport(Arc::new(error))
    }

    /// Returns `true` for [`Error::Canceled`] and [`Error::DeadlineExceeded`].
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Canceled | Self::DeadlineExceeded)
    }

    /// Returns the original transport error, if this is a transport failure.
    ///
    /// The returned value can be downcast to the concrete error of the
    /// underlying transport, e.g. `reqwest::Error`.
    pub fn transport_error(&self) -> Option<&(dyn StdError + Send + Sync + 'static)> {
        match self {
            Self::Transport(inner) => Some(inner.as_ref()),
            _ => None,
        }
    }

    /// Number of attempts made, for exhaustion errors.
    pub fn attempts(&self) -> Option<u32> {
        match self {
            Self::RetriesExhausted { attempts, .. } => Some(*attempts),
            _ => None,
        }
    }
}

fn cause_suffix(cause: &Option<Box<Error>>, last_status: &Option<StatusCode>) -> String {
    match (cause, last_status) {
        (Some(cause), _) => format!(": {cause}"),
        (None, Some(status)) => format!(" (last status {status})"),
        (None, None) => String::new(),
    }
}

/// Renders a URL for error messages with the userinfo password masked.
pub(crate) fn redact_url(url: &reqwest::Url) -> String {
    if url.password().is_none() {
        return url.to_string();
    }
    let mut redacted = url.clone();
    // Only fails for cannot-be-a-base URLs, which carry no password.
    let _ = redacted.set_password(Some("xxxxx"));
    redacted.to_string()
}
