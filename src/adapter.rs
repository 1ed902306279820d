use std::sync::{Arc, OnceLock};

use reqwest::Response;

use crate::{BoxFuture, Client, Context, Error, ErrorMode, Request, SharedError, Transport};

/// Exposes a retrying [`Client`] through the single-shot [`Transport`]
/// contract.
///
/// The client is created lazily with [`Client::new`] on first use unless one
/// was supplied. Initialization happens exactly once even under concurrent
/// first use, and every later request reuses the same client.
#[derive(Debug, Default)]
pub struct RetryTransport {
    client: OnceLock<Client>,
}

impl RetryTransport {
    /// Creates an adapter whose client is built on first use.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_client(client: Client) -> Self {
        Self {
            client: OnceLock::from(client),
        }
    }

    /// Returns the wrapped client, creating the default one if needed.
    pub fn client(&self) -> &Client {
        self.client.get_or_init(Client::new)
    }

    /// Returns the wrapped client only if it already exists.
    pub fn initialized_client(&self) -> Option<&Client> {
        self.client.get()
    }

    /// Sends one logical request through the retrying client.
    ///
    /// A streaming body is read into memory once so every attempt can send
    /// it again.
    ///
    /// In [`ErrorMode::Passthrough`] a transport failure is returned as the
    /// underlying transport's own error value, so callers can downcast it
    /// exactly as if no retrying happened. Every other failure is returned as
    /// an [`Error`].
    pub async fn send_with_context(
        &self,
        ctx: &Context,
        request: reqwest::Request,
    ) -> Result<Response, SharedError> {
        let client = self.client();
        let request = Request::from_reqwest_buffered(request)
            .await
            .map_err(|err| Arc::new(err) as SharedError)?;
        client
            .execute(ctx, request)
            .await
            .map_err(|err| normalize_error(client.options().error_mode, err))
    }
}

impl Transport for RetryTransport {
    fn send(&self, request: reqwest::Request) -> BoxFuture<'_, Result<Response, SharedError>> {
        Box::pin(async move { self.send_with_context(&Context::new(), request).await })
    }
}

fn normalize_error(mode: ErrorMode, err: Error) -> SharedError {
    match (mode, err) {
        (ErrorMode::Passthrough, Error::Transport(inner)) => inner,
        (_, err) => Arc::new(err),
    }
}
