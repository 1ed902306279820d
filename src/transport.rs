use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::SharedError;

/// Boxed future returned by [`Transport::send`].
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Performs exactly one HTTP exchange.
///
/// Implementations know nothing about retries. [`reqwest::Client`] is the
/// default transport; [`crate::RetryTransport`] implements the same contract
/// so it can stand in wherever a plain transport is expected.
pub trait Transport: Send + Sync {
    fn send(
        &self,
        request: reqwest::Request,
    ) -> BoxFuture<'_, Result<reqwest::Response, SharedError>>;
}

impl Transport for reqwest::Client {
    fn send(
        &self,
        request: reqwest::Request,
    ) -> BoxFuture<'_, Result<reqwest::Response, SharedError>> {
        Box::pin(async move {
            self.execute(request)
                .await
                .map_err(|err| Arc::new(err) as SharedError)
        })
    }
}

impl<T: Transport + ?Sized> Transport for Arc<T> {
    fn send(
        &self,
        request: reqwest::Request,
    ) -> BoxFuture<'_, Result<reqwest::Response, SharedError>> {
        (**self).send(request)
    }
}
