use std::sync::Arc;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_LENGTH, CONTENT_TYPE};
use reqwest::{Method, Url, Version};
use serde::Serialize;

use crate::error::redact_url;
use crate::{Error, ReplayableBody, Result, DEFAULT_MAX_BUFFERED_BODY_BYTES};

/// One intended HTTP exchange, independent of how many times it is sent.
#[derive(Clone, Debug)]
pub struct Request {
    method: Method,
    url: Url,
    headers: HeaderMap,
    body: ReplayableBody,
    timeout: Option<Duration>,
    version: Version,
}

impl Request {
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            headers: HeaderMap::new(),
            body: ReplayableBody::empty(),
            timeout: None,
            version: Version::default(),
        }
    }

    /// Parses `url` and creates a request for it.
    pub fn parse(method: Method, url: impl AsRef<str>) -> Result<Self> {
        Ok(Self::new(method, parse_url(url.as_ref())?))
    }

    pub fn get(url: impl AsRef<str>) -> Result<Self> {
        Self::parse(Method::GET, url)
    }

    pub fn head(url: impl AsRef<str>) -> Result<Self> {
        Self::parse(Method::HEAD, url)
    }

    pub fn post(url: impl AsRef<str>) -> Result<Self> {
        Self::parse(Method::POST, url)
    }

    pub fn put(url: impl AsRef<str>) -> Result<Self> {
        Self::parse(Method::PUT, url)
    }

    pub fn delete(url: impl AsRef<str>) -> Result<Self> {
        Self::parse(Method::DELETE, url)
    }

    /// Converts a `reqwest::Request`, keeping its body for replay.
    ///
    /// Streaming bodies cannot be re-sent and are rejected with
    /// [`Error::BodyNotReplayable`].
    pub fn from_reqwest(request: reqwest::Request) -> Result<Self> {
        let body = match request.body() {
            Some(body) => ReplayableBody::from_reqwest(body)?,
            None => ReplayableBody::empty(),
        };
        Ok(Self {
            method: request.method().clone(),
            url: request.url().clone(),
            headers: request.headers().clone(),
            body,
            timeout: request.timeout().copied(),
            version: request.version(),
        })
    }

    /// Like [`Request::from_reqwest`], but reads a streaming body once into
    /// memory instead of rejecting it.
    ///
    /// The stream is capped at [`DEFAULT_MAX_BUFFERED_BODY_BYTES`].
    pub async fn from_reqwest_buffered(mut request: reqwest::Request) -> Result<Self> {
        let body = match request.body_mut().take() {
            Some(body) => {
                ReplayableBody::collect_reqwest(body, DEFAULT_MAX_BUFFERED_BODY_BYTES).await?
            }
            None => ReplayableBody::empty(),
        };
        Ok(Self {
            method: request.method().clone(),
            url: request.url().clone(),
            headers: request.headers().clone(),
            body,
            timeout: request.timeout().copied(),
            version: request.version(),
        })
    }

    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn body(mut self, body: impl Into<ReplayableBody>) -> Self {
        self.body = body.into();
        self
    }

    /// Serializes `value` as the JSON body and sets `Content-Type`.
    pub fn json<T: Serialize + ?Sized>(mut self, value: &T) -> Result<Self> {
        let bytes = serde_json::to_vec(value).map_err(|err| Error::Json(Arc::new(err)))?;
        self.headers
            .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        self.body = ReplayableBody::from_bytes(bytes);
        Ok(self)
    }

    /// Per-attempt timeout forwarded to the transport.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    pub fn replayable_body(&self) -> &ReplayableBody {
        &self.body
    }

    pub(crate) fn redacted_url(&self) -> String {
        redact_url(&self.url)
    }

    /// Builds the outbound request for one attempt with a fresh body.
    pub(crate) fn to_outbound(&self) -> Result<reqwest::Request> {
        let mut outbound = reqwest::Request::new(self.method.clone(), self.url.clone());
        *outbound.headers_mut() = self.headers.clone();
        *outbound.timeout_mut() = self.timeout;
        *outbound.version_mut() = self.version;

        if self.body.is_opener() {
            if let Some(len) = self.body.content_length() {
                outbound
                    .headers_mut()
                    .insert(CONTENT_LENGTH, HeaderValue::from(len));
            }
        }
        *outbound.body_mut() = self.body.open()?;
        Ok(outbound)
    }
}

fn parse_url(url: &str) -> Result<Url> {
    Url::parse(url).map_err(|err| Error::InvalidUrl {
        url: url.to_owned(),
        source: Arc::new(err),
    })
}
