use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use http_body_util::{BodyExt, LengthLimitError, Limited};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::{Error, Result, SharedError};

/// Default cap for bodies buffered from one-shot readers (16 MiB).
pub const DEFAULT_MAX_BUFFERED_BODY_BYTES: usize = 16 * 1024 * 1024;

type Opener = Arc<dyn Fn() -> std::result::Result<reqwest::Body, SharedError> + Send + Sync>;

#[derive(Clone)]
enum Source {
    Empty,
    Bytes(Bytes),
    Opener { open: Opener, len: Option<u64> },
}

/// Request body that can be handed out again for every attempt.
///
/// Cloning is cheap: byte bodies share one reference-counted buffer and
/// opener bodies share the opener.
#[derive(Clone)]
pub struct ReplayableBody {
    source: Source,
}

impl fmt::Debug for ReplayableBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.source {
            Source::Empty => f.write_str("ReplayableBody::Empty"),
            Source::Bytes(bytes) => f
                .debug_struct("ReplayableBody::Bytes")
                .field("len", &bytes.len())
                .finish(),
            Source::Opener { len, .. } => f
                .debug_struct("ReplayableBody::Opener")
                .field("len", len)
                .finish(),
        }
    }
}

impl Default for ReplayableBody {
    fn default() -> Self {
        Self::empty()
    }
}

impl ReplayableBody {
    pub fn empty() -> Self {
        Self {
            source: Source::Empty,
        }
    }

    /// Wraps stable bytes without copying.
    pub fn from_bytes(bytes: impl Into<Bytes>) -> Self {
        Self {
            source: Source::Bytes(bytes.into()),
        }
    }

    /// Wraps a re-openable source.
    ///
    /// `open` is called once per attempt and must return a body with the same
    /// content every time. A known `len` is sent as `Content-Length`.
    pub fn from_fn<F, E>(len: Option<u64>, open: F) -> Self
    where
        F: Fn() -> std::result::Result<reqwest::Body, E> + Send + Sync + 'static,
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self {
            source: Source::Opener {
                open: Arc::new(move || open().map_err(|err| SharedError::from(err.into()))),
                len,
            },
        }
    }

    /// Reads a one-shot source to completion and keeps the bytes for replay.
    ///
    /// Fails with [`Error::BodyTooLarge`] above
    /// [`DEFAULT_MAX_BUFFERED_BODY_BYTES`].
    pub async fn buffer<R>(reader: R) -> Result<Self>
    where
        R: AsyncRead + Unpin,
    {
        Self::buffer_with_limit(reader, DEFAULT_MAX_BUFFERED_BODY_BYTES).await
    }

    /// Like [`ReplayableBody::buffer`] with an explicit byte limit.
    pub async fn buffer_with_limit<R>(reader: R, limit: usize) -> Result<Self>
    where
        R: AsyncRead + Unpin,
    {
        let mut buffered = Vec::new();
        // One byte past the limit is enough to tell "exactly at" from "over".
        let probe = u64::try_from(limit).unwrap_or(u64::MAX).saturating_add(1);
        reader
            .take(probe)
            .read_to_end(&mut buffered)
            .await
            .map_err(|err| Error::BodyRead(Arc::new(err)))?;

        if buffered.len() > limit {
            return Err(Error::BodyTooLarge { limit });
        }
        Ok(Self::from_bytes(buffered))
    }

    /// Converts a `reqwest::Body`, rejecting streaming bodies.
    ///
    /// A buffered body is copied once into a new replay buffer.
    pub fn from_reqwest(body: &reqwest::Body) -> Result<Self> {
        body.as_bytes()
            .map(|bytes| Self::from_bytes(Bytes::copy_from_slice(bytes)))
            .ok_or(Error::BodyNotReplayable)
    }

    /// Takes ownership of a `reqwest::Body` and keeps its bytes for replay.
    ///
    /// Buffered bodies are copied as in [`ReplayableBody::from_reqwest`].
    /// Streaming bodies are read to completion once, up to `limit` bytes.
    pub async fn collect_reqwest(body: reqwest::Body, limit: usize) -> Result<Self> {
        if body.as_bytes().is_some() {
            return Self::from_reqwest(&body);
        }

        let collected = Limited::new(body, limit).collect().await.map_err(|err| {
            if err.downcast_ref::<LengthLimitError>().is_some() {
                Error::BodyTooLarge { limit }
            } else {
                Error::BodyRead(Arc::new(std::io::Error::other(err)))
            }
        })?;
        Ok(Self::from_bytes(collected.to_bytes()))
    }

    pub fn is_empty(&self) -> bool {
        match &self.source {
            Source::Empty => true,
            Source::Bytes(bytes) => bytes.is_empty(),
            Source::Opener { len, .. } => *len == Some(0),
        }
    }

    /// Length that every produced body will have, when known.
    pub fn content_length(&self) -> Option<u64> {
        match &self.source {
            Source::Empty => Some(0),
            Source::Bytes(bytes) => Some(bytes.len() as u64),
            Source::Opener { len, .. } => *len,
        }
    }

    /// Buffered bytes, for in-memory bodies.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match &self.source {
            Source::Empty => Some(&[][..]),
            Source::Bytes(bytes) => Some(bytes.as_ref()),
            Source::Opener { .. } => None,
        }
    }

    /// Produces a fresh body for one attempt; `None` for an empty body.
    pub fn open(&self) -> Result<Option<reqwest::Body>> {
        match &self.source {
            Source::Empty => Ok(None),
            Source::Bytes(bytes) => Ok(Some(reqwest::Body::from(bytes.clone()))),
            Source::Opener { open, .. } => open().map(Some).map_err(Error::BodyOpen),
        }
    }

    pub(crate) fn is_opener(&self) -> bool {
        matches!(self.source, Source::Opener { .. })
    }
}

impl From<Bytes> for ReplayableBody {
    fn from(bytes: Bytes) -> Self {
        Self::from_bytes(bytes)
    }
}

impl From<Vec<u8>> for ReplayableBody {
    fn from(bytes: Vec<u8>) -> Self {
        Self::from_bytes(bytes)
    }
}

impl From<String> for ReplayableBody {
    fn from(text: String) -> Self {
        Self::from_bytes(text)
    }
}

impl From<&'static str> for ReplayableBody {
    fn from(text: &'static str) -> Self {
        Self::from_bytes(text)
    }
}

impl From<&'static [u8]> for ReplayableBody {
    fn from(bytes: &'static [u8]) -> Self {
        Self::from_bytes(bytes)
    }
}

impl From<()> for ReplayableBody {
    fn from((): ()) -> Self {
        Self::empty()
    }
}
