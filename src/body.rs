//! Message bodies.
//!
//! A [`Body`] is either a fully buffered byte string or a handle to a byte
//! stream that has not been read yet. Cloning a body never copies or forks
//! the stream: every clone points at the same slot, and whoever drains it
//! first wins. Later readers get [`BodyError::Consumed`].

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use bytes::Bytes;
use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::{BodyExt, Empty, Full};

use crate::error::BoxError;

/// Body type handed to hyper when a response is flushed.
pub type ResponseBody = UnsyncBoxBody<Bytes, BoxError>;

/// A request or response body.
#[derive(Clone)]
pub enum Body {
    /// Buffered bytes. Cheap to clone, readable any number of times.
    Full(Bytes),
    /// An unread byte stream, readable once.
    Stream(Arc<StreamSlot>),
}

/// Shared single-consumption slot holding a byte stream.
pub struct StreamSlot(Mutex<Option<ResponseBody>>);

impl StreamSlot {
    fn take(&self) -> Option<ResponseBody> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).take()
    }

    fn is_consumed(&self) -> bool {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).is_none()
    }
}

impl Body {
    pub fn empty() -> Self {
        Self::Full(Bytes::new())
    }

    /// Wraps any `http_body::Body` producing [`Bytes`] as a streaming body.
    pub fn from_stream<B>(body: B) -> Self
    where
        B: hyper::body::Body<Data = Bytes> + Send + 'static,
        B::Error: Into<BoxError>,
    {
        let boxed = body.map_err(|e| -> BoxError { e.into() }).boxed_unsync();
        Self::Stream(Arc::new(StreamSlot(Mutex::new(Some(boxed)))))
    }

    pub fn is_stream(&self) -> bool {
        matches!(self, Self::Stream(_))
    }

    /// Whether a streaming body has already been drained by someone.
    pub fn is_consumed(&self) -> bool {
        match self {
            Self::Full(_) => false,
            Self::Stream(slot) => slot.is_consumed(),
        }
    }

    /// The buffered bytes, if this body is not a stream.
    pub fn as_bytes(&self) -> Option<&Bytes> {
        match self {
            Self::Full(b) => Some(b),
            Self::Stream(_) => None,
        }
    }

    /// Reads the whole body into memory.
    ///
    /// A streaming body is consumed by this call; the returned bytes are the
    /// only copy. Failures of the underlying connection surface as
    /// [`BodyError::Read`].
    pub async fn bytes(&self) -> Result<Bytes, BodyError> {
        match self {
            Self::Full(b) => Ok(b.clone()),
            Self::Stream(slot) => {
                let stream = slot.take().ok_or(BodyError::Consumed)?;
                let collected = stream.collect().await.map_err(BodyError::Read)?;
                Ok(collected.to_bytes())
            }
        }
    }

    /// Reads the whole body as UTF-8 text.
    pub async fn text(&self) -> Result<String, BodyError> {
        let bytes = self.bytes().await?;
        String::from_utf8(bytes.to_vec()).map_err(|_| BodyError::Utf8)
    }

    /// Converts into the hyper body written to the socket.
    ///
    /// An already drained stream becomes an empty body.
    pub(crate) fn into_response_body(self) -> ResponseBody {
        match self {
            Self::Full(b) => Full::new(b).map_err(|never| match never {}).boxed_unsync(),
            Self::Stream(slot) => slot
                .take()
                .unwrap_or_else(|| Empty::new().map_err(|never| match never {}).boxed_unsync()),
        }
    }
}

impl Default for Body {
    fn default() -> Self {
        Self::empty()
    }
}

impl fmt::Debug for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Full(b) => f.debug_tuple("Full").field(b).finish(),
            Self::Stream(slot) => f
                .debug_struct("Stream")
                .field("consumed", &slot.is_consumed())
                .finish(),
        }
    }
}

impl From<Bytes> for Body {
    fn from(b: Bytes) -> Self {
        Self::Full(b)
    }
}

impl From<Vec<u8>> for Body {
    fn from(b: Vec<u8>) -> Self {
        Self::Full(b.into())
    }
}

impl From<String> for Body {
    fn from(s: String) -> Self {
        Self::Full(s.into())
    }
}

impl From<&'static str> for Body {
    fn from(s: &'static str) -> Self {
        Self::Full(Bytes::from_static(s.as_bytes()))
    }
}

impl From<&'static [u8]> for Body {
    fn from(b: &'static [u8]) -> Self {
        Self::Full(Bytes::from_static(b))
    }
}

// ── BodyError ─────────────────────────────────────────────────────────────────

/// Failure while reading a body.
#[derive(Debug)]
pub enum BodyError {
    /// The stream was already drained by another middleware.
    Consumed,
    /// The connection failed or was aborted mid-body.
    Read(BoxError),
    /// The body is not valid UTF-8.
    Utf8,
}

impl fmt::Display for BodyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Consumed => f.write_str("request body was already consumed"),
            Self::Read(e) => write!(f, "cannot read request body: {e}"),
            Self::Utf8 => f.write_str("request body is not valid UTF-8"),
        }
    }
}

impl std::error::Error for BodyError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Read(e) => Some(e.as_ref()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn buffered_body_reads_repeatedly() {
        let body = Body::from("hello");
        assert_eq!(body.text().await.unwrap(), "hello");
        assert_eq!(body.bytes().await.unwrap(), "hello");
        assert!(!body.is_consumed());
    }

    #[tokio::test]
    async fn stream_is_consumed_once_across_clones() {
        let body = Body::from_stream(Full::new(Bytes::from_static(b"payload")));
        let clone = body.clone();
        assert!(body.is_stream());

        assert_eq!(clone.bytes().await.unwrap(), "payload");
        assert!(body.is_consumed());
        assert!(matches!(body.bytes().await, Err(BodyError::Consumed)));
    }

    #[tokio::test]
    async fn invalid_utf8_is_reported() {
        let body = Body::from(vec![0xff, 0xfe]);
        assert!(matches!(body.text().await, Err(BodyError::Utf8)));
    }
}
