//! Body type handed to transports.
//!
//! [`Body`] implements [`http_body::Body`], so a transport built on `hyper`
//! or any other `http`-based stack can send it directly. Bodies are either
//! empty, a single buffer of bytes, or a boxed stream of byte chunks.

use std::fmt;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures_util::StreamExt;
use http_body::Frame;
use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::{BodyExt, StreamBody};

use crate::request::ByteStream;
use crate::BoxError;

/// A wrapper for the different request bodies a transport may be asked to send.
///
/// Bodies can be created from [`Bytes`](bytes::Bytes), [`String`](std::string::String),
/// or [`&'static str`](str) using [`From`](std::convert::From) implementations.
///
/// An empty body can be created with [Body::empty](Body::empty).
#[derive(Debug)]
#[pin_project::pin_project]
pub struct Body {
    #[pin]
    inner: InnerBody,
}

impl Body {
    /// Create a new `Body` that wraps another [`http_body::Body`].
    pub fn new<B>(body: B) -> Self
    where
        B: http_body::Body<Data = Bytes> + Send + 'static,
        B::Error: Into<BoxError>,
    {
        Self {
            inner: InnerBody::Boxed(UnsyncBoxBody::new(body.map_err(Into::into))),
        }
    }

    /// Create a new empty body.
    pub fn empty() -> Self {
        Self {
            inner: InnerBody::Empty,
        }
    }

    /// Create a body which yields the chunks of a byte stream in order.
    pub fn from_stream(stream: ByteStream) -> Self {
        let frames = stream.map(|chunk| chunk.map(Frame::data));
        Self::new(StreamBody::new(frames))
    }

    /// The complete contents of this body, if they are already in memory.
    ///
    /// Streaming bodies are returned unchanged as the error value.
    pub fn try_into_bytes(self) -> Result<Option<Bytes>, Self> {
        match self.inner {
            InnerBody::Empty => Ok(None),
            InnerBody::Full(bytes) => Ok(bytes),
            inner => Err(Self { inner }),
        }
    }

    /// Whether this body streams its contents rather than holding them in memory.
    pub fn is_streaming(&self) -> bool {
        matches!(self.inner, InnerBody::Boxed(_))
    }
}

impl Default for Body {
    fn default() -> Self {
        Self::empty()
    }
}

impl From<Bytes> for Body {
    fn from(body: Bytes) -> Self {
        Self {
            inner: InnerBody::Full(Some(body)),
        }
    }
}

impl From<Vec<u8>> for Body {
    fn from(body: Vec<u8>) -> Self {
        Bytes::from(body).into()
    }
}

impl From<String> for Body {
    fn from(body: String) -> Self {
        if body.is_empty() {
            Self::empty()
        } else {
            Bytes::from(body).into()
        }
    }
}

impl From<&'static str> for Body {
    fn from(body: &'static str) -> Self {
        Bytes::from_static(body.as_bytes()).into()
    }
}

#[pin_project::pin_project(project = InnerBodyProj)]
enum InnerBody {
    Empty,
    Full(Option<Bytes>),
    Boxed(#[pin] UnsyncBoxBody<Bytes, BoxError>),
}

impl http_body::Body for Body {
    type Data = Bytes;
    type Error = BoxError;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.project();
        match this.inner.project() {
            InnerBodyProj::Empty => Poll::Ready(None),
            InnerBodyProj::Full(bytes) => Poll::Ready(bytes.take().map(|b| Ok(Frame::data(b)))),
            InnerBodyProj::Boxed(body) => body.poll_frame(cx),
        }
    }

    fn is_end_stream(&self) -> bool {
        match self.inner {
            InnerBody::Empty => true,
            InnerBody::Full(ref bytes) => bytes.is_none(),
            InnerBody::Boxed(ref body) => body.is_end_stream(),
        }
    }

    fn size_hint(&self) -> http_body::SizeHint {
        match self.inner {
            InnerBody::Empty => http_body::SizeHint::with_exact(0),
            InnerBody::Full(ref bytes) => {
                http_body::SizeHint::with_exact(bytes.as_ref().map_or(0, |b| b.len() as u64))
            }
            InnerBody::Boxed(ref body) => body.size_hint(),
        }
    }
}

impl fmt::Debug for InnerBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InnerBody::Empty => f.debug_struct("Empty").finish(),
            InnerBody::Full(_) => f.debug_struct("Full").finish(),
            InnerBody::Boxed(_) => f.debug_struct("Boxed").finish(),
        }
    }
}

#[cfg(test)]
mod tests {

    use super::*;

    use futures_util::stream;
    use http_body::Body as _;
    use static_assertions::assert_impl_all;

    assert_impl_all!(Body: Send);

    #[tokio::test]
    async fn full_body_yields_one_frame() {
        let body = Body::from("hello");
        assert_eq!(body.size_hint().exact(), Some(5));
        let collected = body.collect().await.unwrap().to_bytes();
        assert_eq!(collected, Bytes::from_static(b"hello"));
    }

    #[tokio::test]
    async fn stream_body_concatenates_chunks() {
        let chunks: Vec<Result<Bytes, BoxError>> =
            vec![Ok(Bytes::from_static(b"ab")), Ok(Bytes::from_static(b"cd"))];
        let body = Body::from_stream(Box::pin(stream::iter(chunks)));
        assert!(body.is_streaming());
        let collected = body.collect().await.unwrap().to_bytes();
        assert_eq!(collected, Bytes::from_static(b"abcd"));
    }

    #[test]
    fn empty_body_has_no_bytes() {
        let body = Body::empty();
        assert!(body.is_end_stream());
        assert!(matches!(body.try_into_bytes(), Ok(None)));
    }
}
