//! Immutable request model.
//!
//! A [`Request`] is a value: once built it never changes. To derive a modified request,
//! stage the changes in a [`Builder`] (see [`Request::to_builder`]) and build again.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures_core::Stream;
use http::{HeaderMap, Method, Uri};
use parking_lot::Mutex;

use crate::body::Body;
use crate::error::Error;
use crate::BoxError;

mod builder;
pub mod multipart;
mod native;
pub mod query;
mod types;

pub use self::builder::Builder;
pub use self::multipart::{MultipartForm, Part};
pub use self::native::TransferOptions;
pub use self::query::{QueryParameters, QueryValue};
pub use self::types::{Authorization, CacheControl, CachePolicy, ContentEncoding, ContentType, ServiceType};

/// Timeout applied when none is configured.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// A stream of body chunks.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, BoxError>> + Send>>;

/// Serializes an object into a request body.
pub trait BodyEncoder {
    /// The content type of the encoded body.
    fn content_type(&self) -> ContentType;

    /// Encode the body.
    fn encode(&self) -> Result<Bytes, BoxError>;
}

/// A streamed request body.
///
/// The stream is opened once per transfer, so a retried request streams its body again.
#[derive(Clone)]
pub struct BodyStream(Arc<dyn Fn() -> Body + Send + Sync>);

impl BodyStream {
    /// A body stream which calls `open` each time the body is sent.
    pub fn new<F>(open: F) -> Self
    where
        F: Fn() -> ByteStream + Send + Sync + 'static,
    {
        BodyStream(Arc::new(move || Body::from_stream(open())))
    }

    /// A body stream which can be sent once; later transfers send an empty body.
    pub fn once(body: Body) -> Self {
        let body = Mutex::new(Some(body));
        BodyStream(Arc::new(move || body.lock().take().unwrap_or_default()))
    }

    /// Open the stream for a transfer.
    pub fn open(&self) -> Body {
        (self.0)()
    }
}

impl PartialEq for BodyStream {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for BodyStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("BodyStream").finish()
    }
}

/// The body of a request: nothing, a buffer, or a stream, never more than one.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum RequestBody {
    /// No body.
    #[default]
    Empty,
    /// A body held in memory.
    Bytes(Bytes),
    /// A streamed body.
    Stream(BodyStream),
}

impl RequestBody {
    /// The in-memory body, if there is one.
    pub fn bytes(&self) -> Option<&Bytes> {
        match self {
            RequestBody::Bytes(bytes) => Some(bytes),
            _ => None,
        }
    }

    /// The streamed body, if there is one.
    pub fn stream(&self) -> Option<&BodyStream> {
        match self {
            RequestBody::Stream(stream) => Some(stream),
            _ => None,
        }
    }

    pub(crate) fn open(&self) -> Body {
        match self {
            RequestBody::Empty => Body::empty(),
            RequestBody::Bytes(bytes) => Body::from(bytes.clone()),
            RequestBody::Stream(stream) => stream.open(),
        }
    }
}

/// An immutable HTTP request description.
///
/// Two requests are equal when they target the same address with the same method;
/// headers and bodies are not compared.
#[derive(Debug, Clone)]
pub struct Request {
    pub(crate) url: Uri,
    pub(crate) cache: CachePolicy,
    pub(crate) timeout: Duration,
    pub(crate) main_document_url: Option<Uri>,
    pub(crate) service_type: ServiceType,
    pub(crate) content_type: Option<ContentType>,
    pub(crate) content_length: Option<u64>,
    pub(crate) accept: Option<ContentType>,
    pub(crate) accept_encoding: Option<Vec<ContentEncoding>>,
    pub(crate) cache_control: Option<Vec<CacheControl>>,
    pub(crate) allows_cellular_access: bool,
    pub(crate) method: Method,
    pub(crate) headers: HeaderMap,
    pub(crate) body: RequestBody,
    pub(crate) handle_cookies: bool,
    pub(crate) use_pipelining: bool,
    pub(crate) authorization: Authorization,
}

impl Request {
    /// A `GET` request for `url` with default settings.
    pub fn new(url: Uri) -> Self {
        Builder::from_uri(url).build()
    }

    /// A `GET` request for an address given as a string.
    pub fn get(url: &str) -> Result<Self, Error> {
        Ok(Builder::parse(url)?.build())
    }

    /// A builder for a request to `url`.
    pub fn builder(url: Uri) -> Builder {
        Builder::from_uri(url)
    }

    /// A builder seeded with every field of this request.
    pub fn to_builder(&self) -> Builder {
        Builder::from(self)
    }

    /// The target address.
    pub fn url(&self) -> &Uri {
        &self.url
    }

    /// The cache policy.
    pub fn cache(&self) -> CachePolicy {
        self.cache
    }

    /// The transfer timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// The address of the top-level document, used for cookie policy.
    pub fn main_document_url(&self) -> Option<&Uri> {
        self.main_document_url.as_ref()
    }

    /// The kind of traffic this request carries.
    pub fn service_type(&self) -> ServiceType {
        self.service_type
    }

    /// The content type of the body.
    pub fn content_type(&self) -> Option<&ContentType> {
        self.content_type.as_ref()
    }

    /// The length of the body.
    pub fn content_length(&self) -> Option<u64> {
        self.content_length
    }

    /// The accepted response content type.
    pub fn accept(&self) -> Option<&ContentType> {
        self.accept.as_ref()
    }

    /// The accepted response encodings, in order.
    pub fn accept_encoding(&self) -> Option<&[ContentEncoding]> {
        self.accept_encoding.as_deref()
    }

    /// The cache control directives, in order.
    pub fn cache_control(&self) -> Option<&[CacheControl]> {
        self.cache_control.as_deref()
    }

    /// Whether the transfer may use a cellular interface.
    pub fn allows_cellular_access(&self) -> bool {
        self.allows_cellular_access
    }

    /// The HTTP method.
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Additional headers.
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// The request body.
    pub fn body(&self) -> &RequestBody {
        &self.body
    }

    /// Whether cookies are sent and stored.
    pub fn handle_cookies(&self) -> bool {
        self.handle_cookies
    }

    /// Whether the transfer may use HTTP pipelining.
    pub fn use_pipelining(&self) -> bool {
        self.use_pipelining
    }

    /// The `Authorization` credentials.
    pub fn authorization(&self) -> &Authorization {
        &self.authorization
    }

    /// An equivalent `curl` command line, for debugging.
    pub fn curl(&self) -> String {
        let mut components = vec!["$ curl -i".to_owned()];

        if self.method != Method::GET {
            components.push(format!("-X {}", self.method));
        }

        for (name, value) in &self.headers {
            if [
                http::header::CONTENT_TYPE,
                http::header::CONTENT_LENGTH,
                http::header::ACCEPT,
                http::header::ACCEPT_ENCODING,
                http::header::CACHE_CONTROL,
            ]
            .contains(name)
            {
                continue;
            }
            if let Ok(value) = value.to_str() {
                components.push(format!("-H \"{}: {}\"", name, value));
            }
        }

        if let Some(content_type) = &self.content_type {
            components.push(format!("-H \"Content-Type: {content_type}\""));
        }
        if let Some(length) = self.content_length {
            components.push(format!("-H \"Content-Length: {length}\""));
        }
        if let Some(accept) = &self.accept {
            components.push(format!("-H \"Accept: {accept}\""));
        }
        if let Some(encodings) = &self.accept_encoding {
            components.push(format!("-H \"Accept-Encoding: {}\"", join(encodings)));
        }
        if let Some(directives) = &self.cache_control {
            components.push(format!("-H \"Cache-Control: {}\"", join(directives)));
        }
        if let Some(value) = self.authorization.header_value() {
            components.push(format!("-H \"Authorization: {value}\""));
        }
        if let Some(text) = self.body.bytes().and_then(|b| std::str::from_utf8(b).ok()) {
            let escaped = text.replace("\\\"", "\\\\\"").replace('"', "\\\"");
            components.push(format!("-d \"{escaped}\""));
        }

        components.push(format!("\"{}\"", self.url));
        components.join(" \\\n\t")
    }
}

pub(crate) fn join<T: fmt::Display>(items: &[T]) -> String {
    items
        .iter()
        .map(|item| item.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

impl fmt::Display for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.url)
    }
}

impl PartialEq for Request {
    fn eq(&self, other: &Self) -> bool {
        self.url == other.url && self.method == other.method
    }
}

impl Eq for Request {}

impl Hash for Request {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.url.hash(state);
        self.method.hash(state);
    }
}
