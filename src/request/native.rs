//! Conversion between [`Request`] and the `http::Request` handed to transports.

use std::time::Duration;

use http::header::{self, HeaderValue};
use http::{HeaderMap, Uri};

use super::{
    join, Authorization, BodyStream, Builder, CacheControl, CachePolicy, ContentEncoding,
    ContentType, Request, ServiceType,
};
use crate::body::Body;

/// Transfer settings which have no HTTP header representation.
///
/// Carried in the extensions of every `http::Request` submitted to a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferOptions {
    /// Cache policy.
    pub cache: CachePolicy,
    /// Transfer timeout.
    pub timeout: Duration,
    /// Address of the top-level document.
    pub main_document_url: Option<Uri>,
    /// Kind of traffic.
    pub service_type: ServiceType,
    /// Whether a cellular interface may be used.
    pub allows_cellular_access: bool,
    /// Whether cookies are sent and stored.
    pub handle_cookies: bool,
    /// Whether HTTP pipelining may be used.
    pub use_pipelining: bool,
}

impl Default for TransferOptions {
    fn default() -> Self {
        TransferOptions {
            cache: CachePolicy::default(),
            timeout: super::DEFAULT_TIMEOUT,
            main_document_url: None,
            service_type: ServiceType::default(),
            allows_cellular_access: true,
            handle_cookies: true,
            use_pipelining: true,
        }
    }
}

fn insert(headers: &mut HeaderMap, name: header::HeaderName, value: &str) {
    match HeaderValue::from_str(value) {
        Ok(value) => {
            headers.insert(name, value);
        }
        Err(_) => tracing::debug!(%name, "skipping header with invalid value"),
    }
}

impl Request {
    /// The transport-native form of this request.
    ///
    /// Typed fields are written as headers, replacing any header of the same name.
    /// A streamed body is opened anew on every call.
    pub fn to_http(&self) -> http::Request<Body> {
        let mut request = http::Request::new(self.body.open());
        *request.method_mut() = self.method.clone();
        *request.uri_mut() = self.url.clone();

        let headers = request.headers_mut();
        headers.extend(self.headers.clone());
        if let Some(content_type) = &self.content_type {
            insert(headers, header::CONTENT_TYPE, content_type.as_str());
        }
        if let Some(length) = self.content_length {
            headers.insert(header::CONTENT_LENGTH, HeaderValue::from(length));
        }
        if let Some(accept) = &self.accept {
            insert(headers, header::ACCEPT, accept.as_str());
        }
        if let Some(encodings) = &self.accept_encoding {
            insert(headers, header::ACCEPT_ENCODING, &join(encodings));
        }
        if let Some(directives) = &self.cache_control {
            insert(headers, header::CACHE_CONTROL, &join(directives));
        }
        if let Some(value) = self.authorization.header_value() {
            insert(headers, header::AUTHORIZATION, &value);
        }

        request.extensions_mut().insert(TransferOptions {
            cache: self.cache,
            timeout: self.timeout,
            main_document_url: self.main_document_url.clone(),
            service_type: self.service_type,
            allows_cellular_access: self.allows_cellular_access,
            handle_cookies: self.handle_cookies,
            use_pipelining: self.use_pipelining,
        });
        request
    }
}

fn text<'a>(headers: &'a HeaderMap, name: &header::HeaderName) -> Option<&'a str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}

impl Builder {
    /// A builder seeded from a transport-native request.
    ///
    /// Well-known headers are parsed back into typed fields; unknown encodings are dropped.
    pub fn from_http(request: http::Request<Body>) -> Self {
        let (parts, body) = request.into_parts();
        let mut builder = Builder::from_uri(parts.uri);
        let options = parts
            .extensions
            .get::<TransferOptions>()
            .cloned()
            .unwrap_or_default();

        builder
            .set_cache(options.cache)
            .set_timeout(options.timeout)
            .set_main_document_url(options.main_document_url)
            .set_service_type(options.service_type)
            .set_allows_cellular_access(options.allows_cellular_access)
            .set_handle_cookies(options.handle_cookies)
            .set_use_pipelining(options.use_pipelining);

        let headers = &parts.headers;
        builder
            .set_accept(text(headers, &header::ACCEPT).map(ContentType::parse))
            .set_accept_encodings(text(headers, &header::ACCEPT_ENCODING).map(|value| {
                value
                    .split(',')
                    .filter_map(ContentEncoding::parse)
                    .collect()
            }))
            .set_cache_controls(
                text(headers, &header::CACHE_CONTROL)
                    .map(|value| value.split(',').map(CacheControl::parse).collect()),
            );
        if let Some(value) = text(headers, &header::AUTHORIZATION) {
            builder.set_authorization(Authorization::parse(value));
        }

        match body.try_into_bytes() {
            Ok(Some(bytes)) => {
                builder.set_body(bytes);
            }
            Ok(None) => {}
            Err(stream) => {
                builder.set_body_stream(BodyStream::once(stream));
            }
        }

        // Headers and method of the native request replace anything the body implied.
        builder
            .set_content_type(text(headers, &header::CONTENT_TYPE).map(ContentType::parse))
            .set_content_length(
                text(headers, &header::CONTENT_LENGTH).and_then(|value| value.parse().ok()),
            );
        builder.set_method(parts.method);
        builder.set_headers((!parts.headers.is_empty()).then_some(parts.headers));
        builder
    }
}

impl From<http::Request<Body>> for Builder {
    fn from(request: http::Request<Body>) -> Self {
        Builder::from_http(request)
    }
}

impl From<http::Request<Body>> for Request {
    fn from(request: http::Request<Body>) -> Self {
        Builder::from_http(request).build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use http::Method;

    #[test]
    fn typed_fields_become_headers() {
        let mut builder = Request::builder(Uri::from_static("https://example.com/upload"));
        builder
            .set_string_body("hello")
            .set_accept(Some(ContentType::Json))
            .add_accept_encoding(ContentEncoding::Gzip)
            .add_accept_encoding(ContentEncoding::Brotli)
            .add_cache_control(CacheControl::NoCache)
            .set_timeout(Duration::from_secs(3))
            .set_bearer_authorization("abc");
        let native = builder.build().to_http();

        let headers = native.headers();
        assert_eq!(native.method(), Method::POST);
        assert_eq!(headers[header::CONTENT_TYPE], "text/plain");
        assert_eq!(headers[header::CONTENT_LENGTH], "5");
        assert_eq!(headers[header::ACCEPT], "application/json");
        assert_eq!(headers[header::ACCEPT_ENCODING], "gzip, br");
        assert_eq!(headers[header::CACHE_CONTROL], "no-cache");
        assert_eq!(headers[header::AUTHORIZATION], "Bearer abc");
        assert_eq!(
            native.extensions().get::<TransferOptions>().map(|o| o.timeout),
            Some(Duration::from_secs(3))
        );
    }

    #[test]
    fn native_request_parses_back() {
        let native = http::Request::builder()
            .method(Method::PUT)
            .uri("https://example.com/items/1")
            .header(header::CONTENT_TYPE, "application/json")
            .header(header::ACCEPT_ENCODING, "gzip, zstd, deflate")
            .header(header::CACHE_CONTROL, "max-age=10, no-store")
            .header(header::AUTHORIZATION, "Basic dTpw")
            .body(Body::from("{}"))
            .unwrap();

        let request = Request::from(native);
        assert_eq!(request.method(), Method::PUT);
        assert_eq!(request.content_type(), Some(&ContentType::Json));
        assert_eq!(request.content_length(), None);
        assert_eq!(
            request.accept_encoding(),
            Some(&[ContentEncoding::Gzip, ContentEncoding::Deflate][..])
        );
        assert_eq!(
            request.cache_control(),
            Some(&[CacheControl::MaxAge(10), CacheControl::NoStore][..])
        );
        assert_eq!(
            request.authorization(),
            &Authorization::Basic {
                user: "u".into(),
                password: "p".into()
            }
        );
        assert_eq!(request.body().bytes().map(|b| &b[..]), Some(&b"{}"[..]));
        assert_eq!(request.timeout(), super::super::DEFAULT_TIMEOUT);
    }
}
