//! Mutable staging area for [`Request`]s.

use std::time::Duration;

use bytes::Bytes;
use http::header::{HeaderName, HeaderValue};
use http::uri::PathAndQuery;
use http::{HeaderMap, Method, Uri};
use serde::Serialize;

use super::query::{self, QueryParameters, QueryValue};
use super::{
    Authorization, BodyEncoder, BodyStream, CacheControl, CachePolicy, ContentEncoding,
    ContentType, MultipartForm, Request, RequestBody, ServiceType, DEFAULT_TIMEOUT,
};
use crate::error::{Error, ErrorCode};

/// A request under construction.
///
/// Every field is optional; [`Builder::build`] fills in defaults. Setters return the
/// builder so calls can be chained.
///
/// Setting a body (of any kind) upgrades the method to `POST` and fills in the content
/// type and length, unless those were already set. The most recent body wins, and an
/// in-memory body and a stream are never both present.
#[derive(Debug, Clone)]
pub struct Builder {
    url: Uri,
    cache: Option<CachePolicy>,
    timeout: Option<Duration>,
    main_document_url: Option<Uri>,
    service_type: Option<ServiceType>,
    content_type: Option<ContentType>,
    content_length: Option<u64>,
    accept: Option<ContentType>,
    accept_encoding: Option<Vec<ContentEncoding>>,
    cache_control: Option<Vec<CacheControl>>,
    allows_cellular_access: Option<bool>,
    method: Option<Method>,
    headers: Option<HeaderMap>,
    body: Option<Bytes>,
    body_stream: Option<BodyStream>,
    handle_cookies: Option<bool>,
    use_pipelining: Option<bool>,
    authorization: Option<Authorization>,
}

impl Builder {
    /// A builder for a request to `url`.
    pub fn from_uri(url: Uri) -> Self {
        Builder {
            url,
            cache: None,
            timeout: None,
            main_document_url: None,
            service_type: None,
            content_type: None,
            content_length: None,
            accept: None,
            accept_encoding: None,
            cache_control: None,
            allows_cellular_access: None,
            method: None,
            headers: None,
            body: None,
            body_stream: None,
            handle_cookies: None,
            use_pipelining: None,
            authorization: None,
        }
    }

    /// A builder for an address given as a string.
    pub fn parse(url: &str) -> Result<Self, Error> {
        let url = url.parse::<Uri>().map_err(|error| {
            Error::from_transport_error(error).with_code(ErrorCode::BadUrl)
        })?;
        Ok(Self::from_uri(url))
    }

    /// The target address.
    pub fn url(&self) -> &Uri {
        &self.url
    }

    /// The method, if one has been set. `GET` is never stored.
    pub fn method(&self) -> Option<&Method> {
        self.method.as_ref()
    }

    /// The content type, if one has been set.
    pub fn content_type(&self) -> Option<&ContentType> {
        self.content_type.as_ref()
    }

    /// The content length, if one has been set.
    pub fn content_length(&self) -> Option<u64> {
        self.content_length
    }

    /// The headers, if any have been set.
    pub fn headers(&self) -> Option<&HeaderMap> {
        self.headers.as_ref()
    }

    /// The in-memory body, if one has been set.
    pub fn body(&self) -> Option<&Bytes> {
        self.body.as_ref()
    }

    /// The accepted encodings, if any have been set.
    pub fn accept_encodings(&self) -> Option<&[ContentEncoding]> {
        self.accept_encoding.as_deref()
    }

    /// The cache control directives, if any have been set.
    pub fn cache_controls(&self) -> Option<&[CacheControl]> {
        self.cache_control.as_deref()
    }

    /// Replace the target address.
    pub fn set_url(&mut self, url: Uri) -> &mut Self {
        self.url = url;
        self
    }

    /// Set the cache policy.
    pub fn set_cache(&mut self, cache: CachePolicy) -> &mut Self {
        self.cache = Some(cache);
        self
    }

    /// Set the transfer timeout.
    pub fn set_timeout(&mut self, timeout: Duration) -> &mut Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set the address of the top-level document.
    pub fn set_main_document_url(&mut self, url: Option<Uri>) -> &mut Self {
        self.main_document_url = url;
        self
    }

    /// Set the kind of traffic this request carries.
    pub fn set_service_type(&mut self, service_type: ServiceType) -> &mut Self {
        self.service_type = Some(service_type);
        self
    }

    /// Set (or clear) the content type.
    pub fn set_content_type(&mut self, content_type: Option<ContentType>) -> &mut Self {
        self.content_type = content_type;
        self
    }

    /// Set (or clear) the content length.
    pub fn set_content_length(&mut self, content_length: Option<u64>) -> &mut Self {
        self.content_length = content_length;
        self
    }

    /// Set the accepted response content type.
    pub fn set_accept(&mut self, accept: Option<ContentType>) -> &mut Self {
        self.accept = accept;
        self
    }

    /// Replace the accepted encodings.
    pub fn set_accept_encodings(&mut self, encodings: Option<Vec<ContentEncoding>>) -> &mut Self {
        self.accept_encoding = encodings;
        self
    }

    /// Append an accepted encoding, moving it to the end if it is already present.
    pub fn add_accept_encoding(&mut self, encoding: ContentEncoding) -> &mut Self {
        move_to_tail(self.accept_encoding.get_or_insert_with(Vec::new), encoding);
        self
    }

    /// Replace the cache control directives.
    pub fn set_cache_controls(&mut self, directives: Option<Vec<CacheControl>>) -> &mut Self {
        self.cache_control = directives;
        self
    }

    /// Append a cache control directive, moving it to the end if it is already present.
    pub fn add_cache_control(&mut self, directive: CacheControl) -> &mut Self {
        move_to_tail(self.cache_control.get_or_insert_with(Vec::new), directive);
        self
    }

    /// Set whether the transfer may use a cellular interface.
    pub fn set_allows_cellular_access(&mut self, allowed: bool) -> &mut Self {
        self.allows_cellular_access = Some(allowed);
        self
    }

    /// Set the HTTP method.
    pub fn set_method(&mut self, method: Method) -> &mut Self {
        self.method = (method != Method::GET).then_some(method);
        self
    }

    /// Replace the additional headers.
    pub fn set_headers(&mut self, headers: Option<HeaderMap>) -> &mut Self {
        self.headers = headers;
        self
    }

    /// Set a single header, replacing any previous value.
    ///
    /// Names or values which are not valid in HTTP are ignored.
    pub fn add_header(&mut self, name: &str, value: &str) -> &mut Self {
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            (Ok(name), Ok(value)) => {
                self.headers
                    .get_or_insert_with(HeaderMap::new)
                    .insert(name, value);
            }
            _ => tracing::debug!(%name, "ignoring invalid header"),
        }
        self
    }

    fn apply_body(&mut self, body: Bytes, content_type: ContentType) -> &mut Self {
        self.body_stream = None;
        if self.content_type.is_none() {
            self.content_type = Some(content_type);
        }
        if self.method.is_none() {
            self.method = Some(Method::POST);
        }
        if self.content_length.is_none() {
            self.content_length = Some(body.len() as u64);
        }
        self.body = Some(body);
        self
    }

    /// Set a binary body.
    pub fn set_body(&mut self, body: impl Into<Bytes>) -> &mut Self {
        self.apply_body(body.into(), ContentType::Binary)
    }

    /// Set a streamed body. The content length is left unset.
    pub fn set_body_stream(&mut self, stream: BodyStream) -> &mut Self {
        self.body = None;
        if self.content_type.is_none() {
            self.content_type = Some(ContentType::Binary);
        }
        if self.method.is_none() {
            self.method = Some(Method::POST);
        }
        self.body_stream = Some(stream);
        self
    }

    /// Remove any body or body stream. Content type, length and method are kept.
    pub fn clear_body(&mut self) -> &mut Self {
        self.body = None;
        self.body_stream = None;
        self
    }

    /// Set a UTF-8 text body.
    pub fn set_string_body(&mut self, body: impl Into<String>) -> &mut Self {
        self.apply_body(Bytes::from(body.into()), ContentType::Text)
    }

    /// Set a `application/x-www-form-urlencoded` body.
    pub fn set_form_parameters(&mut self, parameters: &QueryParameters) -> &mut Self {
        self.apply_body(Bytes::from(query::encode(parameters)), ContentType::FormUrlEncoded)
    }

    /// Set a JSON body serialized from `value`.
    ///
    /// On failure the builder is left unchanged.
    pub fn set_json<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<&mut Self, Error> {
        let body = serde_json::to_vec(value).map_err(encoding_failed)?;
        Ok(self.apply_body(Bytes::from(body), ContentType::Json))
    }

    /// Set a pretty-printed JSON body from a dynamic value.
    pub fn set_json_value(&mut self, value: &serde_json::Value) -> Result<&mut Self, Error> {
        let body = serde_json::to_vec_pretty(value).map_err(encoding_failed)?;
        Ok(self.apply_body(Bytes::from(body), ContentType::Json))
    }

    /// Set a property list body produced by `encoder`.
    ///
    /// The content type defaults to `application/x-plist` whatever the encoder reports.
    pub fn set_property_list<E: BodyEncoder + ?Sized>(
        &mut self,
        encoder: &E,
    ) -> Result<&mut Self, Error> {
        let body = encoder.encode().map_err(encoding_failed)?;
        Ok(self.apply_body(body, ContentType::PropertyList))
    }

    /// Set a multipart form body.
    ///
    /// The form's content type (with its boundary) and length always replace any
    /// previously set values, since the boundary must match the body.
    pub fn set_multipart(&mut self, form: &MultipartForm) -> Result<&mut Self, Error> {
        let body = BodyEncoder::encode(form).map_err(encoding_failed)?;
        self.content_type = Some(BodyEncoder::content_type(form));
        self.content_length = Some(body.len() as u64);
        Ok(self.apply_body(body, ContentType::Binary))
    }

    /// Set a body produced by a custom encoder, using its content type as the default.
    pub fn set_custom_body<E: BodyEncoder + ?Sized>(
        &mut self,
        encoder: &E,
    ) -> Result<&mut Self, Error> {
        let body = encoder.encode().map_err(encoding_failed)?;
        Ok(self.apply_body(body, encoder.content_type()))
    }

    /// Set an already encoded body with its content type as the default.
    pub fn set_custom_bytes(
        &mut self,
        body: impl Into<Bytes>,
        content_type: ContentType,
    ) -> &mut Self {
        self.apply_body(body.into(), content_type)
    }

    /// Set whether cookies are sent and stored.
    pub fn set_handle_cookies(&mut self, handle: bool) -> &mut Self {
        self.handle_cookies = Some(handle);
        self
    }

    /// Set whether the transfer may use HTTP pipelining.
    pub fn set_use_pipelining(&mut self, pipelining: bool) -> &mut Self {
        self.use_pipelining = Some(pipelining);
        self
    }

    /// Set the `Authorization` credentials.
    pub fn set_authorization(&mut self, authorization: Authorization) -> &mut Self {
        self.authorization = Some(authorization);
        self
    }

    /// Use HTTP basic authentication.
    pub fn set_basic_authorization(
        &mut self,
        user: impl Into<String>,
        password: impl Into<String>,
    ) -> &mut Self {
        self.set_authorization(Authorization::Basic {
            user: user.into(),
            password: password.into(),
        })
    }

    /// Use bearer token authentication.
    pub fn set_bearer_authorization(&mut self, token: impl Into<String>) -> &mut Self {
        self.set_authorization(Authorization::Bearer {
            token: token.into(),
        })
    }

    /// Send an `Authorization` header verbatim.
    pub fn set_custom_authorization(&mut self, value: impl Into<String>) -> &mut Self {
        self.set_authorization(Authorization::Custom(value.into()))
    }

    /// Replace the address's query with the encoded parameters.
    ///
    /// An empty parameter set leaves the query untouched.
    pub fn set_url_parameters(&mut self, parameters: &QueryParameters) -> &mut Self {
        if !parameters.is_empty() {
            self.rewrite_query(Some(query::encode(parameters)));
        }
        self
    }

    /// Remove the address's query, then apply the encoded parameters.
    pub fn set_url_parameters_replacing(&mut self, parameters: &QueryParameters) -> &mut Self {
        let encoded = (!parameters.is_empty()).then(|| query::encode(parameters));
        self.rewrite_query(encoded);
        self
    }

    /// Append a single parameter to the address's query.
    pub fn add_url_parameter(&mut self, key: &str, value: impl Into<QueryValue>) -> &mut Self {
        let mut parameters = QueryParameters::new();
        parameters.insert(key.to_owned(), value.into());
        let added = query::encode(&parameters);
        if added.is_empty() {
            return self;
        }

        let encoded = match self.url.query() {
            Some(existing) if !existing.is_empty() => format!("{existing}&{added}"),
            _ => added,
        };
        self.rewrite_query(Some(encoded));
        self
    }

    fn rewrite_query(&mut self, query: Option<String>) {
        let path = match self.url.path() {
            "" => "/",
            path => path,
        };
        let path_and_query = match query {
            Some(query) => format!("{path}?{query}"),
            None => path.to_owned(),
        };

        let mut parts = self.url.clone().into_parts();
        match PathAndQuery::try_from(path_and_query) {
            Ok(path_and_query) => parts.path_and_query = Some(path_and_query),
            Err(error) => {
                tracing::debug!(%error, "query does not form a valid address");
                return;
            }
        }
        match Uri::from_parts(parts) {
            Ok(url) => self.url = url,
            Err(error) => tracing::debug!(%error, "query does not form a valid address"),
        }
    }

    /// Produce the immutable request, filling in defaults for unset fields.
    pub fn build(&self) -> Request {
        let body = match (&self.body, &self.body_stream) {
            (Some(bytes), _) => RequestBody::Bytes(bytes.clone()),
            (None, Some(stream)) => RequestBody::Stream(stream.clone()),
            (None, None) => RequestBody::Empty,
        };

        Request {
            url: self.url.clone(),
            cache: self.cache.unwrap_or_default(),
            timeout: self.timeout.unwrap_or(DEFAULT_TIMEOUT),
            main_document_url: self.main_document_url.clone(),
            service_type: self.service_type.unwrap_or_default(),
            content_type: self.content_type.clone(),
            content_length: self.content_length,
            accept: self.accept.clone(),
            accept_encoding: self.accept_encoding.clone(),
            cache_control: self.cache_control.clone(),
            allows_cellular_access: self.allows_cellular_access.unwrap_or(true),
            method: self.method.clone().unwrap_or(Method::GET),
            headers: self.headers.clone().unwrap_or_default(),
            body,
            handle_cookies: self.handle_cookies.unwrap_or(true),
            use_pipelining: self.use_pipelining.unwrap_or(true),
            authorization: self.authorization.clone().unwrap_or_default(),
        }
    }
}

impl From<&Request> for Builder {
    fn from(request: &Request) -> Self {
        let (body, body_stream) = match &request.body {
            RequestBody::Empty => (None, None),
            RequestBody::Bytes(bytes) => (Some(bytes.clone()), None),
            RequestBody::Stream(stream) => (None, Some(stream.clone())),
        };

        Builder {
            url: request.url.clone(),
            cache: Some(request.cache),
            timeout: Some(request.timeout),
            main_document_url: request.main_document_url.clone(),
            service_type: Some(request.service_type),
            content_type: request.content_type.clone(),
            content_length: request.content_length,
            accept: request.accept.clone(),
            accept_encoding: request.accept_encoding.clone(),
            cache_control: request.cache_control.clone(),
            allows_cellular_access: Some(request.allows_cellular_access),
            method: (request.method != Method::GET).then(|| request.method.clone()),
            headers: (!request.headers.is_empty()).then(|| request.headers.clone()),
            body,
            body_stream,
            handle_cookies: Some(request.handle_cookies),
            use_pipelining: Some(request.use_pipelining),
            authorization: Some(request.authorization.clone()),
        }
    }
}

impl From<Request> for Builder {
    fn from(request: Request) -> Self {
        Builder::from(&request)
    }
}

fn move_to_tail<T: PartialEq>(items: &mut Vec<T>, item: T) {
    items.retain(|existing| *existing != item);
    items.push(item);
}

fn encoding_failed<E>(error: E) -> Error
where
    E: Into<crate::BoxError>,
{
    Error::from_parse_error(error).with_code(ErrorCode::EncodingFailed)
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::BoxError;

    fn builder() -> Builder {
        Builder::parse("https://api.example.com/items").unwrap()
    }

    #[test]
    fn url_parameters_are_sorted_and_escaped() {
        let mut parameters = QueryParameters::new();
        parameters.insert("q".into(), "a b".into());
        parameters.insert("ids".into(), vec![1, 2].into());

        let mut builder = builder();
        builder.set_url_parameters(&parameters);
        assert_eq!(builder.url().query(), Some("ids%5B%5D=1&ids%5B%5D=2&q=a%20b"));
        assert_eq!(builder.url().path(), "/items");
    }

    #[test]
    fn url_parameters_append_and_replace() {
        let mut builder = Builder::parse("https://example.com/search?page=1").unwrap();
        builder.add_url_parameter("sort", "new");
        assert_eq!(builder.url().query(), Some("page=1&sort=new"));

        let mut replacement = QueryParameters::new();
        replacement.insert("page".into(), 2.into());
        builder.set_url_parameters_replacing(&replacement);
        assert_eq!(builder.url().query(), Some("page=2"));

        builder.set_url_parameters_replacing(&QueryParameters::new());
        assert_eq!(builder.url().query(), None);
        assert_eq!(builder.url().to_string(), "https://example.com/search");
    }

    #[test]
    fn body_defaults_to_post_binary_with_length() {
        let mut builder = builder();
        builder.set_body(vec![1u8, 2, 3, 4]);
        let request = builder.build();

        assert_eq!(request.method(), Method::POST);
        assert_eq!(request.content_type(), Some(&ContentType::Binary));
        assert_eq!(request.content_length(), Some(4));
    }

    #[test]
    fn explicit_content_type_and_method_win() {
        let mut builder = builder();
        builder
            .set_method(Method::PUT)
            .set_content_type(Some(ContentType::Json))
            .set_string_body("{}");
        let request = builder.build();

        assert_eq!(request.method(), Method::PUT);
        assert_eq!(request.content_type(), Some(&ContentType::Json));
        assert_eq!(request.content_length(), Some(2));
    }

    #[test]
    fn body_and_stream_are_exclusive() {
        let mut builder = builder();
        builder.set_body_stream(BodyStream::once(crate::Body::from("streamed")));
        builder.set_body("bytes");
        let request = builder.build();
        assert!(request.body().stream().is_none());
        assert_eq!(request.body().bytes().map(|b| &b[..]), Some(&b"bytes"[..]));

        let mut builder = request.to_builder();
        builder.set_body_stream(BodyStream::once(crate::Body::from("streamed")));
        let request = builder.build();
        assert!(request.body().bytes().is_none());
        assert!(request.body().stream().is_some());
    }

    #[test]
    fn accept_encoding_dedups_to_tail() {
        let mut builder = builder();
        builder
            .add_accept_encoding(ContentEncoding::Gzip)
            .add_accept_encoding(ContentEncoding::Brotli)
            .add_accept_encoding(ContentEncoding::Gzip);
        assert_eq!(
            builder.accept_encodings(),
            Some(&[ContentEncoding::Brotli, ContentEncoding::Gzip][..])
        );

        builder
            .add_cache_control(CacheControl::NoCache)
            .add_cache_control(CacheControl::MaxAge(5))
            .add_cache_control(CacheControl::NoCache);
        assert_eq!(
            builder.cache_controls(),
            Some(&[CacheControl::MaxAge(5), CacheControl::NoCache][..])
        );
    }

    struct Failing;

    impl BodyEncoder for Failing {
        fn content_type(&self) -> ContentType {
            ContentType::Xml
        }

        fn encode(&self) -> Result<Bytes, BoxError> {
            Err("unencodable".into())
        }
    }

    #[test]
    fn failed_encoding_leaves_builder_unchanged() {
        let mut builder = builder();
        builder.set_string_body("before");

        let error = builder.set_custom_body(&Failing).unwrap_err();
        assert!(error.is_parse());
        assert_eq!(error.code(), Some(ErrorCode::EncodingFailed));
        assert_eq!(builder.body().map(|b| &b[..]), Some(&b"before"[..]));
        assert_eq!(builder.content_type(), Some(&ContentType::Text));
    }

    #[test]
    fn multipart_overrides_content_type() {
        let form = MultipartForm::new().text("a", "b");
        let mut builder = builder();
        builder.set_content_type(Some(ContentType::Json));
        builder.set_multipart(&form).unwrap();

        let request = builder.build();
        assert_eq!(
            request.content_type().map(ContentType::as_str),
            Some(format!("multipart/form-data; boundary={}", form.boundary()).as_str())
        );
        assert_eq!(request.content_length(), Some(form.encode().len() as u64));
    }

    #[test]
    fn json_and_form_bodies() {
        #[derive(Serialize)]
        struct Item {
            name: &'static str,
        }

        let mut builder = builder();
        builder.set_json(&Item { name: "leaf" }).unwrap();
        let request = builder.build();
        assert_eq!(request.content_type(), Some(&ContentType::Json));
        assert_eq!(request.body().bytes().map(|b| &b[..]), Some(&br#"{"name":"leaf"}"#[..]));

        let mut form = QueryParameters::new();
        form.insert("a".into(), "x y".into());
        let mut builder = self::builder();
        builder.set_form_parameters(&form);
        let request = builder.build();
        assert_eq!(request.content_type(), Some(&ContentType::FormUrlEncoded));
        assert_eq!(request.body().bytes().map(|b| &b[..]), Some(&b"a=x%20y"[..]));
    }

    #[test]
    fn round_trip_through_builder() {
        let mut builder = builder();
        builder
            .set_timeout(Duration::from_secs(5))
            .set_accept(Some(ContentType::Json))
            .set_basic_authorization("u", "p")
            .add_header("x-trace", "1");
        let request = builder.build();
        let rebuilt = request.to_builder().build();

        assert_eq!(rebuilt, request);
        assert_eq!(rebuilt.timeout(), request.timeout());
        assert_eq!(rebuilt.accept(), request.accept());
        assert_eq!(rebuilt.authorization(), request.authorization());
        assert_eq!(rebuilt.headers(), request.headers());
        assert!(request.to_builder().method().is_none());
    }

    #[test]
    fn invalid_address_is_bad_url() {
        let error = Builder::parse("not a url").unwrap_err();
        assert_eq!(error.code(), Some(ErrorCode::BadUrl));
    }
}
