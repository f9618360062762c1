use http::header::{self, HeaderName, HeaderValue};
use http::{Extensions, HeaderMap, StatusCode, Uri};

use super::{Payload, Response};
use crate::task::TaskId;
use crate::transport::RawResponse;

/// A response under construction, as seen by response interceptors.
#[derive(Debug, Clone)]
pub struct Builder {
    url: Option<Uri>,
    mime_type: Option<String>,
    content_length: i64,
    text_encoding: Option<String>,
    filename: Option<String>,
    status: Option<StatusCode>,
    headers: HeaderMap,
    status_description: Option<String>,
    user_info: Extensions,
    task: Option<TaskId>,
    payload: Option<Payload>,
}

impl Builder {
    /// An empty builder for a response from `url`.
    pub fn new(url: Option<Uri>) -> Self {
        Builder {
            url,
            mime_type: None,
            content_length: -1,
            text_encoding: None,
            filename: None,
            status: None,
            headers: HeaderMap::new(),
            status_description: None,
            user_info: Extensions::new(),
            task: None,
            payload: None,
        }
    }

    /// A builder seeded from what a transport received.
    ///
    /// The mime type and text encoding come from `Content-Type`, the file name from
    /// `Content-Disposition` or else the last path segment, and the length from
    /// `Content-Length`.
    pub fn from_raw(raw: &RawResponse, payload: Option<Payload>, task: Option<TaskId>) -> Self {
        let mut builder = Builder::new(raw.url.clone());
        let headers = &raw.headers;

        if let Some((mime, charset)) = headers
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(split_content_type)
        {
            builder.mime_type = Some(mime);
            builder.text_encoding = charset;
        }

        builder.filename = headers
            .get(header::CONTENT_DISPOSITION)
            .and_then(|v| v.to_str().ok())
            .and_then(disposition_filename)
            .or_else(|| raw.url.as_ref().and_then(last_segment));

        builder.content_length = headers
            .get(header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(-1);

        builder.status = raw.status;
        builder.status_description = raw
            .status
            .and_then(|s| s.canonical_reason())
            .map(str::to_owned);
        builder.headers = headers.clone();
        builder.task = task;
        builder.payload = payload;
        builder
    }

    /// The status, if one has been set.
    pub fn status(&self) -> Option<StatusCode> {
        self.status
    }

    /// The headers.
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// The payload, if one has been set.
    pub fn payload(&self) -> Option<&Payload> {
        self.payload.as_ref()
    }

    /// Set the address.
    pub fn set_url(&mut self, url: Option<Uri>) -> &mut Self {
        self.url = url;
        self
    }

    /// Set the media type.
    pub fn set_mime_type(&mut self, mime_type: Option<String>) -> &mut Self {
        self.mime_type = mime_type;
        self
    }

    /// Set the content length. Negative values mean unknown.
    pub fn set_content_length(&mut self, content_length: i64) -> &mut Self {
        self.content_length = content_length;
        self
    }

    /// Set the text encoding.
    pub fn set_text_encoding(&mut self, encoding: Option<String>) -> &mut Self {
        self.text_encoding = encoding;
        self
    }

    /// Set the suggested file name.
    pub fn set_filename(&mut self, filename: Option<String>) -> &mut Self {
        self.filename = filename;
        self
    }

    /// Set the HTTP status.
    pub fn set_status(&mut self, status: Option<StatusCode>) -> &mut Self {
        self.status = status;
        self
    }

    /// Replace the headers.
    pub fn set_headers(&mut self, headers: HeaderMap) -> &mut Self {
        self.headers = headers;
        self
    }

    /// Set a single header. Invalid names or values are ignored.
    pub fn add_header(&mut self, name: &str, value: &str) -> &mut Self {
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            (Ok(name), Ok(value)) => {
                self.headers.insert(name, value);
            }
            _ => tracing::debug!(%name, "ignoring invalid header"),
        }
        self
    }

    /// Set the status description.
    pub fn set_status_description(&mut self, description: Option<String>) -> &mut Self {
        self.status_description = description;
        self
    }

    /// Attach a value for later retrieval from [`Response::user_info`].
    pub fn insert_user_info<T>(&mut self, value: T) -> &mut Self
    where
        T: Clone + Send + Sync + 'static,
    {
        self.user_info.insert(value);
        self
    }

    /// Replace the payload.
    pub fn set_payload(&mut self, payload: Option<Payload>) -> &mut Self {
        self.payload = payload;
        self
    }

    /// Produce the immutable response.
    pub fn build(&self) -> Response {
        Response {
            url: self.url.clone(),
            mime_type: self.mime_type.clone(),
            content_length: u64::try_from(self.content_length).ok(),
            text_encoding: self.text_encoding.clone(),
            filename: self.filename.clone(),
            status: self.status,
            headers: self.headers.clone(),
            status_description: self.status_description.clone(),
            user_info: self.user_info.clone(),
            task: self.task,
            payload: self.payload.clone(),
        }
    }
}

impl From<&Response> for Builder {
    fn from(response: &Response) -> Self {
        Builder {
            url: response.url.clone(),
            mime_type: response.mime_type.clone(),
            content_length: response
                .content_length
                .and_then(|l| i64::try_from(l).ok())
                .unwrap_or(-1),
            text_encoding: response.text_encoding.clone(),
            filename: response.filename.clone(),
            status: response.status,
            headers: response.headers.clone(),
            status_description: response.status_description.clone(),
            user_info: response.user_info.clone(),
            task: response.task,
            payload: response.payload.clone(),
        }
    }
}

fn split_content_type(value: &str) -> (String, Option<String>) {
    let mut params = value.split(';');
    let mime = params.next().unwrap_or_default().trim().to_owned();
    let charset = params.find_map(|param| {
        let (name, value) = param.split_once('=')?;
        name.trim()
            .eq_ignore_ascii_case("charset")
            .then(|| value.trim().trim_matches('"').to_owned())
    });
    (mime, charset)
}

fn disposition_filename(value: &str) -> Option<String> {
    value.split(';').find_map(|param| {
        let (name, value) = param.split_once('=')?;
        name.trim()
            .eq_ignore_ascii_case("filename")
            .then(|| value.trim().trim_matches('"').to_owned())
            .filter(|name| !name.is_empty())
    })
}

fn last_segment(url: &Uri) -> Option<String> {
    url.path()
        .rsplit('/')
        .next()
        .filter(|segment| !segment.is_empty())
        .map(str::to_owned)
}
