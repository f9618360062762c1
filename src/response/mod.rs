//! Immutable response model.

use std::fmt;
use std::path::PathBuf;

use bytes::Bytes;
use http::{Extensions, HeaderMap, StatusCode, Uri};
use serde::de::DeserializeOwned;

use crate::error::{Error, ErrorCode};
use crate::task::TaskId;
use crate::transform::{self, FromPayload};
use crate::BoxError;

mod builder;

pub use self::builder::Builder;

/// The raw result of a transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// The body, held in memory.
    Bytes(Bytes),
    /// The body, written to a file by a download.
    File(PathBuf),
}

impl From<Bytes> for Payload {
    fn from(bytes: Bytes) -> Self {
        Payload::Bytes(bytes)
    }
}

impl From<PathBuf> for Payload {
    fn from(path: PathBuf) -> Self {
        Payload::File(path)
    }
}

/// An immutable response.
///
/// Two responses are equal when they come from the same address. Responses without an
/// address are never equal to anything.
#[derive(Debug, Clone)]
pub struct Response {
    pub(crate) url: Option<Uri>,
    pub(crate) mime_type: Option<String>,
    pub(crate) content_length: Option<u64>,
    pub(crate) text_encoding: Option<String>,
    pub(crate) filename: Option<String>,
    pub(crate) status: Option<StatusCode>,
    pub(crate) headers: HeaderMap,
    pub(crate) status_description: Option<String>,
    pub(crate) user_info: Extensions,
    pub(crate) task: Option<TaskId>,
    pub(crate) payload: Option<Payload>,
}

impl Response {
    /// A builder for a response from `url`.
    pub fn builder(url: Option<Uri>) -> Builder {
        Builder::new(url)
    }

    /// A builder seeded with every field of this response.
    pub fn to_builder(&self) -> Builder {
        Builder::from(self)
    }

    /// The address the response came from.
    pub fn url(&self) -> Option<&Uri> {
        self.url.as_ref()
    }

    /// The media type, without parameters.
    pub fn mime_type(&self) -> Option<&str> {
        self.mime_type.as_deref()
    }

    /// The expected length of the body.
    pub fn content_length(&self) -> Option<u64> {
        self.content_length
    }

    /// The `charset` of the body.
    pub fn text_encoding(&self) -> Option<&str> {
        self.text_encoding.as_deref()
    }

    /// The suggested file name for the body.
    pub fn filename(&self) -> Option<&str> {
        self.filename.as_deref()
    }

    /// The HTTP status, if the transfer was HTTP.
    pub fn status(&self) -> Option<StatusCode> {
        self.status
    }

    /// The response headers.
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Human readable description of the status.
    pub fn status_description(&self) -> Option<&str> {
        self.status_description.as_deref()
    }

    /// Values attached by response interceptors.
    pub fn user_info(&self) -> &Extensions {
        &self.user_info
    }

    /// The task which produced this response.
    ///
    /// This does not keep the task alive; look it up with
    /// [`Session::task`](crate::Session::task).
    pub fn task_id(&self) -> Option<TaskId> {
        self.task
    }

    /// The raw payload.
    pub fn payload(&self) -> Option<&Payload> {
        self.payload.as_ref()
    }

    fn code(&self) -> Option<ErrorCode> {
        self.status.map(|status| ErrorCode::Status(status.as_u16()))
    }

    fn contextualize(&self, error: Error) -> Error {
        error.merge_context(self.code(), self.payload.as_ref(), None)
    }

    /// The body contents. File payloads are read from disk.
    pub fn bytes(&self) -> Result<Bytes, Error> {
        transform::bytes(self.payload.as_ref()).map_err(|e| self.contextualize(e))
    }

    /// The body as UTF-8 text.
    pub fn text(&self) -> Result<String, Error> {
        self.object()
    }

    /// Transform the payload into a typed object.
    pub fn object<T: FromPayload>(&self) -> Result<T, Error> {
        transform::object(self.payload.as_ref()).map_err(|e| self.contextualize(e))
    }

    /// Deserialize a JSON body.
    pub fn json<D: DeserializeOwned>(&self) -> Result<D, Error> {
        transform::decode(self.payload.as_ref()).map_err(|e| self.contextualize(e))
    }

    /// Decode the body with a custom decoder.
    pub fn decode_with<T, E, F>(&self, decoder: F) -> Result<T, Error>
    where
        F: FnOnce(&[u8]) -> Result<T, E>,
        E: Into<BoxError>,
    {
        transform::decode_with(self.payload.as_ref(), decoder).map_err(|e| self.contextualize(e))
    }
}

impl PartialEq for Response {
    fn eq(&self, other: &Self) -> bool {
        match (&self.url, &other.url) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Display for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::new();
        if let Some(status) = self.status {
            parts.push(status.as_u16().to_string());
        }
        if let Some(url) = &self.url {
            parts.push(url.to_string());
        }
        if let Some(description) = &self.status_description {
            parts.push(format!("({description})"));
        }
        f.write_str(&parts.join(" "))
    }
}
