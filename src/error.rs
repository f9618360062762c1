//! Error taxonomy.
//!
//! Every failure a caller can observe is an [`Error`], which comes in two kinds:
//!
//! - [`Error::Transport`] when no usable response arrived: a bad address, a timeout,
//!   lost connectivity, cancellation or a rejected authentication challenge.
//! - [`Error::Parse`] when a response (or a request body) could not be transformed:
//!   the transfer worked, but the payload could not be decoded or encoded.
//!
//! Both kinds carry an optional [`ErrorCode`], a message, the payload that was
//! available when the error happened, and the underlying cause.

use std::fmt;
use std::sync::Arc;

use http::HeaderMap;
use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::response::Payload;
use crate::transform::{self, FromPayload};
use crate::BoxError;

/// A cause shared between clones of an [`Error`].
pub type SharedError = Arc<dyn std::error::Error + Send + Sync + 'static>;

/// Numeric error codes.
///
/// Transport codes follow the numbering of the platform URL-loading error domain,
/// so that codes reported by a native transport can be passed through unchanged.
/// Parse errors raised while decoding a response carry the response's HTTP status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum ErrorCode {
    /// The cause of the failure is not known.
    Unknown,
    /// The transfer was cancelled.
    Cancelled,
    /// The address could not be parsed.
    BadUrl,
    /// The transfer did not finish in time.
    TimedOut,
    /// The address scheme or transfer kind is not supported by the transport.
    Unsupported,
    /// The host could not be reached.
    NotConnected,
    /// The requested resource is not available locally.
    ResourceUnavailable,
    /// An authentication challenge was cancelled.
    UserCancelledAuthentication,
    /// A request body could not be encoded.
    EncodingFailed,
    /// An HTTP status code.
    Status(u16),
    /// Any other code reported by a transport.
    Other(i64),
}

impl ErrorCode {
    /// The numeric value of this code.
    pub fn as_i64(&self) -> i64 {
        match self {
            ErrorCode::Unknown => -1,
            ErrorCode::Cancelled => -999,
            ErrorCode::BadUrl => -1000,
            ErrorCode::TimedOut => -1001,
            ErrorCode::Unsupported => -1002,
            ErrorCode::NotConnected => -1009,
            ErrorCode::ResourceUnavailable => -1008,
            ErrorCode::UserCancelledAuthentication => -1012,
            ErrorCode::EncodingFailed => 4866,
            ErrorCode::Status(status) => i64::from(*status),
            ErrorCode::Other(code) => *code,
        }
    }
}

impl From<i64> for ErrorCode {
    fn from(code: i64) -> Self {
        match code {
            -1 => ErrorCode::Unknown,
            -999 => ErrorCode::Cancelled,
            -1000 => ErrorCode::BadUrl,
            -1001 => ErrorCode::TimedOut,
            -1002 => ErrorCode::Unsupported,
            -1009 => ErrorCode::NotConnected,
            -1008 => ErrorCode::ResourceUnavailable,
            -1012 => ErrorCode::UserCancelledAuthentication,
            4866 => ErrorCode::EncodingFailed,
            100..=599 => ErrorCode::Status(code as u16),
            code => ErrorCode::Other(code),
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_i64())
    }
}

/// Error type for requests, transfers and decoding.
#[derive(Debug, Clone, Error)]
#[non_exhaustive]
pub enum Error {
    /// The transfer failed before a usable response was received.
    #[error("{}", describe(.message, .source.as_ref()))]
    Transport {
        /// Error code, if one is known.
        code: Option<ErrorCode>,
        /// Human readable description.
        message: String,
        /// Response headers received before the failure, if any.
        headers: Option<HeaderMap>,
        /// Payload received before the failure, if any.
        object: Option<Payload>,
        /// Underlying cause.
        #[source]
        source: Option<SharedError>,
    },

    /// A payload could not be encoded or decoded.
    #[error("{}", describe(.message, .source.as_ref()))]
    Parse {
        /// Error code, usually the HTTP status of the response being decoded.
        code: Option<ErrorCode>,
        /// Human readable description.
        message: String,
        /// The payload which failed to decode.
        object: Option<Payload>,
        /// Underlying cause.
        #[source]
        source: Option<SharedError>,
    },
}

fn describe(message: &str, source: Option<&SharedError>) -> String {
    match source.map(|s| s.to_string()) {
        Some(cause) if cause != message => format!("{message} {cause}"),
        _ => message.to_owned(),
    }
}

impl Error {
    /// Create a transport error with a code and message.
    pub fn transport(code: ErrorCode, message: impl Into<String>) -> Self {
        Error::Transport {
            code: Some(code),
            message: message.into(),
            headers: None,
            object: None,
            source: None,
        }
    }

    /// Create a parse error with a message.
    pub fn parse(message: impl Into<String>) -> Self {
        Error::Parse {
            code: None,
            message: message.into(),
            object: None,
            source: None,
        }
    }

    /// Wrap an arbitrary error as a transport error.
    pub fn from_transport_error<E>(error: E) -> Self
    where
        E: Into<BoxError>,
    {
        let error: SharedError = Arc::from(error.into());
        Error::Transport {
            code: Some(ErrorCode::Unknown),
            message: error.to_string(),
            headers: None,
            object: None,
            source: Some(error),
        }
    }

    /// Wrap an arbitrary error as a parse error.
    pub fn from_parse_error<E>(error: E) -> Self
    where
        E: Into<BoxError>,
    {
        let error: SharedError = Arc::from(error.into());
        Error::Parse {
            code: None,
            message: error.to_string(),
            object: None,
            source: Some(error),
        }
    }

    /// The error synthesized when a transfer finished with neither a response nor an error.
    pub fn unknown() -> Self {
        Error::transport(ErrorCode::Unknown, "Unknown")
    }

    /// Whether this is a [`Error::Transport`] error.
    pub fn is_transport(&self) -> bool {
        matches!(self, Error::Transport { .. })
    }

    /// Whether this is a [`Error::Parse`] error.
    pub fn is_parse(&self) -> bool {
        matches!(self, Error::Parse { .. })
    }

    /// The error code, if known.
    pub fn code(&self) -> Option<ErrorCode> {
        match self {
            Error::Transport { code, .. } | Error::Parse { code, .. } => *code,
        }
    }

    /// The error message.
    pub fn message(&self) -> &str {
        match self {
            Error::Transport { message, .. } | Error::Parse { message, .. } => message,
        }
    }

    /// Response headers received before a transport failure.
    pub fn headers(&self) -> Option<&HeaderMap> {
        match self {
            Error::Transport { headers, .. } => headers.as_ref(),
            Error::Parse { .. } => None,
        }
    }

    /// The payload available when the error occurred.
    pub fn payload(&self) -> Option<&Payload> {
        match self {
            Error::Transport { object, .. } | Error::Parse { object, .. } => object.as_ref(),
        }
    }

    /// The underlying cause.
    pub fn underlying(&self) -> Option<&SharedError> {
        match self {
            Error::Transport { source, .. } | Error::Parse { source, .. } => source.as_ref(),
        }
    }

    /// Replace the error code.
    pub fn with_code(mut self, new: ErrorCode) -> Self {
        match &mut self {
            Error::Transport { code, .. } | Error::Parse { code, .. } => *code = Some(new),
        }
        self
    }

    /// Attach the payload which was available when the error occurred.
    pub fn with_payload(mut self, payload: Option<Payload>) -> Self {
        match &mut self {
            Error::Transport { object, .. } | Error::Parse { object, .. } => *object = payload,
        }
        self
    }

    /// Attach response headers to a transport error.
    pub fn with_headers(mut self, map: Option<HeaderMap>) -> Self {
        if let Error::Transport { headers, .. } = &mut self {
            *headers = map;
        }
        self
    }

    /// Attach an underlying cause.
    pub fn with_source(mut self, cause: SharedError) -> Self {
        match &mut self {
            Error::Transport { source, .. } | Error::Parse { source, .. } => *source = Some(cause),
        }
        self
    }

    /// Fill in context missing from a parse error.
    ///
    /// Fields the parse error already carries win; transport errors are returned unchanged.
    pub(crate) fn merge_context(
        self,
        context_code: Option<ErrorCode>,
        context_object: Option<&Payload>,
        context_source: Option<&SharedError>,
    ) -> Self {
        match self {
            Error::Parse {
                code,
                message,
                object,
                source,
            } => Error::Parse {
                code: code.or(context_code),
                message,
                object: object.or_else(|| context_object.cloned()),
                source: source.or_else(|| context_source.cloned()),
            },
            error => error,
        }
    }

    /// Transform the payload carried by this error into a typed object.
    ///
    /// Decoding failures are reported as [`Error::Parse`], carrying this error's
    /// code, payload and cause when the transform did not provide its own.
    pub fn object<T: FromPayload>(&self) -> Result<T, Error> {
        transform::object(self.payload())
            .map_err(|e| e.merge_context(self.code(), self.payload(), self.underlying()))
    }

    /// Decode the JSON payload carried by this error.
    pub fn decode<D: DeserializeOwned>(&self) -> Result<D, Error> {
        transform::decode(self.payload())
            .map_err(|e| e.merge_context(self.code(), self.payload(), self.underlying()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use bytes::Bytes;
    use static_assertions::assert_impl_all;

    assert_impl_all!(Error: std::error::Error, Clone, Send, Sync);

    #[derive(Debug, thiserror::Error)]
    #[error("connection reset")]
    struct Reset;

    #[test]
    fn display_appends_distinct_cause() {
        let error = Error::transport(ErrorCode::NotConnected, "offline")
            .with_source(Arc::new(Reset));
        assert_eq!(error.to_string(), "offline connection reset");

        let wrapped = Error::from_transport_error(Reset);
        assert_eq!(wrapped.to_string(), "connection reset");
        assert!(wrapped.is_transport());
    }

    #[test]
    fn codes_round_trip_through_integers() {
        for code in [
            ErrorCode::Cancelled,
            ErrorCode::TimedOut,
            ErrorCode::BadUrl,
            ErrorCode::Status(503),
            ErrorCode::Other(-1200),
        ] {
            assert_eq!(ErrorCode::from(code.as_i64()), code);
        }
    }

    #[test]
    fn decode_failure_keeps_transport_code() {
        let error = Error::transport(ErrorCode::Status(500), "server error")
            .with_payload(Some(Payload::Bytes(Bytes::from_static(b"not json"))));

        let decoded = error.decode::<serde_json::Value>().unwrap_err();
        assert!(decoded.is_parse());
        assert_eq!(decoded.code(), Some(ErrorCode::Status(500)));
    }

    #[derive(Debug)]
    struct Rejected;

    impl FromPayload for Rejected {
        fn from_payload(_: &Payload) -> Result<Self, Error> {
            Err(Error::parse("rejected"))
        }
    }

    #[test]
    fn object_failure_carries_error_payload() {
        let payload = Payload::Bytes(Bytes::from_static(b"teapot"));
        let error = Error::transport(ErrorCode::Status(418), "teapot")
            .with_payload(Some(payload.clone()))
            .with_source(Arc::new(Reset));

        let failed = error.object::<Rejected>().unwrap_err();
        assert!(failed.is_parse());
        assert_eq!(failed.code(), Some(ErrorCode::Status(418)));
        assert_eq!(failed.payload(), Some(&payload));
        assert!(failed.underlying().is_some());
    }

    #[test]
    fn error_payload_decodes() {
        let error = Error::transport(ErrorCode::Status(422), "unprocessable")
            .with_payload(Some(Payload::Bytes(Bytes::from_static(br#"{"field":"name"}"#))));

        let body: serde_json::Value = error.decode().unwrap();
        assert_eq!(body["field"], "name");
    }
}
