//! The contract between sessions and the engines which move bytes.
//!
//! A [`Transport`] accepts a [`Transfer`] together with a [`TransferListener`], and returns
//! a [`TransferHandle`] for controlling it. The transfer must not start until
//! [`TransferHandle::resume`] is called. While it runs, the transport reports byte counts,
//! state changes, authentication challenges and metrics to the listener, and finally calls
//! [`TransferListener::complete`] exactly once.

use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use http::{HeaderMap, StatusCode, Uri};
use parking_lot::Mutex;

use crate::body::Body;
use crate::error::{Error, ErrorCode, SharedError};
use crate::response::Payload;
pub use crate::session::TransferListener;

#[cfg(any(test, feature = "mocks"))]
pub mod mock;
pub mod service;

/// An engine which performs transfers.
pub trait Transport: fmt::Debug + Send + Sync + 'static {
    /// Accept a transfer. The returned handle starts out suspended.
    fn submit(&self, transfer: Transfer, listener: TransferListener) -> Arc<dyn TransferHandle>;
}

/// What to transfer.
#[derive(Debug)]
pub enum Transfer {
    /// Fetch a response into memory.
    Fetch(http::Request<Body>),
    /// Download a response to a file.
    Download(http::Request<Body>),
    /// Resume a download from the state a transport previously produced.
    ResumeDownload(Bytes),
    /// Upload a body.
    Upload {
        /// The request, whose body is used when the source is streamed.
        request: http::Request<Body>,
        /// Where the uploaded bytes come from.
        source: UploadSource,
    },
    /// Open a bidirectional byte stream to a host.
    Stream {
        /// Host name.
        host: String,
        /// Port.
        port: u16,
    },
}

impl Transfer {
    /// A short name for the kind of transfer, for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Transfer::Fetch(_) => "fetch",
            Transfer::Download(_) => "download",
            Transfer::ResumeDownload(_) => "resume-download",
            Transfer::Upload { .. } => "upload",
            Transfer::Stream { .. } => "stream",
        }
    }
}

/// The bytes an upload sends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadSource {
    /// The request's own (usually streamed) body.
    Streamed,
    /// A buffer.
    Bytes(Bytes),
    /// The contents of a file.
    File(PathBuf),
}

/// The lifecycle of a transfer as seen by its transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransferState {
    /// Submitted or paused; not moving bytes.
    Suspended,
    /// Moving bytes.
    Running,
    /// Cancellation was requested.
    Canceling,
    /// Finished, successfully or not.
    Completed,
}

/// Byte counts reported by a transport.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ByteCounters {
    /// Body bytes sent.
    pub sent: u64,
    /// Body bytes received.
    pub received: u64,
    /// Body bytes expected to be sent, if known.
    pub expected_to_send: Option<u64>,
    /// Body bytes expected to be received, if known.
    pub expected_to_receive: Option<u64>,
}

/// Control over a submitted transfer.
pub trait TransferHandle: fmt::Debug + Send + Sync {
    /// Identifier assigned by the transport.
    fn id(&self) -> u64;

    /// Current state.
    fn state(&self) -> TransferState;

    /// Current byte counts.
    fn counters(&self) -> ByteCounters;

    /// Pause the transfer.
    fn suspend(&self);

    /// Start or continue the transfer.
    fn resume(&self);

    /// Request cancellation. The transfer still completes, usually with
    /// [`ErrorCode::Cancelled`].
    fn cancel(&self);
}

/// The response head a transport received.
#[derive(Debug, Clone, Default)]
pub struct RawResponse {
    /// Final address, after any redirects.
    pub url: Option<Uri>,
    /// HTTP status, absent for non-HTTP transfers.
    pub status: Option<StatusCode>,
    /// Response headers.
    pub headers: HeaderMap,
}

/// Why a transfer failed.
#[derive(Debug, Clone)]
pub struct Failure {
    /// Error code.
    pub code: ErrorCode,
    /// Description.
    pub message: String,
    /// Underlying cause.
    pub source: Option<SharedError>,
}

impl Failure {
    /// A failure with a code and message.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Failure {
            code,
            message: message.into(),
            source: None,
        }
    }

    /// A failure caused by another error.
    pub fn caused_by<E>(code: ErrorCode, error: E) -> Self
    where
        E: Into<crate::BoxError>,
    {
        let error: SharedError = Arc::from(error.into());
        Failure {
            code,
            message: error.to_string(),
            source: Some(error),
        }
    }

    pub(crate) fn into_error(
        self,
        headers: Option<HeaderMap>,
        payload: Option<Payload>,
    ) -> Error {
        let error = Error::transport(self.code, self.message)
            .with_headers(headers)
            .with_payload(payload);
        match self.source {
            Some(source) => error.with_source(source),
            None => error,
        }
    }
}

/// The result of a transfer.
#[derive(Debug, Clone, Default)]
pub struct Outcome {
    /// Body bytes, or the file a download was written to.
    pub payload: Option<Payload>,
    /// The response head, if one arrived.
    pub response: Option<RawResponse>,
    /// Set when the transfer failed.
    pub failure: Option<Failure>,
}

impl Outcome {
    /// A successful outcome.
    pub fn success(response: RawResponse, payload: Option<Payload>) -> Self {
        Outcome {
            payload,
            response: Some(response),
            failure: None,
        }
    }

    /// A failed outcome.
    pub fn failure(failure: Failure) -> Self {
        Outcome {
            payload: None,
            response: None,
            failure: Some(failure),
        }
    }
}

pub(crate) fn next_transfer_id() -> u64 {
    static NEXT: AtomicU64 = AtomicU64::new(1);
    NEXT.fetch_add(1, Ordering::Relaxed)
}

/// A transport which fails every transfer with [`ErrorCode::NotConnected`].
///
/// Used by the shared session until [`init`](crate::init) installs a real one.
#[derive(Debug, Default, Clone, Copy)]
pub struct Unavailable;

impl Transport for Unavailable {
    fn submit(&self, transfer: Transfer, listener: TransferListener) -> Arc<dyn TransferHandle> {
        tracing::debug!(kind = transfer.kind(), "no transport configured");
        Arc::new(UnavailableHandle {
            id: next_transfer_id(),
            state: Mutex::new(TransferState::Suspended),
            listener: Mutex::new(Some(listener)),
        })
    }
}

#[derive(Debug)]
struct UnavailableHandle {
    id: u64,
    state: Mutex<TransferState>,
    listener: Mutex<Option<TransferListener>>,
}

impl UnavailableHandle {
    fn finish(&self, failure: Failure) {
        *self.state.lock() = TransferState::Completed;
        let listener = self.listener.lock().take();
        if let Some(listener) = listener {
            listener.state_changed(TransferState::Completed);
            listener.complete(Outcome::failure(failure));
        }
    }
}

impl TransferHandle for UnavailableHandle {
    fn id(&self) -> u64 {
        self.id
    }

    fn state(&self) -> TransferState {
        *self.state.lock()
    }

    fn counters(&self) -> ByteCounters {
        ByteCounters::default()
    }

    fn suspend(&self) {}

    fn resume(&self) {
        self.finish(Failure::new(
            ErrorCode::NotConnected,
            "no transport has been configured",
        ));
    }

    fn cancel(&self) {
        self.finish(Failure::new(ErrorCode::Cancelled, "cancelled"));
    }
}
