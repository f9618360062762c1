//! A transport which runs transfers through a [`tower::Service`].
//!
//! [`ServiceTransport`] turns any `Service<http::Request<Body>>` into a [`Transport`],
//! spawning each transfer on a tokio runtime once it is resumed. Pausing holds the
//! response body between frames, and cancelling aborts the spawned transfer.
//!
//! Responses with a client or server error status (4xx or 5xx) complete as failures with
//! [`ErrorCode::Status`], carrying the response head and body.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use bytes::{Bytes, BytesMut};
use http::{HeaderMap, Version};
use http_body::Body as HttpBody;
use http_body_util::BodyExt;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::sync::watch;
use tower::{Service, ServiceExt};
use tracing::{debug, trace};

use super::{
    next_transfer_id, ByteCounters, Failure, Outcome, RawResponse, Transfer, TransferHandle,
    TransferListener, TransferState, Transport, UploadSource,
};
use crate::body::Body;
use crate::error::ErrorCode;
use crate::request::{TransferOptions, DEFAULT_TIMEOUT};
use crate::response::Payload;
use crate::task::metrics::{FetchType, TaskMetrics, TransactionMetrics};
use crate::{BoxError, BoxFuture};

/// Why a transfer run by a [`ServiceTransport`] failed.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum TransferError {
    /// The transport cannot perform this kind of transfer.
    #[error("{0} transfers are not supported")]
    Unsupported(&'static str),

    /// The transfer took longer than its timeout.
    #[error("transfer timed out after {0:?}")]
    TimedOut(Duration),

    /// The service failed to produce a response.
    #[error("service: {0}")]
    Service(#[source] BoxError),

    /// Reading the response body failed.
    #[error("body: {0}")]
    Body(#[source] BoxError),

    /// Reading an upload or writing a download failed.
    #[error("file: {0}")]
    Io(#[from] std::io::Error),
}

impl TransferError {
    fn code(&self) -> ErrorCode {
        match self {
            TransferError::Unsupported(_) => ErrorCode::Unsupported,
            TransferError::TimedOut(_) => ErrorCode::TimedOut,
            TransferError::Service(_) => ErrorCode::NotConnected,
            TransferError::Body(_) => ErrorCode::Unknown,
            TransferError::Io(_) => ErrorCode::ResourceUnavailable,
        }
    }
}

/// A [`Transport`] backed by a [`tower::Service`].
pub struct ServiceTransport<S> {
    service: S,
    runtime: tokio::runtime::Handle,
    download_dir: PathBuf,
}

impl<S: Clone> Clone for ServiceTransport<S> {
    fn clone(&self) -> Self {
        Self {
            service: self.service.clone(),
            runtime: self.runtime.clone(),
            download_dir: self.download_dir.clone(),
        }
    }
}

impl<S> fmt::Debug for ServiceTransport<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceTransport")
            .field("download_dir", &self.download_dir)
            .finish()
    }
}

impl<S> ServiceTransport<S> {
    /// Run transfers through `service` on `runtime`.
    ///
    /// Downloads are written to the system temporary directory.
    pub fn new(service: S, runtime: tokio::runtime::Handle) -> Self {
        Self {
            service,
            runtime,
            download_dir: std::env::temp_dir(),
        }
    }

    /// Write downloads into `dir` instead.
    pub fn with_download_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.download_dir = dir.into();
        self
    }
}

impl<S, B> Transport for ServiceTransport<S>
where
    S: Service<http::Request<Body>, Response = http::Response<B>> + Clone + Send + Sync + 'static,
    S::Error: Into<BoxError>,
    S::Future: Send + 'static,
    B: HttpBody<Data = Bytes> + Send + 'static,
    B::Error: Into<BoxError> + Send,
{
    fn submit(&self, transfer: Transfer, listener: TransferListener) -> Arc<dyn TransferHandle> {
        let (paused, _) = watch::channel(false);
        let shared = Arc::new(Shared {
            id: next_transfer_id(),
            state: Mutex::new(TransferState::Suspended),
            counters: Mutex::new(ByteCounters::default()),
            listener: Mutex::new(Some(Arc::new(listener))),
            paused,
        });

        trace!(id = shared.id, kind = transfer.kind(), "transfer submitted");
        let run = run(
            self.service.clone(),
            transfer,
            shared.clone(),
            self.download_dir.clone(),
        );

        Arc::new(ServiceHandle {
            shared,
            runtime: self.runtime.clone(),
            pending: Mutex::new(Some(Box::pin(run))),
            running: Mutex::new(None),
        })
    }
}

#[derive(Debug)]
struct Shared {
    id: u64,
    state: Mutex<TransferState>,
    counters: Mutex<ByteCounters>,
    listener: Mutex<Option<Arc<TransferListener>>>,
    paused: watch::Sender<bool>,
}

impl Shared {
    fn listener(&self) -> Option<Arc<TransferListener>> {
        self.listener.lock().clone()
    }

    fn transition(&self, state: TransferState) {
        {
            let mut current = self.state.lock();
            if *current == state || *current == TransferState::Completed {
                return;
            }
            *current = state;
        }
        if let Some(listener) = self.listener() {
            listener.state_changed(state);
        }
    }

    fn report<F>(&self, headers: Option<&HeaderMap>, update: F)
    where
        F: FnOnce(&mut ByteCounters),
    {
        let counters = {
            let mut counters = self.counters.lock();
            update(&mut counters);
            *counters
        };
        if let Some(listener) = self.listener() {
            listener.progress(counters, headers);
        }
    }

    fn finish(&self, outcome: Outcome) {
        *self.state.lock() = TransferState::Completed;
        let listener = self.listener.lock().take();
        if let Some(listener) = listener {
            debug!(id = self.id, failed = outcome.failure.is_some(), "transfer finished");
            listener.state_changed(TransferState::Completed);
            listener.complete(outcome);
        }
    }

    async fn unpaused(&self) {
        let mut paused = self.paused.subscribe();
        let _ = paused.wait_for(|paused| !*paused).await;
    }
}

struct ServiceHandle {
    shared: Arc<Shared>,
    runtime: tokio::runtime::Handle,
    pending: Mutex<Option<BoxFuture<'static, ()>>>,
    running: Mutex<Option<tokio::task::AbortHandle>>,
}

impl fmt::Debug for ServiceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceHandle")
            .field("id", &self.shared.id)
            .field("state", &*self.shared.state.lock())
            .finish()
    }
}

impl TransferHandle for ServiceHandle {
    fn id(&self) -> u64 {
        self.shared.id
    }

    fn state(&self) -> TransferState {
        *self.shared.state.lock()
    }

    fn counters(&self) -> ByteCounters {
        *self.shared.counters.lock()
    }

    fn suspend(&self) {
        self.shared.paused.send_replace(true);
        self.shared.transition(TransferState::Suspended);
    }

    fn resume(&self) {
        self.shared.paused.send_replace(false);
        self.shared.transition(TransferState::Running);

        let pending = self.pending.lock().take();
        if let Some(run) = pending {
            let task = self.runtime.spawn(run);
            *self.running.lock() = Some(task.abort_handle());
        }
    }

    fn cancel(&self) {
        if *self.shared.state.lock() == TransferState::Completed {
            return;
        }
        self.shared.transition(TransferState::Canceling);
        self.pending.lock().take();
        if let Some(running) = self.running.lock().take() {
            running.abort();
        }
        self.shared
            .finish(Outcome::failure(Failure::new(ErrorCode::Cancelled, "cancelled")));
    }
}

async fn run<S, B>(service: S, transfer: Transfer, shared: Arc<Shared>, dir: PathBuf)
where
    S: Service<http::Request<Body>, Response = http::Response<B>>,
    S::Error: Into<BoxError>,
    B: HttpBody<Data = Bytes>,
    B::Error: Into<BoxError>,
{
    let outcome = match execute(service, transfer, &shared, &dir).await {
        Ok(outcome) => outcome,
        Err(error) => Outcome::failure(Failure::caused_by(error.code(), error)),
    };
    shared.finish(outcome);
}

enum Sink {
    Memory(BytesMut),
    File(tokio::fs::File, PathBuf),
}

impl Sink {
    async fn download(dir: &Path, id: u64) -> Result<Self, TransferError> {
        let path = dir.join(format!("canopy-{id}.download"));
        let file = tokio::fs::File::create(&path).await?;
        Ok(Sink::File(file, path))
    }

    async fn write(&mut self, data: &Bytes) -> Result<(), TransferError> {
        match self {
            Sink::Memory(buffer) => buffer.extend_from_slice(data),
            Sink::File(file, _) => file.write_all(data).await?,
        }
        Ok(())
    }

    async fn finish(self) -> Result<Payload, TransferError> {
        match self {
            Sink::Memory(buffer) => Ok(Payload::Bytes(buffer.freeze())),
            Sink::File(mut file, path) => {
                file.flush().await?;
                Ok(Payload::File(path))
            }
        }
    }
}

async fn execute<S, B>(
    service: S,
    transfer: Transfer,
    shared: &Shared,
    dir: &Path,
) -> Result<Outcome, TransferError>
where
    S: Service<http::Request<Body>, Response = http::Response<B>>,
    S::Error: Into<BoxError>,
    B: HttpBody<Data = Bytes>,
    B::Error: Into<BoxError>,
{
    let (request, sink) = match transfer {
        Transfer::Fetch(request) => (request, Sink::Memory(BytesMut::new())),
        Transfer::Download(request) => (request, Sink::download(dir, shared.id).await?),
        Transfer::Upload { request, source } => {
            let (parts, body) = request.into_parts();
            let body = match source {
                UploadSource::Streamed => body,
                UploadSource::Bytes(bytes) => Body::from(bytes),
                UploadSource::File(path) => Body::from(tokio::fs::read(path).await?),
            };
            (
                http::Request::from_parts(parts, body),
                Sink::Memory(BytesMut::new()),
            )
        }
        other => return Err(TransferError::Unsupported(other.kind())),
    };

    let timeout = request
        .extensions()
        .get::<TransferOptions>()
        .map_or(DEFAULT_TIMEOUT, |options| options.timeout);

    tokio::time::timeout(timeout, exchange(service, request, sink, shared))
        .await
        .map_err(|_| TransferError::TimedOut(timeout))?
}

fn protocol(version: Version) -> Option<String> {
    let name = match version {
        Version::HTTP_09 => "http/0.9",
        Version::HTTP_10 => "http/1.0",
        Version::HTTP_11 => "http/1.1",
        Version::HTTP_2 => "h2",
        Version::HTTP_3 => "h3",
        _ => return None,
    };
    Some(name.to_owned())
}

async fn exchange<S, B>(
    mut service: S,
    request: http::Request<Body>,
    mut sink: Sink,
    shared: &Shared,
) -> Result<Outcome, TransferError>
where
    S: Service<http::Request<Body>, Response = http::Response<B>>,
    S::Error: Into<BoxError>,
    B: HttpBody<Data = Bytes>,
    B::Error: Into<BoxError>,
{
    let started = Instant::now();
    let task_start = SystemTime::now();
    let url = request.uri().clone();
    let expected_to_send = request.body().size_hint().exact();
    shared.report(None, |counters| counters.expected_to_send = expected_to_send);

    let service = service
        .ready()
        .await
        .map_err(|error| TransferError::Service(error.into()))?;
    let request_start = SystemTime::now();
    let response = service
        .call(request)
        .await
        .map_err(|error| TransferError::Service(error.into()))?;
    let response_start = SystemTime::now();

    let (parts, body) = response.into_parts();
    let expected_to_receive = parts
        .headers
        .get(http::header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok());

    shared.report(Some(&parts.headers), |counters| {
        counters.sent = expected_to_send.unwrap_or(counters.sent);
        counters.expected_to_receive = expected_to_receive;
    });

    let mut body = Box::pin(body);
    loop {
        let frame = match body.frame().await {
            Some(frame) => frame.map_err(|error| TransferError::Body(error.into()))?,
            None => break,
        };
        shared.unpaused().await;
        if let Ok(data) = frame.into_data() {
            sink.write(&data).await?;
            shared.report(Some(&parts.headers), |counters| {
                counters.received += data.len() as u64;
            });
        }
    }

    let payload = sink.finish().await?;
    let response_end = SystemTime::now();

    if let Some(listener) = shared.listener() {
        listener.metrics(TaskMetrics {
            transactions: vec![TransactionMetrics {
                fetch_start: Some(task_start),
                request_start: Some(request_start),
                response_start: Some(response_start),
                response_end: Some(response_end),
                network_protocol_name: protocol(parts.version),
                fetch_type: FetchType::NetworkLoad,
                ..Default::default()
            }],
            task_start: Some(task_start),
            task_interval: started.elapsed(),
            redirect_count: 0,
        });
    }

    let status = parts.status;
    let raw = RawResponse {
        url: Some(url),
        status: Some(status),
        headers: parts.headers,
    };

    if status.is_client_error() || status.is_server_error() {
        return Ok(Outcome {
            payload: Some(payload),
            response: Some(raw),
            failure: Some(Failure::new(
                ErrorCode::Status(status.as_u16()),
                status.canonical_reason().unwrap_or("unexpected status"),
            )),
        });
    }
    Ok(Outcome::success(raw, Some(payload)))
}
