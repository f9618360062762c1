//! Sessions create tasks and drive them through a transport.
//!
//! A [`Session`] owns the [`Transport`], the interceptor pipelines and the session-wide
//! retry policy. Every task it creates is submitted to the transport immediately, but
//! stays suspended until it is consumed.
//!
//! When a transfer completes, the session turns the transport's [`Outcome`] into a
//! [`Response`] (running every response interceptor) or an [`Error`], records it on the
//! task, and then asks the retry policies whether to run the transfer again. If neither
//! does, the task resolves.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::RwLock;
use tracing::{debug, trace};

use crate::auth::{ChallengeHandler, TrustPolicies};
use crate::body::Body;
use crate::error::{Error, ErrorCode};
use crate::request::{self, CachePolicy, Request};
use crate::response::{self, Payload, Response};
use crate::task::{RetryPolicy, Task, TaskId, TransferKind};
use crate::transport::{Outcome, RawResponse, Transfer, Transport, UploadSource};

mod builder;
mod listener;
mod registry;

pub use self::builder::Builder;
pub use self::listener::TransferListener;
use self::registry::Registry;

/// Rewrites every request before it is submitted.
pub type RequestInterceptor = Arc<dyn Fn(request::Builder) -> request::Builder + Send + Sync>;

/// Rewrites every response before it is delivered.
pub type ResponseInterceptor = Arc<dyn Fn(response::Builder) -> response::Builder + Send + Sync>;

pub(crate) struct SessionRef {
    transport: Arc<dyn Transport>,
    cache: CachePolicy,
    timeout: Duration,
    request_interceptors: RwLock<Vec<RequestInterceptor>>,
    response_interceptors: RwLock<Vec<ResponseInterceptor>>,
    retry: RwLock<Option<RetryPolicy>>,
    pub(crate) server_trust: TrustPolicies,
    pub(crate) auth_challenge: Option<ChallengeHandler>,
    registry: Registry,
}

impl SessionRef {
    fn intercept(&self, request: &Request) -> Request {
        let interceptors = self.request_interceptors.read().clone();
        interceptors
            .iter()
            .fold(request.to_builder(), |builder, interceptor| interceptor(builder))
            .build()
    }

    fn transfer(&self, task: &Task) -> Transfer {
        // Request-backed kinds are only ever created with a request.
        let native = || match task.request() {
            Some(request) => self.intercept(request).to_http(),
            None => http::Request::new(Body::empty()),
        };

        match task.kind() {
            TransferKind::Fetch => Transfer::Fetch(native()),
            TransferKind::Download => Transfer::Download(native()),
            TransferKind::ResumeDownload(data) => Transfer::ResumeDownload(data.clone()),
            TransferKind::Upload(source) => Transfer::Upload {
                request: native(),
                source: source.clone(),
            },
            TransferKind::Stream { host, port } => Transfer::Stream {
                host: host.clone(),
                port: *port,
            },
        }
    }

    fn submit(self: &Arc<Self>, task: &Task) {
        let transfer = self.transfer(task);
        let generation = task.next_generation();
        debug!(
            task = %task.id(),
            generation,
            kind = transfer.kind(),
            "submitting transfer"
        );

        let listener = TransferListener::new(task, self.clone(), generation);
        let handle = self.transport.submit(transfer, listener);
        task.bind(generation, handle);
    }

    fn respond(&self, task: &Task, raw: &RawResponse, payload: Option<Payload>) -> Response {
        let interceptors = self.response_interceptors.read().clone();
        interceptors
            .iter()
            .fold(
                response::Builder::from_raw(raw, payload, Some(task.id())),
                |builder, interceptor| interceptor(builder),
            )
            .build()
    }

    #[cfg_attr(
        not(tarpaulin),
        tracing::instrument(skip_all, fields(task = %task.id()), level = "debug")
    )]
    pub(crate) fn complete(self: &Arc<Self>, task: &Task, outcome: Outcome) {
        let Outcome {
            payload,
            response: raw,
            failure,
        } = outcome;

        let (response, error) = match (failure, raw) {
            (Some(failure), raw) => (
                None,
                Some(failure.into_error(raw.map(|r| r.headers), payload)),
            ),
            (None, Some(raw)) => (Some(self.respond(task, &raw, payload)), None),
            (None, None) => (None, None),
        };

        self.process(task, response, error);
    }

    fn should_retry(&self, task: &Task, response: Option<&Response>, error: Option<&Error>) -> bool {
        if task.request().is_none() {
            return false;
        }
        if error.and_then(Error::code) == Some(ErrorCode::Cancelled) {
            trace!("cancelled transfers are not retried");
            return false;
        }

        let count = task.retry_count();
        if task
            .retry_policy()
            .is_some_and(|policy| policy(response, error, count))
        {
            return true;
        }
        let policy = self.retry.read().clone();
        policy.is_some_and(|policy| policy(response, error, count))
    }

    fn process(self: &Arc<Self>, task: &Task, response: Option<Response>, error: Option<Error>) {
        task.set_outcome(response.clone(), error.clone());

        if self.should_retry(task, response.as_ref(), error.as_ref()) {
            debug!(attempt = task.retry_count() + 1, "retrying transfer");
            task.prepare_retry();
            self.submit(task);
            task.resume();
            return;
        }

        debug!(
            success = response.is_some(),
            retries = task.retry_count(),
            "task resolved"
        );
        task.finish();
    }
}

/// Creates tasks and submits them to a transport.
///
/// Sessions are cheap to clone; clones share the transport, interceptors, retry policy
/// and task registry.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionRef>,
}

static SHARED: RwLock<Option<Session>> = parking_lot::const_rwlock(None);

/// Install `session` as the process-wide shared session.
pub fn init(session: Session) {
    *SHARED.write() = Some(session);
}

impl Session {
    /// A builder for a session.
    pub fn builder() -> Builder {
        Builder::new()
    }

    /// The process-wide session.
    ///
    /// Until [`init`] is called this is a session without a transport, whose transfers all
    /// fail with [`ErrorCode::NotConnected`].
    pub fn shared() -> Session {
        if let Some(session) = SHARED.read().as_ref() {
            return session.clone();
        }
        SHARED
            .write()
            .get_or_insert_with(|| Session::builder().build())
            .clone()
    }

    /// Append a request interceptor. Applies to transfers submitted afterwards.
    pub fn add_request_interceptor<F>(&self, interceptor: F)
    where
        F: Fn(request::Builder) -> request::Builder + Send + Sync + 'static,
    {
        self.inner
            .request_interceptors
            .write()
            .push(Arc::new(interceptor));
    }

    /// Append a response interceptor.
    pub fn add_response_interceptor<F>(&self, interceptor: F)
    where
        F: Fn(response::Builder) -> response::Builder + Send + Sync + 'static,
    {
        self.inner
            .response_interceptors
            .write()
            .push(Arc::new(interceptor));
    }

    /// Replace the session-wide retry policy.
    pub fn set_retry_policy<F>(&self, policy: F)
    where
        F: Fn(Option<&Response>, Option<&Error>, u32) -> bool + Send + Sync + 'static,
    {
        *self.inner.retry.write() = Some(Arc::new(policy));
    }

    fn create(&self, request: Option<Request>, kind: TransferKind) -> Task {
        let task = Task::new(request, kind);
        self.inner.registry.insert(&task);
        self.inner.submit(&task);
        task
    }

    /// A task which fetches `request` into memory.
    pub fn fetch_task(&self, request: &Request) -> Task {
        self.create(Some(request.clone()), TransferKind::Fetch)
    }

    /// A task which downloads `request` to a file.
    pub fn download_task(&self, request: &Request) -> Task {
        self.create(Some(request.clone()), TransferKind::Download)
    }

    /// A task which resumes a download from data its transport produced earlier.
    ///
    /// The task has no request, so it is never retried.
    pub fn download_task_resuming(&self, resume_data: Bytes) -> Task {
        self.create(None, TransferKind::ResumeDownload(resume_data))
    }

    /// A task which uploads the request's own body.
    pub fn upload_task_streamed(&self, request: &Request) -> Task {
        self.create(
            Some(request.clone()),
            TransferKind::Upload(UploadSource::Streamed),
        )
    }

    /// A task which uploads `data`.
    pub fn upload_task(&self, request: &Request, data: impl Into<Bytes>) -> Task {
        self.create(
            Some(request.clone()),
            TransferKind::Upload(UploadSource::Bytes(data.into())),
        )
    }

    /// A task which uploads the contents of the file at `path`.
    pub fn upload_task_from_file(&self, request: &Request, path: impl Into<PathBuf>) -> Task {
        self.create(
            Some(request.clone()),
            TransferKind::Upload(UploadSource::File(path.into())),
        )
    }

    /// A task which opens a byte stream to `host` and `port`.
    pub fn stream_task(&self, host: impl Into<String>, port: u16) -> Task {
        self.create(
            None,
            TransferKind::Stream {
                host: host.into(),
                port,
            },
        )
    }

    fn request(&self, url: &str) -> Result<Request, Error> {
        let mut builder = request::Builder::parse(url)?;
        builder
            .set_cache(self.inner.cache)
            .set_timeout(self.inner.timeout);
        Ok(builder.build())
    }

    /// Fetch `url` with the session's cache policy and timeout.
    pub fn fetch(&self, url: &str) -> Result<Task, Error> {
        Ok(self.fetch_task(&self.request(url)?))
    }

    /// Download `url` with the session's cache policy and timeout.
    pub fn download(&self, url: &str) -> Result<Task, Error> {
        Ok(self.download_task(&self.request(url)?))
    }

    /// Upload `data` to `url`.
    pub fn upload_bytes(&self, url: &str, data: impl Into<Bytes>) -> Result<Task, Error> {
        let mut builder = self.request(url)?.to_builder();
        builder.set_method(http::Method::POST);
        Ok(self.upload_task(&builder.build(), data))
    }

    /// Upload the file at `path` to `url`.
    pub fn upload_file(&self, url: &str, path: impl Into<PathBuf>) -> Result<Task, Error> {
        let mut builder = self.request(url)?.to_builder();
        builder.set_method(http::Method::POST);
        Ok(self.upload_task_from_file(&builder.build(), path))
    }

    /// Look up a live task created by this session.
    ///
    /// Use with [`Response::task_id`] to get from a response back to its task.
    pub fn task(&self, id: TaskId) -> Option<Task> {
        self.inner.registry.get(id)
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("transport", &self.inner.transport)
            .field("cache", &self.inner.cache)
            .field("timeout", &self.inner.timeout)
            .finish()
    }
}
