//! Tasks: one per logical transfer, surviving retries.
//!
//! A [`Task`] starts out [suspended](TaskState::Suspended). Consuming it, through
//! [`Task::consume`], [`Task::blocking_consume`] or [`Task::resolve`], starts the
//! transfer; only the first consumer of a suspended task has any effect. When the transfer
//! finishes and no retry policy asks for another attempt, the task becomes
//! [completed](TaskState::Completed) with either a [`Response`] or an [`Error`], and
//! exactly one of the success or failure closures runs.
//!
//! Retries re-issue the transfer under the same task: the identifier, closures and progress
//! closure carry over, and [`Task::retry_count`] increases by one per attempt.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;

use crate::error::{Error, ErrorCode};
use crate::progress::Progress;
use crate::request::Request;
use crate::response::Response;
use crate::transport::{TransferHandle, UploadSource};

pub mod metrics;
mod wait;
mod weak;

pub use self::metrics::{FetchType, TaskMetrics, TransactionMetrics};
use self::wait::Latch;
pub(crate) use self::weak::WeakTask;

/// Called with the response when a task succeeds.
pub type SuccessClosure = Box<dyn FnOnce(Response) + Send + 'static>;

/// Called with the error when a task fails.
pub type FailureClosure = Box<dyn FnOnce(Error) + Send + 'static>;

/// Called on every progress update.
pub type ProgressClosure = Arc<dyn Fn(&Progress) + Send + Sync + 'static>;

/// Decides whether a finished attempt should be retried.
///
/// Receives the response, the error and the number of retries so far. Retries are
/// unbounded unless the policy caps them using the count.
pub type RetryPolicy =
    Arc<dyn Fn(Option<&Response>, Option<&Error>, u32) -> bool + Send + Sync + 'static>;

/// Unique identifier of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(u64);

impl TaskId {
    fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        TaskId(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    /// The numeric value.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The lifecycle of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskState {
    /// Not started, or paused.
    Suspended,
    /// Transferring.
    Running,
    /// Cancellation was requested; completion is pending.
    Canceling,
    /// Finished with a response or an error. Terminal.
    Completed,
    /// The transport is waiting for network connectivity.
    WaitingForConnectivity,
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TaskState::Suspended => "suspended",
            TaskState::Running => "running",
            TaskState::Canceling => "canceling",
            TaskState::Completed => "completed",
            TaskState::WaitingForConnectivity => "waiting for connectivity",
        })
    }
}

/// How a task's transfer is (re-)submitted.
#[derive(Debug, Clone)]
pub(crate) enum TransferKind {
    Fetch,
    Download,
    ResumeDownload(Bytes),
    Upload(UploadSource),
    Stream { host: String, port: u16 },
}

#[derive(Default)]
struct Closures {
    on_success: Option<SuccessClosure>,
    on_failure: Option<FailureClosure>,
    on_progress: Option<ProgressClosure>,
    retry: Option<RetryPolicy>,
}

struct TaskInner {
    state: TaskState,
    response: Option<Response>,
    error: Option<Error>,
    retry_count: u32,
    priority: Option<f32>,
    description: Option<String>,
    progress: Progress,
    metrics: Option<TaskMetrics>,
    handle: Option<Arc<dyn TransferHandle>>,
    generation: u64,
    closures: Closures,
    latch: Option<Arc<Latch>>,
    // Keeps a started task alive until it resolves; listeners only hold it weakly.
    in_flight: Option<Task>,
}

impl TaskInner {
    fn set_outcome(&mut self, response: Option<Response>, error: Option<Error>) {
        self.response = response;
        self.error = error;
        self.state = TaskState::Completed;
    }

    fn result(&self) -> Result<Response, Error> {
        match (&self.response, &self.error) {
            (Some(response), _) => Ok(response.clone()),
            (None, Some(error)) => Err(error.clone()),
            (None, None) => Err(Error::unknown()),
        }
    }
}

pub(crate) struct TaskRef {
    id: TaskId,
    request: Option<Request>,
    kind: TransferKind,
    inner: Mutex<TaskInner>,
}

/// A handle to a transfer and its outcome.
///
/// Cloning a task clones the handle; all clones observe the same transfer. Tasks are
/// equal when their identifiers are equal.
#[derive(Clone)]
pub struct Task {
    pub(crate) inner: Arc<TaskRef>,
}

impl Task {
    pub(crate) fn new(request: Option<Request>, kind: TransferKind) -> Self {
        let total = request.as_ref().and_then(|r| r.content_length());
        let description = request.as_ref().map(|r| r.to_string());
        Task {
            inner: Arc::new(TaskRef {
                id: TaskId::next(),
                request,
                kind,
                inner: Mutex::new(TaskInner {
                    state: TaskState::Suspended,
                    response: None,
                    error: None,
                    retry_count: 0,
                    priority: None,
                    description,
                    progress: Progress::new(total),
                    metrics: None,
                    handle: None,
                    generation: 0,
                    closures: Closures::default(),
                    latch: None,
                    in_flight: None,
                }),
            }),
        }
    }

    /// The task's identifier, stable across retries.
    pub fn id(&self) -> TaskId {
        self.inner.id
    }

    /// The request this task transfers, if it was created from one.
    pub fn request(&self) -> Option<&Request> {
        self.inner.request.as_ref()
    }

    /// The current state.
    pub fn state(&self) -> TaskState {
        self.inner.inner.lock().state
    }

    /// The response, once the task has succeeded.
    pub fn response(&self) -> Option<Response> {
        self.inner.inner.lock().response.clone()
    }

    /// The error, once the task has failed.
    pub fn error(&self) -> Option<Error> {
        self.inner.inner.lock().error.clone()
    }

    /// How many times the transfer has been retried.
    pub fn retry_count(&self) -> u32 {
        self.inner.inner.lock().retry_count
    }

    /// The priority hint, if one was set.
    pub fn priority(&self) -> Option<f32> {
        self.inner.inner.lock().priority
    }

    /// Set the priority hint, between 0.0 and 1.0.
    pub fn set_priority(&self, priority: f32) -> &Self {
        self.inner.inner.lock().priority = Some(priority.clamp(0.0, 1.0));
        self
    }

    /// A description of the task. Defaults to the request's method and address.
    pub fn description(&self) -> Option<String> {
        self.inner.inner.lock().description.clone()
    }

    /// Replace the description.
    pub fn set_description(&self, description: impl Into<String>) -> &Self {
        self.inner.inner.lock().description = Some(description.into());
        self
    }

    /// Progress of the current attempt.
    pub fn progress(&self) -> Progress {
        self.inner.inner.lock().progress.clone()
    }

    /// Metrics of the most recent attempt, once a transport has delivered them.
    pub fn metrics(&self) -> Option<TaskMetrics> {
        self.inner.inner.lock().metrics.clone()
    }

    /// Claim a suspended task for a consumer and start its transfer.
    ///
    /// Returns `false`, without calling `setup`, if the task is not suspended.
    fn start<F>(&self, setup: F) -> bool
    where
        F: FnOnce(&mut TaskInner),
    {
        let handle = {
            let mut inner = self.inner.inner.lock();
            if inner.state != TaskState::Suspended {
                return false;
            }
            setup(&mut inner);
            inner.state = TaskState::Running;
            inner.in_flight = Some(self.clone());
            inner.handle.clone()
        };
        if let Some(handle) = handle {
            handle.resume();
        }
        true
    }

    /// Start the task, calling one of the closures when it resolves.
    ///
    /// Has no effect unless the task is suspended. Closures run on whichever thread the
    /// transport completes on.
    pub fn consume<S, F>(&self, on_success: S, on_failure: F) -> &Self
    where
        S: FnOnce(Response) + Send + 'static,
        F: FnOnce(Error) + Send + 'static,
    {
        self.start(|inner| {
            inner.closures.on_success = Some(Box::new(on_success));
            inner.closures.on_failure = Some(Box::new(on_failure));
        });
        self
    }

    /// Start the task and block the current thread until it resolves, including retries.
    ///
    /// If the task is not suspended, the known outcome is returned immediately. This
    /// blocks the thread: never call it from a thread the transport needs to deliver
    /// completions, or it will never return.
    pub fn blocking_consume(&self) -> Result<Response, Error> {
        let latch = Arc::new(Latch::new());
        if self.start(|inner| inner.latch = Some(latch.clone())) {
            latch.wait();
        }
        self.inner.inner.lock().result()
    }

    /// Like [`Task::blocking_consume`], but gives up after `timeout`.
    ///
    /// An elapsed timeout is reported as a [`ErrorCode::TimedOut`] transport error; the
    /// transfer itself keeps running.
    pub fn blocking_consume_timeout(&self, timeout: Duration) -> Result<Response, Error> {
        let latch = Arc::new(Latch::new());
        if self.start(|inner| inner.latch = Some(latch.clone())) && !latch.wait_timeout(timeout) {
            tracing::debug!(task = %self.id(), ?timeout, "gave up waiting for task");
            return Err(Error::transport(
                ErrorCode::TimedOut,
                "timed out waiting for the task to finish",
            ));
        }
        self.inner.inner.lock().result()
    }

    /// Start the task and wait for it to resolve without blocking the thread.
    ///
    /// If the task is not suspended, the known outcome is returned immediately.
    pub async fn resolve(&self) -> Result<Response, Error> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        let tx = Arc::new(Mutex::new(Some(tx)));
        let failure_tx = tx.clone();

        let started = self.start(|inner| {
            inner.closures.on_success = Some(Box::new(move |response| {
                if let Some(tx) = tx.lock().take() {
                    let _ = tx.send(Ok(response));
                }
            }));
            inner.closures.on_failure = Some(Box::new(move |error| {
                if let Some(tx) = failure_tx.lock().take() {
                    let _ = tx.send(Err(error));
                }
            }));
        });

        if !started {
            return self.inner.inner.lock().result();
        }
        rx.await.unwrap_or_else(|_| Err(Error::unknown()))
    }

    /// Register a closure called on every progress update.
    pub fn on_progress<F>(&self, on_progress: F) -> &Self
    where
        F: Fn(&Progress) + Send + Sync + 'static,
    {
        self.inner.inner.lock().closures.on_progress = Some(Arc::new(on_progress));
        self
    }

    /// Register a retry policy for this task.
    ///
    /// It is consulted before the session's policy; the session's policy is only asked
    /// when this one declines.
    pub fn retry<F>(&self, policy: F) -> &Self
    where
        F: Fn(Option<&Response>, Option<&Error>, u32) -> bool + Send + Sync + 'static,
    {
        self.inner.inner.lock().closures.retry = Some(Arc::new(policy));
        self
    }

    /// Drop every registered closure.
    pub fn clear_handlers(&self) {
        let closures = std::mem::take(&mut self.inner.inner.lock().closures);
        drop(closures);
    }

    /// Start or continue the transfer.
    pub fn resume(&self) {
        let handle = {
            let mut inner = self.inner.inner.lock();
            if inner.state == TaskState::Suspended {
                inner.state = TaskState::Running;
                inner.in_flight.get_or_insert_with(|| self.clone());
            }
            inner.handle.clone()
        };
        if let Some(handle) = handle {
            handle.resume();
        }
    }

    /// Pause the transfer.
    pub fn suspend(&self) {
        let handle = {
            let mut inner = self.inner.inner.lock();
            if matches!(
                inner.state,
                TaskState::Running | TaskState::WaitingForConnectivity
            ) {
                inner.state = TaskState::Suspended;
            }
            inner.handle.clone()
        };
        if let Some(handle) = handle {
            handle.suspend();
        }
    }

    /// Request cancellation. The task still completes, usually with a
    /// [`ErrorCode::Cancelled`] error, once the transport confirms.
    pub fn cancel(&self) {
        let handle = {
            let mut inner = self.inner.inner.lock();
            if inner.state != TaskState::Completed {
                inner.state = TaskState::Canceling;
            }
            inner.handle.clone()
        };
        if let Some(handle) = handle {
            handle.cancel();
        }
    }

    /// The response, if the task already has one.
    ///
    /// Fails with the task's error, or [`ErrorCode::ResourceUnavailable`] if the task
    /// has not resolved.
    pub fn cached(&self) -> Result<Response, Error> {
        let inner = self.inner.inner.lock();
        match (&inner.response, &inner.error) {
            (Some(response), _) => Ok(response.clone()),
            (None, Some(error)) => Err(error.clone()),
            (None, None) => Err(Error::transport(
                ErrorCode::ResourceUnavailable,
                "no response is available yet",
            )),
        }
    }

    pub(crate) fn kind(&self) -> &TransferKind {
        &self.inner.kind
    }

    /// Start a new attempt, returning its generation.
    pub(crate) fn next_generation(&self) -> u64 {
        let mut inner = self.inner.inner.lock();
        inner.generation += 1;
        inner.generation
    }

    pub(crate) fn is_current(&self, generation: u64) -> bool {
        self.inner.inner.lock().generation == generation
    }

    pub(crate) fn bind(&self, generation: u64, handle: Arc<dyn TransferHandle>) {
        let mut inner = self.inner.inner.lock();
        if inner.generation == generation {
            inner.handle = Some(handle);
        }
    }

    pub(crate) fn handle(&self) -> Option<Arc<dyn TransferHandle>> {
        self.inner.inner.lock().handle.clone()
    }

    /// Mirror a state reported by the transport. Completion is only set by outcomes.
    pub(crate) fn transport_state(&self, generation: u64, state: TaskState) {
        let mut inner = self.inner.inner.lock();
        if inner.generation == generation
            && inner.state != TaskState::Completed
            && state != TaskState::Completed
        {
            inner.state = state;
        }
    }

    /// Record the progress of the current attempt, returning the closure to notify.
    pub(crate) fn record_progress(
        &self,
        generation: u64,
        progress: Progress,
    ) -> Option<ProgressClosure> {
        let mut inner = self.inner.inner.lock();
        if inner.generation != generation {
            return None;
        }
        inner.progress = progress;
        inner.closures.on_progress.clone()
    }

    pub(crate) fn set_metrics(&self, generation: u64, metrics: TaskMetrics) {
        let mut inner = self.inner.inner.lock();
        if inner.generation == generation {
            inner.metrics = Some(metrics);
        }
    }

    pub(crate) fn set_outcome(&self, response: Option<Response>, error: Option<Error>) {
        self.inner.inner.lock().set_outcome(response, error);
    }

    pub(crate) fn retry_policy(&self) -> Option<RetryPolicy> {
        self.inner.inner.lock().closures.retry.clone()
    }

    /// Reset the outcome for another attempt. The task stays running, so consumers
    /// arriving mid-retry cannot claim it.
    pub(crate) fn prepare_retry(&self) {
        let mut inner = self.inner.inner.lock();
        inner.retry_count += 1;
        inner.response = None;
        inner.error = None;
        inner.state = TaskState::Running;
        inner.in_flight.get_or_insert_with(|| self.clone());
    }

    /// Resolve the task: release any blocked waiter, then run exactly one closure.
    pub(crate) fn finish(&self) {
        let (latch, closures, result, in_flight) = {
            let mut inner = self.inner.inner.lock();
            inner.state = TaskState::Completed;
            (
                inner.latch.take(),
                std::mem::take(&mut inner.closures),
                inner.result(),
                inner.in_flight.take(),
            )
        };

        if let Some(latch) = latch {
            latch.signal();
        }

        match result {
            Ok(response) => {
                if let Some(on_success) = closures.on_success {
                    on_success(response);
                }
            }
            Err(error) => {
                if let Some(on_failure) = closures.on_failure {
                    on_failure(error);
                }
            }
        }
        drop(in_flight);
    }
}

impl PartialEq for Task {
    fn eq(&self, other: &Self) -> bool {
        self.id() == other.id()
    }
}

impl Eq for Task {}

impl Hash for Task {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id().hash(state);
    }
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (state, description) = {
            let inner = self.inner.inner.lock();
            (inner.state, inner.description.clone())
        };
        write!(f, "Task {} ({})", self.id(), state)?;
        if let Some(description) = description {
            write!(f, " {description}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.inner.lock();
        f.debug_struct("Task")
            .field("id", &self.inner.id)
            .field("state", &inner.state)
            .field("retry_count", &inner.retry_count)
            .field("generation", &inner.generation)
            .finish()
    }
}
