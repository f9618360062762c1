use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use http::HeaderMap;
use parking_lot::Mutex;
use tracing::{debug, trace};

use super::SessionRef;
use crate::auth::{self, Challenge, Credential, Disposition};
use crate::progress::ProgressObserver;
use crate::task::metrics::TaskMetrics;
use crate::task::{Task, TaskId, TaskState, WeakTask};
use crate::transport::{ByteCounters, Outcome, TransferState};

/// Receives the events of one submitted transfer.
///
/// A transport gets a listener with every [`Transfer`](crate::transport::Transfer) and
/// reports to it until it calls [`complete`](TransferListener::complete). Each listener
/// belongs to one attempt of a task: once the task has been retried, events from the
/// superseded attempt are dropped.
///
/// The listener does not keep its task alive: a task that is dropped before it is
/// started is freed along with its transfer, and later events are ignored. Started
/// tasks stay alive until they resolve.
pub struct TransferListener {
    id: TaskId,
    task: WeakTask,
    session: Arc<SessionRef>,
    generation: u64,
    observer: Mutex<ProgressObserver>,
    completed: AtomicBool,
}

impl TransferListener {
    pub(crate) fn new(task: &Task, session: Arc<SessionRef>, generation: u64) -> Self {
        TransferListener {
            id: task.id(),
            task: WeakTask::downgrade(task),
            session,
            generation,
            observer: Mutex::new(ProgressObserver::new()),
            completed: AtomicBool::new(false),
        }
    }

    /// The task, if it is alive and this listener belongs to its current attempt.
    fn current(&self, event: &'static str) -> Option<Task> {
        if self.completed.load(Ordering::Acquire) {
            trace!(task = %self.id, event, "ignoring event after completion");
            return None;
        }
        let Some(task) = self.task.upgrade() else {
            trace!(task = %self.id, event, "ignoring event for dropped task");
            return None;
        };
        if !task.is_current(self.generation) {
            trace!(
                task = %self.id,
                generation = self.generation,
                event,
                "ignoring event from superseded transfer"
            );
            return None;
        }
        Some(task)
    }

    /// Report byte counts, and the response headers once they are known.
    ///
    /// The task's progress closure runs before this returns.
    pub fn progress(&self, counters: ByteCounters, headers: Option<&HeaderMap>) {
        let Some(task) = self.current("progress") else {
            return;
        };

        let handle = task.handle();
        let Some(progress) = self
            .observer
            .lock()
            .observe(counters, headers, handle.as_ref())
        else {
            return;
        };

        if let Some(on_progress) = task.record_progress(self.generation, progress.clone()) {
            on_progress(&progress);
        }
    }

    /// Report a state change of the transfer.
    pub fn state_changed(&self, state: TransferState) {
        let Some(task) = self.current("state") else {
            return;
        };
        trace!(task = %self.id, ?state, "transfer state changed");
        self.observer.lock().state_changed(state);

        let state = match state {
            TransferState::Suspended => TaskState::Suspended,
            TransferState::Running => TaskState::Running,
            TransferState::Canceling => TaskState::Canceling,
            TransferState::Completed => return,
        };
        task.transport_state(self.generation, state);
    }

    /// Report that the transfer is waiting for network connectivity.
    pub fn waiting_for_connectivity(&self) {
        let Some(task) = self.current("waiting") else {
            return;
        };
        debug!(task = %self.id, "waiting for connectivity");
        task.transport_state(self.generation, TaskState::WaitingForConnectivity);
    }

    /// Ask how to answer an authentication challenge.
    pub fn challenge(&self, challenge: &Challenge) -> (Disposition, Option<Credential>) {
        let Some(task) = self.current("challenge") else {
            return (Disposition::CancelAuthenticationChallenge, None);
        };

        let answer = match &self.session.auth_challenge {
            Some(handler) => handler(challenge),
            None => auth::default_handling(
                challenge,
                task.request(),
                &self.session.server_trust,
            ),
        };
        debug!(
            task = %self.id,
            host = %challenge.host,
            method = ?challenge.method,
            disposition = ?answer.0,
            "answered challenge"
        );
        answer
    }

    /// Deliver timing metrics for the transfer.
    pub fn metrics(&self, metrics: TaskMetrics) {
        if let Some(task) = self.current("metrics") {
            task.set_metrics(self.generation, metrics);
        }
    }

    /// Finish the transfer. Only the first call has any effect.
    pub fn complete(&self, outcome: Outcome) {
        let Some(task) = self.current("complete") else {
            return;
        };
        if self.completed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.observer.lock().state_changed(TransferState::Completed);
        self.session.complete(&task, outcome);
    }
}

impl fmt::Debug for TransferListener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransferListener")
            .field("task", &self.id)
            .field("generation", &self.generation)
            .field("completed", &self.completed.load(Ordering::Relaxed))
            .finish()
    }
}
