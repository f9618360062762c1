//! A scripted transport for tests.
//!
//! [`MockTransport`] never touches the network. Each submitted transfer takes the next
//! scripted [`Outcome`] (or a plain `200 OK` once the script runs out), and completes
//! with it as soon as it is resumed. In [holding](MockTransport::holding) mode transfers
//! only start running when resumed; the test then drives them through their
//! [`MockHandle`].

use std::collections::VecDeque;
use std::sync::Arc;

use http::{HeaderMap, StatusCode};
use parking_lot::Mutex;

use super::{
    next_transfer_id, ByteCounters, Failure, Outcome, RawResponse, Transfer, TransferHandle,
    TransferListener, TransferState, Transport, UploadSource,
};
use crate::auth::{Challenge, Credential, Disposition};
use crate::error::ErrorCode;
use crate::response::Payload;
use crate::task::metrics::TaskMetrics;

#[derive(Debug, Default)]
struct Script {
    outcomes: VecDeque<Outcome>,
    handles: Vec<Arc<MockHandle>>,
}

/// A transport which completes transfers with scripted outcomes.
#[derive(Debug, Clone, Default)]
pub struct MockTransport {
    script: Arc<Mutex<Script>>,
    hold: bool,
}

impl MockTransport {
    /// A transport which completes every transfer when it is resumed.
    pub fn new() -> Self {
        Self::default()
    }

    /// A transport whose transfers run until the test completes them.
    pub fn holding() -> Self {
        MockTransport {
            hold: true,
            ..Default::default()
        }
    }

    /// Queue the outcome of a future transfer.
    pub fn push(&self, outcome: Outcome) -> &Self {
        self.script.lock().outcomes.push_back(outcome);
        self
    }

    /// Every transfer submitted so far, in order.
    pub fn handles(&self) -> Vec<Arc<MockHandle>> {
        self.script.lock().handles.clone()
    }

    /// The most recently submitted transfer.
    pub fn last(&self) -> Option<Arc<MockHandle>> {
        self.script.lock().handles.last().cloned()
    }

    /// How many transfers have been submitted.
    pub fn submissions(&self) -> usize {
        self.script.lock().handles.len()
    }
}

/// A plain `200 OK` outcome carrying `body`.
pub fn ok(body: &'static str) -> Outcome {
    Outcome::success(
        RawResponse {
            status: Some(StatusCode::OK),
            ..Default::default()
        },
        Some(Payload::Bytes(body.into())),
    )
}

/// A failed outcome with an HTTP status and the matching response head.
pub fn status(status: StatusCode) -> Outcome {
    Outcome {
        payload: None,
        response: Some(RawResponse {
            status: Some(status),
            ..Default::default()
        }),
        failure: Some(Failure::new(
            ErrorCode::Status(status.as_u16()),
            status.canonical_reason().unwrap_or("unexpected status"),
        )),
    }
}

impl Transport for MockTransport {
    fn submit(&self, transfer: Transfer, listener: TransferListener) -> Arc<dyn TransferHandle> {
        let kind = transfer.kind();
        let (request, upload) = match transfer {
            Transfer::Fetch(request) | Transfer::Download(request) => {
                (Some(request.into_parts().0), None)
            }
            Transfer::Upload { request, source } => (Some(request.into_parts().0), Some(source)),
            Transfer::ResumeDownload(_) | Transfer::Stream { .. } => (None, None),
        };

        let mut script = self.script.lock();
        let outcome = script.outcomes.pop_front().unwrap_or_else(|| ok(""));
        let handle = Arc::new(MockHandle {
            id: next_transfer_id(),
            kind,
            request,
            upload,
            hold: self.hold,
            outcome: Mutex::new(Some(outcome)),
            state: Mutex::new(TransferState::Suspended),
            counters: Mutex::new(ByteCounters::default()),
            listener: Mutex::new(Some(Arc::new(listener))),
            calls: Mutex::new(Vec::new()),
        });
        script.handles.push(handle.clone());
        handle
    }
}

/// One transfer submitted to a [`MockTransport`].
#[derive(Debug)]
pub struct MockHandle {
    id: u64,
    kind: &'static str,
    request: Option<http::request::Parts>,
    upload: Option<UploadSource>,
    hold: bool,
    outcome: Mutex<Option<Outcome>>,
    state: Mutex<TransferState>,
    counters: Mutex<ByteCounters>,
    listener: Mutex<Option<Arc<TransferListener>>>,
    calls: Mutex<Vec<&'static str>>,
}

impl MockHandle {
    /// The listener, until the transfer completes.
    ///
    /// A clone taken before completion keeps reporting afterwards, like a transport
    /// delivering late events.
    pub fn listener(&self) -> Option<Arc<TransferListener>> {
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

    /// The kind of transfer, as named by [`Transfer::kind`].
    pub fn kind(&self) -> &'static str {
        self.kind
    }

    /// The request head, for request-backed transfers.
    pub fn request(&self) -> Option<&http::request::Parts> {
        self.request.as_ref()
    }

    /// The upload source, for uploads.
    pub fn upload(&self) -> Option<&UploadSource> {
        self.upload.as_ref()
    }

    /// Control calls received so far: `"suspend"`, `"resume"` and `"cancel"`.
    pub fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().clone()
    }

    /// Report byte counts to the session.
    pub fn emit_progress(&self, counters: ByteCounters, headers: Option<&HeaderMap>) {
        *self.counters.lock() = counters;
        if let Some(listener) = self.listener() {
            listener.progress(counters, headers);
        }
    }

    /// Report a state change without changing the handle's own state.
    pub fn emit_state(&self, state: TransferState) {
        if let Some(listener) = self.listener() {
            listener.state_changed(state);
        }
    }

    /// Report that the transfer is waiting for connectivity.
    pub fn emit_waiting_for_connectivity(&self) {
        if let Some(listener) = self.listener() {
            listener.waiting_for_connectivity();
        }
    }

    /// Raise an authentication challenge.
    ///
    /// Returns `None` once the transfer has completed.
    pub fn challenge(&self, challenge: &Challenge) -> Option<(Disposition, Option<Credential>)> {
        self.listener().map(|listener| listener.challenge(challenge))
    }

    /// Deliver metrics.
    pub fn emit_metrics(&self, metrics: TaskMetrics) {
        if let Some(listener) = self.listener() {
            listener.metrics(metrics);
        }
    }

    /// Complete the transfer with its scripted outcome.
    pub fn finish(&self) {
        let outcome = self.outcome.lock().take().unwrap_or_else(|| ok(""));
        self.complete(outcome);
    }

    /// Complete the transfer with `outcome`, releasing the listener.
    pub fn complete(&self, outcome: Outcome) {
        *self.state.lock() = TransferState::Completed;
        let listener = self.listener.lock().take();
        if let Some(listener) = listener {
            listener.state_changed(TransferState::Completed);
            listener.complete(outcome);
        }
    }

    /// Whether the listener has been released.
    pub fn is_released(&self) -> bool {
        self.listener.lock().is_none()
    }
}

impl TransferHandle for MockHandle {
    fn id(&self) -> u64 {
        self.id
    }

    fn state(&self) -> TransferState {
        *self.state.lock()
    }

    fn counters(&self) -> ByteCounters {
        *self.counters.lock()
    }

    fn suspend(&self) {
        self.calls.lock().push("suspend");
        self.transition(TransferState::Suspended);
    }

    fn resume(&self) {
        self.calls.lock().push("resume");
        if *self.state.lock() == TransferState::Completed {
            return;
        }
        self.transition(TransferState::Running);
        if self.hold {
            return;
        }

        let length = match self.outcome.lock().as_ref().and_then(|o| o.payload.as_ref()) {
            Some(Payload::Bytes(bytes)) => Some(bytes.len() as u64),
            _ => None,
        };
        if let Some(length) = length {
            self.emit_progress(
                ByteCounters {
                    received: length,
                    expected_to_receive: Some(length),
                    ..Default::default()
                },
                None,
            );
        }
        self.finish();
    }

    fn cancel(&self) {
        self.calls.lock().push("cancel");
        if *self.state.lock() == TransferState::Completed {
            return;
        }
        self.transition(TransferState::Canceling);
        self.complete(Outcome::failure(Failure::new(
            ErrorCode::Cancelled,
            "cancelled",
        )));
    }
}
