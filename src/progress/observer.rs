use std::sync::{Arc, Weak};

use http::HeaderMap;
use tracing::trace;

use super::Progress;
use crate::transport::{ByteCounters, TransferHandle, TransferState};

/// Header carrying the size of a body before transport-level compression.
pub(crate) const UNCOMPRESSED_CONTENT_LENGTH: &str = "x-uncompressed-content-length";

/// Folds the counters of one transfer into a single [`Progress`].
#[derive(Debug, Default)]
pub(crate) struct ProgressObserver {
    progress: Option<Progress>,
    detached: bool,
}

impl ProgressObserver {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Apply a counter update, creating the progress on first use.
    ///
    /// Returns `None` once the transfer has completed.
    pub(crate) fn observe(
        &mut self,
        counters: ByteCounters,
        headers: Option<&HeaderMap>,
        handle: Option<&Arc<dyn TransferHandle>>,
    ) -> Option<Progress> {
        if self.detached {
            trace!("ignoring progress after completion");
            return None;
        }

        let completed = counters.sent.max(counters.received);
        let total = headers
            .and_then(|h| h.get(UNCOMPRESSED_CONTENT_LENGTH))
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
            .or(match (counters.expected_to_send, counters.expected_to_receive) {
                (Some(send), Some(receive)) => Some(send.max(receive)),
                (send, receive) => send.or(receive),
            });

        let progress = self
            .progress
            .get_or_insert_with(|| bind(total, handle.map(Arc::downgrade)));
        progress.update(completed, total);
        trace!(completed, ?total, "progress");
        Some(progress.clone())
    }

    pub(crate) fn state_changed(&mut self, state: TransferState) {
        match state {
            TransferState::Suspended => {
                if let Some(progress) = &self.progress {
                    progress.mark_paused(true);
                }
            }
            TransferState::Running => {
                if let Some(progress) = &self.progress {
                    progress.mark_paused(false);
                }
            }
            TransferState::Canceling => {
                if let Some(progress) = &self.progress {
                    progress.mark_cancelled();
                }
            }
            TransferState::Completed => self.detached = true,
        }
    }
}

fn bind(total: Option<u64>, handle: Option<Weak<dyn TransferHandle>>) -> Progress {
    let Some(handle) = handle else {
        return Progress::new(total);
    };

    let control = |action: fn(&dyn TransferHandle)| -> Option<Box<dyn Fn() + Send + Sync>> {
        let handle = handle.clone();
        Some(Box::new(move || {
            if let Some(handle) = handle.upgrade() {
                action(handle.as_ref());
            }
        }))
    };

    Progress::with_controls(
        total,
        control(|h| h.suspend()),
        control(|h| h.resume()),
        control(|h| h.cancel()),
    )
}
