//! Request creation, optimistic completion, and the pending queue.
//!
//! Separating "try immediately" from "queue and wait" keeps opens off the
//! worker thread whenever a live snapshot already exists; only unsatisfied
//! requests ever reach the queue.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, mpsc};
use std::time::{Duration, Instant};

use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::error::AcquisitionSource;
use crate::{Result, TelemetryError};

use super::handle::HandleCore;
use super::snapshot::{AttachmentId, OpenSnapshot};

/// One handle's live attachment to an open snapshot.
pub(crate) struct Attachment {
    pub(crate) snapshot: Arc<OpenSnapshot>,
    id: AttachmentId,
}

impl Attachment {
    /// Explicitly release this handle's interest in the snapshot. The work is
    /// done by `Drop`; this just names the intent and consumes the value.
    pub(crate) fn detach(self) {}
}

impl Drop for Attachment {
    /// Detaching on drop means an attachment can never leak out of the
    /// tracker, even when a completion lands in a channel whose receiver
    /// already gave up.
    fn drop(&mut self) {
        self.snapshot.detach(self.id);
    }
}

pub(crate) type AcquireOutcome = Result<Attachment>;

/// Completion channel back to the requesting caller.
enum Responder {
    Sync(mpsc::Sender<AcquireOutcome>),
    Async(oneshot::Sender<AcquireOutcome>),
}

/// A single connect intent, consumed exactly once.
pub(crate) struct AcquireRequest {
    core: Arc<HandleCore>,
    responder: Responder,
    timeout: Duration,
    deadline: Option<Instant>,
    cancel: CancellationToken,
}

impl AcquireRequest {
    fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    fn is_expired(&self) -> bool {
        self.deadline.is_some_and(|deadline| Instant::now() >= deadline)
    }

    /// Deliver the outcome; a successful attachment nobody is waiting for is
    /// handed straight back to the tracker when the rejected value drops.
    fn complete(self, outcome: AcquireOutcome) {
        let rejected = match self.responder {
            Responder::Sync(tx) => tx.send(outcome).err().map(|e| e.0),
            Responder::Async(tx) => tx.send(outcome).err(),
        };

        if let Some(Ok(attachment)) = rejected {
            trace!("caller stopped waiting before completion, detaching");
            drop(attachment);
        }
    }
}

/// Converts connect intents into requests and resolves them against the
/// current snapshot.
///
/// Owns the pending queue and the current-snapshot slot. Producers only
/// enqueue; the acquisition worker is the sole drainer of the queue and the
/// sole writer of the slot.
pub(crate) struct RequestManager {
    queue: Mutex<VecDeque<AcquireRequest>>,
    current: Mutex<Option<Arc<OpenSnapshot>>>,
}

impl RequestManager {
    pub(crate) fn new() -> Self {
        Self { queue: Mutex::new(VecDeque::new()), current: Mutex::new(None) }
    }

    /// Allocate a blocking request and its completion channel.
    pub(crate) fn create_sync(
        &self,
        core: Arc<HandleCore>,
        timeout: Duration,
        cancel: CancellationToken,
    ) -> (AcquireRequest, mpsc::Receiver<AcquireOutcome>) {
        let (tx, rx) = mpsc::channel();
        let request = AcquireRequest {
            core,
            responder: Responder::Sync(tx),
            timeout,
            deadline: deadline_for(timeout),
            cancel,
        };
        (request, rx)
    }

    /// Allocate an async request and its completion channel.
    pub(crate) fn create_async(
        &self,
        core: Arc<HandleCore>,
        timeout: Duration,
        cancel: CancellationToken,
    ) -> (AcquireRequest, oneshot::Receiver<AcquireOutcome>) {
        let (tx, rx) = oneshot::channel();
        let request = AcquireRequest {
            core,
            responder: Responder::Async(tx),
            timeout,
            deadline: deadline_for(timeout),
            cancel,
        };
        (request, rx)
    }

    /// Current snapshot if one is installed and still open.
    pub(crate) fn current_open(&self) -> Option<Arc<OpenSnapshot>> {
        self.lock_current().as_ref().filter(|snapshot| snapshot.is_open()).cloned()
    }

    /// Install a freshly created snapshot. Sole-writer: the acquisition
    /// worker only.
    pub(crate) fn install(&self, snapshot: Arc<OpenSnapshot>) {
        *self.lock_current() = Some(snapshot);
    }

    /// Optimistic path: resolve immediately when a live snapshot exists.
    /// Hands the request back when it must be queued instead.
    ///
    /// Runs on the caller thread right after the request was created, so the
    /// deadline cannot have elapsed meaningfully; only an already-cancelled
    /// token is honored here. Expiry belongs to the queue drain.
    pub(crate) fn try_complete(&self, request: AcquireRequest) -> Option<AcquireRequest> {
        match self.current_open() {
            Some(snapshot) => {
                if request.is_cancelled() {
                    request.complete(Err(TelemetryError::Cancelled));
                    return None;
                }
                self.attach_and_deliver(&snapshot, request)
            }
            None => Some(request),
        }
    }

    pub(crate) fn enqueue(&self, request: AcquireRequest) {
        let mut queue = self.lock_queue();
        queue.push_back(request);
        debug!(pending = queue.len(), "request queued");
    }

    pub(crate) fn has_pending(&self) -> bool {
        !self.lock_queue().is_empty()
    }

    /// Drain and resolve every pending request against `snapshot`.
    ///
    /// A request that loses the race with a concurrent close goes back to the
    /// front of the queue, in order, for the next snapshot.
    pub(crate) fn process_queue(&self, snapshot: &Arc<OpenSnapshot>) {
        let drained: Vec<AcquireRequest> = self.lock_queue().drain(..).collect();
        if drained.is_empty() {
            return;
        }

        trace!(count = drained.len(), "processing pending requests");
        let mut unresolved = Vec::new();
        for request in drained {
            if let Some(back) = self.resolve(snapshot, request) {
                unresolved.push(back);
            }
        }

        if !unresolved.is_empty() {
            let mut queue = self.lock_queue();
            for request in unresolved.into_iter().rev() {
                queue.push_front(request);
            }
        }
    }

    /// Broadcast failure of every pending request: all fail together, no
    /// partial success.
    pub(crate) fn fail_all(&self, reason: &str, source: Option<AcquisitionSource>) {
        let drained: Vec<AcquireRequest> = self.lock_queue().drain(..).collect();
        if drained.is_empty() {
            return;
        }

        debug!(failed = drained.len(), reason, "failing all pending requests");
        for request in drained {
            request.complete(Err(TelemetryError::Acquisition {
                reason: reason.to_string(),
                source: source.clone(),
            }));
        }
    }

    /// Resolve every pending request as cancelled (feed shutdown).
    pub(crate) fn cancel_all(&self) {
        let drained: Vec<AcquireRequest> = self.lock_queue().drain(..).collect();
        for request in drained {
            request.complete(Err(TelemetryError::Cancelled));
        }
    }

    /// Resolve one queued request against an open snapshot: prune stale ones,
    /// attach the rest. `Some` hands it back for retry against a fresh
    /// snapshot.
    fn resolve(
        &self,
        snapshot: &Arc<OpenSnapshot>,
        request: AcquireRequest,
    ) -> Option<AcquireRequest> {
        if request.is_cancelled() {
            request.complete(Err(TelemetryError::Cancelled));
            return None;
        }
        if request.is_expired() {
            let timeout = request.timeout;
            request.complete(Err(TelemetryError::timeout(timeout)));
            return None;
        }

        self.attach_and_deliver(snapshot, request)
    }

    fn attach_and_deliver(
        &self,
        snapshot: &Arc<OpenSnapshot>,
        request: AcquireRequest,
    ) -> Option<AcquireRequest> {
        match snapshot.attach(Arc::downgrade(&request.core)) {
            Some(id) => {
                let attachment = Attachment { snapshot: Arc::clone(snapshot), id };
                request.complete(Ok(attachment));
                None
            }
            // Snapshot closed under us; only a fresh one can satisfy this.
            None => Some(request),
        }
    }

    fn lock_queue(&self) -> std::sync::MutexGuard<'_, VecDeque<AcquireRequest>> {
        self.queue.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn lock_current(&self) -> std::sync::MutexGuard<'_, Option<Arc<OpenSnapshot>>> {
        self.current.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn deadline_for(timeout: Duration) -> Option<Instant> {
    if timeout == Duration::MAX {
        return None;
    }
    // An unreachable deadline is the same as no deadline.
    Instant::now().checked_add(timeout)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::MemoryProvider;

    fn manager_with_snapshot() -> (RequestManager, Arc<OpenSnapshot>) {
        let manager = RequestManager::new();
        let snapshot = OpenSnapshot::new(Arc::new(MemoryProvider::new(vec![0u8; 16])), true);
        manager.install(Arc::clone(&snapshot));
        (manager, snapshot)
    }

    fn core() -> Arc<HandleCore> {
        HandleCore::new(4)
    }

    #[test]
    fn optimistic_path_needs_an_installed_snapshot() {
        let manager = RequestManager::new();
        let (request, _rx) =
            manager.create_sync(core(), Duration::MAX, CancellationToken::new());

        let back = manager.try_complete(request);
        assert!(back.is_some(), "no snapshot yet, request must be handed back");
    }

    #[test]
    fn optimistic_path_attaches_and_delivers() {
        let (manager, snapshot) = manager_with_snapshot();
        let (request, rx) = manager.create_sync(core(), Duration::MAX, CancellationToken::new());

        assert!(manager.try_complete(request).is_none());
        let outcome = rx.recv().expect("completed").expect("attached");
        assert_eq!(snapshot.attachments(), 1);

        drop(outcome);
        assert_eq!(snapshot.attachments(), 0, "dropping the attachment detaches");
    }

    #[test]
    fn cancelled_request_resolves_to_cancelled() {
        let (manager, snapshot) = manager_with_snapshot();
        let cancel = CancellationToken::new();
        let (request, rx) = manager.create_sync(core(), Duration::MAX, cancel.clone());
        cancel.cancel();

        assert!(manager.try_complete(request).is_none());
        let outcome = rx.recv().expect("completed");
        assert!(matches!(outcome, Err(TelemetryError::Cancelled)));
        assert_eq!(snapshot.attachments(), 0, "cancelled request must not attach");
    }

    #[test]
    fn closed_snapshot_hands_requests_back_for_retry() {
        let (manager, snapshot) = manager_with_snapshot();
        snapshot.close();

        let (request, _rx) =
            manager.create_sync(core(), Duration::MAX, CancellationToken::new());
        manager.enqueue(request);

        manager.process_queue(&snapshot);
        assert!(manager.has_pending(), "request must wait for a fresh snapshot");
    }

    #[test]
    fn fail_all_shares_one_source_across_requests() {
        let manager = RequestManager::new();
        let (first, first_rx) =
            manager.create_sync(core(), Duration::MAX, CancellationToken::new());
        let (second, second_rx) =
            manager.create_sync(core(), Duration::MAX, CancellationToken::new());
        manager.enqueue(first);
        manager.enqueue(second);

        let source = AcquisitionSource::new(std::io::Error::other("mapping missing"));
        manager.fail_all("provider creation failed", Some(source));

        for rx in [first_rx, second_rx] {
            match rx.recv().expect("completed") {
                Err(TelemetryError::Acquisition { reason, source }) => {
                    assert_eq!(reason, "provider creation failed");
                    assert_eq!(source.expect("cause preserved").to_string(), "mapping missing");
                }
                other => panic!("expected Acquisition, got {:?}", other.map(|_| ())),
            }
        }
        assert!(!manager.has_pending());
    }

    #[test]
    fn abandoned_completion_detaches_immediately() {
        let (manager, snapshot) = manager_with_snapshot();
        let (request, rx) = manager.create_sync(core(), Duration::MAX, CancellationToken::new());
        drop(rx);

        assert!(manager.try_complete(request).is_none());
        assert_eq!(snapshot.attachments(), 0, "nobody received the attachment");
    }
}
