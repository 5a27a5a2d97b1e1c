//! Connection manager façade and the public feed entry points.
//!
//! The manager turns a handle's connect intent into a request, tries the
//! optimistic path, and otherwise queues the request and keeps the
//! acquisition worker alive. Success, failure, timeout, and cancellation are
//! all reported back through the request's completion channel.

use std::sync::{Arc, mpsc};
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::provider::ProviderFactory;
use crate::{Result, TelemetryError};

use super::handle::{FeedHandle, HandleCore};
use super::request::{Attachment, RequestManager};
use super::worker::AcquisitionWorker;

/// Default worker re-evaluation interval.
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(250);
/// Default capacity of each handle's state-changed stream.
const DEFAULT_EVENT_CAPACITY: usize = 64;

/// Orchestrates the request manager and acquisition worker for handles.
pub(crate) struct ConnectionManager {
    requests: Arc<RequestManager>,
    worker: AcquisitionWorker,
    event_capacity: usize,
}

enum RecvFailure {
    Timeout,
    Disconnected,
}

impl ConnectionManager {
    fn new(
        factory: Box<dyn ProviderFactory>,
        poll_interval: Duration,
        close_on_empty: bool,
        event_capacity: usize,
    ) -> Self {
        let requests = Arc::new(RequestManager::new());
        let worker =
            AcquisitionWorker::new(factory, Arc::clone(&requests), poll_interval, close_on_empty);
        Self { requests, worker, event_capacity }
    }

    pub(crate) fn event_capacity(&self) -> usize {
        self.event_capacity
    }

    /// Blocking acquire used by [`FeedHandle::open`].
    pub(crate) fn acquire_blocking(
        &self,
        core: &Arc<HandleCore>,
        timeout: Duration,
    ) -> Result<Attachment> {
        // Child of the lifetime token: closing the handle cancels the request.
        let cancel = core.lifetime().child_token();
        let (request, rx) = self.requests.create_sync(Arc::clone(core), timeout, cancel.clone());

        if let Some(request) = self.requests.try_complete(request) {
            trace!("no live snapshot, queueing request");
            self.requests.enqueue(request);
            if let Err(error) = self.worker.ensure_running() {
                cancel.cancel();
                return Err(error);
            }
        }

        let received = if timeout == Duration::MAX {
            rx.recv().map_err(|_| RecvFailure::Disconnected)
        } else {
            rx.recv_timeout(timeout).map_err(|e| match e {
                mpsc::RecvTimeoutError::Timeout => RecvFailure::Timeout,
                mpsc::RecvTimeoutError::Disconnected => RecvFailure::Disconnected,
            })
        };

        match received {
            Ok(outcome) => outcome,
            Err(RecvFailure::Timeout) => {
                // Only this request times out; cancel it so the worker prunes
                // the queue entry instead of attaching on nobody's behalf.
                cancel.cancel();
                self.worker.wake();
                Err(TelemetryError::timeout(timeout))
            }
            Err(RecvFailure::Disconnected) => {
                cancel.cancel();
                Err(TelemetryError::acquisition_failed("acquisition worker went away"))
            }
        }
    }

    /// Async acquire used by [`FeedHandle::open_async`].
    ///
    /// The wait is the logical AND of "caller has not cancelled" and "handle
    /// has not been disposed", bounded by the timeout.
    pub(crate) async fn acquire(
        &self,
        core: &Arc<HandleCore>,
        timeout: Duration,
        caller: CancellationToken,
    ) -> Result<Attachment> {
        let lifetime = core.lifetime().clone();
        let cancel = lifetime.child_token();
        // Abandoning this future cancels the queued request with it.
        let _guard = cancel.clone().drop_guard();

        let (request, rx) = self.requests.create_async(Arc::clone(core), timeout, cancel);

        if let Some(request) = self.requests.try_complete(request) {
            trace!("no live snapshot, queueing request");
            self.requests.enqueue(request);
            self.worker.ensure_running()?;
        }

        tokio::select! {
            biased;
            outcome = rx => outcome.map_err(|_| {
                TelemetryError::acquisition_failed("acquisition worker went away")
            })?,
            _ = caller.cancelled() => Err(TelemetryError::Cancelled),
            _ = lifetime.cancelled() => Err(TelemetryError::Cancelled),
            _ = deadline_elapsed(timeout) => {
                self.worker.wake();
                Err(TelemetryError::timeout(timeout))
            }
        }
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        debug!("shutting down feed");
        // Pending requests resolve as cancelled; the thread exits on its own.
        self.worker.shutdown();
    }
}

async fn deadline_elapsed(timeout: Duration) {
    if timeout == Duration::MAX {
        std::future::pending::<()>().await;
    } else {
        tokio::time::sleep(timeout).await;
    }
}

/// A shared telemetry feed.
///
/// Owns the connection manager and mints [`FeedHandle`]s that share one
/// underlying connection. The feed itself never connects; handles do.
pub struct Feed {
    manager: Arc<ConnectionManager>,
}

impl Feed {
    /// Create a feed with default settings.
    pub fn new(factory: impl ProviderFactory) -> Self {
        Self::builder(factory).build()
    }

    /// Configure a feed before building it.
    pub fn builder(factory: impl ProviderFactory) -> FeedBuilder {
        FeedBuilder {
            factory: Box::new(factory),
            poll_interval: DEFAULT_POLL_INTERVAL,
            close_on_empty: true,
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }

    /// Mint a new, unopened handle onto this feed.
    pub fn handle(&self) -> FeedHandle {
        FeedHandle::new(Arc::clone(&self.manager))
    }
}

/// Configuration for a [`Feed`].
pub struct FeedBuilder {
    factory: Box<dyn ProviderFactory>,
    poll_interval: Duration,
    close_on_empty: bool,
    event_capacity: usize,
}

impl FeedBuilder {
    /// How often the acquisition worker re-evaluates without an external
    /// wake.
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Whether the underlying connection closes once its last handle
    /// detaches. Defaults to `true`.
    pub fn close_on_empty(mut self, enabled: bool) -> Self {
        self.close_on_empty = enabled;
        self
    }

    /// Capacity of each handle's state-changed broadcast stream.
    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity.max(1);
        self
    }

    pub fn build(self) -> Feed {
        Feed {
            manager: Arc::new(ConnectionManager::new(
                self.factory,
                self.poll_interval,
                self.close_on_empty,
                self.event_capacity,
            )),
        }
    }
}
