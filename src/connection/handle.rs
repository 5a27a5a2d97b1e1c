//! Public connection handle state machine.
//!
//! A handle is a thin public object over a shared, reference-counted backing
//! snapshot. It moves Idle → Connecting → Open → Closed; Connecting rolls
//! back to Idle on failure, and Closed is terminal whether reached by
//! `close()` or by external teardown of the snapshot.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use futures::{Stream, StreamExt};
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::provider::DataProvider;
use crate::{Result, TelemetryError};

use super::ConnectionState;
use super::manager::ConnectionManager;
use super::request::Attachment;
use super::snapshot::Snapshot;

/// Public handle onto a telemetry feed.
///
/// Handles are minted by [`super::Feed::handle`]; any number of them may share
/// one underlying connection. Dropping a handle closes it.
pub struct FeedHandle {
    core: Arc<HandleCore>,
    manager: Arc<ConnectionManager>,
}

/// Shared state machine behind a handle.
///
/// Referenced weakly by the attachment tracker so external teardown can force
/// the transition to Closed without keeping the handle alive.
pub(crate) struct HandleCore {
    state: Mutex<HandleState>,
    events: broadcast::Sender<ConnectionState>,
    lifetime: CancellationToken,
}

struct HandleState {
    state: ConnectionState,
    disposed: bool,
    attachment: Option<Attachment>,
}

enum Begin {
    Started,
    AlreadyOpen,
}

impl HandleCore {
    pub(crate) fn new(event_capacity: usize) -> Arc<Self> {
        let (events, _) = broadcast::channel(event_capacity);
        Arc::new(Self {
            state: Mutex::new(HandleState {
                state: ConnectionState::Idle,
                disposed: false,
                attachment: None,
            }),
            events,
            lifetime: CancellationToken::new(),
        })
    }

    /// Cancelled when the handle is closed; async opens link against it.
    pub(crate) fn lifetime(&self) -> &CancellationToken {
        &self.lifetime
    }

    pub(crate) fn state(&self) -> ConnectionState {
        self.lock().state
    }

    /// Claim the single in-flight open slot.
    fn begin_open(&self) -> Result<Begin> {
        let mut guard = self.lock();
        if guard.disposed {
            return Err(TelemetryError::Disposed);
        }

        match guard.state {
            ConnectionState::Open => Ok(Begin::AlreadyOpen),
            ConnectionState::Connecting | ConnectionState::Closed => {
                Err(TelemetryError::state_conflict(guard.state))
            }
            ConnectionState::Idle => {
                guard.state = ConnectionState::Connecting;
                self.emit(ConnectionState::Connecting);
                Ok(Begin::Started)
            }
        }
    }

    /// Settle the in-flight open: store the attachment on success, roll back
    /// to Idle on failure. A handle is never left stuck in Connecting.
    fn finish_open(&self, outcome: Result<Attachment>) -> Result<()> {
        let mut guard = self.lock();
        match outcome {
            Ok(attachment)
                if !guard.disposed
                    && guard.state == ConnectionState::Connecting
                    && attachment.snapshot.is_open() =>
            {
                guard.attachment = Some(attachment);
                guard.state = ConnectionState::Open;
                self.emit(ConnectionState::Open);
                Ok(())
            }
            Ok(attachment) => {
                // Disposed, force-closed, or the snapshot died before we
                // could settle; give the slot back.
                let error = if guard.disposed {
                    TelemetryError::Disposed
                } else if guard.state == ConnectionState::Closed {
                    TelemetryError::state_conflict(ConnectionState::Closed)
                } else {
                    TelemetryError::acquisition_failed("connection closed during open")
                };
                if guard.state == ConnectionState::Connecting {
                    guard.state = ConnectionState::Idle;
                    self.emit(ConnectionState::Idle);
                }
                drop(guard);
                drop(attachment);
                Err(error)
            }
            Err(error) => {
                if guard.state == ConnectionState::Connecting {
                    guard.state = ConnectionState::Idle;
                    self.emit(ConnectionState::Idle);
                }
                Err(error)
            }
        }
    }

    /// External teardown observed: the provider went away.
    pub(crate) fn force_close(&self) {
        let mut guard = self.lock();
        if guard.disposed || guard.state == ConnectionState::Closed {
            return;
        }

        debug!("snapshot closed externally, forcing handle closed");
        guard.attachment = None;
        guard.state = ConnectionState::Closed;
        self.emit(ConnectionState::Closed);
    }

    /// Dispose; hands the attachment back so it drops outside the state lock
    /// (detaching may cascade into other handles' locks).
    fn close(&self) -> Option<Attachment> {
        let attachment = {
            let mut guard = self.lock();
            if guard.disposed {
                return None;
            }
            guard.disposed = true;
            let attachment = guard.attachment.take();
            if guard.state != ConnectionState::Closed {
                guard.state = ConnectionState::Closed;
                self.emit(ConnectionState::Closed);
            }
            attachment
        };

        self.lifetime.cancel();
        attachment
    }

    fn snapshot_view(&self) -> Option<Snapshot> {
        let guard = self.lock();
        match (&guard.attachment, guard.state) {
            (Some(attachment), _) => Some(Snapshot::Open(Arc::clone(&attachment.snapshot))),
            (None, ConnectionState::Closed) => Some(Snapshot::closed()),
            _ => None,
        }
    }

    fn provider(&self) -> Result<Arc<dyn DataProvider>> {
        let guard = self.lock();
        if guard.disposed {
            return Err(TelemetryError::Disposed);
        }
        match &guard.attachment {
            Some(attachment) => attachment.snapshot.provider(),
            None => Err(TelemetryError::state_conflict(guard.state)),
        }
    }

    fn emit(&self, state: ConnectionState) {
        // Nobody subscribed is fine.
        let _ = self.events.send(state);
    }

    fn lock(&self) -> MutexGuard<'_, HandleState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl FeedHandle {
    pub(super) fn new(manager: Arc<ConnectionManager>) -> Self {
        let core = HandleCore::new(manager.event_capacity());
        Self { core, manager }
    }

    /// Open the connection, blocking up to `timeout`.
    ///
    /// `Duration::MAX` waits indefinitely. Opening an already-open handle is
    /// an immediate no-op; a second open while one is in flight fails with
    /// [`TelemetryError::StateConflict`]. Must not be called from async
    /// context — use [`FeedHandle::open_async`] there.
    pub fn open(&self, timeout: Duration) -> Result<()> {
        match self.core.begin_open()? {
            Begin::AlreadyOpen => {
                trace!("open on an already-open handle is a no-op");
                return Ok(());
            }
            Begin::Started => {}
        }

        let outcome = self.manager.acquire_blocking(&self.core, timeout);
        self.core.finish_open(outcome)
    }

    /// Open the connection without blocking the calling thread.
    ///
    /// The wait ends on whichever fires first: completion, `cancel`, the
    /// handle's own disposal, or the timeout. Cancellation surfaces as
    /// [`TelemetryError::Cancelled`], distinct from timeout.
    pub async fn open_async(&self, timeout: Duration, cancel: CancellationToken) -> Result<()> {
        match self.core.begin_open()? {
            Begin::AlreadyOpen => {
                trace!("open on an already-open handle is a no-op");
                return Ok(());
            }
            Begin::Started => {}
        }

        let outcome = self.manager.acquire(&self.core, timeout, cancel).await;
        self.core.finish_open(outcome)
    }

    /// Detach from the feed and close the handle; idempotent.
    ///
    /// Cancels any outstanding async open. If this was the snapshot's last
    /// attachment and close-on-empty is enabled, the underlying connection is
    /// released.
    pub fn close(&self) {
        // The attachment drops out here, outside the state lock, returning
        // its slot to the tracker.
        drop(self.core.close());
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        self.core.state()
    }

    /// Current snapshot view: open while attached, the closed sentinel after
    /// teardown, `None` before the first successful open.
    pub fn snapshot(&self) -> Option<Snapshot> {
        self.core.snapshot_view()
    }

    /// The raw data provider behind this handle, while open.
    pub fn provider(&self) -> Result<Arc<dyn DataProvider>> {
        self.core.provider()
    }

    /// Stream of state transitions in emission order.
    ///
    /// Connecting is always observed before Open or the failure rollback to
    /// Idle. The stream buffers a bounded number of events; a subscriber that
    /// lags far behind skips ahead rather than blocking the handle.
    pub fn state_changes(&self) -> impl Stream<Item = ConnectionState> + Send + 'static {
        BroadcastStream::new(self.core.events.subscribe())
            .filter_map(|event| async move { event.ok() })
    }
}

impl Drop for FeedHandle {
    fn drop(&mut self) {
        self.close();
    }
}
