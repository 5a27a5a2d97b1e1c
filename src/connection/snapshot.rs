//! Connection snapshots and attachment tracking.
//!
//! A snapshot is the immutable view handles share: either a live provider or
//! the closed sentinel. The backing [`OpenSnapshot`] reference-counts its
//! attached handles and tears itself down once the last one detaches.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};

use tracing::{debug, trace};

use crate::connection::ConnectionState;
use crate::provider::DataProvider;
use crate::{Result, TelemetryError};

use super::handle::HandleCore;

/// Identifier for one handle's registered interest in an open snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AttachmentId(u64);

/// Marker for a connection that has been torn down; never reverts to open.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClosedSnapshot;

/// Immutable view of the current connection.
#[derive(Clone)]
pub enum Snapshot {
    /// An active handle onto the raw data provider.
    Open(Arc<OpenSnapshot>),
    /// The terminal closed sentinel.
    Closed(ClosedSnapshot),
}

impl Snapshot {
    /// Factory for the closed sentinel.
    pub fn closed() -> Self {
        Snapshot::Closed(ClosedSnapshot)
    }

    pub fn is_open(&self) -> bool {
        matches!(self, Snapshot::Open(open) if open.is_open())
    }
}

impl std::fmt::Debug for Snapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Snapshot::Open(open) => {
                f.debug_struct("Open").field("attachments", &open.attachments()).finish()
            }
            Snapshot::Closed(_) => f.write_str("Closed"),
        }
    }
}

/// The live connection shared by every attached handle.
///
/// Holds the raw data provider and the attachment tracker. The provider
/// reference is dropped on close so the underlying mapping is released once
/// the last reader clone goes away.
pub struct OpenSnapshot {
    provider: RwLock<Option<Arc<dyn DataProvider>>>,
    tracker: AttachmentTracker,
    closed: AtomicBool,
}

impl OpenSnapshot {
    pub(crate) fn new(provider: Arc<dyn DataProvider>, close_on_empty: bool) -> Arc<Self> {
        Arc::new(Self {
            provider: RwLock::new(Some(provider)),
            tracker: AttachmentTracker::new(close_on_empty),
            closed: AtomicBool::new(false),
        })
    }

    /// Whether the snapshot still fronts a live provider.
    pub fn is_open(&self) -> bool {
        !self.closed.load(Ordering::Acquire)
    }

    /// Number of handles currently attached.
    pub fn attachments(&self) -> usize {
        self.tracker.count()
    }

    /// The raw data provider, while the snapshot is open.
    pub fn provider(&self) -> Result<Arc<dyn DataProvider>> {
        self.provider
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .as_ref()
            .cloned()
            .ok_or(TelemetryError::StateConflict { state: ConnectionState::Closed })
    }

    /// Register a handle's interest; `None` once the snapshot has closed.
    pub(crate) fn attach(&self, handle: Weak<HandleCore>) -> Option<AttachmentId> {
        self.tracker.attach(handle)
    }

    /// Remove one attachment; the last one out closes the snapshot when
    /// close-on-empty is enabled.
    pub(crate) fn detach(&self, id: AttachmentId) {
        let now_empty = self.tracker.detach(id);
        if now_empty && self.tracker.close_on_empty() && self.is_open() {
            debug!("last attachment detached, closing snapshot");
            self.close();
        }
    }

    /// Tear the snapshot down; idempotent, first caller wins.
    ///
    /// Every still-attached handle is forced into Closed: the provider went
    /// away, which is distinct from a consumer explicitly detaching.
    pub(crate) fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        let survivors = self.tracker.drain();
        *self.provider.write().unwrap_or_else(|poisoned| poisoned.into_inner()) = None;

        let mut forced = 0usize;
        for handle in &survivors {
            if let Some(core) = handle.upgrade() {
                core.force_close();
                forced += 1;
            }
        }

        debug!(forced, "snapshot closed");
    }
}

/// Reference-counts the handles attached to one open snapshot.
///
/// Attachment ids are assigned monotonically; the count never goes below
/// zero because detach only removes ids it actually issued.
pub(crate) struct AttachmentTracker {
    close_on_empty: bool,
    inner: Mutex<TrackerInner>,
}

#[derive(Default)]
struct TrackerInner {
    next_id: u64,
    closed: bool,
    attached: HashMap<u64, Weak<HandleCore>>,
}

impl AttachmentTracker {
    fn new(close_on_empty: bool) -> Self {
        Self { close_on_empty, inner: Mutex::new(TrackerInner::default()) }
    }

    fn close_on_empty(&self) -> bool {
        self.close_on_empty
    }

    pub(crate) fn count(&self) -> usize {
        self.lock().attached.len()
    }

    fn attach(&self, handle: Weak<HandleCore>) -> Option<AttachmentId> {
        let mut inner = self.lock();
        if inner.closed {
            return None;
        }

        let id = inner.next_id;
        inner.next_id += 1;
        inner.attached.insert(id, handle);
        trace!(id, count = inner.attached.len(), "handle attached");
        Some(AttachmentId(id))
    }

    /// Returns whether this detach emptied the tracker.
    fn detach(&self, id: AttachmentId) -> bool {
        let mut inner = self.lock();
        if inner.attached.remove(&id.0).is_none() {
            // Unknown or repeated detach never re-triggers close-on-empty.
            return false;
        }
        trace!(id = id.0, count = inner.attached.len(), "handle detached");
        inner.attached.is_empty()
    }

    /// Mark closed and hand back the remaining attachments for forced close.
    fn drain(&self) -> Vec<Weak<HandleCore>> {
        let mut inner = self.lock();
        inner.closed = true;
        inner.attached.drain().map(|(_, handle)| handle).collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, TrackerInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::MemoryProvider;

    fn open_snapshot(close_on_empty: bool) -> Arc<OpenSnapshot> {
        OpenSnapshot::new(Arc::new(MemoryProvider::new(vec![0u8; 32])), close_on_empty)
    }

    fn dangling_handle() -> Weak<HandleCore> {
        Arc::downgrade(&HandleCore::new(4))
    }

    #[test]
    fn attachment_ids_are_monotonic() {
        let snapshot = open_snapshot(true);
        let first = snapshot.attach(dangling_handle()).expect("open");
        let second = snapshot.attach(dangling_handle()).expect("open");

        assert!(first < second);
        assert_eq!(snapshot.attachments(), 2);
    }

    #[test]
    fn close_on_empty_fires_exactly_once() {
        let snapshot = open_snapshot(true);
        let a = snapshot.attach(dangling_handle()).expect("open");
        let b = snapshot.attach(dangling_handle()).expect("open");

        snapshot.detach(a);
        assert!(snapshot.is_open(), "one attachment left, must stay open");

        snapshot.detach(b);
        assert!(!snapshot.is_open(), "count reached zero");
        assert!(snapshot.provider().is_err(), "provider released on close");

        // Repeated detach or close stays settled.
        snapshot.detach(b);
        snapshot.close();
        assert!(!snapshot.is_open());
    }

    #[test]
    fn close_on_empty_disabled_keeps_snapshot_open() {
        let snapshot = open_snapshot(false);
        let id = snapshot.attach(dangling_handle()).expect("open");

        snapshot.detach(id);
        assert!(snapshot.is_open());
        assert!(snapshot.provider().is_ok());
    }

    #[test]
    fn attach_after_close_is_refused() {
        let snapshot = open_snapshot(true);
        snapshot.close();

        assert!(snapshot.attach(dangling_handle()).is_none());
    }

    #[test]
    fn closed_sentinel_factory() {
        let sentinel = Snapshot::closed();
        assert!(!sentinel.is_open());
        assert!(matches!(sentinel, Snapshot::Closed(ClosedSnapshot)));
    }
}
