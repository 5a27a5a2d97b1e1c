//! Connection acquisition and lifecycle.
//!
//! The core of the crate: a public handle state machine over a shared,
//! reference-counted backing snapshot, a request manager with an optimistic
//! completion path, and a background acquisition worker that owns the actual
//! provider handle.
//!
//! ```text
//! FeedHandle::open ──► ConnectionManager ──► RequestManager::try_complete
//!                                               │ unsatisfied
//!                                               ▼
//!                                        pending queue ──► AcquisitionWorker
//! ```

mod handle;
mod manager;
mod request;
mod snapshot;
mod worker;


use serde::{Deserialize, Serialize};

pub use handle::FeedHandle;
pub use manager::{Feed, FeedBuilder};
pub use snapshot::{AttachmentId, ClosedSnapshot, OpenSnapshot, Snapshot};

/// Externally visible lifecycle state of a [`FeedHandle`].
///
/// Exactly one transition to `Connecting` may be in flight per handle;
/// `Connecting` resolves to `Open` or rolls back to `Idle`; `Closed` is
/// terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConnectionState {
    /// No connection attached.
    Idle,
    /// An open attempt is in flight.
    Connecting,
    /// Attached to a live snapshot.
    Open,
    /// Terminal: closed by disposal or external teardown.
    Closed,
}
