//! Provider traits for raw telemetry data sources.

use std::sync::Arc;
use std::time::Duration;

use crate::Result;
use crate::signal::WaitResult;

/// Read-only access to the raw telemetry byte region.
///
/// Implementations expose a memory region published by the external process.
/// The region may be read concurrently from any number of threads without
/// locking; any value spanning more than one atomic word must be read through
/// the version-bracketed protocol in [`crate::region`].
pub trait DataProvider: Send + Sync + 'static {
    /// Copy `len` bytes starting at `offset` out of the mapped region.
    fn read_region(&self, offset: usize, len: usize) -> Result<Vec<u8>>;

    /// Block until the publisher signals fresh data or the timeout elapses.
    fn wait_for_data(&self, timeout: Duration) -> Result<WaitResult>;
}

/// Factory the acquisition worker uses to create providers.
///
/// Called only from the worker thread. A factory may block internally while
/// waiting for the external process to appear; per-request timeouts bound the
/// caller's wait either way. Errors are reported to every pending request and
/// never terminate the worker.
pub trait ProviderFactory: Send + Sync + 'static {
    fn create_provider(&self) -> Result<Arc<dyn DataProvider>>;
}

impl<F> ProviderFactory for F
where
    F: Fn() -> Result<Arc<dyn DataProvider>> + Send + Sync + 'static,
{
    fn create_provider(&self) -> Result<Arc<dyn DataProvider>> {
        self()
    }
}

/// Names of the kernel objects a telemetry publisher exposes.
///
/// Consumed by the Windows shared-memory provider; platform-neutral so
/// cross-platform code can carry a configuration around.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShmConfig {
    /// Name of the file mapping holding the telemetry region.
    pub mapping_name: String,
    /// Name of the auto-reset event signalled on fresh data.
    pub event_name: String,
}

impl ShmConfig {
    pub fn new(mapping_name: impl Into<String>, event_name: impl Into<String>) -> Self {
        Self { mapping_name: mapping_name.into(), event_name: event_name.into() }
    }
}
