//! Rust client for attaching to shared-memory telemetry feeds.
//!
//! Paddock lets any number of independent consumers attach to a live
//! telemetry feed published by an external process through a shared memory
//! region, using a request/acquire protocol that tolerates the publisher not
//! yet being present.
//!
//! # Features
//!
//! - **Shared Acquisition**: one background worker owns the real
//!   shared-memory handle; every handle shares it through a reference-counted
//!   snapshot
//! - **Sync and Async Opens**: blocking [`FeedHandle::open`] with no runtime
//!   required, or [`FeedHandle::open_async`] with timeout and cancellation
//! - **Graceful Teardown**: the last handle closing releases the underlying
//!   connection; external teardown forces every attached handle to Closed
//! - **Safe Concurrent Reads**: version-bracketed double reads over the
//!   externally written region
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use paddock::{DataProvider, Feed, Result, WaitResult};
//!
//! struct StubProvider;
//!
//! impl DataProvider for StubProvider {
//!     fn read_region(&self, _offset: usize, len: usize) -> Result<Vec<u8>> {
//!         Ok(vec![0; len])
//!     }
//!     fn wait_for_data(&self, _timeout: Duration) -> Result<WaitResult> {
//!         Ok(WaitResult::Signaled)
//!     }
//! }
//!
//! fn main() -> Result<()> {
//!     let feed = Feed::new(|| -> Result<Arc<dyn DataProvider>> { Ok(Arc::new(StubProvider)) });
//!
//!     let handle = feed.handle();
//!     handle.open(Duration::from_secs(5))?;
//!
//!     let bytes = handle.provider()?.read_region(0, 16)?;
//!     println!("read {} bytes", bytes.len());
//!
//!     handle.close();
//!     Ok(())
//! }
//! ```

// Core types and error handling
pub mod command;
mod error;
pub mod provider;
pub mod region;
pub mod signal;
#[cfg(any(test, feature = "benchmark"))]
pub mod test_utils;

// Acquisition and lifecycle
pub mod connection;

// Platform-specific modules
#[cfg(windows)]
pub mod windows;

// Core exports
pub use command::{Command, CommandId, CommandMessage, CommandSink};
pub use error::{AcquisitionSource, Result, TelemetryError};
pub use provider::{DataProvider, ProviderFactory, ShmConfig};
pub use region::{TORN_READ_RETRY_LIMIT, VersionedRegion, read_consistent};
pub use signal::{AutoResetSignal, WaitResult};

// Acquisition exports
pub use connection::{
    AttachmentId, ClosedSnapshot, ConnectionState, Feed, FeedBuilder, FeedHandle, OpenSnapshot,
    Snapshot,
};

// Windows exports
#[cfg(windows)]
pub use windows::{MessageSink, ShmProvider, ShmProviderFactory};

/// Unified entry point for telemetry feeds.
///
/// # Examples
///
/// ## Live shared memory (Windows)
/// ```rust,no_run
/// use paddock::{Paddock, ShmConfig};
/// use std::time::Duration;
///
/// fn main() -> paddock::Result<()> {
///     let config = ShmConfig::new("Local\\TelemetryRegion", "Local\\TelemetryDataValid");
///     let feed = Paddock::attach(config)?;
///
///     let handle = feed.handle();
///     handle.open(Duration::from_secs(30))?;
///     Ok(())
/// }
/// ```
///
/// ## Custom provider (cross-platform)
/// ```rust,ignore
/// let feed = Paddock::with_factory(my_factory);
/// ```
pub struct Paddock;

impl Paddock {
    /// Attach to a live shared-memory feed.
    ///
    /// # Platform
    ///
    /// Only available on Windows, where shared-memory publishers run. On
    /// other platforms this returns an `UnsupportedPlatform` error; use
    /// [`Paddock::with_factory`] with a custom provider for cross-platform
    /// testing.
    #[cfg(windows)]
    pub fn attach(config: ShmConfig) -> Result<Feed> {
        Ok(Feed::new(ShmProviderFactory::new(config)))
    }

    /// Attach to a live shared-memory feed.
    ///
    /// Live feeds require Windows; this build always returns an
    /// `UnsupportedPlatform` error. Use [`Paddock::with_factory`] with a
    /// custom provider instead.
    #[cfg(not(windows))]
    pub fn attach(_config: ShmConfig) -> Result<Feed> {
        Err(TelemetryError::unsupported_platform("Live telemetry", "Windows"))
    }

    /// Build a feed over a custom provider factory.
    pub fn with_factory(factory: impl ProviderFactory) -> Feed {
        Feed::new(factory)
    }
}
