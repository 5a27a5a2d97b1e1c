//! Error types for feed acquisition and telemetry access.
//!
//! All errors implement the `std::error::Error` trait and preserve their
//! underlying cause where one exists.
//!
//! ## Error Categories
//!
//! - **Lifecycle Errors**: `Disposed`, `StateConflict` — misuse of a handle
//! - **Wait Errors**: `Timeout`, `Cancelled` — the open attempt ended early
//! - **Acquisition Errors**: the provider factory failed; broadcast to every
//!   pending request with a shared cause
//! - **Memory Errors**: out-of-bounds or torn reads of the mapped region
//! - **Windows API Errors**: platform-specific operation failures
//!
//! ## Recovery and Retry
//!
//! Errors can be classified for retry handling:
//!
//! ```rust
//! use paddock::TelemetryError;
//!
//! let error = TelemetryError::acquisition_failed("publisher not running");
//! if error.is_retryable() {
//!     for suggestion in error.recovery_suggestions() {
//!         println!("  - {}", suggestion);
//!     }
//! }
//! ```

use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::connection::ConnectionState;

#[cfg(windows)]
use windows_core as core;

/// Result type alias for telemetry operations.
pub type Result<T, E = TelemetryError> = std::result::Result<T, E>;

/// Shared, cloneable cause for broadcast acquisition failures.
///
/// Provider-factory errors are delivered to every pending request at once, so
/// the underlying cause is reference-counted rather than boxed per request.
#[derive(Debug, Clone)]
pub struct AcquisitionSource(Arc<dyn std::error::Error + Send + Sync>);

impl AcquisitionSource {
    /// Wrap a concrete error as a shareable cause.
    pub fn new(source: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self(Arc::new(source))
    }

    /// Wrap an already-boxed error as a shareable cause.
    pub fn from_boxed(source: Box<dyn std::error::Error + Send + Sync>) -> Self {
        Self(Arc::from(source))
    }
}

impl std::fmt::Display for AcquisitionSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Display::fmt(&self.0, f)
    }
}

impl std::error::Error for AcquisitionSource {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.0.source()
    }
}

/// Main error type for telemetry operations.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum TelemetryError {
    #[error("handle has been closed")]
    Disposed,

    #[error("invalid operation while connection is {state:?}")]
    StateConflict { state: ConnectionState },

    #[error("operation timed out after {duration:?}")]
    Timeout { duration: Duration },

    #[error("open request was cancelled")]
    Cancelled,

    #[error("failed to acquire telemetry provider: {reason}")]
    Acquisition {
        reason: String,
        #[source]
        source: Option<AcquisitionSource>,
    },

    #[error("memory access violation at offset {offset:#x}")]
    Memory {
        offset: usize,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("torn read detected after {attempts} attempts")]
    TornRead { attempts: usize },

    #[error("{feature} is only available on {required_platform}")]
    UnsupportedPlatform { feature: String, required_platform: String },

    #[error("Windows API error: {operation}")]
    #[cfg(windows)]
    WindowsApi {
        operation: String,
        #[source]
        source: core::Error,
    },
}

impl TelemetryError {
    /// Returns whether this error is potentially recoverable through retry.
    pub fn is_retryable(&self) -> bool {
        match self {
            TelemetryError::Disposed => false,
            TelemetryError::StateConflict { .. } => false,
            TelemetryError::Timeout { .. } => true,
            TelemetryError::Cancelled => false,
            TelemetryError::Acquisition { .. } => true,
            TelemetryError::Memory { .. } => false,
            TelemetryError::TornRead { .. } => true,
            TelemetryError::UnsupportedPlatform { .. } => false,
            #[cfg(windows)]
            TelemetryError::WindowsApi { .. } => true,
        }
    }

    /// Returns suggested recovery actions for this error.
    pub fn recovery_suggestions(&self) -> Vec<&'static str> {
        match self {
            TelemetryError::Disposed => vec![
                "Create a fresh handle from the feed",
                "Check for a close() racing the open call",
            ],
            TelemetryError::StateConflict { .. } => vec![
                "Wait for the in-flight open to settle before retrying",
                "Open each handle from a single owner",
            ],
            TelemetryError::Timeout { .. } => vec![
                "Increase the open timeout",
                "Verify the telemetry publisher is running",
            ],
            TelemetryError::Cancelled => {
                vec!["Check whether the handle was closed while opening"]
            }
            TelemetryError::Acquisition { .. } => vec![
                "Ensure the telemetry publisher is running",
                "Check permissions for shared memory access",
                "Retry once the publisher has started a session",
            ],
            TelemetryError::Memory { .. } => vec![
                "Check memory access bounds",
                "Verify the shared region is still mapped",
            ],
            TelemetryError::TornRead { .. } => vec![
                "Retry the read",
                "Verify the publisher updates its version counter correctly",
            ],
            TelemetryError::UnsupportedPlatform { .. } => vec![
                "Use a custom provider factory for cross-platform testing",
                "Check documentation for platform requirements",
            ],
            #[cfg(windows)]
            TelemetryError::WindowsApi { .. } => vec![
                "Check Windows API permissions",
                "Verify system resources availability",
            ],
        }
    }

    /// Helper constructor for state-conflict errors.
    pub fn state_conflict(state: ConnectionState) -> Self {
        TelemetryError::StateConflict { state }
    }

    /// Helper constructor for timeout errors.
    pub fn timeout(duration: Duration) -> Self {
        TelemetryError::Timeout { duration }
    }

    /// Helper constructor for acquisition failures without a cause.
    pub fn acquisition_failed(reason: impl Into<String>) -> Self {
        TelemetryError::Acquisition { reason: reason.into(), source: None }
    }

    /// Helper constructor for acquisition failures with a shared cause.
    pub fn acquisition_failed_with_source(
        reason: impl Into<String>,
        source: AcquisitionSource,
    ) -> Self {
        TelemetryError::Acquisition { reason: reason.into(), source: Some(source) }
    }

    /// Helper constructor for memory access errors.
    pub fn memory_access_error(offset: usize) -> Self {
        TelemetryError::Memory { offset, source: None }
    }

    /// Helper constructor for torn-read errors.
    pub fn torn_read(attempts: usize) -> Self {
        TelemetryError::TornRead { attempts }
    }

    /// Helper constructor for unsupported platform errors.
    pub fn unsupported_platform(
        feature: impl Into<String>,
        required_platform: impl Into<String>,
    ) -> Self {
        TelemetryError::UnsupportedPlatform {
            feature: feature.into(),
            required_platform: required_platform.into(),
        }
    }

    /// Helper constructor for Windows API errors.
    #[cfg(windows)]
    pub fn windows_api_error(operation: impl Into<String>, source: core::Error) -> Self {
        TelemetryError::WindowsApi { operation: operation.into(), source }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(test)]
    mod property_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
          #[test]
          fn error_messages_format_correctly_with_arbitrary_context(
            reason in ".*",
            offset in 0usize..0x10000usize,
            attempts in 1usize..1000usize,
            duration_ms in 1u64..60000u64
          ) {
            // Property: Error messages format correctly with arbitrary context
            let acquisition_error = TelemetryError::acquisition_failed(reason.clone());
            let memory_error = TelemetryError::memory_access_error(offset);
            let torn_error = TelemetryError::torn_read(attempts);
            let timeout_error = TelemetryError::timeout(Duration::from_millis(duration_ms));

            let acquisition_msg = acquisition_error.to_string();
            prop_assert!(acquisition_msg.contains(&reason));

            let memory_msg = memory_error.to_string();
            let offset_hex = format!("{:#x}", offset);
            prop_assert!(memory_msg.contains(&offset_hex));

            let torn_msg = torn_error.to_string();
            prop_assert!(torn_msg.contains(&attempts.to_string()));

            prop_assert!(!acquisition_msg.is_empty());
            prop_assert!(!memory_msg.is_empty());
            prop_assert!(!torn_msg.is_empty());
            prop_assert!(!timeout_error.to_string().is_empty());
          }

          #[test]
          fn shared_acquisition_source_survives_cloning(
            base_message in ".*",
            reason in ".*",
            clones in 2usize..8usize
          ) {
            // Property: one underlying cause, delivered to many requests, keeps
            // its message through every clone.
            let cause = std::io::Error::other(base_message.clone());
            let shared = AcquisitionSource::new(cause);

            for _ in 0..clones {
              let error = TelemetryError::acquisition_failed_with_source(
                reason.clone(),
                shared.clone(),
              );
              let source = std::error::Error::source(&error)
                .map(|s| s.to_string())
                .unwrap_or_default();
              prop_assert!(source.contains(&base_message));
              prop_assert!(error.to_string().contains(&reason));
            }
          }
        }
    }

    #[test]
    fn error_constructors_validation() {
        let conflict = TelemetryError::state_conflict(ConnectionState::Connecting);
        assert!(matches!(conflict, TelemetryError::StateConflict { .. }));

        let acquisition = TelemetryError::acquisition_failed("test");
        assert!(matches!(acquisition, TelemetryError::Acquisition { .. }));

        let memory = TelemetryError::memory_access_error(0x1000);
        assert!(matches!(memory, TelemetryError::Memory { .. }));
    }

    #[test]
    fn error_traits_validation() {
        // Compile-time check: TelemetryError must be Send + Sync + 'static
        fn assert_send_sync_static<T: Send + Sync + 'static>() {}
        assert_send_sync_static::<TelemetryError>();

        let error = TelemetryError::Disposed;
        let _: &dyn std::error::Error = &error;
    }

    #[test]
    fn retryability_classification() {
        assert!(TelemetryError::acquisition_failed("test").is_retryable());
        assert!(TelemetryError::timeout(Duration::from_secs(1)).is_retryable());
        assert!(TelemetryError::torn_read(3).is_retryable());

        assert!(!TelemetryError::Disposed.is_retryable());
        assert!(!TelemetryError::Cancelled.is_retryable());
        assert!(!TelemetryError::state_conflict(ConnectionState::Closed).is_retryable());
        assert!(!TelemetryError::memory_access_error(0x10).is_retryable());

        // Every variant provides actionable guidance
        for suggestion in TelemetryError::acquisition_failed("test").recovery_suggestions() {
            assert!(suggestion.len() > 5);
        }
    }

    #[test]
    fn acquisition_source_chain_preserved() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "mapping missing");
        let error = TelemetryError::acquisition_failed_with_source(
            "provider creation failed",
            AcquisitionSource::new(io),
        );

        let source = std::error::Error::source(&error).map(|s| s.to_string());
        assert_eq!(source.as_deref(), Some("mapping missing"));
    }
}
