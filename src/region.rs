//! Version-bracketed reads over externally written memory.
//!
//! The publisher updates multi-field structures (a version counter paired with
//! a variable-length payload) without locking. The only safe way to observe
//! such a structure is to read the version, read the payload, and read the
//! version again: a mismatch means the payload may be torn by a concurrent
//! writer update and the read restarts from the top.

use tracing::{trace, warn};

use crate::provider::DataProvider;
use crate::{Result, TelemetryError};

/// Upper bound on consecutive torn reads before the read is abandoned.
pub const TORN_READ_RETRY_LIMIT: usize = 1024;

/// Read a multi-field value that an external writer may update concurrently.
///
/// Retries until two consecutive version reads match; a writer that never
/// stabilizes within [`TORN_READ_RETRY_LIMIT`] attempts surfaces as
/// [`TelemetryError::TornRead`].
pub fn read_consistent<T>(
    mut version: impl FnMut() -> Result<u32>,
    mut payload: impl FnMut() -> Result<T>,
) -> Result<T> {
    for attempt in 1..=TORN_READ_RETRY_LIMIT {
        let before = version()?;
        let value = payload()?;
        let after = version()?;

        if before == after {
            return Ok(value);
        }

        trace!(attempt, before, after, "torn read, retrying");
    }

    warn!("version counter never stabilized");
    Err(TelemetryError::torn_read(TORN_READ_RETRY_LIMIT))
}

/// A version counter bracketing a variable-length payload region.
///
/// The counter is a 4-byte little-endian word; the payload is an arbitrary
/// byte region the publisher rewrites whenever the counter advances.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VersionedRegion {
    pub version_offset: usize,
    pub payload_offset: usize,
    pub payload_len: usize,
}

impl VersionedRegion {
    pub fn new(version_offset: usize, payload_offset: usize, payload_len: usize) -> Self {
        Self { version_offset, payload_offset, payload_len }
    }

    /// Read the payload under the double-read protocol.
    pub fn read(&self, provider: &dyn DataProvider) -> Result<Vec<u8>> {
        read_consistent(
            || {
                let raw = provider.read_region(self.version_offset, 4)?;
                let bytes: [u8; 4] = raw
                    .as_slice()
                    .try_into()
                    .map_err(|_| TelemetryError::memory_access_error(self.version_offset))?;
                Ok(u32::from_le_bytes(bytes))
            },
            || provider.read_region(self.payload_offset, self.payload_len),
        )
    }

    /// Read the payload as a NUL-terminated UTF-8 string.
    pub fn read_string(&self, provider: &dyn DataProvider) -> Result<String> {
        let raw = self.read(provider)?;
        // Publisher strings are NUL-terminated inside a fixed-size region.
        let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
        String::from_utf8(raw[..end].to_vec()).map_err(|e| TelemetryError::Memory {
            offset: self.payload_offset,
            source: Some(Box::new(e)),
        })
    }

    /// Read the current version counter without the payload.
    pub fn version(&self, provider: &dyn DataProvider) -> Result<u32> {
        let raw = provider.read_region(self.version_offset, 4)?;
        let bytes: [u8; 4] = raw
            .as_slice()
            .try_into()
            .map_err(|_| TelemetryError::memory_access_error(self.version_offset))?;
        Ok(u32::from_le_bytes(bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signal::WaitResult;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[test]
    fn consistent_read_returns_first_stable_payload() {
        let payload_reads = AtomicUsize::new(0);
        let versions = Mutex::new(vec![7u32, 7]);

        let value = read_consistent(
            || {
                let mut versions = versions.lock().expect("lock");
                Ok(versions.remove(0))
            },
            || {
                payload_reads.fetch_add(1, Ordering::SeqCst);
                Ok(42u64)
            },
        )
        .expect("stable read");

        assert_eq!(value, 42);
        assert_eq!(payload_reads.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn mismatched_versions_force_retry_until_stable() {
        // First pass observes 1 then 2 (torn); second pass observes 2 twice.
        let versions = Mutex::new(vec![1u32, 2, 2, 2]);
        let payload_reads = AtomicUsize::new(0);

        let value = read_consistent(
            || {
                let mut versions = versions.lock().expect("lock");
                Ok(versions.remove(0))
            },
            || {
                payload_reads.fetch_add(1, Ordering::SeqCst);
                Ok("payload")
            },
        )
        .expect("read should settle on the second attempt");

        assert_eq!(value, "payload");
        assert_eq!(payload_reads.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn never_stabilizing_writer_surfaces_torn_read() {
        let counter = AtomicUsize::new(0);

        let result = read_consistent(
            || Ok(counter.fetch_add(1, Ordering::SeqCst) as u32),
            || Ok(()),
        );

        match result {
            Err(TelemetryError::TornRead { attempts }) => {
                assert_eq!(attempts, TORN_READ_RETRY_LIMIT);
            }
            other => panic!("expected TornRead, got {:?}", other.map(|_| ())),
        }
    }

    /// Provider whose version word changes for a scripted number of reads
    /// before settling, simulating a writer updating mid-read.
    struct TearingProvider {
        version_reads: AtomicUsize,
        tears: usize,
        payload: Vec<u8>,
    }

    impl DataProvider for TearingProvider {
        fn read_region(&self, offset: usize, len: usize) -> Result<Vec<u8>> {
            if offset == 0 {
                // Version word: advance on every read until the tear budget is
                // spent, then hold steady.
                let read = self.version_reads.fetch_add(1, Ordering::SeqCst);
                let version = if read < self.tears { read as u32 } else { self.tears as u32 };
                Ok(version.to_le_bytes().to_vec())
            } else {
                Ok(self.payload[offset - 4..offset - 4 + len].to_vec())
            }
        }

        fn wait_for_data(&self, _timeout: Duration) -> Result<WaitResult> {
            Ok(WaitResult::Signaled)
        }
    }

    #[test]
    fn versioned_region_retries_through_tearing_writer() {
        let provider = TearingProvider {
            version_reads: AtomicUsize::new(0),
            tears: 3,
            payload: b"session: 1\0garbage".to_vec(),
        };
        let region = VersionedRegion::new(0, 4, 18);

        let text = region.read_string(&provider).expect("read settles");
        assert_eq!(text, "session: 1");
    }

    #[test]
    fn read_string_trims_at_nul() {
        let provider = TearingProvider {
            version_reads: AtomicUsize::new(0),
            tears: 0,
            payload: b"abc\0def".to_vec(),
        };
        let region = VersionedRegion::new(0, 4, 7);

        assert_eq!(region.read_string(&provider).expect("read"), "abc");
    }
}
