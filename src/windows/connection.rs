//! Named shared-memory mapping and readiness event.

use std::ptr::NonNull;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, trace};
use windows::Win32::Foundation::{CloseHandle, HANDLE, WAIT_OBJECT_0, WAIT_TIMEOUT};
use windows::Win32::System::Memory::{
    FILE_MAP_READ, MEMORY_MAPPED_VIEW_ADDRESS, MapViewOfFile, OpenFileMappingW, UnmapViewOfFile,
};
use windows::Win32::System::Threading::{
    OpenEventW, SYNCHRONIZATION_ACCESS_RIGHTS, WaitForSingleObject,
};
use windows::core::PCWSTR;

use super::wide_string;
use crate::provider::{DataProvider, ProviderFactory, ShmConfig};
use crate::signal::WaitResult;
use crate::{Result, TelemetryError};

/// Read-only view of a publisher's shared memory region.
///
/// Opening fails while the publisher is not running; the acquisition worker
/// retries through its factory, so a failed open is routine rather than
/// fatal.
pub struct ShmProvider {
    mapping: HANDLE,
    base: NonNull<u8>,
    event: HANDLE,
}

impl ShmProvider {
    /// Open the mapping and readiness event by name.
    pub fn open(config: &ShmConfig) -> Result<Self> {
        trace!(mapping = %config.mapping_name, "opening shared memory mapping");

        let mapping = unsafe {
            let wide_name = wide_string(&config.mapping_name);
            OpenFileMappingW(FILE_MAP_READ.0, false, PCWSTR::from_raw(wide_name.as_ptr()))
                .map_err(|e| TelemetryError::windows_api_error("OpenFileMappingW", e))?
        };

        let base = unsafe {
            let ptr = MapViewOfFile(mapping, FILE_MAP_READ, 0, 0, 0);
            match NonNull::new(ptr.Value as *mut u8) {
                Some(base) => base,
                None => {
                    let win_err = windows::core::Error::from_thread();
                    let _ = CloseHandle(mapping);
                    return Err(TelemetryError::windows_api_error("MapViewOfFile", win_err));
                }
            }
        };

        let event = unsafe {
            let wide_name = wide_string(&config.event_name);
            // SYNCHRONIZE
            match OpenEventW(
                SYNCHRONIZATION_ACCESS_RIGHTS(0x0010_0000),
                false,
                PCWSTR::from_raw(wide_name.as_ptr()),
            ) {
                Ok(event) => event,
                Err(e) => {
                    let addr = MEMORY_MAPPED_VIEW_ADDRESS { Value: base.as_ptr() as *mut _ };
                    let _ = UnmapViewOfFile(addr);
                    let _ = CloseHandle(mapping);
                    return Err(TelemetryError::windows_api_error("OpenEventW", e));
                }
            }
        };

        debug!(mapping = %config.mapping_name, "mapped publisher shared memory");
        Ok(Self { mapping, base, event })
    }
}

impl DataProvider for ShmProvider {
    fn read_region(&self, offset: usize, len: usize) -> Result<Vec<u8>> {
        // The publisher guarantees the mapping covers every offset it
        // advertises; torn multi-field reads are handled by callers through
        // the version-bracketed protocol.
        let mut out = vec![0u8; len];
        unsafe {
            std::ptr::copy_nonoverlapping(self.base.as_ptr().add(offset), out.as_mut_ptr(), len);
        }
        Ok(out)
    }

    fn wait_for_data(&self, timeout: Duration) -> Result<WaitResult> {
        let ms = timeout.as_millis().min(u32::MAX as u128) as u32;
        trace!(timeout_ms = ms, "waiting for publisher readiness event");

        let result = unsafe { WaitForSingleObject(self.event, ms) };
        match result {
            WAIT_OBJECT_0 => Ok(WaitResult::Signaled),
            WAIT_TIMEOUT => Ok(WaitResult::Timeout),
            _ => {
                let win_err = windows::core::Error::from_thread();
                Err(TelemetryError::windows_api_error("WaitForSingleObject", win_err))
            }
        }
    }
}

impl Drop for ShmProvider {
    fn drop(&mut self) {
        unsafe {
            let addr = MEMORY_MAPPED_VIEW_ADDRESS { Value: self.base.as_ptr() as *mut _ };
            let _ = UnmapViewOfFile(addr);
            let _ = CloseHandle(self.mapping);
            let _ = CloseHandle(self.event);
        }
    }
}

// SAFETY: the provider only holds Windows handles and a read-only view
// pointer, all safe to share between threads for this use case
unsafe impl Send for ShmProvider {}
unsafe impl Sync for ShmProvider {}

/// Factory opening [`ShmProvider`]s on behalf of the acquisition worker.
pub struct ShmProviderFactory {
    config: ShmConfig,
}

impl ShmProviderFactory {
    pub fn new(config: ShmConfig) -> Self {
        Self { config }
    }
}

impl ProviderFactory for ShmProviderFactory {
    fn create_provider(&self) -> Result<Arc<dyn DataProvider>> {
        Ok(Arc::new(ShmProvider::open(&self.config)?))
    }
}
