//! Test doubles shared across the crate's tests and benches.
//!
//! Provides in-memory providers and scripted factories so the acquisition
//! subsystem can be exercised without a live publisher.

#![cfg(any(test, feature = "benchmark"))]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use crate::provider::{DataProvider, ProviderFactory};
use crate::signal::{AutoResetSignal, WaitResult};
use crate::{Result, TelemetryError};

/// In-memory provider backed by a plain byte buffer.
pub struct MemoryProvider {
    data: Mutex<Vec<u8>>,
    signal: AutoResetSignal,
}

impl MemoryProvider {
    pub fn new(data: Vec<u8>) -> Self {
        Self { data: Mutex::new(data), signal: AutoResetSignal::new() }
    }

    /// Overwrite a slice of the region and signal waiting readers.
    pub fn write(&self, offset: usize, bytes: &[u8]) {
        let mut data = self.data.lock().expect("memory provider lock");
        data[offset..offset + bytes.len()].copy_from_slice(bytes);
        drop(data);
        self.signal.set();
    }
}

impl DataProvider for MemoryProvider {
    fn read_region(&self, offset: usize, len: usize) -> Result<Vec<u8>> {
        let data = self.data.lock().expect("memory provider lock");
        let end = offset
            .checked_add(len)
            .ok_or_else(|| TelemetryError::memory_access_error(offset))?;
        data.get(offset..end)
            .map(<[u8]>::to_vec)
            .ok_or_else(|| TelemetryError::memory_access_error(offset))
    }

    fn wait_for_data(&self, timeout: Duration) -> Result<WaitResult> {
        Ok(self.signal.wait(timeout))
    }
}

/// Factory that always succeeds with a fresh in-memory provider.
#[derive(Default)]
pub struct ReadyFactory {
    created: AtomicUsize,
}

impl ReadyFactory {
    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }
}

impl ProviderFactory for ReadyFactory {
    fn create_provider(&self) -> Result<Arc<dyn DataProvider>> {
        self.created.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(MemoryProvider::new(vec![0u8; 64])))
    }
}

/// Factory that fails every attempt, like a publisher that is not running.
#[derive(Default)]
pub struct FailingFactory {
    attempts: AtomicUsize,
}

impl FailingFactory {
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

impl ProviderFactory for FailingFactory {
    fn create_provider(&self) -> Result<Arc<dyn DataProvider>> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(TelemetryError::acquisition_failed("publisher not running"))
    }
}

struct GateState {
    released: Mutex<bool>,
    cv: Condvar,
}

/// Test-side control releasing a [`GatedFactory`].
pub struct Gate(Arc<GateState>);

impl Gate {
    pub fn release(&self) {
        let mut released = self.0.released.lock().expect("gate lock");
        *released = true;
        self.0.cv.notify_all();
    }
}

/// Factory that blocks inside `create_provider` until released, simulating a
/// publisher that has not started yet.
pub struct GatedFactory {
    gate: Arc<GateState>,
    created: AtomicUsize,
}

pub fn gated_factory() -> (GatedFactory, Gate) {
    let state = Arc::new(GateState { released: Mutex::new(false), cv: Condvar::new() });
    (GatedFactory { gate: Arc::clone(&state), created: AtomicUsize::new(0) }, Gate(state))
}

impl ProviderFactory for GatedFactory {
    fn create_provider(&self) -> Result<Arc<dyn DataProvider>> {
        let mut released = self.gate.released.lock().expect("gate lock");
        while !*released {
            released = self.gate.cv.wait(released).expect("gate wait");
        }
        drop(released);

        self.created.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(MemoryProvider::new(vec![0u8; 64])))
    }
}

struct ProbeProvider {
    inner: MemoryProvider,
    drops: Arc<AtomicUsize>,
}

impl DataProvider for ProbeProvider {
    fn read_region(&self, offset: usize, len: usize) -> Result<Vec<u8>> {
        self.inner.read_region(offset, len)
    }

    fn wait_for_data(&self, timeout: Duration) -> Result<WaitResult> {
        self.inner.wait_for_data(timeout)
    }
}

impl Drop for ProbeProvider {
    fn drop(&mut self) {
        self.drops.fetch_add(1, Ordering::SeqCst);
    }
}

/// Factory whose providers count their drops, for observing teardown.
pub fn probe_factory() -> (impl ProviderFactory, Arc<AtomicUsize>) {
    let drops = Arc::new(AtomicUsize::new(0));
    let factory_drops = Arc::clone(&drops);
    let factory = move || -> Result<Arc<dyn DataProvider>> {
        Ok(Arc::new(ProbeProvider {
            inner: MemoryProvider::new(vec![0u8; 64]),
            drops: Arc::clone(&factory_drops),
        }))
    };
    (factory, drops)
}
