//! Background acquisition worker.
//!
//! A dedicated thread owns provider creation and pending-request resolution:
//! it is the sole writer of the current-snapshot slot, which keeps the
//! open/closed swap race-free for every other thread. The loop is fatal-free;
//! provider-creation failures are data delivered to requesters.

use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::error::AcquisitionSource;
use crate::provider::ProviderFactory;
use crate::signal::AutoResetSignal;
use crate::{Result, TelemetryError};

use super::request::RequestManager;
use super::snapshot::OpenSnapshot;

/// Owns the acquisition loop thread and its lifecycle.
pub(crate) struct AcquisitionWorker {
    shared: Arc<WorkerShared>,
}

struct WorkerShared {
    factory: Box<dyn ProviderFactory>,
    requests: Arc<RequestManager>,
    wake: AutoResetSignal,
    status: Mutex<WorkerStatus>,
    shutdown: CancellationToken,
    poll_interval: Duration,
    close_on_empty: bool,
}

#[derive(Default)]
struct WorkerStatus {
    running: bool,
    thread: Option<JoinHandle<()>>,
}

impl AcquisitionWorker {
    pub(crate) fn new(
        factory: Box<dyn ProviderFactory>,
        requests: Arc<RequestManager>,
        poll_interval: Duration,
        close_on_empty: bool,
    ) -> Self {
        Self {
            shared: Arc::new(WorkerShared {
                factory,
                requests,
                wake: AutoResetSignal::new(),
                status: Mutex::new(WorkerStatus::default()),
                shutdown: CancellationToken::new(),
                poll_interval,
                close_on_empty,
            }),
        }
    }

    /// Prod the loop to re-evaluate now instead of at the next poll tick.
    pub(crate) fn wake(&self) {
        self.shared.wake.set();
    }

    /// Make sure the loop is alive, waking it if it already is.
    pub(crate) fn ensure_running(&self) -> Result<()> {
        let mut status = self.shared.lock_status();
        if self.shared.shutdown.is_cancelled() {
            return Err(TelemetryError::Disposed);
        }
        if status.running {
            self.shared.wake.set();
            return Ok(());
        }

        // Reap the previous incarnation; it is past its final empty check and
        // exits without touching the status lock again.
        if let Some(thread) = status.thread.take() {
            let _ = thread.join();
        }

        let shared = Arc::clone(&self.shared);
        let thread = std::thread::Builder::new()
            .name("paddock-acquire".into())
            .spawn(move || run(shared))
            .map_err(|e| {
                TelemetryError::acquisition_failed_with_source(
                    "failed to spawn acquisition worker",
                    AcquisitionSource::new(e),
                )
            })?;

        status.running = true;
        status.thread = Some(thread);
        debug!("acquisition worker spawned");
        Ok(())
    }

    /// Stop the loop. The thread drains pending requests as cancelled and
    /// exits on its own; a factory blocked mid-create finishes detached.
    pub(crate) fn shutdown(&self) {
        self.shared.shutdown.cancel();
        self.shared.wake.set();
    }

    #[cfg(test)]
    pub(crate) fn is_running(&self) -> bool {
        self.shared.lock_status().running
    }

    #[cfg(test)]
    fn try_stop(&self) -> bool {
        self.shared.try_stop()
    }
}

impl WorkerShared {
    /// Second phase of the abort protocol: stop only if the queue is STILL
    /// empty when re-checked under the status lock. An enqueue that landed
    /// between the in-loop check and this one keeps the worker alive.
    fn try_stop(&self) -> bool {
        let mut status = self.lock_status();
        if self.requests.has_pending() {
            trace!("request arrived between empty checks, continuing");
            return false;
        }
        status.running = false;
        true
    }

    fn mark_stopped(&self) {
        self.lock_status().running = false;
    }

    fn lock_status(&self) -> std::sync::MutexGuard<'_, WorkerStatus> {
        self.status.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn run(shared: Arc<WorkerShared>) {
    info!("acquisition worker started");

    loop {
        if shared.shutdown.is_cancelled() {
            shared.requests.cancel_all();
            shared.mark_stopped();
            break;
        }

        let snapshot = match shared.requests.current_open() {
            Some(snapshot) => Some(snapshot),
            None => match shared.factory.create_provider() {
                Ok(provider) => {
                    let snapshot = OpenSnapshot::new(provider, shared.close_on_empty);
                    shared.requests.install(Arc::clone(&snapshot));
                    info!("telemetry provider acquired");
                    Some(snapshot)
                }
                Err(error) => {
                    // Never fatal: the failure is delivered to the requesters
                    // and the loop keeps going.
                    warn!(%error, "provider creation failed");
                    shared.requests.fail_all(
                        "provider creation failed",
                        Some(AcquisitionSource::new(error)),
                    );
                    None
                }
            },
        };

        if let Some(snapshot) = snapshot {
            shared.requests.process_queue(&snapshot);
        }

        // First empty observation; try_stop re-checks under the status lock
        // before the thread truly exits.
        if !shared.requests.has_pending() && shared.try_stop() {
            break;
        }

        shared.wake.wait(shared.poll_interval);
    }

    info!("acquisition worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::handle::HandleCore;
    use crate::provider::DataProvider;
    use crate::test_utils::MemoryProvider;

    fn ready_factory() -> Box<dyn ProviderFactory> {
        Box::new(|| -> Result<Arc<dyn DataProvider>> {
            Ok(Arc::new(MemoryProvider::new(vec![0u8; 16])))
        })
    }

    fn worker(requests: &Arc<RequestManager>) -> AcquisitionWorker {
        AcquisitionWorker::new(
            ready_factory(),
            Arc::clone(requests),
            Duration::from_millis(20),
            true,
        )
    }

    #[test]
    fn abort_requires_two_consecutive_empty_observations() {
        let requests = Arc::new(RequestManager::new());
        let worker = worker(&requests);
        {
            let mut status = worker.shared.lock_status();
            status.running = true;
        }

        // First observation: the queue is empty.
        assert!(!requests.has_pending());

        // A request lands between the first and second checks.
        let (request, _rx) = requests.create_sync(
            HandleCore::new(4),
            Duration::MAX,
            CancellationToken::new(),
        );
        requests.enqueue(request);

        // Second check vetoes the stop and leaves the worker running.
        assert!(!worker.try_stop());
        assert!(worker.is_running());
    }

    #[test]
    fn abort_succeeds_when_both_observations_are_empty() {
        let requests = Arc::new(RequestManager::new());
        let worker = worker(&requests);
        {
            let mut status = worker.shared.lock_status();
            status.running = true;
        }

        assert!(!requests.has_pending());
        assert!(worker.try_stop());
        assert!(!worker.is_running());
    }

    #[test]
    fn ensure_running_after_shutdown_is_refused() {
        let requests = Arc::new(RequestManager::new());
        let worker = worker(&requests);
        worker.shutdown();

        assert!(matches!(worker.ensure_running(), Err(TelemetryError::Disposed)));
    }

    #[test]
    fn worker_resolves_queued_request_and_stops_when_idle() {
        let requests = Arc::new(RequestManager::new());
        let worker = worker(&requests);

        let (request, rx) = requests.create_sync(
            HandleCore::new(4),
            Duration::from_secs(5),
            CancellationToken::new(),
        );
        requests.enqueue(request);
        worker.ensure_running().expect("spawn");

        let attachment = rx
            .recv_timeout(Duration::from_secs(5))
            .expect("worker delivered")
            .expect("attached");
        assert_eq!(attachment.snapshot.attachments(), 1);
        attachment.detach();

        // Idle queue: the two-phase abort lets the thread wind down.
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while worker.is_running() && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        assert!(!worker.is_running(), "idle worker should stop itself");
    }

    #[test]
    fn factory_failure_is_broadcast_and_loop_survives() {
        let requests = Arc::new(RequestManager::new());
        let attempts = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let attempts_in_factory = Arc::clone(&attempts);

        let worker = AcquisitionWorker::new(
            Box::new(move || -> Result<Arc<dyn DataProvider>> {
                attempts_in_factory.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                Err(TelemetryError::acquisition_failed("mapping unavailable"))
            }),
            Arc::clone(&requests),
            Duration::from_millis(20),
            true,
        );

        let (request, rx) = requests.create_sync(
            HandleCore::new(4),
            Duration::from_secs(5),
            CancellationToken::new(),
        );
        requests.enqueue(request);
        worker.ensure_running().expect("spawn");

        let outcome = rx.recv_timeout(Duration::from_secs(5)).expect("worker delivered");
        assert!(matches!(outcome, Err(TelemetryError::Acquisition { .. })));
        assert!(attempts.load(std::sync::atomic::Ordering::SeqCst) >= 1);

        // The loop survived the failure: a later request gets serviced too.
        let (request, rx) = requests.create_sync(
            HandleCore::new(4),
            Duration::from_secs(5),
            CancellationToken::new(),
        );
        requests.enqueue(request);
        worker.ensure_running().expect("respawn or wake");

        let outcome = rx.recv_timeout(Duration::from_secs(5)).expect("worker delivered");
        assert!(matches!(outcome, Err(TelemetryError::Acquisition { .. })));
    }
}
