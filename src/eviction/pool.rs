// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Fixed worker pool for eviction passes.
//!
//! A bounded mpsc queue feeds `workers` tasks that share the receiver. Each
//! pass runs in its own task so a panicking pass costs one pass, not a worker.
//! Those pass tasks are tracked per worker so a forced shutdown cancels them
//! along with the workers.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{debug, error, info, warn};

use super::controller::EvictionPass;
use crate::storage::traits::StorageError;

pub(crate) enum TrySubmit {
    Queued,
    Full,
    Closed,
}

/// Pass tasks currently running, one slot per worker.
struct InFlight {
    forced: bool,
    passes: Vec<Option<AbortHandle>>,
}

impl InFlight {
    /// Refuse new passes and cancel the running ones.
    fn abort_all(&mut self) -> usize {
        self.forced = true;
        let mut aborted = 0;
        for abort in self.passes.iter_mut().filter_map(Option::take) {
            abort.abort();
            aborted += 1;
        }
        aborted
    }
}

pub(crate) struct EvictionPool {
    sender: Mutex<Option<mpsc::Sender<()>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    in_flight: Arc<Mutex<InFlight>>,
}

impl EvictionPool {
    pub(crate) fn spawn(
        workers: usize,
        capacity: usize,
        pass: Arc<EvictionPass>,
    ) -> Result<Self, StorageError> {
        let handle = tokio::runtime::Handle::try_current().map_err(|_| {
            StorageError::Config("eviction pool must be created inside a Tokio runtime".into())
        })?;

        let (sender, receiver) = mpsc::channel::<()>(capacity.max(1));
        let receiver = Arc::new(tokio::sync::Mutex::new(receiver));
        let workers = workers.max(1);
        let in_flight = Arc::new(Mutex::new(InFlight {
            forced: false,
            passes: vec![None; workers],
        }));

        let handles = (0..workers)
            .map(|worker| {
                let receiver = receiver.clone();
                let pass = pass.clone();
                let in_flight = in_flight.clone();
                let runtime = handle.clone();
                handle.spawn(async move {
                    loop {
                        let job = receiver.lock().await.recv().await;
                        if job.is_none() {
                            break;
                        }
                        let pass = pass.clone();
                        // Spawn and register under one lock so a forced stop sees every pass
                        let task = {
                            let mut slots = in_flight.lock();
                            if slots.forced {
                                break;
                            }
                            let task = runtime.spawn(async move { pass.run().await });
                            slots.passes[worker] = Some(task.abort_handle());
                            task
                        };
                        let result = task.await;
                        in_flight.lock().passes[worker] = None;
                        match result {
                            Ok(Ok(outcome)) => debug!(worker, ?outcome, "Eviction pass finished"),
                            Ok(Err(e)) => {
                                warn!(worker, error = %e, "Eviction pass failed");
                                crate::metrics::record_error("eviction", "pass", "backend");
                            }
                            Err(e) => {
                                error!(worker, error = %e, "Eviction pass aborted");
                                let kind = if e.is_cancelled() { "cancelled" } else { "panic" };
                                crate::metrics::record_error("eviction", "pass", kind);
                            }
                        }
                    }
                    debug!(worker, "Eviction worker stopped");
                })
            })
            .collect();

        Ok(Self {
            sender: Mutex::new(Some(sender)),
            workers: Mutex::new(handles),
            in_flight,
        })
    }

    pub(crate) fn try_submit(&self) -> TrySubmit {
        let guard = self.sender.lock();
        let Some(sender) = guard.as_ref() else {
            return TrySubmit::Closed;
        };
        match sender.try_send(()) {
            Ok(()) => TrySubmit::Queued,
            Err(TrySendError::Full(())) => TrySubmit::Full,
            Err(TrySendError::Closed(())) => TrySubmit::Closed,
        }
    }

    pub(crate) fn queued(&self) -> usize {
        self.sender
            .lock()
            .as_ref()
            .map_or(0, |s| s.max_capacity() - s.capacity())
    }

    /// Close the queue, let workers drain it for up to `grace`, then abort them
    /// and any pass they are still running.
    pub(crate) async fn shutdown(&self, grace: Duration) {
        // Dropping the last sender ends each worker's loop once the queue is empty
        self.sender.lock().take();
        let handles: Vec<JoinHandle<()>> = std::mem::take(&mut *self.workers.lock());
        if handles.is_empty() {
            return;
        }

        let aborts: Vec<_> = handles.iter().map(JoinHandle::abort_handle).collect();
        let drain = async {
            for handle in handles {
                let _ = handle.await;
            }
        };

        if tokio::time::timeout(grace, drain).await.is_err() {
            let passes = self.in_flight.lock().abort_all();
            warn!(?grace, passes, "Eviction pool did not drain in time, aborting workers");
            for abort in aborts {
                abort.abort();
            }
        } else {
            info!("Eviction pool drained");
        }
    }
}
