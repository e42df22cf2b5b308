//! Background execution for the hub: a bounded sync worker pool and the
//! auto-sync ticker.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, select, Receiver, RecvTimeoutError, Sender, TrySendError};
use tracing::{debug, warn};

use super::sync::{SyncOperation, SyncOperationId};
use super::HubInner;
use crate::error::{ExecutionError, TmsError, TmsResult};

const POOL_PATH: &str = "sync";

enum Job {
    Sync {
        operation: SyncOperationId,
        reply: Sender<TmsResult<SyncOperation>>,
    },

    #[cfg(test)]
    Sleep {
        duration: Duration,
        reply: Sender<()>,
    },
}

pub(super) struct WorkerPool {
    tx: Option<Sender<Job>>,
    workers: Vec<JoinHandle<()>>,
    queue_capacity: usize,
}

impl WorkerPool {
    pub(super) fn start(workers: usize, queue_capacity: usize, inner: &Arc<HubInner>) -> TmsResult<Self> {
        let workers = workers.max(1);
        let queue_capacity = queue_capacity.max(1);
        let (tx, rx) = bounded::<Job>(queue_capacity);

        let mut pool = Self {
            tx: Some(tx),
            workers: Vec::with_capacity(workers),
            queue_capacity,
        };
        for idx in 0..workers {
            let rx: Receiver<Job> = rx.clone();
            let inner = Arc::clone(inner);
            let handle = thread::Builder::new()
                .name(format!("kyrotms-sync-{idx}"))
                .spawn(move || loop {
                    match rx.recv() {
                        Ok(Job::Sync { operation, reply }) => {
                            let result = inner.run_sync(operation);
                            let _ = reply.send(result);
                        }
                        Err(_) => break,

                        #[cfg(test)]
                        Ok(Job::Sleep { duration, reply }) => {
                            thread::sleep(duration);
                            let _ = reply.send(());
                        }
                    }
                })
                .map_err(|e| TmsError::internal(format!("failed to spawn sync worker: {e}")));
            match handle {
                Ok(h) => pool.workers.push(h),
                Err(e) => {
                    pool.shutdown();
                    return Err(e);
                }
            }
        }
        Ok(pool)
    }

    fn try_submit(&self, job: Job) -> TmsResult<()> {
        let Some(tx) = &self.tx else {
            return Err(ExecutionError::Disconnected {
                path: POOL_PATH.to_string(),
            }
            .into());
        };
        match tx.try_send(job) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(ExecutionError::QueueFull {
                path: POOL_PATH.to_string(),
                capacity: self.queue_capacity,
            }
            .into()),
            Err(TrySendError::Disconnected(_)) => Err(ExecutionError::Disconnected {
                path: POOL_PATH.to_string(),
            }
            .into()),
        }
    }

    pub(super) fn submit_sync(&self, operation: SyncOperationId) -> TmsResult<SyncHandle> {
        let (tx, rx) = bounded::<TmsResult<SyncOperation>>(1);
        self.try_submit(Job::Sync { operation, reply: tx })?;
        Ok(SyncHandle { operation, rx })
    }

    #[cfg(test)]
    pub(super) fn submit_sleep(&self, duration: Duration) -> TmsResult<Receiver<()>> {
        let (tx, rx) = bounded::<()>(1);
        self.try_submit(Job::Sleep { duration, reply: tx })?;
        Ok(rx)
    }

    /// Closes the queue; workers drain queued jobs and exit.
    pub(super) fn shutdown(&mut self) {
        self.tx.take();
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Handle returned by `sync_beliefs_async`.
#[derive(Debug)]
pub struct SyncHandle {
    operation: SyncOperationId,
    rx: Receiver<TmsResult<SyncOperation>>,
}

impl SyncHandle {
    /// The tracked operation.
    #[must_use]
    pub const fn operation(&self) -> SyncOperationId {
        self.operation
    }

    /// Waits for the operation to finish.
    pub fn join(self) -> TmsResult<SyncOperation> {
        self.rx.recv().map_err(|_| {
            TmsError::from(ExecutionError::Disconnected {
                path: POOL_PATH.to_string(),
            })
        })?
    }

    /// Waits for the operation to finish with a timeout.
    pub fn join_timeout(self, timeout: Duration) -> TmsResult<SyncOperation> {
        self.rx.recv_timeout(timeout).map_err(|err| match err {
            RecvTimeoutError::Timeout => TmsError::from(ExecutionError::Timeout {
                duration_ms: timeout.as_millis().min(u128::from(u64::MAX)) as u64,
            }),
            RecvTimeoutError::Disconnected => TmsError::from(ExecutionError::Disconnected {
                path: POOL_PATH.to_string(),
            }),
        })?
    }
}

/// Periodically runs the auto-sync cycle until stopped.
pub(super) struct AutoSyncTicker {
    stop_tx: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl AutoSyncTicker {
    pub(super) fn start(interval: Duration, inner: &Arc<HubInner>) -> TmsResult<Self> {
        let (stop_tx, stop_rx) = bounded::<()>(1);
        let inner = Arc::clone(inner);
        let handle = thread::Builder::new()
            .name("kyrotms-auto-sync".to_string())
            .spawn(move || ticker_loop(interval, &inner, &stop_rx))
            .map_err(|e| TmsError::internal(format!("failed to spawn auto-sync ticker: {e}")))?;
        Ok(Self {
            stop_tx: Some(stop_tx),
            handle: Some(handle),
        })
    }

    pub(super) fn stop(&mut self) {
        // Dropping the sender wakes the ticker.
        self.stop_tx.take();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for AutoSyncTicker {
    fn drop(&mut self) {
        self.stop();
    }
}

fn ticker_loop(interval: Duration, inner: &HubInner, stop_rx: &Receiver<()>) {
    loop {
        select! {
            recv(stop_rx) -> _ => break,
            default(interval) => {
                match inner.run_auto_sync_cycle() {
                    Ok(ops) if !ops.is_empty() => debug!(operations = ops.len(), "auto-sync cycle complete"),
                    Ok(_) => {}
                    Err(e) => warn!(error = %e, "auto-sync cycle failed"),
                }
            }
        }
    }
}
