//! Background executor for committed message batches.
//!
//! One worker thread serves a bounded FIFO, so batches are dispatched in
//! submission order and never concurrently.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender, TrySendError};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, info, warn};

use super::{DispatchError, DispatchReport, OutboxDispatcher};
use crate::message::Message;

/// Statistics from the dispatch executor.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ExecutorStats {
    pub batches: usize,
    pub dispatched: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl ExecutorStats {
    fn record(&mut self, report: &DispatchReport) {
        self.batches += 1;
        self.dispatched += report.dispatched;
        self.skipped += report.skipped;
        self.failed += report.failed;
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ShutdownReport {
    pub stats: ExecutorStats,
    /// Messages still queued or in flight when the timeout expired. Their
    /// rows stay PENDING.
    pub abandoned: usize,
    pub timed_out: bool,
}

/// Submission side of the executor. Cloning shares the same queue.
#[derive(Clone)]
pub struct DispatchQueue {
    sender: Arc<Mutex<Option<SyncSender<Vec<Message>>>>>,
    capacity: usize,
    pending: Arc<AtomicUsize>,
}

impl DispatchQueue {
    /// Enqueue a batch without blocking.
    pub fn submit(&self, batch: Vec<Message>) -> Result<(), DispatchError> {
        if batch.is_empty() {
            return Ok(());
        }
        let guard = self.sender.lock().map_err(|_| DispatchError::ShutDown)?;
        let sender = guard.as_ref().ok_or(DispatchError::ShutDown)?;

        let count = batch.len();
        self.pending.fetch_add(count, Ordering::SeqCst);
        sender.try_send(batch).map_err(|err| {
            self.pending.fetch_sub(count, Ordering::SeqCst);
            match err {
                TrySendError::Full(_) => DispatchError::QueueFull {
                    capacity: self.capacity,
                },
                TrySendError::Disconnected(_) => DispatchError::ShutDown,
            }
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Messages submitted and not yet handled by the worker.
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.sender.lock().map(|s| s.is_none()).unwrap_or(true)
    }

    fn close(&self) {
        if let Ok(mut sender) = self.sender.lock() {
            sender.take();
        }
    }
}

/// Owns the dispatch worker thread.
///
/// ## Example
///
/// ```ignore
/// let executor = DispatchExecutor::spawn(dispatcher, 1024)?;
/// executor.queue().submit(committed_batch)?;
///
/// let report = executor.shutdown(Duration::from_secs(5));
/// println!("dispatched {} messages", report.stats.dispatched);
/// ```
pub struct DispatchExecutor {
    queue: DispatchQueue,
    done_rx: Receiver<()>,
    stats: Arc<Mutex<ExecutorStats>>,
    abandon: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl DispatchExecutor {
    pub fn spawn(dispatcher: Arc<OutboxDispatcher>, capacity: usize) -> Result<Self, DispatchError> {
        let (sender, receiver) = mpsc::sync_channel::<Vec<Message>>(capacity);
        let (done_tx, done_rx) = mpsc::channel();
        let pending = Arc::new(AtomicUsize::new(0));
        let abandon = Arc::new(AtomicBool::new(false));
        let stats = Arc::new(Mutex::new(ExecutorStats::default()));

        let worker_pending = Arc::clone(&pending);
        let worker_abandon = Arc::clone(&abandon);
        let worker_stats = Arc::clone(&stats);
        let handle = thread::Builder::new()
            .name("outbox-dispatch".into())
            .spawn(move || {
                for batch in receiver.iter() {
                    if worker_abandon.load(Ordering::SeqCst) {
                        break;
                    }
                    let report = dispatcher.accept(&batch);
                    if let Ok(mut stats) = worker_stats.lock() {
                        stats.record(&report);
                    }
                    worker_pending.fetch_sub(batch.len(), Ordering::SeqCst);
                }
                debug!("dispatch worker stopped");
                let _ = done_tx.send(());
            })
            .map_err(|err| DispatchError::Spawn(err.to_string()))?;

        info!(capacity, "dispatch executor started");
        Ok(Self {
            queue: DispatchQueue {
                sender: Arc::new(Mutex::new(Some(sender))),
                capacity,
                pending,
            },
            done_rx,
            stats,
            abandon,
            handle: Some(handle),
        })
    }

    pub fn queue(&self) -> DispatchQueue {
        self.queue.clone()
    }

    /// Batches handled so far.
    pub fn stats(&self) -> ExecutorStats {
        self.stats
            .lock()
            .map(|stats| stats.clone())
            .unwrap_or_default()
    }

    /// Stop accepting batches and wait up to `timeout` for the queue to
    /// drain. Whatever is left afterwards is abandoned.
    pub fn shutdown(mut self, timeout: Duration) -> ShutdownReport {
        self.queue.close();

        match self.done_rx.recv_timeout(timeout) {
            Ok(()) => {
                if let Some(handle) = self.handle.take() {
                    let _ = handle.join();
                }
                let stats = self.stats();
                info!(dispatched = stats.dispatched, failed = stats.failed, "dispatch executor drained");
                ShutdownReport {
                    stats,
                    abandoned: 0,
                    timed_out: false,
                }
            }
            Err(RecvTimeoutError::Timeout) => {
                self.abandon.store(true, Ordering::SeqCst);
                let abandoned = self.queue.pending();
                warn!(
                    abandoned,
                    timeout_ms = timeout.as_millis() as u64,
                    "dispatch executor did not drain in time, abandoning queued messages"
                );
                ShutdownReport {
                    stats: self.stats(),
                    abandoned,
                    timed_out: true,
                }
            }
            Err(RecvTimeoutError::Disconnected) => {
                let abandoned = self.queue.pending();
                warn!(abandoned, "dispatch worker exited unexpectedly");
                ShutdownReport {
                    stats: self.stats(),
                    abandoned,
                    timed_out: false,
                }
            }
        }
    }
}

impl Drop for DispatchExecutor {
    fn drop(&mut self) {
        self.queue.close();
        // Don't join on drop - let the thread finish naturally
    }
}
