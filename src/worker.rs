//! Print Worker
//!
//! The only consumer of the print queue. Runs on its own thread and
//! prints jobs one at a time until it dequeues the stop sentinel.

use crossbeam_channel::{Receiver, RecvTimeoutError};
use std::any::Any;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{error, info, warn};

use crate::print::PrintSink;
use crate::queue::{PrintJob, QueueItem, QueueState};

/// Called on the worker thread after each job is marked finished.
pub trait JobObserver: Send + Sync {
    fn on_job_done(&self);
}

/// Default pause between two copies of the same job.
pub const DEFAULT_PACING: Duration = Duration::from_secs(2);

/// Default bound on waiting for the worker at shutdown.
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

pub struct PrintWorker {
    queue: Arc<QueueState>,
    sink: Arc<dyn PrintSink>,
    pacing: Duration,
    observer: Option<Arc<dyn JobObserver>>,
}

impl PrintWorker {
    pub fn new(queue: Arc<QueueState>, sink: Arc<dyn PrintSink>, pacing: Duration) -> Self {
        Self {
            queue,
            sink,
            pacing,
            observer: None,
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn JobObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Start the worker thread.
    pub fn spawn(self) -> io::Result<WorkerHandle> {
        let queue = Arc::clone(&self.queue);
        let (exited_tx, exited_rx) = crossbeam_channel::bounded(1);
        let thread = thread::Builder::new()
            .name("print-worker".to_string())
            .spawn(move || {
                self.run();
                let _ = exited_tx.send(());
            })?;
        info!("Print queue system initialized");
        Ok(WorkerHandle {
            queue,
            exited: exited_rx,
            thread: Some(thread),
        })
    }

    /// Consume the queue until the stop sentinel arrives.
    pub fn run(&self) {
        loop {
            let job = match self.queue.next() {
                QueueItem::Stop => break,
                QueueItem::Job(job) => job,
            };

            let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.print_job(&job)));
            // Marked done even after a failure so the gate can reopen.
            self.queue.finish_job();
            match outcome {
                Ok(()) => info!(job_id = %job.id(), image = %file_name(&job), "Print job completed"),
                Err(panic) => error!(
                    job_id = %job.id(),
                    error = panic_message(&*panic),
                    "Error in print worker"
                ),
            }

            if let Some(observer) = &self.observer {
                if let Err(panic) = panic::catch_unwind(AssertUnwindSafe(|| observer.on_job_done())) {
                    error!(error = panic_message(&*panic), "Error dispatching after print job");
                }
            }
        }
        info!("Print worker stopped");
    }

    fn print_job(&self, job: &PrintJob) {
        let copies = job.copies();
        info!(
            job_id = %job.id(),
            image = %file_name(job),
            copies,
            sink = self.sink.name(),
            "Starting print job"
        );

        let page = match self.sink.page_geometry() {
            Ok(page) => page,
            Err(e) => {
                error!(job_id = %job.id(), error = %e, "Printer unavailable, dropping job");
                return;
            }
        };

        for copy in 1..=copies {
            match self.sink.print(job.image(), &page) {
                Ok(()) => info!(job_id = %job.id(), "Sent copy {}/{} to printer", copy, copies),
                Err(e) => error!(job_id = %job.id(), error = %e, "Error printing copy {}/{}", copy, copies),
            }
            if copy < copies && !self.pacing.is_zero() {
                thread::sleep(self.pacing);
            }
        }
    }
}

fn file_name(job: &PrintJob) -> String {
    job.image()
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}

/// Owner side of a running worker.
pub struct WorkerHandle {
    queue: Arc<QueueState>,
    exited: Receiver<()>,
    thread: Option<JoinHandle<()>>,
}

impl WorkerHandle {
    /// Enqueue the stop sentinel and wait up to `timeout` for the worker to exit.
    ///
    /// Jobs queued before the sentinel are still printed. Returns false if
    /// the worker was abandoned.
    pub fn shutdown(mut self, timeout: Duration) -> bool {
        info!("Shutting down print queue...");
        self.queue.stop();
        match self.exited.recv_timeout(timeout) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                if let Some(thread) = self.thread.take() {
                    if thread.join().is_err() {
                        warn!("Print worker thread panicked");
                    }
                }
                info!("Print queue shutdown complete");
                true
            }
            Err(RecvTimeoutError::Timeout) => {
                warn!(?timeout, "Print worker did not stop in time, abandoning it");
                false
            }
        }
    }
}
