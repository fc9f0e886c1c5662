//! Batch Collector
//!
//! Accumulates stabilized photos in discovery order and turns every three
//! of them into a collage, but only while the print side is idle:
//! the print queue is empty, nothing is printing and no other batch is
//! being assembled. A closed gate leaves the files pending; the print
//! worker re-checks the gate after every finished job.

use chrono::{DateTime, Local};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::VecDeque;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::archive::Archive;
use crate::compositor::CompositeError;
use crate::copies::CopyCountSource;
use crate::queue::{PrintJob, QueueState};
use crate::retry::{retry_with_backoff, Attempt, RetryOutcome};
use crate::templates::PHOTOS_PER_COLLAGE;
use crate::validation::{Readiness, ReadinessChecker};
use crate::worker::JobObserver;

/// A photo waiting for a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PendingFile {
    pub path: PathBuf,
    pub discovered_at: DateTime<Local>,
}

impl PendingFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            discovered_at: Local::now(),
        }
    }

    fn name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.path.display().to_string())
    }
}

/// Exactly three photos, oldest discovery first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Batch {
    files: [PendingFile; PHOTOS_PER_COLLAGE],
}

impl Batch {
    pub fn new(files: [PendingFile; PHOTOS_PER_COLLAGE]) -> Self {
        Self { files }
    }

    pub fn files(&self) -> &[PendingFile; PHOTOS_PER_COLLAGE] {
        &self.files
    }

    pub fn paths(&self) -> [&Path; PHOTOS_PER_COLLAGE] {
        std::array::from_fn(|i| self.files[i].path.as_path())
    }
}

impl fmt::Display for Batch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<_> = self.files.iter().map(PendingFile::name).collect();
        write!(f, "[{}]", names.join(", "))
    }
}

/// Turns a batch into a saved collage.
pub trait BatchRenderer: Send + Sync {
    fn render(&self, batch: &Batch, stamp: &str) -> Result<PathBuf, CompositeError>;
}

/// How long to wait for a new file to be fully written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StabilizePolicy {
    pub initial_delay: Duration,
    pub attempts: u32,
    pub backoff: Duration,
}

impl Default for StabilizePolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            attempts: 5,
            backoff: Duration::from_secs(1),
        }
    }
}

impl StabilizePolicy {
    /// No waiting at all; files must be complete when announced.
    pub fn immediate() -> Self {
        Self {
            initial_delay: Duration::ZERO,
            attempts: 1,
            backoff: Duration::ZERO,
        }
    }
}

/// What happened to a discovered path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Discovery {
    Queued { pending: usize },
    Rejected(String),
    Unstable { attempts: u32, reason: String },
    Duplicate,
}

#[derive(Debug, Default)]
struct Pending {
    files: VecDeque<PendingFile>,
    dispatching: bool,
    closed: bool,
    batches: u64,
}

pub struct BatchCollector {
    queue: Arc<QueueState>,
    renderer: Box<dyn BatchRenderer>,
    archive: Archive,
    copies: Box<dyn CopyCountSource>,
    checker: ReadinessChecker,
    stabilize: StabilizePolicy,
    state: Mutex<Pending>,
}

impl BatchCollector {
    pub fn new(
        queue: Arc<QueueState>,
        renderer: Box<dyn BatchRenderer>,
        archive: Archive,
        copies: Box<dyn CopyCountSource>,
    ) -> Self {
        Self {
            queue,
            renderer,
            archive,
            copies,
            checker: ReadinessChecker::default(),
            stabilize: StabilizePolicy::default(),
            state: Mutex::new(Pending::default()),
        }
    }

    pub fn with_checker(mut self, checker: ReadinessChecker) -> Self {
        self.checker = checker;
        self
    }

    pub fn with_stabilize(mut self, stabilize: StabilizePolicy) -> Self {
        self.stabilize = stabilize;
        self
    }

    /// Handle a file creation event.
    ///
    /// Waits for the file to stabilize, appends it to the pending list and
    /// dispatches a batch if three or more files are pending and the gate
    /// is open.
    pub fn on_file_discovered(&self, path: impl Into<PathBuf>) -> Discovery {
        let path = path.into();
        let name = path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();

        if let Err(readiness) = self.checker.precheck(&path) {
            info!(file = %name, reason = readiness.reason(), "Ignoring file");
            return Discovery::Rejected(readiness.reason().to_string());
        }

        if let Some(discovery) = self.wait_until_stable(&path, &name) {
            return discovery;
        }

        let pending = {
            let mut state = self.state.lock();
            if state.files.iter().any(|f| f.path == path) {
                debug!(file = %name, "File already pending");
                return Discovery::Duplicate;
            }
            state.files.push_back(PendingFile::new(path));
            state.files.len()
        };

        info!(file = %name, pending, "New file detected ({}/{})", pending, PHOTOS_PER_COLLAGE);
        if pending >= PHOTOS_PER_COLLAGE {
            self.try_dispatch();
        }
        Discovery::Queued { pending }
    }

    fn wait_until_stable(&self, path: &Path, name: &str) -> Option<Discovery> {
        if !self.stabilize.initial_delay.is_zero() {
            thread::sleep(self.stabilize.initial_delay);
        }

        let attempts = self.stabilize.attempts;
        let outcome = retry_with_backoff(attempts, self.stabilize.backoff, |attempt| {
            match self.checker.check(path) {
                Ok(()) => Attempt::Done(()),
                Err(Readiness::Rejected(reason)) => Attempt::Abort(reason),
                Err(Readiness::NotReady(reason)) => {
                    debug!(file = %name, attempt, attempts, reason = %reason, "File not ready, waiting");
                    Attempt::Retry(reason)
                }
            }
        });

        match outcome {
            RetryOutcome::Ready(()) => None,
            RetryOutcome::Aborted(reason) => {
                info!(file = %name, reason = %reason, "Ignoring file");
                Some(Discovery::Rejected(reason))
            }
            RetryOutcome::GaveUp { attempts, last } => {
                warn!(file = %name, attempts, reason = %last, "Failed to access file, ignoring");
                Some(Discovery::Unstable { attempts, reason: last })
            }
        }
    }

    /// Dispatch pending batches while the gate is open.
    ///
    /// Returns the number of batches turned into collages by this call.
    pub fn try_dispatch(&self) -> usize {
        let mut dispatched = 0;
        while let Some(cycle) = self.take_batch() {
            self.run_cycle(&cycle.batch);
            dispatched += 1;
        }
        dispatched
    }

    /// Form a batch if the gate is open, marking a cycle in flight.
    fn take_batch(&self) -> Option<Cycle<'_>> {
        let mut state = self.state.lock();
        if state.closed || state.files.len() < PHOTOS_PER_COLLAGE {
            return None;
        }
        if state.dispatching {
            debug!("Batch already being processed");
            return None;
        }
        if !self.queue.gate_open() {
            if self.queue.is_printing() {
                info!("Currently printing - batch will be processed when print job completes");
            } else {
                info!(
                    jobs = self.queue.len(),
                    "Print queue busy - batch will be processed when queue is empty"
                );
            }
            return None;
        }

        let files: [PendingFile; PHOTOS_PER_COLLAGE] = state
            .files
            .drain(..PHOTOS_PER_COLLAGE)
            .collect::<Vec<_>>()
            .try_into()
            .ok()?;
        state.dispatching = true;
        state.batches += 1;
        Some(Cycle {
            collector: self,
            batch: Batch::new(files),
        })
    }

    /// Compose, archive, ask for copies, enqueue. Returns true if a job was queued.
    fn run_cycle(&self, batch: &Batch) -> bool {
        let stamp = Archive::stamp();
        info!(batch = %batch, "Creating collage...");

        let rendered = self.renderer.render(batch, &stamp);

        // Consumed photos leave the watched directory whatever the outcome.
        for file in batch.files() {
            if let Err(e) = self.archive.archive_source(&file.path, &stamp) {
                error!(error = %e, "Error moving file");
            }
        }

        let queued = match rendered {
            Ok(collage) => {
                info!(collage = %collage.display(), "Successfully created collage");
                self.submit(&collage)
            }
            Err(e) => {
                error!(error = %e, "Failed to process images");
                false
            }
        };

        info!(
            remaining = self.pending_len(),
            "Batch processing complete"
        );
        queued
    }

    fn submit(&self, collage: &Path) -> bool {
        let copies = self.copies.copies_for(collage);
        if self.state.lock().closed {
            info!(collage = %collage.display(), "Shutting down - collage saved but not queued");
            return false;
        }
        match PrintJob::new(collage, copies) {
            None => {
                info!("Skipping printing (0 copies requested)");
                false
            }
            Some(job) => {
                let job_id = job.id();
                let position = self.queue.submit(job);
                if position > 1 {
                    info!(%job_id, copies, position, "Added to print queue");
                } else {
                    info!(%job_id, copies, "Added to print queue (processing now)");
                }
                true
            }
        }
    }

    /// Stop forming new batches; used during shutdown.
    pub fn close(&self) {
        self.state.lock().closed = true;
    }

    pub fn pending(&self) -> Vec<PendingFile> {
        self.state.lock().files.iter().cloned().collect()
    }

    pub fn pending_len(&self) -> usize {
        self.state.lock().files.len()
    }

    /// Batches formed since startup.
    pub fn batches_dispatched(&self) -> u64 {
        self.state.lock().batches
    }

    /// Whether `try_dispatch` would form a batch right now.
    fn batch_ready(&self) -> bool {
        let state = self.state.lock();
        !state.closed
            && !state.dispatching
            && state.files.len() >= PHOTOS_PER_COLLAGE
            && self.queue.gate_open()
    }
}

/// Re-checks the gate after each print job and hands an open gate to a
/// short-lived `batch-dispatch` thread.
///
/// The check runs on the print worker under the collector lock; composing
/// and asking for copies never do.
pub struct IdleDispatcher {
    collector: Arc<BatchCollector>,
}

impl IdleDispatcher {
    pub fn new(collector: Arc<BatchCollector>) -> Self {
        Self { collector }
    }
}

impl JobObserver for IdleDispatcher {
    fn on_job_done(&self) {
        if !self.collector.batch_ready() {
            return;
        }
        info!(
            pending = self.collector.pending_len(),
            "Print queue empty and not printing - processing next batch"
        );
        let collector = Arc::clone(&self.collector);
        let spawned = thread::Builder::new()
            .name("batch-dispatch".to_string())
            .spawn(move || {
                collector.try_dispatch();
            });
        if let Err(e) = spawned {
            error!(error = %e, "Failed to start batch dispatch, batch stays pending");
        }
    }
}

/// A batch in flight; clears the dispatching flag when dropped.
struct Cycle<'a> {
    collector: &'a BatchCollector,
    batch: Batch,
}

impl Drop for Cycle<'_> {
    fn drop(&mut self) {
        self.collector.state.lock().dispatching = false;
    }
}
