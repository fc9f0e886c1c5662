//! Print Queue - Shared FIFO State
//!
//! One `QueueState` exists per process. The batch collector submits jobs,
//! the print worker is the only consumer. The busy flag lives under the
//! same lock as the queue so the dispatch gate sees a consistent picture.

use parking_lot::{Condvar, Mutex};
use serde::Serialize;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use uuid::Uuid;

/// One composite to print, `copies` times. Never holds zero copies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PrintJob {
    id: Uuid,
    image: PathBuf,
    copies: u32,
}

impl PrintJob {
    /// `None` when `copies` is zero: a zero-copy job is never queued.
    pub fn new(image: impl Into<PathBuf>, copies: u32) -> Option<Self> {
        (copies > 0).then(|| Self {
            id: Uuid::new_v4(),
            image: image.into(),
            copies,
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn image(&self) -> &Path {
        &self.image
    }

    pub fn copies(&self) -> u32 {
        self.copies
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueItem {
    Job(PrintJob),
    /// Shutdown sentinel; the worker exits when it dequeues this.
    Stop,
}

#[derive(Debug, Default)]
struct Inner {
    items: VecDeque<QueueItem>,
    is_printing: bool,
    /// Dequeued jobs not yet marked finished.
    in_flight: usize,
}

/// Print queue plus the worker's busy flag.
#[derive(Debug, Default)]
pub struct QueueState {
    inner: Mutex<Inner>,
    available: Condvar,
    settled: Condvar,
}

impl QueueState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a job; returns its 1-based position among waiting items.
    pub fn submit(&self, job: PrintJob) -> usize {
        let mut inner = self.inner.lock();
        inner.items.push_back(QueueItem::Job(job));
        let position = inner.items.len();
        drop(inner);
        self.available.notify_one();
        position
    }

    /// Queue the shutdown sentinel behind everything already waiting.
    pub fn stop(&self) {
        self.inner.lock().items.push_back(QueueItem::Stop);
        self.available.notify_one();
    }

    /// Block until an item is available and take it.
    ///
    /// Taking a job sets `is_printing` in the same critical section.
    pub fn next(&self) -> QueueItem {
        let mut inner = self.inner.lock();
        loop {
            if let Some(item) = inner.items.pop_front() {
                if matches!(item, QueueItem::Job(_)) {
                    inner.is_printing = true;
                    inner.in_flight += 1;
                }
                return item;
            }
            self.available.wait(&mut inner);
        }
    }

    /// Mark the current job done and clear the busy flag.
    pub fn finish_job(&self) {
        let mut inner = self.inner.lock();
        inner.is_printing = false;
        inner.in_flight = inner.in_flight.saturating_sub(1);
        drop(inner);
        self.settled.notify_all();
    }

    /// Waiting items, the sentinel included. Advisory.
    pub fn len(&self) -> usize {
        self.inner.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().items.is_empty()
    }

    pub fn is_printing(&self) -> bool {
        self.inner.lock().is_printing
    }

    /// Waiting plus in-flight jobs.
    pub fn outstanding(&self) -> usize {
        let inner = self.inner.lock();
        inner.items.iter().filter(|i| matches!(i, QueueItem::Job(_))).count() + inner.in_flight
    }

    /// Queue empty and nothing printing.
    pub fn gate_open(&self) -> bool {
        let inner = self.inner.lock();
        inner.items.is_empty() && !inner.is_printing
    }

    /// Wait until no job is waiting or in flight. Returns false on timeout.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut inner = self.inner.lock();
        loop {
            let pending_jobs = inner.items.iter().any(|i| matches!(i, QueueItem::Job(_)));
            if !pending_jobs && inner.in_flight == 0 {
                return true;
            }
            if self.settled.wait_until(&mut inner, deadline).timed_out() {
                return false;
            }
        }
    }
}
