//! Monitor - Wiring and Lifecycle
//!
//! Builds the queue, collector and worker from a `BoothConfig`, feeds
//! directory creation events to the collector and owns shutdown.

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use notify::event::CreateKind;
use notify::{Event, EventKind, RecursiveMode, Watcher};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use thiserror::Error;
use tracing::{debug, info, trace, warn};

use crate::archive::{Archive, ArchiveError};
use crate::collector::{BatchCollector, BatchRenderer, Discovery, IdleDispatcher};
use crate::compositor::{CollageRenderer, CompositeError, Compositor};
use crate::config::{BoothConfig, ConfigError, PrintConfig, SinkConfig};
use crate::copies::{CopyCountSource, FixedCopies, PromptCopies};
use crate::print::{CommandSink, PrintError, PrintSink, SpoolSink};
use crate::queue::QueueState;
use crate::templates::{load_template, CollageLayout, TemplateError};
use crate::worker::{PrintWorker, WorkerHandle};

/// How often the event loop looks at the shutdown flag.
const SHUTDOWN_POLL: Duration = Duration::from_millis(250);

#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Template error: {0}")]
    Template(#[from] TemplateError),

    #[error("Compositor error: {0}")]
    Composite(#[from] CompositeError),

    #[error("Archive error: {0}")]
    Archive(#[from] ArchiveError),

    #[error("Printer setup failed: {0}")]
    Print(#[from] PrintError),

    #[error("Watch error: {0}")]
    Watch(#[from] notify::Error),

    #[error("Failed to install interrupt handler: {0}")]
    Interrupt(#[from] ctrlc::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub struct Monitor {
    config: BoothConfig,
    watch_dir: PathBuf,
    collector: Arc<BatchCollector>,
    worker: Option<WorkerHandle>,
}

impl Monitor {
    /// Build the full booth: template compositor, configured sink, print worker.
    pub fn new(config: BoothConfig, copies: Box<dyn CopyCountSource>) -> Result<Self, MonitorError> {
        config.validate()?;
        let layout = CollageLayout::photo_strip();
        let template = load_template(&config.template_path, &layout)?;
        let compositor = Compositor::new(template, layout)?;
        let renderer = CollageRenderer::new(compositor, Archive::new(&config.output_dir)?);
        let sink = build_sink(&config.print)?;
        Self::with_components(config, Box::new(renderer), sink, copies)
    }

    /// Build around a caller-supplied renderer and sink.
    pub fn with_components(
        config: BoothConfig,
        renderer: Box<dyn BatchRenderer>,
        sink: Arc<dyn PrintSink>,
        copies: Box<dyn CopyCountSource>,
    ) -> Result<Self, MonitorError> {
        fs::create_dir_all(&config.input_dir)?;
        let watch_dir = fs::canonicalize(&config.input_dir)?;
        let archive = Archive::new(&config.output_dir)?;

        let queue = Arc::new(QueueState::new());
        let collector = Arc::new(
            BatchCollector::new(Arc::clone(&queue), renderer, archive, copies)
                .with_checker(config.readiness_checker())
                .with_stabilize(config.stabilize.policy()),
        );
        let worker = PrintWorker::new(queue, sink, config.print.pacing())
            .with_observer(Arc::new(IdleDispatcher::new(Arc::clone(&collector))))
            .spawn()?;

        info!(watch_dir = %watch_dir.display(), output_dir = %config.output_dir.display(), "Photobooth processor started");
        Ok(Self {
            config,
            watch_dir,
            collector,
            worker: Some(worker),
        })
    }

    pub fn collector(&self) -> &Arc<BatchCollector> {
        &self.collector
    }

    pub fn watch_dir(&self) -> &Path {
        &self.watch_dir
    }

    /// Watch the input directory until `shutdown` is set.
    pub fn run(&self, shutdown: &AtomicBool) -> Result<(), MonitorError> {
        let (tx, rx) = crossbeam_channel::unbounded();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            let _ = tx.send(res);
        })?;
        watcher.watch(&self.watch_dir, RecursiveMode::NonRecursive)?;
        info!(watch_dir = %self.watch_dir.display(), "Watching directory");

        if self.config.scan_existing {
            self.scan_existing()?;
        }

        while !shutdown.load(Ordering::SeqCst) {
            match rx.recv_timeout(SHUTDOWN_POLL) {
                Ok(Ok(event)) => {
                    self.handle_event(event);
                }
                Ok(Err(e)) => warn!(error = %e, "Watch error"),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        info!("Shutting down...");
        Ok(())
    }

    /// Feed one watcher event to the collector.
    pub fn handle_event(&self, event: Event) -> Vec<Discovery> {
        match event.kind {
            EventKind::Create(CreateKind::Folder) => {
                trace!(paths = ?event.paths, "Ignoring directory creation");
                vec![]
            }
            EventKind::Create(_) => event
                .paths
                .into_iter()
                .filter(|path| self.is_direct_child(path) && self.is_present_file(path))
                .map(|path| self.collector.on_file_discovered(path))
                .collect(),
            _ => {
                trace!(kind = ?event.kind, "Ignoring event");
                vec![]
            }
        }
    }

    fn is_direct_child(&self, path: &Path) -> bool {
        let direct = path.parent() == Some(self.watch_dir.as_path());
        if !direct {
            debug!(path = %path.display(), "Ignoring path outside watched directory");
        }
        direct
    }

    /// Directories and paths that are already gone (e.g. archived after the
    /// startup scan picked them up) are never offered.
    fn is_present_file(&self, path: &Path) -> bool {
        let present = path.is_file();
        if !present {
            debug!(path = %path.display(), "Ignoring path that is not a regular file");
        }
        present
    }

    /// Offer images already in the directory, oldest first.
    fn scan_existing(&self) -> Result<usize, MonitorError> {
        let checker = self.config.readiness_checker();
        let mut found = vec![];
        for entry in fs::read_dir(&self.watch_dir)? {
            let entry = entry?;
            let path = entry.path();
            let meta = entry.metadata()?;
            if meta.is_file() && checker.precheck(&path).is_ok() {
                found.push((meta.modified().unwrap_or(SystemTime::UNIX_EPOCH), path));
            }
        }
        found.sort();

        info!(count = found.len(), "Found existing images");
        let count = found.len();
        for (_, path) in found {
            self.collector.on_file_discovered(path);
        }
        Ok(count)
    }

    /// Stop batching, flush the print queue with the stop sentinel and wait
    /// a bounded time for the worker. Returns false if the worker was abandoned.
    pub fn shutdown(mut self) -> bool {
        self.collector.close();
        match self.worker.take() {
            Some(worker) => worker.shutdown(self.config.print.shutdown_timeout()),
            None => true,
        }
    }
}

pub fn build_sink(print: &PrintConfig) -> Result<Arc<dyn PrintSink>, MonitorError> {
    let sink: Arc<dyn PrintSink> = match &print.sink {
        SinkConfig::Spool { dir } => Arc::new(SpoolSink::new(dir, print.page, print.scale)?),
        SinkConfig::Command { program, args } => {
            Arc::new(CommandSink::new(program.clone(), args.clone(), print.page, print.scale))
        }
    };
    info!(sink = sink.name(), "Print sink ready");
    Ok(sink)
}

pub fn copy_source(config: &BoothConfig, interrupt: &Interrupt) -> Result<Box<dyn CopyCountSource>, MonitorError> {
    if config.prompt_copies {
        Ok(Box::new(PromptCopies::stdin(config.default_copies, interrupt.signal())?))
    } else {
        Ok(Box::new(FixedCopies(config.default_copies)))
    }
}

/// Ctrl-C state: a flag for polling loops and a channel that disconnects
/// for anything blocked in a `select!`.
#[derive(Clone)]
pub struct Interrupt {
    flag: Arc<AtomicBool>,
    signal: Receiver<()>,
}

impl Interrupt {
    pub fn new() -> (Self, InterruptTrigger) {
        let (tx, rx) = crossbeam_channel::bounded(0);
        let flag = Arc::new(AtomicBool::new(false));
        let trigger = InterruptTrigger {
            flag: Arc::clone(&flag),
            signal: Some(tx),
        };
        (Self { flag, signal: rx }, trigger)
    }

    pub fn flag(&self) -> &AtomicBool {
        &self.flag
    }

    pub fn is_set(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Never yields a message; becomes disconnected once interrupted.
    pub fn signal(&self) -> Receiver<()> {
        self.signal.clone()
    }
}

/// The firing side of an [`Interrupt`].
pub struct InterruptTrigger {
    flag: Arc<AtomicBool>,
    signal: Option<Sender<()>>,
}

impl InterruptTrigger {
    pub fn fire(&mut self) {
        self.flag.store(true, Ordering::SeqCst);
        self.signal.take();
    }
}

/// Fire the returned interrupt on Ctrl-C.
pub fn install_interrupt_handler() -> Result<Interrupt, MonitorError> {
    let (interrupt, mut trigger) = Interrupt::new();
    ctrlc::set_handler(move || {
        info!("Interrupt received");
        trigger.fire();
    })?;
    Ok(interrupt)
}
