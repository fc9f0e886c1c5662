//! Boothprint Core - Photo Booth Collage and Print Queue
//!
//! # Guarantees
//! 1. Photos are batched in discovery order, three per collage
//! 2. A batch dispatches only while the print queue is empty and idle
//! 3. Consumed photos are archived whatever the composite outcome
//! 4. A failed photo becomes a placeholder, never a lost batch
//! 5. One worker prints jobs strictly in submission order
//! 6. Shutdown flushes the queue with a sentinel and a bounded wait

pub mod archive;
pub mod collector;
pub mod compositor;
pub mod config;
pub mod copies;
pub mod monitor;
pub mod print;
pub mod queue;
pub mod retry;
pub mod templates;
pub mod validation;
pub mod worker;

pub use archive::{Archive, ArchiveError};
pub use collector::{Batch, BatchCollector, BatchRenderer, Discovery, IdleDispatcher, PendingFile, StabilizePolicy};
pub use compositor::{CollageRenderer, CompositeError, Composite, Compositor, SlotOutcome};
pub use config::{BoothConfig, ConfigError, SinkConfig};
pub use copies::{CopyCountSource, FixedCopies, PromptCopies};
pub use monitor::{Interrupt, Monitor, MonitorError};
pub use print::{PageGeometry, Placement, PrintError, PrintSink};
pub use queue::{PrintJob, QueueItem, QueueState};
pub use templates::{CollageLayout, Region, TemplateError};
pub use worker::{JobObserver, PrintWorker, WorkerHandle};

pub const ENGINE_VERSION: &str = env!("CARGO_PKG_VERSION");
