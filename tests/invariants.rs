//! Contract Invariant Tests
//!
//! These tests verify the non-negotiable guarantees.

use boothprint_core::{
    archive::{Archive, SINGLE_IMAGES_DIR, STAMP_FORMAT},
    collector::{Batch, BatchCollector, BatchRenderer, Discovery, IdleDispatcher, StabilizePolicy},
    compositor::{CollageRenderer, CompositeError, Compositor, SlotOutcome, PLACEHOLDER_COLOR},
    config::{BoothConfig, StabilizeConfig},
    copies::{CopyCountSource, FixedCopies, PromptCopies},
    monitor::{Interrupt, Monitor},
    print::{PageGeometry, PrintError, PrintSink},
    queue::{PrintJob, QueueState},
    templates::{CollageLayout, Region},
    worker::{PrintWorker, WorkerHandle},
};
use crossbeam_channel::{Receiver, Sender};
use image::{Rgb, RgbImage, Rgba, RgbaImage};
use notify::event::{CreateKind, DataChange, ModifyKind};
use notify::{Event, EventKind};
use parking_lot::Mutex;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant, SystemTime};

const WAIT: Duration = Duration::from_secs(10);

fn wait_for(mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + WAIT;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    cond()
}

fn photo(dir: &Path, name: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, b"\xFF\xD8\xFF\xE0").unwrap();
    path
}

fn small_layout() -> CollageLayout {
    CollageLayout {
        regions: [
            Region::new(2, 2, 20, 10),
            Region::new(2, 14, 20, 10),
            Region::new(2, 26, 20, 10),
        ],
    }
}

/// Records each batch and names the collage after its position.
#[derive(Clone, Default)]
struct RecordingRenderer {
    batches: Arc<Mutex<Vec<Vec<PathBuf>>>>,
}

impl BatchRenderer for RecordingRenderer {
    fn render(&self, batch: &Batch, _stamp: &str) -> Result<PathBuf, CompositeError> {
        let mut batches = self.batches.lock();
        batches.push(batch.files().iter().map(|f| f.path.clone()).collect());
        Ok(PathBuf::from(format!("collage_{}.jpg", batches.len())))
    }
}

/// Counts print calls. With a gate, each call blocks until released.
#[derive(Default)]
struct TestSink {
    calls: Mutex<Vec<PathBuf>>,
    gate: Option<Receiver<()>>,
    delay: Duration,
}

impl TestSink {
    fn gated() -> (Arc<Self>, Sender<()>) {
        let (tx, rx) = crossbeam_channel::unbounded();
        let sink = TestSink {
            gate: Some(rx),
            ..Default::default()
        };
        (Arc::new(sink), tx)
    }

    fn slow(delay: Duration) -> Arc<Self> {
        Arc::new(TestSink {
            delay,
            ..Default::default()
        })
    }

    fn count(&self) -> usize {
        self.calls.lock().len()
    }
}

impl PrintSink for TestSink {
    fn name(&self) -> &str {
        "test"
    }

    fn page_geometry(&self) -> Result<PageGeometry, PrintError> {
        Ok(PageGeometry::default())
    }

    fn print(&self, image: &Path, _page: &PageGeometry) -> Result<(), PrintError> {
        if let Some(gate) = &self.gate {
            gate.recv_timeout(WAIT)
                .map_err(|_| PrintError::Unavailable("gate never released".into()))?;
        }
        if !self.delay.is_zero() {
            thread::sleep(self.delay);
        }
        self.calls.lock().push(image.to_path_buf());
        Ok(())
    }
}

struct Booth {
    queue: Arc<QueueState>,
    collector: Arc<BatchCollector>,
    renderer: RecordingRenderer,
    worker: WorkerHandle,
}

fn booth(dir: &Path, sink: Arc<TestSink>, copies: u32) -> Booth {
    booth_with(dir, sink, Box::new(FixedCopies(copies)))
}

fn booth_with(dir: &Path, sink: Arc<TestSink>, copies: Box<dyn CopyCountSource>) -> Booth {
    let queue = Arc::new(QueueState::new());
    let renderer = RecordingRenderer::default();
    let collector = Arc::new(
        BatchCollector::new(
            Arc::clone(&queue),
            Box::new(renderer.clone()),
            Archive::new(dir.join("merged_images")).unwrap(),
            copies,
        )
        .with_stabilize(StabilizePolicy::immediate()),
    );
    let worker = PrintWorker::new(Arc::clone(&queue), sink, Duration::ZERO)
        .with_observer(Arc::new(IdleDispatcher::new(Arc::clone(&collector))))
        .spawn()
        .unwrap();
    Booth {
        queue,
        collector,
        renderer,
        worker,
    }
}

#[test]
fn invariant_batches_follow_discovery_order() {
    let dir = tempfile::tempdir().unwrap();
    let sink = Arc::new(TestSink::default());
    let b = booth(dir.path(), sink.clone(), 1);

    let names: Vec<String> = (0..7).map(|i| format!("photo_{i}.jpg")).collect();
    let paths: Vec<PathBuf> = names.iter().map(|n| photo(dir.path(), n)).collect();
    for path in &paths {
        b.collector.on_file_discovered(path.clone());
    }

    // 7 photos: two collages, one photo left over
    assert!(wait_for(|| b.collector.batches_dispatched() == 2 && b.queue.outstanding() == 0));
    assert!(wait_for(|| sink.count() == 2));

    let batches = b.renderer.batches.lock().clone();
    assert_eq!(batches, vec![paths[0..3].to_vec(), paths[3..6].to_vec()]);

    let pending = b.collector.pending();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].path, paths[6]);

    assert!(b.worker.shutdown(WAIT));
}

#[test]
fn invariant_no_dispatch_while_printing() {
    let dir = tempfile::tempdir().unwrap();
    let (sink, release) = TestSink::gated();
    let b = booth(dir.path(), sink.clone(), 2);

    for i in 0..3 {
        b.collector.on_file_discovered(photo(dir.path(), &format!("a{i}.jpg")));
    }
    assert_eq!(b.collector.batches_dispatched(), 1);
    assert!(wait_for(|| b.queue.is_printing()));

    // Gate closed: the second batch must wait
    for i in 0..3 {
        let d = b.collector.on_file_discovered(photo(dir.path(), &format!("b{i}.jpg")));
        assert!(matches!(d, Discovery::Queued { .. }));
    }
    assert_eq!(b.collector.pending_len(), 3);
    assert_eq!(b.collector.batches_dispatched(), 1);
    assert_eq!(b.collector.try_dispatch(), 0);

    // First copy done, second still printing
    release.send(()).unwrap();
    assert!(wait_for(|| sink.count() == 1));
    assert!(b.queue.is_printing());
    assert_eq!(b.collector.batches_dispatched(), 1);

    // Finishing the job reopens the gate without any new arrival
    release.send(()).unwrap();
    assert!(wait_for(|| b.collector.batches_dispatched() == 2));
    assert_eq!(b.collector.pending_len(), 0);

    release.send(()).unwrap();
    release.send(()).unwrap();
    assert!(wait_for(|| sink.count() == 4 && b.queue.outstanding() == 0));
    assert_eq!(b.collector.batches_dispatched(), 2);

    assert!(b.worker.shutdown(WAIT));
}

#[test]
fn invariant_zero_copies_never_enqueued() {
    let dir = tempfile::tempdir().unwrap();
    let sink = Arc::new(TestSink::default());
    let b = booth(dir.path(), sink.clone(), 0);

    for i in 0..6 {
        b.collector.on_file_discovered(photo(dir.path(), &format!("p{i}.jpg")));
    }

    // Nothing ever queued, so both batches formed straight away
    assert_eq!(b.collector.batches_dispatched(), 2);
    assert_eq!(b.queue.outstanding(), 0);
    assert!(b.worker.shutdown(WAIT));
    assert_eq!(sink.count(), 0);
    assert!(PrintJob::new("collage.jpg", 0).is_none());
}

#[test]
fn invariant_each_copy_reaches_the_sink() {
    let dir = tempfile::tempdir().unwrap();
    let sink = Arc::new(TestSink::default());
    let b = booth(dir.path(), sink.clone(), 3);

    for i in 0..3 {
        b.collector.on_file_discovered(photo(dir.path(), &format!("p{i}.jpg")));
    }
    assert!(wait_for(|| sink.count() == 3));
    assert!(b.queue.wait_idle(WAIT));
    assert!(sink.calls.lock().iter().all(|p| p == Path::new("collage_1.jpg")));
    assert!(b.worker.shutdown(WAIT));
}

#[test]
fn invariant_stabilization_waits_for_late_file() {
    let dir = tempfile::tempdir().unwrap();
    let queue = Arc::new(QueueState::new());
    let collector = BatchCollector::new(
        queue,
        Box::new(RecordingRenderer::default()),
        Archive::new(dir.path().join("out")).unwrap(),
        Box::new(FixedCopies(1)),
    )
    .with_stabilize(StabilizePolicy {
        initial_delay: Duration::ZERO,
        attempts: 5,
        backoff: Duration::from_millis(50),
    });

    let late = dir.path().join("late.jpg");
    let writer = {
        let late = late.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(80));
            fs::write(&late, b"\xFF\xD8").unwrap();
        })
    };

    assert_eq!(collector.on_file_discovered(late), Discovery::Queued { pending: 1 });
    writer.join().unwrap();
}

#[test]
fn invariant_failed_photo_becomes_placeholder() {
    let dir = tempfile::tempdir().unwrap();
    let good = dir.path().join("good.png");
    RgbImage::from_pixel(40, 20, Rgb([255, 0, 0])).save(&good).unwrap();
    let missing = dir.path().join("missing.jpg");

    let template = RgbaImage::from_pixel(24, 38, Rgba([0, 0, 0, 0]));
    let compositor = Compositor::new(template, small_layout()).unwrap();
    let renderer = CollageRenderer::new(compositor, Archive::new(dir.path().join("out")).unwrap());

    let stamp = Archive::stamp();
    let (path, composite) = renderer.render_paths(&[&missing, &good, &good], &stamp).unwrap();

    // Every slot filled at exactly its window size
    assert!(matches!(composite.slots[0], SlotOutcome::Placeholder { .. }));
    assert_eq!(composite.slots[1], SlotOutcome::Placed);
    assert_eq!(composite.image.get_pixel(2, 2), &PLACEHOLDER_COLOR);
    assert_eq!(composite.image.get_pixel(21, 11), &PLACEHOLDER_COLOR);
    assert_eq!(composite.image.get_pixel(2, 12), &Rgba([0, 0, 0, 0]));
    assert!(composite.image.get_pixel(12, 19)[0] > 200);

    // Saved as two copies side by side
    let saved = image::open(&path).unwrap();
    assert_eq!((saved.width(), saved.height()), (48, 38));
    assert_eq!(
        path.file_name().unwrap().to_string_lossy(),
        format!("collage_{stamp}.jpg")
    );
}

fn booth_config(root: &Path) -> BoothConfig {
    BoothConfig {
        input_dir: root.join("processed_full"),
        output_dir: root.join("merged_images"),
        prompt_copies: false,
        stabilize: StabilizeConfig {
            initial_delay_ms: 0,
            attempts: 1,
            backoff_ms: 0,
        },
        ..Default::default()
    }
}

fn created(path: PathBuf) -> Event {
    Event::new(EventKind::Create(CreateKind::File)).add_path(path)
}

#[test]
fn invariant_end_to_end_archives_every_consumed_photo() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = booth_config(dir.path());
    config.print.pacing_ms = 0;

    let template = RgbaImage::from_pixel(24, 38, Rgba([0, 0, 0, 0]));
    let renderer = CollageRenderer::new(
        Compositor::new(template, small_layout()).unwrap(),
        Archive::new(&config.output_dir).unwrap(),
    );
    let sink = Arc::new(TestSink::default());
    let monitor = Monitor::with_components(
        config.clone(),
        Box::new(renderer),
        sink.clone(),
        Box::new(FixedCopies(1)),
    )
    .unwrap();

    let watch = monitor.watch_dir().to_path_buf();
    for name in ["a.png", "b.png", "c.png"] {
        let path = watch.join(name);
        RgbImage::from_pixel(30, 30, Rgb([0, 0, 255])).save(&path).unwrap();
        let found = monitor.handle_event(created(path));
        assert_eq!(found.len(), 1);
    }

    assert!(wait_for(|| sink.count() == 1));
    assert_eq!(monitor.collector().pending_len(), 0);
    assert_eq!(fs::read_dir(&watch).unwrap().count(), 0);

    let singles = config.output_dir.join(SINGLE_IMAGES_DIR);
    let mut archived: Vec<String> = fs::read_dir(&singles)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    archived.sort();
    assert_eq!(archived.len(), 3);
    for (archived, source) in archived.iter().zip(["a.png", "b.png", "c.png"]) {
        let (stamp, rest) = archived.split_at(15);
        assert!(chrono::NaiveDateTime::parse_from_str(stamp, STAMP_FORMAT).is_ok(), "{archived}");
        assert_eq!(rest, format!("_{source}"));
    }

    let printed = sink.calls.lock()[0].clone();
    assert!(printed.starts_with(&config.output_dir));
    assert!(printed.exists());

    assert!(monitor.shutdown());
}

#[test]
fn invariant_only_new_files_in_watched_directory_count() {
    let dir = tempfile::tempdir().unwrap();
    let config = booth_config(dir.path());
    let monitor = Monitor::with_components(
        config,
        Box::new(RecordingRenderer::default()),
        Arc::new(TestSink::default()),
        Box::new(FixedCopies(1)),
    )
    .unwrap();
    let watch = monitor.watch_dir().to_path_buf();

    let nested = watch.join("sub");
    fs::create_dir(&nested).unwrap();
    assert!(monitor
        .handle_event(Event::new(EventKind::Create(CreateKind::Folder)).add_path(nested.clone()))
        .is_empty());
    assert!(monitor.handle_event(created(photo(&nested, "deep.jpg"))).is_empty());

    let modified = Event::new(EventKind::Modify(ModifyKind::Data(DataChange::Content)))
        .add_path(photo(&watch, "edited.jpg"));
    assert!(monitor.handle_event(modified).is_empty());

    let tmp = monitor.handle_event(created(photo(&watch, "shot.jpg.tmp")));
    assert!(matches!(tmp.as_slice(), [Discovery::Rejected(_)]));

    let ok = monitor.handle_event(created(photo(&watch, "shot.jpg")));
    assert_eq!(ok, vec![Discovery::Queued { pending: 1 }]);
    assert_eq!(monitor.collector().pending_len(), 1);

    assert!(monitor.shutdown());
}

#[test]
fn invariant_shutdown_finishes_queued_jobs() {
    let queue = Arc::new(QueueState::new());
    let sink = TestSink::slow(Duration::from_millis(150));
    let handle = PrintWorker::new(Arc::clone(&queue), sink.clone(), Duration::ZERO)
        .spawn()
        .unwrap();

    queue.submit(PrintJob::new("first.jpg", 1).unwrap());
    queue.submit(PrintJob::new("second.jpg", 1).unwrap());
    assert!(wait_for(|| queue.is_printing()));

    // Stop lands behind both jobs; the in-flight one is not interrupted
    let started = Instant::now();
    assert!(handle.shutdown(Duration::from_secs(5)));
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(
        *sink.calls.lock(),
        vec![PathBuf::from("first.jpg"), PathBuf::from("second.jpg")]
    );
    assert!(!queue.is_printing());
}

#[test]
fn invariant_closed_booth_dispatches_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let (sink, release) = TestSink::gated();
    let b = booth(dir.path(), sink.clone(), 1);

    for i in 0..3 {
        b.collector.on_file_discovered(photo(dir.path(), &format!("a{i}.jpg")));
    }
    assert!(wait_for(|| b.queue.is_printing()));
    for i in 0..3 {
        b.collector.on_file_discovered(photo(dir.path(), &format!("b{i}.jpg")));
    }

    // Shutdown begins while a batch is waiting on the gate
    b.collector.close();
    release.send(()).unwrap();
    assert!(b.worker.shutdown(WAIT));

    assert_eq!(b.collector.batches_dispatched(), 1);
    assert_eq!(b.collector.pending_len(), 3);
    assert_eq!(sink.count(), 1);
}

/// Answers 1 copy and records the asking thread; from the second call on,
/// waits for a release first.
struct HeldCopies {
    threads: Mutex<Vec<String>>,
    release: Receiver<()>,
}

impl CopyCountSource for HeldCopies {
    fn copies_for(&self, _collage: &Path) -> u32 {
        let calls = {
            let mut threads = self.threads.lock();
            threads.push(thread::current().name().unwrap_or("unnamed").to_string());
            threads.len()
        };
        if calls > 1 {
            let _ = self.release.recv_timeout(WAIT);
        }
        1
    }
}

#[test]
fn invariant_copy_prompt_never_blocks_print_worker() {
    let dir = tempfile::tempdir().unwrap();
    let (sink, release_print) = TestSink::gated();
    let (answer, held) = crossbeam_channel::unbounded();
    let copies = Arc::new(HeldCopies {
        threads: Mutex::new(vec![]),
        release: held,
    });

    struct Shared(Arc<HeldCopies>);
    impl CopyCountSource for Shared {
        fn copies_for(&self, collage: &Path) -> u32 {
            self.0.copies_for(collage)
        }
    }

    let b = booth_with(dir.path(), sink.clone(), Box::new(Shared(Arc::clone(&copies))));
    for i in 0..3 {
        b.collector.on_file_discovered(photo(dir.path(), &format!("a{i}.jpg")));
    }
    assert!(wait_for(|| b.queue.is_printing()));
    for i in 0..3 {
        b.collector.on_file_discovered(photo(dir.path(), &format!("b{i}.jpg")));
    }

    // The second batch is dispatched once the job ends; its prompt stays open
    release_print.send(()).unwrap();
    assert!(wait_for(|| copies.threads.lock().len() == 2));
    let threads = copies.threads.lock().clone();
    assert!(threads.iter().all(|t| t != "print-worker"), "{threads:?}");
    assert_eq!(threads[1], "batch-dispatch");

    // The worker is idle in the queue, so the stop sentinel reaches it
    b.collector.close();
    let started = Instant::now();
    assert!(b.worker.shutdown(Duration::from_secs(5)));
    assert!(started.elapsed() < Duration::from_secs(2));

    answer.send(()).unwrap();
    assert_eq!(sink.count(), 1);
}

#[test]
fn invariant_interrupt_ends_copy_prompt() {
    let (interrupt, mut trigger) = Interrupt::new();
    let (_typist, lines) = crossbeam_channel::unbounded();
    let prompt = PromptCopies::with_lines(2, lines, interrupt.signal());

    let ctrl_c = thread::spawn(move || {
        thread::sleep(Duration::from_millis(50));
        trigger.fire();
    });
    let started = Instant::now();
    assert_eq!(prompt.copies_for(Path::new("collage.jpg")), 2);
    assert!(started.elapsed() < Duration::from_secs(5));
    ctrl_c.join().unwrap();
    assert!(interrupt.is_set());
}

fn age(path: &Path, secs: u64) {
    fs::File::options()
        .write(true)
        .open(path)
        .unwrap()
        .set_modified(SystemTime::now() - Duration::from_secs(secs))
        .unwrap();
}

#[test]
fn invariant_run_scans_existing_then_watches() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = booth_config(dir.path());
    config.scan_existing = true;
    config.stabilize = StabilizeConfig {
        initial_delay_ms: 0,
        attempts: 40,
        backoff_ms: 25,
    };
    fs::create_dir_all(&config.input_dir).unwrap();

    // Oldest first, regardless of name
    for (name, secs) in [("z.jpg", 30), ("a.jpg", 20), ("m.jpg", 10)] {
        age(&photo(&config.input_dir, name), secs);
    }

    let renderer = RecordingRenderer::default();
    let monitor = Monitor::with_components(
        config,
        Box::new(renderer.clone()),
        Arc::new(TestSink::default()),
        Box::new(FixedCopies(1)),
    )
    .unwrap();
    let watch = monitor.watch_dir().to_path_buf();
    let stop = AtomicBool::new(false);

    thread::scope(|scope| {
        let running = scope.spawn(|| monitor.run(&stop));
        assert!(wait_for(|| monitor.collector().batches_dispatched() == 1));

        // The watcher is live once the scan has finished
        for name in ["live1.jpg", "live2.jpg", "live3.jpg"] {
            photo(&watch, name);
        }
        assert!(wait_for(|| monitor.collector().batches_dispatched() == 2));

        stop.store(true, Ordering::SeqCst);
        assert!(running.join().unwrap().is_ok());
    });

    let batches = renderer.batches.lock().clone();
    assert_eq!(
        batches[0],
        vec![watch.join("z.jpg"), watch.join("a.jpg"), watch.join("m.jpg")]
    );
    let mut live = batches[1].clone();
    live.sort();
    assert_eq!(
        live,
        vec![watch.join("live1.jpg"), watch.join("live2.jpg"), watch.join("live3.jpg")]
    );
    assert_eq!(monitor.collector().pending_len(), 0);
    assert!(monitor.shutdown());
}

#[test]
fn invariant_vanished_or_repeated_paths_do_not_stall() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = booth_config(dir.path());
    config.stabilize = StabilizeConfig {
        initial_delay_ms: 0,
        attempts: 5,
        backoff_ms: 1000,
    };
    let monitor = Monitor::with_components(
        config,
        Box::new(RecordingRenderer::default()),
        Arc::new(TestSink::default()),
        Box::new(FixedCopies(1)),
    )
    .unwrap();
    let watch = monitor.watch_dir().to_path_buf();

    // Already archived by the time its event is handled
    let started = Instant::now();
    assert!(monitor.handle_event(created(watch.join("gone.jpg"))).is_empty());
    assert!(started.elapsed() < Duration::from_millis(500));

    // Offered by the startup scan and again by the watcher
    let twice = photo(&watch, "twice.jpg");
    assert_eq!(monitor.handle_event(created(twice.clone())), vec![Discovery::Queued { pending: 1 }]);
    assert_eq!(monitor.handle_event(created(twice)), vec![Discovery::Duplicate]);
    assert_eq!(monitor.collector().pending_len(), 1);

    assert!(monitor.shutdown());
}
