use anyhow::{Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use std::fs;
use std::io::{self, Write};
use std::sync::Arc;
use std::time::Instant;
use tempfile::NamedTempFile;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use super::scanner;
use super::transform::{TransformEngine, TransformOutcome};
use crate::metrics::Metrics;
use crate::models::{Direction, FileNameSet, Outcome, OutcomeRecord, RuleTable, SkipReason};

/// Default capacity of the worker → session channel
pub const DEFAULT_CHANNEL_CAPACITY: usize = 16;

/// Per-file I/O failures. Recorded as `Error` outcomes, never fatal to a run.
#[derive(Error, Debug)]
pub enum FileError {
    #[error("failed to read file: {0}")]
    Read(#[source] io::Error),

    #[error("failed to write file: {0}")]
    Write(#[source] io::Error),
}

/// Storage used by the worker for every file read and write
#[cfg_attr(test, mockall::automock)]
pub trait FileStore: Send + Sync {
    fn read(&self, path: &Utf8Path) -> io::Result<Vec<u8>>;

    /// Replace the whole content of an existing file.
    fn replace(&self, path: &Utf8Path, content: &[u8]) -> io::Result<()>;
}

/// The local filesystem
#[derive(Debug, Clone, Copy, Default)]
pub struct DiskStore;

impl FileStore for DiskStore {
    fn read(&self, path: &Utf8Path) -> io::Result<Vec<u8>> {
        fs::read(path)
    }

    fn replace(&self, path: &Utf8Path, content: &[u8]) -> io::Result<()> {
        replace_contents(path, content)
    }
}

/// Messages sent from the worker to the session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineEvent {
    /// One matched file was processed
    Record(OutcomeRecord),

    /// The walk itself failed; no further records follow
    WalkFailed(String),
}

/// What to process in one run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunRequest {
    pub root: Utf8PathBuf,
    pub targets: FileNameSet,
    pub direction: Direction,
}

/// Returned by the worker when it exits
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerReport {
    pub sent: usize,
    pub cancelled: bool,
    pub walk_failed: bool,
    pub consumer_gone: bool,
}

/// Session-side handle to a running worker.
///
/// The channel closing (`recv` returning `None`) is the completion signal.
pub struct PipelineRunHandle {
    events: mpsc::Receiver<PipelineEvent>,
    cancel_tx: watch::Sender<bool>,
    worker: JoinHandle<WorkerReport>,
}

impl PipelineRunHandle {
    /// Wait for the next message; `None` once the worker has finished.
    pub async fn recv(&mut self) -> Option<PipelineEvent> {
        self.events.recv().await
    }

    /// Ask the worker to stop before its next file.
    pub fn cancel(&self) {
        self.cancel_tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.cancel_tx.borrow()
    }

    /// Stop listening and wait for the worker to exit.
    pub async fn join(self) -> Result<WorkerReport> {
        let Self { events, worker, .. } = self;
        drop(events);
        worker.await.context("Pipeline worker panicked")
    }

    /// Receive every message until the channel closes, then join the worker.
    pub async fn drain(mut self) -> Result<(Vec<PipelineEvent>, WorkerReport)> {
        let mut events = Vec::new();
        while let Some(event) = self.recv().await {
            events.push(event);
        }
        let report = self.join().await?;
        Ok((events, report))
    }
}

/// Runs scan + transform for a set of target files on a background worker.
///
/// One blocking worker per run performs the walk and every file read and write.
/// Records cross a bounded channel, so a slow consumer applies backpressure to
/// the worker instead of growing a buffer. Files are processed one at a time.
#[derive(Clone)]
pub struct ProcessingPipeline {
    engine: TransformEngine,
    store: Arc<dyn FileStore>,
    capacity: usize,
    metrics: Arc<Metrics>,
}

impl ProcessingPipeline {
    pub fn new(rules: Arc<RuleTable>, metrics: Arc<Metrics>) -> Self {
        Self {
            engine: TransformEngine::new(rules),
            store: Arc::new(DiskStore),
            capacity: DEFAULT_CHANNEL_CAPACITY,
            metrics,
        }
    }

    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity.max(1);
        self
    }

    pub fn with_store(mut self, store: Arc<dyn FileStore>) -> Self {
        self.store = store;
        self
    }

    pub fn rules(&self) -> &RuleTable {
        self.engine.rules()
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    /// Spawn the worker for `request`. Must be called from within a tokio runtime.
    pub fn start(&self, request: RunRequest) -> PipelineRunHandle {
        let (tx, events) = mpsc::channel(self.capacity);
        let (cancel_tx, cancel_rx) = watch::channel(false);

        let engine = self.engine.clone();
        let store = Arc::clone(&self.store);
        let metrics = Arc::clone(&self.metrics);
        metrics.record_run_started();

        tracing::info!(
            "Starting {} run under {} for {} target file(s)",
            request.direction,
            request.root,
            request.targets.len()
        );

        let worker = tokio::task::spawn_blocking(move || {
            run_worker(&engine, store.as_ref(), &request, &tx, &cancel_rx, &metrics)
        });

        PipelineRunHandle {
            events,
            cancel_tx,
            worker,
        }
    }
}

fn run_worker(
    engine: &TransformEngine,
    store: &dyn FileStore,
    request: &RunRequest,
    tx: &mpsc::Sender<PipelineEvent>,
    cancel_rx: &watch::Receiver<bool>,
    metrics: &Metrics,
) -> WorkerReport {
    let mut report = WorkerReport::default();

    let files = match scanner::matching_files(&request.root, Some(&request.targets)) {
        Ok(files) => files,
        Err(e) => {
            tracing::error!("Cannot walk {}: {}", request.root, e);
            report.walk_failed = true;
            let _ = tx.blocking_send(PipelineEvent::WalkFailed(e.to_string()));
            return report;
        }
    };

    for entry in files {
        if *cancel_rx.borrow() {
            tracing::warn!("Run cancelled after {} file(s)", report.sent);
            metrics.record_run_cancelled();
            report.cancelled = true;
            break;
        }

        let path = match entry {
            Ok(path) => path,
            Err(e) => {
                tracing::error!("Directory walk aborted: {}", e);
                report.walk_failed = true;
                let _ = tx.blocking_send(PipelineEvent::WalkFailed(e.to_string()));
                break;
            }
        };

        let started = Instant::now();
        let record = process_file_with(engine, store, &path, request.direction);
        metrics.record_io_time(started.elapsed());

        match record.outcome() {
            Outcome::Updated => metrics.record_file_updated(),
            Outcome::Skipped(_) => metrics.record_file_skipped(),
            Outcome::Error => metrics.record_file_failed(),
        }

        if tx.blocking_send(PipelineEvent::Record(record)).is_err() {
            tracing::warn!("Session stopped listening; abandoning run at {}", path);
            metrics.record_dropped();
            report.consumer_gone = true;
            break;
        }
        report.sent += 1;
    }

    tracing::info!(
        "Worker finished: {} record(s) sent, cancelled={}, walk_failed={}",
        report.sent,
        report.cancelled,
        report.walk_failed
    );

    report
}

/// Read, transform and conditionally rewrite one file.
///
/// I/O failures become an `Error` record; the file is left as it was.
pub fn process_file(engine: &TransformEngine, path: &Utf8Path, direction: Direction) -> OutcomeRecord {
    process_file_with(engine, &DiskStore, path, direction)
}

/// Same as [`process_file`], going through `store` for the I/O.
pub fn process_file_with(
    engine: &TransformEngine,
    store: &dyn FileStore,
    path: &Utf8Path,
    direction: Direction,
) -> OutcomeRecord {
    match transform_file(engine, store, path, direction) {
        Ok(record) => {
            tracing::debug!("{}", record);
            record
        }
        Err(e) => {
            tracing::error!("{}: {}", path, e);
            OutcomeRecord::failed(path, e.to_string())
        }
    }
}

fn transform_file(
    engine: &TransformEngine,
    store: &dyn FileStore,
    path: &Utf8Path,
    direction: Direction,
) -> Result<OutcomeRecord, FileError> {
    let content = store.read(path).map_err(FileError::Read)?;
    let filename = path.file_name().unwrap_or_default();
    let transformed = engine.apply(filename, &content, direction);

    if let Some(new_content) = transformed.new_content.as_deref() {
        store.replace(path, new_content).map_err(FileError::Write)?;
    }

    let record = match &transformed.outcome {
        TransformOutcome::Updated { from, to, .. } => OutcomeRecord::updated(path, from, to),
        TransformOutcome::Skipped {
            reason: SkipReason::AlreadyCorrect,
            to,
            ..
        } => OutcomeRecord::already_correct(path, to),
        TransformOutcome::Skipped {
            reason: SkipReason::NoMatchingTag,
            from,
            to,
        } => OutcomeRecord::no_matching_tag(path, from, to),
    };

    Ok(record)
}

/// Write `content` to a sibling temp file and rename it over `path`.
///
/// The original's permissions are carried over. A failure at any step leaves
/// the original untouched.
fn replace_contents(path: &Utf8Path, content: &[u8]) -> io::Result<()> {
    let dir = path
        .parent()
        .filter(|parent| !parent.as_str().is_empty())
        .unwrap_or(Utf8Path::new("."));
    let permissions = fs::metadata(path)?.permissions();

    let mut temp = NamedTempFile::new_in(dir)?;
    temp.write_all(content)?;
    temp.as_file().sync_all()?;
    fs::set_permissions(temp.path(), permissions)?;
    temp.persist(path).map_err(|e| e.error)?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tempfile::TempDir;

    fn engine() -> TransformEngine {
        TransformEngine::new(Arc::new(RuleTable::default()))
    }

    fn temp_root() -> (TempDir, Utf8PathBuf) {
        let temp_dir = TempDir::new().unwrap();
        let root = Utf8PathBuf::try_from(temp_dir.path().to_path_buf()).unwrap();
        (temp_dir, root)
    }

    #[test]
    fn test_process_file_updates_on_disk() {
        let (_temp_dir, root) = temp_root();
        let path = root.join("Music.xml");
        fs::write(&path, "<firstLock>true</firstLock>").unwrap();

        let record = process_file(&engine(), &path, Direction::Unlock);

        assert_eq!(record.outcome(), Outcome::Updated);
        assert_eq!(fs::read_to_string(&path).unwrap(), "<firstLock>false</firstLock>");
    }

    #[test]
    fn test_process_file_no_tag_leaves_file_alone() {
        let (_temp_dir, root) = temp_root();
        let path = root.join("Music.xml");
        fs::write(&path, "<MusicData/>").unwrap();

        let record = process_file(&engine(), &path, Direction::Unlock);

        assert_eq!(record.outcome(), Outcome::Skipped(SkipReason::NoMatchingTag));
        assert_eq!(fs::read_to_string(&path).unwrap(), "<MusicData/>");
    }

    #[cfg(unix)]
    #[test]
    fn test_process_file_read_failure() {
        let (_temp_dir, root) = temp_root();
        let path = root.join("Music.xml");
        std::os::unix::fs::symlink(root.join("gone.xml"), &path).unwrap();

        let record = process_file(&engine(), &path, Direction::Unlock);

        assert!(record.is_error());
        assert!(record.detail().starts_with("failed to read file"));
        assert!(fs::symlink_metadata(&path).unwrap().file_type().is_symlink());
    }

    #[test]
    fn test_process_file_latin1_content() {
        let (_temp_dir, root) = temp_root();
        let path = root.join("Music.xml");
        fs::write(&path, b"<name>Caf\xe9</name><firstLock>true</firstLock>").unwrap();

        let record = process_file(&engine(), &path, Direction::Unlock);

        assert_eq!(record.outcome(), Outcome::Updated);
        assert_eq!(
            fs::read(&path).unwrap(),
            b"<name>Caf\xe9</name><firstLock>false</firstLock>".to_vec()
        );
    }

    #[test]
    fn test_process_file_write_failure() {
        let (_temp_dir, root) = temp_root();
        let path = root.join("Music.xml");
        fs::write(&path, "<firstLock>true</firstLock>").unwrap();

        let mut store = MockFileStore::new();
        store.expect_read().returning(|path| fs::read(path));
        store
            .expect_replace()
            .times(1)
            .returning(|_, _| Err(io::Error::other("disk full")));

        let record = process_file_with(&engine(), &store, &path, Direction::Unlock);

        assert!(record.is_error());
        assert_eq!(record.detail(), "failed to write file: disk full");
        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            "<firstLock>true</firstLock>"
        );
    }

    #[test]
    fn test_process_missing_file() {
        let (_temp_dir, root) = temp_root();
        let record = process_file(&engine(), &root.join("Music.xml"), Direction::Lock);
        assert!(record.is_error());
    }

    #[cfg(unix)]
    #[test]
    fn test_replace_preserves_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let (_temp_dir, root) = temp_root();
        let path = root.join("Event.xml");
        fs::write(&path, "<alwaysOpen>false</alwaysOpen>").unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o640)).unwrap();

        let record = process_file(&engine(), &path, Direction::Unlock);

        assert_eq!(record.outcome(), Outcome::Updated);
        let mode = fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o640);
    }

    #[tokio::test]
    async fn test_missing_root_reports_walk_failure() {
        let (_temp_dir, root) = temp_root();
        let pipeline =
            ProcessingPipeline::new(Arc::new(RuleTable::default()), Arc::new(Metrics::new()));

        let handle = pipeline.start(RunRequest {
            root: root.join("missing"),
            targets: RuleTable::default().target_files().clone(),
            direction: Direction::Unlock,
        });
        let (events, report) = handle.drain().await.unwrap();

        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], PipelineEvent::WalkFailed(_)));
        assert!(report.walk_failed);
    }

    #[tokio::test]
    async fn test_write_failure_does_not_stop_walk() {
        let (_temp_dir, root) = temp_root();
        for dir in ["a", "b", "c"] {
            fs::create_dir_all(root.join(dir)).unwrap();
            fs::write(root.join(dir).join("Music.xml"), "<firstLock>true</firstLock>").unwrap();
        }

        let mut store = MockFileStore::new();
        store.expect_read().returning(|path| fs::read(path));
        store.expect_replace().returning(|path, content| {
            if path.parent().and_then(Utf8Path::file_name) == Some("b") {
                Err(io::Error::other("disk full"))
            } else {
                DiskStore.replace(path, content)
            }
        });

        let metrics = Arc::new(Metrics::new());
        let pipeline = ProcessingPipeline::new(Arc::new(RuleTable::default()), Arc::clone(&metrics))
            .with_store(Arc::new(store));
        let (events, report) = pipeline
            .start(RunRequest {
                root: root.clone(),
                targets: RuleTable::default().target_files().clone(),
                direction: Direction::Unlock,
            })
            .drain()
            .await
            .unwrap();

        assert_eq!(events.len(), 3);
        assert!(!report.walk_failed);
        let failed: Vec<_> = events
            .iter()
            .filter_map(|event| match event {
                PipelineEvent::Record(record) if record.is_error() => Some(record),
                _ => None,
            })
            .collect();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].path(), root.join("b/Music.xml"));
        assert!(failed[0].detail().starts_with("failed to write file"));
        assert_eq!(metrics.files_failed.load(Ordering::Relaxed), 1);
        assert_eq!(metrics.files_updated.load(Ordering::Relaxed), 2);
    }

    /// Reads from disk, but on the first read removes every other subtree of
    /// the root, optionally leaving a plain file in its place.
    struct SiblingRemover {
        done: AtomicBool,
        leave_file: bool,
    }

    impl FileStore for SiblingRemover {
        fn read(&self, path: &Utf8Path) -> io::Result<Vec<u8>> {
            if !self.done.swap(true, Ordering::SeqCst) {
                let dir = path.parent().unwrap();
                for entry in fs::read_dir(dir.parent().unwrap())? {
                    let sibling = entry?.path();
                    if sibling != dir.as_std_path() {
                        fs::remove_dir_all(&sibling)?;
                        if self.leave_file {
                            fs::write(&sibling, "not a directory")?;
                        }
                    }
                }
            }
            fs::read(path)
        }

        fn replace(&self, path: &Utf8Path, content: &[u8]) -> io::Result<()> {
            replace_contents(path, content)
        }
    }

    async fn run_with_remover(leave_file: bool) -> (Vec<PipelineEvent>, WorkerReport) {
        let (_temp_dir, root) = temp_root();
        for dir in ["first", "second"] {
            fs::create_dir_all(root.join(dir)).unwrap();
            fs::write(root.join(dir).join("Music.xml"), "<firstLock>true</firstLock>").unwrap();
        }

        let store = SiblingRemover {
            done: AtomicBool::new(false),
            leave_file,
        };
        let pipeline = ProcessingPipeline::new(Arc::new(RuleTable::default()), Arc::new(Metrics::new()))
            .with_store(Arc::new(store));
        pipeline
            .start(RunRequest {
                root,
                targets: RuleTable::default().target_files().clone(),
                direction: Direction::Unlock,
            })
            .drain()
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_subtree_removed_mid_walk_is_skipped() {
        let (events, report) = run_with_remover(false).await;

        assert!(!report.walk_failed);
        assert_eq!(events.len(), 1);
        assert!(matches!(&events[0], PipelineEvent::Record(r) if r.outcome() == Outcome::Updated));
    }

    #[tokio::test]
    async fn test_unreadable_subtree_aborts_walk() {
        let (events, report) = run_with_remover(true).await;

        assert!(report.walk_failed);
        assert_eq!(report.sent, 1);
        assert_eq!(events.len(), 2);
        assert!(matches!(events[1], PipelineEvent::WalkFailed(_)));
    }

    #[test]
    fn test_capacity_clamped() {
        let pipeline = ProcessingPipeline::new(Arc::new(RuleTable::default()), Arc::new(Metrics::new()))
            .with_capacity(0);
        assert_eq!(pipeline.capacity, 1);
    }
}
