//! Project orchestration: job submission, the merge actor, and the dirty
//! controller.
//!
//! One merge actor thread owns every graph write; workers hand it parse
//! results over a channel, so merges serialize while queries proceed on
//! the shared side of the graph lock. Dirty notifications coalesce in a
//! window before fanning out over the reverse-dependency closure.

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use cnav_core::{
    CnavConfig, CnavError, CursorInfo, DependencyMode, FileId, FileRegistry, IndexType, JobState,
    Location, Metrics, NoopMetrics, ParseFailure, ProjectState, SourceInformation, UsrTable,
};
use cnav_graph::{ReferenceFlags, SymbolGraph};
use cnav_storage::Storage;

use crate::cache::UnitCache;
use crate::job::{JobContext, VisitBroker};
use crate::parser::TranslationUnitParser;
use crate::scheduler::{IndexEvent, JobQueue, PendingCounter, Scheduler};

/// A job failure surfaced on the diagnostics channel.
#[derive(Debug, Clone)]
pub struct JobDiagnostic {
    pub primary: FileId,
    pub source_file: PathBuf,
    pub failure: ParseFailure,
}

/// A project: the symbol graph, its registries, the worker pool, and the
/// threads that keep them consistent.
pub struct Project {
    root: PathBuf,
    config: Arc<CnavConfig>,
    files: Arc<FileRegistry>,
    usrs: Arc<UsrTable>,
    graph: Arc<RwLock<SymbolGraph>>,
    sources: Arc<Mutex<HashMap<FileId, SourceInformation>>>,
    state: Mutex<ProjectState>,
    pending: Arc<PendingCounter>,
    waiters: Arc<Mutex<HashMap<FileId, Vec<Sender<()>>>>>,
    broker: Arc<VisitBroker>,
    cache: Arc<Mutex<UnitCache>>,
    scheduler: Scheduler,
    events_tx: Option<Sender<IndexEvent>>,
    dirty_tx: Option<Sender<Vec<PathBuf>>>,
    diagnostics_rx: Receiver<JobDiagnostic>,
    merge_thread: Option<JoinHandle<()>>,
    dirty_thread: Option<JoinHandle<()>>,
}

impl Project {
    pub fn new(
        root: impl Into<PathBuf>,
        config: CnavConfig,
        parser: Arc<dyn TranslationUnitParser>,
    ) -> Self {
        Self::with_metrics(root, config, parser, Arc::new(NoopMetrics))
    }

    pub fn with_metrics(
        root: impl Into<PathBuf>,
        config: CnavConfig,
        parser: Arc<dyn TranslationUnitParser>,
        metrics: Arc<dyn Metrics>,
    ) -> Self {
        let root = root.into();
        let config = Arc::new(config);
        let files = Arc::new(FileRegistry::new());
        let usrs = Arc::new(UsrTable::new());
        let graph = Arc::new(RwLock::new(SymbolGraph::new()));
        let sources = Arc::new(Mutex::new(HashMap::new()));
        let pending = Arc::new(PendingCounter::new());
        let waiters: Arc<Mutex<HashMap<FileId, Vec<Sender<()>>>>> =
            Arc::new(Mutex::new(HashMap::new()));
        let broker = Arc::new(VisitBroker::new());
        let cache = Arc::new(Mutex::new(UnitCache::new(config.unit_cache_capacity)));

        let (events_tx, events_rx) = unbounded::<IndexEvent>();
        let (dirty_tx, dirty_rx) = unbounded::<Vec<PathBuf>>();
        let (diagnostics_tx, diagnostics_rx) = unbounded::<JobDiagnostic>();

        let ctx = JobContext {
            files: Arc::clone(&files),
            usrs: Arc::clone(&usrs),
            config: Arc::clone(&config),
            broker: Arc::clone(&broker),
            project_root: root.clone(),
            cache: Arc::clone(&cache),
            metrics: Arc::clone(&metrics),
        };
        let scheduler = Scheduler::new(
            parser,
            ctx,
            events_tx.clone(),
            Arc::clone(&pending),
            config.effective_parallelism(),
        );

        let merge_thread = {
            let graph = Arc::clone(&graph);
            let pending = Arc::clone(&pending);
            let waiters = Arc::clone(&waiters);
            let metrics = Arc::clone(&metrics);
            std::thread::Builder::new()
                .name("cnav-merge".to_string())
                .spawn(move || {
                    merge_loop(events_rx, graph, pending, waiters, diagnostics_tx, metrics)
                })
                .expect("failed to spawn merge thread")
        };

        let dirty_thread = {
            let window = Duration::from_millis(config.dirty_coalesce_window_ms);
            let files = Arc::clone(&files);
            let graph = Arc::clone(&graph);
            let sources = Arc::clone(&sources);
            let broker = Arc::clone(&broker);
            let pending = Arc::clone(&pending);
            let queue = scheduler.queue().clone();
            let events_tx = events_tx.clone();
            std::thread::Builder::new()
                .name("cnav-dirty".to_string())
                .spawn(move || {
                    dirty_loop(
                        dirty_rx, window, files, graph, sources, broker, queue, events_tx, pending,
                    )
                })
                .expect("failed to spawn dirty thread")
        };

        Self {
            root,
            config,
            files,
            usrs,
            graph,
            sources,
            state: Mutex::new(ProjectState::Inited),
            pending,
            waiters,
            broker,
            cache,
            scheduler,
            events_tx: Some(events_tx),
            dirty_tx: Some(dirty_tx),
            diagnostics_rx,
            merge_thread: Some(merge_thread),
            dirty_thread: Some(dirty_thread),
        }
    }

    // ── Lifecycle ───────────────────────────────────────────────────────

    pub fn state(&self) -> ProjectState {
        *self.state.lock().expect("project state poisoned")
    }

    fn set_state(&self, state: ProjectState) {
        *self.state.lock().expect("project state poisoned") = state;
    }

    /// Transition to `Loaded` with an empty graph.
    pub fn load(&self) -> Result<(), CnavError> {
        self.begin_loading()?;
        self.set_state(ProjectState::Loaded);
        Ok(())
    }

    /// Restore the graph from storage, then transition to `Loaded`.
    /// Sources whose content changed while the index was down are
    /// resubmitted as `Reindex` jobs; their count is returned.
    ///
    /// A restore that trips an invariant check discards the stored graph:
    /// the project comes up `Loaded` but empty, and the caller re-indexes
    /// from scratch.
    pub fn load_from(&self, storage: &Storage) -> Result<usize, CnavError> {
        self.begin_loading()?;
        let restored = match storage.load_graph(&self.files, &self.usrs) {
            Ok(restored) => restored,
            Err(e) => {
                self.set_state(ProjectState::Loaded);
                return Err(e);
            }
        };
        if let Err(e) = restored.graph.validate(&self.files, &self.usrs) {
            tracing::error!(error = %e, "restored graph failed validation, discarding");
            self.set_state(ProjectState::Loaded);
            return Err(e);
        }

        *self.graph.write().expect("graph lock poisoned") = restored.graph;
        let stale_sources: Vec<SourceInformation> = {
            let mut sources = self.sources.lock().expect("sources poisoned");
            *sources = restored.sources;
            restored
                .stale
                .iter()
                .filter_map(|file| sources.get(file).cloned())
                .collect()
        };
        self.set_state(ProjectState::Loaded);

        let stale = stale_sources.len();
        for source in stale_sources {
            self.index(source, IndexType::Reindex)?;
        }
        Ok(stale)
    }

    fn begin_loading(&self) -> Result<(), CnavError> {
        let mut state = self.state.lock().expect("project state poisoned");
        match *state {
            ProjectState::Inited | ProjectState::Unloaded => {
                *state = ProjectState::Loading;
                Ok(())
            }
            other => Err(CnavError::InvalidState(format!(
                "cannot load from {other}"
            ))),
        }
    }

    /// Cancel outstanding work, drain the merger, and drop the graph.
    pub fn unload(&self) {
        self.scheduler.queue().cancel_all();
        self.pending.wait_idle();
        *self.graph.write().expect("graph lock poisoned") = SymbolGraph::new();
        self.sources.lock().expect("sources poisoned").clear();
        self.broker.clear();
        self.set_state(ProjectState::Unloaded);
    }

    // ── Submission API ──────────────────────────────────────────────────

    fn ensure_accepting(&self) -> Result<(), CnavError> {
        match self.state() {
            ProjectState::Loaded | ProjectState::Syncing => Ok(()),
            other => Err(CnavError::InvalidState(format!(
                "indexing not accepted in state {other}"
            ))),
        }
    }

    /// Submit a translation unit for indexing.
    pub fn index(&self, source: SourceInformation, index_type: IndexType) -> Result<(), CnavError> {
        self.ensure_accepting()?;
        let primary = self.files.intern(&source.source_file);
        self.sources
            .lock()
            .expect("sources poisoned")
            .insert(primary, source.clone());
        self.scheduler.queue().submit(primary, source, index_type);
        Ok(())
    }

    /// Cancel any job for the path and erase all facts whose primary is
    /// its file. Unknown paths are a no-op.
    pub fn remove(&self, path: &Path) -> Result<(), CnavError> {
        self.ensure_accepting()?;
        let Some(primary) = self.files.lookup(path) else {
            return Ok(());
        };
        self.scheduler.queue().cancel(primary);
        self.sources
            .lock()
            .expect("sources poisoned")
            .remove(&primary);
        self.broker.release_owner(primary);
        self.cache.lock().expect("unit cache poisoned").remove(path);

        if let Some(events_tx) = &self.events_tx {
            self.pending.add();
            if events_tx.send(IndexEvent::Removed { primary }).is_err() {
                self.pending.finish();
            }
        }
        Ok(())
    }

    /// Report changed files. Notifications are batched within the
    /// configured coalescing window, then every translation unit in the
    /// transitive reverse-dependency closure is rescheduled.
    pub fn dirty(&self, paths: &[PathBuf]) -> Result<(), CnavError> {
        self.ensure_accepting()?;
        if paths.is_empty() {
            return Ok(());
        }
        if let Some(dirty_tx) = &self.dirty_tx {
            dirty_tx
                .send(paths.to_vec())
                .map_err(|_| CnavError::InvalidState("dirty controller stopped".to_string()))?;
        }
        Ok(())
    }

    /// True while any job is Queued, Parsing, or Merging.
    pub fn is_indexing(&self) -> bool {
        !self.pending.is_idle()
    }

    /// Block until all previously-submitted work is observable by queries.
    pub fn wait_until_idle(&self) {
        self.pending.wait_idle();
    }

    /// Block until the next merge of the given primary completes, or the
    /// timeout elapses. Returns false on timeout or for paths that never
    /// merge. Must not be called while holding the graph lock.
    pub fn wait_for_unit(&self, path: &Path, timeout: Duration) -> bool {
        let Some(primary) = self.files.lookup(path) else {
            return false;
        };
        let (notify_tx, notify_rx) = crossbeam_channel::bounded(1);
        self.waiters
            .lock()
            .expect("merge waiters poisoned")
            .entry(primary)
            .or_default()
            .push(notify_tx);
        notify_rx.recv_timeout(timeout).is_ok()
    }

    /// Failures recorded on jobs, in completion order.
    pub fn diagnostics(&self) -> &Receiver<JobDiagnostic> {
        &self.diagnostics_rx
    }

    // ── Query API ───────────────────────────────────────────────────────
    //
    // All of these take the shared side of the graph lock; they read a
    // consistent snapshot and never block on indexing. Callers must not
    // re-enter `index` from inside a query.

    fn read_graph(&self) -> std::sync::RwLockReadGuard<'_, SymbolGraph> {
        self.graph.read().expect("graph lock poisoned")
    }

    /// Location of a byte range inside a known file, if the file is known.
    pub fn location(&self, path: &Path, start: u32, end: u32) -> Option<Location> {
        self.files
            .lookup(path)
            .map(|file| Location::new(file, start, end))
    }

    pub fn cursor(&self, location: Location) -> Option<CursorInfo> {
        self.read_graph().cursor(location)
    }

    pub fn references(
        &self,
        location: Location,
        flags: ReferenceFlags,
        path_filter: &[PathBuf],
    ) -> Vec<Location> {
        self.read_graph()
            .references(location, flags, path_filter, &self.files)
    }

    pub fn find_cursors(&self, name: &str, path_filter: &[PathBuf]) -> Vec<(Location, CursorInfo)> {
        self.read_graph().find_cursors(name, path_filter, &self.files)
    }

    pub fn list_symbols(&self, prefix: &str, path_filter: &[PathBuf]) -> Vec<String> {
        self.read_graph().list_symbols(prefix, path_filter, &self.files)
    }

    /// All cursors in one file, in location order.
    pub fn cursors(&self, path: &Path) -> Vec<(Location, CursorInfo)> {
        match self.files.lookup(path) {
            Some(file) => self.read_graph().cursors_in(file),
            None => Vec::new(),
        }
    }

    /// Transitive dependency closure of a path, resolved back to paths.
    pub fn dependencies(&self, path: &Path, mode: DependencyMode) -> HashSet<PathBuf> {
        let Some(file) = self.files.lookup(path) else {
            return HashSet::new();
        };
        self.read_graph()
            .dependencies(file, mode)
            .into_iter()
            .filter_map(|f| self.files.resolve(f))
            .collect()
    }

    pub fn fixits(&self, path: &Path) -> String {
        match self.files.lookup(path) {
            Some(file) => self.read_graph().fixits(file),
            None => String::new(),
        }
    }

    // ── Persistence ─────────────────────────────────────────────────────

    /// Flush the graph to storage. Reads stay permitted while `Syncing`;
    /// merges queue behind the read lock held for the flush. A failed
    /// save leaves the in-memory graph untouched.
    pub fn save(&self, storage: &Storage) -> Result<(), CnavError> {
        self.ensure_accepting()?;
        self.set_state(ProjectState::Syncing);
        let result = {
            let graph = self.read_graph();
            let sources = self.sources.lock().expect("sources poisoned").clone();
            storage.save_graph(&graph, &self.files, &self.usrs, &sources)
        };
        self.set_state(ProjectState::Loaded);
        result
    }

    // ── Accessors ───────────────────────────────────────────────────────

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config(&self) -> &CnavConfig {
        &self.config
    }

    pub fn files(&self) -> &Arc<FileRegistry> {
        &self.files
    }

    pub fn usrs(&self) -> &Arc<UsrTable> {
        &self.usrs
    }

    pub fn graph(&self) -> &Arc<RwLock<SymbolGraph>> {
        &self.graph
    }
}

impl Drop for Project {
    fn drop(&mut self) {
        // Stop the dirty controller first: it holds clones of the job
        // queue and event channel.
        self.dirty_tx = None;
        if let Some(thread) = self.dirty_thread.take() {
            let _ = thread.join();
        }
        // Join the workers, dropping their event senders.
        self.scheduler.shutdown();
        // With the last sender gone the merge actor drains and exits.
        self.events_tx = None;
        if let Some(thread) = self.merge_thread.take() {
            let _ = thread.join();
        }
    }
}

// ── Merge actor ─────────────────────────────────────────────────────────────

fn merge_loop(
    events_rx: Receiver<IndexEvent>,
    graph: Arc<RwLock<SymbolGraph>>,
    pending: Arc<PendingCounter>,
    waiters: Arc<Mutex<HashMap<FileId, Vec<Sender<()>>>>>,
    diagnostics_tx: Sender<JobDiagnostic>,
    metrics: Arc<dyn Metrics>,
) {
    for event in events_rx.iter() {
        match event {
            IndexEvent::Parsed { job, result } => {
                let started = Instant::now();
                {
                    let mut graph = graph.write().expect("graph lock poisoned");
                    graph.merge(result);
                }
                job.set_state(JobState::Done);
                metrics.record_latency("merge", started.elapsed().as_secs_f64() * 1000.0);
                metrics.increment_counter("merges", 1);
                if let Some(pending_waiters) = waiters
                    .lock()
                    .expect("merge waiters poisoned")
                    .remove(&job.primary)
                {
                    for waiter in pending_waiters {
                        let _ = waiter.send(());
                    }
                }
                tracing::debug!(
                    source = %job.source.source_file.display(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "merge finished"
                );
                pending.finish();
            }
            IndexEvent::Failed { job, failure } => {
                let _ = diagnostics_tx.send(JobDiagnostic {
                    primary: job.primary,
                    source_file: job.source.source_file.clone(),
                    failure,
                });
                pending.finish();
            }
            IndexEvent::Removed { primary } => {
                graph
                    .write()
                    .expect("graph lock poisoned")
                    .remove_unit(primary);
                metrics.increment_counter("units_removed", 1);
                pending.finish();
            }
            IndexEvent::Scrub { files } => {
                graph
                    .write()
                    .expect("graph lock poisoned")
                    .scrub_files(&files);
                pending.finish();
            }
        }
    }
}

// ── Dirty controller ────────────────────────────────────────────────────────

#[allow(clippy::too_many_arguments)]
fn dirty_loop(
    dirty_rx: Receiver<Vec<PathBuf>>,
    window: Duration,
    files: Arc<FileRegistry>,
    graph: Arc<RwLock<SymbolGraph>>,
    sources: Arc<Mutex<HashMap<FileId, SourceInformation>>>,
    broker: Arc<VisitBroker>,
    queue: JobQueue,
    events_tx: Sender<IndexEvent>,
    pending: Arc<PendingCounter>,
) {
    while let Ok(first) = dirty_rx.recv() {
        let mut batch: HashSet<PathBuf> = first.into_iter().collect();
        let mut disconnected = false;
        loop {
            match dirty_rx.recv_timeout(window) {
                Ok(more) => batch.extend(more),
                Err(RecvTimeoutError::Timeout) => break,
                Err(RecvTimeoutError::Disconnected) => {
                    disconnected = true;
                    break;
                }
            }
        }
        flush_dirty(
            batch, &files, &graph, &sources, &broker, &queue, &events_tx, &pending,
        );
        if disconnected {
            return;
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn flush_dirty(
    batch: HashSet<PathBuf>,
    files: &FileRegistry,
    graph: &RwLock<SymbolGraph>,
    sources: &Mutex<HashMap<FileId, SourceInformation>>,
    broker: &VisitBroker,
    queue: &JobQueue,
    events_tx: &Sender<IndexEvent>,
    pending: &PendingCounter,
) {
    if batch.is_empty() {
        return;
    }
    let dirty: HashSet<FileId> = batch.iter().map(|path| files.intern(path)).collect();
    for &file in &dirty {
        broker.release_file(file);
    }
    let closure = {
        let graph = graph.read().expect("graph lock poisoned");
        graph.dirty_closure(&dirty)
    };

    // Facts in the changed files go away before any re-merge arrives;
    // channel order guarantees the scrub is processed first.
    pending.add();
    if events_tx.send(IndexEvent::Scrub { files: dirty.clone() }).is_err() {
        pending.finish();
        return;
    }

    let sources = sources.lock().expect("sources poisoned");
    let mut scheduled = 0usize;
    for file in closure {
        if let Some(source) = sources.get(&file) {
            queue.submit(file, source.clone(), IndexType::Dirty);
            scheduled += 1;
        }
    }
    tracing::info!(dirty = dirty.len(), scheduled, "dirty batch flushed");
}
