//! Bounded worker pool for parse jobs.
//!
//! Workers pull job handles off a FIFO channel, run the parse, and hand
//! finished results to the merge actor over the event channel. Submitting
//! never blocks the caller; parallelism is bounded by the worker count.

use crossbeam_channel::{unbounded, Receiver, Sender};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::Instant;

use cnav_core::{FileId, IndexResult, IndexType, JobState, ParseFailure, SourceInformation};

use crate::job::{JobContext, ParseJob};
use crate::parser::TranslationUnitParser;

// ── Job handles ─────────────────────────────────────────────────────────────

/// One submitted parse job. `Queued → Parsing → Merging → Done`;
/// `Cancelled` is reachable from `Queued` and `Parsing` only.
pub struct JobHandle {
    pub primary: FileId,
    pub source: SourceInformation,
    pub index_type: IndexType,
    state: Mutex<JobState>,
    cancelled: AtomicBool,
    failure: Mutex<Option<ParseFailure>>,
}

impl JobHandle {
    fn new(primary: FileId, source: SourceInformation, index_type: IndexType) -> Arc<Self> {
        Arc::new(Self {
            primary,
            source,
            index_type,
            state: Mutex::new(JobState::Queued),
            cancelled: AtomicBool::new(false),
            failure: Mutex::new(None),
        })
    }

    pub fn state(&self) -> JobState {
        *self.state.lock().expect("job state poisoned")
    }

    pub(crate) fn set_state(&self, state: JobState) {
        *self.state.lock().expect("job state poisoned") = state;
    }

    /// Request cancellation. Returns false once the job reached `Merging`;
    /// merges are atomic and cannot be interrupted.
    pub fn cancel(&self) -> bool {
        let state = self.state.lock().expect("job state poisoned");
        match *state {
            JobState::Queued | JobState::Parsing => {
                self.cancelled.store(true, Ordering::Relaxed);
                true
            }
            _ => false,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }

    pub(crate) fn cancelled_flag(&self) -> &AtomicBool {
        &self.cancelled
    }

    /// The failure recorded on this job, if its parse failed.
    pub fn failure(&self) -> Option<ParseFailure> {
        *self.failure.lock().expect("job failure poisoned")
    }

    fn record_failure(&self, failure: ParseFailure) {
        *self.failure.lock().expect("job failure poisoned") = Some(failure);
    }
}

// ── Pending work accounting ─────────────────────────────────────────────────

/// Counts outstanding work items (jobs and merge-actor events). The
/// project is indexing while the count is non-zero.
pub struct PendingCounter {
    count: Mutex<usize>,
    idle: Condvar,
}

impl PendingCounter {
    pub fn new() -> Self {
        Self {
            count: Mutex::new(0),
            idle: Condvar::new(),
        }
    }

    pub fn add(&self) {
        *self.count.lock().expect("pending counter poisoned") += 1;
    }

    pub fn finish(&self) {
        let mut count = self.count.lock().expect("pending counter poisoned");
        *count = count.saturating_sub(1);
        if *count == 0 {
            self.idle.notify_all();
        }
    }

    pub fn count(&self) -> usize {
        *self.count.lock().expect("pending counter poisoned")
    }

    pub fn is_idle(&self) -> bool {
        self.count() == 0
    }

    /// Block until every outstanding item drains. Queries issued after
    /// this returns observe all previously-submitted jobs.
    pub fn wait_idle(&self) {
        let mut count = self.count.lock().expect("pending counter poisoned");
        while *count > 0 {
            count = self.idle.wait(count).expect("pending counter poisoned");
        }
    }
}

impl Default for PendingCounter {
    fn default() -> Self {
        Self::new()
    }
}

// ── Events to the merge actor ───────────────────────────────────────────────

/// Work handed to the single merge actor. The consumer must call
/// `PendingCounter::finish` exactly once per event.
pub enum IndexEvent {
    /// A parse completed; merge its result.
    Parsed {
        job: Arc<JobHandle>,
        result: IndexResult,
    },
    /// A parse failed; prior facts for the primary are retained.
    Failed {
        job: Arc<JobHandle>,
        failure: ParseFailure,
    },
    /// Erase all facts whose primary is this file.
    Removed { primary: FileId },
    /// Drop facts located in these files ahead of their re-merge.
    Scrub { files: HashSet<FileId> },
}

// ── Job queue ───────────────────────────────────────────────────────────────

/// Submission half of the scheduler, cheap to clone across threads.
#[derive(Clone)]
pub struct JobQueue {
    queue_tx: Sender<Arc<JobHandle>>,
    active: Arc<Mutex<HashMap<FileId, Arc<JobHandle>>>>,
    pending: Arc<PendingCounter>,
}

impl JobQueue {
    /// Enqueue a job. Never blocks; if a job for the same primary is
    /// already Queued or Parsing it is cancelled and superseded.
    pub fn submit(
        &self,
        primary: FileId,
        source: SourceInformation,
        index_type: IndexType,
    ) -> Arc<JobHandle> {
        let job = JobHandle::new(primary, source, index_type);
        {
            let mut active = self.active.lock().expect("active jobs poisoned");
            if let Some(prior) = active.insert(primary, Arc::clone(&job)) {
                if prior.cancel() {
                    tracing::debug!(primary = %primary, "superseded queued job");
                }
            }
        }
        self.pending.add();
        if self.queue_tx.send(Arc::clone(&job)).is_err() {
            self.pending.finish();
        }
        job
    }

    /// Cancel the active job for a primary, if it has not started merging.
    pub fn cancel(&self, primary: FileId) -> bool {
        let active = self.active.lock().expect("active jobs poisoned");
        active.get(&primary).map(|job| job.cancel()).unwrap_or(false)
    }

    /// Cancel everything still Queued or Parsing.
    pub fn cancel_all(&self) {
        let active = self.active.lock().expect("active jobs poisoned");
        for job in active.values() {
            job.cancel();
        }
    }
}

// ── The pool ────────────────────────────────────────────────────────────────

pub struct Scheduler {
    queue: Option<JobQueue>,
    workers: Vec<JoinHandle<()>>,
}

impl Scheduler {
    pub fn new(
        parser: Arc<dyn TranslationUnitParser>,
        ctx: JobContext,
        events_tx: Sender<IndexEvent>,
        pending: Arc<PendingCounter>,
        parallelism: usize,
    ) -> Self {
        let (queue_tx, queue_rx) = unbounded::<Arc<JobHandle>>();
        let active = Arc::new(Mutex::new(HashMap::new()));
        let queue = JobQueue {
            queue_tx,
            active: Arc::clone(&active),
            pending: Arc::clone(&pending),
        };

        let workers = (0..parallelism.max(1))
            .map(|i| {
                let queue_rx = queue_rx.clone();
                let parser = Arc::clone(&parser);
                let ctx = ctx.clone();
                let events_tx = events_tx.clone();
                let pending = Arc::clone(&pending);
                let active = Arc::clone(&active);
                std::thread::Builder::new()
                    .name(format!("cnav-worker-{i}"))
                    .spawn(move || worker_loop(queue_rx, parser, ctx, events_tx, pending, active))
                    .expect("failed to spawn worker thread")
            })
            .collect();

        Self {
            queue: Some(queue),
            workers,
        }
    }

    pub fn queue(&self) -> &JobQueue {
        self.queue.as_ref().expect("scheduler already shut down")
    }

    /// Cancel outstanding jobs, close the queue, and join the workers.
    pub fn shutdown(&mut self) {
        if let Some(queue) = self.queue.take() {
            queue.cancel_all();
        }
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(
    queue_rx: Receiver<Arc<JobHandle>>,
    parser: Arc<dyn TranslationUnitParser>,
    ctx: JobContext,
    events_tx: Sender<IndexEvent>,
    pending: Arc<PendingCounter>,
    active: Arc<Mutex<HashMap<FileId, Arc<JobHandle>>>>,
) {
    while let Ok(job) = queue_rx.recv() {
        if job.is_cancelled() {
            job.set_state(JobState::Cancelled);
            release(&active, &job);
            pending.finish();
            continue;
        }
        job.set_state(JobState::Parsing);
        let started = Instant::now();
        let parse = ParseJob::new(job.source.clone(), job.index_type);
        match parse.run(parser.as_ref(), &ctx, job.cancelled_flag()) {
            Ok(result) => {
                if job.is_cancelled() {
                    job.set_state(JobState::Cancelled);
                    release(&active, &job);
                    ctx.metrics.increment_counter("jobs_cancelled", 1);
                    pending.finish();
                    continue;
                }
                job.set_state(JobState::Merging);
                release(&active, &job);
                ctx.metrics
                    .record_latency("parse", started.elapsed().as_secs_f64() * 1000.0);
                ctx.metrics.increment_counter("jobs_completed", 1);
                tracing::debug!(
                    source = %job.source.source_file.display(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "parse finished"
                );
                if events_tx
                    .send(IndexEvent::Parsed {
                        job: Arc::clone(&job),
                        result,
                    })
                    .is_err()
                {
                    pending.finish();
                }
            }
            Err(ParseFailure::Cancelled) => {
                job.set_state(JobState::Cancelled);
                release(&active, &job);
                ctx.metrics.increment_counter("jobs_cancelled", 1);
                pending.finish();
            }
            Err(failure) => {
                job.record_failure(failure);
                job.set_state(JobState::Done);
                release(&active, &job);
                ctx.metrics.increment_counter("jobs_failed", 1);
                tracing::warn!(
                    source = %job.source.source_file.display(),
                    %failure,
                    "parse failed"
                );
                if events_tx
                    .send(IndexEvent::Failed {
                        job: Arc::clone(&job),
                        failure,
                    })
                    .is_err()
                {
                    pending.finish();
                }
            }
        }
    }
}

/// Drop the job from the active registry unless a newer job superseded it.
fn release(active: &Mutex<HashMap<FileId, Arc<JobHandle>>>, job: &Arc<JobHandle>) {
    let mut active = active.lock().expect("active jobs poisoned");
    if let Some(current) = active.get(&job.primary) {
        if Arc::ptr_eq(current, job) {
            active.remove(&job.primary);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::UnitCache;
    use crate::job::VisitBroker;
    use crate::testing::{cursor, FixtureParser, FixtureUnit};
    use cnav_core::{CnavConfig, CursorKind, FileRegistry, UsrTable};
    use std::path::PathBuf;
    use std::time::Duration;

    fn context() -> JobContext {
        JobContext {
            files: Arc::new(FileRegistry::new()),
            usrs: Arc::new(UsrTable::new()),
            config: Arc::new(CnavConfig::default()),
            broker: Arc::new(VisitBroker::new()),
            project_root: PathBuf::from("/proj"),
            cache: Arc::new(Mutex::new(UnitCache::new(4))),
            metrics: Arc::new(cnav_core::NoopMetrics),
        }
    }

    /// Drain events on a side thread, finishing the pending count per
    /// event, and collect the primaries that reached the merge stage.
    fn spawn_collector(
        events_rx: Receiver<IndexEvent>,
        pending: Arc<PendingCounter>,
    ) -> (JoinHandle<()>, Arc<Mutex<Vec<FileId>>>) {
        let merged = Arc::new(Mutex::new(Vec::new()));
        let merged_out = Arc::clone(&merged);
        let handle = std::thread::spawn(move || {
            for event in events_rx.iter() {
                if let IndexEvent::Parsed { job, .. } = &event {
                    merged.lock().unwrap().push(job.primary);
                    job.set_state(JobState::Done);
                }
                pending.finish();
            }
        });
        (handle, merged_out)
    }

    #[test]
    fn jobs_flow_to_the_event_channel() {
        let parser = Arc::new(FixtureParser::new());
        parser.set_unit(
            "/proj/a.c",
            FixtureUnit::new()
                .cursor(cursor(CursorKind::Definition, "c:@F@a", "a", "/proj/a.c", 0, 1)),
        );

        let ctx = context();
        let pending = Arc::new(PendingCounter::new());
        let (events_tx, events_rx) = unbounded();
        let (collector, merged) = spawn_collector(events_rx, Arc::clone(&pending));

        let mut scheduler = Scheduler::new(
            Arc::clone(&parser) as Arc<dyn TranslationUnitParser>,
            ctx.clone(),
            events_tx,
            Arc::clone(&pending),
            2,
        );
        let primary = ctx.files.intern(std::path::Path::new("/proj/a.c"));
        let job = scheduler
            .queue()
            .submit(primary, SourceInformation::new("/proj/a.c"), IndexType::Initial);

        pending.wait_idle();
        assert_eq!(merged.lock().unwrap().as_slice(), &[primary]);
        assert_eq!(job.state(), JobState::Done);
        scheduler.shutdown();
        collector.join().unwrap();
    }

    #[test]
    fn resubmit_supersedes_queued_job() {
        let parser = Arc::new(FixtureParser::new());
        parser.set_unit(
            "/proj/a.c",
            FixtureUnit::new()
                .cursor(cursor(CursorKind::Definition, "c:@F@a", "a", "/proj/a.c", 0, 1)),
        );
        parser.set_delay("/proj/a.c", Duration::from_millis(30));

        let ctx = context();
        let pending = Arc::new(PendingCounter::new());
        let (events_tx, events_rx) = unbounded();
        let (collector, merged) = spawn_collector(events_rx, Arc::clone(&pending));

        // One worker so the second submit lands while the first is queued
        // or parsing.
        let mut scheduler = Scheduler::new(
            Arc::clone(&parser) as Arc<dyn TranslationUnitParser>,
            ctx.clone(),
            events_tx,
            Arc::clone(&pending),
            1,
        );
        let primary = ctx.files.intern(std::path::Path::new("/proj/a.c"));
        let first = scheduler
            .queue()
            .submit(primary, SourceInformation::new("/proj/a.c"), IndexType::Initial);
        let second = scheduler
            .queue()
            .submit(primary, SourceInformation::new("/proj/a.c"), IndexType::Dirty);

        pending.wait_idle();
        assert!(first.is_cancelled());
        assert_eq!(second.state(), JobState::Done);
        // Only the superseding job merged.
        assert_eq!(merged.lock().unwrap().as_slice(), &[primary]);
        scheduler.shutdown();
        collector.join().unwrap();
    }

    #[test]
    fn cancelled_job_never_reaches_merge() {
        let parser = Arc::new(FixtureParser::new());
        parser.set_unit(
            "/proj/a.c",
            FixtureUnit::new()
                .cursor(cursor(CursorKind::Definition, "c:@F@a", "a", "/proj/a.c", 0, 1)),
        );
        parser.set_delay("/proj/a.c", Duration::from_millis(30));

        let ctx = context();
        let pending = Arc::new(PendingCounter::new());
        let (events_tx, events_rx) = unbounded();
        let (collector, merged) = spawn_collector(events_rx, Arc::clone(&pending));

        let mut scheduler = Scheduler::new(
            Arc::clone(&parser) as Arc<dyn TranslationUnitParser>,
            ctx.clone(),
            events_tx,
            Arc::clone(&pending),
            1,
        );
        let primary = ctx.files.intern(std::path::Path::new("/proj/a.c"));
        scheduler
            .queue()
            .submit(primary, SourceInformation::new("/proj/a.c"), IndexType::Initial);
        assert!(scheduler.queue().cancel(primary));

        pending.wait_idle();
        assert!(merged.lock().unwrap().is_empty());
        scheduler.shutdown();
        collector.join().unwrap();
    }

    #[test]
    fn failed_parse_is_reported_not_merged() {
        let parser = Arc::new(FixtureParser::new());
        parser.set_failure("/proj/broken.c", ParseFailure::SyntaxFatal);

        let ctx = context();
        let pending = Arc::new(PendingCounter::new());
        let (events_tx, events_rx) = unbounded();

        let failures = Arc::new(Mutex::new(Vec::new()));
        let failures_out = Arc::clone(&failures);
        let pending_in = Arc::clone(&pending);
        let collector = std::thread::spawn(move || {
            for event in events_rx.iter() {
                if let IndexEvent::Failed { failure, .. } = &event {
                    failures.lock().unwrap().push(*failure);
                }
                pending_in.finish();
            }
        });

        let mut scheduler = Scheduler::new(
            Arc::clone(&parser) as Arc<dyn TranslationUnitParser>,
            ctx.clone(),
            events_tx,
            Arc::clone(&pending),
            1,
        );
        let primary = ctx.files.intern(std::path::Path::new("/proj/broken.c"));
        let job = scheduler.queue().submit(
            primary,
            SourceInformation::new("/proj/broken.c"),
            IndexType::Initial,
        );

        pending.wait_idle();
        assert_eq!(job.failure(), Some(ParseFailure::SyntaxFatal));
        assert_eq!(failures_out.lock().unwrap().as_slice(), &[ParseFailure::SyntaxFatal]);
        scheduler.shutdown();
        collector.join().unwrap();
    }

    #[test]
    fn pending_counter_waits_for_zero() {
        let pending = PendingCounter::new();
        assert!(pending.is_idle());
        pending.add();
        pending.add();
        assert_eq!(pending.count(), 2);
        pending.finish();
        pending.finish();
        assert!(pending.is_idle());
        pending.wait_idle();
    }
}
