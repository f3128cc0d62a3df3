//! Parallel batch pipeline runner.
//!
//! A single producer reads records in fixed-size batches, a pool of worker
//! threads applies a [`Task`] to each batch concurrently, and an optional
//! single consumer writes the transformed batches downstream:
//!
//! ```text
//! Reader ──> read queue ──> Workers (×N) ──> write queue ──> Writer
//! ```
//!
//! Both queues are bounded at `capacity` batches, so a slow stage
//! backpressures everything upstream of it and memory stays at roughly
//! `2 * capacity * batch_size` items in flight. Either the reader or the
//! writer may be absent; tasks and configuration are mandatory.
//!
//! End-of-stream travels as a sentinel message: the reader posts exactly
//! one into the read queue, each worker re-enqueues the one it observes so
//! every sibling eventually sees it, and the last worker to finish posts
//! the write queue's sentinel after all drain output.
//!
//! # Ordering
//!
//! Queues are FIFO but workers run concurrently, so batches reach the
//! writer out of order. Consumers must not rely on batch positions being
//! contiguous or monotonic.
//!
//! # Failure handling
//!
//! Stage errors are recorded into an append-only sink and never unwind past
//! the stage boundary. With `abort_on_fail` every stage winds down after
//! the first recorded error and `run` raises a composite
//! [`RunnerError::Aborted`]; without it the pipeline drains to completion
//! and the errors are available from [`ParallelRunner::take_errors`].

mod config;
mod errors;
mod reader;
mod stats;
mod worker;
mod writer;

pub use self::config::{RunnerConfig, RunnerConfigBuilder};
pub use self::errors::RunnerError;
pub use self::stats::RunStats;

use anyhow::{anyhow, Context, Result};
use crossbeam_channel::{bounded, Receiver, Sender};
use log::{error, warn};
use std::any::Any;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::batch::Envelope;
use crate::io::{BatchReader, BatchWriter};
use crate::task::{Task, TaskSet};
use self::errors::ErrorSink;
use self::reader::read_loop;
use self::worker::{worker_loop, WorkerContext};
use self::writer::write_loop;

/// Per-attempt timeout for offering a batch to the read queue. The stuck
/// detection budget is `read_queue_put_timeout` divided by this.
pub const QUEUE_OFFER_TIMEOUT: Duration = Duration::from_secs(1);

/// Shutdown retries, one second apart, before a cancelled run gives up on
/// workers that ignore the shutdown flag and leaves them detached.
pub const MAX_SHUTDOWN_RETRIES: usize = 30;

/// How often blocked stages wake to check the shutdown flag.
const WORKER_RECV_TIMEOUT: Duration = Duration::from_millis(100);

/// State shared by every stage of one run.
#[derive(Default)]
struct RunnerShared {
    errors: ErrorSink,
    shutdown: AtomicBool,
    num_batches: AtomicU64,
    finalize: Mutex<FinalizeState>,
}

/// Updated only under the finalize lock, by workers winding down.
#[derive(Default)]
struct FinalizeState {
    finished_tasks: usize,
    time_blocked_at_take_read: Duration,
    time_task_apply: Duration,
    time_blocked_at_put_write: Duration,
}

impl RunnerShared {
    fn lock_finalize(&self) -> MutexGuard<'_, FinalizeState> {
        // Finalize must proceed even after a sibling worker panicked while
        // holding the lock.
        self.finalize.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Coordinates one reader, `num_tasks` workers and an optional writer over
/// two bounded queues.
///
/// The reader loop runs on the thread that calls [`run`](Self::run); the
/// workers and the writer run on their own named threads for the duration
/// of the call.
///
/// # Example
/// ```ignore
/// let config = RunnerConfig::builder().num_tasks(4).batch_size(100).capacity(8).build();
/// let writer = CollectWriter::new();
/// let sink = writer.sink();
///
/// let mut runner = ParallelRunner::builder(config)
///     .reader(IterReader::new(records))
///     .task(TaskFn::new(|batch: Vec<Record>| Ok(annotate(batch))))
///     .writer(writer)
///     .build()?;
/// runner.run()?;
/// let annotated = sink.lock().unwrap();
/// ```
pub struct ParallelRunner<I, O> {
    reader: Option<Box<dyn BatchReader<I>>>,
    writer: Option<Box<dyn BatchWriter<O>>>,
    tasks: TaskSet<I, O>,
    config: RunnerConfig,
    errors: Vec<anyhow::Error>,
    stats: RunStats,
}

impl<I, O> ParallelRunner<I, O>
where
    I: Send + 'static,
    O: Send + 'static,
{
    pub fn builder(config: RunnerConfig) -> RunnerBuilder<I, O> {
        RunnerBuilder {
            config,
            reader: None,
            writer: None,
            tasks: None,
        }
    }

    /// Drives the pipeline to completion on the calling thread.
    ///
    /// Returns an error when validation of a stage hook fails, when the
    /// read queue is diagnosed stuck or orphaned, or (with
    /// `abort_on_fail`) as a composite wrapping the first recorded stage
    /// error. With `abort_on_fail = false` stage errors do not fail the
    /// run; inspect [`take_errors`](Self::take_errors) instead.
    pub fn run(&mut self) -> Result<()> {
        let run_start = Instant::now();
        self.errors.clear();
        self.stats = RunStats::default();

        let has_reader = self.reader.is_some();
        let has_writer = self.writer.is_some();
        let num_tasks = self.tasks.len();
        let shared = Arc::new(RunnerShared::default());

        let read_channel: Option<(Sender<Envelope<I>>, Receiver<Envelope<I>>)> =
            has_reader.then(|| bounded(self.config.capacity));
        let write_channel: Option<(Sender<Envelope<O>>, Receiver<Envelope<O>>)> =
            has_writer.then(|| bounded(self.config.capacity));

        if let Some(reader) = self.reader.as_mut() {
            reader.open().context("Failed to open reader")?;
            reader.pre().context("Error in reader pre hook")?;
        }
        if let Some(writer) = self.writer.as_mut() {
            writer.open().context("Failed to open writer")?;
            writer.pre().context("Error in writer pre hook")?;
        }
        for task in self.tasks.instances() {
            task.pre().context("Error in task pre hook")?;
        }

        let mut worker_handles = Vec::with_capacity(num_tasks);
        for index in 0..num_tasks {
            let ctx = WorkerContext {
                index,
                task: self.tasks.worker(index),
                read_rx: read_channel.as_ref().map(|(_, rx)| rx.clone()),
                read_tx: read_channel.as_ref().map(|(tx, _)| tx.clone()),
                write_tx: write_channel.as_ref().map(|(tx, _)| tx.clone()),
                shared: Arc::clone(&shared),
                abort_on_fail: self.config.abort_on_fail,
                num_tasks,
            };
            let handle = thread::Builder::new()
                .name(format!("pipeline-worker-{index}"))
                .spawn(move || worker_loop(ctx))
                .with_context(|| format!("Failed to spawn worker thread {index}"))?;
            worker_handles.push(handle);
        }

        let mut writer_handle = None;
        if let (Some(writer), Some((_, rx))) = (self.writer.take(), write_channel.as_ref()) {
            let rx = rx.clone();
            let shared_clone = Arc::clone(&shared);
            let abort_on_fail = self.config.abort_on_fail;
            let handle = thread::Builder::new()
                .name("pipeline-writer".to_string())
                .spawn(move || write_loop(writer, rx, shared_clone, abort_on_fail))
                .context("Failed to spawn writer thread")?;
            writer_handle = Some(handle);
        }

        // From here on only the stages own queue endpoints; the controller
        // must not keep a write-queue sender or the writer would never
        // observe disconnection when workers die.
        drop(write_channel);
        let read_tx = read_channel.map(|(tx, rx)| {
            drop(rx);
            tx
        });

        let mut interrupted = false;
        let mut fatal = None;
        if let (Some(reader), Some(tx)) = (self.reader.as_mut(), read_tx.as_ref()) {
            let outcome = read_loop(&mut **reader, tx, &mut worker_handles, &shared, &self.config);
            interrupted = outcome.interrupted;
            fatal = outcome.fatal;
            self.stats.time_reading = outcome.times.time_reading;
            self.stats.time_blocked_at_put_read = outcome.times.time_blocked_at_put_read;
        }
        drop(read_tx);

        // A normal drain may legitimately take as long as the remaining
        // work, so only cancelled runs get the bounded-retry treatment.
        let workers_stuck = if interrupted || fatal.is_some() {
            await_cancelled_workers(&worker_handles, &shared)
        } else {
            false
        };
        if workers_stuck {
            error!(
                "Workers still running after {MAX_SHUTDOWN_RETRIES} shutdown retries; \
                 leaving them detached and continuing cleanup"
            );
        }

        for handle in worker_handles.drain(..) {
            if workers_stuck && !handle.is_finished() {
                drop(handle);
                continue;
            }
            if let Err(panic) = handle.join() {
                shared
                    .errors
                    .record(anyhow!("Worker thread panicked: {}", panic_message(panic.as_ref())));
            }
        }

        if let Some(handle) = writer_handle {
            if workers_stuck && !handle.is_finished() {
                error!("Writer thread still running after shutdown retries; skipping writer post/close");
            } else {
                match handle.join() {
                    Ok((writer, times)) => {
                        self.stats.time_blocked_at_take_write = times.time_blocked_at_take_write;
                        self.stats.time_writing = times.time_writing;
                        self.writer = Some(writer);
                    }
                    Err(panic) => {
                        shared.errors.record(anyhow!(
                            "Writer thread panicked: {}; writer post/close will not run",
                            panic_message(panic.as_ref())
                        ));
                        // The writer value died with its thread, so the
                        // post/close pass below cannot reach it.
                        error!("Writer lost to a panic; skipping writer post/close");
                    }
                }
            }
        }

        // post/close only after every thread has exited, so a late worker
        // can never write into a closed sink or read a closed source.
        for task in self.tasks.instances() {
            if let Err(e) = task.post() {
                shared.errors.record(e.context("Error in task post hook"));
            }
        }
        if let Some(reader) = self.reader.as_mut() {
            if let Err(e) = reader.post() {
                shared.errors.record(e.context("Error in reader post hook"));
            }
            if let Err(e) = reader.close() {
                shared.errors.record(e.context("Error closing reader"));
            }
        }
        if let Some(writer) = self.writer.as_mut() {
            if let Err(e) = writer.post() {
                shared.errors.record(e.context("Error in writer post hook"));
            }
            if let Err(e) = writer.close() {
                shared.errors.record(e.context("Error closing writer"));
            }
        }

        {
            let finalize = shared.lock_finalize();
            self.stats.time_blocked_at_take_read = finalize.time_blocked_at_take_read;
            self.stats.time_task_apply = finalize.time_task_apply;
            self.stats.time_blocked_at_put_write = finalize.time_blocked_at_put_write;
        }
        self.stats.total = run_start.elapsed();
        self.stats.log_summary(has_reader, has_writer);

        self.errors = shared.errors.take();

        if let Some(fatal) = fatal {
            return Err(fatal.into());
        }
        if self.config.abort_on_fail && !self.errors.is_empty() {
            let first = &self.errors[0];
            return Err(RunnerError::Aborted {
                count: self.errors.len(),
                source: anyhow!("{first:#}").into(),
            }
            .into());
        }
        Ok(())
    }

    /// Errors recorded during the last run, in arrival order. Draining.
    pub fn take_errors(&mut self) -> Vec<anyhow::Error> {
        std::mem::take(&mut self.errors)
    }

    /// Number of errors recorded during the last run.
    pub fn error_count(&self) -> usize {
        self.errors.len()
    }

    /// Timing accumulators from the last run.
    pub fn stats(&self) -> RunStats {
        self.stats
    }
}

/// Builder for [`ParallelRunner`].
///
/// A reader and a writer are optional; exactly one task source is required.
pub struct RunnerBuilder<I, O> {
    config: RunnerConfig,
    reader: Option<Box<dyn BatchReader<I>>>,
    writer: Option<Box<dyn BatchWriter<O>>>,
    tasks: Option<TaskSet<I, O>>,
}

impl<I, O> RunnerBuilder<I, O>
where
    I: Send + 'static,
    O: Send + 'static,
{
    /// Sets the upstream source. Without one, workers feed empty batches to
    /// the task and produce output from `apply`/`drain` alone.
    pub fn reader(mut self, reader: impl BatchReader<I> + 'static) -> Self {
        self.reader = Some(Box::new(reader));
        self
    }

    /// Sets the downstream sink. Without one, task output is discarded.
    pub fn writer(mut self, writer: impl BatchWriter<O> + 'static) -> Self {
        self.writer = Some(Box::new(writer));
        self
    }

    /// One task instance shared by every worker. The instance is applied
    /// from `num_tasks` threads at once.
    pub fn task(mut self, task: impl Task<I, O> + 'static) -> Self {
        self.tasks = Some(TaskSet::shared(Arc::new(task), self.config.num_tasks));
        self
    }

    /// Mints one private task instance per worker.
    pub fn task_supplier<T, F>(mut self, mut supplier: F) -> Self
    where
        T: Task<I, O> + 'static,
        F: FnMut() -> T,
    {
        self.tasks = Some(TaskSet::from_supplier(
            || Arc::new(supplier()) as Arc<dyn Task<I, O>>,
            self.config.num_tasks,
        ));
        self
    }

    /// Caller-supplied task instances, one worker each. The list length
    /// overrides `config.num_tasks`.
    pub fn tasks(mut self, tasks: Vec<Arc<dyn Task<I, O>>>) -> Self {
        self.tasks = Some(TaskSet::from_list(tasks));
        self
    }

    pub fn build(self) -> std::result::Result<ParallelRunner<I, O>, RunnerError> {
        let tasks = self.tasks.ok_or_else(|| RunnerError::InvalidConfig {
            reason: "must provide at least one task".to_string(),
        })?;
        if tasks.len() == 0 {
            return Err(RunnerError::InvalidConfig {
                reason: "must provide at least one task".to_string(),
            });
        }
        if self.config.batch_size == 0 {
            return Err(RunnerError::InvalidConfig {
                reason: "batch_size must be greater than 0".to_string(),
            });
        }
        if self.config.capacity == 0 {
            return Err(RunnerError::InvalidConfig {
                reason: "capacity must be greater than 0".to_string(),
            });
        }

        let mut config = self.config;
        config.num_tasks = tasks.len();

        Ok(ParallelRunner {
            reader: self.reader,
            writer: self.writer,
            tasks,
            config,
            errors: Vec::new(),
            stats: RunStats::default(),
        })
    }
}

/// Polls the cancelled pool, re-raising the shutdown flag each retry.
/// Returns true when workers are still alive after the retry budget.
fn await_cancelled_workers(handles: &[JoinHandle<()>], shared: &RunnerShared) -> bool {
    let mut retries = 0;
    while handles.iter().any(|handle| !handle.is_finished()) {
        if retries >= MAX_SHUTDOWN_RETRIES {
            return true;
        }
        retries += 1;
        shared.shutdown.store(true, Ordering::Relaxed);
        warn!("Workers still running after cancellation, shutdown retry {retries}/{MAX_SHUTDOWN_RETRIES}");
        thread::sleep(Duration::from_secs(1));
    }
    false
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
