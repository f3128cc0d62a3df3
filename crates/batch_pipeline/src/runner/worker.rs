//! Worker loop: takes batches from the read queue, applies the task, and
//! forwards results to the write queue.
//!
//! Exit conditions:
//! - the sentinel arrives: put it back so sibling workers see it, then
//!   drain and finalize
//! - no reader is configured and `apply` returned an empty batch: the
//!   generator task is exhausted
//! - `abort_on_fail` and the sink holds an error: wind down through drain
//! - shutdown flag or a disconnected queue: cancellation, exit immediately
//!   without drain

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::{RunnerShared, WORKER_RECV_TIMEOUT};
use crate::batch::{Batch, Envelope};
use crate::task::Task;

/// Everything one worker thread owns. The channel endpoints are owned per
/// worker so each thread's exit participates in disconnection tracking.
pub(super) struct WorkerContext<I, O> {
    pub(super) index: usize,
    pub(super) task: Arc<dyn Task<I, O>>,
    pub(super) read_rx: Option<Receiver<Envelope<I>>>,
    pub(super) read_tx: Option<Sender<Envelope<I>>>,
    pub(super) write_tx: Option<Sender<Envelope<O>>>,
    pub(super) shared: Arc<RunnerShared>,
    pub(super) abort_on_fail: bool,
    pub(super) num_tasks: usize,
}

pub(super) fn worker_loop<I, O>(ctx: WorkerContext<I, O>) {
    let mut time_blocked_at_take_read = Duration::ZERO;
    let mut time_task_apply = Duration::ZERO;
    let mut time_blocked_at_put_write = Duration::ZERO;
    let mut next_drain_position: u64 = 0;

    loop {
        if ctx.shared.shutdown.load(Ordering::Relaxed) {
            // Cancelled: no drain, no finalize. Dropping the channel ends
            // wakes the other stages.
            return;
        }

        let batch = match take_batch(&ctx, &mut time_blocked_at_take_read) {
            Some(Envelope::Data(batch)) => batch,
            Some(Envelope::End) => {
                // Put the sentinel back so sibling workers see it too.
                if let Some(tx) = &ctx.read_tx {
                    let _ = tx.send(Envelope::End);
                }
                break;
            }
            None => return,
        };
        let Batch { items, position } = batch;

        let start = Instant::now();
        let result = match ctx.task.apply(items) {
            Ok(items) => Some(items),
            Err(e) => {
                ctx.shared.errors.record(e.context(format!("Error processing batch {position}")));
                None
            }
        };
        time_task_apply += start.elapsed();
        next_drain_position = position + 1;

        // Without a reader, an exhausted generator task reports
        // end-of-stream with an empty result.
        if ctx.read_rx.is_none() && matches!(&result, Some(items) if items.is_empty()) {
            break;
        }

        if ctx.abort_on_fail && !ctx.shared.errors.is_empty() {
            break;
        }

        if let (Some(tx), Some(items)) = (&ctx.write_tx, result) {
            let start = Instant::now();
            let sent = tx.send(Envelope::Data(Batch::new(items, position)));
            time_blocked_at_put_write += start.elapsed();
            if sent.is_err() {
                // Writer is gone; nothing downstream can accept output.
                break;
            }
        }
    }

    match ctx.task.drain() {
        Ok(items) => {
            if !items.is_empty() {
                if let Some(tx) = &ctx.write_tx {
                    let _ = tx.send(Envelope::Data(Batch::new(items, next_drain_position)));
                }
            }
        }
        Err(e) => {
            ctx.shared
                .errors
                .record(e.context(format!("Error draining task {}", ctx.index)));
        }
    }

    let mut finalize = ctx.shared.lock_finalize();
    finalize.time_blocked_at_take_read += time_blocked_at_take_read;
    finalize.time_task_apply += time_task_apply;
    finalize.time_blocked_at_put_write += time_blocked_at_put_write;
    finalize.finished_tasks += 1;
    if finalize.finished_tasks == ctx.num_tasks {
        if let Some(tx) = &ctx.write_tx {
            // Still under the lock: the writer sentinel must trail every
            // worker's drain output.
            let _ = tx.send(Envelope::End);
        }
    }
}

/// Acquires the next batch, or `None` on cancellation.
///
/// With no read queue the worker synthesizes empty batches so
/// generator-style tasks produce output from `apply`/`drain` alone.
fn take_batch<I, O>(ctx: &WorkerContext<I, O>, blocked: &mut Duration) -> Option<Envelope<I>> {
    let rx = match &ctx.read_rx {
        None => {
            let position = ctx.shared.num_batches.fetch_add(1, Ordering::Relaxed);
            return Some(Envelope::Data(Batch::new(Vec::new(), position)));
        }
        Some(rx) => rx,
    };

    let start = Instant::now();
    loop {
        match rx.recv_timeout(WORKER_RECV_TIMEOUT) {
            Ok(envelope) => {
                *blocked += start.elapsed();
                return Some(envelope);
            }
            Err(RecvTimeoutError::Timeout) => {
                if ctx.shared.shutdown.load(Ordering::Relaxed) {
                    *blocked += start.elapsed();
                    return None;
                }
            }
            Err(RecvTimeoutError::Disconnected) => {
                *blocked += start.elapsed();
                return None;
            }
        }
    }
}
