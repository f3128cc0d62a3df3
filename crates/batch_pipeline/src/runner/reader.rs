//! Reader loop: the single producer feeding the read queue.
//!
//! Runs on the caller's thread. The reader is the only producer, so a read
//! queue that stays full while no worker makes progress is a definitive
//! signal that the workers have died; the bounded offer loop turns that
//! into a reported error instead of a hang.

use anyhow::anyhow;
use crossbeam_channel::{SendTimeoutError, Sender};
use log::warn;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::Ordering;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use super::config::RunnerConfig;
use super::errors::RunnerError;
use super::{panic_message, RunnerShared, QUEUE_OFFER_TIMEOUT};
use crate::batch::{Batch, Envelope};
use crate::io::BatchReader;

/// Reader-side timing, folded into `RunStats` by the controller.
#[derive(Default)]
pub(super) struct ReaderTimes {
    pub(super) time_reading: Duration,
    pub(super) time_blocked_at_put_read: Duration,
}

pub(super) struct ReaderOutcome {
    /// Cooperative cancellation was observed.
    pub(super) interrupted: bool,
    /// Stuck-queue or orphaned-queue failure, fatal to the run.
    pub(super) fatal: Option<RunnerError>,
    pub(super) times: ReaderTimes,
}

impl ReaderOutcome {
    fn new(times: ReaderTimes) -> Self {
        Self { interrupted: false, fatal: None, times }
    }
}

pub(super) fn read_loop<I>(
    reader: &mut dyn BatchReader<I>,
    tx: &Sender<Envelope<I>>,
    workers: &mut Vec<JoinHandle<()>>,
    shared: &RunnerShared,
    config: &RunnerConfig,
) -> ReaderOutcome {
    let mut times = ReaderTimes::default();
    let max_failed_offers =
        config.read_queue_put_timeout.as_millis() / QUEUE_OFFER_TIMEOUT.as_millis();

    loop {
        if shared.shutdown.load(Ordering::Relaxed) {
            let _ = tx.send(Envelope::End);
            return ReaderOutcome { interrupted: true, ..ReaderOutcome::new(times) };
        }

        let position = shared.num_batches.fetch_add(1, Ordering::Relaxed);
        let start = Instant::now();
        // This runs on the caller's thread, so unlike the worker and writer
        // stages there is no spawn boundary to stop an unwinding reader;
        // contain it here or cleanup and the spawned threads are lost.
        let read_result = catch_unwind(AssertUnwindSafe(|| reader.read(config.batch_size)));
        times.time_reading += start.elapsed();
        let items = match read_result {
            Ok(Ok(items)) => items,
            Ok(Err(e)) => {
                shared.errors.record(e.context(format!("Error reading batch {position}")));
                let _ = tx.send(Envelope::End);
                return ReaderOutcome::new(times);
            }
            Err(panic) => {
                shared.errors.record(anyhow!(
                    "Reader panicked reading batch {position}: {}",
                    panic_message(panic.as_ref())
                ));
                let _ = tx.send(Envelope::End);
                return ReaderOutcome::new(times);
            }
        };

        if items.is_empty() {
            // Normal end-of-stream.
            let _ = tx.send(Envelope::End);
            return ReaderOutcome::new(times);
        }

        let mut envelope = Envelope::Data(Batch::new(items, position));
        let offer_start = Instant::now();
        let mut failed_offers: u128 = 0;
        loop {
            match tx.send_timeout(envelope, QUEUE_OFFER_TIMEOUT) {
                Ok(()) => break,
                Err(SendTimeoutError::Timeout(back)) => {
                    if !jobs_running(workers, shared) {
                        shared.shutdown.store(true, Ordering::Relaxed);
                        return ReaderOutcome {
                            fatal: Some(RunnerError::OrphanedQueue { depth: tx.len() }),
                            ..ReaderOutcome::new(times)
                        };
                    }
                    failed_offers += 1;
                    if failed_offers > max_failed_offers {
                        // The queue is full, so the sentinel is best-effort;
                        // the shutdown flag covers workers that drain later.
                        shared.shutdown.store(true, Ordering::Relaxed);
                        let _ = tx.try_send(Envelope::End);
                        return ReaderOutcome {
                            fatal: Some(RunnerError::StuckQueue { depth: tx.len() }),
                            ..ReaderOutcome::new(times)
                        };
                    }
                    envelope = back;
                }
                Err(SendTimeoutError::Disconnected(_)) => {
                    // Every worker dropped its end of the queue.
                    shared.shutdown.store(true, Ordering::Relaxed);
                    return ReaderOutcome {
                        fatal: Some(RunnerError::OrphanedQueue { depth: tx.len() }),
                        ..ReaderOutcome::new(times)
                    };
                }
            }
        }
        times.time_blocked_at_put_read += offer_start.elapsed();

        if config.abort_on_fail && !shared.errors.is_empty() {
            warn!("Aborting reader loop on recorded failure");
            let _ = tx.send(Envelope::End);
            return ReaderOutcome::new(times);
        }
    }
}

/// Scans the worker handles, dropping finished ones and surfacing their
/// panics into the sink. Returns whether any worker is still alive.
fn jobs_running(workers: &mut Vec<JoinHandle<()>>, shared: &RunnerShared) -> bool {
    let mut index = 0;
    while index < workers.len() {
        if workers[index].is_finished() {
            let handle = workers.remove(index);
            if let Err(panic) = handle.join() {
                shared
                    .errors
                    .record(anyhow!("Worker thread panicked: {}", panic_message(panic.as_ref())));
            }
        } else {
            index += 1;
        }
    }
    !workers.is_empty()
}
