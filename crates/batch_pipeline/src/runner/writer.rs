//! Writer loop: the single consumer draining the write queue.

use crossbeam_channel::{Receiver, RecvTimeoutError};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::{RunnerShared, WORKER_RECV_TIMEOUT};
use crate::batch::{Batch, Envelope};
use crate::io::BatchWriter;

/// Writer-side timing, returned through the writer thread's join handle.
#[derive(Default)]
pub(super) struct WriterTimes {
    pub(super) time_blocked_at_take_write: Duration,
    pub(super) time_writing: Duration,
}

/// Runs on the writer thread and hands the writer back to the controller
/// so `post`/`close` happen after every worker has exited.
pub(super) fn write_loop<O>(
    mut writer: Box<dyn BatchWriter<O>>,
    rx: Receiver<Envelope<O>>,
    shared: Arc<RunnerShared>,
    abort_on_fail: bool,
) -> (Box<dyn BatchWriter<O>>, WriterTimes) {
    let mut times = WriterTimes::default();

    loop {
        let batch = match take_batch(&rx, &shared, &mut times.time_blocked_at_take_write) {
            Some(batch) => batch,
            // Sentinel from the last worker, every worker gone, or
            // cancellation: done either way. There is no other consumer to
            // pass the sentinel to.
            None => break,
        };
        let Batch { items, position } = batch;

        let start = Instant::now();
        if let Err(e) = writer.write(items) {
            shared.errors.record(e.context(format!("Error writing batch {position}")));
        }
        times.time_writing += start.elapsed();

        if abort_on_fail && !shared.errors.is_empty() {
            break;
        }
    }

    (writer, times)
}

fn take_batch<O>(
    rx: &Receiver<Envelope<O>>,
    shared: &RunnerShared,
    blocked: &mut Duration,
) -> Option<Batch<O>> {
    let start = Instant::now();
    loop {
        match rx.recv_timeout(WORKER_RECV_TIMEOUT) {
            Ok(Envelope::Data(batch)) => {
                *blocked += start.elapsed();
                return Some(batch);
            }
            Ok(Envelope::End) | Err(RecvTimeoutError::Disconnected) => {
                *blocked += start.elapsed();
                return None;
            }
            Err(RecvTimeoutError::Timeout) => {
                if shared.shutdown.load(Ordering::Relaxed) {
                    *blocked += start.elapsed();
                    return None;
                }
            }
        }
    }
}
