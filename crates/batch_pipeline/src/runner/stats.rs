//! Wall-clock accumulators for each pipeline stage.

use log::info;
use std::time::Duration;

/// Time spent per stage during one run.
///
/// All deltas are measured with the monotonic clock
/// ([`std::time::Instant`]) on both ends. Blocked-time fields count time
/// spent waiting on the bounded queues, so a saturated stage shows up as
/// blocked time in its neighbours: a slow writer inflates
/// `time_blocked_at_put_write`, a slow reader inflates
/// `time_blocked_at_take_read`.
#[derive(Clone, Copy, Debug, Default)]
pub struct RunStats {
    /// Time the reader spent inside `read` calls.
    pub time_reading: Duration,
    /// Reader time spent offering batches to a full read queue.
    pub time_blocked_at_put_read: Duration,
    /// Worker time spent waiting for batches on the read queue.
    pub time_blocked_at_take_read: Duration,
    /// Worker time spent inside `apply`.
    pub time_task_apply: Duration,
    /// Worker time spent putting results into a full write queue.
    pub time_blocked_at_put_write: Duration,
    /// Writer time spent waiting for batches on the write queue.
    pub time_blocked_at_take_write: Duration,
    /// Time the writer spent inside `write` calls.
    pub time_writing: Duration,
    /// Wall-clock duration of the whole `run` call.
    pub total: Duration,
}

impl RunStats {
    /// Logs the end-of-run summary, one line per field in seconds at
    /// nanosecond resolution. Reader and writer lines only appear when the
    /// respective stage was configured.
    pub(crate) fn log_summary(&self, has_reader: bool, has_writer: bool) {
        if has_reader {
            info!("read:  time_reading               = {:.9}s", self.time_reading.as_secs_f64());
            info!(
                "read:  time_blocked_at_put_read   = {:.9}s",
                self.time_blocked_at_put_read.as_secs_f64()
            );
            info!(
                "task:  time_blocked_at_take_read  = {:.9}s",
                self.time_blocked_at_take_read.as_secs_f64()
            );
        }
        info!("task:  time_task_apply            = {:.9}s", self.time_task_apply.as_secs_f64());
        if has_writer {
            info!(
                "task:  time_blocked_at_put_write  = {:.9}s",
                self.time_blocked_at_put_write.as_secs_f64()
            );
            info!(
                "write: time_blocked_at_take_write = {:.9}s",
                self.time_blocked_at_take_write.as_secs_f64()
            );
            info!("write: time_writing               = {:.9}s", self.time_writing.as_secs_f64());
        }
        info!("total:                            = {:.9}s", self.total.as_secs_f64());
    }
}
