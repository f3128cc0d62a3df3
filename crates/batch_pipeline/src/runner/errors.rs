//! Typed pipeline failures and the append-only error sink.

use log::error;
use std::sync::{Mutex, MutexGuard, PoisonError};
use thiserror::Error;

/// Fatal failures raised by [`ParallelRunner::run`] or at construction.
///
/// [`ParallelRunner::run`]: super::ParallelRunner::run
#[derive(Error, Debug)]
pub enum RunnerError {
    /// Construction-time validation failure.
    #[error("Invalid runner configuration: {reason}")]
    InvalidConfig {
        /// Explanation of what was rejected.
        reason: String,
    },

    /// The read queue stayed full past the configured put timeout while
    /// workers were still alive but made no progress.
    #[error("Read queue got stuck with {depth} batches")]
    StuckQueue {
        /// Queue depth observed when the budget ran out.
        depth: usize,
    },

    /// Every worker exited while batches were still queued.
    #[error("No workers running but read queue holds {depth} batches")]
    OrphanedQueue {
        /// Queue depth observed when the last worker was found dead.
        depth: usize,
    },

    /// Composite failure raised at the end of an aborted run, wrapping the
    /// first recorded cause.
    #[error("Pipeline run failed with {count} errors")]
    Aborted {
        /// Total errors recorded during the run.
        count: usize,
        /// First recorded cause.
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

/// Append-only, thread-safe list of stage errors.
///
/// Every stage records failures here and keeps going, or winds down when
/// `abort_on_fail` is set; the controller inspects the sink after join.
#[derive(Default)]
pub(crate) struct ErrorSink {
    errors: Mutex<Vec<anyhow::Error>>,
}

impl ErrorSink {
    // The sink must stay usable after a panicking thread held the lock.
    fn lock(&self) -> MutexGuard<'_, Vec<anyhow::Error>> {
        self.errors.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn record(&self, err: anyhow::Error) {
        error!("{err:#}");
        self.lock().push(err);
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Removes and returns everything recorded so far, in arrival order.
    pub(crate) fn take(&self) -> Vec<anyhow::Error> {
        std::mem::take(&mut *self.lock())
    }
}
