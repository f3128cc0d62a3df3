//! Configuration for a pipeline run.
//!
//! `RunnerConfig` stores the immutable parameters that control queue depth,
//! batch size and failure handling for one [`ParallelRunner`].
//!
//! Example:
//! ```ignore
//! let config = RunnerConfig::builder()
//!     .num_tasks(4)
//!     .batch_size(100)
//!     .capacity(8)
//!     .abort_on_fail(true)
//!     .build();
//! ```
//!
//! # Performance considerations:
//! - `num_tasks`: more workers improve throughput for CPU-bound tasks but
//!   add thread overhead
//! - `capacity`: deeper queues smooth out bursty stages at the cost of
//!   memory (roughly `2 * capacity * batch_size` items in flight)
//!
//! [`ParallelRunner`]: super::ParallelRunner

use std::time::Duration;

/// Immutable tuning record for a pipeline run.
#[derive(Clone, Debug)]
pub struct RunnerConfig {
    /// Number of worker threads.
    pub num_tasks: usize,
    /// Items requested per `read` call.
    pub batch_size: usize,
    /// Maximum batches buffered per queue.
    pub capacity: usize,
    /// If true, the first recorded error winds down every stage and `run`
    /// raises a composite failure.
    pub abort_on_fail: bool,
    /// Reserved. Accepted and carried but not consulted by the runner.
    pub sorted: bool,
    /// Soft deadline for stuck-queue detection while offering batches to
    /// the read queue. Default: 500 ms.
    pub read_queue_put_timeout: Duration,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            num_tasks: 1,
            batch_size: 1,
            capacity: 2,
            abort_on_fail: true,
            sorted: false,
            read_queue_put_timeout: Duration::from_millis(500),
        }
    }
}

impl RunnerConfig {
    pub fn builder() -> RunnerConfigBuilder {
        RunnerConfigBuilder::default()
    }
}

/// Builder for [`RunnerConfig`] with method chaining.
#[derive(Default)]
pub struct RunnerConfigBuilder {
    config: RunnerConfig,
}

impl RunnerConfigBuilder {
    /// Set the number of worker threads (must be > 0).
    pub fn num_tasks(mut self, num_tasks: usize) -> Self {
        self.config.num_tasks = num_tasks;
        self
    }

    /// Set the number of items requested per `read` call (must be > 0).
    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.config.batch_size = batch_size;
        self
    }

    /// Set the queue depth in batches (must be > 0).
    pub fn capacity(mut self, capacity: usize) -> Self {
        self.config.capacity = capacity;
        self
    }

    /// Set whether the first recorded error stops the pipeline.
    pub fn abort_on_fail(mut self, abort_on_fail: bool) -> Self {
        self.config.abort_on_fail = abort_on_fail;
        self
    }

    /// Set the reserved ordering flag. Carried but currently unused.
    pub fn sorted(mut self, sorted: bool) -> Self {
        self.config.sorted = sorted;
        self
    }

    /// Set the stuck-queue detection deadline.
    ///
    /// - Too low: a transiently slow worker pool is reported as stuck
    /// - Too high: delays detection of dead workers
    pub fn read_queue_put_timeout(mut self, timeout: Duration) -> Self {
        self.config.read_queue_put_timeout = timeout;
        self
    }

    /// Build the final configuration.
    pub fn build(self) -> RunnerConfig {
        self.config
    }
}
