//! The per-batch transformation applied by the worker pool.

use anyhow::Result;
use std::sync::Arc;

/// A batch transformation run concurrently by the worker pool.
///
/// `pre` and `post` are called exactly once per task instance, before the
/// first and after the last batch. `apply` may run any number of times,
/// including zero. `drain` runs once per worker after its last `apply` and
/// yields whatever output the task buffered internally.
///
/// Methods take `&self`: a single instance shared across the whole pool is
/// applied from several threads at once, so stateful tasks must manage
/// their own interior mutability. Tasks minted per worker (see
/// `RunnerBuilder::task_supplier`) are only ever applied from one thread.
pub trait Task<I, O>: Send + Sync {
    /// Hook run once before the first `apply`.
    fn pre(&self) -> Result<()> {
        Ok(())
    }

    /// Transforms one batch of items.
    fn apply(&self, items: Vec<I>) -> Result<Vec<O>>;

    /// Yields residual output buffered by the task. Default: nothing.
    fn drain(&self) -> Result<Vec<O>> {
        Ok(Vec::new())
    }

    /// Hook run once after the last `drain`.
    fn post(&self) -> Result<()> {
        Ok(())
    }
}

/// Adapter turning a closure into a stateless [`Task`].
///
/// # Example
/// ```ignore
/// let double = TaskFn::new(|items: Vec<i64>| Ok(items.iter().map(|v| v * 2).collect()));
/// ```
pub struct TaskFn<F>(F);

impl<F> TaskFn<F> {
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

impl<I, O, F> Task<I, O> for TaskFn<F>
where
    F: Fn(Vec<I>) -> Result<Vec<O>> + Send + Sync,
{
    fn apply(&self, items: Vec<I>) -> Result<Vec<O>> {
        (self.0)(items)
    }
}

/// The task assignment for one run: one handle per worker plus the distinct
/// instances used for exactly-once `pre`/`post`.
pub(crate) struct TaskSet<I, O> {
    workers: Vec<Arc<dyn Task<I, O>>>,
    instances: Vec<Arc<dyn Task<I, O>>>,
}

impl<I, O> TaskSet<I, O> {
    /// One shared instance applied by every worker.
    pub(crate) fn shared(task: Arc<dyn Task<I, O>>, num_tasks: usize) -> Self {
        Self {
            workers: vec![Arc::clone(&task); num_tasks],
            instances: vec![task],
        }
    }

    /// One private instance per worker, minted by `supplier`.
    pub(crate) fn from_supplier<F>(mut supplier: F, num_tasks: usize) -> Self
    where
        F: FnMut() -> Arc<dyn Task<I, O>>,
    {
        let workers: Vec<_> = (0..num_tasks).map(|_| supplier()).collect();
        let instances = workers.clone();
        Self { workers, instances }
    }

    /// Caller-supplied instances, one worker each.
    pub(crate) fn from_list(tasks: Vec<Arc<dyn Task<I, O>>>) -> Self {
        // A repeated instance must still see pre/post exactly once.
        let mut instances: Vec<Arc<dyn Task<I, O>>> = Vec::new();
        for task in &tasks {
            if !instances.iter().any(|seen| Arc::ptr_eq(seen, task)) {
                instances.push(Arc::clone(task));
            }
        }
        Self { workers: tasks, instances }
    }

    pub(crate) fn len(&self) -> usize {
        self.workers.len()
    }

    pub(crate) fn worker(&self, index: usize) -> Arc<dyn Task<I, O>> {
        Arc::clone(&self.workers[index])
    }

    pub(crate) fn instances(&self) -> &[Arc<dyn Task<I, O>>] {
        &self.instances
    }
}
