use anyhow::Result;
use batch_pipeline::{BatchReader, BatchWriter, Task};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Lifecycle call counters shared between a fixture and its test.
#[derive(Default)]
pub struct LifecycleCounts {
    pub opens: AtomicUsize,
    pub pres: AtomicUsize,
    pub reads: AtomicUsize,
    pub writes: AtomicUsize,
    pub posts: AtomicUsize,
    pub closes: AtomicUsize,
}

/// Reader over a fixed item list that counts its lifecycle calls.
pub struct CountingReader<T> {
    items: std::vec::IntoIter<T>,
    counts: Arc<LifecycleCounts>,
}

impl<T> CountingReader<T> {
    pub fn new(items: Vec<T>) -> Self {
        Self {
            items: items.into_iter(),
            counts: Arc::new(LifecycleCounts::default()),
        }
    }

    pub fn counts(&self) -> Arc<LifecycleCounts> {
        Arc::clone(&self.counts)
    }
}

impl<T: Send> BatchReader<T> for CountingReader<T> {
    fn open(&mut self) -> Result<()> {
        self.counts.opens.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn pre(&mut self) -> Result<()> {
        self.counts.pres.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn read(&mut self, max: usize) -> Result<Vec<T>> {
        self.counts.reads.fetch_add(1, Ordering::SeqCst);
        Ok(self.items.by_ref().take(max).collect())
    }

    fn post(&mut self) -> Result<()> {
        self.counts.posts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.counts.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Writer that collects output into a shared vector and counts its
/// lifecycle calls.
pub struct CountingWriter<O> {
    sink: Arc<Mutex<Vec<O>>>,
    counts: Arc<LifecycleCounts>,
}

impl<O> CountingWriter<O> {
    pub fn new() -> Self {
        Self {
            sink: Arc::new(Mutex::new(Vec::new())),
            counts: Arc::new(LifecycleCounts::default()),
        }
    }

    pub fn sink(&self) -> Arc<Mutex<Vec<O>>> {
        Arc::clone(&self.sink)
    }

    pub fn counts(&self) -> Arc<LifecycleCounts> {
        Arc::clone(&self.counts)
    }
}

impl<O: Send> BatchWriter<O> for CountingWriter<O> {
    fn open(&mut self) -> Result<()> {
        self.counts.opens.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn pre(&mut self) -> Result<()> {
        self.counts.pres.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn write(&mut self, items: Vec<O>) -> Result<()> {
        self.counts.writes.fetch_add(1, Ordering::SeqCst);
        self.sink.lock().unwrap().extend(items);
        Ok(())
    }

    fn post(&mut self) -> Result<()> {
        self.counts.posts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.counts.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Per-hook call counters for [`CountingTask`].
#[derive(Default)]
pub struct TaskCounts {
    pub pres: AtomicUsize,
    pub applies: AtomicUsize,
    pub drains: AtomicUsize,
    pub posts: AtomicUsize,
}

/// Identity task over `i64` items that counts every hook invocation.
pub struct CountingTask {
    counts: Arc<TaskCounts>,
}

impl CountingTask {
    pub fn new() -> Self {
        Self {
            counts: Arc::new(TaskCounts::default()),
        }
    }

    pub fn counts(&self) -> Arc<TaskCounts> {
        Arc::clone(&self.counts)
    }
}

impl Task<i64, i64> for CountingTask {
    fn pre(&self) -> Result<()> {
        self.counts.pres.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn apply(&self, items: Vec<i64>) -> Result<Vec<i64>> {
        self.counts.applies.fetch_add(1, Ordering::SeqCst);
        Ok(items)
    }

    fn drain(&self) -> Result<Vec<i64>> {
        self.counts.drains.fetch_add(1, Ordering::SeqCst);
        Ok(Vec::new())
    }

    fn post(&self) -> Result<()> {
        self.counts.posts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
