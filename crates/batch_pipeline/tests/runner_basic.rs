//! End-to-end pipeline tests.
//!
//! Tests cover:
//! - Conservation: writer output equals transformed reader output
//! - Fan-out across multiple workers (ordering unconstrained)
//! - Optional stages (no reader, no writer)
//! - Drain output reaching the writer
//! - Lifecycle hooks running exactly once

mod common;
use common::{CountingReader, CountingTask, CountingWriter};

use anyhow::Result;
use batch_pipeline::{
    IterReader, LineReader, LineWriter, ParallelRunner, RunnerConfig, Task, TaskFn,
};
use std::io::Write as _;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

// ============================================================================
// 1. Conservation
// ============================================================================

#[test]
fn test_identity_pipeline_conserves_items() -> Result<()> {
    let config = RunnerConfig::builder()
        .num_tasks(1)
        .batch_size(2)
        .capacity(4)
        .build();

    let reader = CountingReader::new(vec![1i64, 2, 3, 4, 5]);
    let writer = CountingWriter::new();
    let sink = writer.sink();
    let task = CountingTask::new();
    let task_counts = task.counts();

    let mut runner = ParallelRunner::builder(config)
        .reader(reader)
        .task(task)
        .writer(writer)
        .build()?;
    runner.run()?;

    let mut written = std::mem::take(&mut *sink.lock().unwrap());
    written.sort_unstable();
    assert_eq!(written, vec![1, 2, 3, 4, 5]);
    assert_eq!(runner.error_count(), 0);

    // 5 items in batches of 2: three apply calls.
    assert_eq!(task_counts.applies.load(Ordering::SeqCst), 3);
    assert!(runner.stats().total > Duration::ZERO);
    Ok(())
}

#[test]
fn test_multiple_workers_shuffling_allowed() -> Result<()> {
    let config = RunnerConfig::builder()
        .num_tasks(4)
        .batch_size(2)
        .capacity(4)
        .build();

    let writer = CountingWriter::new();
    let sink = writer.sink();

    let mut runner = ParallelRunner::builder(config)
        .reader(IterReader::new(vec![1i64, 2, 3, 4, 5]))
        .task(TaskFn::new(|items: Vec<i64>| {
            Ok(items.iter().map(|v| v * 2).collect())
        }))
        .writer(writer)
        .build()?;
    runner.run()?;

    let mut written = std::mem::take(&mut *sink.lock().unwrap());
    written.sort_unstable();
    assert_eq!(written, vec![2, 4, 6, 8, 10]);
    Ok(())
}

#[test]
fn test_drain_output_reaches_writer() -> Result<()> {
    // Tasks buffer everything and only emit on drain; conservation must
    // still hold.
    struct BufferingTask {
        buffer: Mutex<Vec<i64>>,
    }

    impl Task<i64, i64> for BufferingTask {
        fn apply(&self, items: Vec<i64>) -> Result<Vec<i64>> {
            self.buffer.lock().unwrap().extend(items);
            Ok(Vec::new())
        }

        fn drain(&self) -> Result<Vec<i64>> {
            Ok(std::mem::take(&mut *self.buffer.lock().unwrap()))
        }
    }

    let config = RunnerConfig::builder()
        .num_tasks(3)
        .batch_size(4)
        .capacity(2)
        .build();

    let writer = CountingWriter::new();
    let sink = writer.sink();

    let mut runner = ParallelRunner::builder(config)
        .reader(IterReader::new(0i64..50))
        .task_supplier(|| BufferingTask {
            buffer: Mutex::new(Vec::new()),
        })
        .writer(writer)
        .build()?;
    runner.run()?;

    let mut written = std::mem::take(&mut *sink.lock().unwrap());
    written.sort_unstable();
    assert_eq!(written, (0..50).collect::<Vec<i64>>());
    Ok(())
}

// ============================================================================
// 2. Optional stages
// ============================================================================

#[test]
fn test_no_reader_generator_tasks() -> Result<()> {
    // Without a reader, workers feed empty batches to the task until it
    // reports end-of-stream with an empty result.
    struct GeneratorTask {
        fired: AtomicBool,
    }

    impl Task<String, String> for GeneratorTask {
        fn apply(&self, _items: Vec<String>) -> Result<Vec<String>> {
            if self.fired.swap(true, Ordering::SeqCst) {
                Ok(Vec::new())
            } else {
                Ok(vec!["a".to_string(), "b".to_string()])
            }
        }

        fn drain(&self) -> Result<Vec<String>> {
            Ok(vec!["z".to_string()])
        }
    }

    let config = RunnerConfig::builder()
        .num_tasks(2)
        .batch_size(10)
        .capacity(4)
        .build();

    let writer = CountingWriter::new();
    let sink = writer.sink();

    let mut runner = ParallelRunner::builder(config)
        .task_supplier(|| GeneratorTask {
            fired: AtomicBool::new(false),
        })
        .writer(writer)
        .build()?;
    runner.run()?;

    let mut written = std::mem::take(&mut *sink.lock().unwrap());
    written.sort();
    assert_eq!(written, vec!["a", "a", "b", "b", "z", "z"]);
    assert_eq!(runner.error_count(), 0);
    Ok(())
}

#[test]
fn test_no_writer_discards_output() -> Result<()> {
    let applied = Arc::new(AtomicUsize::new(0));
    let applied_in_task = Arc::clone(&applied);

    let config = RunnerConfig::builder()
        .num_tasks(2)
        .batch_size(8)
        .capacity(4)
        .build();

    let mut runner = ParallelRunner::builder(config)
        .reader(IterReader::new(0i64..100))
        .task(TaskFn::new(move |items: Vec<i64>| {
            applied_in_task.fetch_add(items.len(), Ordering::SeqCst);
            Ok(items)
        }))
        .build()?;
    runner.run()?;

    assert_eq!(applied.load(Ordering::SeqCst), 100);
    assert_eq!(runner.error_count(), 0);
    Ok(())
}

// ============================================================================
// 3. File-backed pipeline
// ============================================================================

#[test]
fn test_file_to_file_pipeline() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let input = dir.path().join("input.txt");
    let output = dir.path().join("output.txt");

    let mut file = std::fs::File::create(&input)?;
    for i in 0..10 {
        writeln!(file, "record {i}")?;
    }
    drop(file);

    let config = RunnerConfig::builder()
        .num_tasks(2)
        .batch_size(3)
        .capacity(2)
        .build();

    let mut runner = ParallelRunner::builder(config)
        .reader(LineReader::new(&input))
        .task(TaskFn::new(|lines: Vec<String>| {
            Ok(lines.into_iter().map(|line| line.to_uppercase()).collect())
        }))
        .writer(LineWriter::new(&output))
        .build()?;
    runner.run()?;

    let written = std::fs::read_to_string(&output)?;
    let mut lines: Vec<_> = written.lines().collect();
    lines.sort_unstable();
    assert_eq!(lines.len(), 10);
    assert!(lines.contains(&"RECORD 0"));
    assert!(lines.contains(&"RECORD 9"));
    Ok(())
}

// ============================================================================
// 4. Lifecycle hooks
// ============================================================================

#[test]
fn test_lifecycle_hooks_called_exactly_once() -> Result<()> {
    let config = RunnerConfig::builder()
        .num_tasks(4)
        .batch_size(2)
        .capacity(4)
        .build();

    let reader = CountingReader::new((0..20).collect::<Vec<i64>>());
    let reader_counts = reader.counts();
    let writer = CountingWriter::new();
    let writer_counts = writer.counts();
    let task = CountingTask::new();
    let task_counts = task.counts();

    let mut runner = ParallelRunner::builder(config)
        .reader(reader)
        .task(task)
        .writer(writer)
        .build()?;
    runner.run()?;

    for counts in [&reader_counts, &writer_counts] {
        assert_eq!(counts.opens.load(Ordering::SeqCst), 1);
        assert_eq!(counts.pres.load(Ordering::SeqCst), 1);
        assert_eq!(counts.posts.load(Ordering::SeqCst), 1);
        assert_eq!(counts.closes.load(Ordering::SeqCst), 1);
    }

    // One shared instance across 4 workers: pre/post once per instance,
    // drain once per worker.
    assert_eq!(task_counts.pres.load(Ordering::SeqCst), 1);
    assert_eq!(task_counts.posts.load(Ordering::SeqCst), 1);
    assert_eq!(task_counts.drains.load(Ordering::SeqCst), 4);
    Ok(())
}
