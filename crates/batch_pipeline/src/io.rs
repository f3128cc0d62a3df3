//! Reader and writer capability traits consumed by the runner.
//!
//! Implementations wrap the upstream source and downstream sink of a
//! pipeline. `open`/`pre` run exactly once before the first `read`/`write`,
//! and `post`/`close` exactly once after every worker thread has exited, so
//! a late worker can never hand output to a closed sink.

use anyhow::Result;

/// Source of input items, driven from the caller's thread.
///
/// `read` returns up to `max` items; an empty vector signals end-of-stream.
pub trait BatchReader<I>: Send {
    /// Acquires underlying resources (files, sockets). Called once.
    fn open(&mut self) -> Result<()> {
        Ok(())
    }

    /// Hook run once after `open`, before the first `read`.
    fn pre(&mut self) -> Result<()> {
        Ok(())
    }

    /// Produces the next batch of up to `max` items.
    fn read(&mut self, max: usize) -> Result<Vec<I>>;

    /// Hook run once after the last `read`.
    fn post(&mut self) -> Result<()> {
        Ok(())
    }

    /// Releases underlying resources. Called once, after `post`.
    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Sink for output batches, driven from the writer thread.
pub trait BatchWriter<O>: Send {
    /// Acquires underlying resources. Called once.
    fn open(&mut self) -> Result<()> {
        Ok(())
    }

    /// Hook run once after `open`, before the first `write`.
    fn pre(&mut self) -> Result<()> {
        Ok(())
    }

    /// Consumes one batch of transformed items.
    fn write(&mut self, items: Vec<O>) -> Result<()>;

    /// Hook run once after the last `write`.
    fn post(&mut self) -> Result<()> {
        Ok(())
    }

    /// Releases underlying resources. Called once, after `post`.
    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}
