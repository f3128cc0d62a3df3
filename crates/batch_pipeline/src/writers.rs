//! Concrete [`BatchWriter`] implementations.

use crate::io::BatchWriter;
use anyhow::{anyhow, Context, Result};
use std::fmt;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::marker::PhantomData;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};

/// Appends every batch into a shared vector.
///
/// Clone the handle out of [`CollectWriter::sink`] before the run and
/// inspect it afterwards. Batches arrive in whatever order the workers
/// finished them.
pub struct CollectWriter<O> {
    sink: Arc<Mutex<Vec<O>>>,
}

impl<O> CollectWriter<O> {
    pub fn new() -> Self {
        Self {
            sink: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Handle to the collected output.
    pub fn sink(&self) -> Arc<Mutex<Vec<O>>> {
        Arc::clone(&self.sink)
    }
}

impl<O> Default for CollectWriter<O> {
    fn default() -> Self {
        Self::new()
    }
}

impl<O: Send> BatchWriter<O> for CollectWriter<O> {
    fn write(&mut self, items: Vec<O>) -> Result<()> {
        self.sink
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend(items);
        Ok(())
    }
}

/// Writes each item as one line of text.
pub struct LineWriter<O> {
    path: PathBuf,
    out: Option<BufWriter<File>>,
    marker: PhantomData<fn(O)>,
}

impl<O> LineWriter<O> {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            out: None,
            marker: PhantomData,
        }
    }
}

impl<O: fmt::Display + Send> BatchWriter<O> for LineWriter<O> {
    fn open(&mut self) -> Result<()> {
        let file = File::create(&self.path)
            .with_context(|| format!("Failed to create output file: {}", self.path.display()))?;
        self.out = Some(BufWriter::new(file));
        Ok(())
    }

    fn write(&mut self, items: Vec<O>) -> Result<()> {
        let out = self
            .out
            .as_mut()
            .ok_or_else(|| anyhow!("LineWriter write before open"))?;
        for item in items {
            writeln!(out, "{item}")
                .with_context(|| format!("Error writing {}", self.path.display()))?;
        }
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if let Some(mut out) = self.out.take() {
            out.flush()
                .with_context(|| format!("Error flushing {}", self.path.display()))?;
        }
        Ok(())
    }
}
