//! Concrete [`BatchReader`] implementations.

use crate::io::BatchReader;
use anyhow::{anyhow, Context, Result};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::PathBuf;

/// Feeds the pipeline from any iterator.
///
/// # Example
/// ```ignore
/// let reader = IterReader::new(0..1000);
/// ```
pub struct IterReader<It> {
    iter: It,
}

impl<It> IterReader<It> {
    pub fn new<I>(source: I) -> Self
    where
        I: IntoIterator<IntoIter = It>,
    {
        Self {
            iter: source.into_iter(),
        }
    }
}

impl<It> BatchReader<It::Item> for IterReader<It>
where
    It: Iterator + Send,
    It::Item: Send,
{
    fn read(&mut self, max: usize) -> Result<Vec<It::Item>> {
        Ok(self.iter.by_ref().take(max).collect())
    }
}

/// Reads a text file line by line, batching up to `max` lines per call.
///
/// Line endings are stripped. The file is opened in `open` and released in
/// `close`, so the same reader value can be handed to several runs.
pub struct LineReader {
    path: PathBuf,
    reader: Option<BufReader<File>>,
}

impl LineReader {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            reader: None,
        }
    }
}

impl BatchReader<String> for LineReader {
    fn open(&mut self) -> Result<()> {
        let file = File::open(&self.path)
            .with_context(|| format!("Failed to open input file: {}", self.path.display()))?;
        self.reader = Some(BufReader::new(file));
        Ok(())
    }

    fn read(&mut self, max: usize) -> Result<Vec<String>> {
        let reader = self
            .reader
            .as_mut()
            .ok_or_else(|| anyhow!("LineReader read before open"))?;

        let mut lines = Vec::with_capacity(max);
        for _ in 0..max {
            let mut line = String::new();
            let bytes = reader
                .read_line(&mut line)
                .with_context(|| format!("Error reading {}", self.path.display()))?;
            if bytes == 0 {
                break;
            }
            if line.ends_with('\n') {
                line.pop();
                if line.ends_with('\r') {
                    line.pop();
                }
            }
            lines.push(line);
        }
        Ok(lines)
    }

    fn close(&mut self) -> Result<()> {
        self.reader = None;
        Ok(())
    }
}
