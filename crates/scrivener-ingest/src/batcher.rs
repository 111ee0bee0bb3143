//! Record batcher.
//!
//! Slices a finite sequence of mapped records into batches of a fixed size,
//! lazily: nothing is pulled from the underlying sequence until the next
//! batch is requested. The last batch holds the remainder (1..size records);
//! an empty batch is never produced.

use crate::error::{Error, Result};
use scrivener_core::{Batch, MappedRecord};

/// Lazy batching adapter over a record sequence.
///
/// Restartable only by constructing a new batcher over a fresh sequence;
/// not seekable.
pub struct RecordBatcher<I> {
    records: I,
    size: usize,
}

impl<I> RecordBatcher<I>
where
    I: Iterator<Item = MappedRecord>,
{
    /// Create a batcher producing batches of exactly `size` records
    /// (except possibly the last).
    pub fn new(records: I, size: usize) -> Result<Self> {
        if size == 0 {
            return Err(Error::InvalidBatchSize { size });
        }
        Ok(Self { records, size })
    }
}

impl<I> Iterator for RecordBatcher<I>
where
    I: Iterator<Item = MappedRecord>,
{
    type Item = Batch;

    fn next(&mut self) -> Option<Batch> {
        let mut collected = Vec::with_capacity(self.size);
        while collected.len() < self.size {
            match self.records.next() {
                Some(record) => collected.push(record),
                None => break,
            }
        }
        if collected.is_empty() {
            return None;
        }
        Some(Batch::new(collected).expect("batcher never collects an empty batch"))
    }
}
