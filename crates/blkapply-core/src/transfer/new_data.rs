//! Streaming source for NEW-command payload.
//!
//! NEW commands carry no data inline; their content arrives out-of-band as
//! a sequential stream. Because NEW commands always execute (they are never
//! skipped by the retry logic), the stream position stays consistent across
//! retries: the n-th NEW command always reads the n-th slice.

use std::io::Read;

use crate::error::{Error, Result};

/// Sequential reader over the new-data blob.
#[derive(Debug)]
pub struct NewDataSource<R> {
    inner: R,
    consumed: u64,
}

impl<R: Read> NewDataSource<R> {
    /// Wrap a reader as the new-data stream.
    pub fn new(inner: R) -> Self {
        Self { inner, consumed: 0 }
    }

    /// Fill `buf` completely from the stream.
    ///
    /// A short stream is an error: every NEW command must be backed by
    /// exactly as many bytes as its target set covers.
    pub fn fill(&mut self, buf: &mut [u8]) -> Result<()> {
        self.inner.read_exact(buf).map_err(|e| Error::NewData {
            message: format!(
                "new-data stream exhausted at byte {}: {}",
                self.consumed, e
            ),
        })?;
        self.consumed += buf.len() as u64;
        Ok(())
    }

    /// Total bytes handed out so far.
    pub fn consumed(&self) -> u64 {
        self.consumed
    }
}
