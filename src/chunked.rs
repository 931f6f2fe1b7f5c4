// 📦 Chunked commits
//
// Large writes go to the store as fixed-size chunks, one atomic store call
// per chunk. A failure stops the run and reports how far it got; chunks
// already committed stay committed.

use crate::error::{RebateError, Result};
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChunkProgress {
    /// Chunks committed
    pub chunks: usize,

    /// Items handed to the store
    pub submitted: usize,

    /// Rows the store reported as written
    pub written: usize,
}

/// Feed `items` to `commit` in chunks of `chunk_size`.
///
/// `commit` returns the number of rows it wrote. Any error is wrapped in
/// `PartialCommit` with the failing chunk index and prior progress.
pub fn commit_in_chunks<T, F>(items: &[T], chunk_size: usize, label: &str, mut commit: F) -> Result<ChunkProgress>
where
    F: FnMut(&[T]) -> Result<usize>,
{
    if chunk_size == 0 {
        return Err(RebateError::InvalidConfig(format!(
            "{} chunk size must be at least 1",
            label
        )));
    }

    let total_chunks = items.len().div_ceil(chunk_size);
    let mut progress = ChunkProgress::default();

    for (index, chunk) in items.chunks(chunk_size).enumerate() {
        match commit(chunk) {
            Ok(written) => {
                progress.chunks += 1;
                progress.submitted += chunk.len();
                progress.written += written;
                info!(
                    label,
                    chunk = index + 1,
                    of = total_chunks,
                    written,
                    "chunk committed"
                );
            }
            Err(source) => {
                warn!(
                    label,
                    chunk = index,
                    committed_chunks = progress.chunks,
                    committed_rows = progress.written,
                    "chunk failed, stopping"
                );
                return Err(RebateError::PartialCommit {
                    chunk_index: index,
                    chunk_len: chunk.len(),
                    committed_chunks: progress.chunks,
                    committed_rows: progress.written,
                    source: Box::new(source),
                });
            }
        }
    }

    Ok(progress)
}
