//! Transfer planning: single-shot vs. chunked, and chunk boundaries.

use crate::config::TransferPolicy;
use serde::{Deserialize, Serialize};
use std::ops::Range;

/// Half-open byte range `[start, end)` of one chunk.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkRange {
    /// Position in the transfer (0-indexed).
    pub ordinal: u32,
    pub start: u64,
    pub end: u64,
}

impl ChunkRange {
    /// Length of the chunk in bytes.
    pub fn len(&self) -> u64 {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// The range as `usize` bounds, for slicing an in-memory buffer.
    pub fn as_range(&self) -> Range<usize> {
        self.start as usize..self.end as usize
    }
}

/// How a file will be sent to the server.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum TransferPlan {
    /// The whole file goes in one request.
    SingleShot { file_size: u64 },
    /// The file is split into ordered chunks sent one at a time.
    Chunked {
        file_size: u64,
        chunk_size: u64,
        chunks: Vec<ChunkRange>,
    },
}

impl TransferPlan {
    pub fn file_size(&self) -> u64 {
        match self {
            Self::SingleShot { file_size } | Self::Chunked { file_size, .. } => *file_size,
        }
    }

    /// Number of requests the transfer takes (1 for single-shot).
    pub fn total_chunks(&self) -> u32 {
        match self {
            Self::SingleShot { .. } => 1,
            Self::Chunked { chunks, .. } => chunks.len() as u32,
        }
    }

    pub fn is_chunked(&self) -> bool {
        matches!(self, Self::Chunked { .. })
    }
}

impl TransferPolicy {
    /// Decide how a file of `file_size` bytes is transferred.
    ///
    /// Files at or below the single-shot threshold go in one request.
    /// Larger files are split into `ceil(size / chunk_size)` ranges, the
    /// last of which may be shorter.
    pub fn plan(&self, file_size: u64) -> crate::Result<TransferPlan> {
        if file_size > self.max_file_size {
            return Err(crate::Error::FileTooLarge {
                size: file_size,
                max: self.max_file_size,
            });
        }
        if self.chunk_size == 0 {
            return Err(crate::Error::InvalidPolicy(
                "chunk_size must be greater than 0".to_string(),
            ));
        }

        if file_size <= self.single_shot_threshold {
            return Ok(TransferPlan::SingleShot { file_size });
        }

        Ok(TransferPlan::Chunked {
            file_size,
            chunk_size: self.chunk_size,
            chunks: chunk_ranges(file_size, self.chunk_size),
        })
    }
}

/// Split `file_size` bytes into contiguous ranges of `chunk_size`.
pub fn chunk_ranges(file_size: u64, chunk_size: u64) -> Vec<ChunkRange> {
    let total = file_size.div_ceil(chunk_size);
    (0..total)
        .map(|i| ChunkRange {
            ordinal: i as u32,
            start: i * chunk_size,
            end: ((i + 1) * chunk_size).min(file_size),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const MB: u64 = 1024 * 1024;

    fn policy(threshold: u64, chunk: u64, max: u64) -> TransferPolicy {
        TransferPolicy {
            single_shot_threshold: threshold,
            chunk_size: chunk,
            max_file_size: max,
            ..TransferPolicy::default()
        }
    }

    #[test]
    fn test_threshold_boundary() {
        let p = policy(1000, 300, 10_000);

        assert!(!p.plan(999).unwrap().is_chunked());
        assert!(!p.plan(1000).unwrap().is_chunked());

        let above = p.plan(1001).unwrap();
        assert!(above.is_chunked());
        assert_eq!(above.total_chunks(), 4);
    }

    #[test]
    fn test_twelve_megabytes_in_five_megabyte_chunks() {
        let p = policy(5 * MB, 5 * MB, 100 * MB);
        let plan = p.plan(12 * MB).unwrap();

        let TransferPlan::Chunked { chunks, .. } = &plan else {
            panic!("expected chunked plan");
        };
        assert_eq!(plan.total_chunks(), 3);
        let lens: Vec<u64> = chunks.iter().map(|c| c.len()).collect();
        assert_eq!(lens, vec![5 * MB, 5 * MB, 2 * MB]);
    }

    #[test]
    fn test_ranges_are_contiguous() {
        let ranges = chunk_ranges(1001, 300);
        assert_eq!(ranges.first().unwrap().start, 0);
        assert_eq!(ranges.last().unwrap().end, 1001);
        for pair in ranges.windows(2) {
            assert_eq!(pair[0].end, pair[1].start);
            assert_eq!(pair[0].ordinal + 1, pair[1].ordinal);
        }
    }

    #[test]
    fn test_exact_multiple_has_no_short_chunk() {
        let ranges = chunk_ranges(900, 300);
        assert_eq!(ranges.len(), 3);
        assert!(ranges.iter().all(|r| r.len() == 300));
    }

    #[test]
    fn test_rejects_file_too_large() {
        let p = policy(10, 10, 100);
        assert!(p.plan(100).is_ok());
        match p.plan(101) {
            Err(crate::Error::FileTooLarge { size, max }) => {
                assert_eq!(size, 101);
                assert_eq!(max, 100);
            }
            other => panic!("expected FileTooLarge, got {other:?}"),
        }
    }

    #[test]
    fn test_empty_file_is_single_shot() {
        let plan = policy(10, 10, 100).plan(0).unwrap();
        assert_eq!(plan, TransferPlan::SingleShot { file_size: 0 });
        assert_eq!(plan.total_chunks(), 1);
    }
}
