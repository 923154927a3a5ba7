//! Chunk range partitioning

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SwarmError};

/// Inclusive range of chunk indices, `start <= end`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ChunkRange {
    pub start: u32,
    pub end: u32,
}

impl ChunkRange {
    pub fn new(start: u32, end: u32) -> Self {
        debug_assert!(start <= end, "inverted chunk range [{}, {}]", start, end);
        Self { start, end }
    }

    /// Number of chunks covered
    pub fn len(&self) -> u32 {
        self.end - self.start + 1
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    pub fn contains(&self, index: u32) -> bool {
        (self.start..=self.end).contains(&index)
    }

    pub fn indices(&self) -> std::ops::RangeInclusive<u32> {
        self.start..=self.end
    }
}

impl fmt::Display for ChunkRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.start, self.end)
    }
}

/// Split `0..chunk_count` into contiguous ranges, one per peer
///
/// Every range holds `chunk_count / n` chunks and the last one also takes
/// the remainder, where `n = min(peer_count, chunk_count)`. Surplus peers get
/// no range.
pub fn partition(chunk_count: u32, peer_count: usize) -> Result<Vec<ChunkRange>> {
    if chunk_count == 0 {
        return Err(SwarmError::invalid_input("chunk_count", "Must be at least 1"));
    }
    if peer_count == 0 {
        return Err(SwarmError::invalid_input("peer_count", "Must be at least 1"));
    }

    let ranges = peer_count.min(chunk_count as usize) as u32;
    let per_range = chunk_count / ranges;

    Ok((0..ranges)
        .map(|i| {
            let start = i * per_range;
            let end = if i == ranges - 1 {
                chunk_count - 1
            } else {
                start + per_range - 1
            };
            ChunkRange::new(start, end)
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_even_split() {
        let ranges = partition(4, 2).unwrap();
        assert_eq!(ranges, vec![ChunkRange::new(0, 1), ChunkRange::new(2, 3)]);
    }

    #[test]
    fn test_remainder_goes_last() {
        let ranges = partition(4, 3).unwrap();
        assert_eq!(
            ranges,
            vec![
                ChunkRange::new(0, 0),
                ChunkRange::new(1, 1),
                ChunkRange::new(2, 3)
            ]
        );

        let ranges = partition(10, 3).unwrap();
        assert_eq!(ranges.last(), Some(&ChunkRange::new(6, 9)));
    }

    #[test]
    fn test_more_peers_than_chunks() {
        let ranges = partition(2, 5).unwrap();
        assert_eq!(ranges, vec![ChunkRange::new(0, 0), ChunkRange::new(1, 1)]);
    }

    #[test]
    fn test_single_peer_takes_everything() {
        assert_eq!(partition(7, 1).unwrap(), vec![ChunkRange::new(0, 6)]);
    }

    #[test]
    fn test_rejects_zero() {
        assert!(partition(0, 3).is_err());
        assert!(partition(3, 0).is_err());
    }

    #[test]
    fn test_partition_covers_exactly_once() {
        for chunk_count in 1..=64u32 {
            for peer_count in 1..=12usize {
                let ranges = partition(chunk_count, peer_count).unwrap();
                assert_eq!(ranges.len(), peer_count.min(chunk_count as usize));

                let mut next = 0;
                for range in &ranges {
                    assert_eq!(range.start, next, "gap or overlap at {}", next);
                    assert!(range.start <= range.end);
                    next = range.end + 1;
                }
                assert_eq!(next, chunk_count);

                let covered: u32 = ranges.iter().map(ChunkRange::len).sum();
                assert_eq!(covered, chunk_count);
            }
        }
    }

    #[test]
    fn test_range_helpers() {
        let range = ChunkRange::new(2, 5);
        assert_eq!(range.len(), 4);
        assert!(range.contains(5));
        assert!(!range.contains(6));
        assert_eq!(range.indices().collect::<Vec<_>>(), vec![2, 3, 4, 5]);
        assert_eq!(range.to_string(), "[2, 5]");
    }
}
