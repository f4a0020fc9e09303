//! Byte-range arithmetic over shard lists.

use regex::Regex;
use std::sync::OnceLock;

use crate::filemap::ShardRef;

/// Outcome of parsing a `Range` request header against a file size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeRequest {
    /// No usable range; serve the full file.
    Full,
    /// A satisfiable inclusive byte range.
    Bytes { start: u64, end: u64 },
    /// `start` beyond the end of the file (HTTP 416).
    Unsatisfiable,
}

/// Parse a `Range: bytes={start}-{end?}` header.
///
/// Anything the single-range grammar does not cover (multi-range, suffix
/// ranges) falls back to a full read.
pub fn parse_range_header(header: &str, size: u64) -> RangeRequest {
    static RANGE_RE: OnceLock<Regex> = OnceLock::new();
    let re = RANGE_RE.get_or_init(|| Regex::new(r"^bytes=(\d+)-(\d*)$").expect("range regex"));

    let Some(captures) = re.captures(header.trim()) else {
        return RangeRequest::Full;
    };
    let Ok(start) = captures[1].parse::<u64>() else {
        return RangeRequest::Full;
    };
    let end = match captures[2].parse::<u64>() {
        Ok(end) => end.min(size.saturating_sub(1)),
        Err(_) => size.saturating_sub(1),
    };

    if size == 0 || start >= size || start > end {
        return RangeRequest::Unsatisfiable;
    }
    RangeRequest::Bytes { start, end }
}

/// Indices `[lo, hi]` of the minimal shard-list prefix-suffix covering the
/// inclusive byte range `[start, end]`.
///
/// Callers guarantee `start <= end < total size`; the shard list is
/// contiguous from offset 0 (validated at filemap load).
pub fn shard_cover(shards: &[ShardRef], start: u64, end: u64) -> (usize, usize) {
    let lo = shards.partition_point(|s| s.end() <= start);
    let hi = shards.partition_point(|s| s.offset <= end) - 1;
    (lo, hi)
}

/// The sub-range of shard `shard` (relative to the shard's own bytes)
/// needed to serve the file range `[start, end]`.
pub fn slice_within(shard: &ShardRef, start: u64, end: u64) -> (u64, u64) {
    let from = start.max(shard.offset) - shard.offset;
    let to = end.min(shard.end() - 1) - shard.offset;
    (from, to)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shards(sizes: &[u64]) -> Vec<ShardRef> {
        let mut offset = 0;
        sizes
            .iter()
            .enumerate()
            .map(|(i, &size)| {
                let shard = ShardRef {
                    file: format!("f.shard.{:03}", i),
                    offset,
                    size,
                    sha256: None,
                };
                offset += size;
                shard
            })
            .collect()
    }

    #[test]
    fn test_parse_range_header() {
        assert_eq!(
            parse_range_header("bytes=0-99", 1000),
            RangeRequest::Bytes { start: 0, end: 99 }
        );
        assert_eq!(
            parse_range_header("bytes=500-", 1000),
            RangeRequest::Bytes { start: 500, end: 999 }
        );
        // End clamped to the file size.
        assert_eq!(
            parse_range_header("bytes=10-5000", 1000),
            RangeRequest::Bytes { start: 10, end: 999 }
        );
        assert_eq!(parse_range_header("bytes=1000-", 1000), RangeRequest::Unsatisfiable);
        assert_eq!(parse_range_header("bytes=9-3", 1000), RangeRequest::Unsatisfiable);
        assert_eq!(parse_range_header("bytes=0-", 0), RangeRequest::Unsatisfiable);
        // Multi-range and exotic grammars fall back to a full read.
        assert_eq!(parse_range_header("bytes=0-1,5-9", 1000), RangeRequest::Full);
        assert_eq!(parse_range_header("bytes=-500", 1000), RangeRequest::Full);
        assert_eq!(parse_range_header("items=0-1", 1000), RangeRequest::Full);
    }

    #[test]
    fn test_cover_single_shard() {
        let shards = shards(&[10, 10, 5]);
        assert_eq!(shard_cover(&shards, 0, 9), (0, 0));
        assert_eq!(shard_cover(&shards, 10, 19), (1, 1));
        assert_eq!(shard_cover(&shards, 20, 24), (2, 2));
    }

    #[test]
    fn test_cover_crossing_shards() {
        let shards = shards(&[10, 10, 5]);
        // Spans the tail of shard 0 and the head of shard 1.
        assert_eq!(shard_cover(&shards, 7, 14), (0, 1));
        // Whole file.
        assert_eq!(shard_cover(&shards, 0, 24), (0, 2));
        // Single byte at a shard boundary.
        assert_eq!(shard_cover(&shards, 10, 10), (1, 1));
        assert_eq!(shard_cover(&shards, 9, 10), (0, 1));
    }

    #[test]
    fn test_slice_within() {
        let shards = shards(&[10, 10, 5]);
        // Range 7..=14: last 3 bytes of shard 0, first 5 of shard 1.
        assert_eq!(slice_within(&shards[0], 7, 14), (7, 9));
        assert_eq!(slice_within(&shards[1], 7, 14), (0, 4));
        // A range spanning a shard end-to-end maps to its full extent.
        assert_eq!(slice_within(&shards[1], 0, 24), (0, 9));
    }
}
