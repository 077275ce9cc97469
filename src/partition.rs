//! Stripwise decomposition of the grid rows over the ranks.

use std::ops::RangeInclusive;

/// Returns the inclusive range of global rows owned by `rank`, when `rows`
/// rows are split over `parts` ranks. The first `rows % parts` ranks get one
/// extra row.
///
/// # Panics
///
/// If `parts` is zero, `rows < parts`, or `rank >= parts`. These are
/// validated collectively before any partitioning takes place.
pub fn row_range(rows: usize, parts: usize, rank: usize) -> RangeInclusive<usize> {
    assert!(parts > 0 && rows >= parts, "cannot split {} rows over {} ranks", rows, parts);
    assert!(rank < parts, "rank {} out of range for {} ranks", rank, parts);

    let base = rows / parts;
    let extra = rows % parts;
    let start = rank * base + rank.min(extra);
    let len = if rank < extra { base + 1 } else { base };
    start..=start + len - 1
}

/// Returns the row range of every rank, in rank order. The ranges tile
/// `0..rows` with no gaps or overlaps.
pub fn partition_rows(rows: usize, parts: usize) -> Vec<RangeInclusive<usize>> {
    (0..parts).map(|rank| row_range(rows, parts, rank)).collect()
}
