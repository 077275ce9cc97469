//! Utility functions intended for use within the [`crate::message`] module.

use std::io::{self, prelude::*};

/// Compute the log-base-two of the next power of two: 8 -> 3, 9 -> 4.
pub fn ceil_log2(x: usize) -> usize {
    let mut n = 0;
    while 1 << n < x {
        n += 1
    }
    n
}

/// The parent of a (root-relative) rank in a binomial tree: the rank with
/// its lowest set bit cleared.
pub fn tree_parent(relative: usize) -> usize {
    relative & (relative - 1)
}

/// The children of a (root-relative) rank in a binomial tree over `size`
/// ranks, farthest first. The root owns one subtree per bit of
/// `ceil_log2(size)`; any other rank owns one per trailing zero.
pub fn tree_children(relative: usize, size: usize) -> Vec<usize> {
    let limit = if relative == 0 {
        ceil_log2(size)
    } else {
        relative.trailing_zeros() as usize
    };
    (0..limit)
        .rev()
        .map(|k| relative + (1 << k))
        .filter(|&child| child < size)
        .collect()
}

/// Read a little-endian `u64` out of the given stream.
pub fn read_u64<R: Read>(stream: &mut R) -> io::Result<u64> {
    read_bytes_array(stream).map(u64::from_le_bytes)
}

/// Read the given number of bytes from a stream, into a `Vec<u8>`.
pub fn read_bytes_vec<R: Read>(stream: &mut R, size: usize) -> io::Result<Vec<u8>> {
    let mut buffer = vec![0; size];
    stream.read_exact(&mut buffer)?;
    Ok(buffer)
}

/// Read the given (const) number of bytes from a stream, into an array.
pub fn read_bytes_array<R: Read, const SIZE: usize>(stream: &mut R) -> io::Result<[u8; SIZE]> {
    let mut buffer = [0; SIZE];
    stream.read_exact(&mut buffer)?;
    Ok(buffer)
}
