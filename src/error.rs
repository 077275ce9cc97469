//! The crate-wide error type.

use thiserror::Error;

/// Everything that can stop a rank. Configuration, allocation and
/// verification failures are always reached collectively, so every rank of
/// the group returns the same variant (or `Aborted` when a peer failed).
#[derive(Debug, Error)]
pub enum Error {
    #[error("ERROR: {0}")]
    Configuration(String),

    #[error("could not allocate space for grid slice of {rows} by {cols} points on process {rank}")]
    Allocation { rank: usize, rows: usize, cols: usize },

    #[error("aborted: {0}")]
    Aborted(String),

    #[error("ERROR: checksum {checksum} does not match verification value {expected}")]
    Verification { checksum: f64, expected: f64 },

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("codec error: {0}")]
    Codec(String),

    #[error("peer {0} disconnected")]
    Disconnected(usize),

    #[error("launch error: {0}")]
    Launch(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
