//! A point-to-point synchronization benchmark.
//!
//! An `m` by `n` grid is split into horizontal strips, one per rank. Each
//! pass sweeps the grid column by column with the recurrence
//!
//! ```text
//! a[i][j] = a[i - 1][j] + a[i][j - 1] - a[i - 1][j - 1]
//! ```
//!
//! so every rank must wait for the last row of its left neighbor, column by
//! column. The dependency runs diagonally through the ranks like a
//! wavefront, and the time per pass measures how quickly the transport can
//! hand single values down the chain. The negated top-right corner is fed
//! back into the origin after every pass, which forbids the passes from
//! overlapping and makes the final corner equal `iterations * (m + n - 2)`.
//!
//! Ranks talk through the [`message::Communicator`] trait, with in-process
//! channel and TCP implementations. [`orchestrator::run_rank`] is the entry
//! point of a single rank, and [`launch::Launcher`] runs a whole group on
//! threads.

pub mod coder;
pub mod config;
pub mod error;
pub mod launch;
pub mod message;
pub mod orchestrator;
pub mod partition;
pub mod report;
pub mod stage;

pub use config::{BenchmarkRequest, PipelineConfig};
pub use error::{Error, Result};
pub use orchestrator::run_rank;
pub use report::BenchmarkReport;
