//! Benchmark parameters and the collective agreement on them.
//!
//! Only the timing rank looks at the raw arguments. Its verdict is broadcast
//! before anything is allocated, so a bad request makes every rank fail the
//! same way instead of leaving some of them blocked on a receive.

use crate::coder::{CborCoder, Coder};
use crate::error::{Error, Result};
use crate::message::Communicator;
use serde::{Deserialize, Serialize};

/// The raw positional arguments: `<iterations> <m> <n>`.
#[derive(Clone, Debug, Default)]
pub struct BenchmarkRequest {
    pub args: Vec<String>,
}

/// A validated set of benchmark parameters.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Number of pipeline passes over the grid.
    pub iterations: usize,
    /// Grid rows (the distributed dimension).
    pub rows: usize,
    /// Grid columns (the sweep dimension).
    pub cols: usize,
}

/// What the timing rank broadcasts after validating the request.
#[derive(Debug, PartialEq, Serialize, Deserialize)]
enum SetupOutcome {
    Accepted(PipelineConfig),
    Rejected(String),
}

impl BenchmarkRequest {
    pub fn new<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// Check the request against a group of `size` ranks.
    pub fn validate(&self, size: usize) -> Result<PipelineConfig> {
        let [iterations, rows, cols] = self.args.as_slice() else {
            return Err(Error::Configuration(
                "Usage: <#iterations> <1st array dimension> <2nd array dimension>".into(),
            ));
        };
        let iterations = parse_int(iterations)?;
        if iterations < 1 {
            return Err(Error::Configuration(format!(
                "iterations must be >= 1 : {}",
                iterations
            )));
        }
        let rows = parse_int(rows)?;
        let cols = parse_int(cols)?;
        if rows < 1 || cols < 1 {
            return Err(Error::Configuration(format!(
                "grid dimensions must be positive: {}, {}",
                rows, cols
            )));
        }
        if (rows as u64) < size as u64 {
            return Err(Error::Configuration(format!(
                "First grid dimension {} smaller than number of processes {}",
                rows, size
            )));
        }
        Ok(PipelineConfig {
            iterations: to_usize(iterations)?,
            rows: to_usize(rows)?,
            cols: to_usize(cols)?,
        })
    }
}

fn parse_int(arg: &str) -> Result<i64> {
    arg.trim()
        .parse()
        .map_err(|_| Error::Configuration(format!("not an integer: {:?}", arg)))
}

fn to_usize(value: i64) -> Result<usize> {
    usize::try_from(value)
        .map_err(|_| Error::Configuration(format!("{} does not fit this platform", value)))
}

/// The rank that validates, times, verifies and reports.
pub fn timing_rank<C: Communicator>(comm: &C) -> usize {
    comm.size() - 1
}

/// Collective: the timing rank validates `request` and broadcasts the
/// outcome. Every rank returns the same config, or the same configuration
/// error. The other ranks' requests are ignored.
pub fn agree_on_config<C: Communicator>(comm: &C, request: &BenchmarkRequest) -> Result<PipelineConfig> {
    let root = timing_rank(comm);
    let code = CborCoder::<SetupOutcome>::new();

    let bytes = if comm.rank() == root {
        let outcome = match request.validate(comm.size()) {
            Ok(config) => SetupOutcome::Accepted(config),
            Err(Error::Configuration(message)) => SetupOutcome::Rejected(message),
            Err(e) => SetupOutcome::Rejected(e.to_string()),
        };
        Some(code.encode(&outcome)?)
    } else {
        None
    };

    match code.decode(&comm.broadcast(root, bytes)?)? {
        SetupOutcome::Accepted(config) => {
            log::debug!("rank {} accepted {:?}", comm.rank(), config);
            Ok(config)
        }
        SetupOutcome::Rejected(message) => Err(Error::Configuration(message)),
    }
}
