//! Timing statistics and the report printed by the timing rank.

use crate::config::PipelineConfig;
use serde::Serialize;
use std::io::{self, Write};

/// Running min / max / total of the timed passes.
#[derive(Clone, Debug, Default)]
pub struct IterationTimes {
    min: f64,
    max: f64,
    total: f64,
    samples: usize,
}

impl IterationTimes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one elapsed time, in seconds, into the statistics.
    pub fn record(&mut self, seconds: f64) {
        if self.samples == 0 {
            self.min = seconds;
            self.max = seconds;
        } else {
            self.min = self.min.min(seconds);
            self.max = self.max.max(seconds);
        }
        self.total += seconds;
        self.samples += 1;
    }

    pub fn samples(&self) -> usize {
        self.samples
    }

    pub fn min(&self) -> f64 {
        self.min
    }

    pub fn max(&self) -> f64 {
        self.max
    }

    /// Mean over the recorded passes. The first of several passes is never
    /// recorded, so the divisor is `iterations - 1`, or 1 for a single pass.
    pub fn average(&self, iterations: usize) -> f64 {
        self.total / iterations.saturating_sub(1).max(1) as f64
    }
}

/// Everything the timing rank knows at the end of a successful run.
#[derive(Clone, Debug, Serialize)]
pub struct BenchmarkReport {
    pub ranks: usize,
    pub config: PipelineConfig,
    pub checksum: f64,
    pub expected: f64,
    pub min_time: f64,
    pub avg_time: f64,
    pub max_time: f64,
}

impl BenchmarkReport {
    pub fn new(ranks: usize, config: PipelineConfig, checksum: f64, expected: f64, times: &IterationTimes) -> Self {
        Self {
            ranks,
            config,
            checksum,
            expected,
            min_time: times.min(),
            avg_time: times.average(config.iterations),
            max_time: times.max(),
        }
    }

    /// Two flops per swept cell, over the fastest pass.
    pub fn mflops(&self) -> f64 {
        let flops = 2.0 * self.config.rows as f64 * (self.config.cols - 1) as f64;
        if flops == 0.0 {
            0.0
        } else {
            1.0e-6 * flops / self.min_time
        }
    }

    /// Point-to-point messages that carry the wavefront in one pass.
    pub fn synchronizations_per_iteration(&self) -> usize {
        synchronizations_per_iteration(self.ranks, &self.config)
    }

    pub fn synchronizations_per_second(&self) -> f64 {
        match self.synchronizations_per_iteration() {
            0 => 0.0,
            n => n as f64 / self.min_time,
        }
    }

    /// Print the validation and performance lines.
    pub fn write_summary<W: Write>(&self, out: &mut W, verbose: bool) -> io::Result<()> {
        if verbose {
            writeln!(out, "Solution validates; verification value = {:.6}", self.expected)?;
            writeln!(
                out,
                "Point-to-point synchronizations/s: {:.6}",
                self.synchronizations_per_second()
            )?;
        } else {
            writeln!(out, "Solution validates")?;
        }
        writeln!(
            out,
            "Rate (MFlops/s): {:.6}, Avg time (s): {:.6}, Min time (s): {:.6}, Max time (s): {:.6}",
            self.mflops(),
            self.avg_time,
            self.min_time,
            self.max_time
        )
    }
}

pub fn synchronizations_per_iteration(ranks: usize, config: &PipelineConfig) -> usize {
    (ranks - 1) * (config.cols - 1)
}

/// Print the configuration echo that opens the report.
pub fn write_banner<W: Write>(out: &mut W, config: &PipelineConfig, ranks: usize, verbose: bool) -> io::Result<()> {
    writeln!(out, "Pipeline execution on 2D grid")?;
    writeln!(out, "Number of processes            = {}", ranks)?;
    writeln!(out, "Grid sizes                     = {}, {}", config.rows, config.cols)?;
    writeln!(out, "Number of iterations           = {}", config.iterations)?;
    if verbose {
        writeln!(
            out,
            "Synchronizations/iteration     = {}",
            synchronizations_per_iteration(ranks, config)
        )?;
    }
    Ok(())
}
