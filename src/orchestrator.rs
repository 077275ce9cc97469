//! Drives the timed pipeline passes on every rank.

use crate::coder::{CborCoder, Coder};
use crate::config::{agree_on_config, timing_rank, BenchmarkRequest, PipelineConfig};
use crate::error::{Error, Result};
use crate::message::{Communicator, Tag};
use crate::partition::row_range;
use crate::report::{self, BenchmarkReport, IterationTimes};
use crate::stage::PipelineStage;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::time::Instant;

/// Relative tolerance of the final checksum.
pub const EPSILON: f64 = 1.0e-8;

/// The exact value the checksum must reach: every pass adds `m + n - 2` to
/// the top-right corner. With a single column there is nothing to sweep and
/// nothing accumulates.
pub fn expected_checksum(config: &PipelineConfig) -> f64 {
    if config.cols == 1 {
        0.0
    } else {
        config.iterations as f64 * (config.rows + config.cols - 2) as f64
    }
}

/// The timing rank's verification result, shared with the whole group.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Verdict {
    pub checksum: f64,
    pub expected: f64,
}

impl Verdict {
    pub fn passed(&self) -> bool {
        if self.expected == 0.0 {
            self.checksum.abs() < EPSILON
        } else {
            ((self.checksum - self.expected) / self.expected).abs() < EPSILON
        }
    }
}

pub struct IterationOrchestrator<'a, C> {
    comm: &'a C,
    config: PipelineConfig,
    stage: PipelineStage,
    /// Present on the timing rank only.
    times: Option<IterationTimes>,
}

impl<'a, C: Communicator> IterationOrchestrator<'a, C> {
    pub fn new(comm: &'a C, config: PipelineConfig, stage: PipelineStage) -> Self {
        let times = (comm.rank() == timing_rank(comm)).then(IterationTimes::new);
        Self {
            comm,
            config,
            stage,
            times,
        }
    }

    pub fn stage(&self) -> &PipelineStage {
        &self.stage
    }

    pub fn times(&self) -> Option<&IterationTimes> {
        self.times.as_ref()
    }

    /// Run all configured passes.
    pub fn run(&mut self) -> Result<()> {
        for iteration in 0..self.config.iterations {
            self.iterate(iteration)?;
        }
        Ok(())
    }

    fn iterate(&mut self, iteration: usize) -> Result<()> {
        self.comm.barrier()?;
        let start = self.times.is_some().then(Instant::now);

        self.stage.sweep(self.comm)?;

        if let (Some(times), Some(start)) = (self.times.as_mut(), start) {
            let elapsed = start.elapsed().as_secs_f64();
            log::trace!("iteration {} took {:.3e} s", iteration, elapsed);

            // The first pass warms up and is left out, unless it is the only one.
            if iteration > 0 || self.config.iterations == 1 {
                times.record(elapsed)
            }
        }
        self.carry_corner()
    }

    /// Feed the negated top-right corner back into rank 0's origin cell, so
    /// the next pass cannot start anywhere before this one has finished
    /// everywhere.
    fn carry_corner(&mut self) -> Result<()> {
        let size = self.comm.size();
        let rank = self.comm.rank();
        let root = timing_rank(self.comm);

        if size == 1 {
            let value = -self.stage.corner();
            self.stage.set_origin(value);
            return Ok(());
        }
        if rank == root {
            self.comm.send_scalar(0, Tag::Corner, -self.stage.corner())?;
        }
        if rank == 0 {
            let value = self.comm.recv_scalar(root, Tag::Corner)?;
            self.stage.set_origin(value);
        }
        Ok(())
    }

    /// Collective: the timing rank checks its corner against the closed form
    /// and broadcasts the verdict, so a mismatch fails every rank.
    pub fn verify(&self) -> Result<Verdict> {
        let root = timing_rank(self.comm);
        let code = CborCoder::<Verdict>::new();

        let bytes = if self.comm.rank() == root {
            let verdict = Verdict {
                checksum: self.stage.corner() - self.stage.boundary_corner(),
                expected: expected_checksum(&self.config),
            };
            Some(code.encode(&verdict)?)
        } else {
            None
        };
        let verdict = code.decode(&self.comm.broadcast(root, bytes)?)?;

        if verdict.passed() {
            Ok(verdict)
        } else {
            Err(Error::Verification {
                checksum: verdict.checksum,
                expected: verdict.expected,
            })
        }
    }
}

/// Collective: every rank allocates its segment and the group votes on the
/// outcome, see [`agree_on_stage`].
pub fn allocate_stage<C: Communicator>(comm: &C, config: &PipelineConfig) -> Result<PipelineStage> {
    let rows = row_range(config.rows, comm.size(), comm.rank());
    let stage = PipelineStage::allocate(comm.rank(), comm.size(), rows, config.cols);

    if let Ok(stage) = &stage {
        log::debug!(
            "rank {} owns rows {:?} of {} by {}",
            comm.rank(),
            stage.rows(),
            config.rows,
            config.cols
        );
    }
    agree_on_stage(comm, stage)
}

/// Collective: vote on this rank's allocation outcome. A rank that failed
/// returns its own error, the others return `Aborted`.
pub fn agree_on_stage<C: Communicator>(comm: &C, stage: Result<PipelineStage>) -> Result<PipelineStage> {
    match (comm.all_agree(stage.is_ok())?, stage) {
        (false, Ok(_)) => Err(Error::Aborted(
            "a peer could not allocate its grid slice".into(),
        )),
        (_, stage) => stage,
    }
}

/// The whole life of one rank: agree on the config, allocate, run the
/// passes, verify and, on the timing rank, write the report to `out`.
///
/// Returns the report on the timing rank and `None` elsewhere. Failures are
/// collective: every rank returns an error, and the timing rank also writes
/// it to `out`.
pub fn run_rank<C, W>(comm: &C, request: &BenchmarkRequest, verbose: bool, out: &mut W) -> Result<Option<BenchmarkReport>>
where
    C: Communicator,
    W: Write,
{
    let result = execute(comm, request, verbose, out);

    if let Err(e) = &result {
        if comm.rank() == timing_rank(comm) {
            writeln!(out, "{}", e)?;
        } else if let Error::Allocation { .. } = e {
            log::error!("{}", e);
        } else {
            log::debug!("rank {} stopping: {}", comm.rank(), e);
        }
    }
    result
}

fn execute<C, W>(comm: &C, request: &BenchmarkRequest, verbose: bool, out: &mut W) -> Result<Option<BenchmarkReport>>
where
    C: Communicator,
    W: Write,
{
    let config = agree_on_config(comm, request)?;
    let is_timing_rank = comm.rank() == timing_rank(comm);

    if is_timing_rank {
        report::write_banner(out, &config, comm.size(), verbose)?;
    }
    let mut stage = allocate_stage(comm, &config)?;
    stage.initialize_boundary();

    let mut orchestrator = IterationOrchestrator::new(comm, config, stage);
    orchestrator.run()?;
    let verdict = orchestrator.verify()?;

    match orchestrator.times() {
        Some(times) => {
            let report = BenchmarkReport::new(comm.size(), config, verdict.checksum, verdict.expected, times);
            report.write_summary(out, verbose)?;
            Ok(Some(report))
        }
        None => Ok(None),
    }
}
