//! Whole-group runs of the benchmark, with every rank on its own thread.

use approx::assert_relative_eq;
use std::io;
use std::sync::Mutex;
use std::time::Duration;
use wavefront::launch::Launcher;
use wavefront::message::{loopback_group, merge, ChannelGroup, Communicator, Payload, Tag, Tally};
use wavefront::orchestrator::agree_on_stage;
use wavefront::partition::row_range;
use wavefront::stage::PipelineStage;
use wavefront::{run_rank, BenchmarkReport, BenchmarkRequest, Error, Result};

type Outcome = Result<Option<BenchmarkReport>>;

fn run_group(size: usize, args: &[&str]) -> Vec<Outcome> {
    let launcher = Launcher::new(size, false).unwrap();
    let group = ChannelGroup::new(size);
    let request = BenchmarkRequest::new(args.iter().copied());

    launcher.run(|rank| run_rank(&group.communicator(rank), &request, false, &mut io::sink()))
}

/// The report of a successful run, after checking that only the timing rank
/// produced one.
fn report(outcomes: Vec<Outcome>) -> BenchmarkReport {
    let size = outcomes.len();
    let mut reports: Vec<_> = outcomes
        .into_iter()
        .enumerate()
        .map(|(rank, outcome)| match outcome {
            Ok(report) => {
                assert_eq!(report.is_some(), rank == size - 1);
                report
            }
            Err(e) => panic!("rank {} failed: {}", rank, e),
        })
        .collect();
    reports.pop().flatten().unwrap()
}

fn checksum(size: usize, iterations: usize, rows: usize, cols: usize) -> f64 {
    let args = [iterations.to_string(), rows.to_string(), cols.to_string()];
    let args: Vec<_> = args.iter().map(String::as_str).collect();
    report(run_group(size, &args)).checksum
}

#[test]
fn two_ranks_four_by_four() {
    let report = report(run_group(2, &["1", "4", "4"]));
    assert_eq!(report.checksum, 6.0);
    assert_eq!(report.expected, 6.0);
    assert_eq!(report.ranks, 2);
}

#[test]
fn corner_matches_closed_form() {
    for (size, iterations, rows, cols) in [(1, 1, 1, 2), (2, 5, 7, 9), (3, 4, 10, 3), (4, 2, 4, 50), (5, 10, 23, 17)] {
        assert_relative_eq!(
            checksum(size, iterations, rows, cols),
            (iterations * (rows + cols - 2)) as f64,
            max_relative = 1.0e-8
        );
    }
}

#[test]
fn result_does_not_depend_on_rank_count() {
    let (iterations, rows, cols) = (3, 6, 8);
    let single = checksum(1, iterations, rows, cols);
    assert_eq!(checksum(2, iterations, rows, cols), single);
    assert_eq!(checksum(rows, iterations, rows, cols), single);
}

#[test]
fn single_column_validates_with_zero() {
    let report = report(run_group(1, &["3", "8", "1"]));
    assert_eq!(report.expected, 0.0);
    assert_eq!(report.checksum, 0.0);
    assert_eq!(report.mflops(), 0.0);

    let report = self::report(run_group(4, &["2", "8", "1"]));
    assert_eq!(report.checksum, 0.0);
}

#[test]
fn timing_skips_the_first_pass() {
    let report = report(run_group(2, &["5", "10", "10"]));
    assert!(report.min_time <= report.avg_time);
    assert!(report.avg_time <= report.max_time);
}

#[test]
fn timing_rank_prints_the_report() {
    let launcher = Launcher::new(2, false).unwrap();
    let group = ChannelGroup::new(2);
    let request = BenchmarkRequest::new(["2", "4", "4"]);

    let outputs = launcher.run(|rank| {
        let mut out = Vec::new();
        run_rank(&group.communicator(rank), &request, true, &mut out).unwrap();
        String::from_utf8(out).unwrap()
    });
    assert!(outputs[0].is_empty());
    let text = &outputs[1];
    assert!(text.starts_with("Pipeline execution on 2D grid\n"));
    assert!(text.contains("Number of processes            = 2\n"));
    assert!(text.contains("Synchronizations/iteration     = 3\n"));
    assert!(text.contains("Solution validates; verification value = 12.000000\n"));
    assert!(text.contains("Rate (MFlops/s): "));
}

#[test]
fn sends_and_receives_balance() {
    let (size, iterations, cols) = (4, 3, 6);
    let launcher = Launcher::new(size, false).unwrap();
    let group = ChannelGroup::new(size);
    let request = BenchmarkRequest::new(["3", "9", "6"]);

    let (sent, received): (Vec<_>, Vec<_>) = launcher
        .run(|rank| {
            let comm = Tally::new(group.communicator(rank));
            run_rank(&comm, &request, false, &mut io::sink()).unwrap();
            comm.into_counts()
        })
        .into_iter()
        .unzip();
    let sent = merge(sent);
    let received = merge(received);

    assert_eq!(sent, received);
    for rank in 0..size - 1 {
        for j in 1..cols {
            assert_eq!(sent[&(rank, rank + 1, Tag::Column(j))], iterations);
        }
        assert!(!sent.contains_key(&(rank + 1, rank, Tag::Column(1))));
    }
    assert!(!sent.contains_key(&(0, 1, Tag::Column(cols))));
    assert_eq!(sent[&(size - 1, 0, Tag::Corner)], iterations);
}

#[test]
fn too_few_rows_fails_every_rank() {
    let outcomes = run_group(4, &["1", "2", "5"]);
    assert_eq!(outcomes.len(), 4);
    for outcome in outcomes {
        match outcome {
            Err(Error::Configuration(message)) => {
                assert!(message.contains("smaller than number of processes"))
            }
            other => panic!("expected a configuration error, got {:?}", other.map(|_| ())),
        }
    }
}

#[test]
fn malformed_arguments_fail_every_rank() {
    for args in [&["1", "4"][..], &["0", "4", "4"], &["1", "4", "zero"]] {
        for outcome in run_group(3, args) {
            assert!(matches!(outcome, Err(Error::Configuration(_))));
        }
    }
}

#[test]
fn oversized_grid_fails_every_rank() {
    let cols = i64::MAX.to_string();
    for outcome in run_group(2, &["1", "4", &cols]) {
        assert!(matches!(outcome, Err(Error::Allocation { .. })));
    }
}

#[test]
fn one_rank_failing_allocation_aborts_the_rest() {
    let size = 4;
    let launcher = Launcher::new(size, false).unwrap();

    for failing in 0..size {
        let group = ChannelGroup::new(size);
        let outcomes = launcher.run(|rank| {
            let cols = if rank == failing { usize::MAX / 2 } else { 8 };
            let stage = PipelineStage::allocate(rank, size, row_range(8, size, rank), cols);
            agree_on_stage(&group.communicator(rank), stage).map(|_| ())
        });

        for (rank, outcome) in outcomes.into_iter().enumerate() {
            if rank == failing {
                assert!(matches!(outcome, Err(Error::Allocation { rank: r, .. }) if r == failing));
            } else {
                assert!(matches!(outcome, Err(Error::Aborted(_))));
            }
        }
    }
}

/// Adds one to every ghost value in transit, which breaks the recurrence.
struct Corrupting<C>(C);

impl<C: Communicator> Communicator for Corrupting<C> {
    fn rank(&self) -> usize {
        self.0.rank()
    }

    fn size(&self) -> usize {
        self.0.size()
    }

    fn send(&self, dest: usize, tag: Tag, payload: Payload) -> Result<()> {
        match (tag, payload) {
            (Tag::Column(j), Payload::Scalar(value)) => self.0.send(dest, Tag::Column(j), Payload::Scalar(value + 1.0)),
            (tag, payload) => self.0.send(dest, tag, payload),
        }
    }

    fn recv(&self, source: usize, tag: Tag) -> Result<Payload> {
        self.0.recv(source, tag)
    }

    fn barrier(&self) -> Result<()> {
        self.0.barrier()
    }
}

#[test]
fn verification_failure_fails_every_rank() {
    let launcher = Launcher::new(3, false).unwrap();
    let group = ChannelGroup::new(3);
    let request = BenchmarkRequest::new(["2", "6", "6"]);

    let outcomes = launcher.run(|rank| {
        let comm = Corrupting(group.communicator(rank));
        run_rank(&comm, &request, false, &mut io::sink())
    });
    for outcome in outcomes {
        match outcome {
            Err(Error::Verification { expected, checksum }) => {
                assert_eq!(expected, 20.0);
                assert_ne!(checksum, expected);
            }
            other => panic!("expected a verification error, got {:?}", other.map(|_| ())),
        }
    }
}

#[test]
fn tcp_group_matches_channel_group() {
    let size = 3;
    let comms: Vec<_> = loopback_group(0, size, Duration::from_secs(10))
        .unwrap()
        .into_iter()
        .map(|comm| Mutex::new(Some(comm)))
        .collect();
    let launcher = Launcher::new(size, false).unwrap();
    let request = BenchmarkRequest::new(["4", "7", "5"]);

    let outcomes = launcher.run(|rank| {
        let comm = comms[rank].lock().unwrap().take().unwrap();
        run_rank(&comm, &request, false, &mut io::sink())
    });
    assert_eq!(report(outcomes).checksum, checksum(size, 4, 7, 5));
}

#[test]
fn tcp_group_rejects_bad_config_without_hanging() {
    let size = 3;
    let comms: Vec<_> = loopback_group(0, size, Duration::from_secs(10))
        .unwrap()
        .into_iter()
        .map(|comm| Mutex::new(Some(comm)))
        .collect();
    let launcher = Launcher::new(size, false).unwrap();
    let request = BenchmarkRequest::new(["1", "2", "5"]);

    let outcomes = launcher.run(|rank| {
        let comm = comms[rank].lock().unwrap().take().unwrap();
        run_rank(&comm, &request, false, &mut io::sink())
    });
    assert!(outcomes
        .into_iter()
        .all(|outcome| matches!(outcome, Err(Error::Configuration(_)))));
}

#[test]
fn tcp_group_past_the_last_port_is_a_launch_error() {
    assert!(matches!(
        loopback_group(u16::MAX, 2, Duration::from_secs(1)),
        Err(Error::Launch(_))
    ));
}
