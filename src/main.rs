use clap::{Parser, ValueEnum};
use log::LevelFilter;
use std::io::{self, Write};
use std::net::SocketAddr;
use std::process::ExitCode;
use std::sync::Mutex;
use std::thread;
use std::time::Duration;
use wavefront::launch::Launcher;
use wavefront::message::{loopback_group, ChannelGroup, Communicator, TcpCommunicator};
use wavefront::{run_rank, BenchmarkReport, BenchmarkRequest, Error, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Transport {
    /// Crossbeam channels between threads of this process
    Channel,
    /// TCP sockets
    Tcp,
}

/// Measures point-to-point synchronization with a pipelined wavefront over
/// an m by n grid.
#[derive(Debug, Parser)]
#[command(name = "wavefront", version)]
struct Cli {
    /// <ITERATIONS> <M> <N>: number of passes, grid rows, grid columns
    #[arg(allow_negative_numbers = true)]
    args: Vec<String>,

    /// Number of ranks to run in this process [default: available parallelism]
    #[arg(short = 'p', long, conflicts_with = "rank")]
    ranks: Option<usize>,

    /// Transport between the ranks of this process
    #[arg(long, value_enum, default_value_t = Transport::Channel)]
    transport: Transport,

    /// Run a single rank of a multi-process TCP group
    #[arg(long, requires = "peers")]
    rank: Option<usize>,

    /// Addresses of every rank of the TCP group, in rank order
    #[arg(long, value_delimiter = ',')]
    peers: Vec<SocketAddr>,

    /// First loopback port when running a TCP group in this process; 0 lets
    /// the system pick free ports
    #[arg(long, default_value_t = 8000)]
    base_port: u16,

    /// Seconds to keep retrying connections to peers that are not up yet
    #[arg(long, default_value_t = 30)]
    connect_timeout: u64,

    /// Pin rank threads to cores
    #[arg(long)]
    pin_threads: bool,

    /// Print synchronization statistics
    #[arg(short, long)]
    verbose: bool,

    /// Also print the report as a line of JSON
    #[arg(long)]
    json: bool,

    /// Enable debug log messages
    #[arg(short, long)]
    debug: bool,
}

/// Configure the logger level and formating string. `RUST_LOG` overrides
/// the level.
fn setup_logger(debug: bool) {
    let level = if debug {
        LevelFilter::Debug
    } else {
        LevelFilter::Warn
    };

    env_logger::builder()
        .filter_level(level)
        .parse_default_env()
        .format(|buf, record| {
            let thread = thread::current();
            writeln!(
                buf,
                "{} [{}]: {}",
                record.level(),
                thread.name().unwrap_or("main"),
                record.args()
            )
        })
        .init();
}

/// Collapse the per-rank results: any failure fails the run, and the
/// timing rank's (the last) error wins.
fn settle(results: Vec<Result<Option<BenchmarkReport>>>) -> Result<Option<BenchmarkReport>> {
    let mut report = None;
    let mut failure = None;

    for (rank, result) in results.into_iter().enumerate() {
        match result {
            Ok(Some(r)) => report = Some(r),
            Ok(None) => {}
            Err(e) => {
                log::debug!("rank {} failed: {}", rank, e);
                failure = Some(e)
            }
        }
    }
    match failure {
        Some(e) => Err(e),
        None => Ok(report),
    }
}

/// Run one rank per communicator, each on its own thread of the launcher.
fn run_ranks<C>(launcher: &Launcher, comms: Vec<C>, request: &BenchmarkRequest, verbose: bool) -> Result<Option<BenchmarkReport>>
where
    C: Communicator + Send,
{
    let slots: Vec<_> = comms.into_iter().map(|comm| Mutex::new(Some(comm))).collect();

    settle(launcher.run(|rank| {
        let comm = slots[rank]
            .lock()
            .ok()
            .and_then(|mut slot| slot.take())
            .ok_or_else(|| Error::Launch(format!("no communicator for rank {}", rank)))?;
        run_rank(&comm, request, verbose, &mut io::stdout())
    }))
}

fn run_in_process(cli: &Cli, request: &BenchmarkRequest) -> Result<Option<BenchmarkReport>> {
    let size = match cli.ranks {
        Some(size) => size,
        None => thread::available_parallelism().map(|n| n.get()).unwrap_or(1),
    };
    let launcher = Launcher::new(size, cli.pin_threads)?;
    log::debug!("launching {} ranks over {:?}", size, cli.transport);

    match cli.transport {
        Transport::Channel => {
            let group = ChannelGroup::new(size);
            let comms = (0..size).map(|rank| group.communicator(rank)).collect();
            run_ranks(&launcher, comms, request, cli.verbose)
        }
        Transport::Tcp => {
            let timeout = Duration::from_secs(cli.connect_timeout);
            let comms = loopback_group(cli.base_port, size, timeout)?;
            run_ranks(&launcher, comms, request, cli.verbose)
        }
    }
}

fn run_single_rank(cli: &Cli, rank: usize, request: &BenchmarkRequest) -> Result<Option<BenchmarkReport>> {
    if rank >= cli.peers.len() {
        return Err(Error::Launch(format!(
            "rank {} is not in a group of {} peers",
            rank,
            cli.peers.len()
        )));
    }
    let timeout = Duration::from_secs(cli.connect_timeout);
    let comm = TcpCommunicator::new(rank, cli.peers.clone(), timeout)?;
    run_rank(&comm, request, cli.verbose, &mut io::stdout())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    setup_logger(cli.debug);

    let request = BenchmarkRequest::new(cli.args.clone());
    let outcome = match cli.rank {
        Some(rank) => run_single_rank(&cli, rank, &request),
        None => run_in_process(&cli, &request),
    };

    match outcome {
        Ok(report) => {
            if let (true, Some(report)) = (cli.json, report) {
                match serde_json::to_string(&report) {
                    Ok(line) => println!("{}", line),
                    Err(e) => {
                        log::error!("could not serialize the report: {}", e);
                        return ExitCode::FAILURE;
                    }
                }
            }
            ExitCode::SUCCESS
        }
        Err(e @ (Error::Launch(_) | Error::Io(_))) => {
            log::error!("{}", e);
            ExitCode::FAILURE
        }
        Err(_) => ExitCode::FAILURE,
    }
}
