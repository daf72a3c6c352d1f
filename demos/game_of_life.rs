use std::collections::BTreeSet;
use std::net::SocketAddr;
use std::thread;

use clap::Parser;
use log::{error, info, LevelFilter};
use simple_logger::SimpleLogger;

use gridflow::solver::life::{self, GameOfLife};
use gridflow::{
    ChannelCommunicator, Communicator, Discard, Driver, Error, Grid, Period, PartitionMethod, ResultsSink,
    RunConfig, SnapshotFile, TcpCommunicator, Until,
};

/// Conway's Game of Life on a 15 x 15 grid, checked against the known
/// evolution of a block, a beehive, a beacon, a blinker, a toad and a glider.
#[derive(Clone, Debug, Parser)]
#[clap(version, author = "J. Zrake <jzrake@clemson.edu>")]
struct Opts {
    /// Axis normal to the plane of the game (x, y or z)
    #[clap(long, default_value = "z")]
    direction: char,

    /// Number of steps to run
    #[clap(long, default_value = "25")]
    steps: u64,

    /// Rebalance every N steps (0: only at start, -1: never)
    #[clap(long, default_value = "1", allow_hyphen_values = true)]
    balance_n: i64,

    /// Load balancing method: block (rcb), morton (hsfc) or round-robin (rr)
    #[clap(long, default_value = "rcb")]
    load_balancing_method: PartitionMethod,

    /// Number of in-process ranks, each on its own thread
    #[clap(short, long, default_value = "1")]
    processes: usize,

    /// Rank of this process, when running over TCP
    #[clap(long, requires = "peers")]
    rank: Option<usize>,

    /// Addresses of every process, in rank order, when running over TCP
    #[clap(long, value_delimiter = ',')]
    peers: Vec<SocketAddr>,

    /// Save every step into this directory
    #[clap(long)]
    save: Option<String>,

    #[clap(short, long)]
    verbose: bool,
}

fn normal_axis(direction: char) -> gridflow::Result<usize> {
    match direction {
        'x' => Ok(0),
        'y' => Ok(1),
        'z' => Ok(2),
        d => Err(Error::Configuration(format!("unsupported direction '{}'", d))),
    }
}

fn run<C: Communicator>(comm: C, opts: &Opts) -> gridflow::Result<()> {
    match &opts.save {
        Some(directory) => {
            std::fs::create_dir_all(directory).map_err(|source| Error::Io {
                rank: comm.rank(),
                path: directory.into(),
                source,
            })?;
            play(comm, opts, SnapshotFile::new(directory), Period::Every(1))
        }
        None => play(comm, opts, Discard, Period::Never),
    }
}

fn play<C, K>(comm: C, opts: &Opts, sink: K, save: Period) -> gridflow::Result<()>
where
    C: Communicator,
    K: ResultsSink<life::Life>,
{
    let config = life::reference_config_normal_to(normal_axis(opts.direction)?);
    let grid = Grid::initialize(config, comm.rank(), comm.size())?;
    let run = RunConfig {
        balance: Period::from_count("balance_n", opts.balance_n)?,
        save,
        until: Until::Steps(opts.steps),
        ..RunConfig::default()
    };
    let mut driver = Driver::new(grid, comm, GameOfLife, sink, run)?
        .with_balancer(opts.load_balancing_method)
        .with_initial_condition(life::seed);

    driver.start()?;

    loop {
        let local: Vec<_> = driver.grid().local_payloads().filter(|(_, p)| p.alive).map(|(id, _)| id).collect();
        let alive: BTreeSet<_> = driver.comm().all_gather_value(&local)?.into_iter().flatten().collect();
        let step = driver.clock().step;
        let missing = life::missing_cells(step, &alive);

        if !missing.is_empty() {
            return Err(Error::InvariantViolation(format!("step {}: cells {:?} should be alive", step, missing)));
        }
        if driver.comm().rank() == 0 {
            info!("step {}: {} live cells, {} owned by rank 0", step, alive.len(), driver.grid().num_local());
        }
        if !driver.step()? {
            break;
        }
    }
    driver.finish()?;

    if driver.comm().rank() == 0 {
        info!("PASSED");
    }
    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let opts = Opts::parse();

    SimpleLogger::new()
        .with_level(if opts.verbose { LevelFilter::Debug } else { LevelFilter::Info })
        .init()?;

    if let Some(rank) = opts.rank {
        let comm = TcpCommunicator::connect(rank, opts.peers.clone())?;
        return Ok(run(comm, &opts)?);
    }
    let handles: Vec<_> = ChannelCommunicator::group(opts.processes.max(1))
        .into_iter()
        .map(|comm| {
            let opts = opts.clone();
            thread::spawn(move || run(comm, &opts))
        })
        .collect();

    let mut result = Ok(());

    for handle in handles {
        match handle.join() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                error!("{}", e);
                result = Err(e.into());
            }
            Err(_) => result = Err("a rank panicked".into()),
        }
    }
    result
}
