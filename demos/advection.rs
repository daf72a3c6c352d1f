use std::net::SocketAddr;
use std::thread;

use clap::Parser;
use log::{error, info, LevelFilter};
use simple_logger::SimpleLogger;

use gridflow::solver::advection::{self, Advection};
use gridflow::{
    AdaptConfig, ChannelCommunicator, ChildPolicy, Communicator, Driver, Error, Grid, GridConfig, PartitionMethod,
    Period, RunConfig, SnapshotFile, TcpCommunicator, Until,
};

/// Advection of a slotted cylinder, a cone and a hump in a solid-body
/// rotation about the center of the unit square, on an adaptive grid.
#[derive(Clone, Debug, Parser)]
#[clap(version, author = "J. Zrake <jzrake@clemson.edu>")]
struct Opts {
    /// Number of level 0 cells along each axis
    #[clap(long, default_value = "100")]
    cells: u64,

    /// Maximum refinement level
    #[clap(long, default_value = "2")]
    max_ref_lvl: u32,

    /// Relative difference between neighbors above which cells are refined
    #[clap(long, default_value = "0.025")]
    relative_diff: f64,

    /// Smallest denominator used in the relative difference
    #[clap(long, default_value = "0.25")]
    diff_threshold: f64,

    /// Fraction of the refinement threshold below which cells are unrefined
    #[clap(long, default_value = "0.5")]
    unrefine_sensitivity: f64,

    /// Save every N steps (0: only at start and end, -1: never)
    #[clap(long, default_value = "0", allow_hyphen_values = true)]
    save_n: i64,

    /// Simulation end time; one full rotation takes a time of one
    #[clap(long, default_value = "1.0")]
    tmax: f64,

    /// Load balancing method: block (rcb), morton (hsfc) or round-robin (rr)
    #[clap(long, default_value = "rcb")]
    load_balancing_method: PartitionMethod,

    /// Rebalance every N steps (0: only at start, -1: never)
    #[clap(long, default_value = "25", allow_hyphen_values = true)]
    balance_n: i64,

    /// Adapt the grid every N steps (0: only at start, -1: never)
    #[clap(long, default_value = "1", allow_hyphen_values = true)]
    adapt_n: i64,

    /// Fraction of the largest stable time step to use
    #[clap(long, default_value = "0.5")]
    cfl: f64,

    /// Make both axes periodic
    #[clap(long)]
    periodic: bool,

    /// Number of in-process ranks, each on its own thread
    #[clap(short, long, default_value = "1")]
    processes: usize,

    /// Rank of this process, when running over TCP
    #[clap(long, requires = "peers")]
    rank: Option<usize>,

    /// Addresses of every process, in rank order, when running over TCP
    #[clap(long, value_delimiter = ',')]
    peers: Vec<SocketAddr>,

    /// Directory for snapshot files
    #[clap(long, default_value = "advection-output")]
    save: String,

    #[clap(short, long)]
    verbose: bool,
}

fn run<C: Communicator>(comm: C, opts: &Opts) -> gridflow::Result<()> {
    let grid_config = GridConfig::new([opts.cells, opts.cells, 1])
        .with_periodic([opts.periodic, opts.periodic, false])
        .with_max_refinement_level(opts.max_ref_lvl)
        .with_partition(opts.load_balancing_method);

    // The criterion is given for the whole depth of the grid.
    let adapt_config = AdaptConfig {
        relative_diff: opts.relative_diff / opts.max_ref_lvl.max(1) as f64,
        diff_threshold: opts.diff_threshold,
        unrefine_sensitivity: opts.unrefine_sensitivity,
        children: ChildPolicy::Interpolate,
    };
    let save = Period::from_count("save_n", opts.save_n)?;
    let run_config = RunConfig {
        adapt: if opts.max_ref_lvl > 0 { Period::from_count("adapt_n", opts.adapt_n)? } else { Period::Never },
        balance: Period::from_count("balance_n", opts.balance_n)?,
        save,
        cfl: opts.cfl,
        until: Until::Time(opts.tmax),
        parallel: true,
    };
    if save != Period::Never {
        std::fs::create_dir_all(&opts.save).map_err(|source| Error::Io {
            rank: comm.rank(),
            path: opts.save.clone().into(),
            source,
        })?;
    }
    let grid = Grid::initialize(grid_config, comm.rank(), comm.size())?;
    let solver = Advection::new(grid.geometry().active());
    let mut driver = Driver::new(grid, comm, solver, SnapshotFile::new(&opts.save), run_config)?
        .with_adaptation(adapt_config)?
        .with_balancer(opts.load_balancing_method)
        .with_initial_condition(advection::initialize);

    driver.start()?;
    let initial_mass = driver.comm().all_reduce_value(advection::local_mass(driver.grid()), |a, b| a + b)?;

    let summary = driver.run()?;
    let final_mass = driver.comm().all_reduce_value(advection::local_mass(driver.grid()), |a, b| a + b)?;

    if driver.comm().rank() == 0 {
        info!("{} steps, {} cells", summary.max.steps, driver.grid().partition().len());
        info!("mass: initial {:.12e}, final {:.12e}, relative change {:.3e}",
            initial_mass, final_mass, (final_mass - initial_mass) / initial_mass);
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
