//! The time-stepping driver: a state machine that runs one phase of a step
//! at a time, so that communication overlaps with the solution of inner
//! cells, and so that adaptation, output and load balancing happen on their
//! own schedules between steps.

use std::time::Instant;

use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::adapt::{AdaptationEngine, Refinable};
use crate::balance::LoadBalancer;
use crate::cell::Fields;
use crate::config::{AdaptConfig, Period, RunConfig, Until};
use crate::error::{Error, Result};
use crate::grid::Grid;
use crate::halo::HaloExchange;
use crate::message::Communicator;
use crate::partition::PartitionMethod;
use crate::sink::ResultsSink;
use crate::solver::{apply_deltas, compute_deltas, local_max_time_step, Solver};
use crate::topology::CellId;




/// The phases of one step, in the order they run.
///
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    BeginStep,
    IssueHaloExchange,
    SolveInner,
    WaitHalo,
    SolveBoundary,
    ApplyUpdate,
    MaybeAdapt,
    MaybeSave,
    MaybeRebalance,
    AdvanceClock,
    Terminate,
}




/// The simulation's step counter and time.
///
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Clock {
    pub step: u64,
    pub time: f64,
}




/// What one rank did over a run. Cell counts from adaptation and balancing
/// are totals over the whole grid; the rest are this rank's own.
///
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RunStats {
    pub steps: u64,
    pub inner_seconds: f64,
    pub boundary_seconds: f64,
    pub cells_received: u64,
    pub cells_created: u64,
    pub cells_removed: u64,
    pub cells_moved: u64,
}

impl RunStats {
    fn combine(self, other: Self, f: impl Fn(f64, f64) -> f64, g: impl Fn(u64, u64) -> u64) -> Self {
        Self {
            steps: g(self.steps, other.steps),
            inner_seconds: f(self.inner_seconds, other.inner_seconds),
            boundary_seconds: f(self.boundary_seconds, other.boundary_seconds),
            cells_received: g(self.cells_received, other.cells_received),
            cells_created: g(self.cells_created, other.cells_created),
            cells_removed: g(self.cells_removed, other.cells_removed),
            cells_moved: g(self.cells_moved, other.cells_moved),
        }
    }
}

/// The minimum, maximum and sum over all ranks of their run statistics.
///
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub min: RunStats,
    pub max: RunStats,
    pub sum: RunStats,
}




/**
 * Advances a grid in time with a solver. The driver owns the grid and the
 * communicator of its rank; every rank must run its driver through the same
 * sequence of calls.
 */
pub struct Driver<S, C, K>
where
    S: Solver,
    S::Payload: Refinable,
    C: Communicator,
    K: ResultsSink<S::Payload>,
{
    grid: Grid<S::Payload>,
    comm: C,
    solver: S,
    sink: K,
    config: RunConfig,
    halo: HaloExchange,
    adapter: Option<AdaptationEngine>,
    balancer: LoadBalancer,
    initial: Option<Box<dyn Fn(&mut Grid<S::Payload>) -> Result<()>>>,
    phase: Phase,
    started: bool,
    clock: Clock,
    dt: f64,
    step_dt: f64,
    inner: Vec<CellId>,
    boundary: Vec<CellId>,
    deltas: Vec<(CellId, S::Delta)>,
    stats: RunStats,
}




// ============================================================================
impl<S, C, K> Driver<S, C, K>
where
    S: Solver,
    S::Payload: Refinable,
    C: Communicator,
    K: ResultsSink<S::Payload>,
{
    /// Create a driver. Adaptation is off until an adaptation configuration
    /// is given; the balancer uses the grid's partition method until another
    /// is given.
    pub fn new(grid: Grid<S::Payload>, comm: C, solver: S, sink: K, config: RunConfig) -> Result<Self> {
        config.validate()?;
        solver.validate(grid.topology())?;

        if comm.rank() != grid.rank() || comm.size() != grid.size() {
            return Err(Error::configuration(format!(
                "grid is rank {} of {} but the communicator is rank {} of {}",
                grid.rank(), grid.size(), comm.rank(), comm.size())));
        }
        let balancer = LoadBalancer::new(grid.config().partition);

        Ok(Self {
            grid,
            comm,
            solver,
            sink,
            config,
            halo: HaloExchange::new(),
            adapter: None,
            balancer,
            initial: None,
            phase: Phase::BeginStep,
            started: false,
            clock: Clock::default(),
            dt: 0.0,
            step_dt: 0.0,
            inner: Vec::new(),
            boundary: Vec::new(),
            deltas: Vec::new(),
            stats: RunStats::default(),
        })
    }

    pub fn with_adaptation(mut self, config: AdaptConfig) -> Result<Self> {
        self.adapter = Some(AdaptationEngine::new(config)?);
        Ok(self)
    }

    pub fn with_balancer(mut self, method: PartitionMethod) -> Self {
        self.balancer = LoadBalancer::new(method);
        self
    }

    /// Give the driver an initial condition, applied at start-up and again
    /// after every pre-refinement pass.
    pub fn with_initial_condition<F>(mut self, f: F) -> Self
    where
        F: Fn(&mut Grid<S::Payload>) -> Result<()> + 'static,
    {
        self.initial = Some(Box::new(f));
        self
    }

    pub fn grid(&self) -> &Grid<S::Payload> {
        &self.grid
    }

    pub fn comm(&self) -> &C {
        &self.comm
    }

    pub fn sink(&self) -> &K {
        &self.sink
    }

    pub fn halo(&self) -> &HaloExchange {
        &self.halo
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn clock(&self) -> Clock {
        self.clock
    }

    /// The time step the next step will take.
    pub fn dt(&self) -> f64 {
        self.dt
    }

    pub fn stats(&self) -> RunStats {
        self.stats
    }

    pub fn into_grid(self) -> Grid<S::Payload> {
        self.grid
    }

    /// Prepare the grid for the first step. Collective. This balances the
    /// load, applies the initial condition, pre-refines it to the maximum
    /// level, saves the initial state and computes the first time step, each
    /// when the corresponding schedule asks for it.
    pub fn start(&mut self) -> Result<()> {
        if self.started {
            return Ok(());
        }
        if self.config.balance.at_start() {
            self.rebalance()?;
        }
        if let Some(initial) = &self.initial {
            initial(&mut self.grid)?;
        }
        if self.config.adapt.at_start() && self.initial.is_some() {
            for _ in 0..self.grid.topology().max_level() {
                self.adapt()?;

                if let Some(initial) = &self.initial {
                    initial(&mut self.grid)?;
                }
            }
        }
        if self.config.save.at_start() {
            self.save()?;
        }
        self.update_time_step()?;
        self.started = true;

        if self.comm.rank() == 0 {
            info!("starting with {} cells, dt = {:.3e}", self.grid.partition().len(), self.dt);
        }
        Ok(())
    }

    /// Run the current phase and move on to the next one. Returns false once
    /// the run has terminated.
    pub fn advance_phase(&mut self) -> Result<bool> {
        if !self.started {
            self.start()?;
        }
        self.phase = match self.phase {
            Phase::BeginStep => {
                if self.is_done() {
                    Phase::Terminate
                } else {
                    Phase::IssueHaloExchange
                }
            }
            Phase::IssueHaloExchange => {
                self.inner = self.grid.inner_cells();
                self.boundary = self.grid.boundary_cells();
                self.step_dt = self.dt;
                self.halo.begin_update(&mut self.grid, &self.comm, Fields::State)?;
                Phase::SolveInner
            }
            Phase::SolveInner => {
                let start = Instant::now();
                self.deltas = compute_deltas(&self.grid, &self.solver, &self.inner, self.step_dt, self.config.parallel)?;
                self.stats.inner_seconds += start.elapsed().as_secs_f64();
                Phase::WaitHalo
            }
            Phase::WaitHalo => {
                self.halo.wait_receives(&mut self.grid, &self.comm)?;
                self.stats.cells_received += self.halo.stats().last_received;
                Phase::SolveBoundary
            }
            Phase::SolveBoundary => {
                let start = Instant::now();
                let deltas = compute_deltas(&self.grid, &self.solver, &self.boundary, self.step_dt, self.config.parallel)?;
                self.deltas.extend(deltas);
                self.stats.boundary_seconds += start.elapsed().as_secs_f64();
                Phase::ApplyUpdate
            }
            Phase::ApplyUpdate => {
                self.halo.wait_sends(&self.comm)?;
                apply_deltas(&mut self.grid, &self.solver, std::mem::take(&mut self.deltas))?;
                Phase::MaybeAdapt
            }
            Phase::MaybeAdapt => {
                if self.adapter.is_some() && self.config.adapt.is_due(self.clock.step) {
                    self.adapt()?;
                    self.update_time_step()?;
                }
                Phase::MaybeSave
            }
            Phase::MaybeSave => {
                if self.config.save.is_due(self.clock.step + 1) {
                    self.save_at(Clock {
                        step: self.clock.step + 1,
                        time: self.clock.time + self.step_dt,
                    })?;
                }
                Phase::MaybeRebalance
            }
            Phase::MaybeRebalance => {
                if self.config.balance.is_due(self.clock.step) {
                    self.rebalance()?;
                    self.update_time_step()?;
                }
                Phase::AdvanceClock
            }
            Phase::AdvanceClock => {
                self.clock.step += 1;
                self.clock.time += self.step_dt;
                self.stats.steps += 1;
                debug!("rank {} finished step {} at t = {:.4}", self.comm.rank(), self.clock.step, self.clock.time);
                Phase::BeginStep
            }
            Phase::Terminate => Phase::Terminate,
        };
        Ok(self.phase != Phase::Terminate)
    }

    /// Run one complete step, or nothing if the run has terminated. Returns
    /// false once the run has terminated.
    pub fn step(&mut self) -> Result<bool> {
        loop {
            if !self.advance_phase()? {
                return Ok(false);
            }
            if self.phase == Phase::BeginStep {
                return Ok(true);
            }
        }
    }

    /// Run until the end condition is reached, then finish.
    pub fn run(&mut self) -> Result<RunSummary> {
        while self.step()? {}
        self.finish()
    }

    /// Save the final state if saving is scheduled at all, and reduce the
    /// run statistics of every rank. Collective.
    pub fn finish(&mut self) -> Result<RunSummary> {
        if self.config.save != Period::Never && !self.config.save.is_due(self.clock.step) {
            self.save()?;
        }
        let local = self.stats;
        let summary = self.comm.all_reduce_value(RunSummary { min: local, max: local, sum: local }, |a, b| RunSummary {
            min: a.min.combine(b.min, f64::min, u64::min),
            max: a.max.combine(b.max, f64::max, u64::max),
            sum: a.sum.combine(b.sum, |x, y| x + y, |x, y| x + y),
        })?;

        if self.comm.rank() == 0 {
            info!("finished {} steps at t = {:.4} with {} cells", self.clock.step, self.clock.time, self.grid.partition().len());
            info!("inner solve time (s): min {:.4} max {:.4} sum {:.4}",
                summary.min.inner_seconds, summary.max.inner_seconds, summary.sum.inner_seconds);
            info!("boundary solve time (s): min {:.4} max {:.4} sum {:.4}",
                summary.min.boundary_seconds, summary.max.boundary_seconds, summary.sum.boundary_seconds);
            info!("remote cells received: min {} max {} sum {}",
                summary.min.cells_received, summary.max.cells_received, summary.sum.cells_received);
            info!("cells created {}, removed {}, moved {}",
                summary.max.cells_created, summary.max.cells_removed, summary.max.cells_moved);
        }
        Ok(summary)
    }

    fn is_done(&self) -> bool {
        match self.config.until {
            Until::Steps(n) => self.clock.step >= n,
            Until::Time(tmax) => self.clock.time >= tmax,
        }
    }

    /// Refresh the remote copies, then evaluate, plan and commit.
    fn adapt(&mut self) -> Result<()> {
        if let Some(adapter) = &self.adapter {
            self.halo.update(&mut self.grid, &self.comm, Fields::State)?;
            let stats = adapter.adapt(&mut self.grid, &self.comm)?;
            self.stats.cells_created += stats.created;
            self.stats.cells_removed += stats.removed;
        }
        Ok(())
    }

    fn rebalance(&mut self) -> Result<()> {
        let solver = &self.solver;
        let stats = self.balancer.rebalance(&mut self.grid, &self.comm, |info| solver.work(info))?;
        self.stats.cells_moved += stats.cells_moved;
        Ok(())
    }

    fn save(&mut self) -> Result<()> {
        self.save_at(self.clock)
    }

    fn save_at(&mut self, clock: Clock) -> Result<()> {
        let label = format!("{:06}", clock.step);
        self.sink.save(&label, clock, &self.grid, &self.comm)
    }

    /// Take the largest stable time step over all ranks, scaled by the CFL
    /// fraction. Solvers without a stability bound step by one.
    fn update_time_step(&mut self) -> Result<()> {
        let local = local_max_time_step(&self.grid, &self.solver)?;
        let global = self.comm.all_reduce_value(local, f64::min)?;

        self.dt = if global.is_finite() { self.config.cfl * global } else { 1.0 };

        if !(self.dt > 0.0) {
            return Err(Error::invariant(format!("time step {} is not positive", self.dt)));
        }
        Ok(())
    }
}
