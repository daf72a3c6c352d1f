//! Local solvers and the two-pass execution that drives them.
//!
//! A solve pass reads the pre-update payloads of a set of cells and their
//! neighbors and returns one delta per cell; nothing is written until the
//! commit pass applies all the deltas. The result of a step therefore never
//! depends on the order in which cells are visited, and the read pass can
//! run on the rayon thread pool.

pub mod advection;
pub mod life;

use rayon::prelude::*;

use crate::cell::Payload;
use crate::error::{Error, Result};
use crate::geometry::CellInfo;
use crate::grid::Grid;
use crate::index_space::Index;
use crate::topology::{CellId, Topology};




/**
 * A neighbor as seen from the cell being solved
 */
pub struct Adjacent<'a, P> {
    pub info: CellInfo,
    pub direction: Index,
    pub face: Option<Index>,
    pub payload: &'a P,
}




/**
 * Everything a solver may read to compute one cell's update: the cell
 * itself, and its neighbors in the grid's neighbor order
 */
pub struct Stencil<'a, P> {
    pub info: CellInfo,
    pub payload: &'a P,
    pub neighbors: Vec<Adjacent<'a, P>>,
}




/**
 * Interface for the numerical (or discrete) update of one cell. The solver
 * is shared between threads during the parallel read pass, so it must be
 * `Sync`; deltas are carried back from worker threads, so they must be
 * `Send`.
 */
pub trait Solver: Sync {

    type Payload: Payload;

    /// The change to one cell computed by a solve pass.
    type Delta: Send;

    /// Compute the update for the stencil's cell, over a time step `dt`.
    fn solve(&self, stencil: &Stencil<Self::Payload>, dt: f64) -> Self::Delta;

    /// Commit a previously computed update.
    fn apply(&self, payload: &mut Self::Payload, delta: Self::Delta);

    /// Return the largest stable time step for this cell. Discrete solvers
    /// have no such bound.
    fn max_time_step(&self, _cell: &CellInfo, _payload: &Self::Payload) -> f64 {
        f64::INFINITY
    }

    /// Return an estimate of the cost of solving this cell, used to weight
    /// the load balance.
    fn work(&self, _cell: &CellInfo) -> f64 {
        1.0
    }

    /// Reject grids the scheme cannot run on. Called once, before the first
    /// step.
    fn validate(&self, _topology: &Topology) -> Result<()> {
        Ok(())
    }
}




/**
 * Gather the stencil of a local cell. Every neighbor must be local or have a
 * fresh remote copy.
 */
pub fn stencil<P: Payload>(grid: &Grid<P>, id: CellId) -> Result<Stencil<P>> {
    if !grid.is_local(id) {
        return Err(Error::invariant(format!("rank {} cannot solve cell {}: not local", grid.rank(), id)));
    }
    let info = cell_info(grid, id)?;
    let payload = grid.payload(id)?;

    let neighbors = grid
        .neighbors(id)
        .map(|n| {
            Ok(Adjacent {
                info: cell_info(grid, n.id)?,
                direction: n.direction,
                face: n.face,
                payload: grid.payload(n.id)?,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(Stencil { info, payload, neighbors })
}

fn cell_info<P: Payload>(grid: &Grid<P>, id: CellId) -> Result<CellInfo> {
    grid.cell_info(id)
        .ok_or_else(|| Error::invariant(format!("cell {} has no geometry", id)))
}




/**
 * Run the read pass over the given local cells. Payloads are not modified;
 * the deltas come back in the order of `cells`.
 */
pub fn compute_deltas<S: Solver>(
    grid: &Grid<S::Payload>,
    solver: &S,
    cells: &[CellId],
    dt: f64,
    parallel: bool,
) -> Result<Vec<(CellId, S::Delta)>> {
    let solve = |&id: &CellId| -> Result<(CellId, S::Delta)> {
        Ok((id, solver.solve(&stencil(grid, id)?, dt)))
    };
    if parallel {
        cells.par_iter().map(solve).collect()
    } else {
        cells.iter().map(solve).collect()
    }
}




/**
 * Run the commit pass: apply every delta to its (local) cell.
 */
pub fn apply_deltas<S: Solver>(
    grid: &mut Grid<S::Payload>,
    solver: &S,
    deltas: Vec<(CellId, S::Delta)>,
) -> Result<()> {
    for (id, delta) in deltas {
        solver.apply(grid.payload_mut(id)?, delta)
    }
    Ok(())
}




/**
 * Return the smallest `max_time_step` over the local cells.
 */
pub fn local_max_time_step<S: Solver>(grid: &Grid<S::Payload>, solver: &S) -> Result<f64> {
    let mut dt = f64::INFINITY;

    for (id, payload) in grid.local_payloads() {
        dt = dt.min(solver.max_time_step(&cell_info(grid, id)?, payload))
    }
    Ok(dt)
}
