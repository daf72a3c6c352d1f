//! Conway's Game of Life on a (possibly refined) grid. The rule is applied
//! the same way at every refinement level: a cell counts its live neighbors,
//! is born with exactly three and survives with two or three.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use super::{Solver, Stencil};
use crate::adapt::Refinable;
use crate::cell::{Fields, Payload};
use crate::config::GridConfig;
use crate::error::Result;
use crate::grid::Grid;
use crate::topology::CellId;




/// The state of one cell. The neighbor count of the last step is kept for
/// inspection, but only the alive flag travels in state halo rounds.
///
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Life {
    pub alive: bool,
    pub live_neighbors: u32,
}

impl Payload for Life {
    fn transfer(&self, fields: Fields) -> Self {
        match fields {
            Fields::All => *self,
            Fields::State => Life { alive: self.alive, live_neighbors: 0 },
        }
    }

    fn receive(&mut self, incoming: Self, fields: Fields) {
        match fields {
            Fields::All => *self = incoming,
            Fields::State => self.alive = incoming.alive,
        }
    }
}

impl Refinable for Life {
    fn value(&self) -> f64 {
        if self.alive { 1.0 } else { 0.0 }
    }

    fn with_value(&self, value: f64) -> Self {
        Life { alive: value >= 0.5, live_neighbors: self.live_neighbors }
    }
}




/// The Game of Life rule.
///
#[derive(Clone, Copy, Debug, Default)]
pub struct GameOfLife;

impl Solver for GameOfLife {
    type Payload = Life;
    type Delta = u32;

    fn solve(&self, stencil: &Stencil<Life>, _dt: f64) -> u32 {
        stencil.neighbors.iter().filter(|n| n.payload.alive).count() as u32
    }

    fn apply(&self, payload: &mut Life, live_neighbors: u32) {
        payload.alive = live_neighbors == 3 || (payload.alive && live_neighbors == 2);
        payload.live_neighbors = live_neighbors;
    }
}




/// The reference pattern lives on a 15 x 15 grid without periodic
/// boundaries, where every cell sees the 8 cells around it.
pub fn reference_config() -> GridConfig {
    reference_config_normal_to(2)
}

/// The reference grid, lying in the plane normal to the given axis. Cell ids
/// do not depend on the orientation, so neither does the pattern.
pub fn reference_config_normal_to(axis: usize) -> GridConfig {
    let mut length = [15; 3];
    length[axis.min(2)] = 1;
    GridConfig::new(length).with_neighborhood(1)
}

const BLOCK: [CellId; 4] = [32, 33, 47, 48];
const BEEHIVE: [CellId; 6] = [22, 23, 36, 39, 52, 53];
const BEACON: [CellId; 8] = [94, 95, 109, 110, 122, 123, 137, 138];
const BLINKER: [CellId; 3] = [198, 199, 200];
const TOAD: [CellId; 6] = [188, 189, 190, 204, 205, 206];
const GLIDER: [CellId; 5] = [113, 114, 115, 130, 144];

/// Return the live cells of the reference pattern: a block, a beehive, a
/// beacon, a blinker, a toad and a glider.
pub fn seed_cells() -> BTreeSet<CellId> {
    [&BLOCK[..], &BEEHIVE[..], &BEACON[..], &BLINKER[..], &TOAD[..], &GLIDER[..]]
        .concat()
        .into_iter()
        .collect()
}

/// Bring the local cells of a reference grid to life.
pub fn seed(grid: &mut Grid<Life>) -> Result<()> {
    for id in seed_cells() {
        if grid.is_local(id) {
            grid.payload_mut(id)?.alive = true;
        }
    }
    Ok(())
}

const ALWAYS_ALIVE: [CellId; 19] = [
    22, 23, 32, 33, 36, 39, 47, 48, 52, 53, 94, 95, 110, 122, 137, 138, 188, 199, 206,
];
const ALIVE_ON_EVEN_STEPS: [CellId; 8] = [109, 123, 189, 190, 198, 200, 204, 205];
const ALIVE_ON_ODD_STEPS: [CellId; 4] = [174, 184, 214, 220];

/// Return the cells that must be alive after the given number of steps of
/// the reference pattern. The glider is only tracked on steps 20 to 24,
/// before it reaches the edge of the grid.
pub fn expected_alive(step: u64) -> BTreeSet<CellId> {
    let mut cells: BTreeSet<CellId> = ALWAYS_ALIVE.into_iter().collect();

    if step % 2 == 0 {
        cells.extend(ALIVE_ON_EVEN_STEPS)
    } else {
        cells.extend(ALIVE_ON_ODD_STEPS)
    }
    let glider: &[CellId] = match step {
        20 => &[43, 44, 45, 60, 74],
        21 => &[29, 44, 45, 58, 60],
        22 => &[29, 30, 43, 45, 60],
        23 => &[29, 30, 45, 59],
        24 => &[29, 30, 45],
        _ => &[],
    };
    cells.extend(glider);
    cells
}

/// Return the expected live cells that are dead in the given set.
pub fn missing_cells(step: u64, alive: &BTreeSet<CellId>) -> Vec<CellId> {
    expected_alive(step).difference(alive).copied().collect()
}




// ============================================================================
#[cfg(test)]
mod test {

    use super::*;
    use crate::message::ChannelCommunicator;
    use crate::halo::HaloExchange;
    use crate::solver::{apply_deltas, compute_deltas};

    #[test]
    fn rule_is_birth_on_three_and_survival_on_two_or_three() {
        let mut cell = Life::default();
        GameOfLife.apply(&mut cell, 3);
        assert!(cell.alive);
        GameOfLife.apply(&mut cell, 2);
        assert!(cell.alive);
        GameOfLife.apply(&mut cell, 4);
        assert!(!cell.alive);
        GameOfLife.apply(&mut cell, 2);
        assert!(!cell.alive);
    }

    #[test]
    fn state_rounds_carry_only_the_alive_flag() {
        let cell = Life { alive: true, live_neighbors: 5 };
        let mut copy = Life { alive: false, live_neighbors: 1 };
        copy.receive(cell.transfer(Fields::State), Fields::State);
        assert_eq!(copy, Life { alive: true, live_neighbors: 1 });
    }

    #[test]
    fn reference_pattern_evolves_on_one_rank() {
        let comm = ChannelCommunicator::group(1).pop().unwrap();
        let mut grid = Grid::initialize(reference_config(), 0, 1).unwrap();
        let mut halo = HaloExchange::new();
        seed(&mut grid).unwrap();

        for step in 0..25 {
            let alive: BTreeSet<_> = grid.local_payloads().filter(|(_, p)| p.alive).map(|(id, _)| id).collect();
            assert!(missing_cells(step, &alive).is_empty(), "step {}: {:?}", step, missing_cells(step, &alive));

            halo.update(&mut grid, &comm, Fields::State).unwrap();
            let cells = grid.local_cells();
            let deltas = compute_deltas(&grid, &GameOfLife, &cells, 1.0, false).unwrap();
            apply_deltas(&mut grid, &GameOfLife, deltas).unwrap();
        }
    }

    #[test]
    fn pattern_does_not_depend_on_the_plane() {
        let comm = ChannelCommunicator::group(1).pop().unwrap();
        let mut grid = Grid::initialize(reference_config_normal_to(0), 0, 1).unwrap();
        let mut halo = HaloExchange::new();
        seed(&mut grid).unwrap();

        for _ in 0..4 {
            halo.update(&mut grid, &comm, Fields::State).unwrap();
            let cells = grid.local_cells();
            let deltas = compute_deltas(&grid, &GameOfLife, &cells, 1.0, true).unwrap();
            apply_deltas(&mut grid, &GameOfLife, deltas).unwrap();
        }
        let alive: BTreeSet<_> = grid.local_payloads().filter(|(_, p)| p.alive).map(|(id, _)| id).collect();
        assert!(missing_cells(4, &alive).is_empty());
    }
}
