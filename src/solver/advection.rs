//! Advection of a scalar density in a solid-body rotation about the center
//! of the unit square, with a first order donor-cell upwind scheme. The flux
//! through every face is computed once from each side with the same velocity
//! and upwind value, so the total mass changes by round-off only, across
//! refinement interfaces and periodic boundaries alike.

use std::f64::consts::PI;

use serde::{Deserialize, Serialize};

use super::{Solver, Stencil};
use crate::adapt::Refinable;
use crate::cell::{Fields, Payload};
use crate::error::{Error, Result};
use crate::geometry::CellInfo;
use crate::grid::Grid;
use crate::topology::Topology;




/// The advected density, and the net change applied to it in the last step.
///
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Density {
    pub density: f64,
    pub flux: f64,
}

impl Payload for Density {
    fn transfer(&self, fields: Fields) -> Self {
        match fields {
            Fields::All => *self,
            Fields::State => Density { density: self.density, flux: 0.0 },
        }
    }

    fn receive(&mut self, incoming: Self, fields: Fields) {
        match fields {
            Fields::All => *self = incoming,
            Fields::State => self.density = incoming.density,
        }
    }
}

impl Refinable for Density {
    fn value(&self) -> f64 {
        self.density
    }

    fn with_value(&self, value: f64) -> Self {
        Density { density: value, flux: 0.0 }
    }
}




/// Return the velocity at a point: a counter-clockwise rotation about
/// (0.5, 0.5) with a period of one.
pub fn velocity(x: [f64; 3]) -> [f64; 3] {
    [2.0 * PI * (0.5 - x[1]), 2.0 * PI * (x[0] - 0.5), 0.0]
}

/// LeVeque's rotation test: a slotted cylinder, a cone and a smooth hump,
/// each of radius 0.15, evaluated at a point.
pub fn initial_density(x: [f64; 3]) -> f64 {
    let radius = 0.15;
    let distance = |cx: f64, cy: f64| ((x[0] - cx).powi(2) + (x[1] - cy).powi(2)).sqrt();

    let cylinder = distance(0.5, 0.75);
    let cone = distance(0.5, 0.25);
    let hump = distance(0.25, 0.5);

    if cylinder <= radius {
        if (x[0] - 0.5).abs() >= 0.025 || x[1] >= 0.85 {
            1.0
        } else {
            0.0
        }
    } else if cone <= radius {
        1.0 - cone / radius
    } else if hump <= radius {
        0.25 * (1.0 + (PI * hump / radius).cos())
    } else {
        0.0
    }
}

/// Set every local cell to the initial density at its center.
pub fn initialize(grid: &mut Grid<Density>) -> Result<()> {
    for id in grid.local_cells() {
        if let Some(info) = grid.cell_info(id) {
            *grid.payload_mut(id)? = Density { density: initial_density(info.center()), flux: 0.0 };
        }
    }
    Ok(())
}

/// Return the total mass (density times volume) of the local cells.
pub fn local_mass(grid: &Grid<Density>) -> f64 {
    grid.local_payloads()
        .filter_map(|(id, p)| grid.cell_info(id).map(|info| p.density * info.volume()))
        .sum()
}




/// The donor-cell upwind advection scheme.
///
#[derive(Clone, Copy, Debug)]
pub struct Advection {
    active: [bool; 3],
}

impl Advection {
    /// The scheme moves mass along the given active axes.
    pub fn new(active: [bool; 3]) -> Self {
        Self { active }
    }

    /// Return the outward flux rate (before the `dt / volume` scaling)
    /// through the face shared with a neighbor across `axis`, in the
    /// direction `sign`.
    fn face_flux(cell: &CellInfo, density: f64, other: &CellInfo, other_density: f64, axis: usize, sign: i64) -> f64 {
        // The face lies on the cell's own boundary; along the other axes its
        // center is that of the smaller of the two cells.
        let finer = if other.volume() < cell.volume() { other } else { cell };
        let mut position = finer.center();
        position[axis] = if sign > 0 { cell.max()[axis] } else { cell.min[axis] };

        let normal = sign as f64 * velocity(position)[axis];
        let upwind = if normal > 0.0 { density } else { other_density };

        normal * upwind * cell.face_area(axis, other)
    }
}

impl Solver for Advection {
    type Payload = Density;
    type Delta = f64;

    fn solve(&self, stencil: &Stencil<Density>, dt: f64) -> f64 {
        let cell = &stencil.info;
        let mut outflow = 0.0;

        for n in &stencil.neighbors {
            let face = match n.face {
                Some(face) => face,
                None => continue,
            };
            if let Some(axis) = (0..3).find(|&a| face[a] != 0 && self.active[a]) {
                outflow += Self::face_flux(cell, stencil.payload.density, &n.info, n.payload.density, axis, face[axis]);
            }
        }
        -dt * outflow / cell.volume()
    }

    fn apply(&self, payload: &mut Density, delta: f64) {
        payload.density += delta;
        payload.flux = delta;
    }

    fn validate(&self, topology: &Topology) -> Result<()> {
        // With fewer than three cells, two cells would share a face on
        // either side of a periodic axis.
        for axis in (0..3).filter(|&a| self.active[a] && topology.periodic()[a]) {
            if topology.length()[axis] < 3 {
                return Err(Error::Configuration(format!(
                    "periodic axis {} needs at least 3 cells for advection, not {}",
                    axis, topology.length()[axis])));
            }
        }
        Ok(())
    }

    /// The time for the flow to cross the cell's shortest side.
    fn max_time_step(&self, cell: &CellInfo, _payload: &Density) -> f64 {
        let v = velocity(cell.center());
        let speed = v.iter().map(|c| c * c).sum::<f64>().sqrt();

        if speed > 0.0 {
            cell.min_length(self.active) / speed
        } else {
            f64::INFINITY
        }
    }
}
