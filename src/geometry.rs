use std::sync::OnceLock;

use serde::{Deserialize, Serialize};

use crate::config::GridConfig;
use crate::topology::{CellId, Topology};




/**
 * Position and extent of one cell in physical space
 */
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct CellInfo {
    pub id: CellId,
    pub level: u32,
    pub min: [f64; 3],
    pub length: [f64; 3],
}




// ============================================================================
impl CellInfo {

    pub fn center(&self) -> [f64; 3] {
        [0, 1, 2].map(|a| self.min[a] + 0.5 * self.length[a])
    }

    pub fn max(&self) -> [f64; 3] {
        [0, 1, 2].map(|a| self.min[a] + self.length[a])
    }

    pub fn volume(&self) -> f64 {
        self.length.iter().product()
    }

    /**
     * Return the area of the face shared with a neighbor across the given
     * axis: the smaller of the two cells' lengths on every other axis.
     */
    pub fn face_area(&self, axis: usize, other: &CellInfo) -> f64 {
        (0..3)
            .filter(|&a| a != axis)
            .map(|a| self.length[a].min(other.length[a]))
            .product()
    }

    /**
     * Return the smallest length along the active axes.
     */
    pub fn min_length(&self, active: [bool; 3]) -> f64 {
        (0..3)
            .filter(|&a| active[a])
            .map(|a| self.length[a])
            .fold(f64::INFINITY, f64::min)
    }
}




/**
 * Maps cell ids to physical coordinates. Level-0 cells have a fixed length
 * on each axis; every refinement halves it along the active axes. The table
 * of per-level lengths is filled in on first use.
 */
#[derive(Clone, Debug)]
pub struct Geometry {
    start: [f64; 3],
    cell_length: [f64; 3],
    active: [bool; 3],
    max_level: u32,
    lengths: OnceLock<Vec<[f64; 3]>>,
}




// ============================================================================
impl Geometry {

    pub fn new(config: &GridConfig, topology: &Topology) -> Self {
        Self {
            start: config.start,
            cell_length: config.cell_length,
            active: [0, 1, 2].map(|a| topology.is_active(a)),
            max_level: topology.max_level(),
            lengths: OnceLock::new(),
        }
    }

    pub fn start(&self) -> [f64; 3] {
        self.start
    }

    pub fn active(&self) -> [bool; 3] {
        self.active
    }

    pub fn level_length(&self, level: u32) -> [f64; 3] {
        let table = self.lengths.get_or_init(|| {
            (0..=self.max_level)
                .map(|level| {
                    let scale = 0.5f64.powi(level as i32);
                    [0, 1, 2].map(|a| if self.active[a] { self.cell_length[a] * scale } else { self.cell_length[a] })
                })
                .collect()
        });
        table[level as usize]
    }

    /**
     * Return the physical placement of a cell, or `None` if the id is not
     * one the topology could produce.
     */
    pub fn cell_info(&self, topology: &Topology, id: CellId) -> Option<CellInfo> {
        let (level, index) = topology.locate(id)?;
        let length = self.level_length(level);
        let min = [0, 1, 2].map(|a| self.start[a] + index[a] as f64 * length[a]);
        Some(CellInfo { id, level, min, length })
    }
}




// ============================================================================
#[cfg(test)]
mod test {

    use super::*;

    #[test]
    fn refined_cells_shrink_only_on_active_axes() {
        let config = GridConfig::new([10, 10, 1]).with_max_refinement_level(2);
        let topology = Topology::new(&config).unwrap();
        let geometry = Geometry::new(&config, &topology);

        let cell = geometry.cell_info(&topology, 12).unwrap();
        assert_eq!(cell.level, 0);
        assert!((cell.center()[0] - 0.15).abs() < 1e-12);
        assert!((cell.center()[1] - 0.15).abs() < 1e-12);

        let child = topology.children(12)[3];
        let info = geometry.cell_info(&topology, child).unwrap();
        assert_eq!(info.level, 1);
        assert!((info.length[0] - 0.05).abs() < 1e-12);
        assert!((info.length[2] - 1.0).abs() < 1e-12);
        assert!((info.center()[0] - 0.175).abs() < 1e-12);
        assert!((info.min_length(geometry.active()) - 0.05).abs() < 1e-12);
        assert!((cell.face_area(0, &info) - 0.05).abs() < 1e-12);
        assert_eq!(geometry.cell_info(&topology, 0), None);
    }
}
