//! Immutable parameter bags for the grid, the adaptation engine and the
//! time-stepping driver. Each one is validated once, before the first
//! collective operation, so a bad value fails on every rank independently
//! and without stalling its peers.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::partition::PartitionMethod;




/// Describes the level-0 grid: its shape, boundaries, neighborhood,
/// refinement depth, geometry and initial partition.
///
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GridConfig {
    /// Number of level-0 cells on each axis. An axis with a single cell is
    /// inactive: it is never refined and never contributes neighbors.
    pub length: [u64; 3],

    /// Whether each axis wraps around.
    pub periodic: [bool; 3],

    /// Neighborhood size: 0 for face neighbors, `d` for every cell within
    /// `d` same-size cells along each active axis.
    pub neighborhood: u32,

    /// Maximum refinement level; 0 means the grid is never refined.
    pub max_refinement_level: u32,

    /// Coordinate of the grid's minimum corner.
    pub start: [f64; 3],

    /// Size of a level-0 cell along each axis.
    pub cell_length: [f64; 3],

    /// Method used to assign the initial partition.
    pub partition: PartitionMethod,
}




// ============================================================================
impl GridConfig {

    /// A grid with the given level-0 shape over the unit cube, with face
    /// neighbors, no periodicity, no refinement and a Morton partition.
    pub fn new(length: [u64; 3]) -> Self {
        let cell_length = [
            1.0 / length[0].max(1) as f64,
            1.0 / length[1].max(1) as f64,
            1.0 / length[2].max(1) as f64,
        ];
        Self {
            length,
            periodic: [false; 3],
            neighborhood: 0,
            max_refinement_level: 0,
            start: [0.0; 3],
            cell_length,
            partition: PartitionMethod::Morton,
        }
    }

    pub fn with_periodic(mut self, periodic: [bool; 3]) -> Self {
        self.periodic = periodic;
        self
    }

    pub fn with_neighborhood(mut self, neighborhood: u32) -> Self {
        self.neighborhood = neighborhood;
        self
    }

    pub fn with_max_refinement_level(mut self, level: u32) -> Self {
        self.max_refinement_level = level;
        self
    }

    pub fn with_geometry(mut self, start: [f64; 3], cell_length: [f64; 3]) -> Self {
        self.start = start;
        self.cell_length = cell_length;
        self
    }

    pub fn with_partition(mut self, method: PartitionMethod) -> Self {
        self.partition = method;
        self
    }

    /// Check the geometry parameters. The shape, neighborhood and depth are
    /// checked when the topology is built from this configuration.
    pub fn validate(&self) -> Result<()> {
        for axis in 0..3 {
            let length = self.cell_length[axis];
            if !(length.is_finite() && length > 0.0) {
                return Err(Error::configuration(format!(
                    "level 0 cell length on axis {} must be positive, got {}", axis, length)));
            }
            if !self.start[axis].is_finite() {
                return Err(Error::configuration(format!(
                    "grid start on axis {} must be finite", axis)));
            }
        }
        Ok(())
    }
}




/// How the payload of a new child cell is produced from its parent.
///
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChildPolicy {
    /// Children are exact copies of the parent (discrete state).
    Copy,
    /// Children get the parent's value plus a limited linear correction
    /// (continuous fields).
    Interpolate,
}




/// Thresholds of the refinement criterion.
///
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AdaptConfig {
    /// Relative difference between neighbors above which a level 0 cell is
    /// refined. Level `L` cells need `(L + 1)` times this much.
    pub relative_diff: f64,

    /// Floor applied to the denominator of the relative difference, so that
    /// near-zero values do not register huge relative differences.
    pub diff_threshold: f64,

    /// Fraction of the refinement threshold below which a cell is
    /// unrefined. Must be below one, which leaves a dead band between
    /// refining and unrefining.
    pub unrefine_sensitivity: f64,

    pub children: ChildPolicy,
}

impl Default for AdaptConfig {
    fn default() -> Self {
        Self {
            relative_diff: 0.025,
            diff_threshold: 0.25,
            unrefine_sensitivity: 0.5,
            children: ChildPolicy::Interpolate,
        }
    }
}

impl AdaptConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.relative_diff.is_finite() && self.relative_diff > 0.0) {
            return Err(Error::configuration("relative_diff must be > 0"));
        }
        if !(self.diff_threshold.is_finite() && self.diff_threshold > 0.0) {
            return Err(Error::configuration("diff_threshold must be > 0"));
        }
        if !(0.0..1.0).contains(&self.unrefine_sensitivity) {
            return Err(Error::configuration("unrefine_sensitivity must be >= 0 and < 1"));
        }
        Ok(())
    }
}




/// A periodic schedule for adaptation, load balancing and saving.
///
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Period {
    /// Never run.
    Never,
    /// Run only at the very start.
    AtStart,
    /// Run at the start and on every Nth step.
    Every(u64),
}




// ============================================================================
impl Period {

    /// Interpret a command line count: negative means never, zero means only
    /// at the start, and N means every Nth step. Anything below -1 is
    /// rejected, so that typos do not silently disable a feature.
    pub fn from_count(name: &str, count: i64) -> Result<Self> {
        match count {
            n if n < -1 => Err(Error::configuration(format!("{} must be >= -1, got {}", name, n))),
            -1 => Ok(Period::Never),
            0 => Ok(Period::AtStart),
            n => Ok(Period::Every(n as u64)),
        }
    }

    pub fn at_start(&self) -> bool {
        !matches!(self, Period::Never)
    }

    pub fn is_due(&self, step: u64) -> bool {
        match self {
            Period::Every(n) => step.checked_rem(*n) == Some(0),
            _ => false,
        }
    }
}




/// When the simulation ends.
///
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub enum Until {
    /// Stop once simulated time reaches this value.
    Time(f64),
    /// Stop after this many steps.
    Steps(u64),
}




/// Parameters of the time-stepping driver.
///
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    pub adapt: Period,
    pub balance: Period,
    pub save: Period,

    /// Fraction of the maximum stable time step to use, in (0, 1].
    pub cfl: f64,

    pub until: Until,

    /// Solve inner cells on the rayon thread pool.
    pub parallel: bool,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            adapt: Period::Never,
            balance: Period::Never,
            save: Period::Never,
            cfl: 0.5,
            until: Until::Steps(1),
            parallel: false,
        }
    }
}

impl RunConfig {
    pub fn validate(&self) -> Result<()> {
        for (name, period) in [("adapt", self.adapt), ("balance", self.balance), ("save", self.save)] {
            if period == Period::Every(0) {
                return Err(Error::configuration(format!("{} period must be at least one step", name)));
            }
        }
        if !(self.cfl > 0.0 && self.cfl <= 1.0) {
            return Err(Error::configuration(format!("cfl must be > 0 and <= 1, got {}", self.cfl)));
        }
        if let Until::Time(tmax) = self.until {
            if !(tmax.is_finite() && tmax >= 0.0) {
                return Err(Error::configuration("tmax must be finite and >= 0"));
            }
        }
        Ok(())
    }
}




// ============================================================================
#[cfg(test)]
mod test {

    use super::*;

    #[test]
    fn period_counts_map_to_three_distinct_policies() {
        assert_eq!(Period::from_count("balance_n", -1).unwrap(), Period::Never);
        assert_eq!(Period::from_count("balance_n", 0).unwrap(), Period::AtStart);
        assert_eq!(Period::from_count("balance_n", 3).unwrap(), Period::Every(3));
        assert!(Period::from_count("balance_n", -2).is_err());
    }

    #[test]
    fn period_schedules_are_independent() {
        let never = Period::Never;
        let start = Period::AtStart;
        let every = Period::Every(3);

        assert!(!never.at_start());
        assert!(start.at_start());
        assert!(every.at_start());

        let due: Vec<_> = (0..7).filter(|&s| every.is_due(s)).collect();
        assert_eq!(due, vec![0, 3, 6]);
        assert!((0..7).all(|s| !start.is_due(s) && !never.is_due(s)));
    }

    #[test]
    fn out_of_range_parameters_are_rejected() {
        let run = RunConfig { cfl: 1.5, ..RunConfig::default() };
        assert!(matches!(run.validate(), Err(Error::Configuration(_))));

        let run = RunConfig { cfl: 0.0, ..RunConfig::default() };
        assert!(run.validate().is_err());

        for run in [
            RunConfig { adapt: Period::Every(0), ..RunConfig::default() },
            RunConfig { balance: Period::Every(0), ..RunConfig::default() },
            RunConfig { save: Period::Every(0), ..RunConfig::default() },
        ] {
            assert!(matches!(run.validate(), Err(Error::Configuration(_))));
        }
        assert!(!Period::Every(0).is_due(0));

        let adapt = AdaptConfig { unrefine_sensitivity: 1.0, ..AdaptConfig::default() };
        assert!(adapt.validate().is_err());

        let grid = GridConfig::new([4, 4, 1]).with_geometry([0.0; 3], [0.25, -1.0, 1.0]);
        assert!(grid.validate().is_err());
        assert!(GridConfig::new([4, 4, 1]).validate().is_ok());
    }
}
