//! Dynamic refinement and coarsening.
//!
//! Adaptation happens in three stages. Every rank first evaluates its own
//! cells against a relative-difference criterion. The decisions are then
//! shared, so that every rank can resolve conflicts the same way: the refine
//! set is closed so that no two neighbors end up more than one level apart,
//! and coarsening is only accepted for complete families whose surroundings
//! allow it. Finally, child payloads are interpolated on their owners,
//! sibling payloads are gathered and merged on the owner of the new parent,
//! and the whole batch is applied to the grid at once.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::cell::Payload;
use crate::config::{AdaptConfig, ChildPolicy};
use crate::error::{Error, Result};
use crate::grid::Grid;
use crate::message::Communicator;
use crate::topology::CellId;




/// A payload that can be refined and coarsened. The refinement criterion
/// and the interpolation act on one scalar value of the payload.
///
pub trait Refinable: Payload {

    /// Return the scalar the refinement criterion looks at.
    fn value(&self) -> f64;

    /// Return a copy of this payload with its scalar replaced.
    fn with_value(&self, value: f64) -> Self;

    /// Combine the payloads of a family of siblings, in id order, into the
    /// payload of their parent. The default takes the mean value.
    fn merge(children: &[Self]) -> Self {
        let mean = children.iter().map(Self::value).sum::<f64>() / children.len().max(1) as f64;
        children.first().cloned().unwrap_or_default().with_value(mean)
    }
}




/// What a cell would like to happen to it.
///
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Decision {
    Refine,
    Unrefine,
    Keep,
}




/// The agreed set of changes, identical on every rank.
///
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AdaptationPlan {
    /// Leaves to be replaced by their children.
    pub refine: BTreeSet<CellId>,

    /// Parents whose children are to be replaced by them.
    pub unrefine: BTreeSet<CellId>,
}

impl AdaptationPlan {
    pub fn is_empty(&self) -> bool {
        self.refine.is_empty() && self.unrefine.is_empty()
    }
}




/// Number of cells created and removed over the whole grid.
///
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdaptStats {
    pub created: u64,
    pub removed: u64,
}

impl std::ops::AddAssign for AdaptStats {
    fn add_assign(&mut self, other: Self) {
        self.created += other.created;
        self.removed += other.removed;
    }
}




/// Evaluates, plans and commits grid adaptation.
///
#[derive(Clone, Debug)]
pub struct AdaptationEngine {
    config: AdaptConfig,
}




// ============================================================================
impl AdaptationEngine {

    pub fn new(config: AdaptConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &AdaptConfig {
        &self.config
    }

    /// Decide what should happen to a local cell, from the largest relative
    /// difference between its value and any neighbor's. The neighbors must
    /// be local or have fresh remote copies.
    pub fn evaluate<P: Refinable>(&self, grid: &Grid<P>, id: CellId) -> Result<Decision> {
        let level = grid
            .topology()
            .level_of(id)
            .ok_or_else(|| Error::invariant(format!("cannot evaluate invalid cell {}", id)))?;
        let vc = grid.payload(id)?.value();
        let mut metric: f64 = 0.0;

        for n in grid.neighbors(id) {
            let vn = grid.payload(n.id)?.value();
            let scale = vc.abs().min(vn.abs()).max(self.config.diff_threshold);
            metric = metric.max((vc - vn).abs() / scale);
        }
        let relative_diff = self.config.relative_diff;

        if level < grid.topology().max_level() && metric > relative_diff * (level + 1) as f64 {
            Ok(Decision::Refine)
        } else if level > 0 && metric < relative_diff * level as f64 * self.config.unrefine_sensitivity {
            Ok(Decision::Unrefine)
        } else {
            Ok(Decision::Keep)
        }
    }

    /// Evaluate every local cell, returning only the cells that want to
    /// change.
    pub fn evaluate_local<P: Refinable>(&self, grid: &Grid<P>) -> Result<BTreeMap<CellId, Decision>> {
        let mut decisions = BTreeMap::new();

        for id in grid.local_cells() {
            match self.evaluate(grid, id)? {
                Decision::Keep => {}
                decision => {
                    decisions.insert(id, decision);
                }
            }
        }
        Ok(decisions)
    }

    /// Share the local decisions with every rank and resolve them into a
    /// plan. Collective: every rank must call this, and every rank gets the
    /// same plan.
    pub fn plan_adaptation<P, C>(
        &self,
        grid: &Grid<P>,
        comm: &C,
        decisions: &BTreeMap<CellId, Decision>,
    ) -> Result<AdaptationPlan>
    where
        P: Payload,
        C: Communicator,
    {
        let local: Vec<(CellId, Decision)> = decisions
            .iter()
            .filter(|&(_, &d)| d != Decision::Keep)
            .map(|(&id, &d)| (id, d))
            .collect();

        let mut refine = BTreeSet::new();
        let mut unrefine = BTreeSet::new();

        for (id, decision) in comm.all_gather_value(&local)?.into_iter().flatten() {
            if !grid.contains(id) {
                continue;
            }
            match decision {
                Decision::Refine => {
                    if grid.topology().level_of(id).map_or(false, |l| l < grid.topology().max_level()) {
                        refine.insert(id);
                    }
                }
                Decision::Unrefine => {
                    unrefine.insert(id);
                }
                Decision::Keep => {}
            }
        }
        let refine = Self::close_refinement(grid, refine);
        let unrefine = Self::accept_unrefinement(grid, &refine, &unrefine);

        debug!("adaptation plan: refine {} cells, unrefine {} families", refine.len(), unrefine.len());
        Ok(AdaptationPlan { refine, unrefine })
    }

    /// Add to the refine set every neighbor that would otherwise end up two
    /// levels coarser than a new child.
    fn close_refinement<P: Payload>(grid: &Grid<P>, refine: BTreeSet<CellId>) -> BTreeSet<CellId> {
        let topology = grid.topology();
        let mut closed = refine.clone();
        let mut queue: VecDeque<CellId> = refine.into_iter().collect();

        while let Some(id) = queue.pop_front() {
            let level = topology.level_of(id).unwrap_or(0);

            for n in grid.neighbors_of(id, 1) {
                if topology.level_of(n.id).map_or(false, |l| l < level) && closed.insert(n.id) {
                    queue.push_back(n.id)
                }
            }
        }
        closed
    }

    /// Return the parents of the families that may be coarsened: every
    /// sibling is a leaf marked for unrefinement, and no neighbor of the
    /// parent is marked for refinement or is finer than the siblings.
    fn accept_unrefinement<P: Payload>(
        grid: &Grid<P>,
        refine: &BTreeSet<CellId>,
        unrefine: &BTreeSet<CellId>,
    ) -> BTreeSet<CellId> {
        let topology = grid.topology();
        let parents: BTreeSet<CellId> = unrefine.iter().filter_map(|&id| topology.parent(id)).collect();

        parents
            .into_iter()
            .filter(|&parent| {
                let family = topology.children(parent);
                let level = topology.level_of(parent).unwrap_or(0) + 1;

                family.iter().all(|c| unrefine.contains(c) && !refine.contains(c) && grid.contains(*c))
                    && grid.neighbors_of(parent, 1).iter().all(|n| {
                        !refine.contains(&n.id) && topology.level_of(n.id).map_or(false, |l| l <= level)
                    })
            })
            .collect()
    }

    /// Apply a plan to the grid. Collective: every rank must call this with
    /// the same plan. The remote copies of the neighbors of refined cells
    /// must be fresh, for the interpolation.
    pub fn commit<P, C>(&self, grid: &mut Grid<P>, comm: &C, plan: &AdaptationPlan) -> Result<AdaptStats>
    where
        P: Refinable,
        C: Communicator,
    {
        let rank = grid.rank();
        let children_per_cell = grid.topology().children_per_cell() as u64;

        let mut refined = Vec::new();

        for &id in &plan.refine {
            if grid.is_local(id) {
                refined.push((id, self.child_payloads(grid, id)?));
            }
        }
        let merged = if plan.unrefine.is_empty() {
            BTreeMap::new()
        } else {
            Self::gather_families(grid, comm, plan)?
        };

        let mut removed = Vec::new();
        let mut added = Vec::new();
        let mut local_payloads = refined.into_iter().collect::<BTreeMap<_, _>>();

        for &id in &plan.refine {
            let children = grid.refine(id)?;

            if let Some(payloads) = local_payloads.remove(&id) {
                for (&child, payload) in children.iter().zip(payloads) {
                    grid.insert_local(child, payload)?;
                }
            }
            removed.push(id);
            added.extend(children);
        }

        for &parent in &plan.unrefine {
            let owner = Self::family_owner(grid, parent)?;
            let children = grid.coarsen(parent, owner)?;

            if owner == rank {
                let payload = merged
                    .get(&parent)
                    .cloned()
                    .ok_or_else(|| Error::invariant(format!("no payloads gathered for parent {}", parent)))?;
                grid.insert_local(parent, payload)?;
            }
            removed.extend(children);
            added.push(parent);
        }

        grid.finish_mutation(&removed, &added);
        grid.check_level_invariant()?;

        let stats = AdaptStats {
            created: plan.refine.len() as u64 * children_per_cell + plan.unrefine.len() as u64,
            removed: plan.refine.len() as u64 + plan.unrefine.len() as u64 * children_per_cell,
        };
        if rank == 0 && !plan.is_empty() {
            info!("adapted grid: {} cells created, {} removed, {} leaves", stats.created, stats.removed, grid.partition().len());
        }
        Ok(stats)
    }

    /// Evaluate the local cells, plan and commit. Collective.
    pub fn adapt<P, C>(&self, grid: &mut Grid<P>, comm: &C) -> Result<AdaptStats>
    where
        P: Refinable,
        C: Communicator,
    {
        let decisions = self.evaluate_local(grid)?;
        let plan = self.plan_adaptation(grid, comm, &decisions)?;
        self.commit(grid, comm, &plan)
    }

    /// The new parent goes to the owner of its lowest-id child.
    fn family_owner<P: Payload>(grid: &Grid<P>, parent: CellId) -> Result<usize> {
        grid.topology()
            .children(parent)
            .first()
            .and_then(|&child| grid.owner(child))
            .ok_or_else(|| Error::invariant(format!("family of cell {} has no owner", parent)))
    }

    /// Send every sibling to the owner of its new parent, and merge the
    /// families that arrive here.
    fn gather_families<P, C>(grid: &Grid<P>, comm: &C, plan: &AdaptationPlan) -> Result<BTreeMap<CellId, P>>
    where
        P: Refinable,
        C: Communicator,
    {
        let mut outgoing: Vec<Vec<(CellId, CellId, P)>> = vec![Vec::new(); comm.size()];

        for &parent in &plan.unrefine {
            let owner = Self::family_owner(grid, parent)?;

            for child in grid.topology().children(parent) {
                if grid.is_local(child) {
                    outgoing[owner].push((parent, child, grid.payload(child)?.clone()))
                }
            }
        }
        let mut families: BTreeMap<CellId, Vec<(CellId, P)>> = BTreeMap::new();

        for (parent, child, payload) in comm.all_to_all_value(outgoing)?.into_iter().flatten() {
            families.entry(parent).or_default().push((child, payload))
        }
        let expected = grid.topology().children_per_cell();

        families
            .into_iter()
            .map(|(parent, mut family)| {
                if family.len() != expected {
                    return Err(Error::invariant(format!(
                        "gathered {} of {} children of cell {}", family.len(), expected, parent)));
                }
                family.sort_by_key(|(child, _)| *child);
                let payloads: Vec<P> = family.into_iter().map(|(_, p)| p).collect();
                Ok((parent, P::merge(&payloads)))
            })
            .collect()
    }

    /// Compute the payloads of a local cell's children, in id order.
    fn child_payloads<P: Refinable>(&self, grid: &Grid<P>, id: CellId) -> Result<Vec<P>> {
        let parent = grid.payload(id)?;
        let children = grid.topology().children(id);

        match self.config.children {
            ChildPolicy::Copy => Ok(vec![parent.clone(); children.len()]),
            ChildPolicy::Interpolate => {
                let info = grid
                    .cell_info(id)
                    .ok_or_else(|| Error::invariant(format!("cell {} has no geometry", id)))?;
                let center = info.center();
                let vc = parent.value();
                let slope = self.limited_slopes(grid, id, vc)?;

                children
                    .iter()
                    .map(|&child| {
                        let child_center = grid
                            .cell_info(child)
                            .ok_or_else(|| Error::invariant(format!("cell {} has no geometry", child)))?
                            .center();
                        let value = vc + (0..3).map(|a| slope[a] * (child_center[a] - center[a])).sum::<f64>();
                        Ok(parent.with_value(value))
                    })
                    .collect()
            }
        }
    }

    /// Minmod-limited slope of the value along each active axis, from the
    /// face neighbors on either side. An axis with a missing side has zero
    /// slope.
    fn limited_slopes<P: Refinable>(&self, grid: &Grid<P>, id: CellId, vc: f64) -> Result<[f64; 3]> {
        let info = grid
            .cell_info(id)
            .ok_or_else(|| Error::invariant(format!("cell {} has no geometry", id)))?;
        let mut sides = [[(0.0, 0.0, 0usize); 2]; 3];

        for n in grid.neighbors_of(id, 0) {
            let axis = match (0..3).find(|&a| n.direction[a] != 0) {
                Some(axis) => axis,
                None => continue,
            };
            let side = if n.direction[axis] < 0 { 0 } else { 1 };
            let other = grid
                .cell_info(n.id)
                .ok_or_else(|| Error::invariant(format!("cell {} has no geometry", n.id)))?;
            let distance = 0.5 * (info.length[axis] + other.length[axis]);
            let entry = &mut sides[axis][side];
            entry.0 += grid.payload(n.id)?.value();
            entry.1 += distance;
            entry.2 += 1;
        }
        let mut slope = [0.0; 3];

        for axis in 0..3 {
            let [lower, upper] = sides[axis];

            if lower.2 > 0 && upper.2 > 0 {
                let lower_slope = (vc - lower.0 / lower.2 as f64) / (lower.1 / lower.2 as f64);
                let upper_slope = (upper.0 / upper.2 as f64 - vc) / (upper.1 / upper.2 as f64);
                slope[axis] = minmod(lower_slope, upper_slope);
            }
        }
        Ok(slope)
    }
}

fn minmod(a: f64, b: f64) -> f64 {
    if a * b <= 0.0 {
        0.0
    } else if a > 0.0 {
        a.min(b)
    } else {
        a.max(b)
    }
}
