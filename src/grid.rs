//! The cell arena of one rank.
//!
//! A `Grid` holds the replicated partition (whose keys are the leaf cells),
//! the payloads of the cells this rank owns, read-only copies of remote
//! cells delivered by the halo exchange, and a cache of each local cell's
//! neighbors. Cells refer to each other by id only; the arena is the single
//! owner of every payload.

use std::collections::{BTreeSet, HashMap};

use log::debug;

use crate::adjacency_list::AdjacencyList;
use crate::cell::{Fields, Neighbor, Payload, Residence};
use crate::config::GridConfig;
use crate::error::{Error, Result};
use crate::geometry::{CellInfo, Geometry};
use crate::index_space::Index;
use crate::partition::Partition;
use crate::topology::{CellId, Topology};




struct Slot<P> {
    residence: Residence,
    payload: P,
}




/// One rank's view of a distributed, refinable grid.
///
pub struct Grid<P: Payload> {
    rank: usize,
    config: GridConfig,
    topology: Topology,
    geometry: Geometry,
    partition: Partition,
    slots: HashMap<CellId, Slot<P>>,
    neighbors: AdjacencyList<CellId, (Index, Option<Index>)>,
    epoch: u64,
}




// ============================================================================
impl<P: Payload> Grid<P> {

    /// Build the level-0 grid for rank `rank` of `size`, partition it with
    /// the configured method, and give every local cell a default payload.
    /// Every rank computes the same partition, so no communication is
    /// needed.
    pub fn initialize(config: GridConfig, rank: usize, size: usize) -> Result<Self> {
        if size == 0 || rank >= size {
            return Err(Error::configuration(format!("rank {} is not in a group of {}", rank, size)));
        }
        config.validate()?;

        let topology = Topology::new(&config)?;
        let geometry = Geometry::new(&config, &topology);
        let weights: Vec<_> = topology.level0_cells().map(|id| (id, 1.0)).collect();
        let partition = Partition::new(size, config.partition.assign(&topology, &weights, size));

        let slots = partition
            .owned_by(rank)
            .map(|id| (id, Slot { residence: Residence::Local, payload: P::default() }))
            .collect();

        let mut grid = Self {
            rank,
            config,
            topology,
            geometry,
            partition,
            slots,
            neighbors: AdjacencyList::new(),
            epoch: 0,
        };
        grid.rebuild_neighbors();

        debug!("rank {} owns {} of {} level 0 cells", rank, grid.num_local(), grid.partition.len());
        Ok(grid)
    }

    pub fn rank(&self) -> usize {
        self.rank
    }

    pub fn size(&self) -> usize {
        self.partition.size()
    }

    pub fn config(&self) -> &GridConfig {
        &self.config
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    pub fn geometry(&self) -> &Geometry {
        &self.geometry
    }

    pub fn partition(&self) -> &Partition {
        &self.partition
    }

    /// A counter that increases with every change to the cell set or to cell
    /// ownership. Anything derived from the grid's structure, such as a halo
    /// exchange plan, is stale once the epoch moves on.
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Determine whether the given id is currently a leaf cell (on any rank).
    pub fn contains(&self, id: CellId) -> bool {
        self.partition.contains(id)
    }

    pub fn owner(&self, id: CellId) -> Option<usize> {
        self.partition.owner(id)
    }

    pub fn is_local(&self, id: CellId) -> bool {
        self.owner(id) == Some(self.rank)
    }

    /// Return the cells owned by this rank, in id order.
    pub fn local_cells(&self) -> Vec<CellId> {
        self.partition.owned_by(self.rank).collect()
    }

    pub fn num_local(&self) -> usize {
        self.partition.owned_by(self.rank).count()
    }

    /// Return the ids of the remote copies currently held, in id order.
    pub fn remote_cells(&self) -> Vec<CellId> {
        let mut ids: Vec<_> = self
            .slots
            .iter()
            .filter(|(_, slot)| slot.residence != Residence::Local)
            .map(|(&id, _)| id)
            .collect();
        ids.sort_unstable();
        ids
    }

    pub fn residence(&self, id: CellId) -> Option<Residence> {
        self.slots.get(&id).map(|slot| slot.residence)
    }

    pub fn cell_info(&self, id: CellId) -> Option<CellInfo> {
        self.geometry.cell_info(&self.topology, id)
    }

    /// Find the neighbors of any leaf cell within the given distance, in
    /// search order. Distance 0 means face neighbors only.
    pub fn neighbors_of(&self, id: CellId, distance: u32) -> Vec<Neighbor> {
        let is_leaf = |c: CellId| self.partition.contains(c);
        self.topology
            .neighbors(id, distance, &is_leaf)
            .into_iter()
            .map(|(n, direction)| Neighbor { id: n, direction, face: self.topology.shared_face(id, n) })
            .collect()
    }

    /// Return the cached neighbors of a local cell, for the configured
    /// neighborhood size.
    pub fn neighbors(&self, id: CellId) -> impl Iterator<Item = Neighbor> + '_ {
        self.neighbors
            .outgoing_edges(&id)
            .map(|&(id, (direction, face))| Neighbor { id, direction, face })
    }

    /// Local cells whose neighbors are all local too. They can be solved
    /// before any remote data arrives.
    pub fn inner_cells(&self) -> Vec<CellId> {
        self.local_cells()
            .into_iter()
            .filter(|&id| self.neighbors(id).all(|n| self.is_local(n.id)))
            .collect()
    }

    /// Local cells with at least one remote neighbor.
    pub fn boundary_cells(&self) -> Vec<CellId> {
        self.local_cells()
            .into_iter()
            .filter(|&id| self.neighbors(id).any(|n| !self.is_local(n.id)))
            .collect()
    }

    /// Return the payload of a local cell, or of a remote cell whose copy is
    /// fresh. Reading anything else is a logic error.
    pub fn payload(&self, id: CellId) -> Result<&P> {
        match self.slots.get(&id) {
            Some(Slot { residence: Residence::Local, payload })
            | Some(Slot { residence: Residence::Remote { fresh: true }, payload }) => Ok(payload),
            Some(_) => Err(Error::invariant(format!("rank {}: remote copy of cell {} is stale", self.rank, id))),
            None => Err(Error::invariant(format!("rank {}: no copy of cell {}", self.rank, id))),
        }
    }

    /// Return the payload of a local cell for writing. Remote copies are
    /// never writable.
    pub fn payload_mut(&mut self, id: CellId) -> Result<&mut P> {
        match self.slots.get_mut(&id) {
            Some(Slot { residence: Residence::Local, payload }) => Ok(payload),
            _ => Err(Error::invariant(format!("rank {}: cell {} is not local", self.rank, id))),
        }
    }

    /// Iterate over the local cells and their payloads, in no particular
    /// order.
    pub fn local_payloads(&self) -> impl Iterator<Item = (CellId, &P)> {
        self.slots
            .iter()
            .filter(|(_, slot)| slot.residence == Residence::Local)
            .map(|(&id, slot)| (id, &slot.payload))
    }

    /// Check that the partition owns every leaf exactly once: no leaf is an
    /// ancestor of another, the leaves tile the level-0 grid, every owner is
    /// in range, and this rank holds a payload for every cell it owns.
    pub fn check_partition(&self) -> Result<()> {
        let per_level = self.topology.children_per_cell() as u128;
        let finest = per_level.pow(self.topology.max_level());
        let mut covered: u128 = 0;

        for id in self.partition.cells() {
            let level = self
                .topology
                .level_of(id)
                .ok_or_else(|| Error::invariant(format!("partition holds invalid cell id {}", id)))?;

            for up in 0..level {
                if let Some(ancestor) = self.topology.ancestor(id, up) {
                    if self.partition.contains(ancestor) {
                        return Err(Error::invariant(format!("cell {} and its ancestor {} are both leaves", id, ancestor)));
                    }
                }
            }
            covered += finest / per_level.pow(level);
        }
        let expected = self.topology.cell_count(0) as u128 * finest;

        if covered != expected {
            return Err(Error::invariant(format!(
                "leaves cover {} of {} finest-level cells", covered, expected)));
        }
        self.partition.validate(self.partition.cells())?;

        for id in self.partition.owned_by(self.rank) {
            if self.residence(id) != Some(Residence::Local) {
                return Err(Error::invariant(format!("rank {} owns cell {} but holds no payload for it", self.rank, id)));
            }
        }
        let num_local_slots = self.slots.values().filter(|s| s.residence == Residence::Local).count();

        if num_local_slots != self.num_local() {
            return Err(Error::invariant(format!("rank {} holds payloads for cells it does not own", self.rank)));
        }
        Ok(())
    }

    /// Check that no two leaves within distance 1 of each other differ by
    /// more than one refinement level.
    pub fn check_level_invariant(&self) -> Result<()> {
        for id in self.partition.cells() {
            let level = self.topology.level_of(id).unwrap_or(0);

            for n in self.neighbors_of(id, 1) {
                let other = self.topology.level_of(n.id).unwrap_or(0);

                if level.abs_diff(other) > 1 {
                    return Err(Error::invariant(format!(
                        "cell {} on level {} neighbors cell {} on level {}", id, level, n.id, other)));
                }
            }
        }
        Ok(())
    }
}




// ============================================================================
impl<P: Payload> Grid<P> {

    /// Store a copy of a remote cell delivered by the halo exchange.
    pub(crate) fn receive_remote(&mut self, id: CellId, incoming: P, fields: Fields) -> Result<()> {
        if self.is_local(id) {
            return Err(Error::invariant(format!("rank {} received a copy of its own cell {}", self.rank, id)));
        }
        let slot = self.slots.entry(id).or_insert_with(|| Slot {
            residence: Residence::Remote { fresh: false },
            payload: P::default(),
        });
        slot.payload.receive(incoming, fields);
        slot.residence = Residence::Remote { fresh: true };
        Ok(())
    }

    /// Mark every remote copy as out of date.
    pub(crate) fn mark_remote_stale(&mut self) {
        for slot in self.slots.values_mut() {
            if let Residence::Remote { fresh } = &mut slot.residence {
                *fresh = false
            }
        }
    }

    pub(crate) fn clear_remote(&mut self) {
        self.slots.retain(|_, slot| slot.residence == Residence::Local)
    }

    /// Give a local cell a payload; the cell must be owned by this rank.
    pub(crate) fn insert_local(&mut self, id: CellId, payload: P) -> Result<()> {
        if !self.is_local(id) {
            return Err(Error::invariant(format!("rank {} cannot hold cell {} owned by {:?}", self.rank, id, self.owner(id))));
        }
        self.slots.insert(id, Slot { residence: Residence::Local, payload });
        Ok(())
    }

    /// Remove a local cell's payload, leaving ownership untouched.
    pub(crate) fn take_local(&mut self, id: CellId) -> Option<P> {
        match self.slots.get(&id) {
            Some(slot) if slot.residence == Residence::Local => self.slots.remove(&id).map(|slot| slot.payload),
            _ => None,
        }
    }

    /// Replace a leaf by its children, which inherit the leaf's owner. Local
    /// children get default payloads. Returns the children in id order.
    pub(crate) fn refine(&mut self, id: CellId) -> Result<Vec<CellId>> {
        let owner = self
            .owner(id)
            .ok_or_else(|| Error::invariant(format!("cannot refine cell {}: not a leaf", id)))?;
        let children = self.topology.children(id);

        if children.is_empty() {
            return Err(Error::invariant(format!("cannot refine cell {}: at maximum refinement level", id)));
        }
        self.partition.remove(id);
        self.slots.remove(&id);

        for &child in &children {
            self.partition.assign(child, owner);

            if owner == self.rank {
                self.slots.insert(child, Slot { residence: Residence::Local, payload: P::default() });
            }
        }
        Ok(children)
    }

    /// Replace a complete family of leaves by their parent, owned by the
    /// given rank. A local parent gets a default payload. Returns the removed
    /// children.
    pub(crate) fn coarsen(&mut self, parent: CellId, owner: usize) -> Result<Vec<CellId>> {
        let children = self.topology.children(parent);

        if children.is_empty() || children.iter().any(|&c| !self.partition.contains(c)) {
            return Err(Error::invariant(format!("cannot coarsen cell {}: its children are not all leaves", parent)));
        }
        for &child in &children {
            self.partition.remove(child);
            self.slots.remove(&child);
        }
        self.partition.assign(parent, owner);

        if owner == self.rank {
            self.slots.insert(parent, Slot { residence: Residence::Local, payload: P::default() });
        }
        Ok(children)
    }

    /// Install a new owner for every leaf, keeping the leaf set unchanged.
    pub(crate) fn reassign(&mut self, partition: Partition) -> Result<()> {
        partition.validate(self.partition.cells())?;
        self.partition = partition;
        Ok(())
    }

    /// Bring the neighbor cache up to date after cells were removed and
    /// added, and move on to a new epoch. Only local cells that listed a
    /// removed cell as a neighbor, and local added cells, are searched again.
    pub(crate) fn finish_mutation(&mut self, removed: &[CellId], added: &[CellId]) {
        let mut affected: BTreeSet<CellId> = added.iter().copied().filter(|&id| self.is_local(id)).collect();

        for id in removed {
            affected.extend(self.neighbors.incoming_edges(id).copied().filter(|&n| self.is_local(n)));
        }
        for id in removed {
            self.neighbors.remove_vertex(id);
        }
        for id in affected {
            self.neighbors.remove_outgoing(&id);
            self.cache_neighbors(id);
        }
        self.epoch += 1;
    }

    /// Rebuild the neighbor cache from scratch and move on to a new epoch.
    pub(crate) fn finish_repartition(&mut self) {
        self.rebuild_neighbors();
        self.epoch += 1;
    }

    fn rebuild_neighbors(&mut self) {
        self.neighbors.clear();

        for id in self.local_cells() {
            self.cache_neighbors(id)
        }
    }

    fn cache_neighbors(&mut self, id: CellId) {
        for n in self.neighbors_of(id, self.config.neighborhood) {
            self.neighbors.insert(id, n.id, (n.direction, n.face))
        }
    }
}




// ============================================================================
#[cfg(test)]
mod test {

    use super::*;
    use crate::partition::PartitionMethod;

    type TestGrid = Grid<u64>;

    impl Payload for u64 {}

    fn grid(rank: usize, size: usize) -> TestGrid {
        let config = GridConfig::new([4, 4, 1])
            .with_neighborhood(1)
            .with_max_refinement_level(2)
            .with_partition(PartitionMethod::Block);
        Grid::initialize(config, rank, size).unwrap()
    }

    #[test]
    fn initial_grid_is_partitioned_and_cached() {
        let g = grid(0, 2);
        assert_eq!(g.partition().len(), 16);
        assert_eq!(g.local_cells(), (1..=8).collect::<Vec<_>>());
        assert!(g.check_partition().is_ok());
        assert!(g.check_level_invariant().is_ok());
        assert_eq!(g.neighbors(1).count(), 3);
        assert_eq!(g.neighbors(6).count(), 8);
        assert_eq!(g.inner_cells(), vec![1, 2, 3, 4]);
        assert_eq!(g.boundary_cells(), vec![5, 6, 7, 8]);
    }

    #[test]
    fn bad_rank_or_shape_is_rejected() {
        assert!(TestGrid::initialize(GridConfig::new([4, 4, 1]), 2, 2).is_err());
        assert!(TestGrid::initialize(GridConfig::new([4, 0, 1]), 0, 1).is_err());
    }

    #[test]
    fn remote_copies_are_readable_only_while_fresh() {
        let mut g = grid(0, 2);
        assert!(g.payload(9).is_err());

        g.receive_remote(9, 42, Fields::All).unwrap();
        assert_eq!(*g.payload(9).unwrap(), 42);
        assert!(g.payload_mut(9).is_err());

        g.mark_remote_stale();
        assert!(g.payload(9).is_err());
        assert!(g.receive_remote(1, 0, Fields::All).is_err());

        g.clear_remote();
        assert!(g.remote_cells().is_empty());
    }

    #[test]
    fn refine_and_coarsen_keep_the_grid_consistent() {
        let mut g = grid(0, 1);
        *g.payload_mut(6).unwrap() = 7;

        let children = g.refine(6).unwrap();
        g.finish_mutation(&[6], &children);
        assert_eq!(g.epoch(), 1);
        assert!(g.check_partition().is_ok());
        assert!(g.check_level_invariant().is_ok());
        assert!(g.payload(6).is_err());
        assert!(g.neighbors(1).any(|n| n.id == children[0]));
        assert!(g.neighbors(7).all(|n| n.id != 6));

        // Refining the corner child twice would leave cell 1 two levels
        // coarser than its new neighbors.
        let grandchildren = g.refine(children[0]).unwrap();
        g.finish_mutation(&[children[0]], &grandchildren);
        assert!(g.check_level_invariant().is_err());

        let removed = g.coarsen(children[0], 0).unwrap();
        g.finish_mutation(&removed, &[children[0]]);
        assert!(g.check_level_invariant().is_ok());

        let removed = g.coarsen(6, 0).unwrap();
        g.finish_mutation(&removed, &[6]);
        assert!(g.check_partition().is_ok());
        assert_eq!(g.neighbors(6).count(), 8);
        assert!(g.neighbors(1).any(|n| n.id == 6));
        assert_eq!(g.epoch(), 4);
    }

    #[test]
    fn invalid_mutations_are_invariant_violations() {
        let mut g = grid(0, 1);
        assert!(matches!(g.coarsen(6, 0), Err(Error::InvariantViolation(_))));
        assert!(g.refine(1000).is_err());

        let children = g.refine(6).unwrap();
        let grandchildren = g.refine(children[0]).unwrap();
        assert!(g.refine(grandchildren[0]).is_err());
        assert!(g.coarsen(6, 0).is_err());
    }
}
