//! Pure id arithmetic for a refinable Cartesian grid.
//!
//! Every cell that could ever exist has a unique id, a function of its
//! refinement level and its index in that level's index space. Level 0 ids
//! start at 1 (0 is the error cell) and run x-fastest; the ids of level `L`
//! follow all the ids of the coarser levels. Nothing in this module knows
//! which cells currently exist: functions that need to, such as the
//! neighbor search, take a leaf predicate.

use crate::config::GridConfig;
use crate::error::{Error, Result};
use crate::index_space::{Index, IndexSpace};

/// Identifier of a cell. Stable across load balancing, retired by
/// refinement and coarsening.
pub type CellId = u64;

/// The id that no cell has.
pub const ERROR_CELL: CellId = 0;

/// Morton keys interleave this many bits per axis into a `u128`.
const MORTON_BITS: u32 = 42;




/// The shape of the refinement tree: level-0 extent, periodicity,
/// neighborhood size and maximum depth.
///
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Topology {
    length: [u64; 3],
    periodic: [bool; 3],
    neighborhood: u32,
    max_level: u32,
    first_offset: Vec<u64>,
}




// ============================================================================
impl Topology {

    pub fn new(config: &GridConfig) -> Result<Self> {
        let length = config.length;
        let max_level = config.max_refinement_level;

        if length.iter().any(|&n| n == 0) {
            return Err(Error::configuration(format!(
                "grid length must be positive on every axis, got {:?}", length)));
        }

        for axis in 0..3 {
            if length[axis] > 1 && !config.periodic[axis] && config.neighborhood as u64 > length[axis] {
                return Err(Error::configuration(format!(
                    "neighborhood size {} exceeds the {} cells of non-periodic axis {}",
                    config.neighborhood, length[axis], axis)));
            }
        }

        let mut first_offset: Vec<u64> = vec![0];

        for level in 0..=max_level {
            let mut count: u64 = 1;

            for &n in &length {
                let n = if n > 1 {
                    n.checked_shl(level)
                        .filter(|m| m >> level == n && *m <= 1 << MORTON_BITS)
                        .ok_or_else(|| Error::configuration(format!(
                            "maximum refinement level {} is too deep for a grid of {:?}", max_level, length)))?
                } else {
                    1
                };
                count = count.checked_mul(n).ok_or_else(|| Error::configuration(
                    format!("too many cells on refinement level {}", level)))?;
            }
            let last = *first_offset.last().unwrap_or(&0);
            let next = last
                .checked_add(count)
                .filter(|&m| m < u64::MAX)
                .ok_or_else(|| Error::configuration("cell ids do not fit in 64 bits"))?;
            first_offset.push(next);
        }

        Ok(Self {
            length,
            periodic: config.periodic,
            neighborhood: config.neighborhood,
            max_level,
            first_offset,
        })
    }

    pub fn length(&self) -> [u64; 3] {
        self.length
    }

    pub fn periodic(&self) -> [bool; 3] {
        self.periodic
    }

    pub fn neighborhood(&self) -> u32 {
        self.neighborhood
    }

    pub fn max_level(&self) -> u32 {
        self.max_level
    }

    /// An axis takes part in refinement and neighbor searches only if it has
    /// more than one level-0 cell.
    pub fn is_active(&self, axis: usize) -> bool {
        self.length[axis] > 1
    }

    pub fn children_per_cell(&self) -> usize {
        1 << (0..3).filter(|&a| self.is_active(a)).count()
    }

    fn refinement_factor(&self) -> [i64; 3] {
        [0, 1, 2].map(|a| if self.is_active(a) { 2 } else { 1 })
    }

    pub fn level_length(&self, level: u32) -> [u64; 3] {
        [0, 1, 2].map(|a| if self.is_active(a) { self.length[a] << level } else { 1 })
    }

    pub fn level_space(&self, level: u32) -> IndexSpace {
        IndexSpace::with_shape(self.level_length(level))
    }

    pub fn cell_count(&self, level: u32) -> u64 {
        self.first_offset[level as usize + 1] - self.first_offset[level as usize]
    }

    /// Iterate over the ids of level 0, in id order.
    pub fn level0_cells(&self) -> impl Iterator<Item = CellId> {
        1..=self.cell_count(0)
    }

    /// Return the id of the cell at the given level and index. The index
    /// must lie within the level's index space.
    pub fn id(&self, level: u32, index: Index) -> CellId {
        1 + self.first_offset[level as usize] + self.level_space(level).linear_offset(index)
    }

    pub fn level_of(&self, id: CellId) -> Option<u32> {
        if id == ERROR_CELL {
            return None;
        }
        let offset = id - 1;
        (0..=self.max_level).find(|&level| {
            offset >= self.first_offset[level as usize] && offset < self.first_offset[level as usize + 1]
        })
    }

    /// Return the level and index of a cell, or `None` for ids that no cell
    /// of this topology could have.
    pub fn locate(&self, id: CellId) -> Option<(u32, Index)> {
        let level = self.level_of(id)?;
        let offset = id - 1 - self.first_offset[level as usize];
        Some((level, self.level_space(level).index_at(offset)))
    }

    pub fn parent(&self, id: CellId) -> Option<CellId> {
        let (level, index) = self.locate(id)?;
        if level == 0 {
            None
        } else {
            Some(self.id(level - 1, self.ancestor_index(index, 1)))
        }
    }

    /// Return the ancestor of the cell at the given (coarser or equal) level.
    pub fn ancestor(&self, id: CellId, level: u32) -> Option<CellId> {
        let (own, index) = self.locate(id)?;
        if level > own {
            None
        } else {
            Some(self.id(level, self.ancestor_index(index, own - level)))
        }
    }

    fn ancestor_index(&self, index: Index, levels_up: u32) -> Index {
        [0, 1, 2].map(|a| if self.is_active(a) { index[a] >> levels_up } else { index[a] })
    }

    /// Return the children of a cell in id order, or nothing for cells at
    /// the maximum refinement level.
    pub fn children(&self, id: CellId) -> Vec<CellId> {
        match self.locate(id) {
            Some((level, index)) if level < self.max_level => {
                let [i, j, k] = index;
                IndexSpace::new(i..i + 1, j..j + 1, k..k + 1)
                    .scale(self.refinement_factor())
                    .iter()
                    .map(|child| self.id(level + 1, child))
                    .collect()
            }
            _ => Vec::new(),
        }
    }

    /// Return the cell together with its siblings, in id order.
    pub fn family(&self, id: CellId) -> Vec<CellId> {
        self.parent(id).map(|p| self.children(p)).unwrap_or_else(|| vec![id])
    }

    /// Return the index of the cell's minimum corner on the finest level.
    pub fn finest_index(&self, id: CellId) -> Option<Index> {
        let (level, index) = self.locate(id)?;
        let shift = self.max_level - level;
        Some([0, 1, 2].map(|a| if self.is_active(a) { index[a] << shift } else { index[a] }))
    }

    /// Return the unit offset, pointing from `id` towards `other`, normal to
    /// the face the two cells share. Cells that meet only along an edge or a
    /// corner, or not at all, share no face.
    pub fn shared_face(&self, id: CellId, other: CellId) -> Option<Index> {
        let (a0, a1) = self.finest_box(id)?;
        let (b0, b1) = self.finest_box(other)?;
        let end = self.level_length(self.max_level);
        let mut face = None;

        for axis in (0..3).filter(|&a| self.is_active(a)) {
            if a0[axis].max(b0[axis]) < a1[axis].min(b1[axis]) {
                continue;
            }
            let wrap = self.periodic[axis];
            let n = end[axis] as i64;

            let sign = if a1[axis] == b0[axis] || (wrap && a1[axis] == n && b0[axis] == 0) {
                1
            } else if a0[axis] == b1[axis] || (wrap && a0[axis] == 0 && b1[axis] == n) {
                -1
            } else {
                return None;
            };
            if face.is_some() {
                return None;
            }
            let mut offset = [0; 3];
            offset[axis] = sign;
            face = Some(offset);
        }
        face
    }

    /// The half-open box a cell covers on the finest level.
    fn finest_box(&self, id: CellId) -> Option<(Index, Index)> {
        let (level, _) = self.locate(id)?;
        let start = self.finest_index(id)?;
        let size = 1i64 << (self.max_level - level);
        Some((start, [0, 1, 2].map(|a| start[a] + if self.is_active(a) { size } else { 1 })))
    }

    /// Return the Morton (Z-order) key of the cell's minimum corner. Sorting
    /// cells by this key lays them out along a space-filling curve.
    pub fn morton_key(&self, id: CellId) -> Option<u128> {
        let index = self.finest_index(id)?;
        let mut key = 0u128;

        for bit in 0..MORTON_BITS {
            for (axis, &i) in index.iter().enumerate() {
                key |= (((i as u128) >> bit) & 1) << (3 * bit as usize + axis);
            }
        }
        Some(key)
    }

    /// Return the direction offsets that make up a neighborhood, in the
    /// order neighbors are reported. Distance 0 yields the face directions
    /// (-x, +x, -y, +y, -z, +z); distance `d` yields every offset of the
    /// `(2d + 1)` box along active axes, x-fastest, except the cell itself.
    pub fn offsets(&self, distance: u32) -> Vec<Index> {
        if distance == 0 {
            (0..3)
                .filter(|&a| self.is_active(a))
                .flat_map(|a| [-1, 1].map(move |s| {
                    let mut offset = [0; 3];
                    offset[a] = s;
                    offset
                }))
                .collect()
        } else {
            let d = distance as i64;
            IndexSpace::new(0..1, 0..1, 0..1)
                .extend([0, 1, 2].map(|a| if self.is_active(a) { d } else { 0 }))
                .iter()
                .filter(|offset| offset != &[0, 0, 0])
                .collect()
        }
    }

    /// Move an index by an offset on the given level, wrapping periodic axes.
    /// Returns `None` if the result falls off a non-periodic axis.
    pub fn shift(&self, level: u32, index: Index, offset: Index) -> Option<Index> {
        let shape = self.level_length(level);
        let mut result = [0; 3];

        for a in 0..3 {
            let n = shape[a] as i64;
            let i = index[a] + offset[a];

            result[a] = if (0..n).contains(&i) {
                i
            } else if self.periodic[a] && self.is_active(a) {
                i.rem_euclid(n)
            } else {
                return None;
            };
        }
        Some(result)
    }

    /// Return the leaves that cover the cell-sized box at the given level and
    /// index: the box itself, the coarser leaf containing it, or every finer
    /// leaf inside it.
    pub fn covering_leaves<F>(&self, level: u32, index: Index, is_leaf: &F) -> Vec<CellId>
    where
        F: Fn(CellId) -> bool,
    {
        let id = self.id(level, index);

        if is_leaf(id) {
            return vec![id];
        }
        for up in 1..=level {
            let ancestor = self.id(level - up, self.ancestor_index(index, up));
            if is_leaf(ancestor) {
                return vec![ancestor];
            }
        }
        let mut leaves = Vec::new();
        self.collect_leaves(id, is_leaf, &mut leaves);
        leaves
    }

    fn collect_leaves<F>(&self, id: CellId, is_leaf: &F, leaves: &mut Vec<CellId>)
    where
        F: Fn(CellId) -> bool,
    {
        for child in self.children(id) {
            if is_leaf(child) {
                leaves.push(child)
            } else {
                self.collect_leaves(child, is_leaf, leaves)
            }
        }
    }

    /// Find the neighbors of a leaf within the given distance, de-duplicated
    /// and in search order, each with the direction through which it was
    /// first found. The cell itself is never reported, even when a periodic
    /// axis wraps onto it.
    pub fn neighbors<F>(&self, id: CellId, distance: u32, is_leaf: &F) -> Vec<(CellId, Index)>
    where
        F: Fn(CellId) -> bool,
    {
        let (level, index) = match self.locate(id) {
            Some(located) => located,
            None => return Vec::new(),
        };
        let mut result: Vec<(CellId, Index)> = Vec::new();

        for offset in self.offsets(distance) {
            if let Some(shifted) = self.shift(level, index, offset) {
                for leaf in self.covering_leaves(level, shifted, is_leaf) {
                    if distance == 0 && !self.touches_face(level, shifted, offset, leaf) {
                        continue;
                    }
                    if leaf != id && !result.iter().any(|(n, _)| *n == leaf) {
                        result.push((leaf, offset))
                    }
                }
            }
        }
        result
    }

    /// Determine whether a leaf inside the box at `(level, index)` lies
    /// against the face that box shares with the cell it was reached from
    /// through the unit offset `offset`. Leaves at or above `level` cover
    /// the whole box.
    fn touches_face(&self, level: u32, index: Index, offset: Index, leaf: CellId) -> bool {
        let (leaf_level, leaf_index) = match self.locate(leaf) {
            Some(located) if located.0 > level => located,
            _ => return true,
        };
        let depth = leaf_level - level;

        (0..3).filter(|&a| offset[a] != 0).all(|a| {
            let local = leaf_index[a] - (index[a] << depth);
            if offset[a] > 0 { local == 0 } else { local == (1 << depth) - 1 }
        })
    }
}




// ============================================================================
#[cfg(test)]
mod test {

    use super::*;
    use std::collections::BTreeSet;

    fn topology(length: [u64; 3], max_level: u32) -> Topology {
        Topology::new(&GridConfig::new(length).with_max_refinement_level(max_level)).unwrap()
    }

    #[test]
    fn level_zero_ids_are_one_based_and_x_fastest() {
        let t = topology([15, 15, 1], 0);
        assert_eq!(t.id(0, [0, 0, 0]), 1);
        assert_eq!(t.id(0, [2, 2, 0]), 33);
        assert_eq!(t.locate(33), Some((0, [2, 2, 0])));
        assert_eq!(t.level0_cells().count(), 225);
        assert_eq!(t.level_of(226), None);
        assert_eq!(t.level_of(ERROR_CELL), None);
    }

    #[test]
    fn inactive_axes_are_not_refined() {
        let t = topology([4, 4, 1], 2);
        assert_eq!(t.children_per_cell(), 4);
        assert_eq!(t.level_length(2), [16, 16, 1]);
        assert_eq!(t.cell_count(1), 64);

        let children = t.children(1);
        assert_eq!(children.len(), 4);
        for child in &children {
            assert_eq!(t.parent(*child), Some(1));
            assert_eq!(t.level_of(*child), Some(1));
            assert_eq!(t.family(*child), children);
        }
        assert!(t.children(t.children(children[0])[0]).is_empty());
    }

    #[test]
    fn ancestors_and_finest_index_agree() {
        let t = topology([4, 4, 1], 2);
        let grandchild = t.children(t.children(6)[3])[3];
        assert_eq!(t.ancestor(grandchild, 0), Some(6));
        assert_eq!(t.ancestor(grandchild, 1), Some(t.children(6)[3]));
        assert_eq!(t.finest_index(6), Some([4, 4, 0]));
        assert_eq!(t.finest_index(grandchild), Some([7, 7, 0]));
        assert!(t.morton_key(6).unwrap() < t.morton_key(grandchild).unwrap());
    }

    #[test]
    fn face_and_box_offsets_skip_inactive_axes() {
        let t = topology([4, 4, 1], 0);
        assert_eq!(t.offsets(0), vec![[-1, 0, 0], [1, 0, 0], [0, -1, 0], [0, 1, 0]]);
        assert_eq!(t.offsets(1).len(), 8);
        assert_eq!(t.offsets(2).len(), 24);
    }

    #[test]
    fn neighbors_on_uniform_grid_respect_periodicity() {
        let config = GridConfig::new([5, 5, 1]).with_neighborhood(1);
        let t = Topology::new(&config).unwrap();
        let leaf = |id: CellId| t.level_of(id) == Some(0);

        assert_eq!(t.neighbors(1, 1, &leaf).len(), 3);
        assert_eq!(t.neighbors(7, 1, &leaf).len(), 8);

        let periodic = Topology::new(&config.with_periodic([true, true, false])).unwrap();
        let ids: BTreeSet<_> = periodic.neighbors(1, 1, &leaf).into_iter().map(|(n, _)| n).collect();
        assert_eq!(ids.len(), 8);
        assert!(ids.contains(&25));
        assert!(ids.contains(&5));
    }

    #[test]
    fn single_cell_periodic_axis_never_reports_itself() {
        let config = GridConfig::new([1, 1, 1]).with_periodic([true; 3]).with_neighborhood(1);
        let t = Topology::new(&config).unwrap();
        assert!(t.neighbors(1, 1, &|id| id == 1).is_empty());
    }

    #[test]
    fn neighbors_across_refinement_levels() {
        let t = topology([3, 3, 1], 1);
        let refined: Vec<_> = t.children(5);
        let leaf = |id: CellId| (id != 5 && t.level_of(id) == Some(0)) || refined.contains(&id);

        // The center cell is refined; its west neighbor sees two children
        // through the +x face.
        let west = t.neighbors(4, 0, &leaf);
        let east_face: Vec<_> = west.iter().filter(|(_, d)| *d == [1, 0, 0]).map(|(n, _)| *n).collect();
        assert_eq!(east_face.len(), 2);
        assert!(east_face.iter().all(|n| refined.contains(n)));

        // A child sees the coarse cell once per face.
        let child = t.neighbors(refined[0], 0, &leaf);
        assert!(child.iter().any(|(n, d)| *n == 4 && *d == [-1, 0, 0]));
        assert!(child.iter().any(|(n, d)| *n == 2 && *d == [0, -1, 0]));
        assert!(child.iter().any(|(n, _)| *n == refined[1]));
    }

    #[test]
    fn shared_faces_come_from_geometry_not_search_order() {
        let t = topology([3, 3, 1], 1);
        let refined: Vec<_> = t.children(5);
        let leaf = |id: CellId| (id != 5 && t.level_of(id) == Some(0)) || refined.contains(&id);

        // Every child of the refined cell lies in the +x box of its west
        // neighbor, but only the near column touches the face.
        for (n, d) in t.neighbors(4, 1, &leaf).into_iter().filter(|(n, _)| refined.contains(n)) {
            assert_eq!(d, [1, 0, 0]);
            let near = n == refined[0] || n == refined[2];
            assert_eq!(t.shared_face(4, n), if near { Some([1, 0, 0]) } else { None });
        }

        // The coarse west cell is first found through a diagonal box, yet it
        // shares the child's -x face.
        let child = t.neighbors(refined[2], 1, &leaf);
        assert!(child.contains(&(4, [-1, -1, 0])));
        assert_eq!(t.shared_face(refined[2], 4), Some([-1, 0, 0]));
        assert_eq!(t.shared_face(4, refined[2]), Some([1, 0, 0]));

        // Cells meeting at a corner share no face.
        assert_eq!(t.shared_face(refined[0], 1), None);

        let periodic = Topology::new(&GridConfig::new([3, 3, 1]).with_periodic([true, false, false])).unwrap();
        assert_eq!(periodic.shared_face(1, 3), Some([-1, 0, 0]));
        assert_eq!(periodic.shared_face(3, 1), Some([1, 0, 0]));
        assert_eq!(periodic.shared_face(1, 9), None);
    }

    #[test]
    fn invalid_shapes_are_configuration_errors() {
        assert!(Topology::new(&GridConfig::new([0, 4, 1])).is_err());
        assert!(Topology::new(&GridConfig::new([3, 4, 1]).with_neighborhood(4)).is_err());
        assert!(Topology::new(&GridConfig::new([3, 4, 1]).with_neighborhood(4).with_periodic([true, true, false])).is_ok());
        assert!(Topology::new(&GridConfig::new([1 << 20, 1 << 20, 1]).with_max_refinement_level(40)).is_err());
    }
}
