use std::collections::BTreeMap;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::topology::{CellId, Topology};




/// The strategy used to split the leaf cells among ranks. Every method is a
/// pure function of the cell list, its weights and the number of ranks, so
/// all ranks compute the same partition independently.
///
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PartitionMethod {
    /// Deal cells out in id order, ignoring their weights.
    RoundRobin,

    /// Contiguous runs of cells in id order, split by weight.
    Block,

    /// Contiguous runs along the Morton space-filling curve, split by weight.
    Morton,
}




// ============================================================================
impl PartitionMethod {

    /// Assign each (cell, weight) pair to a rank in `0..size`.
    pub fn assign(&self, topology: &Topology, cells: &[(CellId, f64)], size: usize) -> BTreeMap<CellId, usize> {
        let mut order: Vec<(CellId, f64)> = cells.to_vec();

        match self {
            PartitionMethod::RoundRobin => {
                order.sort_by_key(|(id, _)| *id);
                return order
                    .into_iter()
                    .enumerate()
                    .map(|(n, (id, _))| (id, n % size))
                    .collect();
            }
            PartitionMethod::Block => {
                order.sort_by_key(|(id, _)| *id)
            }
            PartitionMethod::Morton => {
                order.sort_by_key(|(id, _)| (topology.morton_key(*id).unwrap_or(u128::MAX), *id))
            }
        }
        weighted_split(&order, size)
    }
}

/// Cut an ordered list of weighted cells into `size` contiguous runs of
/// roughly equal weight. Each cell goes to the rank whose share of the total
/// contains the midpoint of the cell's weight. Without any weight the cells
/// are split into runs of equal count.
fn weighted_split(order: &[(CellId, f64)], size: usize) -> BTreeMap<CellId, usize> {
    let total: f64 = order.iter().map(|(_, w)| w.max(0.0)).sum();
    let n = order.len();
    let mut cumulative = 0.0;

    order
        .iter()
        .enumerate()
        .map(|(i, &(id, w))| {
            let rank = if total > 0.0 {
                let w = w.max(0.0);
                let rank = ((cumulative + 0.5 * w) * size as f64 / total).floor() as usize;
                cumulative += w;
                rank
            } else {
                i * size / n
            };
            (id, rank.min(size - 1))
        })
        .collect()
}

impl FromStr for PartitionMethod {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "rcb" | "block" => Ok(PartitionMethod::Block),
            "morton" | "hsfc" | "sfc" => Ok(PartitionMethod::Morton),
            "rr" | "round-robin" | "roundrobin" => Ok(PartitionMethod::RoundRobin),
            _ => Err(Error::configuration(format!("unknown load balancing method '{}'", s))),
        }
    }
}




/// The owner of every leaf cell. It is replicated on all ranks; its key set
/// is exactly the set of leaf cells in the grid.
///
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Partition {
    size: usize,
    owners: BTreeMap<CellId, usize>,
}




// ============================================================================
impl Partition {

    pub fn new(size: usize, owners: BTreeMap<CellId, usize>) -> Self {
        Self { size, owners }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn len(&self) -> usize {
        self.owners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.owners.is_empty()
    }

    pub fn owner(&self, id: CellId) -> Option<usize> {
        self.owners.get(&id).copied()
    }

    pub fn contains(&self, id: CellId) -> bool {
        self.owners.contains_key(&id)
    }

    pub fn assign(&mut self, id: CellId, rank: usize) {
        self.owners.insert(id, rank);
    }

    pub fn remove(&mut self, id: CellId) -> Option<usize> {
        self.owners.remove(&id)
    }

    /// Iterate over all leaf cells in id order.
    pub fn cells(&self) -> impl Iterator<Item = CellId> + '_ {
        self.owners.keys().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (CellId, usize)> + '_ {
        self.owners.iter().map(|(&id, &rank)| (id, rank))
    }

    /// Iterate over the cells owned by one rank, in id order.
    pub fn owned_by(&self, rank: usize) -> impl Iterator<Item = CellId> + '_ {
        self.owners.iter().filter(move |&(_, &r)| r == rank).map(|(&id, _)| id)
    }

    /// Return the number of cells owned by each rank.
    pub fn counts(&self) -> Vec<usize> {
        let mut counts = vec![0; self.size];
        for &rank in self.owners.values() {
            if rank < self.size {
                counts[rank] += 1
            }
        }
        counts
    }

    /// Check that this partition covers exactly the expected cells, each
    /// with exactly one owner in range.
    pub fn validate<I>(&self, expected: I) -> Result<()>
    where
        I: IntoIterator<Item = CellId>,
    {
        let mut count = 0;

        for id in expected {
            match self.owner(id) {
                None => return Err(Error::invariant(format!("cell {} has no owner", id))),
                Some(rank) if rank >= self.size => {
                    return Err(Error::invariant(format!("cell {} is owned by rank {} of {}", id, rank, self.size)))
                }
                Some(_) => count += 1,
            }
        }
        if count != self.owners.len() {
            return Err(Error::invariant(format!(
                "partition has {} cells, expected {}", self.owners.len(), count)));
        }
        Ok(())
    }
}




// ============================================================================
#[cfg(test)]
mod test {

    use super::*;
    use crate::config::GridConfig;

    fn topology() -> Topology {
        Topology::new(&GridConfig::new([4, 4, 1]).with_max_refinement_level(1)).unwrap()
    }

    fn uniform(n: u64) -> Vec<(CellId, f64)> {
        (1..=n).map(|id| (id, 1.0)).collect()
    }

    #[test]
    fn round_robin_deals_cells_out_in_id_order() {
        let owners = PartitionMethod::RoundRobin.assign(&topology(), &uniform(16), 3);
        assert_eq!(owners[&1], 0);
        assert_eq!(owners[&2], 1);
        assert_eq!(owners[&3], 2);
        assert_eq!(owners[&4], 0);
    }

    #[test]
    fn block_split_is_contiguous_and_even() {
        let owners = PartitionMethod::Block.assign(&topology(), &uniform(16), 4);
        let partition = Partition::new(4, owners);
        assert_eq!(partition.counts(), vec![4, 4, 4, 4]);
        assert_eq!(partition.owned_by(1).collect::<Vec<_>>(), vec![5, 6, 7, 8]);
    }

    #[test]
    fn heavy_cells_get_a_rank_of_their_own() {
        let mut cells = uniform(8);
        cells[0].1 = 8.0;
        let owners = PartitionMethod::Block.assign(&topology(), &cells, 2);
        assert_eq!(owners[&1], 0);
        assert!((2..=8).all(|id| owners[&id] == 1));
    }

    #[test]
    fn zero_weights_split_by_count() {
        let cells: Vec<_> = (1..=6).map(|id| (id, 0.0)).collect();
        let partition = Partition::new(3, PartitionMethod::Morton.assign(&topology(), &cells, 3));
        assert_eq!(partition.counts(), vec![2, 2, 2]);
    }

    #[test]
    fn morton_order_keeps_quadrants_together() {
        let owners = PartitionMethod::Morton.assign(&topology(), &uniform(16), 4);
        // The lower-left 2x2 quadrant of a 4x4 grid is cells 1, 2, 5, 6.
        assert!([1, 2, 5, 6].iter().all(|id| owners[id] == 0));
        assert!([11, 12, 15, 16].iter().all(|id| owners[id] == 3));
    }

    #[test]
    fn validation_detects_gaps_and_extras() {
        let partition = Partition::new(2, PartitionMethod::Block.assign(&topology(), &uniform(4), 2));
        assert!(partition.validate(1..=4).is_ok());
        assert!(partition.validate(1..=5).is_err());
        assert!(partition.validate(1..=3).is_err());

        let mut bad = partition.clone();
        bad.assign(2, 7);
        assert!(bad.validate(1..=4).is_err());
    }

    #[test]
    fn method_names_parse() {
        assert_eq!("rcb".parse::<PartitionMethod>().unwrap(), PartitionMethod::Block);
        assert_eq!("HSFC".parse::<PartitionMethod>().unwrap(), PartitionMethod::Morton);
        assert_eq!("rr".parse::<PartitionMethod>().unwrap(), PartitionMethod::RoundRobin);
        assert!("graph".parse::<PartitionMethod>().is_err());
    }
}
