use std::collections::BTreeSet;

use proptest::prelude::*;

use gridflow::{CellId, GridConfig, Partition, PartitionMethod, Topology};

fn method() -> impl Strategy<Value = PartitionMethod> {
    prop_oneof![
        Just(PartitionMethod::RoundRobin),
        Just(PartitionMethod::Block),
        Just(PartitionMethod::Morton),
    ]
}

proptest! {
    #[test]
    fn every_cell_gets_exactly_one_owner(
        lx in 1u64..12,
        ly in 1u64..12,
        size in 1usize..7,
        weights in prop::collection::vec(0.0f64..10.0, 144),
        method in method(),
    ) {
        let topology = Topology::new(&GridConfig::new([lx, ly, 1])).unwrap();
        let cells: Vec<(CellId, f64)> = topology
            .level0_cells()
            .zip(weights.iter().copied())
            .collect();

        let owners = method.assign(&topology, &cells, size);
        let partition = Partition::new(size, owners.clone());

        prop_assert!(partition.validate(topology.level0_cells()).is_ok());
        prop_assert_eq!(partition.counts().iter().sum::<usize>(), cells.len());
        prop_assert!(owners.values().all(|&rank| rank < size));

        let ids: BTreeSet<CellId> = owners.keys().copied().collect();
        prop_assert_eq!(ids, topology.level0_cells().collect::<BTreeSet<_>>());
    }

    #[test]
    fn assignment_is_deterministic(
        n in 1u64..64,
        size in 1usize..5,
        method in method(),
    ) {
        let topology = Topology::new(&GridConfig::new([8, 8, 1])).unwrap();
        let cells: Vec<(CellId, f64)> = (1..=n).map(|id| (id, (id % 3) as f64 + 0.5)).collect();
        let mut shuffled = cells.clone();
        shuffled.reverse();

        prop_assert_eq!(method.assign(&topology, &cells, size), method.assign(&topology, &shuffled, size));
    }

    #[test]
    fn uniform_block_split_is_balanced(n in 1u64..200, size in 1usize..9) {
        let topology = Topology::new(&GridConfig::new([200, 1, 1])).unwrap();
        let cells: Vec<(CellId, f64)> = (1..=n).map(|id| (id, 1.0)).collect();
        let partition = Partition::new(size, PartitionMethod::Block.assign(&topology, &cells, size));
        let counts = partition.counts();
        let (lo, hi) = (counts.iter().min().unwrap(), counts.iter().max().unwrap());

        prop_assert!(hi - lo <= 1);
    }
}
