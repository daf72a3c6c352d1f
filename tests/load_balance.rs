mod common;

use gridflow::solver::life::{self, Life};
use serde::{Deserialize, Serialize};

use gridflow::{Communicator, Grid, GridConfig, LoadBalancer, PartitionMethod, Payload};

#[test]
fn rebalancing_twice_moves_nothing_the_second_time() {
    let results = common::on_ranks(3, |comm| {
        let config = life::reference_config().with_partition(PartitionMethod::RoundRobin);
        let mut grid: Grid<Life> = Grid::initialize(config, comm.rank(), comm.size()).unwrap();
        life::seed(&mut grid).unwrap();

        let balancer = LoadBalancer::new(PartitionMethod::Morton);
        let first = balancer.rebalance(&mut grid, &comm, |_| 1.0).unwrap();
        let partition = grid.partition().clone();
        let epoch = grid.epoch();

        let second = balancer.rebalance(&mut grid, &comm, |_| 1.0).unwrap();
        grid.check_partition().unwrap();

        assert!(first.cells_moved > 0);
        assert_eq!(second.cells_moved, 0);
        assert_eq!(second.sent, 0);
        assert_eq!(second.received, 0);
        assert_eq!(grid.partition(), &partition);
        assert!(grid.epoch() > epoch);
        assert!(grid.remote_cells().is_empty());

        let alive: Vec<_> = grid.local_payloads().filter(|(_, p)| p.alive).map(|(id, _)| id).collect();
        comm.all_gather_value(&alive).unwrap().into_iter().flatten().count()
    });

    for count in results {
        assert_eq!(count, life::seed_cells().len());
    }
}

#[test]
fn heavy_cells_spread_out() {
    let counts = common::on_ranks(2, |comm| {
        let mut grid: Grid<Cost> = Grid::initialize(GridConfig::new([8, 1, 1]), comm.rank(), comm.size()).unwrap();

        // The first cell costs as much as all the others together.
        LoadBalancer::new(PartitionMethod::Block)
            .rebalance(&mut grid, &comm, |info| if info.id == 1 { 7.0 } else { 1.0 })
            .unwrap();
        grid.local_cells()
    });

    assert_eq!(counts[0], vec![1]);
    assert_eq!(counts[1], (2..=8).collect::<Vec<_>>());
}

#[derive(Clone, Default, Serialize, Deserialize)]
struct Cost(u8);

impl Payload for Cost {}
