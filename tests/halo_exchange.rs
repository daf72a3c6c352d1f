mod common;

use serde::{Deserialize, Serialize};

use gridflow::{Communicator, Error, Fields, Grid, GridConfig, HaloExchange, PartitionMethod, Payload, Residence};

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
struct Stamp {
    owner: usize,
    value: u64,
    scratch: u64,
}

impl Payload for Stamp {
    fn transfer(&self, fields: Fields) -> Self {
        match fields {
            Fields::All => self.clone(),
            Fields::State => Stamp { scratch: 0, ..self.clone() },
        }
    }

    fn receive(&mut self, incoming: Self, fields: Fields) {
        let scratch = self.scratch;
        *self = incoming;

        if fields == Fields::State {
            self.scratch = scratch
        }
    }
}

fn stamped_grid<C: Communicator>(comm: &C, round: u64) -> Grid<Stamp> {
    let config = GridConfig::new([6, 5, 1]).with_neighborhood(1).with_partition(PartitionMethod::RoundRobin);
    let mut grid = Grid::initialize(config, comm.rank(), comm.size()).unwrap();

    for id in grid.local_cells() {
        *grid.payload_mut(id).unwrap() = Stamp { owner: comm.rank(), value: id * 100 + round, scratch: 7 };
    }
    grid
}

#[test]
fn every_neighbor_is_fresh_after_an_update() {
    let results = common::on_ranks(3, |comm| {
        let mut grid = stamped_grid(&comm, 1);
        let mut halo = HaloExchange::new();
        halo.update(&mut grid, &comm, Fields::State).unwrap();

        for id in grid.local_cells() {
            for n in grid.neighbors(id) {
                let copy = grid.payload(n.id).unwrap();
                assert_eq!(copy.value, n.id * 100 + 1);
                assert_eq!(Some(copy.owner), grid.owner(n.id));

                if !grid.is_local(n.id) {
                    assert_eq!(grid.residence(n.id), Some(Residence::Remote { fresh: true }));
                    assert_eq!(copy.scratch, 0);
                }
            }
        }
        assert!(halo.stats().cells_received > 0);
        assert_eq!(halo.stats().last_received as usize, grid.remote_cells().len());
    });
    assert_eq!(results.len(), 3);
}

#[test]
fn remote_copies_are_stale_until_the_round_completes() {
    common::on_ranks(2, |comm| {
        let mut grid = stamped_grid(&comm, 1);
        let mut halo = HaloExchange::new();
        halo.update(&mut grid, &comm, Fields::All).unwrap();

        let remote = grid.remote_cells();
        assert!(!remote.is_empty());
        assert_eq!(grid.payload(remote[0]).unwrap().scratch, 7);

        for id in grid.local_cells() {
            grid.payload_mut(id).unwrap().value += 1;
        }
        halo.begin_update(&mut grid, &comm, Fields::State).unwrap();
        assert!(matches!(grid.payload(remote[0]), Err(Error::InvariantViolation(_))));
        assert!(grid.payload_mut(remote[0]).is_err());

        halo.wait_receives(&mut grid, &comm).unwrap();
        halo.wait_sends(&comm).unwrap();

        let copy = grid.payload(remote[0]).unwrap();
        assert_eq!(copy.value, remote[0] * 100 + 2);
        assert_eq!(copy.scratch, 7);
    });
}

#[test]
fn overlapping_rounds_are_rejected() {
    common::on_ranks(2, |comm| {
        let mut grid = stamped_grid(&comm, 0);
        let mut halo = HaloExchange::new();

        assert!(matches!(halo.wait_receives(&mut grid, &comm), Err(Error::ConcurrentUpdate { .. })));
        assert!(matches!(halo.wait_sends(&comm), Err(Error::ConcurrentUpdate { .. })));

        halo.begin_update(&mut grid, &comm, Fields::State).unwrap();
        assert!(halo.in_flight());
        assert!(matches!(
            halo.begin_update(&mut grid, &comm, Fields::State),
            Err(Error::ConcurrentUpdate { .. })
        ));
        halo.wait_receives(&mut grid, &comm).unwrap();
        assert!(matches!(halo.wait_receives(&mut grid, &comm), Err(Error::ConcurrentUpdate { .. })));

        halo.wait_sends(&comm).unwrap();
        assert!(!halo.in_flight());
        assert!(matches!(halo.wait_sends(&comm), Err(Error::ConcurrentUpdate { .. })));
    });
}
