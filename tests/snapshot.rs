mod common;

use std::collections::BTreeMap;
use std::path::PathBuf;

use gridflow::solver::life::{self, Life};
use gridflow::sink::Snapshot;
use gridflow::{read_snapshot, Clock, Communicator, Error, Grid, PartitionMethod, ResultsSink, SnapshotFile};

#[test]
fn every_rank_writes_its_own_block() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().to_path_buf();

    let written = common::on_ranks(3, move |comm| {
        let config = life::reference_config().with_partition(PartitionMethod::RoundRobin);
        let mut grid: Grid<Life> = Grid::initialize(config, comm.rank(), comm.size()).unwrap();
        life::seed(&mut grid).unwrap();

        let mut sink = SnapshotFile::new(path.clone());
        sink.save("000012", Clock { step: 12, time: 12.0 }, &grid, &comm).unwrap();

        let local: BTreeMap<_, _> = grid.local_payloads().map(|(id, p)| (id, *p)).collect();
        (sink.saved().to_vec(), local)
    });

    let file: PathBuf = written[0].0[0].clone();
    assert!(written.iter().all(|(saved, _)| saved == &vec![file.clone()]));

    let snapshot: Snapshot<Life> = read_snapshot(&file, 0).unwrap();
    assert_eq!(snapshot.header.step, 12);
    assert_eq!(snapshot.header.blocks.len(), 3);
    assert_eq!(snapshot.cells.len(), 225);

    for (_, local) in &written {
        for (id, payload) in local {
            assert_eq!(&snapshot.cells[id], payload);
        }
    }
    let alive: Vec<_> = snapshot.cells.iter().filter(|(_, p)| p.alive).map(|(id, _)| *id).collect();
    assert_eq!(alive, life::seed_cells().into_iter().collect::<Vec<_>>());
}

#[test]
fn a_failed_save_fails_on_every_rank() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("does-not-exist");

    let results = common::on_ranks(2, move |comm| {
        let grid: Grid<Life> = Grid::initialize(life::reference_config(), comm.rank(), comm.size()).unwrap();
        let mut sink = SnapshotFile::new(missing.clone());

        match sink.save("000000", Clock::default(), &grid, &comm) {
            Err(Error::Io { rank, .. }) => Some(rank),
            _ => None,
        }
    });
    assert_eq!(results, vec![Some(0), Some(0)]);
}

#[test]
fn reading_a_missing_file_is_an_io_error() {
    let result = read_snapshot::<Life>("no/such/snapshot.snap", 4);
    assert!(matches!(result, Err(Error::Io { rank: 4, .. })));
}
