//! Dynamic load balancing: re-partitioning the leaves by estimated work and
//! migrating payloads to their new owners.

use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::cell::Payload;
use crate::error::Result;
use crate::geometry::CellInfo;
use crate::grid::Grid;
use crate::message::Communicator;
use crate::partition::{Partition, PartitionMethod};
use crate::topology::CellId;




/// Number of cells that changed hands in one rebalance, over the whole grid.
///
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceStats {
    pub cells_moved: u64,
    pub sent: u64,
    pub received: u64,
}




/// Re-partitions a grid with a fixed method.
///
#[derive(Clone, Copy, Debug)]
pub struct LoadBalancer {
    method: PartitionMethod,
}




// ============================================================================
impl LoadBalancer {

    pub fn new(method: PartitionMethod) -> Self {
        Self { method }
    }

    pub fn method(&self) -> PartitionMethod {
        self.method
    }

    /// Compute a new partition from every leaf's work estimate and move the
    /// payloads accordingly. Collective. The partition is a pure function of
    /// the gathered (cell, work) pairs, so a second call on an unchanged grid
    /// moves nothing. All remote copies are dropped.
    pub fn rebalance<P, C, W>(&self, grid: &mut Grid<P>, comm: &C, work: W) -> Result<BalanceStats>
    where
        P: Payload,
        C: Communicator,
        W: Fn(&CellInfo) -> f64,
    {
        let rank = grid.rank();
        let local: Vec<(CellId, f64)> = grid
            .local_cells()
            .into_iter()
            .map(|id| (id, grid.cell_info(id).map(|info| work(&info)).unwrap_or(1.0)))
            .collect();

        let mut cells: Vec<(CellId, f64)> = comm.all_gather_value(&local)?.into_iter().flatten().collect();
        cells.sort_by_key(|&(id, _)| id);

        let owners = self.method.assign(grid.topology(), &cells, comm.size());
        let partition = Partition::new(comm.size(), owners);
        partition.validate(grid.partition().cells())?;

        let cells_moved = grid
            .partition()
            .iter()
            .filter(|&(id, owner)| partition.owner(id) != Some(owner))
            .count() as u64;

        let leaving: Vec<(CellId, usize)> = local
            .iter()
            .filter_map(|&(id, _)| partition.owner(id).filter(|&owner| owner != rank).map(|owner| (id, owner)))
            .collect();

        grid.reassign(partition)?;
        grid.clear_remote();

        let mut outgoing: Vec<Vec<(CellId, P)>> = vec![Vec::new(); comm.size()];

        for &(id, owner) in &leaving {
            if let Some(payload) = grid.take_local(id) {
                outgoing[owner].push((id, payload))
            }
        }
        let mut received = 0;

        for (id, payload) in comm.all_to_all_value(outgoing)?.into_iter().flatten() {
            grid.insert_local(id, payload)?;
            received += 1;
        }
        grid.finish_repartition();
        grid.check_partition()?;

        let stats = BalanceStats {
            cells_moved,
            sent: leaving.len() as u64,
            received,
        };
        debug!("rank {} sent {} cells and received {}, now owns {}", rank, stats.sent, stats.received, grid.num_local());

        if rank == 0 && cells_moved > 0 {
            info!("rebalanced grid ({:?}): {} of {} cells moved", self.method, cells_moved, grid.partition().len());
        }
        Ok(stats)
    }
}
