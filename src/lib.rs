//! Gridflow is a library for time-dependent simulations on distributed,
//! adaptively refined, structured grids. The level-0 grid is a rectilinear
//! block of cells in one, two or three dimensions; any leaf cell can be
//! split in two along each of its active axes, recursively, up to a maximum
//! refinement level, with neighboring leaves never more than one level
//! apart. Cells are spread over a group of ranks (threads or processes),
//! each of which owns a share of the leaves and keeps read-only copies of
//! the remote cells its own cells depend on.
//!
//! A simulation is a loop of halo exchanges and local solves, interleaved
//! with adaptation, output and load balancing on their own schedules; the
//! `driver` module runs that loop, and the `solver` module includes Conway's
//! Game of Life and a scalar advection scheme as worked examples.

pub mod adapt;
pub mod adjacency_list;
pub mod balance;
pub mod cell;
pub mod config;
pub mod driver;
pub mod error;
pub mod geometry;
pub mod grid;
pub mod halo;
pub mod index_space;
pub mod message;
pub mod partition;
pub mod sink;
pub mod solver;
pub mod topology;

pub use adapt::{AdaptStats, AdaptationEngine, AdaptationPlan, Decision, Refinable};
pub use balance::{BalanceStats, LoadBalancer};
pub use cell::{Fields, Neighbor, Payload, Residence};
pub use config::{AdaptConfig, ChildPolicy, GridConfig, Period, RunConfig, Until};
pub use driver::{Clock, Driver, Phase, RunStats, RunSummary};
pub use error::{Error, Result};
pub use grid::Grid;
pub use halo::HaloExchange;
pub use message::{ChannelCommunicator, Communicator, TcpCommunicator};
pub use partition::{Partition, PartitionMethod};
pub use sink::{read_snapshot, Discard, ResultsSink, SnapshotFile};
pub use solver::Solver;
pub use topology::{CellId, Topology, ERROR_CELL};
