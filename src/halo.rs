//! Halo exchange: keeping read-only copies of remote neighbor cells up to
//! date.
//!
//! The exchange plan says, for every peer, which local cells to send it and
//! which of its cells to expect. It is built with a collective handshake
//! (every rank tells each owner which cells it needs) and rebuilt whenever
//! the grid's epoch moves on. A round is split in three calls so that inner
//! cells can be solved while messages are in flight.

use std::collections::{BTreeMap, BTreeSet};

use log::debug;

use crate::cell::{Fields, Payload};
use crate::error::{Error, Result};
use crate::grid::Grid;
use crate::message::{codec, Communicator, Tag};
use crate::topology::CellId;




/// Which cells go to and come from each peer.
///
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct HaloPlan {
    pub epoch: u64,
    pub sends: BTreeMap<usize, Vec<CellId>>,
    pub recvs: BTreeMap<usize, Vec<CellId>>,
}




/// Number of cell copies moved by the halo exchange.
///
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct HaloStats {
    pub rounds: u64,
    pub cells_sent: u64,
    pub cells_received: u64,
    pub last_sent: u64,
    pub last_received: u64,
}




struct Round {
    tag: Tag,
    fields: Fields,
    receives_pending: bool,
    sends_pending: bool,
}




/// Runs halo rounds for one grid. At most one round is in flight at a time.
///
#[derive(Default)]
pub struct HaloExchange {
    plan: Option<HaloPlan>,
    round: Option<Round>,
    last_tag: Tag,
    stats: HaloStats,
}




// ============================================================================
impl HaloExchange {

    pub fn new() -> Self {
        Self::default()
    }

    pub fn stats(&self) -> HaloStats {
        self.stats
    }

    pub fn plan(&self) -> Option<&HaloPlan> {
        self.plan.as_ref()
    }

    /// Determine whether a round has been started and not yet completed.
    pub fn in_flight(&self) -> bool {
        self.round.is_some()
    }

    /// Start a round: rebuild the plan if the grid has changed, mark every
    /// remote copy stale, and send the requested fields of every cell in the
    /// send lists. Returns without waiting for anything to arrive.
    pub fn begin_update<P, C>(&mut self, grid: &mut Grid<P>, comm: &C, fields: Fields) -> Result<()>
    where
        P: Payload,
        C: Communicator,
    {
        if let Some(round) = &self.round {
            return Err(Error::ConcurrentUpdate { tag: round.tag });
        }
        if self.plan.as_ref().map_or(true, |plan| plan.epoch != grid.epoch()) {
            self.plan = Some(Self::build_plan(grid, comm)?);
        }
        let plan = self
            .plan
            .as_ref()
            .ok_or_else(|| Error::invariant("halo plan is missing"))?;

        grid.mark_remote_stale();

        let tag = comm.next_tag();
        let mut sent = 0;

        for (&peer, ids) in &plan.sends {
            let copies = ids
                .iter()
                .map(|&id| Ok((id, grid.payload(id)?.transfer(fields))))
                .collect::<Result<Vec<_>>>()?;
            comm.send(peer, tag, codec::encode(&copies)?)?;
            sent += ids.len() as u64;
        }

        self.round = Some(Round {
            tag,
            fields,
            receives_pending: true,
            sends_pending: true,
        });
        self.last_tag = tag;
        self.stats.rounds += 1;
        self.stats.last_sent = sent;
        self.stats.cells_sent += sent;
        Ok(())
    }

    /// Block until every expected message of the current round has arrived,
    /// and store the copies as fresh remote cells.
    pub fn wait_receives<P, C>(&mut self, grid: &mut Grid<P>, comm: &C) -> Result<()>
    where
        P: Payload,
        C: Communicator,
    {
        let (tag, fields) = match &self.round {
            Some(round) if round.receives_pending => (round.tag, round.fields),
            _ => return Err(Error::ConcurrentUpdate { tag: self.last_tag }),
        };
        let plan = self
            .plan
            .as_ref()
            .ok_or_else(|| Error::invariant("halo plan is missing"))?;

        let mut received = 0;
        let mut heard = BTreeSet::new();

        for _ in 0..plan.recvs.len() {
            let (source, bytes) = comm.recv(tag)?;
            let copies: Vec<(CellId, P)> = codec::decode(&bytes)?;
            let ids: Vec<CellId> = copies.iter().map(|(id, _)| *id).collect();
            Self::check_copies(&plan.recvs, &mut heard, source, &ids)?;

            for (id, payload) in copies {
                grid.receive_remote(id, payload, fields)?;
            }
            received += ids.len() as u64;
        }
        self.stats.last_received = received;
        self.stats.cells_received += received;
        self.complete(|round| round.receives_pending = false);
        Ok(())
    }

    /// Block until the transport has delivered this round's outbound
    /// messages.
    pub fn wait_sends<C>(&mut self, comm: &C) -> Result<()>
    where
        C: Communicator,
    {
        match &self.round {
            Some(round) if round.sends_pending => {}
            _ => return Err(Error::ConcurrentUpdate { tag: self.last_tag }),
        }
        comm.flush()?;
        self.complete(|round| round.sends_pending = false);
        Ok(())
    }

    /// Run a complete round.
    pub fn update<P, C>(&mut self, grid: &mut Grid<P>, comm: &C, fields: Fields) -> Result<()>
    where
        P: Payload,
        C: Communicator,
    {
        self.begin_update(grid, comm, fields)?;
        self.wait_receives(grid, comm)?;
        self.wait_sends(comm)
    }

    /// A message must come from a peer the plan expects, at most once per
    /// round, and carry exactly the planned cells in plan order.
    fn check_copies(
        recvs: &BTreeMap<usize, Vec<CellId>>,
        heard: &mut BTreeSet<usize>,
        source: usize,
        ids: &[CellId],
    ) -> Result<()> {
        let expected = recvs
            .get(&source)
            .ok_or_else(|| Error::invariant(format!("rank {} sent halo cells nobody asked for", source)))?;

        if !heard.insert(source) {
            return Err(Error::invariant(format!("rank {} sent twice in one halo round", source)));
        }
        if ids != expected.as_slice() {
            return Err(Error::invariant(format!(
                "rank {} sent cells {:?}, expected {:?}", source, ids, expected)));
        }
        Ok(())
    }

    fn complete<F: FnOnce(&mut Round)>(&mut self, f: F) {
        if let Some(round) = &mut self.round {
            f(round);

            if !round.receives_pending && !round.sends_pending {
                self.round = None
            }
        }
    }

    fn build_plan<P, C>(grid: &Grid<P>, comm: &C) -> Result<HaloPlan>
    where
        P: Payload,
        C: Communicator,
    {
        let mut needed: BTreeMap<usize, BTreeSet<CellId>> = BTreeMap::new();

        for id in grid.local_cells() {
            for n in grid.neighbors(id) {
                match grid.owner(n.id) {
                    Some(owner) if owner != grid.rank() => {
                        needed.entry(owner).or_default().insert(n.id);
                    }
                    Some(_) => {}
                    None => return Err(Error::invariant(format!("neighbor {} of cell {} has no owner", n.id, id))),
                }
            }
        }
        let requests: Vec<Vec<CellId>> = (0..comm.size())
            .map(|peer| needed.get(&peer).map(|ids| ids.iter().copied().collect()).unwrap_or_default())
            .collect();

        let incoming = comm.all_to_all_value(requests.clone())?;

        let sends: BTreeMap<usize, Vec<CellId>> = incoming
            .into_iter()
            .enumerate()
            .filter(|(_, ids)| !ids.is_empty())
            .collect();
        let recvs: BTreeMap<usize, Vec<CellId>> = requests
            .into_iter()
            .enumerate()
            .filter(|(_, ids)| !ids.is_empty())
            .collect();

        for (peer, ids) in &sends {
            if let Some(id) = ids.iter().find(|&&id| !grid.is_local(id)) {
                return Err(Error::invariant(format!("rank {} asked for cell {}, which rank {} does not own", peer, id, grid.rank())));
            }
        }
        debug!(
            "rank {}: halo plan for epoch {} sends to {} peers and receives from {}",
            grid.rank(), grid.epoch(), sends.len(), recvs.len()
        );
        Ok(HaloPlan { epoch: grid.epoch(), sends, recvs })
    }
}
