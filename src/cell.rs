//! Types describing cells as seen by the rest of the crate: where a copy
//! lives, how its neighbors are reached, and what an application stores in
//! it.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::index_space::Index;
use crate::topology::CellId;

pub use crate::topology::ERROR_CELL;




/// Whether a slot in the grid arena holds a cell owned by this rank, or a
/// read-only copy of a cell owned by another rank.
///
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Residence {
    Local,
    Remote { fresh: bool },
}




/// A neighbor of a cell together with the offset, in units of the cell's
/// own size, through which it was first found. `face` is the outward unit
/// normal of the face the two cells share, if they share one; a neighbor
/// found through a diagonal box may still be a face neighbor, and one found
/// through a face box may not be.
///
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Neighbor {
    pub id: CellId,
    pub direction: Index,
    pub face: Option<Index>,
}




/// Which part of a payload travels in a halo round.
///
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Fields {
    /// The complete payload, used when cells migrate between ranks.
    All,
    /// Only the fields a neighbor needs to read during a solve.
    State,
}




/// Application data stored in every cell. The defaults transfer the whole
/// payload regardless of the requested fields; payloads with private
/// scratch fields override both methods to send only their state.
///
pub trait Payload: Clone + Default + Send + Sync + Serialize + DeserializeOwned + 'static {

    /// Return the part of this payload that is sent for the given fields.
    fn transfer(&self, _fields: Fields) -> Self {
        self.clone()
    }

    /// Merge a transferred payload into this one.
    fn receive(&mut self, incoming: Self, _fields: Fields) {
        *self = incoming
    }
}
