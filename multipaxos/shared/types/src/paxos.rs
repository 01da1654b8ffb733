use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{NodeId, Slot, Transaction};

/// Rank of a proposal. Rounds of different nodes never coincide because each
/// node starts at its rank in the cluster and steps by the cluster size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Round(i64);

impl Round {
    /// Lower than every round a proposer can produce.
    pub const NONE: Round = Round(-1);

    pub const fn new(value: i64) -> Self {
        Round(value)
    }

    /// First round for the node at position `rank` of the sorted node set.
    pub fn initial(rank: usize) -> Self {
        Round(rank as i64)
    }

    pub fn next(self, cluster_size: usize) -> Self {
        Round(self.0 + cluster_size as i64)
    }

    pub fn is_none(self) -> bool {
        self == Round::NONE
    }
}

impl fmt::Display for Round {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_none() {
            write!(f, "NoRound")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

/// A command submitted by a client, identified by `(client_id, client_seq)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClientRequest {
    pub client_id: String,
    pub client_seq: u64,
    pub command: Transaction,
}

impl ClientRequest {
    pub fn key(&self) -> (String, u64) {
        (self.client_id.clone(), self.client_seq)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Value {
    /// Fills a slot nobody proposed a real value for.
    Noop,
    Request(ClientRequest),
}

impl Value {
    pub fn is_noop(&self) -> bool {
        matches!(self, Value::Noop)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromiseSlot {
    pub slot: Slot,
    pub vround: Round,
    pub value: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Prepare {
    pub round: Round,
    pub slot: Slot,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Promise {
    pub round: Round,
    pub from: NodeId,
    pub slots: Vec<PromiseSlot>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Accept {
    pub round: Round,
    pub slot: Slot,
    pub value: Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Learn {
    pub round: Round,
    pub slot: Slot,
    pub value: Value,
    pub from: NodeId,
}

impl Learn {
    /// True when this learn answers `accept`.
    pub fn matches(&self, accept: &Accept) -> bool {
        self.round == accept.round && self.slot == accept.slot && self.value == accept.value
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Heartbeat {
    pub node_id: NodeId,
}
