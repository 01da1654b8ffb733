//! Types shared by every Multi-Paxos crate in the workspace.

mod bank;
mod paxos;
mod rpc;

pub use bank::{Operation, Response, StateMachine, Transaction, TransactionResult};
pub use paxos::{
    Accept, ClientRequest, Heartbeat, Learn, Prepare, Promise, PromiseSlot, Round, Value,
};
pub use rpc::{Reply, ReplicaError, Request};

use serde::{Deserialize, Serialize};

pub type NodeId = u64;
pub type Slot = u64;

/// A cluster member as listed in the static configuration.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Node {
    pub node_id: NodeId,
    pub address: String,
}

impl Node {
    pub fn new(node_id: NodeId, address: impl Into<String>) -> Self {
        Node {
            node_id,
            address: address.into(),
        }
    }
}

/// Majority threshold for a cluster of `n` nodes.
pub fn quorum_size(n: usize) -> usize {
    n / 2 + 1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quorum_is_strict_majority() {
        assert_eq!(quorum_size(1), 1);
        assert_eq!(quorum_size(3), 2);
        assert_eq!(quorum_size(4), 3);
        assert_eq!(quorum_size(5), 3);
    }
}
