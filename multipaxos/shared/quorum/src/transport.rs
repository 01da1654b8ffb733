use futures::future::BoxFuture;
use paxos_types::{Node, NodeId, Reply, ReplicaError, Request};
use thiserror::Error;

/// Failure of a single request/response exchange with one node.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CallError {
    #[error("node {0} unreachable")]
    Unreachable(NodeId),

    #[error("remote error: {0}")]
    Remote(#[from] ReplicaError),

    #[error("i/o error talking to {address}: {reason}")]
    Io { address: String, reason: String },

    #[error("codec error: {0}")]
    Codec(String),
}

/// Client side of the remote-call layer.
///
/// The returned future owns everything it needs so the quorum call can spawn
/// it; a call that is no longer awaited still runs to completion.
pub trait Transport: Send + Sync {
    fn call(&self, node: &Node, request: Request) -> BoxFuture<'static, Result<Reply, CallError>>;
}

/// Server side of the remote-call layer, implemented by a replica.
pub trait Handler: Send + Sync {
    fn handle(&self, request: Request) -> BoxFuture<'_, Result<Reply, ReplicaError>>;
}
