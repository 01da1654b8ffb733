use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use futures::stream::FuturesUnordered;
use paxos_types::{Node, NodeId, Reply, Request, quorum_size};
use thiserror::Error;
use tracing::{debug, warn};

use crate::transport::{CallError, Transport};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QuorumError {
    #[error("quorum call timed out after {timeout:?} ({replies} replies, {errors} errors)")]
    Timeout {
        timeout: Duration,
        replies: usize,
        errors: usize,
    },

    #[error("no quorum after all {nodes} nodes answered ({replies} replies, {errors} errors)")]
    Incomplete {
        nodes: usize,
        replies: usize,
        errors: usize,
    },

    #[error("rejected by {rejections} of {nodes} nodes")]
    Rejected { nodes: usize, rejections: usize },

    #[error("configuration has no nodes")]
    NoNodes,
}

/// A fixed set of nodes reachable through one transport.
#[derive(Clone)]
pub struct Configuration {
    nodes: Vec<Node>,
    transport: Arc<dyn Transport>,
}

impl fmt::Debug for Configuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Configuration")
            .field("nodes", &self.node_ids())
            .finish()
    }
}

impl Configuration {
    pub fn new(mut nodes: Vec<Node>, transport: Arc<dyn Transport>) -> Self {
        nodes.sort_by_key(|n| n.node_id);
        nodes.dedup_by_key(|n| n.node_id);
        Configuration { nodes, transport }
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn node_ids(&self) -> Vec<NodeId> {
        self.nodes.iter().map(|n| n.node_id).collect()
    }

    pub fn size(&self) -> usize {
        self.nodes.len()
    }

    pub fn quorum_size(&self) -> usize {
        quorum_size(self.nodes.len())
    }

    /// Sends `request` to every node and feeds the replies gathered so far to
    /// `qf` after each arrival, returning the first decision it makes.
    ///
    /// `extract` turns a raw reply into the type the quorum function works on;
    /// replies it refuses count as errors. Each call runs as its own task, so
    /// calls still outstanding when `qf` decides keep going in the background.
    pub async fn quorum_call<R, T, E, F>(
        &self,
        request: Request,
        timeout: Duration,
        extract: E,
        mut qf: F,
    ) -> Result<T, QuorumError>
    where
        E: Fn(Reply) -> Option<R>,
        F: FnMut(&BTreeMap<NodeId, R>) -> Option<T>,
    {
        if self.nodes.is_empty() {
            return Err(QuorumError::NoNodes);
        }

        let kind = request.kind();
        let mut calls: FuturesUnordered<_> = self
            .nodes
            .iter()
            .map(|node| {
                let node_id = node.node_id;
                let address = node.address.clone();
                let handle = tokio::spawn(self.transport.call(node, request.clone()));
                async move {
                    let result = match handle.await {
                        Ok(result) => result,
                        Err(e) => Err(CallError::Io {
                            address,
                            reason: e.to_string(),
                        }),
                    };
                    (node_id, result)
                }
            })
            .collect();

        let mut replies: BTreeMap<NodeId, R> = BTreeMap::new();
        let mut errors = 0;

        let collect = async {
            while let Some((node_id, result)) = calls.next().await {
                match result {
                    Ok(reply) => match extract(reply) {
                        Some(reply) => {
                            replies.insert(node_id, reply);
                            if let Some(decision) = qf(&replies) {
                                return Ok(decision);
                            }
                        }
                        None => {
                            errors += 1;
                            warn!("[Quorum Call] Unexpected {kind} reply from node {node_id}");
                        }
                    },
                    Err(e) => {
                        errors += 1;
                        debug!("[Quorum Call] {kind} to node {node_id} failed: {e}");
                    }
                }
            }
            Err(())
        };

        let outcome = tokio::time::timeout(timeout, collect).await;
        match outcome {
            Ok(Ok(decision)) => Ok(decision),
            Ok(Err(())) => Err(QuorumError::Incomplete {
                nodes: self.nodes.len(),
                replies: replies.len(),
                errors,
            }),
            Err(_) => Err(QuorumError::Timeout {
                timeout,
                replies: replies.len(),
                errors,
            }),
        }
    }
}
