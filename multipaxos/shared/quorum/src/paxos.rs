use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use paxos_types::{
    Accept, ClientRequest, Learn, NodeId, Prepare, Promise, Reply, Request, Response,
};

use crate::config::{Configuration, QuorumError};

/// Quorum functions for the Multi-Paxos calls. Each returns a decision once the
/// replies seen so far are enough, and `None` to keep waiting.
pub trait QuorumSpec: Send + Sync {
    fn prepare_qf(
        &self,
        prepare: &Prepare,
        replies: &BTreeMap<NodeId, Option<Promise>>,
    ) -> Option<Promise>;

    fn accept_qf(&self, accept: &Accept, replies: &BTreeMap<NodeId, Option<Learn>>)
    -> Option<Learn>;

    fn commit_qf(&self, learn: &Learn, acks: &BTreeSet<NodeId>) -> Option<()>;

    fn client_handle_qf(
        &self,
        request: &ClientRequest,
        replies: &BTreeMap<NodeId, Response>,
    ) -> Option<Response>;
}

/// A [`Configuration`] paired with the [`QuorumSpec`] that judges its replies.
#[derive(Clone)]
pub struct PaxosConfiguration {
    config: Configuration,
    qspec: Arc<dyn QuorumSpec>,
}

impl PaxosConfiguration {
    pub fn new(config: Configuration, qspec: Arc<dyn QuorumSpec>) -> Self {
        PaxosConfiguration { config, qspec }
    }

    pub async fn prepare(&self, prepare: Prepare, timeout: Duration) -> Result<Promise, QuorumError> {
        let mut rejections = 0;
        let result = self
            .config
            .quorum_call(
                Request::Prepare(prepare),
                timeout,
                |reply| match reply {
                    Reply::Promise(p) => Some(p),
                    _ => None,
                },
                |replies| {
                    rejections = replies.values().filter(|p| p.is_none()).count();
                    self.qspec.prepare_qf(&prepare, replies)
                },
            )
            .await;
        self.with_rejections(result, rejections)
    }

    pub async fn accept(&self, accept: Accept, timeout: Duration) -> Result<Learn, QuorumError> {
        let mut rejections = 0;
        let result = self
            .config
            .quorum_call(
                Request::Accept(accept.clone()),
                timeout,
                |reply| match reply {
                    Reply::Learn(l) => Some(l),
                    _ => None,
                },
                |replies| {
                    rejections = replies.values().filter(|l| l.is_none()).count();
                    self.qspec.accept_qf(&accept, replies)
                },
            )
            .await;
        self.with_rejections(result, rejections)
    }

    pub async fn commit(&self, learn: Learn, timeout: Duration) -> Result<(), QuorumError> {
        self.config
            .quorum_call(
                Request::Commit(learn.clone()),
                timeout,
                |reply| matches!(reply, Reply::Ack).then_some(()),
                |replies| {
                    let acks: BTreeSet<NodeId> = replies.keys().copied().collect();
                    self.qspec.commit_qf(&learn, &acks)
                },
            )
            .await
    }

    pub async fn client_handle(
        &self,
        request: ClientRequest,
        timeout: Duration,
    ) -> Result<Response, QuorumError> {
        self.config
            .quorum_call(
                Request::ClientHandle(request.clone()),
                timeout,
                |reply| match reply {
                    Reply::Response(r) => Some(r),
                    _ => None,
                },
                |replies| self.qspec.client_handle_qf(&request, replies),
            )
            .await
    }

    // The round is stale when nodes refused it and either everyone has
    // answered or the refusals alone rule out a quorum.
    fn with_rejections<T>(
        &self,
        result: Result<T, QuorumError>,
        rejections: usize,
    ) -> Result<T, QuorumError> {
        let nodes = self.config.size();
        let hopeless = rejections > nodes - self.config.quorum_size();
        match result {
            Err(QuorumError::Incomplete { .. }) if rejections > 0 => {
                Err(QuorumError::Rejected { nodes, rejections })
            }
            Err(QuorumError::Timeout { .. }) if hopeless => {
                Err(QuorumError::Rejected { nodes, rejections })
            }
            other => other,
        }
    }
}
