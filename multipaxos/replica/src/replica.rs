use std::sync::{Arc, Mutex};
use std::time::Duration;

use acceptor::Acceptor;
use failure_detector::FailureDetector;
use futures::future::BoxFuture;
use leader_detector::LeaderDetector;
use learner::PaxosQSpec;
use paxos_types::{
    Accept, ClientRequest, Heartbeat, Learn, Node, NodeId, Prepare, Promise, PromiseSlot, Reply,
    ReplicaError, Request, Response, Slot, StateMachine, Value,
};
use proposer::{Proposer, ProposerConfig};
use quorum_call::{Configuration, Handler, Transport};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::decided::DecidedLog;
use crate::response_buffer::ResponseBuffer;

#[derive(Debug, Clone, Copy)]
pub struct ReplicaConfig {
    pub proposer: ProposerConfig,
    pub failure_detector_delay: Duration,
    pub failure_detector_delta: Duration,
    pub response_ttl: Duration,
}

impl Default for ReplicaConfig {
    fn default() -> Self {
        ReplicaConfig {
            proposer: ProposerConfig::default(),
            failure_detector_delay: Duration::from_secs(5),
            failure_detector_delta: Duration::from_secs(1),
            response_ttl: Duration::from_secs(60),
        }
    }
}

/// One member of the replicated bank: acceptor, proposer, failure and leader
/// detection, and the in-order application of decided values.
pub struct PaxosReplica<S> {
    node_id: NodeId,
    acceptor: Mutex<Acceptor>,
    proposer: Arc<Proposer>,
    leader_detector: Arc<LeaderDetector>,
    failure_detector: Arc<FailureDetector>,
    log: Mutex<DecidedLog<S>>,
    responses: Mutex<ResponseBuffer>,
    client_timeout: Duration,
    shutdown: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl<S: StateMachine + 'static> PaxosReplica<S> {
    pub fn new(
        node_id: NodeId,
        nodes: Vec<Node>,
        transport: Arc<dyn Transport>,
        state_machine: S,
        config: ReplicaConfig,
    ) -> Arc<Self> {
        let leader_detector = Arc::new(LeaderDetector::new(
            nodes.iter().map(|n| n.node_id).collect(),
        ));
        let failure_detector = Arc::new(FailureDetector::new(
            node_id,
            Configuration::new(nodes.clone(), Arc::clone(&transport)),
            leader_detector.clone(),
            config.failure_detector_delay,
            config.failure_detector_delta,
        ));
        let proposer = Arc::new(Proposer::new(
            node_id,
            nodes.clone(),
            transport,
            Arc::new(PaxosQSpec::new(nodes.len())),
            leader_detector.clone(),
            config.proposer,
        ));
        let (shutdown, _) = watch::channel(false);

        Arc::new(PaxosReplica {
            node_id,
            acceptor: Mutex::new(Acceptor::new(node_id)),
            proposer,
            leader_detector,
            failure_detector,
            log: Mutex::new(DecidedLog::new(state_machine)),
            responses: Mutex::new(ResponseBuffer::new(config.response_ttl)),
            client_timeout: config.proposer.phase_two_timeout,
            shutdown,
            tasks: Mutex::new(Vec::new()),
        })
    }

    /// Spawns the proposer drive loop and the failure detector.
    pub fn start(&self) {
        info!("[Replica] Starting node {}", self.node_id);
        let mut tasks = self.tasks.lock().unwrap();
        tasks.push(self.proposer.start(self.shutdown.subscribe()));
        tasks.push(self.failure_detector.start(self.shutdown.subscribe()));
    }

    /// Stops the background loops; further calls are refused.
    pub fn shutdown(&self) {
        info!("[Replica] Shutting down node {}", self.node_id);
        self.shutdown.send_replace(true);
    }

    /// Waits for the background loops to exit after [`PaxosReplica::shutdown`].
    pub async fn join(&self) {
        let tasks: Vec<_> = self.tasks.lock().unwrap().drain(..).collect();
        for task in tasks {
            if let Err(e) = task.await {
                warn!("[Replica] Background task failed: {e}");
            }
        }
    }

    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    pub fn leader(&self) -> Option<NodeId> {
        self.leader_detector.leader()
    }

    pub fn proposer(&self) -> &Arc<Proposer> {
        &self.proposer
    }

    pub fn adu(&self) -> Option<Slot> {
        self.log.lock().unwrap().adu()
    }

    pub fn decided(&self, slot: Slot) -> Option<Value> {
        self.log.lock().unwrap().decided(slot).cloned()
    }

    pub fn accepted(&self, slot: Slot) -> Option<PromiseSlot> {
        self.acceptor.lock().unwrap().accepted(slot).cloned()
    }

    /// Runs `f` against the application state.
    pub fn with_state<R>(&self, f: impl FnOnce(&S) -> R) -> R {
        f(self.log.lock().unwrap().state_machine())
    }

    pub fn prepare(&self, prepare: Prepare) -> Option<Promise> {
        self.acceptor.lock().unwrap().handle_prepare(&prepare)
    }

    pub fn accept(&self, accept: Accept) -> Option<Learn> {
        self.acceptor.lock().unwrap().handle_accept(&accept)
    }

    /// Applies a decided value and wakes the clients waiting for it.
    pub fn commit(&self, learn: Learn) {
        let (responses, adu) = {
            let mut log = self.log.lock().unwrap();
            let responses = log.handle_decided_value(learn.slot, learn.value);
            (responses, log.adu())
        };
        if let Some(adu) = adu {
            self.proposer.set_adu(adu);
        }
        if responses.is_empty() {
            return;
        }
        let mut buffer = self.responses.lock().unwrap();
        for response in responses {
            buffer.insert(response);
        }
    }

    /// Hands the request to the proposer and waits for its decision.
    pub async fn client_handle(&self, request: ClientRequest) -> Result<Response, ReplicaError> {
        let waiter = self
            .responses
            .lock()
            .unwrap()
            .get_or_wait(&request.client_id, request.client_seq);
        let rx = match waiter {
            Ok(response) => return Ok(response),
            Err(rx) => rx,
        };

        let client_id = request.client_id.clone();
        let client_seq = request.client_seq;
        if self.proposer.add_request(request) {
            debug!("[Replica] Queued {}/{} for proposal", client_id, client_seq);
        }

        match tokio::time::timeout(self.client_timeout, rx).await {
            Ok(Ok(response)) => Ok(response),
            _ => Err(ReplicaError::NoResponse {
                client_id,
                client_seq,
            }),
        }
    }

    pub fn ping(&self, heartbeat: Heartbeat) -> Heartbeat {
        self.failure_detector.ping(heartbeat)
    }
}

impl<S: StateMachine + 'static> Handler for PaxosReplica<S> {
    fn handle(&self, request: Request) -> BoxFuture<'_, Result<Reply, ReplicaError>> {
        Box::pin(async move {
            if *self.shutdown.borrow() {
                return Err(ReplicaError::ShuttingDown);
            }
            match request {
                Request::Prepare(prepare) => Ok(Reply::Promise(self.prepare(prepare))),
                Request::Accept(accept) => Ok(Reply::Learn(self.accept(accept))),
                Request::Commit(learn) => {
                    self.commit(learn);
                    Ok(Reply::Ack)
                }
                Request::ClientHandle(request) => {
                    self.client_handle(request).await.map(Reply::Response)
                }
                Request::Ping(heartbeat) => Ok(Reply::Heartbeat(self.ping(heartbeat))),
            }
        })
    }
}
