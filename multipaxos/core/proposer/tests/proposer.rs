use std::sync::{Arc, Mutex};
use std::time::Duration;

use acceptor::Acceptor;
use futures::future::BoxFuture;
use leader_detector::{LeaderDetector, SuspectRestorer};
use learner::PaxosQSpec;
use paxos_types::{
    Accept, ClientRequest, Learn, Node, NodeId, Reply, ReplicaError, Request, Round, Slot,
    Transaction, Value,
};
use proposer::{PaxosPhase, Proposer, ProposerConfig, ProposerError, Step};
use quorum_call::{LocalNetwork, QuorumError};
use tokio::sync::watch;

/// Acceptor plus a log of the commits it received.
struct AcceptorNode {
    acceptor: Mutex<Acceptor>,
    commits: Mutex<Vec<Learn>>,
}

impl AcceptorNode {
    fn committed(&self, slot: Slot) -> Option<Value> {
        self.commits
            .lock()
            .unwrap()
            .iter()
            .find(|l| l.slot == slot)
            .map(|l| l.value.clone())
    }
}

impl quorum_call::Handler for AcceptorNode {
    fn handle(&self, request: Request) -> BoxFuture<'_, Result<Reply, ReplicaError>> {
        Box::pin(async move {
            let reply = match request {
                Request::Prepare(p) => Reply::Promise(self.acceptor.lock().unwrap().handle_prepare(&p)),
                Request::Accept(a) => Reply::Learn(self.acceptor.lock().unwrap().handle_accept(&a)),
                Request::Commit(l) => {
                    self.commits.lock().unwrap().push(l);
                    Reply::Ack
                }
                other => panic!("unexpected request {other:?}"),
            };
            Ok(reply)
        })
    }
}

struct Cluster {
    network: Arc<LocalNetwork>,
    nodes: Vec<Node>,
    acceptors: Vec<Arc<AcceptorNode>>,
}

impl Cluster {
    fn new(ids: &[NodeId]) -> Self {
        let network = LocalNetwork::new();
        let acceptors: Vec<_> = ids
            .iter()
            .map(|&id| {
                let node = Arc::new(AcceptorNode {
                    acceptor: Mutex::new(Acceptor::new(id)),
                    commits: Mutex::new(Vec::new()),
                });
                network.register(id, node.clone());
                node
            })
            .collect();
        let nodes = ids
            .iter()
            .map(|&id| Node::new(id, format!("local:{id}")))
            .collect();
        Cluster {
            network,
            nodes,
            acceptors,
        }
    }

    /// Proposer on `node_id` with its own leader detector.
    fn proposer(&self, node_id: NodeId) -> (Arc<Proposer>, Arc<LeaderDetector>) {
        let ld = Arc::new(LeaderDetector::new(
            self.nodes.iter().map(|n| n.node_id).collect(),
        ));
        let proposer = Arc::new(Proposer::new(
            node_id,
            self.nodes.clone(),
            self.network.transport(node_id),
            Arc::new(PaxosQSpec::new(self.nodes.len())),
            ld.clone(),
            ProposerConfig {
                phase_one_timeout: Duration::from_millis(200),
                phase_two_timeout: Duration::from_millis(200),
                retry_interval: Duration::from_millis(20),
            },
        ));
        (proposer, ld)
    }
}

fn request(client: &str, seq: u64, amount: i64) -> ClientRequest {
    ClientRequest {
        client_id: client.into(),
        client_seq: seq,
        command: Transaction::deposit(1, amount),
    }
}

fn seed_accept(node: &AcceptorNode, round: i64, slot: Slot, value: Value) {
    node.acceptor
        .lock()
        .unwrap()
        .handle_accept(&Accept {
            round: Round::new(round),
            slot,
            value,
        })
        .unwrap();
}

#[tokio::test(start_paused = true)]
async fn leader_commits_requests_in_slot_order() {
    let cluster = Cluster::new(&[1, 2, 3]);
    let (proposer, _ld) = cluster.proposer(3);
    let (_tx, rx) = watch::channel(false);
    let handle = proposer.start(rx);

    assert!(proposer.add_request(request("a", 1, 10)));
    assert!(proposer.add_request(request("a", 2, 20)));
    assert!(
        !proposer.add_request(request("a", 2, 20)),
        "A queued request is not queued twice"
    );

    tokio::time::sleep(Duration::from_millis(100)).await;
    for node in &cluster.acceptors {
        assert_eq!(node.committed(0), Some(Value::Request(request("a", 1, 10))));
        assert_eq!(node.committed(1), Some(Value::Request(request("a", 2, 20))));
    }
    assert_eq!(proposer.round(), Round::new(5), "First round is rank plus cluster size");
    handle.abort();
}

#[tokio::test(start_paused = true)]
async fn followers_drop_requests() {
    let cluster = Cluster::new(&[1, 2, 3]);
    let (proposer, _ld) = cluster.proposer(2);
    assert!(!proposer.is_leader());
    assert!(!proposer.add_request(request("b", 1, 5)));
    assert_eq!(proposer.pending_requests(), 0);
    assert_eq!(
        proposer.run_multi_paxos().await,
        Err(ProposerError::NotLeader)
    );
}

#[tokio::test(start_paused = true)]
async fn recovered_values_keep_their_slots_and_gaps_become_noops() {
    let cluster = Cluster::new(&[1, 2, 3]);
    let v = Value::Request(request("old", 1, 1));
    let w = Value::Request(request("old", 2, 2));
    // A previous leader got slots 0 and 2 accepted by nodes 1 and 2, never slot 1.
    for node in &cluster.acceptors[..2] {
        seed_accept(node, 0, 0, v.clone());
        seed_accept(node, 0, 2, w.clone());
    }

    let (proposer, _ld) = cluster.proposer(3);
    assert_eq!(proposer.run_multi_paxos().await, Ok(Step::Progress));
    assert_eq!(proposer.phase(), PaxosPhase::PhaseOneDone);

    assert!(proposer.add_request(request("new", 1, 3)));
    for _ in 0..8 {
        assert_eq!(proposer.run_multi_paxos().await, Ok(Step::Progress));
    }
    assert_eq!(proposer.run_multi_paxos().await, Ok(Step::Idle));
    tokio::time::sleep(Duration::from_millis(1)).await;

    let third = &cluster.acceptors[2];
    assert_eq!(third.committed(0), Some(v));
    assert_eq!(third.committed(1), Some(Value::Noop), "Slot 1 is filled with a no-op");
    assert_eq!(third.committed(2), Some(w));
    assert_eq!(
        third.committed(3),
        Some(Value::Request(request("new", 1, 3))),
        "New values go after the recovered ones"
    );
}

#[tokio::test(start_paused = true)]
async fn lower_round_loses_the_race() {
    let cluster = Cluster::new(&[1, 2, 3]);
    let (p2, ld2) = cluster.proposer(2);
    let (p3, _ld3) = cluster.proposer(3);
    ld2.suspect(3);
    assert!(p2.is_leader() && p3.is_leader(), "Both believe they lead");

    assert_eq!(p2.run_multi_paxos().await, Ok(Step::Progress));
    assert_eq!(p3.run_multi_paxos().await, Ok(Step::Progress));
    assert!(p2.round() < p3.round());

    assert!(p2.add_request(request("two", 1, 2)));
    assert!(p3.add_request(request("three", 1, 3)));

    let err = p2.run_multi_paxos().await.unwrap_err();
    assert!(
        matches!(err, ProposerError::Quorum(QuorumError::Rejected { .. })),
        "unexpected error {err:?}"
    );
    assert_eq!(p2.phase(), PaxosPhase::Idle);
    assert_eq!(p2.pending_requests(), 0, "The loser drops its queue");

    assert_eq!(p3.run_multi_paxos().await, Ok(Step::Progress));
    assert_eq!(p3.run_multi_paxos().await, Ok(Step::Progress));
    tokio::time::sleep(Duration::from_millis(1)).await;
    for node in &cluster.acceptors {
        assert_eq!(node.committed(0), Some(Value::Request(request("three", 1, 3))));
    }

    let losing_round = p2.round();
    assert_eq!(p2.run_multi_paxos().await, Ok(Step::Progress));
    assert!(p2.round() > losing_round, "Re-contesting takes a new round");
    assert!(p2.round() > p3.round());
}

#[tokio::test(start_paused = true)]
async fn timeouts_retry_without_a_new_round() {
    let cluster = Cluster::new(&[1, 2, 3]);
    let (proposer, _ld) = cluster.proposer(3);
    cluster.network.cut(3, 1);
    cluster.network.cut(3, 2);

    let err = proposer.run_multi_paxos().await.unwrap_err();
    assert!(matches!(err, ProposerError::Quorum(QuorumError::Timeout { .. })));
    let round = proposer.round();
    assert_eq!(proposer.phase(), PaxosPhase::PhaseOneInFlight);

    cluster.network.heal();
    assert_eq!(proposer.run_multi_paxos().await, Ok(Step::Progress));
    assert_eq!(proposer.round(), round);
}

#[tokio::test(start_paused = true)]
async fn leadership_change_clears_state() {
    let cluster = Cluster::new(&[1, 2, 3]);
    let (proposer, ld) = cluster.proposer(3);
    assert_eq!(proposer.run_multi_paxos().await, Ok(Step::Progress));
    assert!(proposer.add_request(request("c", 1, 1)));

    ld.suspect(3);
    assert_eq!(
        proposer.run_multi_paxos().await,
        Err(ProposerError::NotLeader)
    );
    assert_eq!(proposer.phase(), PaxosPhase::Idle);
    assert_eq!(proposer.pending_requests(), 0);

    ld.restore(3);
    let before = proposer.round();
    assert_eq!(proposer.run_multi_paxos().await, Ok(Step::Progress));
    assert_eq!(proposer.round(), before.next(3));
}

#[tokio::test(start_paused = true)]
async fn prepare_starts_after_the_decided_prefix() {
    let cluster = Cluster::new(&[1, 2, 3]);
    for node in &cluster.acceptors {
        seed_accept(node, 0, 0, Value::Noop);
    }
    let (proposer, _ld) = cluster.proposer(3);
    proposer.set_adu(0);
    proposer.set_adu(0);
    assert_eq!(proposer.adu(), Some(0));

    assert_eq!(proposer.run_multi_paxos().await, Ok(Step::Progress));
    assert!(proposer.add_request(request("d", 1, 1)));
    assert_eq!(proposer.run_multi_paxos().await, Ok(Step::Progress));
    assert_eq!(proposer.run_multi_paxos().await, Ok(Step::Progress));
    tokio::time::sleep(Duration::from_millis(1)).await;
    assert_eq!(
        cluster.acceptors[0].committed(1),
        Some(Value::Request(request("d", 1, 1))),
        "Slot 0 is already decided, so new values start at slot 1"
    );
    assert_eq!(cluster.acceptors[0].committed(0), None);
}
