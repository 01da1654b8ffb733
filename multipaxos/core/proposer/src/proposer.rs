use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use leader_detector::LeaderDetector;
use paxos_types::{
    Accept, ClientRequest, Learn, Node, NodeId, Prepare, Round, Slot, Value,
};
use quorum_call::{Configuration, PaxosConfiguration, QuorumError, QuorumSpec, Transport};
use thiserror::Error;
use tokio::sync::{Notify, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaxosPhase {
    Idle,
    PhaseOneInFlight,
    PhaseOneDone,
    AcceptInFlight,
    CommitInFlight,
}

/// Outcome of one turn of the proposer state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// A phase completed.
    Progress,
    /// Nothing queued.
    Idle,
    /// Leadership changed while a call was out; its result was dropped.
    Stale,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProposerError {
    #[error("node is not the leader")]
    NotLeader,

    #[error(transparent)]
    Quorum(#[from] QuorumError),
}

#[derive(Debug, Clone, Copy)]
pub struct ProposerConfig {
    pub phase_one_timeout: Duration,
    pub phase_two_timeout: Duration,
    /// Pause between turns of the drive loop when idle or after a failure.
    pub retry_interval: Duration,
}

impl Default for ProposerConfig {
    fn default() -> Self {
        ProposerConfig {
            phase_one_timeout: Duration::from_secs(5),
            phase_two_timeout: Duration::from_secs(5),
            retry_interval: Duration::from_millis(100),
        }
    }
}

/// Multi-Paxos proposer. Drives Prepare, Accept and Commit while the leader
/// detector names this node as leader.
pub struct Proposer {
    node_id: NodeId,
    nodes: Vec<Node>,
    transport: Arc<dyn Transport>,
    qspec: Arc<dyn QuorumSpec>,
    leader_detector: Arc<LeaderDetector>,
    config: ProposerConfig,
    state: Mutex<ProposerState>,
    wakeup: Notify,
}

struct ProposerState {
    leader: Option<NodeId>,
    /// Bumped on every leadership change or lost race.
    epoch: u64,
    phase: PaxosPhase,
    crnd: Round,
    needs_new_round: bool,
    adu: Option<Slot>,
    next_slot: Slot,
    configuration: Option<PaxosConfiguration>,
    recovered: VecDeque<Accept>,
    client_requests: VecDeque<ClientRequest>,
    in_flight: Option<Accept>,
    pending_learn: Option<Learn>,
}

impl ProposerState {
    fn next_undecided(&self) -> Slot {
        self.adu.map_or(0, |adu| adu + 1)
    }

    fn reset(&mut self) {
        self.epoch += 1;
        self.phase = PaxosPhase::Idle;
        self.configuration = None;
        self.recovered.clear();
        self.client_requests.clear();
        self.in_flight = None;
        self.pending_learn = None;
    }

    fn is_pending(&self, request: &ClientRequest) -> bool {
        let same = |value: &Value| match value {
            Value::Request(r) => r.client_id == request.client_id && r.client_seq == request.client_seq,
            Value::Noop => false,
        };
        self.client_requests
            .iter()
            .any(|r| r.client_id == request.client_id && r.client_seq == request.client_seq)
            || self.recovered.iter().any(|a| same(&a.value))
            || self.in_flight.as_ref().is_some_and(|a| same(&a.value))
            || self.pending_learn.as_ref().is_some_and(|l| same(&l.value))
    }
}

impl Proposer {
    pub fn new(
        node_id: NodeId,
        nodes: Vec<Node>,
        transport: Arc<dyn Transport>,
        qspec: Arc<dyn QuorumSpec>,
        leader_detector: Arc<LeaderDetector>,
        config: ProposerConfig,
    ) -> Self {
        let mut ids: Vec<NodeId> = nodes.iter().map(|n| n.node_id).collect();
        ids.sort_unstable();
        ids.dedup();
        let rank = ids.iter().position(|&id| id == node_id).unwrap_or(ids.len());

        Proposer {
            node_id,
            nodes,
            transport,
            qspec,
            leader_detector,
            config,
            state: Mutex::new(ProposerState {
                leader: None,
                epoch: 0,
                phase: PaxosPhase::Idle,
                crnd: Round::initial(rank),
                needs_new_round: false,
                adu: None,
                next_slot: 0,
                configuration: None,
                recovered: VecDeque::new(),
                client_requests: VecDeque::new(),
                in_flight: None,
                pending_learn: None,
            }),
            wakeup: Notify::new(),
        }
    }

    pub fn round(&self) -> Round {
        self.state.lock().unwrap().crnd
    }

    pub fn phase(&self) -> PaxosPhase {
        self.state.lock().unwrap().phase
    }

    pub fn adu(&self) -> Option<Slot> {
        self.state.lock().unwrap().adu
    }

    pub fn pending_requests(&self) -> usize {
        self.state.lock().unwrap().client_requests.len()
    }

    pub fn is_leader(&self) -> bool {
        self.leader_detector.leader() == Some(self.node_id)
    }

    /// Moves to the next round owned by this node.
    pub fn increase_round(&self) -> Round {
        let mut st = self.state.lock().unwrap();
        self.bump_round(&mut st)
    }

    fn bump_round(&self, st: &mut ProposerState) -> Round {
        st.crnd = st.crnd.next(self.nodes.len());
        debug!("[Core Proposer] Increased current round to {}", st.crnd);
        st.crnd
    }

    /// Records that every slot up to and including `slot` has been applied.
    pub fn set_adu(&self, slot: Slot) {
        let mut st = self.state.lock().unwrap();
        if st.adu.is_none_or(|adu| slot > adu) {
            st.adu = Some(slot);
        }
    }

    /// Queues a client request. Only the leader keeps it; a request already
    /// queued or in flight is not queued twice.
    pub fn add_request(&self, request: ClientRequest) -> bool {
        self.sync_leader();
        let mut st = self.state.lock().unwrap();
        if st.leader != Some(self.node_id) {
            debug!(
                "[Core Proposer] Not leader, ignoring request {}/{}",
                request.client_id, request.client_seq
            );
            return false;
        }
        if st.is_pending(&request) {
            return false;
        }
        st.client_requests.push_back(request);
        drop(st);
        self.wakeup.notify_one();
        true
    }

    fn set_phase(st: &mut ProposerState, phase: PaxosPhase) {
        if st.phase != phase {
            debug!(
                "[Core Proposer] Transitioning from phase {:?} to {:?}",
                st.phase, phase
            );
            st.phase = phase;
        }
    }

    /// Adopts the leader detector's current answer, resetting on change.
    fn sync_leader(&self) {
        let leader = self.leader_detector.leader();
        let mut st = self.state.lock().unwrap();
        if st.leader == leader {
            return;
        }
        let was_leader = st.leader == Some(self.node_id);
        st.leader = leader;
        st.reset();
        if leader == Some(self.node_id) {
            st.needs_new_round = true;
            info!("[Core Proposer] Leadership acquired (epoch {})", st.epoch);
        } else if was_leader {
            warn!(
                "[Core Proposer] Leadership lost to {:?}, dropping queued requests",
                leader
            );
        }
    }

    // A quorum refused our round: someone with a higher round is around.
    fn lose_race(&self, st: &mut ProposerState) {
        warn!(
            "[Core Proposer] Round {} rejected by a quorum, restarting phase one",
            st.crnd
        );
        st.reset();
        st.needs_new_round = true;
    }

    fn configuration(&self, st: &mut ProposerState) -> PaxosConfiguration {
        st.configuration
            .get_or_insert_with(|| {
                PaxosConfiguration::new(
                    Configuration::new(self.nodes.clone(), Arc::clone(&self.transport)),
                    Arc::clone(&self.qspec),
                )
            })
            .clone()
    }

    /// Runs one step of the protocol for the current phase.
    pub async fn run_multi_paxos(&self) -> Result<Step, ProposerError> {
        self.sync_leader();
        let phase = {
            let st = self.state.lock().unwrap();
            if st.leader != Some(self.node_id) {
                return Err(ProposerError::NotLeader);
            }
            st.phase
        };
        match phase {
            PaxosPhase::Idle | PaxosPhase::PhaseOneInFlight => self.run_phase_one().await,
            PaxosPhase::PhaseOneDone | PaxosPhase::AcceptInFlight => self.run_phase_two().await,
            PaxosPhase::CommitInFlight => self.run_commit().await,
        }
    }

    async fn run_phase_one(&self) -> Result<Step, ProposerError> {
        let (configuration, prepare, epoch) = {
            let mut st = self.state.lock().unwrap();
            if st.needs_new_round {
                self.bump_round(&mut st);
                st.needs_new_round = false;
            }
            let prepare = Prepare {
                round: st.crnd,
                slot: st.next_undecided(),
            };
            Self::set_phase(&mut st, PaxosPhase::PhaseOneInFlight);
            (self.configuration(&mut st), prepare, st.epoch)
        };

        debug!(
            "[Core Proposer] Prepare round {} from slot {}",
            prepare.round, prepare.slot
        );
        let result = configuration
            .prepare(prepare, self.config.phase_one_timeout)
            .await;

        let mut st = self.state.lock().unwrap();
        if st.epoch != epoch {
            return Ok(Step::Stale);
        }
        let promise = match result {
            Ok(promise) => promise,
            Err(e @ QuorumError::Rejected { .. }) => {
                self.lose_race(&mut st);
                return Err(e.into());
            }
            Err(e) => return Err(e.into()),
        };

        let round = st.crnd;
        st.recovered = promise
            .slots
            .into_iter()
            .filter(|ps| ps.slot >= prepare.slot)
            .map(|ps| Accept {
                round,
                slot: ps.slot,
                value: ps.value,
            })
            .collect();
        let recovered: Vec<(String, u64)> = st
            .recovered
            .iter()
            .filter_map(|a| match &a.value {
                Value::Request(r) => Some(r.key()),
                Value::Noop => None,
            })
            .collect();
        st.client_requests
            .retain(|r| !recovered.contains(&(r.client_id.clone(), r.client_seq)));
        st.next_slot = st
            .recovered
            .back()
            .map_or(prepare.slot, |a| a.slot + 1)
            .max(prepare.slot);
        info!(
            "[Core Proposer] Phase one done in round {}: {} recovered slots, next slot {}",
            round,
            st.recovered.len(),
            st.next_slot
        );
        Self::set_phase(&mut st, PaxosPhase::PhaseOneDone);
        Ok(Step::Progress)
    }

    async fn run_phase_two(&self) -> Result<Step, ProposerError> {
        let (configuration, accept, epoch) = {
            let mut st = self.state.lock().unwrap();
            let accept = if let Some(accept) = st.in_flight.clone() {
                accept
            } else if let Some(accept) = st.recovered.pop_front() {
                accept
            } else if let Some(request) = st.client_requests.pop_front() {
                let accept = Accept {
                    round: st.crnd,
                    slot: st.next_slot,
                    value: Value::Request(request),
                };
                st.next_slot += 1;
                accept
            } else {
                return Ok(Step::Idle);
            };
            st.in_flight = Some(accept.clone());
            Self::set_phase(&mut st, PaxosPhase::AcceptInFlight);
            (self.configuration(&mut st), accept, st.epoch)
        };

        debug!(
            "[Core Proposer] Accept slot {} in round {}",
            accept.slot, accept.round
        );
        let result = configuration
            .accept(accept, self.config.phase_two_timeout)
            .await;

        let mut st = self.state.lock().unwrap();
        if st.epoch != epoch {
            return Ok(Step::Stale);
        }
        match result {
            Ok(learn) => {
                st.in_flight = None;
                st.pending_learn = Some(learn);
                Self::set_phase(&mut st, PaxosPhase::CommitInFlight);
                Ok(Step::Progress)
            }
            Err(e @ QuorumError::Rejected { .. }) => {
                self.lose_race(&mut st);
                Err(e.into())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn run_commit(&self) -> Result<Step, ProposerError> {
        let (configuration, learn, epoch) = {
            let mut st = self.state.lock().unwrap();
            let Some(learn) = st.pending_learn.clone() else {
                Self::set_phase(&mut st, PaxosPhase::PhaseOneDone);
                return Ok(Step::Progress);
            };
            (self.configuration(&mut st), learn, st.epoch)
        };

        let slot = learn.slot;
        let result = configuration
            .commit(learn, self.config.phase_two_timeout)
            .await;

        let mut st = self.state.lock().unwrap();
        if st.epoch != epoch {
            return Ok(Step::Stale);
        }
        result?;
        debug!("[Core Proposer] Slot {} committed", slot);
        st.pending_learn = None;
        Self::set_phase(&mut st, PaxosPhase::PhaseOneDone);
        Ok(Step::Progress)
    }

    /// Spawns the drive loop. It runs until `shutdown` flips to true.
    pub fn start(self: &Arc<Self>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        let proposer = Arc::clone(self);
        let mut leader_changes = self.leader_detector.subscribe();
        tokio::spawn(async move {
            info!("[Core Proposer] Started on node {}", proposer.node_id);
            loop {
                if *shutdown.borrow() {
                    break;
                }
                match proposer.run_multi_paxos().await {
                    Ok(Step::Progress) | Ok(Step::Stale) => continue,
                    Ok(Step::Idle) | Err(ProposerError::NotLeader) => {}
                    Err(e) => warn!("[Core Proposer] Step failed: {e}"),
                }
                tokio::select! {
                    res = shutdown.changed() => {
                        if res.is_err() {
                            break;
                        }
                    }
                    Some(leader) = leader_changes.recv() => {
                        debug!("[Core Proposer] Leader change to {:?}", leader);
                    }
                    _ = proposer.wakeup.notified() => {}
                    _ = tokio::time::sleep(proposer.config.retry_interval) => {}
                }
            }
            info!("[Core Proposer] Stopped on node {}", proposer.node_id);
        })
    }
}
