use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use leader_detector::SuspectRestorer;
use paxos_types::{Heartbeat, NodeId, Reply, Request};
use quorum_call::Configuration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Eventually perfect failure detector driven by periodic ping quorum calls.
pub struct FailureDetector {
    node_id: NodeId,
    config: Configuration,
    sr: Arc<dyn SuspectRestorer>,
    delta: Duration,
    state: Mutex<DetectorState>,
}

struct DetectorState {
    alive: HashSet<NodeId>,
    suspected: HashSet<NodeId>,
    delay: Duration,
}

impl FailureDetector {
    pub fn new(
        node_id: NodeId,
        config: Configuration,
        sr: Arc<dyn SuspectRestorer>,
        delay: Duration,
        delta: Duration,
    ) -> Self {
        let alive = config.node_ids().into_iter().collect();
        FailureDetector {
            node_id,
            config,
            sr,
            delta,
            state: Mutex::new(DetectorState {
                alive,
                suspected: HashSet::new(),
                delay,
            }),
        }
    }

    pub fn delay(&self) -> Duration {
        self.state.lock().unwrap().delay
    }

    pub fn suspected(&self) -> Vec<NodeId> {
        let mut ids: Vec<_> = self.state.lock().unwrap().suspected.iter().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Answers a ping from another detector.
    pub fn ping(&self, heartbeat: Heartbeat) -> Heartbeat {
        debug!(
            "[Failure Detector] Node {} pinged by {}",
            self.node_id, heartbeat.node_id
        );
        Heartbeat {
            node_id: self.node_id,
        }
    }

    /// Marks `node_id` alive for the current tick.
    pub fn heartbeat(&self, node_id: NodeId) {
        self.state.lock().unwrap().alive.insert(node_id);
    }

    /// One detection round: ping everyone, then update suspicions.
    pub async fn perform_failure_detection(&self) {
        let nodes = self.config.size();
        let mut repliers: Vec<NodeId> = Vec::new();
        let result = self
            .config
            .quorum_call(
                Request::Ping(Heartbeat {
                    node_id: self.node_id,
                }),
                self.delay(),
                |reply| match reply {
                    Reply::Heartbeat(hb) => Some(hb),
                    _ => None,
                },
                |replies| {
                    repliers = replies.keys().copied().collect();
                    (replies.len() == nodes).then_some(())
                },
            )
            .await;
        if let Err(e) = result {
            debug!("[Failure Detector] Ping round incomplete: {e}");
        }

        for node_id in repliers {
            self.heartbeat(node_id);
        }
        self.send_status_of_nodes();
    }

    fn send_status_of_nodes(&self) {
        let mut suspects = Vec::new();
        let mut restores = Vec::new();
        {
            let mut state = self.state.lock().unwrap();
            for node_id in self.config.node_ids() {
                let alive = state.alive.contains(&node_id);
                let suspected = state.suspected.contains(&node_id);
                if !alive && !suspected {
                    state.suspected.insert(node_id);
                    suspects.push(node_id);
                } else if alive && suspected {
                    state.suspected.remove(&node_id);
                    restores.push(node_id);
                }
            }
            if !restores.is_empty() {
                state.delay += self.delta;
                info!(
                    "[Failure Detector] False suspicion, delay increased to {:?}",
                    state.delay
                );
            }
            state.alive.clear();
        }

        for node_id in suspects {
            warn!("[Failure Detector] Suspecting node {}", node_id);
            self.sr.suspect(node_id);
        }
        for node_id in restores {
            info!("[Failure Detector] Restoring node {}", node_id);
            self.sr.restore(node_id);
        }
    }

    /// Starts a detection round at every `delay` boundary until `shutdown`
    /// flips to true. The tick follows the delay as it grows.
    pub fn start(self: &Arc<Self>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        let fd = Arc::clone(self);
        tokio::spawn(async move {
            info!("[Failure Detector] Started on node {}", fd.node_id);
            let mut period = fd.delay();
            let mut ticker = detection_ticker(period);
            loop {
                if *shutdown.borrow() {
                    break;
                }
                tokio::select! {
                    _ = ticker.tick() => fd.perform_failure_detection().await,
                    res = shutdown.changed() => {
                        if res.is_err() {
                            break;
                        }
                    }
                }
                if fd.delay() != period {
                    period = fd.delay();
                    ticker = detection_ticker(period);
                }
            }
            info!("[Failure Detector] Stopped on node {}", fd.node_id);
        })
    }
}

// First tick one period from now; a late round delays the next instead of
// firing a burst.
fn detection_ticker(period: Duration) -> Interval {
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}
