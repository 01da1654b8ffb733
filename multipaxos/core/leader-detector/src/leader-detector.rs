use std::collections::HashSet;
use std::sync::Mutex;

use paxos_types::NodeId;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{info, warn};

/// Receives suspicion changes from a failure detector.
pub trait SuspectRestorer: Send + Sync {
    fn suspect(&self, node_id: NodeId);
    fn restore(&self, node_id: NodeId);
}

/// Monarchical leader detector: the leader is the highest id not suspected.
///
/// Leader changes are pushed to subscribers without blocking. A subscriber
/// that has not consumed the previous notification misses the new one, so
/// consumers should read [`LeaderDetector::leader`] for the current value.
pub struct LeaderDetector {
    nodes: Vec<NodeId>,
    state: Mutex<DetectorState>,
}

struct DetectorState {
    suspected: HashSet<NodeId>,
    leader: Option<NodeId>,
    subscribers: Vec<mpsc::Sender<Option<NodeId>>>,
}

impl LeaderDetector {
    pub fn new(mut nodes: Vec<NodeId>) -> Self {
        nodes.sort_unstable();
        nodes.dedup();
        let leader = nodes.last().copied();
        info!("[Leader Detector] Initialized with leader {:?}", leader);
        LeaderDetector {
            nodes,
            state: Mutex::new(DetectorState {
                suspected: HashSet::new(),
                leader,
                subscribers: Vec::new(),
            }),
        }
    }

    /// Current leader, `None` when every node is suspected.
    pub fn leader(&self) -> Option<NodeId> {
        self.state.lock().unwrap().leader
    }

    pub fn is_suspected(&self, node_id: NodeId) -> bool {
        self.state.lock().unwrap().suspected.contains(&node_id)
    }

    /// A fresh channel carrying every leader change from now on.
    pub fn subscribe(&self) -> mpsc::Receiver<Option<NodeId>> {
        let (tx, rx) = mpsc::channel(1);
        self.state.lock().unwrap().subscribers.push(tx);
        rx
    }

    fn update(&self, node_id: NodeId, suspect: bool) {
        if !self.nodes.contains(&node_id) {
            return;
        }
        let mut state = self.state.lock().unwrap();
        let changed = if suspect {
            state.suspected.insert(node_id)
        } else {
            state.suspected.remove(&node_id)
        };
        if !changed {
            return;
        }

        let leader = self
            .nodes
            .iter()
            .rev()
            .find(|&&id| !state.suspected.contains(&id))
            .copied();
        if leader == state.leader {
            return;
        }

        if suspect {
            warn!(
                "[Leader Detector] Node {} suspected - New leader is {:?}",
                node_id, leader
            );
        } else {
            info!(
                "[Leader Detector] Node {} restored - Leader is {:?}",
                node_id, leader
            );
        }
        state.leader = leader;
        state.subscribers.retain(|tx| match tx.try_send(leader) {
            Ok(()) | Err(TrySendError::Full(_)) => true,
            Err(TrySendError::Closed(_)) => false,
        });
    }
}

impl SuspectRestorer for LeaderDetector {
    fn suspect(&self, node_id: NodeId) {
        self.update(node_id, true);
    }

    fn restore(&self, node_id: NodeId) {
        self.update(node_id, false);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn highest_unsuspected_id_leads() {
        let ld = LeaderDetector::new(vec![2, 3, 1]);
        assert_eq!(ld.leader(), Some(3));
        ld.suspect(3);
        assert_eq!(ld.leader(), Some(2));
        ld.suspect(1);
        assert_eq!(ld.leader(), Some(2));
        ld.suspect(2);
        assert_eq!(ld.leader(), None, "No leader when everyone is suspected");
        ld.restore(1);
        assert_eq!(ld.leader(), Some(1));
    }

    #[test]
    fn unknown_nodes_are_ignored() {
        let ld = LeaderDetector::new(vec![1, 2]);
        ld.suspect(7);
        assert_eq!(ld.leader(), Some(2));
        assert!(!ld.is_suspected(7));
    }

    #[tokio::test]
    async fn subscribers_hear_only_real_changes() {
        let ld = LeaderDetector::new(vec![1, 2, 3]);
        let mut rx = ld.subscribe();

        ld.suspect(1);
        assert!(rx.try_recv().is_err(), "Suspecting a follower changes nothing");

        ld.suspect(3);
        assert_eq!(rx.recv().await, Some(Some(2)));

        ld.suspect(3);
        ld.restore(1);
        assert!(rx.try_recv().is_err(), "Repeated events must not notify");

        ld.restore(3);
        assert_eq!(rx.recv().await, Some(Some(3)));
    }

    #[tokio::test]
    async fn slow_subscribers_miss_updates() {
        let ld = LeaderDetector::new(vec![1, 2, 3]);
        let mut slow = ld.subscribe();
        let mut fast = ld.subscribe();

        ld.suspect(3);
        assert_eq!(fast.recv().await, Some(Some(2)));
        ld.suspect(2);
        assert_eq!(fast.recv().await, Some(Some(1)));

        assert_eq!(slow.recv().await, Some(Some(2)));
        assert!(slow.try_recv().is_err(), "The second change was dropped");
        assert_eq!(ld.leader(), Some(1));
    }

    #[test]
    fn dropped_subscribers_are_pruned() {
        let ld = LeaderDetector::new(vec![1, 2]);
        drop(ld.subscribe());
        ld.suspect(2);
        assert!(ld.state.lock().unwrap().subscribers.is_empty());
    }
}
