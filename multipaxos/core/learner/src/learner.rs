use std::collections::{BTreeMap, BTreeSet, HashMap};

use paxos_types::{
    Accept, ClientRequest, Learn, NodeId, Prepare, Promise, PromiseSlot, Response, Round, Slot,
    Value, quorum_size,
};
use quorum_call::QuorumSpec;
use tracing::debug;

/// Quorum functions for a Multi-Paxos cluster of a fixed size.
#[derive(Debug, Clone, Copy)]
pub struct PaxosQSpec {
    quorum: usize,
}

impl PaxosQSpec {
    pub fn new(cluster_size: usize) -> Self {
        PaxosQSpec {
            quorum: quorum_size(cluster_size),
        }
    }
}

impl QuorumSpec for PaxosQSpec {
    fn prepare_qf(
        &self,
        prepare: &Prepare,
        replies: &BTreeMap<NodeId, Option<Promise>>,
    ) -> Option<Promise> {
        let promises: Vec<&Promise> = replies
            .values()
            .flatten()
            .filter(|p| p.round == prepare.round)
            .collect();
        if promises.len() < self.quorum {
            return None;
        }

        let mut merged: BTreeMap<Slot, PromiseSlot> = BTreeMap::new();
        for ps in promises.iter().flat_map(|p| &p.slots) {
            if ps.slot < prepare.slot {
                continue;
            }
            match merged.get(&ps.slot) {
                Some(current) if current.vround >= ps.vround => {}
                _ => {
                    merged.insert(ps.slot, ps.clone());
                }
            }
        }

        let slots = fill_gaps(prepare.slot, prepare.round, merged);
        debug!(
            "[Learner] Promise quorum for round {} covers {} slots",
            prepare.round,
            slots.len()
        );
        Some(Promise {
            round: prepare.round,
            from: promises[0].from,
            slots,
        })
    }

    fn accept_qf(
        &self,
        accept: &Accept,
        replies: &BTreeMap<NodeId, Option<Learn>>,
    ) -> Option<Learn> {
        let mut learns = replies.values().flatten().filter(|l| l.matches(accept));
        let first = learns.next()?;
        if 1 + learns.count() < self.quorum {
            return None;
        }
        Some(first.clone())
    }

    fn commit_qf(&self, _learn: &Learn, acks: &BTreeSet<NodeId>) -> Option<()> {
        (acks.len() >= self.quorum).then_some(())
    }

    fn client_handle_qf(
        &self,
        request: &ClientRequest,
        replies: &BTreeMap<NodeId, Response>,
    ) -> Option<Response> {
        let mut votes: HashMap<&Response, usize> = HashMap::new();
        for response in replies.values() {
            if response.client_id != request.client_id
                || response.client_seq != request.client_seq
                || response.command != request.command
            {
                continue;
            }
            let count = votes.entry(response).or_default();
            *count += 1;
            if *count >= self.quorum {
                return Some(response.clone());
            }
        }
        None
    }
}

/// Turns the merged promise slots into one entry per slot in `[from, highest]`,
/// using a No-op at `round` wherever nobody reported a value.
pub fn fill_gaps(from: Slot, round: Round, mut merged: BTreeMap<Slot, PromiseSlot>) -> Vec<PromiseSlot> {
    let Some(&highest) = merged.keys().next_back() else {
        return Vec::new();
    };
    (from..=highest)
        .map(|slot| {
            merged.remove(&slot).unwrap_or(PromiseSlot {
                slot,
                vround: round,
                value: Value::Noop,
            })
        })
        .collect()
}
