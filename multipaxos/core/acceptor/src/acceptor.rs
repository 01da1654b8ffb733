use std::collections::BTreeMap;

use paxos_types::{Accept, Learn, NodeId, Prepare, Promise, PromiseSlot, Round, Slot};
use tracing::{debug, warn};

/// Paxos acceptor for every slot of the log.
///
/// Purely reactive: it answers prepares and accepts and never calls out.
#[derive(Debug)]
pub struct Acceptor {
    node_id: NodeId,
    rnd: Round,
    accepted: BTreeMap<Slot, PromiseSlot>,
}

impl Acceptor {
    pub fn new(node_id: NodeId) -> Self {
        Acceptor {
            node_id,
            rnd: Round::NONE,
            accepted: BTreeMap::new(),
        }
    }

    /// Highest round promised so far.
    pub fn promised(&self) -> Round {
        self.rnd
    }

    pub fn accepted(&self, slot: Slot) -> Option<&PromiseSlot> {
        self.accepted.get(&slot)
    }

    /// Accepted values for `slot` and every later slot.
    fn collect_accepted_from(&self, slot: Slot) -> Vec<PromiseSlot> {
        self.accepted
            .range(slot..)
            .map(|(_, ps)| ps.clone())
            .collect()
    }

    /// Promises not to accept anything below `prepare.round`. Returns `None`
    /// if a higher round has already been promised.
    pub fn handle_prepare(&mut self, prepare: &Prepare) -> Option<Promise> {
        if prepare.round < self.rnd {
            warn!(
                "[Core Acceptor] Rejected prepare for slot {} with round {} (promised {})",
                prepare.slot, prepare.round, self.rnd
            );
            return None;
        }
        if prepare.round > self.rnd {
            debug!(
                "[Core Acceptor] Promised round {} (was {})",
                prepare.round, self.rnd
            );
            self.rnd = prepare.round;
        }

        Some(Promise {
            round: prepare.round,
            from: self.node_id,
            slots: self.collect_accepted_from(prepare.slot),
        })
    }

    /// Accepts `accept.value` for its slot unless a higher round was promised.
    pub fn handle_accept(&mut self, accept: &Accept) -> Option<Learn> {
        if accept.round < self.rnd {
            warn!(
                "[Core Acceptor] Rejected accept for slot {} with round {} (promised {})",
                accept.slot, accept.round, self.rnd
            );
            return None;
        }
        self.rnd = accept.round;

        let replace = self
            .accepted
            .get(&accept.slot)
            .is_none_or(|existing| existing.vround <= accept.round);
        if replace {
            self.accepted.insert(
                accept.slot,
                PromiseSlot {
                    slot: accept.slot,
                    vround: accept.round,
                    value: accept.value.clone(),
                },
            );
        }
        debug!(
            "[Core Acceptor] Accepted slot {} in round {}",
            accept.slot, accept.round
        );

        Some(Learn {
            round: accept.round,
            slot: accept.slot,
            value: accept.value.clone(),
            from: self.node_id,
        })
    }
}
