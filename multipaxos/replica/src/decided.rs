use std::collections::BTreeMap;

use paxos_types::{Response, Slot, StateMachine, Value};
use tracing::{debug, info};

/// Decided values, applied to the state machine strictly in slot order.
pub struct DecidedLog<S> {
    state_machine: S,
    adu: Option<Slot>,
    buffered: BTreeMap<Slot, Value>,
    decided: BTreeMap<Slot, Value>,
}

impl<S: StateMachine> DecidedLog<S> {
    pub fn new(state_machine: S) -> Self {
        DecidedLog {
            state_machine,
            adu: None,
            buffered: BTreeMap::new(),
            decided: BTreeMap::new(),
        }
    }

    /// Highest slot such that it and every slot before it are applied.
    pub fn adu(&self) -> Option<Slot> {
        self.adu
    }

    pub fn next_expected(&self) -> Slot {
        self.adu.map_or(0, |adu| adu + 1)
    }

    pub fn decided(&self, slot: Slot) -> Option<&Value> {
        self.decided.get(&slot)
    }

    pub fn buffered(&self) -> usize {
        self.buffered.len()
    }

    pub fn state_machine(&self) -> &S {
        &self.state_machine
    }

    /// Records the decision for `slot` and applies everything that became
    /// contiguous. Returns a response for each client value applied.
    pub fn handle_decided_value(&mut self, slot: Slot, value: Value) -> Vec<Response> {
        let expected = self.next_expected();
        if slot < expected {
            debug!("[Replica] Slot {} already applied, ignoring", slot);
            return Vec::new();
        }
        if slot > expected {
            debug!(
                "[Replica] Buffering slot {} while waiting for slot {}",
                slot, expected
            );
            self.buffered.entry(slot).or_insert(value);
            return Vec::new();
        }

        let mut responses = Vec::new();
        let mut next = Some((slot, value));
        while let Some((slot, value)) = next {
            if let Value::Request(request) = &value {
                let result = self.state_machine.apply(&request.command);
                responses.push(Response {
                    client_id: request.client_id.clone(),
                    client_seq: request.client_seq,
                    command: request.command.clone(),
                    result,
                });
            }
            info!("[Replica] Applied slot {}", slot);
            self.decided.insert(slot, value);
            self.adu = Some(slot);
            next = self.buffered.remove(&(slot + 1)).map(|v| (slot + 1, v));
        }
        responses
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use paxos_types::{ClientRequest, Transaction, TransactionResult};

    #[derive(Default)]
    struct Counter {
        applied: Vec<i64>,
    }

    impl StateMachine for Counter {
        fn apply(&mut self, transaction: &Transaction) -> TransactionResult {
            self.applied.push(transaction.amount);
            TransactionResult {
                account_number: transaction.account_number,
                balance: self.applied.iter().sum(),
                error_message: None,
            }
        }
    }

    fn value(amount: i64) -> Value {
        Value::Request(ClientRequest {
            client_id: "c".into(),
            client_seq: amount as u64,
            command: Transaction::deposit(1, amount),
        })
    }

    #[test]
    fn out_of_order_commits_apply_in_slot_order() {
        let mut log = DecidedLog::new(Counter::default());
        assert!(log.handle_decided_value(2, value(3)).is_empty());
        assert!(log.handle_decided_value(1, Value::Noop).is_empty());
        assert_eq!(log.adu(), None, "Nothing applies before slot 0");
        assert_eq!(log.buffered(), 2);

        let responses = log.handle_decided_value(0, value(1));
        assert_eq!(responses.len(), 2, "No-ops produce no response");
        assert_eq!(log.state_machine().applied, vec![1, 3]);
        assert_eq!(log.adu(), Some(2));
        assert_eq!(log.buffered(), 0);
        assert_eq!(log.decided(1), Some(&Value::Noop));
    }

    #[test]
    fn duplicate_commits_are_ignored() {
        let mut log = DecidedLog::new(Counter::default());
        assert_eq!(log.handle_decided_value(0, value(5)).len(), 1);
        assert!(log.handle_decided_value(0, value(5)).is_empty());
        assert_eq!(log.state_machine().applied, vec![5]);
    }

    #[test]
    fn long_backlogs_drain_without_recursion() {
        let mut log = DecidedLog::new(Counter::default());
        for slot in (1..50_000).rev() {
            log.handle_decided_value(slot, Value::Noop);
        }
        log.handle_decided_value(0, Value::Noop);
        assert_eq!(log.adu(), Some(49_999));
    }
}
