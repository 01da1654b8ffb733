use std::collections::HashMap;

use paxos_types::{Operation, StateMachine, Transaction, TransactionResult};
use tracing::{info, warn};

/// A single bank account. Balances are whole NOK.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Account {
    pub number: u32,
    pub balance: i64,
}

impl Account {
    /// Applies `txn` to this account. A failed transaction leaves the balance
    /// untouched and carries the reason in `error_message`.
    pub fn process(&mut self, txn: &Transaction) -> TransactionResult {
        let error_message = match txn.op {
            Operation::Balance => None,
            Operation::Deposit if txn.amount < 0 => Some(format!(
                "Can't deposit negative amount ({} NOK)",
                txn.amount
            )),
            Operation::Deposit => self.update(self.balance.checked_add(txn.amount), txn),
            Operation::Withdrawal if txn.amount > self.balance => Some(format!(
                "Not enough funds for withdrawal. Balance: {} NOK - Requested {} NOK",
                self.balance, txn.amount
            )),
            Operation::Withdrawal => self.update(self.balance.checked_sub(txn.amount), txn),
        };
        TransactionResult {
            account_number: self.number,
            balance: self.balance,
            error_message,
        }
    }

    // Stores the new balance, or reports an overflow and keeps the old one.
    fn update(&mut self, balance: Option<i64>, txn: &Transaction) -> Option<String> {
        match balance {
            Some(balance) => {
                self.balance = balance;
                None
            }
            None => Some(format!(
                "{} of {} NOK would overflow the balance ({} NOK)",
                txn.op, txn.amount, self.balance
            )),
        }
    }
}

/// The replicated bank: accounts keyed by number plus the history of every
/// transaction applied, in order.
#[derive(Debug, Default)]
pub struct Bank {
    accounts: HashMap<u32, Account>,
    history: Vec<Transaction>,
}

impl Bank {
    pub fn new() -> Self {
        Bank::default()
    }

    pub fn balance(&self, account_number: u32) -> Option<i64> {
        self.accounts.get(&account_number).map(|a| a.balance)
    }

    pub fn history(&self) -> &[Transaction] {
        &self.history
    }
}

impl StateMachine for Bank {
    fn apply(&mut self, transaction: &Transaction) -> TransactionResult {
        self.history.push(transaction.clone());
        let account = self
            .accounts
            .entry(transaction.account_number)
            .or_insert_with(|| Account {
                number: transaction.account_number,
                balance: 0,
            });
        let result = account.process(transaction);
        match &result.error_message {
            None => info!(
                "[Bank] {} of {} on account {} -> balance {}",
                transaction.op, transaction.amount, result.account_number, result.balance
            ),
            Some(reason) => warn!(
                "[Bank] {} on account {} failed: {}",
                transaction.op, result.account_number, reason
            ),
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deposits_and_withdrawals_move_the_balance() {
        let mut bank = Bank::new();
        assert_eq!(bank.apply(&Transaction::deposit(1, 100)).balance, 100);
        let result = bank.apply(&Transaction::withdrawal(1, 30));
        assert_eq!(result.balance, 70);
        assert_eq!(result.error_message, None);
        assert_eq!(bank.apply(&Transaction::balance(1)).balance, 70);
        assert_eq!(bank.history().len(), 3);
    }

    #[test]
    fn negative_deposit_is_refused() {
        let mut bank = Bank::new();
        let result = bank.apply(&Transaction::deposit(4, -5));
        assert_eq!(result.balance, 0);
        assert_eq!(
            result.error_message.as_deref(),
            Some("Can't deposit negative amount (-5 NOK)")
        );
    }

    #[test]
    fn overdraft_is_refused() {
        let mut bank = Bank::new();
        bank.apply(&Transaction::deposit(2, 40));
        let result = bank.apply(&Transaction::withdrawal(2, 50));
        assert_eq!(result.balance, 40, "Balance is unchanged on failure");
        assert_eq!(
            result.error_message.as_deref(),
            Some("Not enough funds for withdrawal. Balance: 40 NOK - Requested 50 NOK")
        );
    }

    #[test]
    fn deposit_overflow_is_refused() {
        let mut bank = Bank::new();
        assert_eq!(bank.apply(&Transaction::deposit(1, i64::MAX)).balance, i64::MAX);
        let result = bank.apply(&Transaction::deposit(1, 1));
        assert_eq!(result.balance, i64::MAX);
        assert!(result.error_message.unwrap().contains("overflow"));
        assert_eq!(bank.balance(1), Some(i64::MAX));
    }

    #[test]
    fn negative_withdrawal_overflow_is_refused() {
        let mut bank = Bank::new();
        bank.apply(&Transaction::deposit(3, 10));
        let result = bank.apply(&Transaction::withdrawal(3, i64::MIN));
        assert_eq!(result.balance, 10);
        assert!(result.error_message.unwrap().contains("overflow"));

        let result = bank.apply(&Transaction::withdrawal(3, -5));
        assert_eq!(result.error_message, None);
        assert_eq!(result.balance, 15);
    }

    #[test]
    fn unknown_accounts_start_empty() {
        let mut bank = Bank::new();
        assert_eq!(bank.balance(9), None);
        let result = bank.apply(&Transaction::balance(9));
        assert_eq!(result.account_number, 9);
        assert_eq!(result.balance, 0);
        assert_eq!(bank.balance(9), Some(0));
    }
}
