use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operation {
    Balance,
    Deposit,
    Withdrawal,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Operation::Balance => "balance",
            Operation::Deposit => "deposit",
            Operation::Withdrawal => "withdrawal",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Transaction {
    pub account_number: u32,
    pub op: Operation,
    pub amount: i64,
}

impl Transaction {
    pub fn balance(account_number: u32) -> Self {
        Transaction {
            account_number,
            op: Operation::Balance,
            amount: 0,
        }
    }

    pub fn deposit(account_number: u32, amount: i64) -> Self {
        Transaction {
            account_number,
            op: Operation::Deposit,
            amount,
        }
    }

    pub fn withdrawal(account_number: u32, amount: i64) -> Self {
        Transaction {
            account_number,
            op: Operation::Withdrawal,
            amount,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TransactionResult {
    pub account_number: u32,
    pub balance: i64,
    pub error_message: Option<String>,
}

/// What a client gets back once its request has been decided and applied.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Response {
    pub client_id: String,
    pub client_seq: u64,
    pub command: Transaction,
    pub result: TransactionResult,
}

/// The replicated application. Only ever called with decided commands, in slot order.
pub trait StateMachine: Send {
    fn apply(&mut self, transaction: &Transaction) -> TransactionResult;
}
