//! Quorum calls over a pluggable request/response transport.

mod config;
mod local;
mod paxos;
mod transport;

pub use config::{Configuration, QuorumError};
pub use local::LocalNetwork;
pub use paxos::{PaxosConfiguration, QuorumSpec};
pub use transport::{CallError, Handler, Transport};
