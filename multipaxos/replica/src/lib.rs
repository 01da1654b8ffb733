//! A Multi-Paxos replica and the client that talks to a cluster of them.

mod client;
mod decided;
mod replica;
mod response_buffer;

pub use client::PaxosClient;
pub use decided::DecidedLog;
pub use replica::{PaxosReplica, ReplicaConfig};
pub use response_buffer::ResponseBuffer;
