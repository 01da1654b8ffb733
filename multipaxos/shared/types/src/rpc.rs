use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{Accept, ClientRequest, Heartbeat, Learn, Prepare, Promise, Response};

/// Every remote call a replica answers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Request {
    Prepare(Prepare),
    Accept(Accept),
    Commit(Learn),
    ClientHandle(ClientRequest),
    Ping(Heartbeat),
}

impl Request {
    pub fn kind(&self) -> &'static str {
        match self {
            Request::Prepare(_) => "prepare",
            Request::Accept(_) => "accept",
            Request::Commit(_) => "commit",
            Request::ClientHandle(_) => "client-handle",
            Request::Ping(_) => "ping",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Reply {
    /// `None` when the acceptor has promised a higher round.
    Promise(Option<Promise>),
    /// `None` when the acceptor has promised a higher round.
    Learn(Option<Learn>),
    Ack,
    Response(Response),
    Heartbeat(Heartbeat),
}

/// Errors a replica reports back to the caller of a remote call.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum ReplicaError {
    #[error("no response found for client {client_id} seq {client_seq}")]
    NoResponse { client_id: String, client_seq: u64 },

    #[error("replica shutting down")]
    ShuttingDown,
}
