use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use learner::PaxosQSpec;
use paxos_types::{ClientRequest, Node, Response, Transaction};
use quorum_call::{Configuration, PaxosConfiguration, QuorumError, Transport};
use tracing::{debug, warn};

/// Submits transactions to every replica and waits for a quorum of matching
/// responses. Retries reuse the sequence number, so a replica that already
/// applied the request answers from its response buffer.
pub struct PaxosClient {
    client_id: String,
    next_seq: AtomicU64,
    config: PaxosConfiguration,
    timeout: Duration,
    retries: usize,
}

impl PaxosClient {
    pub fn new(
        client_id: impl Into<String>,
        nodes: Vec<Node>,
        transport: Arc<dyn Transport>,
        timeout: Duration,
        retries: usize,
    ) -> Self {
        let qspec = Arc::new(PaxosQSpec::new(nodes.len()));
        PaxosClient {
            client_id: client_id.into(),
            next_seq: AtomicU64::new(1),
            config: PaxosConfiguration::new(Configuration::new(nodes, transport), qspec),
            timeout,
            retries,
        }
    }

    pub async fn submit(&self, command: Transaction) -> Result<Response, QuorumError> {
        let request = ClientRequest {
            client_id: self.client_id.clone(),
            client_seq: self.next_seq.fetch_add(1, Ordering::SeqCst),
            command,
        };
        self.submit_request(request).await
    }

    /// Sends an already numbered request, retrying on failure.
    pub async fn submit_request(&self, request: ClientRequest) -> Result<Response, QuorumError> {
        let mut attempt = 0;
        loop {
            match self.config.client_handle(request.clone(), self.timeout).await {
                Ok(response) => {
                    debug!(
                        "[Client] {}/{} answered after {} attempts",
                        request.client_id,
                        request.client_seq,
                        attempt + 1
                    );
                    return Ok(response);
                }
                Err(e) if attempt < self.retries => {
                    warn!(
                        "[Client] {}/{} attempt {} failed: {e}",
                        request.client_id,
                        request.client_seq,
                        attempt + 1
                    );
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
