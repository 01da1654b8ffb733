use std::collections::HashMap;
use std::time::Duration;

use paxos_types::Response;
use tokio::sync::oneshot;
use tokio::time::Instant;

type Key = (String, u64);

enum Entry {
    Ready(Response, Instant),
    Waiting(Vec<oneshot::Sender<Response>>),
}

/// Responses for decided client values, keyed by `(client_id, client_seq)`.
///
/// A `ClientHandle` call either finds its response here or parks a oneshot
/// sender that the commit path fires once. Ready responses stay until they
/// are older than the TTL so a retried request is answered from the buffer.
pub struct ResponseBuffer {
    entries: HashMap<Key, Entry>,
    ttl: Duration,
}

impl ResponseBuffer {
    pub fn new(ttl: Duration) -> Self {
        ResponseBuffer {
            entries: HashMap::new(),
            ttl,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn insert(&mut self, response: Response) {
        let now = Instant::now();
        self.prune(now);
        let key = (response.client_id.clone(), response.client_seq);
        if let Some(Entry::Waiting(waiters)) = self.entries.remove(&key) {
            for waiter in waiters {
                let _ = waiter.send(response.clone());
            }
        }
        self.entries.insert(key, Entry::Ready(response, now));
    }

    /// The buffered response for `key`, or a receiver fired when it arrives.
    pub fn get_or_wait(
        &mut self,
        client_id: &str,
        client_seq: u64,
    ) -> Result<Response, oneshot::Receiver<Response>> {
        let key = (client_id.to_string(), client_seq);
        match self.entries.get_mut(&key) {
            Some(Entry::Ready(response, _)) => Ok(response.clone()),
            Some(Entry::Waiting(waiters)) => {
                let (tx, rx) = oneshot::channel();
                waiters.push(tx);
                Err(rx)
            }
            None => {
                let (tx, rx) = oneshot::channel();
                self.entries.insert(key, Entry::Waiting(vec![tx]));
                Err(rx)
            }
        }
    }

    fn prune(&mut self, now: Instant) {
        let ttl = self.ttl;
        self.entries.retain(|_, entry| match entry {
            Entry::Ready(_, at) => now.duration_since(*at) < ttl,
            Entry::Waiting(waiters) => {
                waiters.retain(|w| !w.is_closed());
                !waiters.is_empty()
            }
        });
    }
}
