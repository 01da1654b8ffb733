use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use futures::FutureExt;
use futures::future::{self, BoxFuture};
use paxos_types::{Node, NodeId, Reply, Request};
use tracing::trace;

use crate::transport::{CallError, Handler, Transport};

type Filter = Arc<dyn Fn(NodeId, NodeId, &Request) -> bool + Send + Sync>;

/// How long a dropped request stays outstanding before its call fails.
pub const DROPPED_CALL_LIFETIME: Duration = Duration::from_secs(30);

/// In-process network connecting replicas that live in the same runtime.
///
/// Crashed nodes refuse every call to or from them. Cut links and filtered
/// requests are dropped silently: the caller only sees its own timeout, and
/// the call itself fails after [`DROPPED_CALL_LIFETIME`].
#[derive(Default)]
pub struct LocalNetwork {
    state: Mutex<NetworkState>,
}

#[derive(Default)]
struct NetworkState {
    handlers: HashMap<NodeId, Weak<dyn Handler>>,
    crashed: HashSet<NodeId>,
    cut: HashSet<(NodeId, NodeId)>,
    filter: Option<Filter>,
    latency: Duration,
}

enum Route {
    Deliver(Arc<dyn Handler>, Duration),
    Refuse,
    Drop,
}

impl LocalNetwork {
    pub fn new() -> Arc<Self> {
        Arc::new(LocalNetwork::default())
    }

    pub fn with_latency(latency: Duration) -> Arc<Self> {
        let network = LocalNetwork::default();
        network.state.lock().unwrap().latency = latency;
        Arc::new(network)
    }

    pub fn register(&self, node_id: NodeId, handler: Arc<dyn Handler>) {
        let mut state = self.state.lock().unwrap();
        state.handlers.insert(node_id, Arc::downgrade(&handler));
    }

    /// Transport used by `from` to reach the other nodes.
    pub fn transport(self: &Arc<Self>, from: NodeId) -> Arc<dyn Transport> {
        Arc::new(LocalTransport {
            from,
            network: Arc::clone(self),
        })
    }

    pub fn crash(&self, node_id: NodeId) {
        self.state.lock().unwrap().crashed.insert(node_id);
    }

    pub fn recover(&self, node_id: NodeId) {
        self.state.lock().unwrap().crashed.remove(&node_id);
    }

    /// Drops every request sent from `from` to `to`.
    pub fn cut(&self, from: NodeId, to: NodeId) {
        self.state.lock().unwrap().cut.insert((from, to));
    }

    pub fn heal(&self) {
        self.state.lock().unwrap().cut.clear();
    }

    /// Delivers a request only when `filter(from, to, request)` holds.
    pub fn set_filter<F>(&self, filter: F)
    where
        F: Fn(NodeId, NodeId, &Request) -> bool + Send + Sync + 'static,
    {
        self.state.lock().unwrap().filter = Some(Arc::new(filter));
    }

    pub fn clear_filter(&self) {
        self.state.lock().unwrap().filter = None;
    }

    fn route(&self, from: NodeId, to: NodeId, request: &Request) -> Route {
        let state = self.state.lock().unwrap();
        if state.crashed.contains(&from) || state.crashed.contains(&to) {
            return Route::Refuse;
        }
        if state.cut.contains(&(from, to)) {
            return Route::Drop;
        }
        if let Some(filter) = &state.filter {
            if !filter(from, to, request) {
                return Route::Drop;
            }
        }
        match state.handlers.get(&to).and_then(Weak::upgrade) {
            Some(handler) => Route::Deliver(handler, state.latency),
            None => Route::Refuse,
        }
    }
}

struct LocalTransport {
    from: NodeId,
    network: Arc<LocalNetwork>,
}

impl Transport for LocalTransport {
    fn call(&self, node: &Node, request: Request) -> BoxFuture<'static, Result<Reply, CallError>> {
        let to = node.node_id;
        match self.network.route(self.from, to, &request) {
            Route::Deliver(handler, latency) => async move {
                if !latency.is_zero() {
                    tokio::time::sleep(latency).await;
                }
                handler.handle(request).await.map_err(CallError::from)
            }
            .boxed(),
            Route::Refuse => future::ready(Err(CallError::Unreachable(to))).boxed(),
            Route::Drop => {
                trace!(
                    "[Local Network] Dropping {} from {} to {}",
                    request.kind(),
                    self.from,
                    to
                );
                async move {
                    tokio::time::sleep(DROPPED_CALL_LIFETIME).await;
                    Err(CallError::Io {
                        address: format!("local:{to}"),
                        reason: "request dropped".into(),
                    })
                }
                .boxed()
            }
        }
    }
}
