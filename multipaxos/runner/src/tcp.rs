use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use futures::future::BoxFuture;
use paxos_types::{Node, Reply, ReplicaError, Request};
use quorum_call::{CallError, Handler, Transport};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::codec::{self, CodecError};

/// Request/response transport over TCP. Connections are returned to a
/// per-address pool after each exchange and reused by later calls. A call that
/// has not completed within `call_timeout` fails and drops its connection.
pub struct TcpTransport {
    idle: Arc<DashMap<String, Vec<TcpStream>>>,
    call_timeout: Duration,
}

impl TcpTransport {
    pub fn new(call_timeout: Duration) -> Arc<Self> {
        Arc::new(TcpTransport {
            idle: Arc::new(DashMap::new()),
            call_timeout,
        })
    }

    #[cfg(test)]
    fn idle_connections(&self, address: &str) -> usize {
        self.idle.get(address).map_or(0, |conns| conns.len())
    }
}

impl Transport for TcpTransport {
    fn call(&self, node: &Node, request: Request) -> BoxFuture<'static, Result<Reply, CallError>> {
        let idle = Arc::clone(&self.idle);
        let node = node.clone();
        let call_timeout = self.call_timeout;
        Box::pin(async move {
            match tokio::time::timeout(call_timeout, call_node(&idle, &node, &request)).await {
                Ok(result) => result,
                Err(_) => {
                    debug!(
                        "[TCP Client] {} to {} timed out after {call_timeout:?}",
                        request.kind(),
                        node.address
                    );
                    Err(CallError::Io {
                        address: node.address.clone(),
                        reason: format!("no reply within {call_timeout:?}"),
                    })
                }
            }
        })
    }
}

async fn call_node(
    idle: &DashMap<String, Vec<TcpStream>>,
    node: &Node,
    request: &Request,
) -> Result<Reply, CallError> {
    let pooled = idle.get_mut(&node.address).and_then(|mut conns| conns.pop());
    if let Some(mut stream) = pooled {
        match exchange(&mut stream, request).await {
            Ok(reply) => {
                idle.entry(node.address.clone()).or_default().push(stream);
                return reply.map_err(CallError::from);
            }
            // The peer may have closed an idle connection; try a fresh one.
            Err(e) => debug!(
                "[TCP Client] Pooled connection to {} failed: {e}",
                node.address
            ),
        }
    }

    let mut stream = TcpStream::connect(&node.address).await.map_err(|e| {
        debug!("[TCP Client] Failed to connect to {}: {e}", node.address);
        CallError::Unreachable(node.node_id)
    })?;
    stream.set_nodelay(true).ok();
    let reply = exchange(&mut stream, request)
        .await
        .map_err(|e| call_error(&node.address, e))?;
    idle.entry(node.address.clone()).or_default().push(stream);
    reply.map_err(CallError::from)
}

async fn exchange(
    stream: &mut TcpStream,
    request: &Request,
) -> Result<Result<Reply, ReplicaError>, CodecError> {
    codec::write_frame(stream, request).await?;
    codec::read_frame(stream).await?.ok_or_else(|| {
        CodecError::Io(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "connection closed before reply",
        ))
    })
}

fn call_error(address: &str, e: CodecError) -> CallError {
    match e {
        CodecError::Io(e) => CallError::Io {
            address: address.to_string(),
            reason: e.to_string(),
        },
        other => CallError::Codec(other.to_string()),
    }
}

/// Accepts connections and serves each one on its own task, answering the
/// requests of a connection in order.
pub struct TcpServer {
    listener: TcpListener,
    handler: Arc<dyn Handler>,
}

impl TcpServer {
    pub async fn bind(address: &str, handler: Arc<dyn Handler>) -> io::Result<Self> {
        let listener = TcpListener::bind(address).await?;
        Ok(TcpServer { listener, handler })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub async fn serve(self, mut shutdown: watch::Receiver<bool>) {
        match self.local_addr() {
            Ok(addr) => info!("[TCP Server] Listening on {addr}"),
            Err(e) => warn!("[TCP Server] Listening on unknown address: {e}"),
        }
        loop {
            tokio::select! {
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        stream.set_nodelay(true).ok();
                        tokio::spawn(serve_connection(stream, peer, Arc::clone(&self.handler)));
                    }
                    Err(e) => warn!("[TCP Server] Accept failed: {e}"),
                },
                _ = shutdown.changed() => break,
            }
        }
        info!("[TCP Server] Stopped");
    }
}

async fn serve_connection(mut stream: TcpStream, peer: SocketAddr, handler: Arc<dyn Handler>) {
    loop {
        let request: Request = match codec::read_frame(&mut stream).await {
            Ok(Some(request)) => request,
            Ok(None) => {
                debug!("[TCP Server] {peer} closed the connection");
                return;
            }
            Err(e) => {
                warn!("[TCP Server] Dropping {peer}: {e}");
                return;
            }
        };
        debug!("[TCP Server] {} from {peer}", request.kind());
        let reply = handler.handle(request).await;
        if let Err(e) = codec::write_frame(&mut stream, &reply).await {
            warn!("[TCP Server] Failed to answer {peer}: {e}");
            return;
        }
    }
}
