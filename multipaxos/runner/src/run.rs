use std::sync::Arc;

use anyhow::{Context, bail};
use bank_store::Bank;
use paxos_types::{Node, NodeId};
use replica::PaxosReplica;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::config::ClusterConfig;
use crate::logging::init_tracing_with;
use crate::tcp::{TcpServer, TcpTransport};

struct RunningNode {
    replica: Arc<PaxosReplica<Bank>>,
    server: JoinHandle<()>,
}

pub async fn run_standalone(node_id: NodeId, config: ClusterConfig) -> anyhow::Result<()> {
    init_tracing_with(config.log_level);
    let node = config.node(node_id)?.clone();
    info!(
        "Node {} @{} in a cluster of {}",
        node.node_id,
        node.address,
        config.nodes.len()
    );

    let (shutdown, _) = watch::channel(false);
    let transport = TcpTransport::new(config.call_timeout());
    let running = start_node(&node, &config, transport, &shutdown).await?;

    tokio::signal::ctrl_c().await?;
    stop(vec![running], &shutdown).await
}

/// Runs every node of the file in this process, sharing one connection pool.
pub async fn run_cluster(config: ClusterConfig) -> anyhow::Result<()> {
    init_tracing_with(config.log_level);
    info!("Running all {} nodes in one process", config.nodes.len());

    let (shutdown, _) = watch::channel(false);
    let transport = TcpTransport::new(config.call_timeout());
    let mut running = Vec::with_capacity(config.nodes.len());
    for node in &config.nodes {
        running.push(start_node(node, &config, Arc::clone(&transport), &shutdown).await?);
    }

    tokio::signal::ctrl_c().await?;
    stop(running, &shutdown).await
}

async fn start_node(
    node: &Node,
    config: &ClusterConfig,
    transport: Arc<TcpTransport>,
    shutdown: &watch::Sender<bool>,
) -> anyhow::Result<RunningNode> {
    let replica = PaxosReplica::new(
        node.node_id,
        config.nodes.clone(),
        transport,
        Bank::new(),
        config.replica,
    );
    let server = TcpServer::bind(&node.address, replica.clone())
        .await
        .with_context(|| format!("failed to listen on {}", node.address))?;
    let server = tokio::spawn(server.serve(shutdown.subscribe()));
    replica.start();
    Ok(RunningNode { replica, server })
}

/// Stops every node, then reports whether any TCP server task died.
async fn stop(nodes: Vec<RunningNode>, shutdown: &watch::Sender<bool>) -> anyhow::Result<()> {
    info!("Shutting down");
    shutdown.send_replace(true);
    let mut failed = Vec::new();
    for node in nodes {
        let node_id = node.replica.node_id();
        node.replica.shutdown();
        node.replica.join().await;
        if let Err(e) = node.server.await {
            warn!("TCP server task for node {node_id} failed: {e}");
            failed.push(node_id);
        }
    }
    if !failed.is_empty() {
        bail!("TCP server task failed on nodes {failed:?}");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use quorum_call::LocalNetwork;
    use replica::ReplicaConfig;

    fn node(network: &Arc<LocalNetwork>, node_id: NodeId, server: JoinHandle<()>) -> RunningNode {
        let replica = PaxosReplica::new(
            node_id,
            vec![Node::new(1, "local:1"), Node::new(2, "local:2")],
            network.transport(node_id),
            Bank::new(),
            ReplicaConfig::default(),
        );
        RunningNode { replica, server }
    }

    #[tokio::test]
    async fn stop_reports_failed_server_tasks() {
        let network = LocalNetwork::new();
        let (shutdown, _) = watch::channel(false);
        let healthy = node(&network, 1, tokio::spawn(async {}));
        let crashed = node(
            &network,
            2,
            tokio::spawn(async { panic!("listener went away") }),
        );

        let err = stop(vec![healthy, crashed], &shutdown).await.unwrap_err();
        assert!(err.to_string().contains("[2]"), "{err}");
        assert!(*shutdown.borrow());
    }

    #[tokio::test]
    async fn clean_stop_is_ok() {
        let network = LocalNetwork::new();
        let (shutdown, _) = watch::channel(false);
        let running = node(&network, 1, tokio::spawn(async {}));
        stop(vec![running], &shutdown).await.unwrap();
    }
}
