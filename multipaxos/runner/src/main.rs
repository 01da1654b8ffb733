mod codec;
mod config;
mod logging;
mod run;
mod tcp;

use clap::Parser;

use crate::config::ClusterConfig;

#[derive(Parser)]
struct Args {
    /// which node of the config file to run
    #[clap(long, required_unless_present = "all")]
    node_id: Option<u64>,

    /// path to config file
    #[clap(long, default_value = "config.yaml")]
    config: String,

    /// run every node of the config file in this process
    #[clap(long, conflicts_with = "node_id")]
    all: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = ClusterConfig::load(&args.config)?;

    match args.node_id {
        Some(node_id) if !args.all => run::run_standalone(node_id, config).await,
        _ => run::run_cluster(config).await,
    }
}
