use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::time::Duration;

use paxos_types::{Node, NodeId};
use proposer::ProposerConfig;
use replica::ReplicaConfig;
use thiserror::Error;
use tracing::level_filters::LevelFilter;
use yaml_rust::{Yaml, YamlLoader};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {reason}")]
    Read { path: String, reason: String },

    #[error("invalid YAML: {0}")]
    Yaml(#[from] yaml_rust::ScanError),

    #[error("missing `nodes` list")]
    MissingNodes,

    #[error("node entry {index} is missing `{field}`")]
    MissingField { index: usize, field: &'static str },

    #[error("invalid address `{address}` for node {node_id}")]
    BadAddress { node_id: NodeId, address: String },

    #[error("node {0} appears more than once")]
    DuplicateNode(NodeId),

    #[error("node {0} is not in the config")]
    UnknownNode(NodeId),

    #[error("invalid log level `{0}`")]
    BadLogLevel(String),

    #[error("`run_config.{0}` must be a non-negative integer")]
    BadValue(&'static str),
}

/// A parsed cluster file: every node plus the timing knobs they share.
#[derive(Debug, Clone)]
pub struct ClusterConfig {
    pub log_level: LevelFilter,
    pub nodes: Vec<Node>,
    pub replica: ReplicaConfig,
}

impl ClusterConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let s = fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Self::parse(&s)
    }

    pub fn parse(s: &str) -> Result<Self, ConfigError> {
        let docs = YamlLoader::load_from_str(s)?;
        let doc = docs.first().ok_or(ConfigError::MissingNodes)?;

        let log_level = match doc["log_level"].as_str() {
            Some(level) => level
                .parse()
                .map_err(|_| ConfigError::BadLogLevel(level.to_string()))?,
            None => LevelFilter::INFO,
        };

        let raw = doc["nodes"].as_vec().ok_or(ConfigError::MissingNodes)?;
        if raw.is_empty() {
            return Err(ConfigError::MissingNodes);
        }
        let mut seen = HashSet::new();
        let mut nodes = Vec::with_capacity(raw.len());
        for (index, entry) in raw.iter().enumerate() {
            let node_id = entry["node_id"]
                .as_i64()
                .and_then(|id| u64::try_from(id).ok())
                .ok_or(ConfigError::MissingField {
                    index,
                    field: "node_id",
                })?;
            let address = entry["address"].as_str().ok_or(ConfigError::MissingField {
                index,
                field: "address",
            })?;
            if !valid_address(address) {
                return Err(ConfigError::BadAddress {
                    node_id,
                    address: address.to_string(),
                });
            }
            if !seen.insert(node_id) {
                return Err(ConfigError::DuplicateNode(node_id));
            }
            nodes.push(Node::new(node_id, address));
        }
        nodes.sort_by_key(|n| n.node_id);

        let r = &doc["run_config"];
        let defaults = ReplicaConfig::default();
        let replica = ReplicaConfig {
            proposer: ProposerConfig {
                phase_one_timeout: millis(
                    r,
                    "phase_one_timeout_ms",
                    defaults.proposer.phase_one_timeout,
                )?,
                phase_two_timeout: millis(
                    r,
                    "phase_two_timeout_ms",
                    defaults.proposer.phase_two_timeout,
                )?,
                retry_interval: millis(r, "retry_interval_ms", defaults.proposer.retry_interval)?,
            },
            failure_detector_delay: millis(
                r,
                "failure_detector_delay_ms",
                defaults.failure_detector_delay,
            )?,
            failure_detector_delta: millis(
                r,
                "failure_detector_delta_ms",
                defaults.failure_detector_delta,
            )?,
            response_ttl: millis(r, "response_ttl_ms", defaults.response_ttl)?,
        };

        Ok(ClusterConfig {
            log_level,
            nodes,
            replica,
        })
    }

    /// Bound on a single TCP exchange: the longest wait any caller is
    /// configured for.
    pub fn call_timeout(&self) -> Duration {
        let r = &self.replica;
        r.proposer
            .phase_one_timeout
            .max(r.proposer.phase_two_timeout)
            .max(r.failure_detector_delay)
    }

    pub fn node(&self, node_id: NodeId) -> Result<&Node, ConfigError> {
        self.nodes
            .iter()
            .find(|n| n.node_id == node_id)
            .ok_or(ConfigError::UnknownNode(node_id))
    }
}

fn millis(r: &Yaml, key: &'static str, default: Duration) -> Result<Duration, ConfigError> {
    match &r[key] {
        Yaml::BadValue | Yaml::Null => Ok(default),
        value => value
            .as_i64()
            .and_then(|ms| u64::try_from(ms).ok())
            .map(Duration::from_millis)
            .ok_or(ConfigError::BadValue(key)),
    }
}

// host:port with a numeric port
fn valid_address(address: &str) -> bool {
    match address.rsplit_once(':') {
        Some((host, port)) => !host.is_empty() && port.parse::<u16>().is_ok(),
        None => false,
    }
}
