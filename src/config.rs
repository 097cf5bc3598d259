// Node configuration
//
// Consensus constants shared by every node, plus the per-process settings
// read from the environment at startup.

use std::env;

use rand::Rng;
use thiserror::Error;

/// Balance every address starts with before it appears in the chain
pub const STARTING_BALANCE: u64 = 1000;

/// Difficulty of the genesis block
pub const INITIAL_DIFFICULTY: u32 = 3;

/// Target interval between two blocks, in milliseconds
pub const MINE_RATE: i64 = 1000;

/// Input address reserved for miner reward transactions
pub const REWARD_INPUT_ADDRESS: &str = "*authorized-reward*";

/// Amount credited to a miner by a reward transaction
pub const MINING_REWARD: u64 = 50;

pub const GENESIS_TIMESTAMP: i64 = 1;
pub const GENESIS_LAST_HASH: &str = "000000";
pub const GENESIS_HASH: &str = "111111";

/// HTTP port of the root node
pub const DEFAULT_PORT: u16 = 3000;

/// Errors that can occur while reading the configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for {name}: {value}")]
    InvalidValue { name: &'static str, value: String },
}

/// Settings of a single node process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeConfig {
    /// Port the HTTP surface listens on
    pub http_port: u16,

    /// Base URL of the node new peers bootstrap from
    pub root_node_address: String,

    /// Port the gossip transport listens on (0 lets the OS pick)
    pub p2p_port: u16,

    /// Multiaddrs of peers to dial at startup
    pub peers: Vec<String>,
}

impl NodeConfig {
    /// Reads the configuration from environment variables
    ///
    /// * `GENERATE_PEER_PORT` - `true` picks a random HTTP port above `DEFAULT_PORT`
    /// * `ROOT_NODE_ADDRESS` - bootstrap source, defaults to the local root node
    /// * `P2P_PORT` - gossip listen port
    /// * `PEERS` - comma separated multiaddrs
    pub fn from_env() -> Result<Self, ConfigError> {
        let http_port = match env::var("GENERATE_PEER_PORT").as_deref() {
            Ok("true") => DEFAULT_PORT + rand::thread_rng().gen_range(1..=1000),
            _ => DEFAULT_PORT,
        };

        let root_node_address = env::var("ROOT_NODE_ADDRESS")
            .unwrap_or_else(|_| format!("http://localhost:{}", DEFAULT_PORT));

        let p2p_port = match env::var("P2P_PORT") {
            Ok(value) => value.parse().map_err(|_| ConfigError::InvalidValue {
                name: "P2P_PORT",
                value,
            })?,
            Err(_) => 0,
        };

        let peers = env::var("PEERS")
            .map(|value| parse_peers(&value))
            .unwrap_or_default();

        Ok(NodeConfig {
            http_port,
            root_node_address,
            p2p_port,
            peers,
        })
    }

    /// The root node serves the reference chain and never bootstraps
    pub fn is_root(&self) -> bool {
        self.http_port == DEFAULT_PORT
    }
}

fn parse_peers(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|peer| !peer.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_peers() {
        let peers = parse_peers("/ip4/127.0.0.1/tcp/4001, ,/ip4/10.0.0.2/tcp/4001");
        assert_eq!(
            peers,
            vec![
                "/ip4/127.0.0.1/tcp/4001".to_string(),
                "/ip4/10.0.0.2/tcp/4001".to_string()
            ]
        );
        assert!(parse_peers("").is_empty());
    }

    #[test]
    fn test_root_detection() {
        let config = NodeConfig {
            http_port: DEFAULT_PORT,
            root_node_address: "http://localhost:3000".to_string(),
            p2p_port: 0,
            peers: Vec::new(),
        };
        assert!(config.is_root());

        let peer = NodeConfig {
            http_port: DEFAULT_PORT + 17,
            ..config
        };
        assert!(!peer.is_root());
    }
}
