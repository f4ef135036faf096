use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    Devnet,
    Mainnet,
}

impl Network {
    pub const ALL: [Network; 2] = [Network::Devnet, Network::Mainnet];

    pub fn as_str(&self) -> &'static str {
        match self {
            Network::Devnet => "devnet",
            Network::Mainnet => "mainnet",
        }
    }

    pub fn node_metrics_table(&self) -> &'static str {
        match self {
            Network::Devnet => "devnet_node_metrics",
            Network::Mainnet => "mainnet_node_metrics",
        }
    }

    pub fn pod_credits_table(&self) -> &'static str {
        match self {
            Network::Devnet => "devnet_pod_credits",
            Network::Mainnet => "mainnet_pod_credits",
        }
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Network {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "devnet" => Ok(Network::Devnet),
            "mainnet" => Ok(Network::Mainnet),
            other => Err(format!("Network must be either \"devnet\" or \"mainnet\", got {other:?}")),
        }
    }
}
