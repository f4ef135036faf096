use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    Active,
    Syncing,
    Offline,
}

impl NodeStatus {
    pub const ALL: [NodeStatus; 3] = [NodeStatus::Active, NodeStatus::Syncing, NodeStatus::Offline];

    pub fn as_str(&self) -> &'static str {
        match self {
            NodeStatus::Active => "active",
            NodeStatus::Syncing => "syncing",
            NodeStatus::Offline => "offline",
        }
    }
}

/// Secondary stats reported by a public node's own RPC endpoint.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeDetails {
    pub cpu_percent: Option<f64>,
    pub ram_total: Option<u64>,
    pub ram_used: Option<u64>,
}

impl NodeDetails {
    pub fn ram_percent(&self) -> Option<f64> {
        match (self.ram_total, self.ram_used) {
            (Some(total), Some(used)) if total > 0 => {
                Some((used as f64 / total as f64 * 100.0).clamp(0.0, 100.0))
            }
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreBreakdown {
    pub uptime: f64,
    pub response_time: f64,
    pub storage: f64,
    pub version: f64,
    pub reliability: f64,
    pub total: f64,
    pub grade: String,
    pub color: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeRecord {
    pub id: String,
    pub pubkey: String,
    pub version: String,
    pub status: NodeStatus,
    pub uptime: f64,
    pub last_seen: i64,
    pub rpc_port: u16,
    pub ip_address: String,
    pub is_public: bool,
    pub storage_committed: u64,
    pub storage_used: u64,
    pub storage_usage_percent: f64,
    pub response_time_ms: Option<u64>,
    pub details: Option<NodeDetails>,
    pub score_breakdown: Option<ScoreBreakdown>,
    pub score: f64,
}

/// Per-sweep peer averages used to normalise scores. Never persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct NetworkBaseline {
    pub avg_uptime: f64,
    pub avg_storage_committed: f64,
    pub active_nodes: usize,
    pub known_good_version: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkStats {
    pub total: usize,
    pub active: usize,
    pub syncing: usize,
    pub offline: usize,
    pub avg_score: f64,
    pub total_storage: u64,
    pub used_storage: u64,
}
