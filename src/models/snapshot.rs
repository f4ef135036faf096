use serde::{Deserialize, Serialize};

/// One observation of a node's mutable fields. Immutable once written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricSnapshot {
    pub pubkey: String,
    pub timestamp: i64,
    pub uptime: f64,
    pub score: f64,
    pub storage_committed: Option<u64>,
    pub storage_used: Option<u64>,
    pub storage_usage_percent: Option<f64>,
    pub ram_total: Option<u64>,
    pub ram_used: Option<u64>,
    pub ram_percent: Option<f64>,
    pub cpu_percent: Option<f64>,
}

/// One observation of a pod's earned-credit balance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreditSnapshot {
    pub pod_id: String,
    pub timestamp: i64,
    pub credits: f64,
}

/// Ledger entry as served by a network's credit endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PodCredit {
    pub pod_id: String,
    pub credits: f64,
}
