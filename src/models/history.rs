use serde::{Deserialize, Serialize};

use crate::models::network::Network;
use crate::models::snapshot::{CreditSnapshot, MetricSnapshot};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeRange {
    pub start: i64,
    pub end: i64,
}

/// Server-side aggregate over one metric column.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Aggregate {
    pub avg: f64,
    pub min: f64,
    pub max: f64,
    pub count: u64,
}

/// Newest vs oldest value inside a trailing window. `percent_change` is 0 when
/// the oldest value is not positive.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WindowChange {
    pub current: f64,
    pub previous: f64,
    pub change: f64,
    pub percent_change: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeriesStats {
    pub min: f64,
    pub max: f64,
    pub avg: f64,
    pub current: f64,
    pub previous: f64,
    pub change: f64,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeMetricStats {
    pub uptime: Option<SeriesStats>,
    pub score: Option<SeriesStats>,
    pub cpu_percent: Option<SeriesStats>,
    pub ram_percent: Option<SeriesStats>,
    pub storage_percent: Option<SeriesStats>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkComparison {
    pub uptime_percentile: u32,
    pub storage_percentile: u32,
    pub total_nodes: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeHistoryStats {
    pub data_points: usize,
    pub time_range: TimeRange,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics: Option<NodeMetricStats>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub network_comparison: Option<NetworkComparison>,
}

/// `history` is newest first; `stats` derive `current`/`previous` from that order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeHistory {
    pub pubkey: String,
    pub network: Network,
    pub history: Vec<MetricSnapshot>,
    pub stats: NodeHistoryStats,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreditStats {
    pub current: f64,
    pub previous: f64,
    pub change: f64,
    pub percent_change: f64,
    pub min: f64,
    pub max: f64,
    pub avg: f64,
    pub earning_rate: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreditChanges {
    pub last10min: Option<WindowChange>,
    pub last7days: Option<WindowChange>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PodHistoryStats {
    pub data_points: usize,
    pub time_range: TimeRange,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credits: Option<CreditStats>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub changes: Option<CreditChanges>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PodHistory {
    pub pod_id: String,
    pub network: Network,
    pub history: Vec<CreditSnapshot>,
    pub stats: PodHistoryStats,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeOverviewEntry {
    pub pubkey: String,
    pub latest: Option<MetricSnapshot>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PodOverviewEntry {
    pub pod_id: String,
    pub latest: Option<CreditSnapshot>,
    pub change10min: Option<WindowChange>,
    pub change7days: Option<WindowChange>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityOverview<T> {
    pub total: usize,
    pub tracked: usize,
    pub data: Vec<T>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Overview {
    pub network: Network,
    pub nodes: EntityOverview<NodeOverviewEntry>,
    pub pods: EntityOverview<PodOverviewEntry>,
    pub timestamp: i64,
}

/// Envelope for every query response. `success:false` carries `error`;
/// absent data is `success:true` with an empty payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            message: None,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.into()),
            message: None,
        }
    }
}
