use crate::analysis::baseline::percentile_rank;
use crate::analysis::series::{earning_rate, percent_change, round2, series_stats};
use crate::clock::SharedClock;
use crate::commands::cache::HotCache;
use crate::commands::db::{HistoryStore, Metric};
use crate::commands::timeseries::SeriesStore;
use crate::error::Result;
use crate::keys::{key, KeyKind};
use crate::models::history::{
    Aggregate, CreditChanges, CreditStats, EntityOverview, NetworkComparison, NodeHistory,
    NodeHistoryStats, NodeMetricStats, NodeOverviewEntry, Overview, PodHistory, PodHistoryStats,
    PodOverviewEntry, TimeRange, WindowChange,
};
use crate::models::network::Network;
use crate::models::snapshot::{CreditSnapshot, MetricSnapshot};
use std::collections::BTreeSet;
use std::sync::Arc;

const MINUTE_MS: i64 = 60_000;
const TEN_MINUTES: i64 = 10;
const SEVEN_DAYS_MINUTES: i64 = 7 * 24 * 60;

/// Relative look-back tokens accepted by the history queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Period {
    TenMinutes,
    Hour,
    Day,
    Week,
    All,
}

impl Period {
    /// Unknown tokens fall back to 24h. `10min` is only meaningful for pods.
    pub fn parse(token: &str, allow_ten_minutes: bool) -> Period {
        match token {
            "10min" if allow_ten_minutes => Period::TenMinutes,
            "1h" => Period::Hour,
            "24h" => Period::Day,
            "7d" => Period::Week,
            "all" => Period::All,
            _ => Period::Day,
        }
    }

    pub fn start(&self, now: i64) -> i64 {
        match self {
            Period::TenMinutes => now - 10 * MINUTE_MS,
            Period::Hour => now - 60 * MINUTE_MS,
            Period::Day => now - 24 * 60 * MINUTE_MS,
            Period::Week => now - 7 * 24 * 60 * MINUTE_MS,
            Period::All => 0,
        }
    }
}

/// Raw history bounds as supplied by a caller.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HistoryRange {
    pub start: Option<i64>,
    pub end: Option<i64>,
    pub period: Option<String>,
}

impl HistoryRange {
    /// Explicit bounds win over `period`; with neither, the range starts at 0.
    pub fn resolve(&self, now: i64, allow_ten_minutes: bool) -> (i64, i64) {
        let end = self.end.unwrap_or(now);
        let start = match (self.start, self.period.as_deref()) {
            (Some(start), _) => start,
            (None, Some(token)) => Period::parse(token, allow_ten_minutes).start(now),
            (None, None) => 0,
        };
        (start, end)
    }
}

/// Read-only view over the storage tiers.
#[derive(Clone)]
pub struct QueryService {
    cache: HotCache,
    series: Arc<SeriesStore>,
    history: Arc<HistoryStore>,
    clock: SharedClock,
}

impl QueryService {
    pub fn new(cache: HotCache, series: Arc<SeriesStore>, history: Arc<HistoryStore>, clock: SharedClock) -> Self {
        Self {
            cache,
            series,
            history,
            clock,
        }
    }

    pub fn overview(&self, network: Network, limit: usize) -> Result<Overview> {
        let node_ids = self.tracked_ids(KeyKind::NodeMetrics, network, self.history.list_nodes(network)?)?;
        let pod_ids = self.tracked_ids(KeyKind::PodCredits, network, self.history.list_pods(network)?)?;
        let now = self.clock.now_ms();

        let mut nodes = Vec::new();
        for pubkey in node_ids.iter().take(limit) {
            nodes.push(NodeOverviewEntry {
                pubkey: pubkey.clone(),
                latest: self.latest_node(network, pubkey)?,
            });
        }

        let mut pods = Vec::new();
        for pod_id in pod_ids.iter().take(limit) {
            pods.push(PodOverviewEntry {
                pod_id: pod_id.clone(),
                latest: self.latest_credits(network, pod_id)?,
                change10min: self.credit_change(network, pod_id, TEN_MINUTES, now)?,
                change7days: self.credit_change(network, pod_id, SEVEN_DAYS_MINUTES, now)?,
            });
        }

        Ok(Overview {
            network,
            nodes: EntityOverview {
                total: node_ids.len(),
                tracked: nodes.iter().filter(|n| n.latest.is_some()).count(),
                data: nodes,
            },
            pods: EntityOverview {
                total: pod_ids.len(),
                tracked: pods.iter().filter(|p| p.latest.is_some()).count(),
                data: pods,
            },
            timestamp: now,
        })
    }

    /// Durable node history, newest first, with per-metric stats derived from
    /// that order.
    pub fn node_history(&self, network: Network, pubkey: &str, range: &HistoryRange) -> Result<NodeHistory> {
        let (start, end) = range.resolve(self.clock.now_ms(), false);
        let history = self.history.node_history(network, pubkey, start, end, None)?;

        let stats = match time_range(&history, |row| row.timestamp) {
            None => NodeHistoryStats {
                data_points: 0,
                time_range: TimeRange { start, end },
                metrics: None,
                network_comparison: None,
            },
            Some(time_range) => NodeHistoryStats {
                data_points: history.len(),
                time_range,
                metrics: Some(node_metric_stats(&history)),
                network_comparison: self.network_comparison(network, pubkey),
            },
        };

        Ok(NodeHistory {
            pubkey: pubkey.to_string(),
            network,
            history,
            stats,
        })
    }

    /// Durable credit history, newest first, with earning rate and trailing
    /// window changes.
    pub fn pod_history(&self, network: Network, pod_id: &str, range: &HistoryRange) -> Result<PodHistory> {
        let now = self.clock.now_ms();
        let (start, end) = range.resolve(now, true);
        let history = self.history.credit_history(network, pod_id, start, end, None)?;

        let stats = match time_range(&history, |row| row.timestamp) {
            None => PodHistoryStats {
                data_points: 0,
                time_range: TimeRange { start, end },
                credits: None,
                changes: None,
            },
            Some(time_range) => PodHistoryStats {
                data_points: history.len(),
                time_range,
                credits: credit_stats(&history),
                changes: Some(CreditChanges {
                    last10min: self.credit_change(network, pod_id, TEN_MINUTES, now)?,
                    last7days: self.credit_change(network, pod_id, SEVEN_DAYS_MINUTES, now)?,
                }),
            },
        };

        Ok(PodHistory {
            pod_id: pod_id.to_string(),
            network,
            history,
            stats,
        })
    }

    pub fn aggregate(&self, network: Network, metric: Metric, entity: &str, range: &HistoryRange) -> Result<Option<Aggregate>> {
        let (start, end) = range.resolve(self.clock.now_ms(), metric == Metric::Credits);
        self.history.aggregate(network, metric, entity, start, end)
    }

    /// Union of series-tier and durable-tier ids, sorted.
    fn tracked_ids(&self, kind: KeyKind, network: Network, durable: Vec<String>) -> Result<Vec<String>> {
        let mut ids: BTreeSet<String> = durable.into_iter().collect();
        ids.extend(self.series.list_entities(kind, network)?);
        Ok(ids.into_iter().collect())
    }

    fn latest_node(&self, network: Network, pubkey: &str) -> Result<Option<MetricSnapshot>> {
        let series_key = key(KeyKind::NodeMetrics, network, Some(pubkey));
        match self.series.latest(&series_key)? {
            Some(row) => Ok(Some(row)),
            None => self.history.latest_node(network, pubkey),
        }
    }

    fn latest_credits(&self, network: Network, pod_id: &str) -> Result<Option<CreditSnapshot>> {
        let series_key = key(KeyKind::PodCredits, network, Some(pod_id));
        match self.series.latest(&series_key)? {
            Some(row) => Ok(Some(row)),
            None => self.history.latest_credits(network, pod_id),
        }
    }

    fn credit_change(&self, network: Network, pod_id: &str, minutes: i64, now: i64) -> Result<Option<WindowChange>> {
        self.history
            .change_over_window(network, Metric::Credits, pod_id, minutes, now)
    }

    /// Where the node sits among its peers in the cached roster.
    fn network_comparison(&self, network: Network, pubkey: &str) -> Option<NetworkComparison> {
        let roster = self.cache.get_roster(network)?;
        let node = roster.iter().find(|r| r.pubkey == pubkey)?;

        let uptimes: Vec<f64> = roster.iter().map(|r| r.uptime).collect();
        let storage: Vec<f64> = roster.iter().map(|r| r.storage_committed as f64).collect();
        Some(NetworkComparison {
            uptime_percentile: percentile_rank(node.uptime, &uptimes),
            storage_percentile: percentile_rank(node.storage_committed as f64, &storage),
            total_nodes: roster.len(),
        })
    }
}

/// `{start: oldest, end: newest}` of a newest-first slice.
fn time_range<T>(rows_desc: &[T], timestamp: impl Fn(&T) -> i64) -> Option<TimeRange> {
    let newest = rows_desc.first()?;
    let oldest = rows_desc.last()?;
    Some(TimeRange {
        start: timestamp(oldest),
        end: timestamp(newest),
    })
}

fn node_metric_stats(history: &[MetricSnapshot]) -> NodeMetricStats {
    NodeMetricStats {
        uptime: series_stats(&values(history, |r| Some(r.uptime))),
        score: series_stats(&values(history, |r| Some(r.score))),
        cpu_percent: series_stats(&values(history, |r| r.cpu_percent)),
        ram_percent: series_stats(&values(history, |r| r.ram_percent)),
        storage_percent: series_stats(&values(history, |r| r.storage_usage_percent)),
    }
}

fn values(history: &[MetricSnapshot], field: impl Fn(&MetricSnapshot) -> Option<f64>) -> Vec<f64> {
    history.iter().filter_map(field).collect()
}

fn credit_stats(history: &[CreditSnapshot]) -> Option<CreditStats> {
    let credits: Vec<f64> = history.iter().map(|r| r.credits).collect();
    let stats = series_stats(&credits)?;
    let newest = history.first()?.timestamp;
    let oldest = history.last()?.timestamp;

    Some(CreditStats {
        current: stats.current,
        previous: stats.previous,
        change: stats.change,
        percent_change: round2(percent_change(stats.current, stats.previous)),
        min: stats.min,
        max: stats.max,
        avg: stats.avg,
        earning_rate: round2(earning_rate(stats.change, newest, oldest)),
    })
}
