use crate::analysis::baseline::{compute_baseline, compute_network_stats};
use crate::analysis::scoring::apply_score;
use crate::clock::SharedClock;
use crate::commands::cache::HotCache;
use crate::commands::cluster::ClusterClient;
use crate::commands::db::HistoryStore;
use crate::commands::ledger::LedgerClient;
use crate::commands::timeseries::SeriesStore;
use crate::error::{non_fatal, PodwatchError, Result};
use crate::keys::{key, KeyKind};
use crate::models::network::Network;
use crate::models::node::{NetworkStats, NodeRecord};
use crate::models::snapshot::{CreditSnapshot, MetricSnapshot, PodCredit};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepState {
    Idle,
    Fetching,
    Scoring,
    Persisting,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepReport {
    pub nodes_processed: usize,
    pub pods_processed: usize,
    pub cache_written: bool,
    pub series_written: bool,
    pub history_written: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SweepReport {
    fn aborted(err: &PodwatchError) -> Self {
        Self {
            error: Some(err.to_string()),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionSummary {
    pub devnet: SweepReport,
    pub mainnet: SweepReport,
    pub timestamp: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanupReport {
    pub cutoff: i64,
    pub entities_scanned: usize,
    pub entries_removed: usize,
}

/// Storage tiers a sweep fans out into.
#[derive(Clone)]
pub struct Tiers {
    pub cache: HotCache,
    pub series: Arc<SeriesStore>,
    pub history: Arc<HistoryStore>,
}

pub struct Collector {
    cluster: Arc<ClusterClient>,
    ledger: LedgerClient,
    tiers: Tiers,
    clock: SharedClock,
    known_good_version: String,
    soft_retention: Duration,
}

impl Collector {
    pub fn new(
        cluster: Arc<ClusterClient>,
        ledger: LedgerClient,
        tiers: Tiers,
        clock: SharedClock,
        known_good_version: String,
        soft_retention: Duration,
    ) -> Self {
        Self {
            cluster,
            ledger,
            tiers,
            clock,
            known_good_version,
            soft_retention,
        }
    }

    pub fn cluster(&self) -> &ClusterClient {
        &self.cluster
    }

    /// Sweeps both networks concurrently. One network's failure never
    /// affects the other's report. The mainnet membership set is pulled once
    /// up front and shared by both rosters.
    pub async fn run_all(&self) -> CollectionSummary {
        if let Err(e) = self.cluster.refresh_membership().await {
            log::warn!("mainnet membership refresh failed before sweep: {e}");
        }
        let (devnet, mainnet) = tokio::join!(self.run_sweep(Network::Devnet), self.run_sweep(Network::Mainnet));
        CollectionSummary {
            devnet,
            mainnet,
            timestamp: self.clock.now_ms(),
        }
    }

    /// One full fetch → score → persist cycle. Fetch failures abort with zero
    /// processed and nothing written.
    pub async fn run_sweep(&self, network: Network) -> SweepReport {
        let mut state = SweepState::Idle;

        transition(network, &mut state, SweepState::Fetching);
        let fetched = match self.fetch(network).await {
            Ok(fetched) => fetched,
            Err(e) => {
                log::error!("[{network}] sweep aborted: {e}");
                transition(network, &mut state, SweepState::Idle);
                return SweepReport::aborted(&e);
            }
        };
        let (mut records, credits) = fetched;

        transition(network, &mut state, SweepState::Scoring);
        let stats = self.score(&mut records);

        transition(network, &mut state, SweepState::Persisting);
        let report = self.persist(network, &records, &stats, &credits);

        transition(network, &mut state, SweepState::Idle);
        log::info!(
            "[{network}] sweep complete: {} nodes, {} pods (cache={}, series={}, history={})",
            report.nodes_processed,
            report.pods_processed,
            report.cache_written,
            report.series_written,
            report.history_written
        );
        report
    }

    /// Roster-only refresh for the cache-aside read path: fetch, score and
    /// cache. No series or history writes.
    pub async fn refresh_roster(&self, network: Network, force: bool) -> Result<(Vec<NodeRecord>, NetworkStats)> {
        let mut records = self.cluster.fetch_roster(network, force).await?;
        let stats = self.score(&mut records);

        self.tiers.cache.set_roster(network, &records);
        self.tiers.cache.set_stats(network, &stats);
        self.tiers.cache.set_last_update(network);
        Ok((records, stats))
    }

    /// Soft retention: trims every tracked series of both kinds and both
    /// networks to the rolling window. The durable tier is untouched.
    pub fn cleanup(&self) -> Result<CleanupReport> {
        let cutoff = self.clock.now_ms() - self.soft_retention.as_millis() as i64;
        let mut report = CleanupReport {
            cutoff,
            ..CleanupReport::default()
        };

        for network in Network::ALL {
            for kind in [KeyKind::NodeMetrics, KeyKind::PodCredits] {
                for id in self.tiers.series.list_entities(kind, network)? {
                    report.entities_scanned += 1;
                    report.entries_removed += self
                        .tiers
                        .series
                        .prune_older_than(&key(kind, network, Some(&id)), cutoff)?;
                }
            }
        }

        log::info!(
            "cleanup removed {} entries across {} series (cutoff {cutoff})",
            report.entries_removed,
            report.entities_scanned
        );
        Ok(report)
    }

    /// Re-applies the hard expiration to every live series.
    pub fn init_expirations(&self) -> Result<usize> {
        let refreshed = self.tiers.series.refresh_expirations()?;
        log::info!("hard expiration refreshed on {refreshed} series");
        Ok(refreshed)
    }

    async fn fetch(&self, network: Network) -> Result<(Vec<NodeRecord>, Vec<PodCredit>)> {
        let records = self.cluster.fetch_roster(network, true).await?;
        let credits = if self.ledger.is_configured(network) {
            self.ledger.fetch_credits(network).await?
        } else {
            log::debug!("[{network}] no credit ledger configured, skipping pod credits");
            Vec::new()
        };
        Ok((records, credits))
    }

    fn score(&self, records: &mut [NodeRecord]) -> NetworkStats {
        let baseline = compute_baseline(records, &self.known_good_version);
        for record in records.iter_mut() {
            apply_score(record, &baseline);
        }
        compute_network_stats(records)
    }

    fn persist(
        &self,
        network: Network,
        records: &[NodeRecord],
        stats: &NetworkStats,
        credits: &[PodCredit],
    ) -> SweepReport {
        let timestamp = self.clock.now_ms();
        let node_rows = node_snapshots(network, records, timestamp);
        let credit_rows = credit_snapshots(network, credits, timestamp);

        let cache_written = self.tiers.cache.set_roster(network, records)
            & self.tiers.cache.set_stats(network, stats)
            & self.tiers.cache.set_last_update(network);

        let node_batch: Vec<(String, MetricSnapshot)> = node_rows
            .iter()
            .map(|row| (key(KeyKind::NodeMetrics, network, Some(&row.pubkey)), row.clone()))
            .collect();
        let credit_batch: Vec<(String, CreditSnapshot)> = credit_rows
            .iter()
            .map(|row| (key(KeyKind::PodCredits, network, Some(&row.pod_id)), row.clone()))
            .collect();
        let series_written = non_fatal(
            &format!("[{network}] series append (nodes)"),
            self.tiers.series.append_batch(&node_batch),
        ) & non_fatal(
            &format!("[{network}] series append (pods)"),
            self.tiers.series.append_batch(&credit_batch),
        );

        let history_written = non_fatal(
            &format!("[{network}] history insert (nodes)"),
            self.tiers.history.insert_node_batch(network, &node_rows),
        ) & non_fatal(
            &format!("[{network}] history insert (pods)"),
            self.tiers.history.insert_credit_batch(network, &credit_rows),
        );

        if !cache_written && !series_written && !history_written {
            return SweepReport {
                error: Some(format!("{network}: every storage tier rejected the sweep")),
                ..SweepReport::default()
            };
        }

        SweepReport {
            nodes_processed: node_rows.len(),
            pods_processed: credit_rows.len(),
            cache_written,
            series_written,
            history_written,
            error: None,
        }
    }
}

/// Runs `run_all` every `interval` until `shutdown` flips to true.
pub async fn collect_loop(collector: Arc<Collector>, interval: Duration, mut shutdown: watch::Receiver<bool>) {
    let mut tick = tokio::time::interval(interval);
    loop {
        tokio::select! {
            _ = tick.tick() => {},
            _ = shutdown.changed() => { if *shutdown.borrow() { break; } }
        }
        let summary = collector.run_all().await;
        log::debug!(
            "scheduled collection: devnet={} nodes, mainnet={} nodes",
            summary.devnet.nodes_processed,
            summary.mainnet.nodes_processed
        );
    }
}

/// Runs the soft-retention cleanup every `interval` until `shutdown` flips.
pub async fn cleanup_loop(collector: Arc<Collector>, interval: Duration, mut shutdown: watch::Receiver<bool>) {
    let mut tick = tokio::time::interval(interval);
    loop {
        tokio::select! {
            _ = tick.tick() => {},
            _ = shutdown.changed() => { if *shutdown.borrow() { break; } }
        }
        if let Err(e) = collector.cleanup() {
            log::error!("scheduled cleanup failed: {e}");
        }
    }
}

fn transition(network: Network, state: &mut SweepState, next: SweepState) {
    log::debug!("[{network}] sweep {state:?} -> {next:?}");
    *state = next;
}

/// Invalid records are logged and left out of the batch.
fn node_snapshots(network: Network, records: &[NodeRecord], timestamp: i64) -> Vec<MetricSnapshot> {
    records
        .iter()
        .filter_map(|record| match snapshot_from_record(record, timestamp) {
            Ok(row) => Some(row),
            Err(e) => {
                log::warn!("[{network}] skipping snapshot for {}: {e}", record.pubkey);
                None
            }
        })
        .collect()
}

fn credit_snapshots(network: Network, credits: &[PodCredit], timestamp: i64) -> Vec<CreditSnapshot> {
    credits
        .iter()
        .filter(|credit| {
            let valid = !credit.pod_id.is_empty() && credit.credits.is_finite();
            if !valid {
                log::warn!("[{network}] skipping credit snapshot for pod {:?}", credit.pod_id);
            }
            valid
        })
        .map(|credit| CreditSnapshot {
            pod_id: credit.pod_id.clone(),
            timestamp,
            credits: credit.credits,
        })
        .collect()
}

pub fn snapshot_from_record(record: &NodeRecord, timestamp: i64) -> Result<MetricSnapshot> {
    if !record.uptime.is_finite() || !record.score.is_finite() {
        return Err(PodwatchError::RecordInvalid(format!(
            "{} has non-finite uptime or score",
            record.pubkey
        )));
    }

    let details = record.details.as_ref();
    Ok(MetricSnapshot {
        pubkey: record.pubkey.clone(),
        timestamp,
        uptime: record.uptime,
        score: record.score,
        storage_committed: Some(record.storage_committed),
        storage_used: Some(record.storage_used),
        storage_usage_percent: Some(record.storage_usage_percent),
        ram_total: details.and_then(|d| d.ram_total),
        ram_used: details.and_then(|d| d.ram_used),
        ram_percent: details.and_then(|d| d.ram_percent()),
        cpu_percent: details.and_then(|d| d.cpu_percent),
    })
}
