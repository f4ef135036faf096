use crate::analysis::status::derive_status;
use crate::clock::SharedClock;
use crate::commands::ledger::LedgerClient;
use crate::commands::settings::{NetworkEndpoints, Settings};
use crate::error::{PodwatchError, Result};
use crate::models::network::Network;
use crate::models::node::{NodeDetails, NodeRecord};
use futures::stream::{self, StreamExt};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

const ROSTER_METHOD: &str = "get-pods-with-stats";
const DETAIL_METHOD: &str = "get-stats";

#[derive(Debug, Deserialize)]
struct RpcEnvelope<T> {
    error: Option<RpcError>,
    result: Option<T>,
}

#[derive(Debug, Deserialize)]
struct RpcError {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct RosterResult {
    #[serde(default)]
    pods: Vec<RawPod>,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct RawPod {
    #[serde(default)]
    pub pubkey: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub uptime: Option<f64>,
    /// Seconds since the epoch.
    #[serde(default)]
    pub last_seen_timestamp: Option<f64>,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub rpc_port: Option<f64>,
    #[serde(default)]
    pub is_public: Option<bool>,
    #[serde(default)]
    pub storage_committed: Option<f64>,
    #[serde(default)]
    pub storage_used: Option<f64>,
    #[serde(default)]
    pub storage_usage_percent: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
struct RawDetails {
    #[serde(default)]
    cpu_percent: Option<f64>,
    #[serde(default)]
    ram_total: Option<f64>,
    #[serde(default)]
    ram_used: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub size: usize,
    pub keys: Vec<String>,
}

struct CachedRoster {
    records: Vec<NodeRecord>,
    fetched_at: i64,
}

/// Short-lived per-network roster cache. Absorbs bursts of near-simultaneous
/// fetches; expiry is judged against the injected clock.
pub struct RosterCache {
    entries: Mutex<HashMap<Network, CachedRoster>>,
    ttl_ms: i64,
    clock: SharedClock,
}

impl RosterCache {
    pub fn new(ttl: Duration, clock: SharedClock) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl_ms: ttl.as_millis() as i64,
            clock,
        }
    }

    pub fn get(&self, network: Network) -> Option<Vec<NodeRecord>> {
        let now = self.clock.now_ms();
        let entries = self.lock();
        entries
            .get(&network)
            .filter(|cached| now - cached.fetched_at < self.ttl_ms)
            .map(|cached| cached.records.clone())
    }

    pub fn put(&self, network: Network, records: Vec<NodeRecord>) {
        let fetched_at = self.clock.now_ms();
        self.lock().insert(network, CachedRoster { records, fetched_at });
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn stats(&self) -> CacheStats {
        let entries = self.lock();
        let mut keys: Vec<String> = entries.keys().map(|n| format!("cluster-{n}")).collect();
        keys.sort();
        CacheStats {
            size: entries.len(),
            keys,
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<Network, CachedRoster>> {
        // A poisoned roster cache only holds disposable data.
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[derive(Debug, Clone)]
pub struct ClusterConfig {
    pub endpoints: NetworkEndpoints,
    pub roster_timeout: Duration,
    pub detail_timeout: Duration,
    pub detail_concurrency: usize,
    pub cache_ttl: Duration,
}

impl ClusterConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            endpoints: settings.cluster_endpoints.clone(),
            roster_timeout: Duration::from_millis(settings.roster_timeout_ms),
            detail_timeout: Duration::from_millis(settings.detail_timeout_ms),
            detail_concurrency: settings.detail_concurrency.max(1),
            cache_ttl: Duration::from_secs(settings.roster_cache_ttl_secs),
        }
    }
}

/// Last mainnet membership set the ledger handed back.
struct Membership {
    members: Arc<HashSet<String>>,
    fetched_at: i64,
}

pub struct ClusterClient {
    http: Client,
    config: ClusterConfig,
    ledger: LedgerClient,
    cache: RosterCache,
    membership: Mutex<Option<Membership>>,
    clock: SharedClock,
}

impl ClusterClient {
    pub fn new(config: ClusterConfig, ledger: LedgerClient, clock: SharedClock) -> Result<Self> {
        let http = Client::builder()
            .timeout(config.roster_timeout)
            .build()
            .map_err(|e| PodwatchError::Config(format!("Failed to build cluster client: {e}")))?;
        let cache = RosterCache::new(config.cache_ttl, clock.clone());
        Ok(Self {
            http,
            config,
            ledger,
            cache,
            membership: Mutex::new(None),
            clock,
        })
    }

    /// Normalised, liveness-tagged and detail-enriched roster for `network`.
    /// Served from the roster cache unless `force_refresh` is set.
    pub async fn fetch_roster(&self, network: Network, force_refresh: bool) -> Result<Vec<NodeRecord>> {
        if !force_refresh {
            if let Some(records) = self.cache.get(network) {
                log::debug!("[{network}] roster served from cache ({} nodes)", records.len());
                return Ok(records);
            }
        }

        let pods = self.fetch_raw_pods(network).await?;
        let now = self.clock.now_ms();
        let mut records: Vec<NodeRecord> = pods
            .into_iter()
            .filter_map(|raw| match normalize_pod(raw, now) {
                Ok(record) => Some(record),
                Err(e) => {
                    log::warn!("[{network}] dropping roster entry: {e}");
                    None
                }
            })
            .collect();

        if let Some(members) = self.membership_for(network).await? {
            records.retain(|r| belongs_to(network, &r.pubkey, &members));
        }

        let records = self.enrich_details(network, records).await;
        self.cache.put(network, records.clone());
        Ok(records)
    }

    /// Pulls the mainnet membership set and keeps it as the last good one.
    /// No-op without a mainnet ledger.
    pub async fn refresh_membership(&self) -> Result<()> {
        if self.ledger.is_configured(Network::Mainnet) {
            self.fetch_membership().await?;
        }
        Ok(())
    }

    async fn fetch_membership(&self) -> Result<Arc<HashSet<String>>> {
        let members = Arc::new(self.ledger.mainnet_members().await?);
        *self.membership_slot() = Some(Membership {
            members: members.clone(),
            fetched_at: self.clock.now_ms(),
        });
        Ok(members)
    }

    /// Membership set to filter `network`'s roster with. `None` means the
    /// roster is taken as-is.
    ///
    /// A set younger than the roster TTL is reused. When the ledger is down
    /// the last good set stands in; with none yet, devnet goes unfiltered and
    /// mainnet fails.
    async fn membership_for(&self, network: Network) -> Result<Option<Arc<HashSet<String>>>> {
        if !self.ledger.is_configured(Network::Mainnet) {
            return Ok(None);
        }

        let now = self.clock.now_ms();
        let ttl_ms = self.config.cache_ttl.as_millis() as i64;
        let last_good = self
            .membership_slot()
            .as_ref()
            .map(|m| (m.members.clone(), now - m.fetched_at < ttl_ms));
        if let Some((members, true)) = &last_good {
            return Ok(Some(members.clone()));
        }

        match self.fetch_membership().await {
            Ok(members) => Ok(Some(members)),
            Err(e) => match (last_good, network) {
                (Some((members, _)), _) => {
                    log::warn!("[{network}] mainnet membership refresh failed, using last good set: {e}");
                    Ok(Some(members))
                }
                (None, Network::Devnet) => {
                    log::warn!("[{network}] mainnet membership unavailable, roster left unfiltered: {e}");
                    Ok(None)
                }
                (None, Network::Mainnet) => Err(e),
            },
        }
    }

    fn membership_slot(&self) -> MutexGuard<'_, Option<Membership>> {
        self.membership.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    async fn fetch_raw_pods(&self, network: Network) -> Result<Vec<RawPod>> {
        let endpoint = self.config.endpoints.for_network(network).trim_end_matches('/');
        let body = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": ROSTER_METHOD,
            "params": [],
        });

        let response = self
            .http
            .post(endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| PodwatchError::upstream(endpoint, e.to_string()))?;

        if !response.status().is_success() {
            return Err(PodwatchError::upstream(
                endpoint,
                format!("cluster returned {}", response.status()),
            ));
        }

        let envelope: RpcEnvelope<RosterResult> = response
            .json()
            .await
            .map_err(|e| PodwatchError::upstream(endpoint, format!("malformed roster payload: {e}")))?;

        if let Some(err) = envelope.error {
            return Err(PodwatchError::upstream(
                endpoint,
                format!("rpc error {}: {}", err.code, err.message),
            ));
        }

        Ok(envelope.result.map(|r| r.pods).unwrap_or_default())
    }

    /// Secondary detail fetch for public nodes, bounded by `detail_concurrency`.
    /// A failed or skipped fetch leaves `details`/`response_time_ms` empty.
    async fn enrich_details(&self, network: Network, records: Vec<NodeRecord>) -> Vec<NodeRecord> {
        let concurrency = self.config.detail_concurrency.max(1);
        stream::iter(records)
            .map(|mut record| async move {
                if record.is_public {
                    match self.fetch_details(&record).await {
                        Ok((details, elapsed_ms)) => {
                            record.details = Some(details);
                            record.response_time_ms = Some(elapsed_ms);
                        }
                        Err(e) => {
                            log::warn!("[{network}] detail fetch failed for {}: {e}", record.pubkey);
                        }
                    }
                }
                record
            })
            .buffered(concurrency)
            .collect()
            .await
    }

    async fn fetch_details(&self, record: &NodeRecord) -> Result<(NodeDetails, u64)> {
        if record.ip_address.is_empty() || record.rpc_port == 0 {
            return Err(PodwatchError::RecordInvalid(format!(
                "{} is public but has no rpc address",
                record.pubkey
            )));
        }

        let endpoint = format!("http://{}:{}/rpc", record.ip_address, record.rpc_port);
        let body = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": DETAIL_METHOD,
            "params": [],
        });

        let started = Instant::now();
        let response = self
            .http
            .post(&endpoint)
            .timeout(self.config.detail_timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| PodwatchError::upstream(endpoint.as_str(), e.to_string()))?;

        if !response.status().is_success() {
            return Err(PodwatchError::upstream(
                endpoint.as_str(),
                format!("node returned {}", response.status()),
            ));
        }

        let envelope: RpcEnvelope<RawDetails> = response
            .json()
            .await
            .map_err(|e| PodwatchError::upstream(endpoint.as_str(), format!("malformed stats payload: {e}")))?;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        let raw = envelope.result.unwrap_or_default();
        Ok((
            NodeDetails {
                cpu_percent: raw.cpu_percent.filter(|v| v.is_finite()).map(|v| v.clamp(0.0, 100.0)),
                ram_total: raw.ram_total.and_then(non_negative_u64),
                ram_used: raw.ram_used.and_then(non_negative_u64),
            },
            elapsed_ms,
        ))
    }
}

/// Membership rule: a pubkey in the mainnet ledger is mainnet, everything
/// else is devnet.
// TODO: newly onboarded mainnet nodes without ledger credit land in devnet
// until their first credit entry; needs an explicit membership source upstream.
pub fn belongs_to(network: Network, pubkey: &str, mainnet_members: &HashSet<String>) -> bool {
    let in_mainnet = mainnet_members.contains(pubkey);
    match network {
        Network::Mainnet => in_mainnet,
        Network::Devnet => !in_mainnet,
    }
}

pub(crate) fn normalize_pod(raw: RawPod, now_ms: i64) -> Result<NodeRecord> {
    let pubkey = raw
        .pubkey
        .map(|p| p.trim().to_string())
        .filter(|p| !p.is_empty())
        .ok_or_else(|| PodwatchError::RecordInvalid("pod without pubkey".to_string()))?;

    let last_seen_ms = raw
        .last_seen_timestamp
        .filter(|ts| ts.is_finite() && *ts > 0.0)
        .map(|ts| (ts * 1000.0) as i64);

    let ip_address = raw
        .address
        .as_deref()
        .map(|addr| match addr.rsplit_once(':') {
            Some((ip, _)) => ip.to_string(),
            None => addr.to_string(),
        })
        .unwrap_or_default();

    let storage_committed = raw.storage_committed.and_then(non_negative_u64).unwrap_or(0);
    let storage_used = raw.storage_used.and_then(non_negative_u64).unwrap_or(0);
    let storage_usage_percent = raw
        .storage_usage_percent
        .filter(|v| v.is_finite())
        .unwrap_or(0.0)
        .clamp(0.0, 100.0);

    let status = derive_status(now_ms, last_seen_ms);
    let id: String = pubkey.chars().take(8).collect();

    Ok(NodeRecord {
        id: format!("pnode-{id}"),
        version: raw
            .version
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| "unknown".to_string()),
        status,
        uptime: raw.uptime.filter(|v| v.is_finite()).unwrap_or(0.0).max(0.0),
        last_seen: last_seen_ms.unwrap_or(0),
        rpc_port: raw
            .rpc_port
            .filter(|v| v.is_finite())
            .map(|v| v.clamp(0.0, u16::MAX as f64) as u16)
            .unwrap_or(0),
        ip_address,
        is_public: raw.is_public.unwrap_or(false),
        storage_committed,
        storage_used,
        storage_usage_percent,
        response_time_ms: None,
        details: None,
        score_breakdown: None,
        score: 0.0,
        pubkey,
    })
}

fn non_negative_u64(value: f64) -> Option<u64> {
    value.is_finite().then(|| value.max(0.0) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::baseline::compute_network_stats;
    use crate::clock::ManualClock;
    use crate::models::node::NodeStatus;
    use std::sync::Arc;

    const NOW: i64 = 1_700_000_000_000;

    fn raw(pubkey: &str, last_seen_secs: Option<f64>) -> RawPod {
        RawPod {
            pubkey: Some(pubkey.to_string()),
            last_seen_timestamp: last_seen_secs,
            ..RawPod::default()
        }
    }

    #[test]
    fn normalizes_raw_fields() {
        let pod = RawPod {
            pubkey: Some("ABCDEFGHIJKL".to_string()),
            version: Some("0.7.3".to_string()),
            uptime: Some(-5.0),
            last_seen_timestamp: Some((NOW / 1000) as f64),
            address: Some("10.0.0.1:9001".to_string()),
            rpc_port: Some(6000.0),
            is_public: Some(true),
            storage_committed: Some(1_000.0),
            storage_used: Some(-1.0),
            storage_usage_percent: Some(140.0),
        };

        let record = normalize_pod(pod, NOW).expect("valid pod");
        assert_eq!(record.id, "pnode-ABCDEFGH");
        assert_eq!(record.ip_address, "10.0.0.1");
        assert_eq!(record.rpc_port, 6000);
        assert_eq!(record.uptime, 0.0);
        assert_eq!(record.storage_used, 0);
        assert_eq!(record.storage_usage_percent, 100.0);
        assert_eq!(record.last_seen, NOW);
        assert_eq!(record.status, NodeStatus::Active);
    }

    #[test]
    fn pods_without_pubkey_are_rejected() {
        assert!(matches!(
            normalize_pod(RawPod::default(), NOW),
            Err(PodwatchError::RecordInvalid(_))
        ));
        assert!(normalize_pod(raw("   ", None), NOW).is_err());
    }

    #[test]
    fn missing_heartbeat_is_offline_and_missing_version_is_unknown() {
        let record = normalize_pod(raw("pk", None), NOW).expect("valid pod");
        assert_eq!(record.status, NodeStatus::Offline);
        assert_eq!(record.version, "unknown");
    }

    #[test]
    fn three_node_roster_splits_by_liveness() {
        let now_secs = (NOW / 1000) as f64;
        let records: Vec<NodeRecord> = [
            raw("a", Some(now_secs)),
            raw("b", Some(now_secs - 120.0)),
            raw("c", Some(now_secs - 600.0)),
        ]
        .into_iter()
        .map(|pod| normalize_pod(pod, NOW).expect("valid pod"))
        .collect();

        let statuses: Vec<NodeStatus> = records.iter().map(|r| r.status).collect();
        assert_eq!(
            statuses,
            vec![NodeStatus::Active, NodeStatus::Syncing, NodeStatus::Offline]
        );
        assert_eq!(compute_network_stats(&records).active, 1);
    }

    #[test]
    fn absence_from_mainnet_ledger_means_devnet() {
        let members: HashSet<String> = ["main".to_string()].into_iter().collect();
        assert!(belongs_to(Network::Mainnet, "main", &members));
        assert!(!belongs_to(Network::Devnet, "main", &members));
        assert!(belongs_to(Network::Devnet, "fresh", &members));
        assert!(!belongs_to(Network::Mainnet, "fresh", &members));
    }

    #[test]
    fn roster_cache_expires_against_the_injected_clock() {
        let clock = Arc::new(ManualClock::new(NOW));
        let cache = RosterCache::new(Duration::from_secs(30), clock.clone());
        let record = normalize_pod(raw("pk", None), NOW).expect("valid pod");

        cache.put(Network::Devnet, vec![record]);
        assert!(cache.get(Network::Devnet).is_some());
        assert!(cache.get(Network::Mainnet).is_none());

        clock.advance(29_999);
        assert!(cache.get(Network::Devnet).is_some());
        clock.advance(1);
        assert!(cache.get(Network::Devnet).is_none());

        assert_eq!(
            cache.stats(),
            CacheStats {
                size: 1,
                keys: vec!["cluster-devnet".to_string()]
            }
        );
        cache.clear();
        assert_eq!(cache.stats().size, 0);
    }

    #[test]
    fn client_exposes_roster_cache_controls() {
        let clock = Arc::new(ManualClock::new(NOW));
        let endpoints = NetworkEndpoints {
            devnet: String::new(),
            mainnet: String::new(),
        };
        let ledger = LedgerClient::new(endpoints.clone(), Duration::from_secs(1)).expect("ledger");
        let client = ClusterClient::new(
            ClusterConfig {
                endpoints,
                roster_timeout: Duration::from_secs(1),
                detail_timeout: Duration::from_millis(500),
                detail_concurrency: 2,
                cache_ttl: Duration::from_secs(30),
            },
            ledger,
            clock,
        )
        .expect("client");

        client.cache.put(Network::Devnet, Vec::new());
        assert_eq!(client.cache_stats().size, 1);
        client.clear_cache();
        assert_eq!(client.cache_stats().size, 0);
    }

    #[test]
    fn rpc_error_envelope_parses() {
        let envelope: RpcEnvelope<RosterResult> =
            serde_json::from_str(r#"{"jsonrpc":"2.0","id":1,"error":{"code":-32601,"message":"nope"}}"#)
                .expect("parse");
        assert!(envelope.result.is_none());
        assert_eq!(envelope.error.expect("error").code, -32601);
    }

    #[test]
    fn result_envelope_without_error_field_parses() {
        let envelope: RpcEnvelope<RosterResult> =
            serde_json::from_str(r#"{"jsonrpc":"2.0","id":1,"result":{"pods":[{"pubkey":"pk"}]}}"#)
                .expect("parse");
        assert!(envelope.error.is_none());
        assert_eq!(envelope.result.expect("result").pods.len(), 1);

        let bare: RpcEnvelope<RawDetails> = serde_json::from_str(r#"{"jsonrpc":"2.0","id":1}"#).expect("parse");
        assert!(bare.result.is_none() && bare.error.is_none());
    }
}
