use crate::clock::SharedClock;
use crate::commands::cache::{HotCache, RedisKv};
use crate::commands::cluster::{ClusterClient, ClusterConfig};
use crate::commands::collect::{Collector, Tiers};
use crate::commands::db::HistoryStore;
use crate::commands::ledger::LedgerClient;
use crate::commands::query::QueryService;
use crate::commands::redis_link::RedisLink;
use crate::commands::settings::Settings;
use crate::commands::timeseries::{RedisSeriesBackend, SeriesStore};
use crate::error::Result;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

const DAY_SECS: u64 = 86_400;

#[derive(Clone)]
pub struct AppState {
    pub collector: Arc<Collector>,
    pub query: QueryService,
    pub cache: HotCache,
    pub cron_secret: Option<Arc<str>>,
    pub clock: SharedClock,
}

impl AppState {
    /// Wires every tier from settings, opening the history database on disk.
    pub fn from_settings(settings: &Settings, clock: SharedClock) -> Result<Self> {
        let history = HistoryStore::open(Path::new(&settings.database_path))?;
        Self::with_history(settings, Arc::new(history), clock)
    }

    pub fn with_history(settings: &Settings, history: Arc<HistoryStore>, clock: SharedClock) -> Result<Self> {
        let ledger = LedgerClient::new(
            settings.credit_endpoints.clone(),
            Duration::from_millis(settings.roster_timeout_ms),
        )?;
        let cluster = ClusterClient::new(ClusterConfig::from_settings(settings), ledger.clone(), clock.clone())?;

        let cache_ttl = Duration::from_secs(settings.hot_cache_ttl_secs);
        let hard_ttl = Duration::from_secs(settings.hard_expiration_days * DAY_SECS);
        let (cache, series) = match settings.redis_url.as_deref() {
            Some(url) => {
                log::info!("cache and series tiers on redis at {url}");
                let timeout = Duration::from_millis(settings.roster_timeout_ms);
                let cache = HotCache::new(
                    Arc::new(RedisKv::new(RedisLink::open(url, timeout)?)),
                    cache_ttl,
                    clock.clone(),
                );
                let series = SeriesStore::new(
                    Arc::new(RedisSeriesBackend::new(RedisLink::open(url, timeout)?)),
                    hard_ttl,
                    clock.clone(),
                );
                (cache, series)
            }
            None => {
                log::info!("no redis url configured, cache and series tiers are in-process");
                (
                    HotCache::in_memory(cache_ttl, clock.clone()),
                    SeriesStore::in_memory(hard_ttl, clock.clone()),
                )
            }
        };

        let tiers = Tiers {
            cache,
            series: Arc::new(series),
            history,
        };

        let query = QueryService::new(
            tiers.cache.clone(),
            tiers.series.clone(),
            tiers.history.clone(),
            clock.clone(),
        );
        let cache = tiers.cache.clone();
        let collector = Collector::new(
            Arc::new(cluster),
            ledger,
            tiers,
            clock.clone(),
            settings.known_good_version.clone(),
            Duration::from_secs(settings.soft_retention_days * DAY_SECS),
        );

        Ok(Self {
            collector: Arc::new(collector),
            query,
            cache,
            cron_secret: settings.cron_secret.as_deref().map(Arc::from),
            clock,
        })
    }
}
