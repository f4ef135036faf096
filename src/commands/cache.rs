use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::clock::SharedClock;
use crate::commands::redis_link::RedisLink;
use crate::error::{non_fatal, PodwatchError, Result};
use crate::keys::{key, KeyKind};
use crate::models::network::Network;
use crate::models::node::{NetworkStats, NodeRecord};

/// Minimal string key-value store with optional per-key TTL.
pub trait KvBackend: Send + Sync {
    fn set(&self, key: &str, value: String, ttl: Option<Duration>) -> Result<()>;
    fn get(&self, key: &str) -> Result<Option<String>>;
}

/// In-process backend; expiry is checked lazily against the injected clock.
pub struct MemoryKv {
    entries: Mutex<HashMap<String, (String, Option<i64>)>>,
    clock: SharedClock,
}

impl MemoryKv {
    pub fn new(clock: SharedClock) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            clock,
        }
    }
}

impl KvBackend for MemoryKv {
    fn set(&self, key: &str, value: String, ttl: Option<Duration>) -> Result<()> {
        let expires_at = ttl.map(|ttl| self.clock.now_ms() + ttl.as_millis() as i64);
        let mut entries = self.entries.lock().map_err(|_| PodwatchError::CacheWriteFailed {
            key: key.to_string(),
            reason: "cache lock poisoned".to_string(),
        })?;
        entries.insert(key.to_string(), (value, expires_at));
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<String>> {
        let now = self.clock.now_ms();
        let mut entries = self.entries.lock().map_err(|_| PodwatchError::CacheReadFailed {
            key: key.to_string(),
            reason: "cache lock poisoned".to_string(),
        })?;

        match entries.get(key) {
            Some((_, Some(expires_at))) if *expires_at <= now => {
                entries.remove(key);
                Ok(None)
            }
            Some((value, _)) => Ok(Some(value.clone())),
            None => Ok(None),
        }
    }
}

/// Redis backend: `SET key value PX ttl` and `GET key`, expiry left to the server.
pub struct RedisKv {
    link: RedisLink,
}

impl RedisKv {
    pub fn new(link: RedisLink) -> Self {
        Self { link }
    }
}

fn set_command(key: &str, value: String, ttl: Option<Duration>) -> redis::Cmd {
    let mut cmd = redis::cmd("SET");
    cmd.arg(key).arg(value);
    if let Some(ttl) = ttl {
        cmd.arg("PX").arg(ttl.as_millis().max(1) as u64);
    }
    cmd
}

impl KvBackend for RedisKv {
    fn set(&self, key: &str, value: String, ttl: Option<Duration>) -> Result<()> {
        let cmd = set_command(key, value, ttl);
        self.link
            .run(|conn| cmd.query::<()>(conn))
            .map_err(|e| PodwatchError::CacheWriteFailed {
                key: key.to_string(),
                reason: e.to_string(),
            })
    }

    fn get(&self, key: &str) -> Result<Option<String>> {
        self.link
            .run(|conn| redis::cmd("GET").arg(key).query::<Option<String>>(conn))
            .map_err(|e| PodwatchError::CacheReadFailed {
                key: key.to_string(),
                reason: e.to_string(),
            })
    }
}

/// Disposable projection of the latest sweep. Writes never fail the caller;
/// reads treat every problem as a miss.
#[derive(Clone)]
pub struct HotCache {
    backend: Arc<dyn KvBackend>,
    ttl: Duration,
    clock: SharedClock,
}

impl HotCache {
    pub fn new(backend: Arc<dyn KvBackend>, ttl: Duration, clock: SharedClock) -> Self {
        Self { backend, ttl, clock }
    }

    pub fn in_memory(ttl: Duration, clock: SharedClock) -> Self {
        Self::new(Arc::new(MemoryKv::new(clock.clone())), ttl, clock)
    }

    pub fn set_roster(&self, network: Network, records: &[NodeRecord]) -> bool {
        let cache_key = key(KeyKind::Roster, network, None);
        non_fatal(&format!("cache {cache_key}"), self.put_json(&cache_key, records, Some(self.ttl)))
    }

    pub fn get_roster(&self, network: Network) -> Option<Vec<NodeRecord>> {
        self.get_json(&key(KeyKind::Roster, network, None))
    }

    pub fn set_stats(&self, network: Network, stats: &NetworkStats) -> bool {
        let cache_key = key(KeyKind::Stats, network, None);
        non_fatal(&format!("cache {cache_key}"), self.put_json(&cache_key, stats, Some(self.ttl)))
    }

    pub fn get_stats(&self, network: Network) -> Option<NetworkStats> {
        self.get_json(&key(KeyKind::Stats, network, None))
    }

    /// Records the current clock reading as the network's last update.
    pub fn set_last_update(&self, network: Network) -> bool {
        let cache_key = key(KeyKind::LastUpdate, network, None);
        let now = self.clock.now_ms();
        non_fatal(&format!("cache {cache_key}"), self.put_json(&cache_key, &now, None))
    }

    pub fn get_last_update(&self, network: Network) -> Option<i64> {
        self.get_json(&key(KeyKind::LastUpdate, network, None))
    }

    fn put_json<T: Serialize + ?Sized>(&self, cache_key: &str, value: &T, ttl: Option<Duration>) -> Result<()> {
        let raw = serde_json::to_string(value).map_err(|e| PodwatchError::CacheWriteFailed {
            key: cache_key.to_string(),
            reason: e.to_string(),
        })?;
        self.backend.set(cache_key, raw, ttl)
    }

    fn get_json<T: DeserializeOwned>(&self, cache_key: &str) -> Option<T> {
        let raw = match self.backend.get(cache_key) {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(err) => {
                log::warn!("cache read {cache_key} failed, treating as miss: {err}");
                return None;
            }
        };

        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(err) => {
                log::warn!("cache entry {cache_key} unreadable, treating as miss: {err}");
                None
            }
        }
    }
}
