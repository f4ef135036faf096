use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::clock::SharedClock;
use crate::commands::redis_link::RedisLink;
use crate::error::{PodwatchError, Result};
use crate::keys::{entity_id, entity_prefix, KeyKind};
use crate::models::network::Network;
use crate::models::snapshot::{CreditSnapshot, MetricSnapshot};

/// Anything stored in a series is ordered by its own timestamp.
pub trait Timestamped {
    fn timestamp(&self) -> i64;
}

impl Timestamped for MetricSnapshot {
    fn timestamp(&self) -> i64 {
        self.timestamp
    }
}

impl Timestamped for CreditSnapshot {
    fn timestamp(&self) -> i64 {
        self.timestamp
    }
}

/// One scored member headed for a sorted set.
pub struct ScoredMember<'a> {
    pub key: &'a str,
    pub score: i64,
    pub member: String,
}

/// Sorted-set storage keyed by string, scored by timestamp. Members come back
/// in ascending score order.
pub trait SeriesBackend: Send + Sync {
    /// Adds every member and pushes each touched key's expiry out to `ttl`.
    /// All or nothing.
    fn add(&self, members: &[ScoredMember<'_>], ttl: Duration) -> Result<()>;
    fn range(&self, key: &str, start: i64, end: i64) -> Result<Vec<String>>;
    fn last(&self, key: &str) -> Result<Option<String>>;
    /// Drops members scored strictly below `cutoff`.
    fn remove_before(&self, key: &str, cutoff: i64) -> Result<usize>;
    /// Live keys starting with `prefix`.
    fn scan(&self, prefix: &str) -> Result<Vec<String>>;
    /// Resets the expiry of each existing key; returns how many existed.
    fn expire(&self, keys: &[String], ttl: Duration) -> Result<usize>;
}

fn series_error(key: &str, err: impl std::fmt::Display) -> PodwatchError {
    PodwatchError::SeriesFailed {
        key: key.to_string(),
        reason: err.to_string(),
    }
}

struct MemorySeries {
    entries: Vec<(i64, String)>,
    expires_at: i64,
}

/// In-process backend; expiry is checked lazily against the injected clock.
pub struct MemorySeriesBackend {
    series: Mutex<HashMap<String, MemorySeries>>,
    clock: SharedClock,
}

impl MemorySeriesBackend {
    pub fn new(clock: SharedClock) -> Self {
        Self {
            series: Mutex::new(HashMap::new()),
            clock,
        }
    }

    fn lock(&self, key: &str) -> Result<MutexGuard<'_, HashMap<String, MemorySeries>>> {
        self.series.lock().map_err(|_| series_error(key, "series lock poisoned"))
    }

    fn live<'a>(&self, series: &'a mut HashMap<String, MemorySeries>, key: &str) -> Option<&'a mut MemorySeries> {
        let now = self.clock.now_ms();
        if series.get(key).is_some_and(|s| s.expires_at <= now) {
            series.remove(key);
            return None;
        }
        series.get_mut(key)
    }
}

impl SeriesBackend for MemorySeriesBackend {
    fn add(&self, members: &[ScoredMember<'_>], ttl: Duration) -> Result<()> {
        let expires_at = self.clock.now_ms() + ttl.as_millis() as i64;
        let mut series = self.lock(members.first().map_or("", |m| m.key))?;
        for m in members {
            let entry = series.entry(m.key.to_string()).or_insert_with(|| MemorySeries {
                entries: Vec::new(),
                expires_at,
            });
            // After every entry with the same or an earlier score.
            let at = entry.entries.partition_point(|(score, _)| *score <= m.score);
            entry.entries.insert(at, (m.score, m.member.clone()));
            entry.expires_at = expires_at;
        }
        Ok(())
    }

    fn range(&self, key: &str, start: i64, end: i64) -> Result<Vec<String>> {
        let mut series = self.lock(key)?;
        Ok(self
            .live(&mut series, key)
            .map(|s| {
                s.entries
                    .iter()
                    .filter(|(score, _)| *score >= start && *score <= end)
                    .map(|(_, member)| member.clone())
                    .collect()
            })
            .unwrap_or_default())
    }

    fn last(&self, key: &str) -> Result<Option<String>> {
        let mut series = self.lock(key)?;
        Ok(self
            .live(&mut series, key)
            .and_then(|s| s.entries.last().map(|(_, member)| member.clone())))
    }

    fn remove_before(&self, key: &str, cutoff: i64) -> Result<usize> {
        let mut series = self.lock(key)?;
        let Some(entry) = self.live(&mut series, key) else {
            return Ok(0);
        };
        let before = entry.entries.len();
        entry.entries.retain(|(score, _)| *score >= cutoff);
        Ok(before - entry.entries.len())
    }

    fn scan(&self, prefix: &str) -> Result<Vec<String>> {
        let now = self.clock.now_ms();
        let mut series = self.lock(prefix)?;
        series.retain(|_, s| s.expires_at > now);
        Ok(series.keys().filter(|k| k.starts_with(prefix)).cloned().collect())
    }

    fn expire(&self, keys: &[String], ttl: Duration) -> Result<usize> {
        let now = self.clock.now_ms();
        let expires_at = now + ttl.as_millis() as i64;
        let mut series = self.lock(keys.first().map_or("", String::as_str))?;
        let mut touched = 0;
        for key in keys {
            if let Some(entry) = series.get_mut(key).filter(|s| s.expires_at > now) {
                entry.expires_at = expires_at;
                touched += 1;
            }
        }
        Ok(touched)
    }
}

/// Redis sorted sets: `ZADD`/`PEXPIRE` pipelined in one `MULTI`, range reads
/// by score, `SCAN` for listing.
pub struct RedisSeriesBackend {
    link: RedisLink,
}

impl RedisSeriesBackend {
    pub fn new(link: RedisLink) -> Self {
        Self { link }
    }
}

fn add_pipeline(members: &[ScoredMember<'_>], ttl: Duration) -> redis::Pipeline {
    let ttl_ms = ttl.as_millis().max(1) as u64;
    let mut pipe = redis::pipe();
    pipe.atomic();
    let mut touched = BTreeSet::new();
    for m in members {
        pipe.cmd("ZADD").arg(m.key).arg(m.score).arg(m.member.as_str()).ignore();
        touched.insert(m.key);
    }
    for key in touched {
        pipe.cmd("PEXPIRE").arg(key).arg(ttl_ms).ignore();
    }
    pipe
}

impl SeriesBackend for RedisSeriesBackend {
    fn add(&self, members: &[ScoredMember<'_>], ttl: Duration) -> Result<()> {
        if members.is_empty() {
            return Ok(());
        }
        let pipe = add_pipeline(members, ttl);
        self.link
            .run(|conn| pipe.query::<()>(conn))
            .map_err(|e| series_error(members[0].key, e))
    }

    fn range(&self, key: &str, start: i64, end: i64) -> Result<Vec<String>> {
        self.link
            .run(|conn| {
                redis::cmd("ZRANGEBYSCORE")
                    .arg(key)
                    .arg(start)
                    .arg(end)
                    .query::<Vec<String>>(conn)
            })
            .map_err(|e| series_error(key, e))
    }

    fn last(&self, key: &str) -> Result<Option<String>> {
        let tail = self
            .link
            .run(|conn| redis::cmd("ZRANGE").arg(key).arg(-1).arg(-1).query::<Vec<String>>(conn))
            .map_err(|e| series_error(key, e))?;
        Ok(tail.into_iter().next())
    }

    fn remove_before(&self, key: &str, cutoff: i64) -> Result<usize> {
        self.link
            .run(|conn| {
                redis::cmd("ZREMRANGEBYSCORE")
                    .arg(key)
                    .arg("-inf")
                    .arg(format!("({cutoff}"))
                    .query::<usize>(conn)
            })
            .map_err(|e| series_error(key, e))
    }

    fn scan(&self, prefix: &str) -> Result<Vec<String>> {
        use redis::Commands;

        let pattern = format!("{prefix}*");
        self.link
            .run(|conn| conn.scan_match::<_, String>(&pattern).map(|keys| keys.collect::<Vec<String>>()))
            .map_err(|e| series_error(prefix, e))
    }

    fn expire(&self, keys: &[String], ttl: Duration) -> Result<usize> {
        if keys.is_empty() {
            return Ok(0);
        }
        let ttl_ms = ttl.as_millis().max(1) as u64;
        let mut pipe = redis::pipe();
        for key in keys {
            pipe.cmd("PEXPIRE").arg(key).arg(ttl_ms);
        }
        let applied: Vec<i64> = self
            .link
            .run(|conn| pipe.query(conn))
            .map_err(|e| series_error(&keys[0], e))?;
        Ok(applied.into_iter().filter(|hit| *hit == 1).count())
    }
}

/// Append-only per-entity series with two retention horizons: a hard
/// expiration on the whole series (refreshed on every write) and an explicit
/// range prune driven by the retention job.
///
/// Every stored member is `<tag>|<json>`, where the tag is unique per write,
/// so a replayed snapshot is kept as its own entry.
pub struct SeriesStore {
    backend: Arc<dyn SeriesBackend>,
    hard_ttl: Duration,
    clock: SharedClock,
    seq: AtomicU64,
}

impl SeriesStore {
    pub fn new(backend: Arc<dyn SeriesBackend>, hard_ttl: Duration, clock: SharedClock) -> Self {
        Self {
            backend,
            hard_ttl,
            clock,
            seq: AtomicU64::new(0),
        }
    }

    pub fn in_memory(hard_ttl: Duration, clock: SharedClock) -> Self {
        Self::new(Arc::new(MemorySeriesBackend::new(clock.clone())), hard_ttl, clock)
    }

    pub fn append<T: Serialize + Timestamped>(&self, entity_key: &str, snapshot: &T) -> Result<()> {
        let member = self.encode(snapshot)?;
        self.backend.add(
            &[ScoredMember {
                key: entity_key,
                score: snapshot.timestamp(),
                member,
            }],
            self.hard_ttl,
        )
    }

    /// Appends a whole sweep in one backend call. Either every item is
    /// serialised and stored, or none is.
    pub fn append_batch<T: Serialize + Timestamped>(&self, batch: &[(String, T)]) -> Result<usize> {
        let members = batch
            .iter()
            .map(|(entity_key, snapshot)| {
                self.encode(snapshot).map(|member| ScoredMember {
                    key: entity_key.as_str(),
                    score: snapshot.timestamp(),
                    member,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        self.backend.add(&members, self.hard_ttl)?;
        Ok(batch.len())
    }

    /// Entries with `start <= timestamp <= end`, oldest first.
    pub fn range<T: DeserializeOwned>(&self, entity_key: &str, start: i64, end: i64) -> Result<Vec<T>> {
        self.backend
            .range(entity_key, start, end)?
            .iter()
            .map(|member| decode(member))
            .collect()
    }

    pub fn latest<T: DeserializeOwned>(&self, entity_key: &str) -> Result<Option<T>> {
        self.backend.last(entity_key)?.map(|member| decode(&member)).transpose()
    }

    /// Removes every entry with `timestamp < cutoff`; returns how many went.
    pub fn prune_older_than(&self, entity_key: &str, cutoff: i64) -> Result<usize> {
        self.backend.remove_before(entity_key, cutoff)
    }

    /// Ids of every live series of one kind in one network. Scans all keys.
    pub fn list_entities(&self, kind: KeyKind, network: Network) -> Result<Vec<String>> {
        let mut ids: Vec<String> = self
            .backend
            .scan(&entity_prefix(kind, network))?
            .iter()
            .filter_map(|k| entity_id(kind, network, k).map(str::to_string))
            .collect();
        ids.sort();
        ids.dedup();
        Ok(ids)
    }

    /// Re-applies the hard expiration to every live series.
    pub fn refresh_expirations(&self) -> Result<usize> {
        let mut keys = Vec::new();
        for kind in [KeyKind::NodeMetrics, KeyKind::PodCredits] {
            for network in Network::ALL {
                keys.extend(self.backend.scan(&entity_prefix(kind, network))?);
            }
        }
        self.backend.expire(&keys, self.hard_ttl)
    }

    fn encode<T: Serialize>(&self, snapshot: &T) -> Result<String> {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        let json = serde_json::to_string(snapshot)?;
        Ok(format!("{:x}.{:x}|{json}", self.clock.now_ms(), seq))
    }
}

fn decode<T: DeserializeOwned>(member: &str) -> Result<T> {
    let json = member.split_once('|').map_or(member, |(_, json)| json);
    serde_json::from_str(json).map_err(PodwatchError::from)
}
