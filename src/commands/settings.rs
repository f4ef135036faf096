use crate::error::{PodwatchError, Result};
use crate::models::network::Network;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::fs;
use std::path::Path;

const SETTINGS_SCHEMA_VERSION: i64 = 2;

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct NetworkEndpoints {
    pub devnet: String,
    pub mainnet: String,
}

impl NetworkEndpoints {
    pub fn for_network(&self, network: Network) -> &str {
        match network {
            Network::Devnet => &self.devnet,
            Network::Mainnet => &self.mainnet,
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    pub cluster_endpoints: NetworkEndpoints,
    pub credit_endpoints: NetworkEndpoints,
    pub database_path: String,
    pub listen: String,
    pub cron_secret: Option<String>,
    pub redis_url: Option<String>,
    pub known_good_version: String,
    pub roster_cache_ttl_secs: u64,
    pub roster_timeout_ms: u64,
    pub detail_timeout_ms: u64,
    pub detail_concurrency: usize,
    pub hot_cache_ttl_secs: u64,
    pub hard_expiration_days: u64,
    pub soft_retention_days: u64,
    pub collect_interval_secs: u64,
    pub cleanup_interval_secs: u64,
}

impl Settings {
    /// Builds settings from a partial JSON object, filling defaults.
    pub fn from_json(partial: Value) -> Result<Settings> {
        settings_from_value(migrate_settings(partial))
    }
}

/// Reads the JSON settings file (missing file means all defaults), migrates
/// and sanitises it, then applies environment overrides.
pub fn load_settings(path: &Path) -> Result<Settings> {
    let original = if path.exists() {
        let raw = fs::read_to_string(path)
            .map_err(|e| PodwatchError::Config(format!("Failed to read {}: {e}", path.display())))?;
        serde_json::from_str::<Value>(&raw)
            .map_err(|e| PodwatchError::Config(format!("Invalid JSON in {}: {e}", path.display())))?
    } else {
        log::info!("settings file {} not found, using defaults", path.display());
        json!({})
    };

    let mut merged = migrate_settings(original);
    merge_settings(&mut merged, &env_overrides(|name| std::env::var(name).ok()));
    settings_from_value(migrate_settings(merged))
}

fn settings_from_value(value: Value) -> Result<Settings> {
    serde_json::from_value(value).map_err(|e| PodwatchError::Config(format!("Invalid settings: {e}")))
}

fn env_overrides<F>(lookup: F) -> Value
where
    F: Fn(&str) -> Option<String>,
{
    let mut overrides = Map::new();
    if let Some(secret) = lookup("CRON_SECRET_TOKEN").filter(|s| !s.is_empty()) {
        overrides.insert("cronSecret".to_string(), json!(secret));
    }
    if let Some(db_path) = lookup("PODWATCH_DATABASE_PATH").filter(|s| !s.is_empty()) {
        overrides.insert("databasePath".to_string(), json!(db_path));
    }
    if let Some(url) = lookup("REDIS_URL").filter(|s| !s.is_empty()) {
        overrides.insert("redisUrl".to_string(), json!(url));
    }
    Value::Object(overrides)
}

fn default_settings() -> Value {
    json!({
        "schema_version": SETTINGS_SCHEMA_VERSION,
        "clusterEndpoints": {
            "devnet": "http://127.0.0.1:6000/rpc",
            "mainnet": "http://127.0.0.1:6000/rpc"
        },
        "creditEndpoints": {
            "devnet": "",
            "mainnet": ""
        },
        "databasePath": "podwatch.db",
        "listen": "0.0.0.0:8080",
        "cronSecret": null,
        "redisUrl": null,
        "knownGoodVersion": "0.7.3",
        "rosterCacheTtlSecs": 30,
        "rosterTimeoutMs": 8000,
        "detailTimeoutMs": 3000,
        "detailConcurrency": 16,
        "hotCacheTtlSecs": 60,
        "hardExpirationDays": 60,
        "softRetentionDays": 7,
        "collectIntervalSecs": 0,
        "cleanupIntervalSecs": 0
    })
}

fn migrate_settings(input: Value) -> Value {
    let defaults = default_settings();
    let mut out = match input {
        Value::Object(map) => Value::Object(map),
        _ => Value::Object(Map::new()),
    };

    let version = out
        .get("schema_version")
        .and_then(Value::as_i64)
        .unwrap_or(0);

    if version < 1 {
        migrate_flat_endpoints(&mut out);
    }

    if version < 2 {
        // V2 splits the single cache TTL into roster and hot-cache TTLs.
        if let Some(ttl) = out.get("cacheTtlSecs").cloned() {
            ensure_key(&mut out, "hotCacheTtlSecs", ttl);
        }
        if let Some(obj) = out.as_object_mut() {
            obj.remove("cacheTtlSecs");
        }
    }

    deep_merge_defaults(&mut out, &defaults);
    sanitize_settings(&mut out);
    if let Some(obj) = out.as_object_mut() {
        obj.insert("schema_version".to_string(), json!(SETTINGS_SCHEMA_VERSION));
    }

    out
}

/// V0 files carried one `rpcEndpoint` shared by both networks.
fn migrate_flat_endpoints(settings: &mut Value) {
    let Some(obj) = settings.as_object_mut() else {
        return;
    };
    if let Some(endpoint) = obj.remove("rpcEndpoint") {
        obj.entry("clusterEndpoints".to_string())
            .or_insert_with(|| json!({ "devnet": endpoint.clone(), "mainnet": endpoint }));
    }
}

fn deep_merge_defaults(target: &mut Value, defaults: &Value) {
    let (Some(target_obj), Some(default_obj)) = (target.as_object_mut(), defaults.as_object()) else {
        return;
    };

    for (key, default_value) in default_obj {
        match target_obj.get_mut(key) {
            Some(existing) => {
                if existing.is_object() && default_value.is_object() {
                    deep_merge_defaults(existing, default_value);
                }
            }
            None => {
                target_obj.insert(key.clone(), default_value.clone());
            }
        }
    }
}

fn ensure_key(target: &mut Value, key: &str, value: Value) {
    if let Some(obj) = target.as_object_mut() {
        obj.entry(key.to_string()).or_insert(value);
    }
}

fn merge_settings(target: &mut Value, incoming: &Value) {
    match (target, incoming) {
        (Value::Object(target_obj), Value::Object(incoming_obj)) => {
            for (key, value) in incoming_obj {
                if let Some(existing) = target_obj.get_mut(key) {
                    merge_settings(existing, value);
                } else {
                    target_obj.insert(key.clone(), value.clone());
                }
            }
        }
        (target_slot, incoming_value) => {
            *target_slot = incoming_value.clone();
        }
    }
}

fn sanitize_settings(settings: &mut Value) {
    let Some(obj) = settings.as_object_mut() else {
        return;
    };

    clamp_u64(obj, "rosterCacheTtlSecs", 1, 600, 30);
    clamp_u64(obj, "rosterTimeoutMs", 1_000, 60_000, 8_000);
    clamp_u64(obj, "detailTimeoutMs", 100, 30_000, 3_000);
    clamp_u64(obj, "detailConcurrency", 1, 256, 16);
    clamp_u64(obj, "hotCacheTtlSecs", 5, 3_600, 60);
    clamp_u64(obj, "hardExpirationDays", 1, 365, 60);
    clamp_u64(obj, "softRetentionDays", 1, 90, 7);
    clamp_u64(obj, "collectIntervalSecs", 0, 86_400, 0);
    clamp_u64(obj, "cleanupIntervalSecs", 0, 604_800, 0);

    // Detail fetches are best-effort and must give up before the roster call.
    let roster_timeout = obj.get("rosterTimeoutMs").and_then(Value::as_u64).unwrap_or(8_000);
    let detail_timeout = obj.get("detailTimeoutMs").and_then(Value::as_u64).unwrap_or(3_000);
    if detail_timeout >= roster_timeout {
        obj.insert("detailTimeoutMs".to_string(), json!(roster_timeout - 1));
    }

    // The soft horizon never outlives the hard one.
    let hard_days = obj.get("hardExpirationDays").and_then(Value::as_u64).unwrap_or(60);
    let soft_days = obj.get("softRetentionDays").and_then(Value::as_u64).unwrap_or(7);
    if soft_days > hard_days {
        obj.insert("softRetentionDays".to_string(), json!(hard_days));
    }

    ensure_string(obj, "databasePath", "podwatch.db");
    ensure_string(obj, "listen", "0.0.0.0:8080");
    ensure_string(obj, "knownGoodVersion", "0.7.3");

    null_if_blank(obj, "cronSecret");
    null_if_blank(obj, "redisUrl");
}

fn null_if_blank(map: &mut Map<String, Value>, key: &str) {
    let value = map
        .get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
        .map(|s| json!(s))
        .unwrap_or(Value::Null);
    map.insert(key.to_string(), value);
}

fn clamp_u64(map: &mut Map<String, Value>, key: &str, min: u64, max: u64, default: u64) {
    let raw = map.get(key).and_then(Value::as_u64).unwrap_or(default);
    map.insert(key.to_string(), json!(raw.clamp(min, max)));
}

fn ensure_string(map: &mut Map<String, Value>, key: &str, default: &str) {
    let value = map
        .get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .unwrap_or(default)
        .to_string();
    map.insert(key.to_string(), json!(value));
}
