use crate::error::{PodwatchError, Result};
use crate::models::history::{Aggregate, WindowChange};
use crate::models::network::Network;
use crate::models::snapshot::{CreditSnapshot, MetricSnapshot};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

const DB_SCHEMA_VERSION: i64 = 2;

const NODE_COLUMNS: &str = "pubkey, timestamp, uptime, score, storage_committed, storage_used, \
     storage_usage_percent, ram_total, ram_used, ram_percent, cpu_percent";

pub fn initialize_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA synchronous = NORMAL;",
    )?;

    let mut version: i64 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;

    if version < 1 {
        apply_migration_1(conn)?;
        version = 1;
        conn.pragma_update(None, "user_version", version)?;
    }

    if version < 2 {
        apply_migration_2(conn)?;
        version = 2;
        conn.pragma_update(None, "user_version", version)?;
    }

    if version > DB_SCHEMA_VERSION {
        log::warn!("history database schema v{version} is newer than v{DB_SCHEMA_VERSION}");
    }

    Ok(())
}

fn apply_migration_1(conn: &Connection) -> rusqlite::Result<()> {
    for network in Network::ALL {
        conn.execute_batch(&format!(
            "
            CREATE TABLE IF NOT EXISTS {nodes} (
                pubkey TEXT NOT NULL,
                timestamp INTEGER NOT NULL,
                uptime REAL NOT NULL,
                score REAL NOT NULL,
                storage_committed INTEGER,
                storage_used INTEGER,
                storage_usage_percent REAL,
                ram_total INTEGER,
                ram_used INTEGER,
                ram_percent REAL,
                cpu_percent REAL
            );

            CREATE TABLE IF NOT EXISTS {pods} (
                pod_id TEXT NOT NULL,
                timestamp INTEGER NOT NULL,
                credits REAL NOT NULL
            );
            ",
            nodes = network.node_metrics_table(),
            pods = network.pod_credits_table(),
        ))?;
    }
    Ok(())
}

fn apply_migration_2(conn: &Connection) -> rusqlite::Result<()> {
    for network in Network::ALL {
        let nodes = network.node_metrics_table();
        let pods = network.pod_credits_table();
        conn.execute_batch(&format!(
            "
            CREATE INDEX IF NOT EXISTS idx_{nodes}_pubkey_ts ON {nodes}(pubkey, timestamp);
            CREATE INDEX IF NOT EXISTS idx_{pods}_pod_ts ON {pods}(pod_id, timestamp);
            "
        ))?;
    }
    Ok(())
}

/// Numeric columns that can be aggregated or diffed server-side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Metric {
    Uptime,
    Score,
    CpuPercent,
    RamPercent,
    StorageUsagePercent,
    Credits,
}

impl Metric {
    fn column(&self) -> &'static str {
        match self {
            Metric::Uptime => "uptime",
            Metric::Score => "score",
            Metric::CpuPercent => "cpu_percent",
            Metric::RamPercent => "ram_percent",
            Metric::StorageUsagePercent => "storage_usage_percent",
            Metric::Credits => "credits",
        }
    }

    fn table(&self, network: Network) -> &'static str {
        match self {
            Metric::Credits => network.pod_credits_table(),
            _ => network.node_metrics_table(),
        }
    }

    fn key_column(&self) -> &'static str {
        match self {
            Metric::Credits => "pod_id",
            _ => "pubkey",
        }
    }
}

impl std::str::FromStr for Metric {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "uptime" => Ok(Metric::Uptime),
            "score" => Ok(Metric::Score),
            "cpuPercent" => Ok(Metric::CpuPercent),
            "ramPercent" => Ok(Metric::RamPercent),
            "storageUsagePercent" => Ok(Metric::StorageUsagePercent),
            "credits" => Ok(Metric::Credits),
            other => Err(format!("Unknown metric: {other}")),
        }
    }
}

/// Authoritative long-horizon record. Never touched by the soft-retention prune.
pub struct HistoryStore {
    conn: Mutex<Connection>,
}

impl HistoryStore {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Writes one sweep's node rows in a single transaction.
    pub fn insert_node_batch(&self, network: Network, rows: &[MetricSnapshot]) -> Result<usize> {
        if rows.is_empty() {
            return Ok(0);
        }
        let write_failed = |e: rusqlite::Error| PodwatchError::HistoryWriteFailed {
            network,
            reason: e.to_string(),
        };

        let conn = self.lock()?;
        let tx = conn.unchecked_transaction().map_err(write_failed)?;
        {
            let mut stmt = tx
                .prepare(&format!(
                    "INSERT INTO {} ({NODE_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                    network.node_metrics_table()
                ))
                .map_err(write_failed)?;

            for row in rows {
                stmt.execute(params![
                    row.pubkey,
                    row.timestamp,
                    row.uptime,
                    row.score,
                    row.storage_committed.map(|v| v as i64),
                    row.storage_used.map(|v| v as i64),
                    row.storage_usage_percent,
                    row.ram_total.map(|v| v as i64),
                    row.ram_used.map(|v| v as i64),
                    row.ram_percent,
                    row.cpu_percent,
                ])
                .map_err(write_failed)?;
            }
        }
        tx.commit().map_err(write_failed)?;
        Ok(rows.len())
    }

    pub fn insert_credit_batch(&self, network: Network, rows: &[CreditSnapshot]) -> Result<usize> {
        if rows.is_empty() {
            return Ok(0);
        }
        let write_failed = |e: rusqlite::Error| PodwatchError::HistoryWriteFailed {
            network,
            reason: e.to_string(),
        };

        let conn = self.lock()?;
        let tx = conn.unchecked_transaction().map_err(write_failed)?;
        {
            let mut stmt = tx
                .prepare(&format!(
                    "INSERT INTO {} (pod_id, timestamp, credits) VALUES (?1, ?2, ?3)",
                    network.pod_credits_table()
                ))
                .map_err(write_failed)?;

            for row in rows {
                stmt.execute(params![row.pod_id, row.timestamp, row.credits])
                    .map_err(write_failed)?;
            }
        }
        tx.commit().map_err(write_failed)?;
        Ok(rows.len())
    }

    /// Rows with `start <= timestamp <= end`, newest first.
    pub fn node_history(
        &self,
        network: Network,
        pubkey: &str,
        start: i64,
        end: i64,
        limit: Option<usize>,
    ) -> Result<Vec<MetricSnapshot>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {NODE_COLUMNS} FROM {} WHERE pubkey = ?1 AND timestamp >= ?2 AND timestamp <= ?3 \
             ORDER BY timestamp DESC, rowid DESC LIMIT ?4",
            network.node_metrics_table()
        ))?;

        let rows = stmt
            .query_map(params![pubkey, start, end, sql_limit(limit)], node_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Rows with `start <= timestamp <= end`, newest first.
    pub fn credit_history(
        &self,
        network: Network,
        pod_id: &str,
        start: i64,
        end: i64,
        limit: Option<usize>,
    ) -> Result<Vec<CreditSnapshot>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT pod_id, timestamp, credits FROM {} WHERE pod_id = ?1 AND timestamp >= ?2 AND timestamp <= ?3 \
             ORDER BY timestamp DESC, rowid DESC LIMIT ?4",
            network.pod_credits_table()
        ))?;

        let rows = stmt
            .query_map(params![pod_id, start, end, sql_limit(limit)], credit_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    pub fn latest_node(&self, network: Network, pubkey: &str) -> Result<Option<MetricSnapshot>> {
        let conn = self.lock()?;
        let row = conn
            .query_row(
                &format!(
                    "SELECT {NODE_COLUMNS} FROM {} WHERE pubkey = ?1 ORDER BY timestamp DESC, rowid DESC LIMIT 1",
                    network.node_metrics_table()
                ),
                params![pubkey],
                node_from_row,
            )
            .optional()?;
        Ok(row)
    }

    pub fn latest_credits(&self, network: Network, pod_id: &str) -> Result<Option<CreditSnapshot>> {
        let conn = self.lock()?;
        let row = conn
            .query_row(
                &format!(
                    "SELECT pod_id, timestamp, credits FROM {} WHERE pod_id = ?1 ORDER BY timestamp DESC, rowid DESC LIMIT 1",
                    network.pod_credits_table()
                ),
                params![pod_id],
                credit_from_row,
            )
            .optional()?;
        Ok(row)
    }

    /// avg/min/max/count over non-null values, computed by SQLite.
    pub fn aggregate(
        &self,
        network: Network,
        metric: Metric,
        entity: &str,
        start: i64,
        end: i64,
    ) -> Result<Option<Aggregate>> {
        let column = metric.column();
        let conn = self.lock()?;
        let (avg, min, max, count): (Option<f64>, Option<f64>, Option<f64>, i64) = conn.query_row(
            &format!(
                "SELECT AVG({column}), MIN({column}), MAX({column}), COUNT({column}) FROM {} \
                 WHERE {} = ?1 AND timestamp >= ?2 AND timestamp <= ?3",
                metric.table(network),
                metric.key_column()
            ),
            params![entity, start, end],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
        )?;

        match (avg, min, max) {
            (Some(avg), Some(min), Some(max)) if count > 0 => Ok(Some(Aggregate {
                avg,
                min,
                max,
                count: count as u64,
            })),
            _ => Ok(None),
        }
    }

    /// Newest vs oldest value in the trailing `window_minutes` ending at `now`.
    pub fn change_over_window(
        &self,
        network: Network,
        metric: Metric,
        entity: &str,
        window_minutes: i64,
        now: i64,
    ) -> Result<Option<WindowChange>> {
        let start = now - window_minutes * 60 * 1000;
        let column = metric.column();
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {column} FROM {} WHERE {} = ?1 AND timestamp >= ?2 AND timestamp <= ?3 \
             AND {column} IS NOT NULL ORDER BY timestamp DESC, rowid DESC",
            metric.table(network),
            metric.key_column()
        ))?;

        let values = stmt
            .query_map(params![entity, start, now], |row| row.get::<_, f64>(0))?
            .collect::<rusqlite::Result<Vec<f64>>>()?;
        Ok(crate::analysis::series::window_change(&values))
    }

    pub fn list_nodes(&self, network: Network) -> Result<Vec<String>> {
        self.list_distinct(network.node_metrics_table(), "pubkey")
    }

    pub fn list_pods(&self, network: Network) -> Result<Vec<String>> {
        self.list_distinct(network.pod_credits_table(), "pod_id")
    }

    fn list_distinct(&self, table: &str, column: &str) -> Result<Vec<String>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!("SELECT DISTINCT {column} FROM {table} ORDER BY {column}"))?;
        let ids = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(ids)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| PodwatchError::Config("history connection lock poisoned".to_string()))
    }
}

fn sql_limit(limit: Option<usize>) -> i64 {
    limit.map(|l| l as i64).unwrap_or(-1)
}

fn node_from_row(row: &Row<'_>) -> rusqlite::Result<MetricSnapshot> {
    Ok(MetricSnapshot {
        pubkey: row.get(0)?,
        timestamp: row.get(1)?,
        uptime: row.get(2)?,
        score: row.get(3)?,
        storage_committed: row.get::<_, Option<i64>>(4)?.map(|v| v.max(0) as u64),
        storage_used: row.get::<_, Option<i64>>(5)?.map(|v| v.max(0) as u64),
        storage_usage_percent: row.get(6)?,
        ram_total: row.get::<_, Option<i64>>(7)?.map(|v| v.max(0) as u64),
        ram_used: row.get::<_, Option<i64>>(8)?.map(|v| v.max(0) as u64),
        ram_percent: row.get(9)?,
        cpu_percent: row.get(10)?,
    })
}

fn credit_from_row(row: &Row<'_>) -> rusqlite::Result<CreditSnapshot> {
    Ok(CreditSnapshot {
        pod_id: row.get(0)?,
        timestamp: row.get(1)?,
        credits: row.get(2)?,
    })
}
