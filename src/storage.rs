use crate::config::HistoryConfig;
use crate::store::NodeStore;
use chrono::{DateTime, Duration, Utc};
use log::{debug, info};
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::params;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("connection pool error: {0}")]
    Pool(#[from] r2d2::Error),
}

pub type HistoryResult<T> = Result<T, HistoryError>;

/// Per-cycle time-series recording: one global row per cycle and one row
/// per online node, with retention-driven cleanup.
pub struct History {
    pool: Pool<SqliteConnectionManager>,
}

impl History {
    pub fn new(config: &HistoryConfig) -> HistoryResult<Self> {
        let enable_wal = config.enable_wal;
        let manager = SqliteConnectionManager::file(&config.path).with_init(move |conn| {
            if enable_wal {
                conn.execute_batch("PRAGMA journal_mode = WAL;")?;
            }
            conn.execute_batch("PRAGMA synchronous = NORMAL;")?;
            Ok(())
        });

        let pool = Pool::builder().max_size(config.pool_size).build(manager)?;
        let history = Self { pool };
        history.init_schema()?;

        info!("history database ready at {:?}", config.path);
        Ok(history)
    }

    fn init_schema(&self) -> HistoryResult<()> {
        let conn = self.pool.get()?;
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS cycles (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp TEXT NOT NULL,
                online_nodes INTEGER NOT NULL,
                total_clients INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_cycles_timestamp ON cycles(timestamp);

            CREATE TABLE IF NOT EXISTS node_samples (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp TEXT NOT NULL,
                node_id TEXT NOT NULL,
                clients INTEGER,
                uptime REAL,
                loadavg REAL,
                memory_usage REAL,
                rootfs_usage REAL
            );

            CREATE INDEX IF NOT EXISTS idx_samples_timestamp ON node_samples(timestamp);
            CREATE INDEX IF NOT EXISTS idx_samples_node_id ON node_samples(node_id);
            ",
        )?;
        debug!("history schema initialized");
        Ok(())
    }

    /// Record one completed cycle. Only online nodes are sampled.
    pub fn record_cycle(&self, now: DateTime<Utc>, store: &NodeStore) -> HistoryResult<()> {
        let conn = self.pool.get()?;
        let timestamp = now.to_rfc3339();

        conn.execute(
            "INSERT INTO cycles (timestamp, online_nodes, total_clients) VALUES (?1, ?2, ?3)",
            params![timestamp, store.online_count() as i64, store.client_total() as i64],
        )?;

        for (_, node) in store.iter().filter(|(_, node)| node.flags.online) {
            let stats = &node.statistics;
            conn.execute(
                "INSERT INTO node_samples
                    (timestamp, node_id, clients, uptime, loadavg, memory_usage, rootfs_usage)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    timestamp,
                    node.id().to_string(),
                    stats.clients.unwrap_or(node.client_count as u64) as i64,
                    stats.uptime,
                    stats.loadavg,
                    stats.memory_usage,
                    stats.rootfs_usage,
                ],
            )?;
        }
        Ok(())
    }

    /// Drop rows older than the retention period. Returns how many went.
    pub fn cleanup(&self, retention_days: u32) -> HistoryResult<usize> {
        let conn = self.pool.get()?;
        let cutoff = (Utc::now() - Duration::days(retention_days as i64)).to_rfc3339();

        let mut removed = conn.execute("DELETE FROM cycles WHERE timestamp < ?1", params![cutoff])?;
        removed += conn.execute("DELETE FROM node_samples WHERE timestamp < ?1", params![cutoff])?;

        if removed > 0 {
            info!("removed {removed} history rows older than {retention_days} days");
        }
        Ok(removed)
    }

    pub fn cycle_count(&self) -> HistoryResult<i64> {
        let conn = self.pool.get()?;
        let count = conn.query_row("SELECT COUNT(*) FROM cycles", [], |row| row.get(0))?;
        Ok(count)
    }

    pub fn sample_count(&self) -> HistoryResult<i64> {
        let conn = self.pool.get()?;
        let count = conn.query_row("SELECT COUNT(*) FROM node_samples", [], |row| row.get(0))?;
        Ok(count)
    }
}
