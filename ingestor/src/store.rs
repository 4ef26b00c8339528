//! Persistent store for pool snapshots and completed OHLCV bars.

use crate::dex::PoolInfo;
use crate::ohlcv::CompletedBar;
use anyhow::{Context, Result};
use chrono::Utc;
use rusqlite::Connection;
use std::path::Path;
use std::sync::Mutex;

pub struct IngestStore {
    conn: Mutex<Connection>,
}

impl IngestStore {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open ingest store at {}", path.display()))?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory store")?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS pools (
                pool_id TEXT PRIMARY KEY,
                dex TEXT NOT NULL,
                token_a_mint TEXT NOT NULL,
                token_b_mint TEXT NOT NULL,
                reserve_a REAL NOT NULL,
                reserve_b REAL NOT NULL,
                tvl_usd REAL NOT NULL,
                volume_24h_usd REAL NOT NULL,
                last_updated TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS ohlcv_bars (
                pool_id TEXT NOT NULL,
                ts TEXT NOT NULL,
                interval_minutes INTEGER NOT NULL,
                o REAL NOT NULL,
                h REAL NOT NULL,
                l REAL NOT NULL,
                c REAL NOT NULL,
                volume_usd REAL NOT NULL,
                PRIMARY KEY (pool_id, ts, interval_minutes)
            );",
        )
        .context("Failed to initialize ingest schema")?;
        Ok(())
    }

    pub fn save_pool_snapshot(&self, pools: &[PoolInfo]) -> Result<usize> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        let now = Utc::now().to_rfc3339();
        for pool in pools {
            tx.execute(
                "INSERT INTO pools
                    (pool_id, dex, token_a_mint, token_b_mint, reserve_a, reserve_b,
                     tvl_usd, volume_24h_usd, last_updated)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                 ON CONFLICT(pool_id) DO UPDATE SET
                    reserve_a = excluded.reserve_a,
                    reserve_b = excluded.reserve_b,
                    tvl_usd = excluded.tvl_usd,
                    volume_24h_usd = excluded.volume_24h_usd,
                    last_updated = excluded.last_updated",
                rusqlite::params![
                    pool.pool_id,
                    pool.dex,
                    pool.mint_base,
                    pool.mint_quote,
                    pool.reserve_base,
                    pool.reserve_quote,
                    pool.tvl_usd,
                    pool.volume_24h_usd,
                    now,
                ],
            )?;
        }
        tx.commit()?;
        Ok(pools.len())
    }

    pub fn save_bars(&self, bars: &[CompletedBar]) -> Result<usize> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        for bar in bars {
            tx.execute(
                "INSERT OR REPLACE INTO ohlcv_bars
                    (pool_id, ts, interval_minutes, o, h, l, c, volume_usd)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                rusqlite::params![
                    bar.pool_id,
                    bar.bar_start.to_rfc3339(),
                    bar.interval_minutes,
                    bar.bar.open,
                    bar.bar.high,
                    bar.bar.low,
                    bar.bar.close,
                    bar.bar.volume_usd,
                ],
            )?;
        }
        tx.commit()?;
        Ok(bars.len())
    }

    pub fn pool_count(&self) -> Result<i64> {
        let conn = self.conn.lock().unwrap();
        Ok(conn.query_row("SELECT COUNT(*) FROM pools", [], |row| row.get(0))?)
    }

    pub fn bar_count(&self) -> Result<i64> {
        let conn = self.conn.lock().unwrap();
        Ok(conn.query_row("SELECT COUNT(*) FROM ohlcv_bars", [], |row| row.get(0))?)
    }

    pub fn check_health(&self) -> bool {
        let conn = self.conn.lock().unwrap();
        conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))
            .is_ok()
    }
}
