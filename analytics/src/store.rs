//! Token metadata store.
//!
//! The worker thread resolves metadata synchronously; rusqlite behind a
//! mutex is enough because lookups are cache-miss-only.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::Connection;
use soul_bus::TokenMetadata;
use std::collections::HashSet;
use std::path::Path;
use std::sync::Mutex;

pub trait TokenStore: Send + Sync {
    fn token_metadata(&self, mint: &str) -> Result<Option<TokenMetadata>>;
    fn token_list_mints(&self) -> Result<HashSet<String>>;
    fn check_health(&self) -> bool;
}

pub struct SqliteTokenStore {
    conn: Mutex<Connection>,
}

impl SqliteTokenStore {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open token store at {}", path.display()))?;
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
            "CREATE TABLE IF NOT EXISTS tokens (
                mint TEXT PRIMARY KEY,
                symbol TEXT NOT NULL,
                name TEXT NOT NULL DEFAULT '',
                decimals INTEGER NOT NULL DEFAULT 9,
                on_token_list INTEGER NOT NULL DEFAULT 0,
                top_holder_pct REAL NOT NULL DEFAULT 0,
                risky_authorities INTEGER NOT NULL DEFAULT 0,
                first_liquidity_ts TEXT
            );",
        )
        .context("Failed to initialize tokens schema")?;
        Ok(())
    }

    pub fn upsert_token(&self, meta: &TokenMetadata) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO tokens
                (mint, symbol, name, decimals, on_token_list, top_holder_pct,
                 risky_authorities, first_liquidity_ts)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(mint) DO UPDATE SET
                symbol = excluded.symbol,
                name = excluded.name,
                decimals = excluded.decimals,
                on_token_list = excluded.on_token_list,
                top_holder_pct = excluded.top_holder_pct,
                risky_authorities = excluded.risky_authorities,
                first_liquidity_ts = excluded.first_liquidity_ts",
            rusqlite::params![
                meta.mint,
                meta.symbol,
                meta.name,
                meta.decimals,
                meta.on_token_list as i64,
                meta.top_holder_pct,
                meta.risky_authorities as i64,
                meta.first_liquidity_ts.map(|t| t.to_rfc3339()),
            ],
        )
        .context("Failed to upsert token")?;
        Ok(())
    }
}

impl TokenStore for SqliteTokenStore {
    fn token_metadata(&self, mint: &str) -> Result<Option<TokenMetadata>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT mint, symbol, name, decimals, on_token_list, top_holder_pct,
                    risky_authorities, first_liquidity_ts
             FROM tokens WHERE mint = ?1",
        )?;
        let mut rows = stmt.query(rusqlite::params![mint])?;
        let Some(row) = rows.next()? else {
            return Ok(None);
        };
        let first_liquidity_ts: Option<String> = row.get(7)?;
        Ok(Some(TokenMetadata {
            mint: row.get(0)?,
            symbol: row.get(1)?,
            name: row.get(2)?,
            decimals: row.get::<_, i64>(3)? as u8,
            on_token_list: row.get::<_, i64>(4)? != 0,
            top_holder_pct: row.get(5)?,
            risky_authorities: row.get::<_, i64>(6)? != 0,
            first_liquidity_ts: first_liquidity_ts
                .and_then(|raw| DateTime::parse_from_rfc3339(&raw).ok())
                .map(|t| t.with_timezone(&Utc)),
        }))
    }

    fn token_list_mints(&self) -> Result<HashSet<String>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT mint FROM tokens WHERE on_token_list = 1")?;
        let mints = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<HashSet<_>, _>>()?;
        Ok(mints)
    }

    fn check_health(&self) -> bool {
        let conn = self.conn.lock().unwrap();
        conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))
            .is_ok()
    }
}

/// Test double holding fixed metadata.
#[derive(Default)]
pub struct MockTokenStore {
    tokens: Mutex<Vec<TokenMetadata>>,
}

impl MockTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token(self, meta: TokenMetadata) -> Self {
        self.tokens.lock().unwrap().push(meta);
        self
    }
}

impl TokenStore for MockTokenStore {
    fn token_metadata(&self, mint: &str) -> Result<Option<TokenMetadata>> {
        Ok(self
            .tokens
            .lock()
            .unwrap()
            .iter()
            .find(|t| t.mint == mint)
            .cloned())
    }

    fn token_list_mints(&self) -> Result<HashSet<String>> {
        Ok(self
            .tokens
            .lock()
            .unwrap()
            .iter()
            .filter(|t| t.on_token_list)
            .map(|t| t.mint.clone())
            .collect())
    }

    fn check_health(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(mint: &str, on_list: bool) -> TokenMetadata {
        TokenMetadata {
            mint: mint.to_string(),
            symbol: "TKN".to_string(),
            name: "Token".to_string(),
            decimals: 9,
            on_token_list: on_list,
            top_holder_pct: 12.5,
            risky_authorities: false,
            first_liquidity_ts: Some(Utc::now()),
        }
    }

    #[test]
    fn test_upsert_and_lookup() {
        let store = SqliteTokenStore::open_in_memory().unwrap();
        store.upsert_token(&meta("MintA", true)).unwrap();

        let loaded = store.token_metadata("MintA").unwrap().unwrap();
        assert_eq!(loaded.symbol, "TKN");
        assert!(loaded.on_token_list);
        assert!(loaded.first_liquidity_ts.is_some());

        assert!(store.token_metadata("Missing").unwrap().is_none());
    }

    #[test]
    fn test_token_list_filter() {
        let store = SqliteTokenStore::open_in_memory().unwrap();
        store.upsert_token(&meta("Listed", true)).unwrap();
        store.upsert_token(&meta("Unlisted", false)).unwrap();

        let list = store.token_list_mints().unwrap();
        assert!(list.contains("Listed"));
        assert!(!list.contains("Unlisted"));
    }

    #[test]
    fn test_upsert_overwrites() {
        let store = SqliteTokenStore::open_in_memory().unwrap();
        store.upsert_token(&meta("MintA", false)).unwrap();
        let mut updated = meta("MintA", true);
        updated.top_holder_pct = 40.0;
        store.upsert_token(&updated).unwrap();

        let loaded = store.token_metadata("MintA").unwrap().unwrap();
        assert!(loaded.on_token_list);
        assert_eq!(loaded.top_holder_pct, 40.0);
    }

    #[test]
    fn test_health_check() {
        let store = SqliteTokenStore::open_in_memory().unwrap();
        assert!(store.check_health());
    }
}
