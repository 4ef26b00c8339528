//! Tracked wallets and holdings.

use anyhow::{Context, Result};
use chrono::Utc;
use rusqlite::Connection;
use std::path::Path;
use std::sync::Mutex;

#[derive(Debug, Clone)]
pub struct Holding {
    pub wallet: String,
    pub mint: String,
    pub amount: f64,
    pub value_usd: f64,
}

pub struct PortfolioStore {
    conn: Mutex<Connection>,
}

impl PortfolioStore {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open portfolio store at {}", path.display()))?;
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
            "CREATE TABLE IF NOT EXISTS wallets (
                address TEXT PRIMARY KEY,
                added_at TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS holdings (
                wallet TEXT NOT NULL,
                mint TEXT NOT NULL,
                amount REAL NOT NULL,
                value_usd REAL NOT NULL,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (wallet, mint)
            );",
        )
        .context("Failed to initialize portfolio schema")?;
        Ok(())
    }

    /// Returns false when the wallet was already tracked.
    pub fn add_wallet(&self, address: &str) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO wallets (address, added_at) VALUES (?1, ?2)",
            rusqlite::params![address, Utc::now().to_rfc3339()],
        )?;
        Ok(inserted > 0)
    }

    /// Returns false when the wallet was not tracked. Holdings rows go
    /// with it.
    pub fn remove_wallet(&self, address: &str) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "DELETE FROM holdings WHERE wallet = ?1",
            rusqlite::params![address],
        )?;
        let removed = conn.execute(
            "DELETE FROM wallets WHERE address = ?1",
            rusqlite::params![address],
        )?;
        Ok(removed > 0)
    }

    pub fn list_wallets(&self) -> Result<Vec<String>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT address FROM wallets ORDER BY added_at")?;
        let wallets = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(wallets)
    }

    pub fn upsert_holding(&self, holding: &Holding) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO holdings (wallet, mint, amount, value_usd, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(wallet, mint) DO UPDATE SET
                amount = excluded.amount,
                value_usd = excluded.value_usd,
                updated_at = excluded.updated_at",
            rusqlite::params![
                holding.wallet,
                holding.mint,
                holding.amount,
                holding.value_usd,
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn holdings_for(&self, wallet: &str) -> Result<Vec<Holding>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT wallet, mint, amount, value_usd FROM holdings WHERE wallet = ?1",
        )?;
        let holdings = stmt
            .query_map(rusqlite::params![wallet], |row| {
                Ok(Holding {
                    wallet: row.get(0)?,
                    mint: row.get(1)?,
                    amount: row.get(2)?,
                    value_usd: row.get(3)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(holdings)
    }

    pub fn check_health(&self) -> bool {
        let conn = self.conn.lock().unwrap();
        conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))
            .is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wallet_add_remove_cycle() {
        let store = PortfolioStore::open_in_memory().unwrap();
        assert!(store.add_wallet("w1").unwrap());
        assert!(!store.add_wallet("w1").unwrap());
        assert_eq!(store.list_wallets().unwrap(), vec!["w1"]);

        assert!(store.remove_wallet("w1").unwrap());
        assert!(!store.remove_wallet("w1").unwrap());
        assert!(store.list_wallets().unwrap().is_empty());
    }

    #[test]
    fn test_holdings_follow_wallet_removal() {
        let store = PortfolioStore::open_in_memory().unwrap();
        store.add_wallet("w1").unwrap();
        store
            .upsert_holding(&Holding {
                wallet: "w1".to_string(),
                mint: "m1".to_string(),
                amount: 10.0,
                value_usd: 25.0,
            })
            .unwrap();
        assert_eq!(store.holdings_for("w1").unwrap().len(), 1);

        store.remove_wallet("w1").unwrap();
        assert!(store.holdings_for("w1").unwrap().is_empty());
    }

    #[test]
    fn test_holding_upsert_overwrites() {
        let store = PortfolioStore::open_in_memory().unwrap();
        let mut holding = Holding {
            wallet: "w1".to_string(),
            mint: "m1".to_string(),
            amount: 10.0,
            value_usd: 25.0,
        };
        store.upsert_holding(&holding).unwrap();
        holding.amount = 20.0;
        store.upsert_holding(&holding).unwrap();

        let rows = store.holdings_for("w1").unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].amount, 20.0);
    }
}
