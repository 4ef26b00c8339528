//! Append-only audit log of every notifier decision.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use log::error;
use rusqlite::Connection;
use std::path::Path;
use std::sync::Mutex;

#[derive(Debug, Clone)]
pub struct AuditRow {
    pub ts: DateTime<Utc>,
    pub mint: String,
    pub symbol: String,
    pub severity: String,
    pub confidence: u8,
    pub outcome: String,
    pub details: String,
    pub raw_alert: String,
}

pub struct AuditLogger {
    conn: Mutex<Connection>,
}

impl AuditLogger {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open audit store at {}", path.display()))?;
        let logger = Self {
            conn: Mutex::new(conn),
        };
        logger.init_schema()?;
        Ok(logger)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory audit store")?;
        let logger = Self {
            conn: Mutex::new(conn),
        };
        logger.init_schema()?;
        Ok(logger)
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS notifier_audit_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                ts TEXT NOT NULL,
                mint TEXT NOT NULL,
                symbol TEXT NOT NULL,
                severity TEXT NOT NULL,
                confidence INTEGER NOT NULL,
                outcome TEXT NOT NULL,
                details TEXT NOT NULL,
                raw_alert TEXT NOT NULL
            );",
        )
        .context("Failed to initialize audit schema")?;
        Ok(())
    }

    /// Best-effort append; a failed audit write is logged but never blocks
    /// the alert path.
    pub fn log_decision(&self, row: &AuditRow) {
        let conn = self.conn.lock().unwrap();
        let result = conn.execute(
            "INSERT INTO notifier_audit_log
                (ts, mint, symbol, severity, confidence, outcome, details, raw_alert)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            rusqlite::params![
                row.ts.to_rfc3339(),
                row.mint,
                row.symbol,
                row.severity,
                row.confidence,
                row.outcome,
                row.details,
                row.raw_alert,
            ],
        );
        if let Err(e) = result {
            error!("❌ Failed to write audit row: {}", e);
        }
    }

    pub fn check_health(&self) -> bool {
        let conn = self.conn.lock().unwrap();
        conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))
            .is_ok()
    }

    pub fn count_outcome(&self, outcome: &str) -> Result<i64> {
        let conn = self.conn.lock().unwrap();
        let count = conn.query_row(
            "SELECT COUNT(*) FROM notifier_audit_log WHERE outcome = ?1",
            rusqlite::params![outcome],
            |row| row.get(0),
        )?;
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(outcome: &str) -> AuditRow {
        AuditRow {
            ts: Utc::now(),
            mint: "MintA".to_string(),
            symbol: "ABC".to_string(),
            severity: "actionable".to_string(),
            confidence: 76,
            outcome: outcome.to_string(),
            details: "test".to_string(),
            raw_alert: "{}".to_string(),
        }
    }

    #[test]
    fn test_log_and_count() {
        let logger = AuditLogger::open_in_memory().unwrap();
        logger.log_decision(&row("SENT"));
        logger.log_decision(&row("DUPLICATE"));
        logger.log_decision(&row("SENT"));

        assert_eq!(logger.count_outcome("SENT").unwrap(), 2);
        assert_eq!(logger.count_outcome("DUPLICATE").unwrap(), 1);
        assert_eq!(logger.count_outcome("MUTED").unwrap(), 0);
    }

    #[test]
    fn test_health() {
        let logger = AuditLogger::open_in_memory().unwrap();
        assert!(logger.check_health());
    }
}
