//! SQLite persistence for stage series and screened sets
//!
//! One `bars_<interval>` and one `screened_<interval>` table per stage.
//! Writes replace the whole table inside a single transaction, so a crash
//! leaves either the previous or the new series, never a mix.
//!
//! Disk is crash recovery only. Stages hand data to each other through
//! `handoff` channels, not through these tables.

use super::interval::Interval;
use super::types::{Bar, ScreenedEntry, ScreenedSet};
use crate::sqlite_pragma::apply_optimized_pragmas;
use rusqlite::{params, Connection};
use std::sync::{Arc, Mutex};

#[derive(Debug)]
pub enum StoreError {
    Database(rusqlite::Error),
    /// Connection mutex poisoned by a panicking writer
    Poisoned,
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        StoreError::Database(err)
    }
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::Database(e) => write!(f, "Database error: {}", e),
            StoreError::Poisoned => write!(f, "Database connection lock poisoned"),
        }
    }
}

impl std::error::Error for StoreError {}

/// Shared handle to the series database
#[derive(Clone)]
pub struct SeriesStore {
    conn: Arc<Mutex<Connection>>,
}

impl SeriesStore {
    /// Open (or create) the database and apply pragmas
    pub fn open(db_path: &str) -> Result<Self, StoreError> {
        let conn = Connection::open(db_path)?;
        apply_optimized_pragmas(&conn)?;
        log::info!("📊 Series store opened: {}", db_path);
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// In-memory store for tests and dry runs
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Ok(Self {
            conn: Arc::new(Mutex::new(Connection::open_in_memory()?)),
        })
    }

    fn bars_table(interval: Interval) -> String {
        format!("bars_{}", interval.as_str())
    }

    fn screened_table(interval: Interval) -> String {
        format!("screened_{}", interval.as_str())
    }

    /// Create both tables for a stage (idempotent)
    pub fn ensure_tables(&self, interval: Interval) -> Result<(), StoreError> {
        let conn = self.conn.lock().map_err(|_| StoreError::Poisoned)?;
        conn.execute_batch(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS "{bars}" (
                symbol TEXT NOT NULL,
                timestamp INTEGER NOT NULL,
                open REAL NOT NULL,
                high REAL NOT NULL,
                low REAL NOT NULL,
                close REAL NOT NULL,
                base_volume REAL NOT NULL,
                quote_volume REAL NOT NULL,
                rolling_base_volume REAL,
                rolling_quote_volume REAL,
                trade_count INTEGER NOT NULL,
                PRIMARY KEY (symbol, timestamp)
            );
            CREATE TABLE IF NOT EXISTS "{screened}" (
                position INTEGER PRIMARY KEY,
                symbol TEXT NOT NULL,
                base_asset TEXT NOT NULL,
                quote_asset TEXT NOT NULL,
                close REAL NOT NULL,
                last_price_move REAL NOT NULL,
                last_volume_move REAL NOT NULL,
                rolling_usdt_volume REAL NOT NULL,
                timestamp INTEGER NOT NULL
            );
            "#,
            bars = Self::bars_table(interval),
            screened = Self::screened_table(interval),
        ))?;
        Ok(())
    }

    /// Replace the stage's series with `bars`
    pub fn replace_bars(&self, interval: Interval, bars: &[Bar]) -> Result<(), StoreError> {
        let mut conn = self.conn.lock().map_err(|_| StoreError::Poisoned)?;
        let table = Self::bars_table(interval);
        let tx = conn.transaction()?;
        tx.execute(&format!(r#"DELETE FROM "{}""#, table), [])?;
        {
            let mut stmt = tx.prepare(&format!(
                r#"INSERT OR REPLACE INTO "{}" (
                    symbol, timestamp, open, high, low, close,
                    base_volume, quote_volume, rolling_base_volume, rolling_quote_volume, trade_count
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
                table
            ))?;
            for bar in bars {
                stmt.execute(params![
                    bar.symbol,
                    bar.timestamp,
                    bar.open,
                    bar.high,
                    bar.low,
                    bar.close,
                    bar.base_volume,
                    bar.quote_volume,
                    finite_or_null(bar.rolling_base_volume),
                    finite_or_null(bar.rolling_quote_volume),
                    bar.trade_count as i64,
                ])?;
            }
        }
        tx.commit()?;

        log::debug!("💾 {} rows written to {}", bars.len(), table);
        Ok(())
    }

    /// Load the stage's series ordered by symbol and timestamp
    pub fn load_bars(&self, interval: Interval) -> Result<Vec<Bar>, StoreError> {
        let conn = self.conn.lock().map_err(|_| StoreError::Poisoned)?;
        let mut stmt = conn.prepare(&format!(
            r#"SELECT symbol, timestamp, open, high, low, close,
                      base_volume, quote_volume, rolling_base_volume, rolling_quote_volume, trade_count
               FROM "{}" ORDER BY symbol, timestamp"#,
            Self::bars_table(interval)
        ))?;

        let rows = stmt.query_map([], |row| {
            Ok(Bar {
                symbol: row.get(0)?,
                timestamp: row.get(1)?,
                open: row.get(2)?,
                high: row.get(3)?,
                low: row.get(4)?,
                close: row.get(5)?,
                base_volume: row.get(6)?,
                quote_volume: row.get(7)?,
                rolling_base_volume: row.get::<_, Option<f64>>(8)?.unwrap_or(f64::NAN),
                rolling_quote_volume: row.get::<_, Option<f64>>(9)?.unwrap_or(f64::NAN),
                trade_count: row.get::<_, i64>(10)? as u64,
            })
        })?;

        let mut bars = Vec::new();
        for bar in rows {
            bars.push(bar?);
        }
        Ok(bars)
    }

    /// Replace the stage's screened set, keeping its order
    pub fn replace_screened(&self, interval: Interval, screened: &ScreenedSet) -> Result<(), StoreError> {
        let mut conn = self.conn.lock().map_err(|_| StoreError::Poisoned)?;
        let table = Self::screened_table(interval);
        let tx = conn.transaction()?;
        tx.execute(&format!(r#"DELETE FROM "{}""#, table), [])?;
        {
            let mut stmt = tx.prepare(&format!(
                r#"INSERT INTO "{}" (
                    position, symbol, base_asset, quote_asset, close,
                    last_price_move, last_volume_move, rolling_usdt_volume, timestamp
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
                table
            ))?;
            for (position, entry) in screened.entries.iter().enumerate() {
                stmt.execute(params![
                    position as i64,
                    entry.symbol,
                    entry.base_asset,
                    entry.quote_asset,
                    entry.close,
                    entry.last_price_move,
                    entry.last_volume_move,
                    entry.rolling_usdt_volume,
                    entry.timestamp,
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    pub fn load_screened(&self, interval: Interval) -> Result<ScreenedSet, StoreError> {
        let conn = self.conn.lock().map_err(|_| StoreError::Poisoned)?;
        let mut stmt = conn.prepare(&format!(
            r#"SELECT symbol, base_asset, quote_asset, close,
                      last_price_move, last_volume_move, rolling_usdt_volume, timestamp
               FROM "{}" ORDER BY position"#,
            Self::screened_table(interval)
        ))?;

        let rows = stmt.query_map([], |row| {
            Ok(ScreenedEntry {
                symbol: row.get(0)?,
                base_asset: row.get(1)?,
                quote_asset: row.get(2)?,
                close: row.get(3)?,
                last_price_move: row.get(4)?,
                last_volume_move: row.get(5)?,
                rolling_usdt_volume: row.get(6)?,
                timestamp: row.get(7)?,
            })
        })?;

        let mut entries = Vec::new();
        for entry in rows {
            entries.push(entry?);
        }
        Ok(ScreenedSet::new(entries))
    }
}

fn finite_or_null(value: f64) -> Option<f64> {
    value.is_finite().then_some(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::series::tests::bar;
    use tempfile::tempdir;

    #[test]
    fn test_replace_and_load_bars() {
        let dir = tempdir().unwrap();
        let store = SeriesStore::open(dir.path().join("series.db").to_str().unwrap()).unwrap();
        store.ensure_tables(Interval::Min1).unwrap();

        store
            .replace_bars(Interval::Min1, &[bar("ETHUSDT", 60, 1.0, 1.0, 1.0), bar("ETHUSDT", 120, 2.0, 1.0, 1.0)])
            .unwrap();
        store.replace_bars(Interval::Min1, &[bar("BTCUSDT", 60, 3.0, 1.0, f64::NAN)]).unwrap();

        let loaded = store.load_bars(Interval::Min1).unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].symbol, "BTCUSDT");
        assert!(loaded[0].rolling_base_volume.is_nan());
    }

    #[test]
    fn test_stages_use_separate_tables() {
        let store = SeriesStore::open_in_memory().unwrap();
        store.ensure_tables(Interval::Min1).unwrap();
        store.ensure_tables(Interval::Hour1).unwrap();

        store.replace_bars(Interval::Min1, &[bar("ETHUSDT", 60, 1.0, 1.0, 1.0)]).unwrap();

        assert!(store.load_bars(Interval::Hour1).unwrap().is_empty());
        assert_eq!(store.load_bars(Interval::Min1).unwrap().len(), 1);
    }

    #[test]
    fn test_screened_order_survives_reload() {
        let store = SeriesStore::open_in_memory().unwrap();
        store.ensure_tables(Interval::Sec15).unwrap();
        let entries = ["ZECUSDT", "ADAUSDT", "BTCUSDT"]
            .iter()
            .map(|s| ScreenedEntry {
                symbol: s.to_string(),
                base_asset: s.trim_end_matches("USDT").to_string(),
                quote_asset: "USDT".to_string(),
                close: 1.0,
                last_price_move: 0.0,
                last_volume_move: 0.0,
                rolling_usdt_volume: 0.0,
                timestamp: 0,
            })
            .collect();

        store.replace_screened(Interval::Sec15, &ScreenedSet::new(entries)).unwrap();

        let loaded = store.load_screened(Interval::Sec15).unwrap();
        assert_eq!(loaded.symbols(), vec!["ZECUSDT", "ADAUSDT", "BTCUSDT"]);
    }
}
