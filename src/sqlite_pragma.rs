//! SQLite tuning shared by every connection the runtime opens.

use rusqlite::Connection;

/// Apply WAL journaling and the relaxed sync settings used for series tables
pub fn apply_optimized_pragmas(conn: &Connection) -> rusqlite::Result<()> {
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    conn.pragma_update(None, "temp_store", "MEMORY")?;
    conn.pragma_update(None, "cache_size", -16_000)?;
    conn.busy_timeout(std::time::Duration::from_secs(5))?;

    log::debug!("📊 SQLite pragmas applied (WAL, synchronous=NORMAL)");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_pragmas_enable_wal() {
        let dir = tempdir().unwrap();
        let conn = Connection::open(dir.path().join("p.db")).unwrap();
        apply_optimized_pragmas(&conn).unwrap();

        let mode: String = conn
            .query_row("PRAGMA journal_mode", [], |row| row.get(0))
            .unwrap();
        assert_eq!(mode.to_lowercase(), "wal");
    }
}
