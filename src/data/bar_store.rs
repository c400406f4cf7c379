/// Deduplicated bar storage backed by SQLite
/// The (symbol, resolution, open_time) primary key is the dedup constraint
use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, warn};

use crate::error::{CacheError, Result};
use crate::types::{Bar, Resolution, Symbol};

/// Persistent bar collection used by the fill and read paths
#[async_trait]
pub trait BarStore: Send + Sync {
    /// Insert bars whose key is not yet present; returns how many were new.
    /// Existing bars are never overwritten and duplicates never abort the batch.
    async fn upsert_many(&self, bars: Vec<Bar>) -> Result<usize>;

    async fn find_earliest_at_or_after(
        &self,
        symbol: &Symbol,
        resolution: Resolution,
        time: i64,
    ) -> Result<Option<Bar>>;

    async fn find_latest_at_or_after(
        &self,
        symbol: &Symbol,
        resolution: Resolution,
        time: i64,
    ) -> Result<Option<Bar>>;

    /// Bars with `start <= open_time < end`, ascending
    async fn range(
        &self,
        symbol: &Symbol,
        resolution: Resolution,
        start: i64,
        end: i64,
    ) -> Result<Vec<Bar>>;

    async fn count(&self, symbol: &Symbol, resolution: Resolution) -> Result<usize>;
}

const SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS bars (
        symbol     TEXT    NOT NULL,
        resolution TEXT    NOT NULL,
        open_time  INTEGER NOT NULL,
        open       REAL    NOT NULL,
        high       REAL    NOT NULL,
        low        REAL    NOT NULL,
        close      REAL    NOT NULL,
        volume     REAL    NOT NULL,
        PRIMARY KEY (symbol, resolution, open_time)
    );
"#;

const INSERT_BAR: &str = "INSERT INTO bars (symbol, resolution, open_time, open, high, low, close, volume)
     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
     ON CONFLICT(symbol, resolution, open_time) DO NOTHING";

const SELECT_COLUMNS: &str = "SELECT open_time, open, high, low, close, volume FROM bars";

/// SQLite bar store shared across tasks
#[derive(Clone)]
pub struct SqliteBarStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteBarStore {
    /// Open (or create) the database file at `path`
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        // WAL is optional; some filesystems refuse it
        if let Err(e) = conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;") {
            warn!("WAL journal unavailable for {}: {}", path.display(), e);
        }

        debug!("Opened bar store at {}", path.display());
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(SqliteBarStore {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run `f` against the connection on the blocking pool
    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut conn = conn
                .lock()
                .map_err(|_| CacheError::InternalError("bar store lock poisoned".to_string()))?;
            f(&mut conn)
        })
        .await
        .map_err(|e| CacheError::InternalError(format!("bar store task failed: {}", e)))?
    }

    async fn find_edge(
        &self,
        symbol: &Symbol,
        resolution: Resolution,
        time: i64,
        order: &'static str,
    ) -> Result<Option<Bar>> {
        let symbol = symbol.to_string();
        self.with_conn(move |conn| {
            let sql = format!(
                "{} WHERE symbol = ?1 AND resolution = ?2 AND open_time >= ?3 ORDER BY open_time {} LIMIT 1",
                SELECT_COLUMNS, order
            );
            let bar = conn
                .query_row(&sql, params![symbol, resolution.as_str(), time], |row| {
                    row_to_bar(row, &symbol, resolution)
                })
                .optional()?;
            Ok(bar)
        })
        .await
    }
}

fn row_to_bar(row: &rusqlite::Row<'_>, symbol: &str, resolution: Resolution) -> rusqlite::Result<Bar> {
    Ok(Bar {
        symbol: symbol.to_string(),
        resolution,
        open_time: row.get(0)?,
        open: row.get(1)?,
        high: row.get(2)?,
        low: row.get(3)?,
        close: row.get(4)?,
        volume: row.get(5)?,
    })
}

#[async_trait]
impl BarStore for SqliteBarStore {
    async fn upsert_many(&self, bars: Vec<Bar>) -> Result<usize> {
        if bars.is_empty() {
            return Ok(0);
        }

        let submitted = bars.len();
        let inserted = self
            .with_conn(move |conn| {
                let tx = conn.transaction()?;
                let mut inserted = 0;
                {
                    let mut stmt = tx.prepare_cached(INSERT_BAR)?;
                    for bar in &bars {
                        inserted += stmt.execute(params![
                            bar.symbol,
                            bar.resolution.as_str(),
                            bar.open_time,
                            bar.open,
                            bar.high,
                            bar.low,
                            bar.close,
                            bar.volume,
                        ])?;
                    }
                }
                tx.commit()?;
                Ok(inserted)
            })
            .await?;

        debug!(submitted, inserted, "Upserted bars");
        Ok(inserted)
    }

    async fn find_earliest_at_or_after(
        &self,
        symbol: &Symbol,
        resolution: Resolution,
        time: i64,
    ) -> Result<Option<Bar>> {
        self.find_edge(symbol, resolution, time, "ASC").await
    }

    async fn find_latest_at_or_after(
        &self,
        symbol: &Symbol,
        resolution: Resolution,
        time: i64,
    ) -> Result<Option<Bar>> {
        self.find_edge(symbol, resolution, time, "DESC").await
    }

    async fn range(
        &self,
        symbol: &Symbol,
        resolution: Resolution,
        start: i64,
        end: i64,
    ) -> Result<Vec<Bar>> {
        let symbol = symbol.to_string();
        self.with_conn(move |conn| {
            let sql = format!(
                "{} WHERE symbol = ?1 AND resolution = ?2 AND open_time >= ?3 AND open_time < ?4 ORDER BY open_time ASC",
                SELECT_COLUMNS
            );
            let mut stmt = conn.prepare_cached(&sql)?;
            let bars = stmt
                .query_map(params![symbol, resolution.as_str(), start, end], |row| {
                    row_to_bar(row, &symbol, resolution)
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(bars)
        })
        .await
    }

    async fn count(&self, symbol: &Symbol, resolution: Resolution) -> Result<usize> {
        let symbol = symbol.to_string();
        self.with_conn(move |conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM bars WHERE symbol = ?1 AND resolution = ?2",
                params![symbol, resolution.as_str()],
                |row| row.get(0),
            )?;
            Ok(count as usize)
        })
        .await
    }
}
