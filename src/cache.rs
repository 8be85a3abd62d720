//! Cache-or-fetch for price history.
//!
//! A key maps to exactly one stored series. There is no expiry: a key is
//! either present (read it back) or absent (fetch and store). Writing an
//! existing key replaces it.

use crate::price_series::{Bar, PriceSeries};
use crate::quotes::{FetchRange, MarketDataProvider};
use crate::storage_utils::{CacheBackend, write_atomic};
use anyhow::{Context, Result, anyhow, bail};
use chrono::{DateTime, NaiveDate};
use regex::Regex;
use rusqlite::{Connection, OptionalExtension, params};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheKey {
    pub symbol: String,
    pub range: FetchRange,
    /// Day the fetch happened. Only rolling periods carry it, since "5d"
    /// fetched today and "5d" fetched tomorrow are different data.
    pub fetched_on: Option<NaiveDate>,
}

impl CacheKey {
    pub fn new(symbol: &str, range: FetchRange, today: NaiveDate) -> Result<Self> {
        validate_symbol(symbol)?;
        let fetched_on = match range {
            FetchRange::Period { .. } => Some(today),
            FetchRange::Dates { .. } => None,
        };
        Ok(Self {
            symbol: symbol.to_string(),
            range,
            fetched_on,
        })
    }

    /// `SYMBOL_start_end_interval` or `SYMBOL_fetchdate_period_interval`.
    pub fn as_string(&self) -> String {
        match (&self.range, self.fetched_on) {
            (FetchRange::Period { period, interval }, Some(day)) => {
                format!("{}_{}_{}_{}", self.symbol, day, period, interval)
            }
            (FetchRange::Period { period, interval }, None) => {
                format!("{}_{}_{}", self.symbol, period, interval)
            }
            (
                FetchRange::Dates {
                    start,
                    end,
                    interval,
                },
                _,
            ) => format!("{}_{}_{}_{}", self.symbol, start, end, interval),
        }
    }
}

/// Symbols end up in file and table names, so only the characters exchanges
/// actually use are let through.
pub fn validate_symbol(symbol: &str) -> Result<()> {
    let pattern = Regex::new(r"^[A-Za-z0-9^][A-Za-z0-9&=._-]*$")?;
    if symbol.contains("..") || !pattern.is_match(symbol) {
        bail!("invalid ticker symbol: {symbol:?}");
    }
    Ok(())
}

/// Per-key CSV files in one directory.
pub struct CsvCache {
    dir: PathBuf,
}

impl CsvCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn file_for(&self, key: &CacheKey) -> PathBuf {
        self.dir.join(format!("{}.csv", key.as_string()))
    }

    async fn load(&self, key: &CacheKey) -> Result<Option<PriceSeries>> {
        let path = self.file_for(key);
        if !path.exists() {
            return Ok(None);
        }

        let bytes = tokio::fs::read(&path)
            .await
            .with_context(|| format!("failed to read {}", path.display()))?;
        let mut reader = csv::Reader::from_reader(bytes.as_slice());
        let bars = reader
            .deserialize::<Bar>()
            .collect::<Result<Vec<_>, _>>()
            .with_context(|| format!("corrupt cache file {}", path.display()))?;

        Ok(Some(PriceSeries::new(&key.symbol, bars)))
    }

    async fn store(&self, key: &CacheKey, series: &PriceSeries) -> Result<()> {
        let mut writer = csv::Writer::from_writer(Vec::new());
        for bar in series.bars() {
            writer.serialize(bar)?;
        }
        let bytes = writer.into_inner().map_err(|e| anyhow!("csv flush failed: {e}"))?;

        tokio::fs::create_dir_all(&self.dir).await?;
        write_atomic(&self.file_for(key), &bytes).await
    }
}

/// One table per key in a SQLite file.
pub struct SqliteCache {
    db_path: PathBuf,
}

impl SqliteCache {
    pub fn new(db_path: impl Into<PathBuf>) -> Self {
        Self {
            db_path: db_path.into(),
        }
    }

    async fn load(&self, key: &CacheKey) -> Result<Option<PriceSeries>> {
        let db_path = self.db_path.clone();
        let table = key.as_string();
        let symbol = key.symbol.clone();

        tokio::task::spawn_blocking(move || -> Result<Option<PriceSeries>> {
            let conn = Connection::open(&db_path)
                .with_context(|| format!("failed to open {}", db_path.display()))?;
            if !table_exists(&conn, &table)? {
                return Ok(None);
            }

            let mut stmt = conn.prepare(&format!(
                "SELECT ts, open, high, low, close, adj_close, volume FROM {} ORDER BY ts ASC",
                quote_identifier(&table)
            ))?;
            let rows = stmt.query_map([], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, f64>(1)?,
                    row.get::<_, f64>(2)?,
                    row.get::<_, f64>(3)?,
                    row.get::<_, f64>(4)?,
                    row.get::<_, f64>(5)?,
                    row.get::<_, f64>(6)?,
                ))
            })?;

            let mut bars = Vec::new();
            for row in rows {
                let (ts, open, high, low, close, adj_close, volume) = row?;
                let timestamp = DateTime::from_timestamp(ts, 0)
                    .ok_or_else(|| anyhow!("bad timestamp {ts} in table {table}"))?;
                bars.push(Bar {
                    timestamp,
                    open,
                    high,
                    low,
                    close,
                    adj_close,
                    volume,
                });
            }
            Ok(Some(PriceSeries::new(symbol, bars)))
        })
        .await?
    }

    /// **Replace Cached Table**
    /// The key's table is rebuilt from scratch inside one transaction.
    async fn store(&self, key: &CacheKey, series: &PriceSeries) -> Result<()> {
        let db_path = self.db_path.clone();
        let table = quote_identifier(&key.as_string());
        let bars = series.bars().to_vec();

        tokio::task::spawn_blocking(move || -> Result<()> {
            let mut conn = Connection::open(&db_path)
                .with_context(|| format!("failed to open {}", db_path.display()))?;
            let tx = conn.transaction()?;

            // 1. Drop any previous copy and recreate the schema
            tx.execute_batch(&format!(
                "DROP TABLE IF EXISTS {table};
                 CREATE TABLE {table} (
                     ts INTEGER PRIMARY KEY,
                     open REAL NOT NULL,
                     high REAL NOT NULL,
                     low REAL NOT NULL,
                     close REAL NOT NULL,
                     adj_close REAL NOT NULL,
                     volume REAL NOT NULL
                 );"
            ))?;

            // 2. Insert every bar
            {
                let mut insert = tx.prepare(&format!(
                    "INSERT INTO {table} (ts, open, high, low, close, adj_close, volume)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)"
                ))?;
                for b in &bars {
                    insert.execute(params![
                        b.timestamp.timestamp(),
                        b.open,
                        b.high,
                        b.low,
                        b.close,
                        b.adj_close,
                        b.volume
                    ])?;
                }
            }

            // 3. Commit; an error before this rolls the whole table back
            tx.commit()?;
            Ok(())
        })
        .await?
    }
}

fn table_exists(conn: &Connection, table: &str) -> Result<bool> {
    let found = conn
        .query_row(
            "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1",
            [table],
            |_| Ok(()),
        )
        .optional()?;
    Ok(found.is_some())
}

fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

pub enum PriceCache {
    Csv(CsvCache),
    Sqlite(SqliteCache),
}

impl PriceCache {
    /// CSV files live directly in `base_dir`; the SQLite file is resolved
    /// against it.
    pub fn open(backend: CacheBackend, base_dir: &Path, sqlite_file: &str) -> Self {
        match backend {
            CacheBackend::Csv => Self::Csv(CsvCache::new(base_dir)),
            CacheBackend::Sqlite => Self::Sqlite(SqliteCache::new(base_dir.join(sqlite_file))),
        }
    }

    pub async fn load(&self, key: &CacheKey) -> Result<Option<PriceSeries>> {
        match self {
            Self::Csv(c) => c.load(key).await,
            Self::Sqlite(c) => c.load(key).await,
        }
    }

    pub async fn store(&self, key: &CacheKey, series: &PriceSeries) -> Result<()> {
        match self {
            Self::Csv(c) => c.store(key, series).await,
            Self::Sqlite(c) => c.store(key, series).await,
        }
    }
}

/// **Cache Or Fetch**
/// Returns the stored series for `key`, or fetches it and stores it first.
///
/// Empty fetches are returned but not stored, so a later run tries again.
pub async fn cache_or_fetch<P: MarketDataProvider>(
    cache: &PriceCache,
    provider: &P,
    key: &CacheKey,
) -> Result<PriceSeries> {
    // 1. Serve from the cache when the key is present
    let cache_key = key.as_string();
    if let Some(series) = cache.load(key).await? {
        debug!(key = %cache_key, rows = series.len(), "cache hit");
        return Ok(series);
    }

    // 2. Miss: fetch, then store anything non-empty
    info!(symbol = %key.symbol, range = %key.range, "fetching from provider");
    let series = provider.fetch(&key.symbol, &key.range).await?;
    if !series.is_empty() {
        cache.store(key, &series).await?;
    }
    Ok(series)
}
