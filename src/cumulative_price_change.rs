use crate::cache::{CacheKey, PriceCache, cache_or_fetch};
use crate::comfy_table;
use crate::find_tickers::{SYMBOL_COLUMN, load_ticker_files};
use crate::price_series::PriceSeries;
use crate::quotes::{FetchRange, MarketDataProvider, exchange_symbol};
use crate::report::HtmlTable;
use crate::storage_utils::AsyncStorageManager;
use anyhow::Result;
use chrono::NaiveDate;
use serde::Serialize;
use std::path::PathBuf;
use tracing::{info, warn};

pub const MOVERS_REPORT: &str = "percentage_changes.html";
pub const MOVERS_RESULTS: &str = "percentage_changes";

#[derive(Debug, Clone)]
pub struct MoversOptions {
    pub ticker_files: Vec<PathBuf>,
    pub period: String,
    pub interval: String,
    pub print_html: bool,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct MoverRow {
    pub symbol: String,
    pub start_date: NaiveDate,
    pub period: String,
    pub percentage_change: f64,
}

/// Percentage change from the first to the last close, with the date of the
/// first bar. `None` for an empty series or a zero starting price.
pub fn percentage_change(series: &PriceSeries) -> Option<(f64, NaiveDate)> {
    let first = series.first()?;
    let last = series.last()?;
    if first.close == 0.0 {
        return None;
    }
    let change = ((last.close / first.close) - 1.0) * 100.0;
    Some((change, first.timestamp.date_naive()))
}

/// Ascending by change, so the biggest losers lead.
pub fn sort_movers(rows: &mut [MoverRow]) {
    rows.sort_by(|a, b| a.percentage_change.total_cmp(&b.percentage_change));
}

pub fn movers_html(rows: &[MoverRow]) -> String {
    let mut table = HtmlTable::new(["Symbol", "Start Date", "Period", "Percentage Change"]);
    for row in rows {
        table.push_row([
            row.symbol.clone(),
            row.start_date.to_string(),
            row.period.clone(),
            format!("{:.6}", row.percentage_change),
        ]);
    }
    table.render()
}

pub async fn run<P: MarketDataProvider>(
    storage: &AsyncStorageManager,
    cache: &PriceCache,
    provider: &P,
    exchange_suffix: &str,
    options: &MoversOptions,
    today: NaiveDate,
) -> Result<Vec<MoverRow>> {
    let listings = load_ticker_files(&options.ticker_files, &[SYMBOL_COLUMN])?;
    info!(tickers = listings.len(), period = %options.period, "computing period movers");

    let range = FetchRange::period(&options.period, &options.interval);
    let mut rows = Vec::with_capacity(listings.len());

    for listing in &listings {
        let symbol = exchange_symbol(&listing.symbol, exchange_suffix);
        let key = match CacheKey::new(&symbol, range.clone(), today) {
            Ok(key) => key,
            Err(e) => {
                warn!(symbol = %listing.symbol, error = %e, "skipping ticker");
                continue;
            }
        };

        let series = match cache_or_fetch(cache, provider, &key).await {
            Ok(series) => series,
            Err(e) => {
                warn!(symbol = %symbol, error = %e, "fetch failed");
                continue;
            }
        };

        match percentage_change(&series) {
            Some((percentage_change, start_date)) => rows.push(MoverRow {
                symbol: listing.symbol.clone(),
                start_date,
                period: options.period.clone(),
                percentage_change,
            }),
            None => info!(symbol = %symbol, "no data found"),
        }
    }

    sort_movers(&mut rows);

    let html = movers_html(&rows);
    let path = storage.save_text(MOVERS_REPORT, &html).await?;
    storage.save(MOVERS_RESULTS, &rows).await?;
    info!(path = %path.display(), rows = rows.len(), "movers report written");

    if options.print_html {
        println!("{}", html);
    } else {
        comfy_table::print_movers(&rows);
    }

    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CsvCache;
    use crate::price_series::tests::bar;
    use anyhow::bail;
    use tempfile::TempDir;

    struct TableProvider;

    impl MarketDataProvider for TableProvider {
        async fn fetch(&self, symbol: &str, _range: &FetchRange) -> Result<PriceSeries> {
            let closes: &[f64] = match symbol {
                "UP.NS" => &[100.0, 105.0, 110.0],
                "DOWN.NS" => &[50.0, 45.0],
                "FLAT.NS" => &[20.0, 20.0],
                "EMPTY.NS" => &[],
                _ => bail!("unexpected symbol {symbol}"),
            };
            let bars = closes
                .iter()
                .enumerate()
                .map(|(i, &c)| bar(i as i64, c, 10.0))
                .collect();
            Ok(PriceSeries::new(symbol, bars))
        }
    }

    #[test]
    fn change_uses_first_and_last_close() {
        let series = PriceSeries::new("X", vec![bar(3, 80.0, 1.0), bar(4, 90.0, 1.0), bar(5, 100.0, 1.0)]);
        let (change, start) = percentage_change(&series).unwrap();
        assert!((change - 25.0).abs() < 1e-12);
        assert_eq!(start, NaiveDate::from_ymd_opt(2024, 1, 4).unwrap());

        assert!(percentage_change(&PriceSeries::empty("X")).is_none());
        let zero = PriceSeries::new("X", vec![bar(0, 0.0, 1.0), bar(1, 5.0, 1.0)]);
        assert!(percentage_change(&zero).is_none());
    }

    #[tokio::test]
    async fn ranks_list_ascending_and_writes_report() {
        let tmp = TempDir::new().unwrap();
        let storage = AsyncStorageManager::new(tmp.path()).await.unwrap();
        let list = tmp.path().join("NSE_list.csv");
        std::fs::write(&list, "Symbol,Company Name\nUP,Up Ltd\nDOWN,Down Ltd\nEMPTY,Empty Ltd\nBROKEN,Broken Ltd\nFLAT,Flat Ltd\n").unwrap();

        let cache = PriceCache::Csv(CsvCache::new(tmp.path()));
        let options = MoversOptions {
            ticker_files: vec![list],
            period: "5d".to_string(),
            interval: "1d".to_string(),
            print_html: false,
        };
        let today = NaiveDate::from_ymd_opt(2024, 7, 3).unwrap();

        let rows = run(&storage, &cache, &TableProvider, ".NS", &options, today)
            .await
            .unwrap();

        let symbols: Vec<&str> = rows.iter().map(|r| r.symbol.as_str()).collect();
        assert_eq!(symbols, vec!["DOWN", "FLAT", "UP"]);
        assert!((rows[0].percentage_change + 10.0).abs() < 1e-9);

        let html = std::fs::read_to_string(tmp.path().join(MOVERS_REPORT)).unwrap();
        assert!(html.find("DOWN").unwrap() < html.find("UP").unwrap());
        assert!(tmp.path().join("UP.NS_2024-07-03_5d_1d.csv").exists());

        let saved: Vec<serde_json::Value> = storage.load(MOVERS_RESULTS).await.unwrap();
        assert_eq!(saved.len(), 3);
        assert_eq!(saved[0]["symbol"], "DOWN");
    }
}
