use crate::cache::{CacheKey, PriceCache, cache_or_fetch};
use crate::chart::render_bar_chart;
use crate::comfy_table;
use crate::find_tickers::{COMPANY_COLUMN, SYMBOL_COLUMN, load_ticker_file};
use crate::quotes::{FetchRange, MarketDataProvider, exchange_symbol};
use crate::report::HtmlTable;
use crate::storage_utils::AsyncStorageManager;
use crate::volatility::{TrendDirection, VisWeights, compute_metrics, volatility_impact_score};
use anyhow::{Result, bail};
use chrono::NaiveDate;
use serde::Serialize;
use std::path::PathBuf;
use tracing::{info, warn};

pub const CHART_SIZE: usize = 30;
pub const LEAST_VOLATILE_CHART: &str = "30_least_volatile_stocks.png";
pub const MOST_VOLATILE_CHART: &str = "30_most_volatile_stocks.png";

#[derive(Debug, Clone)]
pub struct VolatilityOptions {
    pub ticker_file: PathBuf,
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub interval: String,
    pub charts: bool,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct VolatilityRow {
    pub company_name: String,
    pub symbol: String,
    pub vis: f64,
    pub trend: TrendDirection,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
}

/// Ascending by VIS; scores that could not be computed sort last.
pub fn sort_by_vis(rows: &mut [VolatilityRow]) {
    rows.sort_by(|a, b| match (a.vis.is_nan(), b.vis.is_nan()) {
        (false, false) => a.vis.total_cmp(&b.vis),
        (x, y) => x.cmp(&y),
    });
}

/// The `n` calmest and the `n` most volatile names of an already sorted
/// ranking, skipping rows without a score. The most volatile slice keeps
/// ascending order, like the calm one.
pub fn extremes(rows: &[VolatilityRow], n: usize) -> (&[VolatilityRow], &[VolatilityRow]) {
    let scored = rows.iter().take_while(|r| !r.vis.is_nan()).count();
    let scored = &rows[..scored];
    let least = &scored[..n.min(scored.len())];
    let most = &scored[scored.len().saturating_sub(n)..];
    (least, most)
}

pub fn volatility_html(rows: &[VolatilityRow]) -> String {
    let mut table = HtmlTable::new(["Company Name", "VIS", "Trend", "Start Date", "End Date"]);
    for row in rows {
        table.push_row([
            row.company_name.clone(),
            format!("{:.6}", row.vis),
            row.trend.to_string(),
            row.start_date.to_string(),
            row.end_date.to_string(),
        ]);
    }
    table.render()
}

async fn draw_chart(path: PathBuf, title: &'static str, rows: &[VolatilityRow], font: Option<PathBuf>) {
    let entries: Vec<(String, f64)> = rows.iter().map(|r| (r.company_name.clone(), r.vis)).collect();
    let target = path.clone();
    let drawn = tokio::task::spawn_blocking(move || {
        render_bar_chart(&target, title, "VIS", &entries, font.as_deref())
    })
    .await;

    match drawn {
        Ok(Ok(())) => info!(path = %path.display(), "chart written"),
        Ok(Err(e)) => warn!(path = %path.display(), error = %e, "chart failed"),
        Err(e) => warn!(path = %path.display(), error = %e, "chart task panicked"),
    }
}

#[allow(clippy::too_many_arguments)]
pub async fn run<P: MarketDataProvider>(
    storage: &AsyncStorageManager,
    cache: &PriceCache,
    provider: &P,
    exchange_suffix: &str,
    weights: &VisWeights,
    chart_font: Option<PathBuf>,
    options: &VolatilityOptions,
    today: NaiveDate,
) -> Result<Vec<VolatilityRow>> {
    if options.start >= options.end {
        bail!("start date {} must be before end date {}", options.start, options.end);
    }

    let listings = load_ticker_file(&options.ticker_file, &[SYMBOL_COLUMN, COMPANY_COLUMN])?;
    info!(tickers = listings.len(), start = %options.start, end = %options.end, "ranking by VIS");

    let range = FetchRange::dates(options.start, options.end, &options.interval);
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
        if series.is_empty() {
            info!(symbol = %symbol, "no data found");
            continue;
        }

        let metrics = compute_metrics(&series.adj_closes());
        rows.push(VolatilityRow {
            company_name: listing.display_name().to_string(),
            symbol: listing.symbol.clone(),
            vis: volatility_impact_score(&metrics, weights),
            trend: metrics.direction(),
            start_date: options.start,
            end_date: options.end,
        });
    }

    sort_by_vis(&mut rows);

    let list_stem = options
        .ticker_file
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let report = format!("{list_stem}volatility_data");
    let path = storage
        .save_text(&format!("{report}.html"), &volatility_html(&rows))
        .await?;
    storage.save(&report, &rows).await?;
    info!(path = %path.display(), rows = rows.len(), "volatility report written");

    comfy_table::print_volatility(&rows);

    if options.charts {
        let (least, most) = extremes(&rows, CHART_SIZE);
        if least.is_empty() {
            warn!("no scored tickers, skipping charts");
        } else {
            draw_chart(
                storage.path(LEAST_VOLATILE_CHART),
                "30 Least Volatile Companies (VIS)",
                least,
                chart_font.clone(),
            )
            .await;
            draw_chart(
                storage.path(MOST_VOLATILE_CHART),
                "30 Most Volatile Companies (VIS)",
                most,
                chart_font,
            )
            .await;
        }
    }

    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::SqliteCache;
    use crate::price_series::PriceSeries;
    use crate::price_series::tests::bar;
    use tempfile::TempDir;

    fn row(name: &str, vis: f64) -> VolatilityRow {
        VolatilityRow {
            company_name: name.to_string(),
            symbol: name.to_uppercase(),
            vis,
            trend: TrendDirection::Flat,
            start_date: NaiveDate::from_ymd_opt(2024, 6, 1).unwrap(),
            end_date: NaiveDate::from_ymd_opt(2024, 7, 20).unwrap(),
        }
    }

    #[test]
    fn unscored_rows_sort_last_and_are_left_out_of_extremes() {
        let mut rows = vec![row("c", 0.3), row("nan", f64::NAN), row("a", 0.1), row("b", 0.2)];
        sort_by_vis(&mut rows);
        let names: Vec<&str> = rows.iter().map(|r| r.company_name.as_str()).collect();
        assert_eq!(names, vec!["a", "b", "c", "nan"]);

        let (least, most) = extremes(&rows, 2);
        assert_eq!(least.iter().map(|r| r.company_name.as_str()).collect::<Vec<_>>(), vec!["a", "b"]);
        assert_eq!(most.iter().map(|r| r.company_name.as_str()).collect::<Vec<_>>(), vec!["b", "c"]);

        let (least, most) = extremes(&rows, 30);
        assert_eq!(least.len(), 3);
        assert_eq!(most.len(), 3);
    }

    struct WigglyProvider;

    impl MarketDataProvider for WigglyProvider {
        async fn fetch(&self, symbol: &str, _range: &FetchRange) -> Result<PriceSeries> {
            let amplitude = match symbol {
                "CALM.NS" => 0.5,
                "WILD.NS" => 8.0,
                _ => return Ok(PriceSeries::empty(symbol)),
            };
            let bars = (0..30)
                .map(|i| bar(i, 100.0 + amplitude * (i as f64 * 1.3).sin(), 1.0))
                .collect();
            Ok(PriceSeries::new(symbol, bars))
        }
    }

    #[tokio::test]
    async fn ranks_calm_before_wild() {
        let tmp = TempDir::new().unwrap();
        let storage = AsyncStorageManager::new(tmp.path()).await.unwrap();
        let list = tmp.path().join("NSE_small_cap_list.csv");
        std::fs::write(&list, "Symbol,Company Name\nWILD,Wild Industries\nGHOST,Ghost Ltd\nCALM,Calm Holdings\n").unwrap();

        let cache = PriceCache::Sqlite(SqliteCache::new(tmp.path().join("stock_data.db")));
        let options = VolatilityOptions {
            ticker_file: list,
            start: NaiveDate::from_ymd_opt(2024, 6, 1).unwrap(),
            end: NaiveDate::from_ymd_opt(2024, 7, 20).unwrap(),
            interval: "1d".to_string(),
            charts: false,
        };
        let today = NaiveDate::from_ymd_opt(2024, 8, 1).unwrap();

        let rows = run(&storage, &cache, &WigglyProvider, ".NS", &VisWeights::default(), None, &options, today)
            .await
            .unwrap();

        let names: Vec<&str> = rows.iter().map(|r| r.company_name.as_str()).collect();
        assert_eq!(names, vec!["Calm Holdings", "Wild Industries"]);
        assert!(rows[0].vis < rows[1].vis);
        assert!(tmp.path().join("NSE_small_cap_listvolatility_data.html").exists());
        assert!(tmp.path().join("NSE_small_cap_listvolatility_data.json").exists());
    }

    #[tokio::test]
    async fn inverted_date_range_is_rejected() {
        let tmp = TempDir::new().unwrap();
        let storage = AsyncStorageManager::new(tmp.path()).await.unwrap();
        let cache = PriceCache::Csv(crate::cache::CsvCache::new(tmp.path()));
        let day = NaiveDate::from_ymd_opt(2024, 6, 7).unwrap();
        let options = VolatilityOptions {
            ticker_file: tmp.path().join("missing.csv"),
            start: day,
            end: day,
            interval: "1d".to_string(),
            charts: false,
        };
        let result = run(&storage, &cache, &WigglyProvider, ".NS", &VisWeights::default(), None, &options, day).await;
        assert!(result.is_err());
    }
}
