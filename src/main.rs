mod alarm;
mod analysis;
mod breakout;
mod cache;
mod chart;
mod comfy_table;
mod cumulative_price_change;
mod find_tickers;
mod indicators;
mod price_series;
mod quotes;
mod report;
mod storage_utils;
mod trend;
mod volatility;
mod volatility_screen;

use crate::alarm::{AlarmOptions, Watchlist};
use crate::analysis::AnalysisOptions;
use crate::cache::PriceCache;
use crate::cumulative_price_change::MoversOptions;
use crate::quotes::{FetchRange, YahooClient};
use crate::storage_utils::{AsyncStorageManager, CacheBackend};
use crate::volatility_screen::VolatilityOptions;
use anyhow::{Context, Result, bail};
use chrono::{NaiveDate, Utc};
use clap::{Args, Parser, Subcommand};
use std::io::{BufRead, Write};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "equity-screener", version, about = "Trend, breakout and volatility screens for exchange-listed equities")]
struct Cli {
    /// Storage directory for config.json, cached prices and reports
    #[arg(long, global = true, default_value = "stock_data")]
    data_dir: PathBuf,

    /// Overrides the cache backend from config.json
    #[arg(long, global = true, value_enum)]
    cache: Option<CacheBackend>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Majority vote of indicator trends on the latest bar
    Trend(SymbolArgs),
    /// Breakout signals, pivot levels and chart patterns
    Breakout(SymbolArgs),
    /// Percentage change over a period for ticker lists
    Movers(MoversArgs),
    /// Rank a ticker list by Volatility Impact Score
    Volatility(VolatilityArgs),
    /// Poll prices and sound an alarm near thresholds
    Alarm(AlarmArgs),
}

#[derive(Args)]
struct SymbolArgs {
    /// Ticker, e.g. TITAGARH.NS; prompted for when omitted
    symbol: Option<String>,

    /// Lookback such as 1d, 1mo, 6mo, 1y
    #[arg(long)]
    period: Option<String>,

    /// Bar size such as 1m, 15m, 1h, 1d
    #[arg(long)]
    interval: Option<String>,

    /// Leave the ADX vote out of the trend count
    #[arg(long, default_value_t = false)]
    no_adx: bool,
}

#[derive(Args)]
struct MoversArgs {
    /// Ticker CSV files with a Symbol column
    #[arg(required = true)]
    ticker_files: Vec<PathBuf>,

    #[arg(long, default_value = "5d")]
    period: String,

    #[arg(long, default_value = "1d")]
    interval: String,

    /// Also dump the HTML table on stdout instead of the terminal table
    #[arg(long, default_value_t = false)]
    html: bool,
}

#[derive(Args)]
struct VolatilityArgs {
    /// Ticker CSV with Symbol and Company Name columns
    ticker_file: PathBuf,

    /// First day, YYYY-MM-DD
    #[arg(long)]
    start: NaiveDate,

    /// Day after the last one, YYYY-MM-DD
    #[arg(long)]
    end: NaiveDate,

    #[arg(long, default_value = "1d")]
    interval: String,

    /// Skip the PNG charts
    #[arg(long, default_value_t = false)]
    no_charts: bool,
}

#[derive(Args)]
struct AlarmArgs {
    /// Single ticker to watch (alerts at or above --threshold)
    #[arg(long, requires = "threshold", conflicts_with = "thresholds")]
    symbol: Option<String>,

    #[arg(long)]
    threshold: Option<f64>,

    /// JSON file of ticker to threshold, re-read every poll
    #[arg(long)]
    thresholds: Option<PathBuf>,

    /// Stop after this many polls
    #[arg(long)]
    iterations: Option<u64>,
}

fn prompt_symbol() -> Result<String> {
    print!("Enter the stock symbol (e.g., TITAGARH.NS): ");
    std::io::stdout().flush()?;
    let mut line = String::new();
    std::io::stdin().lock().read_line(&mut line)?;
    let symbol = line.trim().to_uppercase();
    if symbol.is_empty() {
        bail!("no symbol given");
    }
    Ok(symbol)
}

fn analysis_options(args: SymbolArgs, default_period: &str, default_interval: &str) -> Result<AnalysisOptions> {
    let symbol = match args.symbol {
        Some(s) => s.to_uppercase(),
        None => prompt_symbol()?,
    };
    Ok(AnalysisOptions {
        symbol,
        range: FetchRange::period(
            args.period.unwrap_or_else(|| default_period.to_string()),
            args.interval.unwrap_or_else(|| default_interval.to_string()),
        ),
        include_adx: !args.no_adx,
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let storage = AsyncStorageManager::new(&cli.data_dir).await?;
    let config = storage.load_config().await?;
    let provider = YahooClient::new(&config.provider).context("failed to build HTTP client")?;
    let suffix = config.provider.exchange_suffix.as_str();
    let today = Utc::now().date_naive();

    let backend = cli.cache.unwrap_or(config.cache.backend);
    let cache = PriceCache::open(backend, &storage.base_dir, &config.cache.sqlite_file);

    match cli.command {
        Commands::Trend(args) => {
            let options = analysis_options(args, "1d", "1m")?;
            analysis::run_trend(&provider, suffix, &options).await?;
        }
        Commands::Breakout(args) => {
            let options = analysis_options(args, "6mo", "1d")?;
            analysis::run_breakout(&provider, suffix, &options).await?;
        }
        Commands::Movers(args) => {
            let options = MoversOptions {
                ticker_files: args.ticker_files,
                period: args.period,
                interval: args.interval,
                print_html: args.html,
            };
            cumulative_price_change::run(&storage, &cache, &provider, suffix, &options, today).await?;
        }
        Commands::Volatility(args) => {
            let options = VolatilityOptions {
                ticker_file: args.ticker_file,
                start: args.start,
                end: args.end,
                interval: args.interval,
                charts: !args.no_charts,
            };
            volatility_screen::run(
                &storage,
                &cache,
                &provider,
                suffix,
                &config.vis,
                config.charts.font_path.clone(),
                &options,
                today,
            )
            .await?;
        }
        Commands::Alarm(args) => {
            let watch = match (args.symbol, args.threshold, args.thresholds) {
                (Some(symbol), Some(threshold), _) => Watchlist::Single {
                    symbol: symbol.to_uppercase(),
                    threshold,
                },
                (None, _, Some(path)) => Watchlist::Batch(path),
                _ => bail!("alarm needs --symbol with --threshold, or --thresholds <file>"),
            };
            let options = AlarmOptions {
                watch,
                max_iterations: args.iterations,
            };
            alarm::run(&provider, &config.alarm, suffix, &options).await?;
        }
    }

    Ok(())
}
