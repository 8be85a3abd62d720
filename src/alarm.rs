//! Price alarms: poll the latest close and sound an alert when a rule fires.

use crate::quotes::{FetchRange, MarketDataProvider, exchange_symbol};
use crate::storage_utils::AlarmConfig;
use anyhow::{Context, Result};
use futures::future::join_all;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::process::Command;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AlertRule {
    /// Fires once the price reaches the threshold.
    AtOrAbove,
    /// Fires while the price sits within the band around the threshold.
    Within(f64),
}

impl AlertRule {
    pub fn triggered(&self, price: f64, threshold: f64) -> bool {
        match *self {
            Self::AtOrAbove => price >= threshold,
            Self::Within(band) => (price - threshold).abs() < band,
        }
    }
}

#[derive(Debug, Clone)]
pub enum Watchlist {
    Single { symbol: String, threshold: f64 },
    /// JSON object of symbol to threshold, re-read before every poll.
    Batch(PathBuf),
}

#[derive(Debug, Clone)]
pub struct AlarmOptions {
    pub watch: Watchlist,
    pub max_iterations: Option<u64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Alert {
    pub symbol: String,
    pub price: f64,
    pub threshold: f64,
}

pub async fn load_thresholds(path: &Path) -> Result<BTreeMap<String, f64>> {
    let content = tokio::fs::read(path)
        .await
        .with_context(|| format!("failed to read thresholds {}", path.display()))?;
    serde_json::from_slice(&content).with_context(|| format!("failed to parse thresholds {}", path.display()))
}

/// Last close of the quote window, or `None` when the provider has no rows.
pub async fn latest_price<P: MarketDataProvider>(
    provider: &P,
    symbol: &str,
    range: &FetchRange,
) -> Result<Option<f64>> {
    let series = provider.fetch(symbol, range).await?;
    Ok(series.last().map(|bar| bar.close))
}

/// Checks every target concurrently and returns the ones whose rule fired.
/// A failing ticker is logged and skipped.
pub async fn poll_once<P: MarketDataProvider>(
    provider: &P,
    targets: &[(String, f64)],
    rule: AlertRule,
    range: &FetchRange,
) -> Vec<Alert> {
    let checks = targets.iter().map(|(symbol, threshold)| async move {
        match latest_price(provider, symbol, range).await {
            Ok(Some(price)) => {
                println!("The current price of {} is {:.2}", symbol, price);
                rule.triggered(price, *threshold).then(|| Alert {
                    symbol: symbol.clone(),
                    price,
                    threshold: *threshold,
                })
            }
            Ok(None) => {
                println!("No data found for {}.", symbol);
                None
            }
            Err(e) => {
                warn!(symbol = %symbol, error = %e, "price check failed");
                None
            }
        }
    });

    join_all(checks).await.into_iter().flatten().collect()
}

async fn play_sound(config: &AlarmConfig) {
    match Command::new(&config.player).arg(&config.sound_file).status().await {
        Ok(status) if status.success() => {}
        Ok(status) => warn!(player = %config.player, %status, "alarm player exited with failure"),
        Err(e) => warn!(player = %config.player, error = %e, "could not start alarm player"),
    }
}

async fn current_targets(watch: &Watchlist, exchange_suffix: &str) -> Result<Vec<(String, f64)>> {
    match watch {
        Watchlist::Single { symbol, threshold } => {
            Ok(vec![(exchange_symbol(symbol, exchange_suffix), *threshold)])
        }
        Watchlist::Batch(path) => Ok(load_thresholds(path)
            .await?
            .into_iter()
            .map(|(symbol, threshold)| (exchange_symbol(&symbol, exchange_suffix), threshold))
            .collect()),
    }
}

/// Single-ticker mode reads the daily bar; batch mode watches intraday bars.
pub fn quote_range(watch: &Watchlist, config: &AlarmConfig) -> FetchRange {
    let interval = match watch {
        Watchlist::Single { .. } => &config.single_quote_interval,
        Watchlist::Batch(_) => &config.quote_interval,
    };
    FetchRange::period(&config.quote_period, interval)
}

/// Polls until Ctrl-C or until `max_iterations` polls have run. Returns the
/// number of alerts raised.
pub async fn run<P: MarketDataProvider>(
    provider: &P,
    config: &AlarmConfig,
    exchange_suffix: &str,
    options: &AlarmOptions,
) -> Result<usize> {
    let rule = match options.watch {
        Watchlist::Single { .. } => AlertRule::AtOrAbove,
        Watchlist::Batch(_) => AlertRule::Within(config.proximity_band),
    };
    let range = quote_range(&options.watch, config);
    let interval = Duration::from_secs(config.poll_interval_secs);
    info!(rule = ?rule, range = %range, every = ?interval, "alarm started");

    // One listener for the whole run, so a Ctrl-C during a poll is not lost.
    let interrupted = tokio::signal::ctrl_c();
    tokio::pin!(interrupted);

    let mut iteration = 0u64;
    let mut raised = 0usize;
    loop {
        let targets = current_targets(&options.watch, exchange_suffix).await?;
        let alerts = tokio::select! {
            biased;
            _ = &mut interrupted => {
                info!("interrupted");
                break;
            }
            alerts = poll_once(provider, &targets, rule, &range) => alerts,
        };

        for alert in alerts {
            println!(
                "Alert: {} has crossed the threshold price of {}",
                alert.symbol, alert.threshold
            );
            info!(symbol = %alert.symbol, price = alert.price, threshold = alert.threshold, "alert");
            play_sound(config).await;
            raised += 1;
        }

        iteration += 1;
        if options.max_iterations.is_some_and(|max| iteration >= max) {
            break;
        }

        info!(secs = config.poll_interval_secs, "sleeping");
        tokio::select! {
            biased;
            _ = &mut interrupted => {
                info!("interrupted");
                break;
            }
            _ = tokio::time::sleep(interval) => {}
        }
    }

    Ok(raised)
}
